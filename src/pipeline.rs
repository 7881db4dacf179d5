//! Staged conversion from a structured report to published artifacts.
//!
//! Stages run strictly in order:
//! markup → template → printable → archival → transmission.
//! The configured target names the last stage; its artifacts are published to
//! the output directory and nothing after it runs. Any failure stops the run
//! before publishing, so a failed run never leaves its target artifact at the
//! output location (intermediate files may remain in the working directory).
use crate::config::{ensure_valid, Configuration, Target};
use crate::extract::{extract, MarkupDocument, TemplateData};
use crate::staging::{publish_artifacts, Artifact};
use crate::template::{self, TemplateKind};
use crate::tools::{self, Tool, ToolRunner};
use crate::uid::{generate_uid, DEFAULT_UID_MAX_LENGTH};
use crate::util::sha256_file;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

mod context;

use context::RunContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Markup,
    Template,
    Printable,
    Archival,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Stage::Markup => "markup",
            Stage::Template => "template",
            Stage::Printable => "printable",
            Stage::Archival => "archival",
        }
    }

    /// Stage whose output a target publishes.
    pub fn final_for(target: Target) -> Stage {
        match target {
            Target::Xml => Stage::Markup,
            Target::Template => Stage::Template,
            Target::Pdf => Stage::Printable,
            Target::DcmPdf | Target::DcmImages => Stage::Archival,
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug)]
pub struct RunReport {
    pub artifacts: Vec<PathBuf>,
    pub transmitted: usize,
}

pub struct Pipeline<'a> {
    config: &'a Configuration,
    runner: &'a dyn ToolRunner,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Configuration, runner: &'a dyn ToolRunner) -> Self {
        Self { config, runner }
    }

    pub fn run(&self, input: &Path) -> Result<RunReport> {
        ensure_valid(self.config)?;
        let ctx = RunContext::new(input, self.config)?;
        let target = self.config.target;
        let last_stage = Stage::final_for(target);
        tracing::info!(
            input = %input.display(),
            target = %target,
            work_dir = %ctx.work_dir().display(),
            output_dir = %ctx.output_dir().display(),
            "report run started"
        );

        if let Some(extension) = self.single_output_extension() {
            ctx.ensure_not_input(&ctx.output_path(&extension))?;
        }

        let markup = self.markup_stage(&ctx)?;
        if self.finishes(Stage::Markup, last_stage) {
            return self.finalize(&ctx, vec![artifact(markup, ctx.output_path("xml"))], 0);
        }

        let (filled, kind, extension) = self.template_stage(&ctx, &markup)?;
        if self.finishes(Stage::Template, last_stage) {
            return self.finalize(&ctx, vec![artifact(filled, ctx.output_path(&extension))], 0);
        }

        let printable = self.printable_stage(&ctx, &filled, kind)?;
        if self.finishes(Stage::Printable, last_stage) {
            return self.finalize(&ctx, vec![artifact(printable, ctx.output_path("pdf"))], 0);
        }

        let objects = if target == Target::DcmPdf {
            vec![self.document_object(&ctx, &printable)?]
        } else {
            self.page_objects(&ctx, &printable)?
        };
        tracing::info!(stage = Stage::Archival.as_str(), "stage complete");

        let transmitted = self.transmit(&ctx, &objects)?;
        self.finalize(&ctx, objects, transmitted)
    }

    /// Extension of the one artifact a single-output target publishes.
    fn single_output_extension(&self) -> Option<String> {
        match self.config.target {
            Target::Xml => Some("xml".to_string()),
            Target::Template => Some(template_extension(&self.config.template_path)),
            Target::Pdf => Some("pdf".to_string()),
            Target::DcmPdf => Some("dcm".to_string()),
            Target::DcmImages => None,
        }
    }

    fn finishes(&self, stage: Stage, last_stage: Stage) -> bool {
        tracing::info!(stage = stage.as_str(), "stage complete");
        stage == last_stage
    }

    fn markup_stage(&self, ctx: &RunContext) -> Result<PathBuf> {
        let markup = ctx.markup_path();
        self.runner.run(&tools::dsr2xml(
            &self.config.tools.dsr2xml,
            ctx.input(),
            &markup,
        )?)?;
        ensure_produced(Tool::Dsr2Xml, &markup)?;
        Ok(markup)
    }

    fn template_stage(
        &self,
        ctx: &RunContext,
        markup: &Path,
    ) -> Result<(PathBuf, TemplateKind, String)> {
        let document = MarkupDocument::load(markup)?;
        let data = extract(&document, &self.config.rules)?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            write_template_data(&ctx.template_data_path(), &data)?;
        }

        let template_path = &self.config.template_path;
        let kind = TemplateKind::from_path(template_path);
        let extension = template_extension(template_path);
        let filled = ctx.filled_path(&extension);
        template::fill(template_path, &data, &filled, self.config.template_encoding)?;
        Ok((filled, kind, extension))
    }

    fn printable_stage(&self, ctx: &RunContext, filled: &Path, kind: TemplateKind) -> Result<PathBuf> {
        let printable = ctx.printable_path();
        let (tool, invocation) = match kind {
            TemplateKind::Structured => (
                Tool::Soffice,
                tools::soffice_to_pdf(&self.config.tools.soffice, filled, ctx.work_dir())?,
            ),
            TemplateKind::Flat => (
                Tool::Wkhtmltopdf,
                tools::wkhtmltopdf(&self.config.tools.wkhtmltopdf, filled, &printable)?,
            ),
        };
        self.runner.run(&invocation)?;
        ensure_produced(tool, &printable)?;
        Ok(printable)
    }

    /// One object wrapping the PDF; its identifier is seeded by the source
    /// report so it stays tied to the originating record.
    fn document_object(&self, ctx: &RunContext, printable: &Path) -> Result<Artifact> {
        let seed = sha256_file(ctx.input())?;
        let uid = generate_uid(Some(self.config.oid_root()), &seed, DEFAULT_UID_MAX_LENGTH);
        let object = ctx.document_object_path();
        self.runner.run(&tools::pdf2dcm(
            &self.config.tools.pdf2dcm,
            printable,
            ctx.input(),
            &uid,
            &object,
        )?)?;
        ensure_produced(Tool::Pdf2Dcm, &object)?;
        tracing::info!(uid = %uid, object = %object.display(), "document object created");
        Ok(artifact(object, ctx.output_path("dcm")))
    }

    /// One object per rendered page, in page order, each seeded by its own
    /// image content.
    fn page_objects(&self, ctx: &RunContext, printable: &Path) -> Result<Vec<Artifact>> {
        let pages_dir = ctx.pages_dir();
        if pages_dir.exists() {
            fs::remove_dir_all(&pages_dir)
                .with_context(|| format!("clear {}", pages_dir.display()))?;
        }
        fs::create_dir_all(&pages_dir).with_context(|| format!("create {}", pages_dir.display()))?;
        self.runner.run(&tools::pdftoppm(
            &self.config.tools.pdftoppm,
            printable,
            &pages_dir.join("page"),
            self.config.pdf_dpi,
        )?)?;
        let pages = collect_page_images(&pages_dir)?;
        if pages.is_empty() {
            return Err(anyhow!(
                "pdftoppm produced no page images in {}",
                pages_dir.display()
            ));
        }

        let mut objects = Vec::with_capacity(pages.len());
        for (idx, page) in pages.iter().enumerate() {
            let instance_number = idx + 1;
            let seed = sha256_file(page)?;
            let uid = generate_uid(Some(self.config.oid_root()), &seed, DEFAULT_UID_MAX_LENGTH);
            let object = ctx.page_object_path(instance_number);
            if let Some(parent) = object.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            self.runner
                .run(&tools::img2dcm(
                    &self.config.tools.img2dcm,
                    page,
                    ctx.input(),
                    &uid,
                    instance_number,
                    &object,
                )?)
                .with_context(|| format!("convert page {instance_number} of {}", pages.len()))?;
            ensure_produced(Tool::Img2Dcm, &object)?;
            tracing::info!(instance_number, uid = %uid, "page object created");
            objects.push(artifact(object, ctx.page_output_path(instance_number)));
        }
        Ok(objects)
    }

    /// Send every object, then optionally the source report. The first
    /// failure aborts the run; nothing is published in that case.
    fn transmit(&self, ctx: &RunContext, objects: &[Artifact]) -> Result<usize> {
        let Some(host) = self.config.dcm_send_ip.as_deref() else {
            return Ok(0);
        };
        let port = self.config.dcm_send_port;
        let mut queue: Vec<&Path> = objects.iter().map(|a| a.source.as_path()).collect();
        if self.config.dcm_send_dcm_sr {
            queue.push(ctx.input());
        }
        let total = queue.len();
        for (idx, path) in queue.iter().enumerate() {
            self.runner
                .run(&tools::storescu(&self.config.tools.storescu, host, port, path)?)
                .with_context(|| format!("transmit {} ({} of {total})", path.display(), idx + 1))?;
        }
        tracing::info!(host, port, objects = total, "transmission complete");
        Ok(total)
    }

    fn finalize(
        &self,
        ctx: &RunContext,
        artifacts: Vec<Artifact>,
        transmitted: usize,
    ) -> Result<RunReport> {
        for artifact in &artifacts {
            ctx.ensure_not_input(&artifact.dest)?;
        }
        let published = publish_artifacts(&artifacts, &ctx.backup_dir())?;
        tracing::info!(
            target = %self.config.target,
            artifacts = published.len(),
            transmitted,
            "report run finished"
        );
        Ok(RunReport {
            artifacts: published,
            transmitted,
        })
    }
}

fn artifact(source: PathBuf, dest: PathBuf) -> Artifact {
    Artifact { source, dest }
}

fn template_extension(template_path: &Path) -> String {
    template_path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "txt".to_string())
}

fn ensure_produced(tool: Tool, path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(anyhow!("{tool} did not produce {}", path.display()))
    }
}

fn write_template_data(path: &Path, data: &TemplateData) -> Result<()> {
    let text = serde_json::to_string_pretty(data).context("serialize template data")?;
    fs::write(path, text).with_context(|| format!("write {}", path.display()))?;
    tracing::debug!(path = %path.display(), "template data written");
    Ok(())
}

/// Page images sorted by the page number pdftoppm appends to the prefix.
fn collect_page_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = Regex::new(r"-(\d+)\.jpe?g$").context("compile page pattern")?;
    let mut pages = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(number) = pattern
            .captures(name)
            .and_then(|caps| caps[1].parse::<u64>().ok())
        else {
            continue;
        };
        pages.push((number, path));
    }
    pages.sort();
    Ok(pages.into_iter().map(|(_, path)| path).collect())
}
