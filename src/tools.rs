//! External collaborator invocation.
//!
//! Converters are opaque processes: the pipeline builds an argument list,
//! runs it to completion and looks only at the exit status and the files it
//! asked for. The search path is an explicit `ToolEnv` value instead of a
//! mutation of this process's `PATH`.
use crate::config::ToolConfig;
use crate::error::ReportError;
use crate::util::{path_to_string, truncate_bytes};
use anyhow::{Context, Result};
use std::env;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

const MAX_ERROR_OUTPUT_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Dsr2Xml,
    Soffice,
    Wkhtmltopdf,
    Pdftoppm,
    Pdf2Dcm,
    Img2Dcm,
    Storescu,
}

impl Tool {
    pub fn as_str(self) -> &'static str {
        match self {
            Tool::Dsr2Xml => "dsr2xml",
            Tool::Soffice => "soffice",
            Tool::Wkhtmltopdf => "wkhtmltopdf",
            Tool::Pdftoppm => "pdftoppm",
            Tool::Pdf2Dcm => "pdf2dcm",
            Tool::Img2Dcm => "img2dcm",
            Tool::Storescu => "storescu",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fully-built collaborator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub tool: Tool,
    pub program: String,
    pub args: Vec<String>,
    /// Keep the tool's console output out of the logs unless it fails.
    pub quiet: bool,
}

pub trait ToolRunner {
    /// Run to completion; a non-zero exit is an `ExternalTool` error.
    fn run(&self, invocation: &Invocation) -> Result<()>;
}

/// Directories searched ahead of the inherited `PATH`.
#[derive(Debug, Clone, Default)]
pub struct ToolEnv {
    search_paths: Vec<PathBuf>,
}

impl ToolEnv {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// `PATH` value for child processes.
    pub fn path_var(&self) -> Result<OsString> {
        let inherited = env::var_os("PATH").unwrap_or_default();
        let paths = self
            .search_paths
            .iter()
            .cloned()
            .chain(env::split_paths(&inherited));
        env::join_paths(paths).context("join tool search paths")
    }

    pub fn resolve(&self, program: &str) -> Result<PathBuf> {
        let cwd = env::current_dir().context("resolve current directory")?;
        which::which_in(program, Some(self.path_var()?), cwd)
            .with_context(|| format!("locate {program} (searched tool_search_paths and PATH)"))
    }
}

/// Runs collaborators as child processes.
pub struct ProcessRunner {
    env: ToolEnv,
}

impl ProcessRunner {
    pub fn new(env: ToolEnv) -> Self {
        Self { env }
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation) -> Result<()> {
        let program = self.env.resolve(&invocation.program)?;
        tracing::debug!(
            tool = %invocation.tool,
            program = %program.display(),
            args = ?invocation.args,
            "running tool"
        );
        let start = Instant::now();
        let output = Command::new(&program)
            .args(&invocation.args)
            .env("PATH", self.env.path_var()?)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("spawn {}", program.display()))?;
        let elapsed_ms = start.elapsed().as_millis();

        if !output.status.success() {
            return Err(ReportError::ExternalTool {
                tool: invocation.tool.to_string(),
                status: output.status.to_string(),
                output: failure_output(&output.stdout, &output.stderr),
            }
            .into());
        }

        tracing::info!(tool = %invocation.tool, elapsed_ms, "tool finished");
        if !invocation.quiet && !output.stdout.is_empty() {
            tracing::debug!(
                tool = %invocation.tool,
                stdout = %truncate_bytes(&output.stdout, MAX_ERROR_OUTPUT_BYTES),
                "tool output"
            );
        }
        Ok(())
    }
}

fn failure_output(stdout: &[u8], stderr: &[u8]) -> String {
    let stderr = truncate_bytes(stderr, MAX_ERROR_OUTPUT_BYTES);
    let stdout = truncate_bytes(stdout, MAX_ERROR_OUTPUT_BYTES);
    match (stderr.trim(), stdout.trim()) {
        ("", "") => "(no output)".to_string(),
        (err, "") => err.to_string(),
        ("", out) => out.to_string(),
        (err, out) => format!("{err}\n{out}"),
    }
}

fn base_args(config: &ToolConfig) -> Result<Vec<String>> {
    config.option_args()
}

fn invocation(tool: Tool, config: &ToolConfig, args: Vec<String>, quiet: bool) -> Invocation {
    Invocation {
        tool,
        program: config.program.clone(),
        args,
        quiet,
    }
}

/// Structured report to XML.
pub fn dsr2xml(config: &ToolConfig, report: &Path, xml_out: &Path) -> Result<Invocation> {
    let mut args = base_args(config)?;
    args.push(path_to_string(report, "structured report")?);
    args.push(path_to_string(xml_out, "markup output")?);
    Ok(invocation(Tool::Dsr2Xml, config, args, false))
}

/// Word-processing document to PDF; the PDF lands in `out_dir` under the
/// document's stem.
pub fn soffice_to_pdf(config: &ToolConfig, document: &Path, out_dir: &Path) -> Result<Invocation> {
    let mut args = base_args(config)?;
    args.extend(
        ["--headless", "--convert-to", "pdf", "--outdir"]
            .iter()
            .map(|s| s.to_string()),
    );
    args.push(path_to_string(out_dir, "pdf output directory")?);
    args.push(path_to_string(document, "filled document")?);
    Ok(invocation(Tool::Soffice, config, args, true))
}

/// Flat markup to PDF.
pub fn wkhtmltopdf(config: &ToolConfig, markup: &Path, pdf_out: &Path) -> Result<Invocation> {
    let mut args = base_args(config)?;
    args.push(path_to_string(markup, "filled markup")?);
    args.push(path_to_string(pdf_out, "pdf output")?);
    Ok(invocation(Tool::Wkhtmltopdf, config, args, true))
}

/// PDF to one JPEG per page, written as `<prefix>-<page>.jpg`.
pub fn pdftoppm(config: &ToolConfig, pdf: &Path, prefix: &Path, dpi: u32) -> Result<Invocation> {
    let mut args = base_args(config)?;
    args.push("-jpeg".to_string());
    args.push("-r".to_string());
    args.push(dpi.to_string());
    args.push(path_to_string(pdf, "pdf")?);
    args.push(path_to_string(prefix, "page image prefix")?);
    Ok(invocation(Tool::Pdftoppm, config, args, false))
}

/// Encapsulated PDF object sharing the study of the source report.
pub fn pdf2dcm(
    config: &ToolConfig,
    pdf: &Path,
    report: &Path,
    sop_instance_uid: &str,
    dcm_out: &Path,
) -> Result<Invocation> {
    let mut args = base_args(config)?;
    args.push("--study-from".to_string());
    args.push(path_to_string(report, "structured report")?);
    args.push("--key".to_string());
    args.push(format!("SOPInstanceUID={sop_instance_uid}"));
    args.push(path_to_string(pdf, "pdf")?);
    args.push(path_to_string(dcm_out, "dicom output")?);
    Ok(invocation(Tool::Pdf2Dcm, config, args, false))
}

/// Secondary-capture object for one page image.
pub fn img2dcm(
    config: &ToolConfig,
    image: &Path,
    report: &Path,
    sop_instance_uid: &str,
    instance_number: usize,
    dcm_out: &Path,
) -> Result<Invocation> {
    let mut args = base_args(config)?;
    args.extend(["--input-format", "JPEG", "--study-from"].iter().map(|s| s.to_string()));
    args.push(path_to_string(report, "structured report")?);
    args.push("--key".to_string());
    args.push(format!("InstanceNumber={instance_number}"));
    args.push("--key".to_string());
    args.push(format!("SOPInstanceUID={sop_instance_uid}"));
    args.push(path_to_string(image, "page image")?);
    args.push(path_to_string(dcm_out, "dicom output")?);
    Ok(invocation(Tool::Img2Dcm, config, args, false))
}

/// C-STORE of one object to the destination node.
pub fn storescu(config: &ToolConfig, host: &str, port: u16, dcm: &Path) -> Result<Invocation> {
    let mut args = base_args(config)?;
    args.push(host.to_string());
    args.push(port.to_string());
    args.push(path_to_string(dcm, "dicom object")?);
    Ok(invocation(Tool::Storescu, config, args, false))
}
