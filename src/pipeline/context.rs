use crate::config::Configuration;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

enum WorkDir {
    /// Configured `temp_dir`; left in place after the run.
    Kept(PathBuf),
    /// Private directory removed when the context is dropped.
    Temporary(TempDir),
}

impl WorkDir {
    fn path(&self) -> &Path {
        match self {
            WorkDir::Kept(path) => path,
            WorkDir::Temporary(dir) => dir.path(),
        }
    }
}

pub struct RunContext {
    input: PathBuf,
    base_name: String,
    output_name: String,
    output_dir: PathBuf,
    work: WorkDir,
}

impl RunContext {
    pub fn new(input: &Path, config: &Configuration) -> Result<Self> {
        if !input.is_file() {
            return Err(anyhow!("input report {} is not a file", input.display()));
        }
        let base_name = input
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| anyhow!("cannot derive a base name from {}", input.display()))?
            .to_string();
        let output_name = config
            .output_file_name
            .clone()
            .unwrap_or_else(|| base_name.clone());
        let output_dir = match &config.output_dir {
            Some(dir) => dir.clone(),
            None => input
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };
        let work = match &config.temp_dir {
            Some(dir) => {
                fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
                WorkDir::Kept(dir.clone())
            }
            None => WorkDir::Temporary(
                tempfile::Builder::new()
                    .prefix("sr-report-")
                    .tempdir()
                    .context("create working directory")?,
            ),
        };
        Ok(Self {
            input: input.to_path_buf(),
            base_name,
            output_name,
            output_dir,
            work,
        })
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn work_dir(&self) -> &Path {
        self.work.path()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `<work>/<base>.xml`
    pub fn markup_path(&self) -> PathBuf {
        self.work_dir().join(format!("{}.xml", self.base_name))
    }

    /// `<work>/<base>.filled.<ext>`
    pub fn filled_path(&self, extension: &str) -> PathBuf {
        self.work_dir()
            .join(format!("{}.filled.{extension}", self.base_name))
    }

    /// PDF rendered from the filled template; the office converter names it
    /// after the filled document's stem, so both renderers share this path.
    pub fn printable_path(&self) -> PathBuf {
        self.work_dir()
            .join(format!("{}.filled.pdf", self.base_name))
    }

    pub fn template_data_path(&self) -> PathBuf {
        self.work_dir()
            .join(format!("{}.template_data.json", self.base_name))
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.work_dir().join("pages")
    }

    /// `<work>/<base>.dcm`
    pub fn document_object_path(&self) -> PathBuf {
        self.work_dir().join(format!("{}.dcm", self.base_name))
    }

    /// `<work>/objects/<base>_<NNN>.dcm`
    pub fn page_object_path(&self, instance_number: usize) -> PathBuf {
        self.work_dir()
            .join("objects")
            .join(format!("{}_{instance_number:03}.dcm", self.base_name))
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.work_dir().join("backup")
    }

    /// `<output_dir>/<name>.<ext>`
    pub fn output_path(&self, extension: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.{extension}", self.output_name))
    }

    /// Fail when `dest` resolves to the input report, which publishing would
    /// otherwise replace.
    pub fn ensure_not_input(&self, dest: &Path) -> Result<()> {
        let input = fs::canonicalize(&self.input)
            .with_context(|| format!("resolve {}", self.input.display()))?;
        let (Some(parent), Some(name)) = (dest.parent(), dest.file_name()) else {
            return Ok(());
        };
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        let Ok(parent) = fs::canonicalize(parent) else {
            return Ok(());
        };
        if parent.join(name) == input {
            return Err(anyhow!(
                "output {} would overwrite the input report; set output_dir or output_file_name",
                dest.display()
            ));
        }
        Ok(())
    }

    /// `<output_dir>/<name>_<NNN>.dcm`
    pub fn page_output_path(&self, instance_number: usize) -> PathBuf {
        self.output_dir
            .join(format!("{}_{instance_number:03}.dcm", self.output_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(extra: serde_json::Value) -> Configuration {
        let mut value = json!({
            "template_path": "t.html",
            "rules": [{"name": "$a$", "concat_string": ",", "expressions": ["string(/a)"]}]
        });
        if let (Some(target), Some(source)) = (value.as_object_mut(), extra.as_object()) {
            for (key, val) in source {
                target.insert(key.clone(), val.clone());
            }
        }
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn names_default_to_input_stem_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("study.sr.dcm");
        fs::write(&input, b"DICM").unwrap();
        let ctx = RunContext::new(&input, &config(json!({}))).unwrap();
        assert_eq!(ctx.output_path("pdf"), dir.path().join("study.sr.pdf"));
        assert_eq!(ctx.page_output_path(7), dir.path().join("study.sr_007.dcm"));
        assert!(ctx.work_dir().is_dir());
    }

    #[test]
    fn configured_names_and_temp_dir_are_used() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("sr.dcm");
        fs::write(&input, b"DICM").unwrap();
        let work = dir.path().join("work");
        let out = dir.path().join("out");
        let ctx = RunContext::new(
            &input,
            &config(json!({
                "output_file_name": "report",
                "output_dir": out,
                "temp_dir": work
            })),
        )
        .unwrap();
        assert_eq!(ctx.output_path("xml"), out.join("report.xml"));
        assert_eq!(ctx.markup_path(), work.join("sr.xml"));
        assert_eq!(ctx.page_object_path(1), work.join("objects").join("sr_001.dcm"));
        drop(ctx);
        assert!(work.is_dir());
    }

    #[test]
    fn temporary_work_dir_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("sr.dcm");
        fs::write(&input, b"DICM").unwrap();
        let ctx = RunContext::new(&input, &config(json!({}))).unwrap();
        let work = ctx.work_dir().to_path_buf();
        drop(ctx);
        assert!(!work.exists());
    }

    #[test]
    fn destination_equal_to_input_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("study.dcm");
        fs::write(&input, b"DICM").unwrap();
        let ctx = RunContext::new(&input, &config(json!({}))).unwrap();
        assert!(ctx.ensure_not_input(&ctx.output_path("dcm")).is_err());
        assert!(ctx
            .ensure_not_input(&dir.path().join(".").join("study.dcm"))
            .is_err());
        assert!(ctx.ensure_not_input(&ctx.output_path("pdf")).is_ok());
        assert!(ctx.ensure_not_input(&dir.path().join("absent").join("study.dcm")).is_ok());
    }

    #[test]
    fn missing_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RunContext::new(&dir.path().join("absent.dcm"), &config(json!({}))).is_err());
    }
}
