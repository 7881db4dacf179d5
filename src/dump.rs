use crate::templates;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// `<user config dir>/sr-report`
pub fn default_dump_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("sr-report"))
        .ok_or_else(|| anyhow!("no user configuration directory; pass --out-dir"))
}

/// Write the sample files into `out_dir` and return their paths.
///
/// Existing files are left alone unless `force` is set; the check happens
/// before anything is written.
pub fn dump_samples(out_dir: &Path, force: bool) -> Result<Vec<PathBuf>> {
    let files = [
        (
            out_dir.join(templates::REPORT_CONFIG_FILE),
            templates::REPORT_CONFIG_JSON,
        ),
        (
            out_dir.join(templates::REPORT_TEMPLATE_FILE),
            templates::REPORT_TEMPLATE_HTML,
        ),
    ];
    if !force {
        if let Some((existing, _)) = files.iter().find(|(path, _)| path.exists()) {
            return Err(anyhow!(
                "{} already exists (use --force to overwrite)",
                existing.display()
            ));
        }
    }
    fs::create_dir_all(out_dir).with_context(|| format!("create {}", out_dir.display()))?;
    let mut written = Vec::with_capacity(files.len());
    for (path, contents) in files {
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        tracing::info!(path = %path.display(), "sample written");
        written.push(path);
    }
    Ok(written)
}
