//! Placeholder substitution into report templates.
//!
//! Two strategies, chosen by template extension: word-processing documents are
//! rewritten paragraph by paragraph, everything else is treated as flat text.
//! Output bytes are fully built in memory before anything is written.
use crate::config::TemplateEncoding;
use crate::extract::TemplateData;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

mod docx;
mod flat;

const STRUCTURED_EXTENSIONS: &[&str] = &["docx", "docm", "dotx"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    /// Office Open XML document; rendered through the office converter.
    Structured,
    /// Markup or plain text; rendered through the flat-markup engine.
    Flat,
}

impl TemplateKind {
    pub fn from_path(path: &Path) -> Self {
        let is_structured = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                STRUCTURED_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false);
        if is_structured {
            TemplateKind::Structured
        } else {
            TemplateKind::Flat
        }
    }
}

/// Fill `template_path` with `data` and write the result to `output_path`.
pub fn fill(
    template_path: &Path,
    data: &TemplateData,
    output_path: &Path,
    encoding: TemplateEncoding,
) -> Result<()> {
    let kind = TemplateKind::from_path(template_path);
    let bytes = match kind {
        TemplateKind::Structured => docx::fill_docx(template_path, data)?,
        TemplateKind::Flat => {
            let text = fs::read_to_string(template_path)
                .with_context(|| format!("read template {}", template_path.display()))?;
            flat::fill_text(&text, data, encoding).into_bytes()
        }
    };
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(output_path, bytes).with_context(|| format!("write {}", output_path.display()))?;
    tracing::info!(
        template = %template_path.display(),
        output = %output_path.display(),
        kind = ?kind,
        placeholders = data.len(),
        "template filled"
    );
    Ok(())
}
