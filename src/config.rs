//! Typed pipeline configuration: rules, target, naming and tool options.
//!
//! The JSON document is parsed into these structs once per run and never
//! mutated afterwards. Required fields default to empty values so that
//! `validate` can report every problem in one pass instead of stopping at the
//! first serde error.
use crate::error::ReportError;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Identifier root used when the configuration does not name one.
pub const DEFAULT_OID_ROOT: &str = "1.2.826.0.1.3680043.8.498.";
pub const DEFAULT_DCM_SEND_PORT: u16 = 104;
pub const DEFAULT_PDF_DPI: u32 = 150;

/// Stage after which a run finalizes.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Xml,
    Template,
    Pdf,
    DcmPdf,
    #[default]
    DcmImages,
}

impl Target {
    pub fn as_str(self) -> &'static str {
        match self {
            Target::Xml => "xml",
            Target::Template => "template",
            Target::Pdf => "pdf",
            Target::DcmPdf => "dcm_pdf",
            Target::DcmImages => "dcm_images",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "xml" => Ok(Target::Xml),
            "template" => Ok(Target::Template),
            "pdf" => Ok(Target::Pdf),
            "dcm_pdf" => Ok(Target::DcmPdf),
            "dcm_images" => Ok(Target::DcmImages),
            other => Err(format!(
                "unknown target {other:?} (expected xml, template, pdf, dcm_pdf or dcm_images)"
            )),
        }
    }
}

/// Output encoding for flat (non-docx) templates.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemplateEncoding {
    #[default]
    Utf8,
    Ascii,
}

/// One named extraction unit.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Rule {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub concat_string: String,
    #[serde(default)]
    pub expressions: Vec<String>,
    #[serde(default)]
    pub replacements: IndexMap<String, String>,
    #[serde(flatten)]
    pub(crate) unknown: BTreeMap<String, serde_json::Value>,
}

/// Program and pass-through options for one external collaborator.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ToolConfig {
    pub program: String,
    /// Extra flags, split with shell quoting rules.
    #[serde(default)]
    pub options: String,
}

impl ToolConfig {
    fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            options: String::new(),
        }
    }

    pub fn option_args(&self) -> Result<Vec<String>> {
        shell_words::split(&self.options)
            .with_context(|| format!("parse options for {}: {}", self.program, self.options))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub dsr2xml: ToolConfig,
    pub soffice: ToolConfig,
    pub wkhtmltopdf: ToolConfig,
    pub pdftoppm: ToolConfig,
    pub pdf2dcm: ToolConfig,
    pub img2dcm: ToolConfig,
    pub storescu: ToolConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            dsr2xml: ToolConfig::new("dsr2xml"),
            soffice: ToolConfig::new("soffice"),
            wkhtmltopdf: ToolConfig::new("wkhtmltopdf"),
            pdftoppm: ToolConfig::new("pdftoppm"),
            pdf2dcm: ToolConfig::new("pdf2dcm"),
            img2dcm: ToolConfig::new("img2dcm"),
            storescu: ToolConfig::new("storescu"),
        }
    }
}

impl ToolsConfig {
    fn entries(&self) -> [(&'static str, &ToolConfig); 7] {
        [
            ("dsr2xml", &self.dsr2xml),
            ("soffice", &self.soffice),
            ("wkhtmltopdf", &self.wkhtmltopdf),
            ("pdftoppm", &self.pdftoppm),
            ("pdf2dcm", &self.pdf2dcm),
            ("img2dcm", &self.img2dcm),
            ("storescu", &self.storescu),
        ]
    }
}

/// Full descriptor of one pipeline run.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Configuration {
    #[serde(default)]
    pub template_path: PathBuf,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub target: Target,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dcm_send_ip: Option<String>,
    #[serde(default = "default_dcm_send_port")]
    pub dcm_send_port: u16,
    #[serde(default)]
    pub dcm_send_dcm_sr: bool,
    #[serde(default)]
    pub template_encoding: TemplateEncoding,
    #[serde(default = "default_pdf_dpi")]
    pub pdf_dpi: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_search_paths: Vec<PathBuf>,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(flatten)]
    pub(crate) unknown: BTreeMap<String, serde_json::Value>,
}

fn default_dcm_send_port() -> u16 {
    DEFAULT_DCM_SEND_PORT
}

fn default_pdf_dpi() -> u32 {
    DEFAULT_PDF_DPI
}

impl Configuration {
    pub fn oid_root(&self) -> &str {
        self.oid_root.as_deref().unwrap_or(DEFAULT_OID_ROOT)
    }

    /// Names of top-level and per-rule fields that were present but not understood.
    pub fn ignored_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self.unknown.keys().cloned().collect();
        for (idx, rule) in self.rules.iter().enumerate() {
            fields.extend(
                rule.unknown
                    .keys()
                    .map(|key| format!("rules[{idx}].{key}")),
            );
        }
        fields
    }
}

/// Parse a configuration file. Relative template paths resolve against the
/// directory containing the file. The result is not validated.
pub fn load_config(path: &Path) -> Result<Configuration> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let mut config: Configuration = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    if config.template_path.is_relative() && !config.template_path.as_os_str().is_empty() {
        if let Some(base) = path.parent() {
            config.template_path = base.join(&config.template_path);
        }
    }
    for field in config.ignored_fields() {
        tracing::warn!(field = %field, config = %path.display(), "ignoring unknown config field");
    }
    Ok(config)
}

/// Check the whole configuration and return every problem found.
///
/// Top-level fields come first, then one message per offending rule, prefixed
/// with the rule's 1-based position.
pub fn validate(config: &Configuration) -> Vec<String> {
    let mut errors = Vec::new();
    if config.template_path.as_os_str().is_empty() {
        errors.push("template_path is required".to_string());
    }
    if config.rules.is_empty() {
        errors.push("rules must contain at least one rule".to_string());
    }
    if config.pdf_dpi == 0 {
        errors.push("pdf_dpi must be greater than zero".to_string());
    }
    if let Some(ip) = config.dcm_send_ip.as_deref() {
        if ip.trim().is_empty() {
            errors.push("dcm_send_ip must not be blank when set".to_string());
        }
        if config.dcm_send_port == 0 {
            errors.push("dcm_send_port must be non-zero".to_string());
        }
    }
    if let Some(name) = config.output_file_name.as_deref() {
        if name.trim().is_empty() || name.contains(['/', '\\']) {
            errors.push(format!(
                "output_file_name must be a plain file name (got {name:?})"
            ));
        }
    }
    for (tool, tool_config) in config.tools.entries() {
        if tool_config.program.trim().is_empty() {
            errors.push(format!("tools.{tool}.program must not be empty"));
        }
        if let Err(err) = shell_words::split(&tool_config.options) {
            errors.push(format!("tools.{tool}.options: {err}"));
        }
    }

    let mut first_seen: HashMap<&str, usize> = HashMap::new();
    for (idx, rule) in config.rules.iter().enumerate() {
        let position = idx + 1;
        let mut problems = validate_rule(rule);
        if !rule.name.is_empty() {
            if let Some(first) = first_seen.get(rule.name.as_str()) {
                problems.push(format!(
                    "duplicate name {:?} (already defined by rule {first})",
                    rule.name
                ));
            } else {
                first_seen.insert(rule.name.as_str(), position);
            }
        }
        if !problems.is_empty() {
            errors.push(format!("rule {position}: {}", problems.join("; ")));
        }
    }
    errors
}

fn validate_rule(rule: &Rule) -> Vec<String> {
    let mut problems = Vec::new();
    if rule.name.is_empty() {
        problems.push("name is required".to_string());
    }
    if rule.concat_string.is_empty() {
        problems.push("concat_string is required".to_string());
    }
    if rule.expressions.is_empty() {
        problems.push("expressions must contain at least one expression".to_string());
    }
    for (idx, expression) in rule.expressions.iter().enumerate() {
        if expression.trim().is_empty() {
            problems.push(format!("expressions[{}] is empty", idx + 1));
        }
    }
    problems
}

/// Fail with an aggregated `ConfigValidation` error when `validate` finds problems.
pub fn ensure_valid(config: &Configuration) -> Result<()> {
    let errors = validate(config);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ReportError::ConfigValidation(errors).into())
    }
}
