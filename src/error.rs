use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    /// One or more configuration problems, reported together.
    #[error("invalid configuration:\n  {}", .0.join("\n  "))]
    ConfigValidation(Vec<String>),

    /// A collaborator process exited unsuccessfully.
    #[error("{tool} failed with {status}: {output}")]
    ExternalTool {
        tool: String,
        status: String,
        output: String,
    },

    /// A rule expression evaluated to something other than text.
    #[error("rule {rule:?} expression {index} ({expression}) yielded {found}, expected text")]
    ExtractionType {
        rule: String,
        index: usize,
        expression: String,
        found: String,
    },
}
