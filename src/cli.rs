//! CLI argument parsing for the report generator.
//!
//! The CLI only wires arguments into the pipeline; every behavior it exposes
//! is also reachable through the configuration file.
use crate::config::Target;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "sr-report",
    version,
    about = "Rule-driven reports from DICOM structured reports",
    after_help = "Commands:\n  generate <SR> --config <path>      Run the pipeline up to the configured target\n  validate --config <path>           Report every configuration problem\n  dump-config [--out-dir <dir>]      Write a sample configuration and template\n  create-installer [--out-dir <dir>] Bundle the executable with sample files\n\nExamples:\n  sr-report generate study.dcm --config report_config.json\n  sr-report generate study.dcm --config report_config.json --target pdf\n  sr-report validate --config report_config.json",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Log verbosity; overrides RUST_LOG
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Generate(GenerateArgs),
    Validate(ValidateArgs),
    DumpConfig(DumpConfigArgs),
    CreateInstaller(CreateInstallerArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Generate command inputs for one structured report.
#[derive(Parser, Debug)]
#[command(about = "Convert a structured report up to the configured target")]
pub struct GenerateArgs {
    /// DICOM structured report to convert
    #[arg(value_name = "SR_FILE")]
    pub input: PathBuf,

    /// Configuration file (JSON)
    #[arg(long, value_name = "PATH")]
    pub config: PathBuf,

    /// Override the configured target (xml, template, pdf, dcm_pdf, dcm_images)
    #[arg(long, value_name = "TARGET")]
    pub target: Option<Target>,

    /// Override the configured output directory
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Validate a configuration file and list every problem")]
pub struct ValidateArgs {
    /// Configuration file (JSON)
    #[arg(long, value_name = "PATH")]
    pub config: PathBuf,
}

#[derive(Parser, Debug)]
#[command(about = "Write a sample configuration and flat template")]
pub struct DumpConfigArgs {
    /// Destination directory (defaults to the user configuration directory)
    #[arg(long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,

    /// Overwrite existing files
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Bundle the executable, sample files and a README into a tar.gz")]
pub struct CreateInstallerArgs {
    /// Directory receiving the archive
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub out_dir: PathBuf,
}
