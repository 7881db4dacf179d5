use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod dump;
mod error;
mod extract;
mod installer;
mod pipeline;
mod staging;
mod template;
mod templates;
mod tools;
mod uid;
mod util;

use cli::{Command, CreateInstallerArgs, DumpConfigArgs, GenerateArgs, RootArgs, ValidateArgs};
use pipeline::Pipeline;
use tools::{ProcessRunner, ToolEnv};

fn main() -> ExitCode {
    let args = RootArgs::parse();
    if let Err(err) = init_logging(&args) {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    }

    let result = match args.command {
        Command::Generate(generate) => cmd_generate(generate),
        Command::Validate(validate) => cmd_validate(validate),
        Command::DumpConfig(dump) => cmd_dump_config(dump),
        Command::CreateInstaller(installer) => cmd_create_installer(installer),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "sr-report failed");
            if args.log_file.is_some() {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

/// `--log-level` wins over `RUST_LOG`; both fall back to `info`.
fn init_logging(args: &RootArgs) -> Result<()> {
    let filter = match args.log_level {
        Some(level) => EnvFilter::new(level.as_str()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &args.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|err| anyhow!("initialize logging: {err}"))
        }
        None => builder
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|err| anyhow!("initialize logging: {err}")),
    }
}

fn cmd_generate(args: GenerateArgs) -> Result<()> {
    let mut config = config::load_config(&args.config)?;
    if let Some(target) = args.target {
        config.target = target;
    }
    if let Some(output_dir) = args.output_dir {
        config.output_dir = Some(output_dir);
    }
    let runner = ProcessRunner::new(ToolEnv::new(config.tool_search_paths.clone()));
    let report = Pipeline::new(&config, &runner).run(&args.input)?;
    for artifact in &report.artifacts {
        println!("wrote {}", artifact.display());
    }
    if report.transmitted > 0 {
        println!("transmitted {} object(s)", report.transmitted);
    }
    Ok(())
}

fn cmd_validate(args: ValidateArgs) -> Result<()> {
    let config = config::load_config(&args.config)?;
    let errors = config::validate(&config);
    if errors.is_empty() {
        println!("{}: ok", args.config.display());
        return Ok(());
    }
    for error in &errors {
        println!("{error}");
    }
    Err(anyhow!(
        "{} has {} configuration problem(s)",
        args.config.display(),
        errors.len()
    ))
}

fn cmd_dump_config(args: DumpConfigArgs) -> Result<()> {
    let out_dir = match args.out_dir {
        Some(dir) => dir,
        None => dump::default_dump_dir()?,
    };
    for path in dump::dump_samples(&out_dir, args.force)? {
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn cmd_create_installer(args: CreateInstallerArgs) -> Result<()> {
    let exe = std::env::current_exe().context("locate running executable")?;
    let archive = installer::create_installer(&exe, &args.out_dir)?;
    println!("wrote {}", archive.display());
    Ok(())
}
