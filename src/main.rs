use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use class_stubber::cli::{Cli, OutputFormat, rewrite_legacy_args};
use class_stubber::config::ConversionConfig;
use class_stubber::convert::Converter;
use class_stubber::report::{RunSummary, write_manifest};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = parse_cli();
    init_tracing(cli.verbose);

    let cfg = match ConversionConfig::from_cli(&cli) {
        Ok(cfg) => cfg,
        Err(e) => return usage_error(&e.to_string()),
    };

    match run(&cli, cfg) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => usage_error(&format!("{e:#}")),
    }
}

fn parse_cli() -> Cli {
    let args: Vec<String> = std::env::args().collect();
    Cli::parse_from(rewrite_legacy_args(args))
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn usage_error(message: &str) -> ExitCode {
    error!("{message}");
    eprintln!("{}", Cli::command().render_usage());
    ExitCode::FAILURE
}

fn run(cli: &Cli, cfg: ConversionConfig) -> Result<()> {
    let start = Instant::now();
    let mut converter = Converter::new(cfg);
    let report = converter.run()?;
    let duration_ms = start.elapsed().as_millis() as u64;

    let cfg = converter.config();
    if let Some(path) = cli.manifest.as_deref() {
        write_manifest(path, &cfg.output_path, &report.outputs)
            .with_context(|| format!("Failed to write manifest {}", path.display()))?;
    }

    let summary = RunSummary {
        input: cfg.input_path.to_string_lossy().to_string(),
        output: cfg.output_path.to_string_lossy().to_string(),
        preserve_references: cfg.preserve_references,
        duration_ms,
        stats: report.stats,
        warnings: report.warnings,
    };
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => println!("{}", summary.to_text()),
    }
    if cfg.verbose {
        info!("{duration_ms}ms spent");
    }
    Ok(())
}
