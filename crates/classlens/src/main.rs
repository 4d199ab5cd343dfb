//! classlens - assessment pipeline CLI
//!
//! Usage:
//!   classlens phase0              Normalize raw response sheets
//!   classlens phase1              Extract questions/solutions, merge, score
//!   classlens phase2              Per-student LLM diagnosis
//!   classlens phase3              Class-level insight synthesis
//!   classlens run                 Run all phases in order

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use classlens_core::{
    Config, GeminiClient, Phase0Runner, Phase1Runner, Phase2Runner, Phase3Runner, ResponseType,
    RunReport,
};
use std::path::PathBuf;
use tracing::error;

#[derive(Parser)]
#[command(name = "classlens", version, about = "Academic assessment pipeline")]
struct Cli {
    /// Base directory holding client_uploads/, input/ and output/
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Process only this class (overrides TARGET_CLASS)
    #[arg(long, global = true)]
    class: Option<String>,

    /// Which response sheets Phase 0 processes: online, offline or both
    #[arg(long, global = true)]
    response_type: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Normalize raw response sheets into per-class artifacts
    Phase0,
    /// Extract question paper and solutions, merge, and score responses
    Phase1,
    /// Run per-student LLM diagnosis and build insight CSVs
    Phase2,
    /// Synthesize class-level focus zones and action plans
    Phase3,
    /// Run phases 0 through 3 in order
    Run,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("classlens=info".parse()?)
                .add_directive("classlens_core=info".parse()?),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;

    match cli.command {
        Command::Phase0 => {
            let report = Phase0Runner::new(&config).run();
            print_report(&report);
            if report.succeeded() == 0 && !report.outcomes.is_empty() {
                bail!("phase 0 failed for every class");
            }
        }
        Command::Phase1 => run_phase1(&config)?,
        Command::Phase2 => run_phase2(&config)?,
        Command::Phase3 => {
            let client = GeminiClient::from_config(&config)?;
            Phase3Runner::new(&config, &client).run()?;
        }
        Command::Run => {
            let report = Phase0Runner::new(&config).run();
            print_report(&report);
            if report.succeeded() == 0 {
                bail!("phase 0 produced no usable classes, stopping");
            }
            run_phase1(&config)?;
            run_phase2(&config)?;
            let client = GeminiClient::from_config(&config)?;
            Phase3Runner::new(&config, &client).run()?;
        }
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_env(&cli.root).context("Failed to load configuration")?;
    if let Some(class) = &cli.class {
        config.target_class = Some(class.clone());
    }
    if let Some(rt) = &cli.response_type {
        config.response_type = ResponseType::parse(rt)?;
    }
    Ok(config)
}

/// Classes that Phase 0 has already published an input area for.
fn published_classes(config: &Config) -> Result<Vec<String>> {
    if let Some(target) = &config.target_class {
        return Ok(vec![target.clone()]);
    }
    let input_root = config.base_dir.join("input");
    let mut classes = Vec::new();
    if input_root.exists() {
        for entry in std::fs::read_dir(&input_root)? {
            let path = entry?.path();
            if path.is_dir() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    classes.push(name.to_string());
                }
            }
        }
    }
    classes.sort();
    if classes.is_empty() {
        bail!("no classes found under {}", input_root.display());
    }
    Ok(classes)
}

fn run_phase1(config: &Config) -> Result<()> {
    let client = GeminiClient::from_config(config)?;
    let runner = Phase1Runner::new(config, &client);
    for class_id in published_classes(config)? {
        if let Err(e) = runner.run(&class_id) {
            error!("phase 1 failed for {class_id}: {e}");
        }
    }
    Ok(())
}

fn run_phase2(config: &Config) -> Result<()> {
    let client = GeminiClient::from_config(config)?;
    let runner = Phase2Runner::new(config, &client);
    for class_id in published_classes(config)? {
        if let Err(e) = runner.run(&class_id) {
            error!("phase 2 failed for {class_id}: {e}");
        }
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!();
    println!("{}", "Phase 0 summary".bold());
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(()) => println!("  {} {}", "ok".green().bold(), outcome.class_id),
            Err(e) => println!("  {} {} ({e})", "failed".red().bold(), outcome.class_id),
        }
    }
    println!(
        "  {} succeeded, {} failed",
        report.succeeded().to_string().green(),
        report.failed().to_string().red()
    );
}
