//! LifeSync CLI
//!
//! Runs the analysis core over an exported record file:
//! - Analyze a CSV/JSON batch and print the digest or the full report
//! - Generate a default config file

use anyhow::Context;
use clap::{Parser, Subcommand};
use lifesync::config::{generate_default_config, Config, LoggingConfig};
use lifesync::insights::DigestWindow;
use lifesync::pipeline::{AnalysisRequest, InsightPipeline};
use lifesync::records::{import_path, Granularity};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lifesync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cross-domain insights from calendar, communication, health and finance data")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: standard locations, then built-in defaults)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze a batch of records
    Analyze {
        /// CSV or JSON file with domain, metric, timestamp and value
        #[arg(short, long)]
        input: PathBuf,
        /// Sampling granularity (hour, day, week, month)
        #[arg(short, long, default_value = "day")]
        granularity: Granularity,
        /// Digest window (daily, weekly, monthly, last:<n>d, YYYY-MM-DD..YYYY-MM-DD)
        #[arg(short, long, default_value = "weekly")]
        window: DigestWindow,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("lifesync={}", logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::load_default().context("Failed to load configuration")?,
    };
    init_logging(&config.logging);

    match cli.command {
        Commands::Analyze {
            input,
            granularity,
            window,
            json,
        } => {
            tracing::info!("LifeSync analysis v{}", env!("CARGO_PKG_VERSION"));

            let import = import_path(&input)
                .with_context(|| format!("Failed to import records from {:?}", input))?;
            if import.rows_failed > 0 {
                tracing::warn!(
                    failed = import.rows_failed,
                    processed = import.rows_processed,
                    "Some rows could not be imported"
                );
                for error in import.errors.iter().take(10) {
                    tracing::warn!("{}", error);
                }
            }

            let pipeline = InsightPipeline::new(config.analysis)
                .context("Invalid analysis configuration")?;
            let request = AnalysisRequest::new(import.records, granularity).window(window);
            let report = pipeline.run(&request);

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.digest);
                if !report.omissions.is_empty() {
                    println!("\n{} computation(s) skipped:", report.omissions.len());
                    for omission in &report.omissions {
                        println!(
                            "  {:?} {}: {}",
                            omission.stage, omission.subject, omission.reason
                        );
                    }
                }
            }
        }

        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("Failed to write config to {:?}", path))?;
                    println!("Config written to {:?}", path);
                }
                None => print!("{}", content),
            }
        }
    }

    Ok(())
}
