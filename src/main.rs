use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use fleetmedic::config::FleetConfig;
use fleetmedic::detect::Evaluator;
use fleetmedic::history::{parse_history_json, MemoryHistory};
use fleetmedic::simulator::{self, SampleGenerator};
use fleetmedic::telemetry::RawSample;

#[derive(Parser)]
#[command(
    name = "fleetmedic",
    about = "Vehicle telemetry health scoring and anomaly detection",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML). Defaults to $FLEETMEDIC_CONFIG, then
    /// /etc/fleetmedic/fleetmedic.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the ingestion API server
    Serve {
        /// Bind address
        #[arg(long)]
        bind: Option<String>,

        /// SQLite database path
        #[arg(long)]
        db: Option<String>,
    },

    /// Evaluate a single sample against an optional history
    Evaluate {
        /// Raw sample as JSON, e.g. '{"speed":130,"fuel_level":50,"temperature":70,"latitude":0,"longitude":0}'
        #[arg(long)]
        sample: String,

        /// JSON file holding prior samples as [speed, fuel_level, temperature] triples
        #[arg(long)]
        history: Option<PathBuf>,

        /// Fixed model seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Generate synthetic telemetry
    Simulate {
        /// Number of samples to generate
        #[arg(long, default_value = "20")]
        count: usize,

        /// RNG seed for the generator and the model
        #[arg(long)]
        seed: Option<u64>,

        /// Vehicle id stamped on every sample
        #[arg(long)]
        vehicle: Option<String>,

        /// POST samples to a running server instead of evaluating locally
        #[arg(long)]
        remote: bool,

        /// Ingestion URL for --remote (overrides config)
        #[arg(long)]
        url: Option<String>,

        /// Pause between remote sends in milliseconds (overrides config)
        #[arg(long)]
        interval_ms: Option<u64>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = FleetConfig::resolve(cli.config.as_deref())?;
    fleetmedic::init_logging(&cfg.logging);

    match cli.command {
        Commands::Serve { bind, db } => {
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            if let Some(db) = db {
                cfg.server.db_path = db;
            }
            tracing::info!(bind = %cfg.server.bind, "Starting fleetmedic server");
            fleetmedic::serve(&cfg).await?;
        }
        Commands::Evaluate {
            sample,
            history,
            seed,
            json,
        } => {
            if seed.is_some() {
                cfg.detector.seed = seed;
            }
            let raw: RawSample = serde_json::from_str(&sample).context("sample must be a JSON object")?;
            let history = match history {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read history file {}", path.display()))?;
                    parse_history_json(&content)?
                }
                None => Vec::new(),
            };

            let evaluator = Evaluator::from_config(&cfg);
            let verdict = evaluator.evaluate(&raw, &history)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&verdict)?);
            } else {
                println!("\n=== fleetmedic Verdict ===");
                println!("Severity:      {}", verdict.severity);
                println!("Health score:  {}", verdict.health_score);
                println!("Rule anomaly:  {}", verdict.rule_triggered);
                println!(
                    "Model anomaly: {}{}",
                    verdict.model_triggered,
                    if verdict.model_evaluated { "" } else { " (not evaluated)" }
                );
                if !verdict.reasons.is_empty() {
                    println!("Reasons:       {}", verdict.anomaly_reason());
                }
                println!("History size:  {}", history.len());
                println!("==========================\n");
            }
        }
        Commands::Simulate {
            count,
            seed,
            vehicle,
            remote,
            url,
            interval_ms,
            json,
        } => {
            if seed.is_some() {
                cfg.detector.seed = seed;
            }
            let mut generator = SampleGenerator::new(&cfg.simulator, seed);
            if let Some(vehicle) = vehicle {
                generator = generator.for_vehicle(vehicle);
            }

            if remote {
                let url = url.unwrap_or_else(|| cfg.simulator.target_url.clone());
                let interval = Duration::from_millis(interval_ms.unwrap_or(cfg.simulator.interval_ms));
                tracing::info!(%url, count, "Sending simulated telemetry");
                let accepted = simulator::run_remote(&url, &mut generator, count, interval).await?;
                println!("{accepted}/{count} samples accepted by {url}");
            } else {
                let evaluator = Evaluator::from_config(&cfg);
                let history = MemoryHistory::new();
                let results = simulator::run_local(&evaluator, &history, &mut generator, count).await?;

                if json {
                    println!("{}", serde_json::to_string_pretty(&results)?);
                } else {
                    println!(
                        "{:>4} | {:>6} | {:>5} | {:>6} | {:>5} | {:<8} | Reasons",
                        "#", "Speed", "Fuel", "Temp", "Score", "Severity"
                    );
                    println!("{:-<4}-|-{:-<6}-|-{:-<5}-|-{:-<6}-|-{:-<5}-|-{:-<8}-|-{:-<30}", "", "", "", "", "", "", "");
                    for (i, r) in results.iter().enumerate() {
                        println!(
                            "{:>4} | {:>6.1} | {:>5.1} | {:>6.1} | {:>5} | {:<8} | {}",
                            i,
                            r.sample.speed,
                            r.sample.fuel_level,
                            r.sample.temperature,
                            r.verdict.health_score,
                            r.verdict.severity,
                            r.verdict.anomaly_reason()
                        );
                    }
                }
            }
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}
