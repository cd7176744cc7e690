//! Negotiation analysis demo CLI.
//!
//! ```bash
//! negotiation-cli analyze "Estamos buscando uma parceria que traga benefícios mútuos."
//! negotiation-cli detect "Esta é nossa oferta final."
//! negotiation-cli demo
//! ```
//!
//! `RUST_LOG` controls verbosity; `NEGOTIATION_LOG_JSON=1` switches to JSON log lines.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use negotiation_core::{EngineConfig, NegotiationBridge};
use serde::Serialize;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEMO_TEXT: &str = "Esta é nossa oferta final. O prazo para aceitação é amanhã ao \
    meio-dia. Não podemos melhorar os termos, pois precisamos de autorização do comitê \
    para qualquer alteração adicional.";

#[derive(Parser)]
#[command(name = "negotiation-cli")]
#[command(about = "Negotiation text analysis: tone, style and tactical patterns")]
#[command(version)]
struct Cli {
    /// Never load the native module
    #[arg(long)]
    fallback_only: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tone and style metrics of a text
    Analyze { text: String },
    /// Tactical patterns found in a text
    Detect {
        text: String,
        /// Also print counter-tactics for every detected pattern
        #[arg(long)]
        responses: bool,
    },
    /// Times an exercise for the given number of milliseconds and prints its summary
    Time {
        exercise_id: String,
        #[arg(long, default_value_t = 250)]
        millis: u64,
        /// Performance history file to load before and save after the run
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// Runs every operation on a sample text
    Demo,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("NEGOTIATION_LOG_JSON")
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = if cli.fallback_only {
        EngineConfig::fallback_only()
    } else {
        EngineConfig::from_env().context("invalid NEGOTIATION_* configuration")?
    };
    let bridge = NegotiationBridge::new(config).context("failed to build the bridge")?;
    info!("Backend: {:?}", bridge.status());

    match cli.command {
        Commands::Analyze { text } => print_json(&bridge.analyze(&text))?,
        Commands::Detect { text, responses } => {
            let detection = bridge.detect(&text);
            print_json(&detection)?;
            if responses {
                for pattern in &detection.detected_patterns {
                    println!("\n{} ({})", pattern.pattern_id, pattern.description);
                    for response in bridge.suggest_responses(&pattern.pattern_id).responses {
                        println!("  - {}", response);
                    }
                }
            }
        }
        Commands::Time {
            exercise_id,
            millis,
            history,
        } => {
            if let Some(path) = history.as_deref().filter(|p| p.exists()) {
                bridge.load_history(path)?;
            }
            let started = bridge.start_timer(&exercise_id);
            if let Some(err) = started.error() {
                bail!("{}", err.message);
            }
            thread::sleep(Duration::from_millis(millis));
            print_json(&bridge.stop_timer())?;
            print_json(&bridge.performance_stats(Some(&exercise_id)))?;
            if let Some(path) = history.as_deref() {
                bridge.save_history(path)?;
            }
        }
        Commands::Demo => {
            println!("Text: {}\n", DEMO_TEXT);
            print_json(&bridge.analyze(DEMO_TEXT))?;
            print_json(&bridge.detect(DEMO_TEXT))?;

            bridge.start_timer("demo");
            thread::sleep(Duration::from_millis(100));
            print_json(&bridge.stop_timer())?;
            print_json(&bridge.performance_stats(None))?;
        }
    }

    print_json(&bridge.diagnostics())?;
    Ok(())
}
