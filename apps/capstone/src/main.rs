//! # Capstone - Defense Evaluation Engine
//!
//! The operator binary for the Capstone engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                apps/capstone (THE BINARY)             │
//! │                                                       │
//! │  ┌─────────────┐   ┌──────────────┐   ┌───────────┐   │
//! │  │    CLI      │   │    Config    │   │  Console  │   │
//! │  │   (clap)    │   │ (toml + env) │   │  Mailer   │   │
//! │  └──────┬──────┘   └──────┬───────┘   └─────┬─────┘   │
//! │         └─────────────────┼─────────────────┘         │
//! │                           ▼                           │
//! │                   ┌───────────────┐                   │
//! │                   │ capstone-core │                   │
//! │                   │  (THE ENGINE) │                   │
//! │                   └───────────────┘                   │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! capstone init
//! capstone register event --title "Minor 2025" --tier minor --year 2025
//! capstone schedule -f plan.toml
//! capstone evaluate -f submission.json --code ABCD2345EFGH
//! capstone status --student 3
//! ```

use capstone::cli;
use capstone::config::LogFormat;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    let config = match cli::resolve_config(&cli, |key| std::env::var(key).ok()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    // log.format or CAPSTONE_LOG_FORMAT=json switches to machine-parseable output.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "capstone=info,capstone_core=info".into());

    match config.log.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli, &config) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Capstone startup banner.
fn print_banner() {
    println!(
        r#"
   ___                _
  / __|__ _ _ __  ___| |_ ___ _ _  ___
 | (__/ _` | '_ \(_-<  _/ _ \ ' \/ -_)
  \___\__,_| .__//__/\__\___/_||_\___|
           |_|

  Defense Evaluation Engine v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
