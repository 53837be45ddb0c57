use clap::{Parser, Subcommand};
use fallback_core::config::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
use commands::{handle_config_command, run_simulation, show_tiers, ConfigCommands, SimulateOptions};

#[derive(Parser)]
#[command(name = "fallback-cli")]
#[command(about = "Operator tooling for the tiered fallback quorum coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration Management
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Show tier escalation order, weights, stall timeouts and budgets
    Tiers {
        /// Path to config file
        #[arg(short, long, default_value = "config/config.toml")]
        file: String,
    },

    /// Run one query against scripted backends
    Simulate {
        /// Scenario file describing the request and each backend's behaviour
        scenario: String,

        /// Config file supplying quorum, retry and comparator settings
        #[arg(short, long, default_value = "config/config.toml")]
        config: String,

        /// Print the Prometheus metrics snapshot after the run
        #[arg(long)]
        metrics: bool,
    },
}

/// Installs the tracing subscriber. `RUST_LOG` overrides the configured level.
fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("warn,fallback_core={level},fallback_cli={level}"))
    });

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        // "pretty" and any other format default to pretty logging
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logging follows the config the command operates on; defaults when it is unreadable
    let logging_source = match &cli.command {
        Commands::Tiers { file } | Commands::Simulate { config: file, .. } => {
            AppConfig::from_file(file).unwrap_or_default()
        }
        Commands::Config(_) => AppConfig::default(),
    };
    init_logging(&logging_source);

    match cli.command {
        Commands::Config(config_command) => handle_config_command(config_command)?,
        Commands::Tiers { file } => show_tiers(&file)?,
        Commands::Simulate { scenario, config, metrics } => {
            run_simulation(SimulateOptions { scenario, config, metrics }).await?;
        }
    }

    Ok(())
}
