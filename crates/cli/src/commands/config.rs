use clap::Subcommand;
use fallback_core::config::AppConfig;
use std::path::Path;

use super::utils::{print_error, print_info, print_success, CliError, CliResult};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to config file
        #[arg(short, long, default_value = "config/config.toml")]
        file: String,
    },

    /// Show the effective configuration (file plus environment overrides)
    Show {
        /// Path to config file
        #[arg(short, long, default_value = "config/config.toml")]
        file: String,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output path for the config file
        #[arg(short, long, default_value = "config/config.toml")]
        output: String,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn handle_config_command(command: ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Validate { file } => validate_config(&file),
        ConfigCommands::Show { file } => show_config(&file),
        ConfigCommands::Generate { output, force } => generate_config(&output, force),
    }
}

pub fn load_config(file: &str) -> CliResult<AppConfig> {
    AppConfig::from_file(file).map_err(|e| CliError::Config(e.to_string()))
}

fn validate_config(file: &str) -> CliResult<()> {
    if !Path::new(file).exists() {
        print_error(&format!("Configuration file not found: {file}"));
        return Err(CliError::Config(format!("File not found: {file}")));
    }

    print_info(&format!("Loading configuration from {file}..."));
    let config = load_config(file)?;

    print_info("Validating configuration...");
    config.validate().map_err(CliError::Config)?;

    print_success("Configuration is valid!");

    println!("Configuration Summary:");
    println!("  Backends: {}", config.backends.len());
    println!("  Quorum: {} (events: {})", config.quorum.quorum, config.quorum.event_quorum);
    println!("  Cache TTL: {}ms", config.quorum.cache_timeout_ms);
    println!(
        "  Comparator: {}",
        if config.comparator.ignore_fields.is_empty() { "structural" } else { "field mask" }
    );
    println!("  Health tracking: {}", if config.health.enabled { "enabled" } else { "disabled" });

    Ok(())
}

fn show_config(file: &str) -> CliResult<()> {
    let config = load_config(file)?;

    println!("Configuration from {file}:");

    println!("\n[Backends] ({} configured)", config.backends.len());
    for backend in &config.backends {
        println!(
            "  {}: priority {} weight {} stall {}ms",
            backend.id, backend.priority, backend.weight, backend.stall_timeout_ms
        );
    }

    println!("\n[Quorum]");
    println!("  Quorum: {}", config.quorum.quorum);
    println!("  Event Quorum: {}", config.quorum.event_quorum);
    println!("  Event Methods: {}", config.quorum.event_methods.join(", "));
    println!("  Cache Timeout: {}ms", config.quorum.cache_timeout_ms);
    println!("  Polling Interval: {}ms", config.quorum.polling_interval_ms);
    println!("  Max Fan-out per Tier: {}", config.quorum.max_fanout_per_tier);

    println!("\n[Retry]");
    println!("  Max Attempts per Backend: {}", config.retry.max_attempts_per_backend);
    println!("  Backoff: {}ms .. {}ms", config.retry.base_delay_ms, config.retry.max_delay_ms);
    println!("  Jitter Factor: {}", config.retry.jitter_factor);

    println!("\n[Comparator]");
    if config.comparator.ignore_fields.is_empty() {
        println!("  Structural equality");
    } else {
        let mut methods: Vec<_> = config.comparator.ignore_fields.iter().collect();
        methods.sort_by_key(|(method, _)| method.as_str());
        for (method, fields) in methods {
            println!("  {method}: ignore {}", fields.join(", "));
        }
    }

    println!("\n[Health]");
    println!("  Enabled: {}", config.health.enabled);
    println!("  Failure Threshold: {}", config.health.failure_threshold);
    println!("  Cool-down: {}ms", config.health.cooldown_ms);

    println!("\n[Cache]");
    println!("  Sweep Interval: {}ms", config.cache.sweep_interval_ms);

    println!("\n[Logging]");
    println!("  Level: {}", config.logging.level);
    println!("  Format: {}", config.logging.format);

    Ok(())
}

pub fn render_sample_config() -> CliResult<String> {
    let body = toml::to_string_pretty(&AppConfig::sample())
        .map_err(|e| CliError::Config(e.to_string()))?;
    Ok(format!(
        "# Fallback quorum coordinator configuration\n\
         # Backends sharing a priority form one tier; lower priorities are tried first.\n\n{body}"
    ))
}

fn generate_config(output: &str, force: bool) -> CliResult<()> {
    if Path::new(output).exists() && !force {
        return Err(CliError::Config(format!(
            "File {output} already exists. Use --force to overwrite."
        )));
    }

    if let Some(parent) = Path::new(output).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, render_sample_config()?)?;

    print_success(&format!("Sample configuration generated: {output}"));
    print_info("Replace the sample backend ids with your own and run `config validate`");

    Ok(())
}
