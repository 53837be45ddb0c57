use fallback_core::{backend::Registry, config::AppConfig};
use std::fmt::Write as _;

use super::{
    config::load_config,
    utils::{CliError, CliResult},
};

/// Prints the tier escalation order with each tier's time budget.
pub fn show_tiers(file: &str) -> CliResult<()> {
    let config = load_config(file)?;
    print!("{}", render_tiers(&config)?);
    Ok(())
}

pub fn render_tiers(config: &AppConfig) -> CliResult<String> {
    let registry =
        Registry::register(config.descriptors()).map_err(|e| CliError::Config(e.to_string()))?;
    let retry = config.retry_config();
    let fanout = config.quorum.max_fanout_per_tier.max(1);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} backends in {} tiers (quorum {}, fan-out {fanout})",
        registry.backend_count(),
        registry.tiers_in_priority_order().len(),
        config.quorum.quorum
    );

    for (index, tier) in registry.tiers_in_priority_order().iter().enumerate() {
        let note = if tier.len() < config.quorum.quorum { "  [skipped: smaller than quorum]" } else { "" };
        let _ = writeln!(
            out,
            "\nTier {index} (priority {}): budget {}ms{note}",
            tier.priority(),
            tier.budget(fanout, &retry).as_millis()
        );
        for backend in tier.backends() {
            let _ = writeln!(
                out,
                "  {:<24} weight {:<4} stall {}ms",
                backend.id,
                backend.weight,
                backend.stall_timeout.as_millis()
            );
        }
    }

    Ok(out)
}
