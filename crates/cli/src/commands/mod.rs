pub mod config;
pub mod simulate;
pub mod tiers;
pub mod utils;

pub use config::{handle_config_command, ConfigCommands};
pub use simulate::{run_simulation, SimulateOptions};
pub use tiers::show_tiers;
