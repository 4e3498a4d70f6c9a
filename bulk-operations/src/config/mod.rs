//! Configuration from the environment and dependency wiring.

pub mod dependencies;
pub mod settings;

pub use dependencies::Dependencies;
pub use settings::{bulk_config_from, caller_settings_from, rate_limit_config_from, CallerSettings};
