//! Configuration library for reel.
//!
//! Loads the scheduler and database settings from a TOML/JSON file, inline
//! JSON or defaults, applies environment overrides and reports non-fatal
//! warnings next to the effective configuration.

pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader};
pub use models::{Config, ConfigMetadata, ConfigSource, DatabaseConfig};
pub use reel_core::scheduler::{RecurringJobConfig, SchedulerConfig};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
