//! # tether-settings
//!
//! Configuration for the Tether connection manager.
//!
//! Settings are read once, at construction time, from three layers:
//! compiled defaults, an optional `~/.tether/settings.json`, and `TETHER_*`
//! environment variables (highest priority).

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, load_settings_with, settings_path};
pub use types::{ConnectionSettings, LoggingSettings, TetherSettings};
