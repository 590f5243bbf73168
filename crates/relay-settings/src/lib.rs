//! # relay-settings
//!
//! Layered configuration for the relay bridge.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `~/.relay/settings.json` or an explicit path
//!    (deep-merged over defaults, camelCase keys)
//! 3. **Environment variables**: `RELAY_*` overrides (highest priority)
//!
//! Settings are plain data. Callers load them once at startup and pass the
//! relevant section down explicitly; there is no global instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
