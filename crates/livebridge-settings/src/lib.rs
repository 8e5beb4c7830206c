//! # livebridge-settings
//!
//! Configuration for the bridge, loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`BridgeSettings::default()`]
//! 2. **User file**: `~/.livebridge/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `LIVEBRIDGE_*` overrides (highest priority)
//!
//! The binary applies CLI flags on top of the loaded value.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<BridgeSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// Loads from the default path on first call and falls back to compiled
/// defaults if loading fails.
pub fn get_settings() -> &'static BridgeSettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// Returns the value back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: BridgeSettings) -> std::result::Result<(), BridgeSettings> {
    SETTINGS.set(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
