//! # consult-settings
//!
//! Configuration for the consultation server, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`ConsultSettings::default()`]
//! 2. **User file**: `~/.consult/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `CONSULT_*` overrides (highest priority)
//!
//! The merged result is validated before it is returned. Settings are passed
//! explicitly to the components that need them; there is no global instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;
