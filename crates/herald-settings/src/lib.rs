//! # herald-settings
//!
//! Layered configuration for Herald processes.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HeraldSettings::default()`]
//! 2. **User file**: `~/.herald/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `HERALD_*` overrides (highest priority)
//!
//! The loaded value is owned by the caller and passed to the components that
//! need it; there is no process-wide instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = HeraldSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = HeraldSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.buffer.capacity, 200);
        assert_eq!(settings.relay.subject_prefix, "events");
        assert!(settings.topics.iter().any(|t| t == "agents"));
    }
}
