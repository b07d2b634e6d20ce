//! Runtime configuration.
//!
//! A [`Config`] is handed to [`crate::runtime::init`]. Values come from
//! defaults, builder setters, or a key lookup such as the process
//! environment:
//!
//! | key | meaning |
//! |---|---|
//! | `GDBRIDGE_LOG` | log level name |
//! | `GDBRIDGE_VERIFY_REFCOUNTS` | check counts before every release |
//! | `GDBRIDGE_STRICT_TYPES` | panic on Variant type mismatches |
//! | `GDBRIDGE_FORWARD_LOGS` | route errors and warnings to the engine console |
//! | `GDBRIDGE_TRACK_SITES` | remember where arena handles were registered |

use crate::error::{Error, Result};
use gdbridge_log::Level;

/// Settings fixed for the lifetime of one runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Level applied to `gdbridge-log` at init.
    pub log_level: Level,
    /// Oldest engine version accepted, as (major, minor).
    pub min_engine_version: (u32, u32),
    /// Read the native count before each release and refuse unbalanced ones.
    pub verify_refcounts: bool,
    /// Panic instead of returning `TypeMismatch` from decode.
    pub panic_on_type_mismatch: bool,
    /// Install a log sink that forwards errors and warnings to the engine.
    pub forward_logs_to_engine: bool,
    /// Record registration sites of arena handles for leak diagnostics.
    pub track_lifetime_sites: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: Level::Info,
            min_engine_version: (4, 1),
            verify_refcounts: cfg!(debug_assertions),
            panic_on_type_mismatch: false,
            forward_logs_to_engine: false,
            track_lifetime_sites: false,
        }
    }
}

impl Config {
    pub fn with_log_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_min_engine_version(mut self, major: u32, minor: u32) -> Self {
        self.min_engine_version = (major, minor);
        self
    }

    pub fn with_verify_refcounts(mut self, on: bool) -> Self {
        self.verify_refcounts = on;
        self
    }

    pub fn with_panic_on_type_mismatch(mut self, on: bool) -> Self {
        self.panic_on_type_mismatch = on;
        self
    }

    pub fn with_forward_logs_to_engine(mut self, on: bool) -> Self {
        self.forward_logs_to_engine = on;
        self
    }

    pub fn with_track_lifetime_sites(mut self, on: bool) -> Self {
        self.track_lifetime_sites = on;
        self
    }

    /// Builds a config from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from defaults overridden by `lookup`.
    ///
    /// Keys that `lookup` does not know keep their default.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] for a value that does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(value) = lookup("GDBRIDGE_LOG") {
            config.log_level = value.parse().map_err(|_| Error::InvalidConfig {
                key: "GDBRIDGE_LOG",
                value,
            })?;
        }
        if let Some(value) = lookup("GDBRIDGE_VERIFY_REFCOUNTS") {
            config.verify_refcounts = parse_flag("GDBRIDGE_VERIFY_REFCOUNTS", value)?;
        }
        if let Some(value) = lookup("GDBRIDGE_STRICT_TYPES") {
            config.panic_on_type_mismatch = parse_flag("GDBRIDGE_STRICT_TYPES", value)?;
        }
        if let Some(value) = lookup("GDBRIDGE_FORWARD_LOGS") {
            config.forward_logs_to_engine = parse_flag("GDBRIDGE_FORWARD_LOGS", value)?;
        }
        if let Some(value) = lookup("GDBRIDGE_TRACK_SITES") {
            config.track_lifetime_sites = parse_flag("GDBRIDGE_TRACK_SITES", value)?;
        }

        Ok(config)
    }
}

fn parse_flag(key: &'static str, value: String) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidConfig { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_empty_lookup_is_default() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_lookup_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("GDBRIDGE_LOG", "trace"),
            ("GDBRIDGE_VERIFY_REFCOUNTS", "off"),
            ("GDBRIDGE_STRICT_TYPES", "1"),
            ("GDBRIDGE_FORWARD_LOGS", "Yes"),
        ]))
        .unwrap();

        assert_eq!(config.log_level, Level::Trace);
        assert!(!config.verify_refcounts);
        assert!(config.panic_on_type_mismatch);
        assert!(config.forward_logs_to_engine);
        assert!(!config.track_lifetime_sites);
    }

    #[test]
    fn test_bad_values_are_rejected() {
        let err = Config::from_lookup(lookup(&[("GDBRIDGE_LOG", "chatty")])).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidConfig {
                key: "GDBRIDGE_LOG",
                value: "chatty".into()
            }
        );

        let err =
            Config::from_lookup(lookup(&[("GDBRIDGE_TRACK_SITES", "maybe")])).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { key: "GDBRIDGE_TRACK_SITES", .. }));
    }

    #[test]
    fn test_builder() {
        let config = Config::default()
            .with_min_engine_version(4, 3)
            .with_track_lifetime_sites(true);
        assert_eq!(config.min_engine_version, (4, 3));
        assert!(config.track_lifetime_sites);
    }
}
