//! Engine configuration and per-origin policy inputs
//!
//! Both arrive from the host as plain JSON objects; every field has a default
//! so hosts only send what they override.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Tunables for one annotation session
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Literal case-folding for name matching
    #[serde(default)]
    pub case_insensitive: bool,
    /// Drop bare 1-3 digit names from the index
    #[serde(default = "default_true")]
    pub filter_short_numerals: bool,
    /// Quiet period before a mutation burst is processed
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u32,
    /// Catalog entries annotated per step of the full-document pass
    #[serde(default = "default_entries_per_chunk")]
    pub entries_per_chunk: usize,
    /// Queued elements processed per step of a drain
    #[serde(default = "default_elements_per_chunk")]
    pub elements_per_chunk: usize,
    /// Compiled size limit for a single name pattern, in bytes
    #[serde(default = "default_pattern_size_limit")]
    pub pattern_size_limit: usize,
}

/// Longest accepted quiet period; the browser timer takes a signed 32-bit delay
pub const MAX_DEBOUNCE_MS: u32 = 60_000;

fn default_true() -> bool { true }
fn default_debounce_ms() -> u32 { 750 }
fn default_entries_per_chunk() -> usize { 25 }
fn default_elements_per_chunk() -> usize { 10 }
fn default_pattern_size_limit() -> usize { 1 << 20 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            case_insensitive: false,
            filter_short_numerals: true,
            debounce_ms: default_debounce_ms(),
            entries_per_chunk: default_entries_per_chunk(),
            elements_per_chunk: default_elements_per_chunk(),
            pattern_size_limit: default_pattern_size_limit(),
        }
    }
}

impl EngineConfig {
    /// Parse from a JSON object, filling defaults, and validate
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.debounce_ms == 0 {
            return Err(EngineError::Config("debounce_ms must be positive".into()));
        }
        if self.debounce_ms > MAX_DEBOUNCE_MS {
            return Err(EngineError::Config(format!("debounce_ms must be at most {MAX_DEBOUNCE_MS}")));
        }
        if self.entries_per_chunk == 0 || self.elements_per_chunk == 0 {
            return Err(EngineError::Config("chunk sizes must be positive".into()));
        }
        Ok(())
    }

    /// Fold the origin's policy into this config
    pub fn apply_policy(&mut self, policy: &OriginPolicy) {
        self.case_insensitive = policy.case_insensitive;
    }
}

/// Per-origin switches owned by the host's settings surface
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OriginPolicy {
    #[serde(default)]
    pub auto_run: bool,
    #[serde(default)]
    pub case_insensitive: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert!(!config.case_insensitive);
        assert!(config.filter_short_numerals);
        assert_eq!(config.debounce_ms, 750);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = EngineConfig::from_json(r#"{"case_insensitive": true, "debounce_ms": 500}"#).unwrap();
        assert!(config.case_insensitive);
        assert_eq!(config.debounce_ms, 500);
        assert_eq!(config.entries_per_chunk, 25);
        assert!(config.filter_short_numerals);
    }

    #[test]
    fn test_zero_chunk_rejected() {
        let err = EngineConfig::from_json(r#"{"elements_per_chunk": 0}"#).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_debounce_upper_bound() {
        assert!(EngineConfig::from_json(r#"{"debounce_ms": 60000}"#).is_ok());
        let err = EngineConfig::from_json(r#"{"debounce_ms": 3000000000}"#).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        assert!(matches!(
            EngineConfig::from_json("{not json"),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_policy_overrides_case_mode() {
        let mut config = EngineConfig::default();
        let policy: OriginPolicy = serde_json::from_str(r#"{"case_insensitive": true}"#).unwrap();
        assert!(!policy.auto_run);
        config.apply_policy(&policy);
        assert!(config.case_insensitive);
    }
}
