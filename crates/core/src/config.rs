use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

// ── Top-level config ────────────────────────────────────────────────

/// Heuristic constants used across the engine.
///
/// Parsed from TOML with `CANON_<SECTION>_<KEY>` environment overrides.
/// Every section is optional; an empty document yields the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub pruning: PruningConfig,

    #[serde(default)]
    pub time: TimeConfig,

    /// Decimal places kept by the rounding stage.
    #[serde(default = "default_round_precision")]
    pub round_precision: u32,

    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_round_precision() -> u32 {
    2
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pruning: PruningConfig::default(),
            time: TimeConfig::default(),
            round_precision: default_round_precision(),
            cache: CacheConfig::default(),
        }
    }
}

// ── Section configs ─────────────────────────────────────────────────

/// Thresholds for marking low-information metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruningConfig {
    /// Numeric metrics below this value are marked for pruning.
    #[serde(default = "default_min_threshold")]
    pub min_threshold: f64,

    /// `_min`/`_max` metrics closer than this relative distance to `_avg` are marked.
    #[serde(default = "default_min_variation_ratio")]
    pub min_variation_ratio: f64,
}

fn default_min_threshold() -> f64 {
    0.011
}

fn default_min_variation_ratio() -> f64 {
    0.33
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            min_threshold: default_min_threshold(),
            min_variation_ratio: default_min_variation_ratio(),
        }
    }
}

/// Field names used to order entries in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeConfig {
    #[serde(default = "default_time_field")]
    pub field: String,

    /// Consulted when `field` is absent on an entry.
    #[serde(default = "default_time_fallback_field")]
    pub fallback_field: String,

    /// Time field as it appears on aggregated entries.
    #[serde(default = "default_time_aggregated_field")]
    pub aggregated_field: String,
}

fn default_time_field() -> String {
    "time_end_utc".into()
}

fn default_time_fallback_field() -> String {
    "instance_updated_at".into()
}

fn default_time_aggregated_field() -> String {
    "time_end_utc/max_value".into()
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            field: default_time_field(),
            fallback_field: default_time_fallback_field(),
            aggregated_field: default_time_aggregated_field(),
        }
    }
}

/// Entry cache behaviour at the loading boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cached entries older than this are reloaded on next access.
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,
}

fn default_staleness_secs() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            staleness_secs: default_staleness_secs(),
        }
    }
}

// ── Loading & Validation ────────────────────────────────────────────

impl EngineConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides (call `load_dotenv()` first).
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Apply `CANON_*` overrides from an arbitrary lookup.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("CANON_PRUNING_MIN_THRESHOLD") {
            self.pruning.min_threshold = parse_override("CANON_PRUNING_MIN_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("CANON_PRUNING_MIN_VARIATION_RATIO") {
            self.pruning.min_variation_ratio =
                parse_override("CANON_PRUNING_MIN_VARIATION_RATIO", &v)?;
        }
        if let Some(v) = lookup("CANON_TIME_FIELD") {
            self.time.field = v;
        }
        if let Some(v) = lookup("CANON_TIME_FALLBACK_FIELD") {
            self.time.fallback_field = v;
        }
        if let Some(v) = lookup("CANON_TIME_AGGREGATED_FIELD") {
            self.time.aggregated_field = v;
        }
        if let Some(v) = lookup("CANON_ROUND_PRECISION") {
            self.round_precision = parse_override("CANON_ROUND_PRECISION", &v)?;
        }
        if let Some(v) = lookup("CANON_CACHE_STALENESS_SECS") {
            self.cache.staleness_secs = parse_override("CANON_CACHE_STALENESS_SECS", &v)?;
        }
        Ok(())
    }

    // ── Validation ──────────────────────────────────────────────────

    pub fn validate(&self) -> Result<()> {
        let threshold = self.pruning.min_threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(EngineError::Config(format!(
                "pruning.min_threshold must be a non-negative number, got {threshold}"
            )));
        }
        let ratio = self.pruning.min_variation_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(EngineError::Config(format!(
                "pruning.min_variation_ratio must be in (0, 1], got {ratio}"
            )));
        }
        if self.time.field.is_empty() {
            return Err(EngineError::Config("time.field must not be empty".into()));
        }
        if self.cache.staleness_secs == 0 {
            return Err(EngineError::Config(
                "cache.staleness_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| EngineError::Config(format!("invalid value '{raw}' for {key}")))
}
