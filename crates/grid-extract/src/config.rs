//! Extraction configuration.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GridExtractError, Result};
use crate::strategy::ReadStrategy;

/// Tunables for the extraction core, read from the environment at
/// startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// I/O batching strategy, one of `bounding-box`, `row-by-row` or
    /// `point-by-point`.
    pub strategy: String,
    /// Oversampling factor for curvilinear lookup tables. Must be at
    /// least 1.
    pub lut_resolution_multiplier: f64,
    /// Tile cache budget in megabytes. Zero disables caching.
    pub tile_cache_size_mb: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            strategy: ReadStrategy::default().to_string(),
            lut_resolution_multiplier: 3.0,
            tile_cache_size_mb: 256,
        }
    }
}

impl ExtractConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            strategy: std::env::var("EXTRACT_STRATEGY").unwrap_or(defaults.strategy),
            lut_resolution_multiplier: parse_env(
                "LUT_RESOLUTION_MULTIPLIER",
                defaults.lut_resolution_multiplier,
            )?,
            tile_cache_size_mb: parse_env("TILE_CACHE_SIZE_MB", defaults.tile_cache_size_mb)?,
        };
        config.validate()?;
        info!(
            strategy = %config.strategy,
            lut_multiplier = config.lut_resolution_multiplier,
            cache_mb = config.tile_cache_size_mb,
            "extraction configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.read_strategy()?;
        if self.lut_resolution_multiplier < 1.0 || !self.lut_resolution_multiplier.is_finite() {
            return Err(GridExtractError::Config(format!(
                "LUT_RESOLUTION_MULTIPLIER must be >= 1, got {}",
                self.lut_resolution_multiplier
            )));
        }
        Ok(())
    }

    pub fn read_strategy(&self) -> Result<ReadStrategy> {
        ReadStrategy::from_key(&self.strategy)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| {
            GridExtractError::Config(format!("invalid value for {}: '{}'", name, raw))
        }),
        Err(_) => Ok(default),
    }
}
