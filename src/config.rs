use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Pipeline configuration
// ---------------------------------------------------------------------------

/// Tunables for cluster analysis and model generation.
///
/// Read from JSON; every field is optional:
///
/// ```json
/// { "gradient_threshold": 0.01, "isolation_distance_angstrom": 5.0 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Blocked-gradient magnitude a trough must cross on both flanks.
    pub gradient_threshold: f64,
    /// Maximum wavelength gap to the nearest same-class cluster.
    pub isolation_distance_angstrom: f64,
    /// Model points shallower than this (1 - intensity) are dropped.
    pub min_model_depth: f64,
    /// Process shards on the rayon thread pool.
    pub parallel: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gradient_threshold: 0.01,
            isolation_distance_angstrom: 5.0,
            min_model_depth: 0.01,
            parallel: true,
        }
    }
}

impl Config {
    /// Load from a JSON file and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_json::from_str(&text).context("parsing config JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.gradient_threshold.is_finite() || self.gradient_threshold < 0.0 {
            bail!("gradient_threshold must be finite and >= 0, got {}", self.gradient_threshold);
        }
        if !self.isolation_distance_angstrom.is_finite() || self.isolation_distance_angstrom <= 0.0 {
            bail!(
                "isolation_distance_angstrom must be finite and > 0, got {}",
                self.isolation_distance_angstrom
            );
        }
        if !(0.0..1.0).contains(&self.min_model_depth) {
            bail!("min_model_depth must lie in [0, 1), got {}", self.min_model_depth);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "gradient_threshold": 0.05 }}"#).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.gradient_threshold, 0.05);
        assert_eq!(config.isolation_distance_angstrom, 5.0);
        assert!(config.parallel);
    }

    #[test]
    fn rejects_bad_isolation_distance() {
        let config = Config {
            isolation_distance_angstrom: 0.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_negative_threshold() {
        let config = Config {
            gradient_threshold: -1.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
