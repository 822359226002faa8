//! Configuration - user preferences from ~/.sigsleuth/config.toml
//!
//! Covers scan limits, the default match strategy, default signature
//! file locations, and output preferences.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::identify::MatchStrategy;

/// Sigsleuth configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Scan settings
    pub scan: ScanConfig,
    /// Signature file locations
    pub signatures: SignatureConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
    /// Emit results as JSON instead of text
    pub json_output: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_output: false,
        }
    }
}

/// Scan settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Bytes scanned from each end of a file (negative = unlimited)
    pub max_bytes_to_scan: i64,
    /// Match every format registered for an extension, not just the
    /// signature-less fallbacks
    pub all_extensions: bool,
    /// Default match strategy
    pub strategy: MatchStrategy,
    /// Number of parallel workers (0 = auto)
    pub workers: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_bytes_to_scan: 65_536,
            all_extensions: false,
            strategy: MatchStrategy::ContainerOrBinary,
            workers: 0, // auto-detect
        }
    }
}

/// Signature file locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    /// Binary signature file (JSON)
    pub signature_file: Option<PathBuf>,
    /// Container signature file (JSON)
    pub container_file: Option<PathBuf>,
}

impl Config {
    /// Load config from default path or return defaults
    pub fn load() -> Self {
        Self::load_from(&Self::default_path()).unwrap_or_default()
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;

        Ok(config)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;

        Ok(())
    }

    /// Get default config path
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sigsleuth")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.scan.max_bytes_to_scan, 65_536);
        assert_eq!(parsed.scan.strategy, MatchStrategy::ContainerOrBinary);
        assert!(!parsed.scan.all_extensions);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let parsed: Config = toml::from_str("[scan]\nmax_bytes_to_scan = -1\n").unwrap();
        assert_eq!(parsed.scan.max_bytes_to_scan, -1);
        assert_eq!(parsed.general.log_level, "info");
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.scan.strategy = MatchStrategy::Binary;
        config.save_to(&path).unwrap();
        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.scan.strategy, MatchStrategy::Binary);
    }
}
