//! Configuration loading
//!
//! Portfolios are declared in a TOML file, one `[portfolio.<name>]` table
//! each: the normalized transaction store to read, an optional broker
//! filter, ticker exclusions, and a benchmark index. The engine never
//! holds configured portfolios as process-wide state; callers construct
//! them per request from this config.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::EngineError;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub portfolio: BTreeMap<String, PortfolioConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioConfig {
    /// Normalized transaction store (CSV) for this portfolio
    pub tx_file: PathBuf,
    /// Brokers to include; empty means all
    #[serde(default)]
    pub brokers: Vec<String>,
    /// Tickers excluded from performance tables (e.g. sweep funds)
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Reference index for the synthetic benchmark row
    #[serde(default)]
    pub benchmark: Option<String>,
}

impl Config {
    /// Load configuration, trying the explicit path then the user config
    /// directory
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let mut candidates: Vec<PathBuf> = vec![path.as_ref().to_path_buf()];
        if let Some(config_home) = dir_spec::config_home() {
            candidates.push(config_home.join("folio").join(path.as_ref()));
        }

        let found = candidates.iter().find(|p| p.is_file()).ok_or_else(|| {
            EngineError::FileNotFound(format!(
                "config not found at any of: {}",
                candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;
        debug!("Loading config from {}", found.display());

        let text = std::fs::read_to_string(found)
            .with_context(|| format!("failed to read config {}", found.display()))?;
        let mut config: Config = toml::from_str(&text)
            .map_err(|e| EngineError::Parse(format!("config {}: {}", found.display(), e)))?;

        // Relative tx_file paths resolve against the config's directory
        if let Some(base) = found.parent() {
            for portfolio in config.portfolio.values_mut() {
                if portfolio.tx_file.is_relative() {
                    portfolio.tx_file = base.join(&portfolio.tx_file);
                }
            }
        }

        Ok(config)
    }

    pub fn portfolio(&self, name: &str) -> Result<&PortfolioConfig> {
        self.portfolio
            .get(name)
            .ok_or_else(|| anyhow!("portfolio '{}' not found in config", name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.portfolio.keys().map(|s| s.as_str())
    }
}
