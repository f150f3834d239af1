use crate::constants::DEFAULT_PAGE_SIZE;
use crate::error::{HarvestError, Result};
use serde::Deserialize;
use std::fs;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub datacite: DataCiteConfig,
    #[serde(default)]
    pub organization: OrganizationConfig,
}

#[derive(Debug, Deserialize)]
pub struct DataCiteConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for DataCiteConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct OrganizationConfig {
    /// Name variants to match; `*` acts as a wildcard
    #[serde(default)]
    pub name_patterns: Vec<String>,
    /// ROR identifier, full URL or bare suffix
    #[serde(default)]
    pub ror: String,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HarvestError::Config(format!("Failed to read config file '{}': {}", path, e))
        })?;

        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
