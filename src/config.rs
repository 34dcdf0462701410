//! Configuration management for DomainChain

use crate::amount::{parse_amount, Amount};
use crate::crypto::Principal;
use crate::error::{RegistryError, Result};
use crate::ledger::{validate_reward_bps, DEFAULT_REWARD_BPS};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "domainchain.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Whole units as a decimal string, e.g. "1.0"
    #[serde(default = "default_initial_price")]
    pub initial_price: String,
    /// Hex principal; when unset, `init` uses the local key
    #[serde(default)]
    pub administrator: Option<String>,
    #[serde(default = "default_reward_bps")]
    pub reward_bps: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            initial_price: default_initial_price(),
            administrator: None,
            reward_bps: default_reward_bps(),
        }
    }
}

impl RegistryConfig {
    pub fn initial_price(&self) -> Result<Amount> {
        parse_amount(&self.initial_price).map_err(|e| {
            RegistryError::InvalidConfig(format!("registry.initial_price: {}", e))
        })
    }

    pub fn administrator(&self) -> Result<Option<Principal>> {
        self.administrator
            .as_deref()
            .map(|hex| {
                Principal::from_hex(hex).map_err(|e| {
                    RegistryError::InvalidConfig(format!("registry.administrator: {}", e))
                })
            })
            .transpose()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

fn default_initial_price() -> String {
    "1.0".to_string()
}

fn default_reward_bps() -> u32 {
    DEFAULT_REWARD_BPS
}

fn default_db_path() -> String {
    "./data/domainchain.db".to_string()
}

fn default_api_port() -> u16 {
    3000
}

/// Where `keygen` stores the local secret key.
pub fn default_key_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".domainchain")
        .join("key.hex")
}

pub fn parse_config(config_str: &str) -> Result<Config> {
    let config: Config = toml::from_str(config_str)
        .map_err(|e| RegistryError::InvalidConfig(e.to_string()))?;
    validate(&config)?;
    Ok(config)
}

/// Load `path`, falling back to defaults when the file is absent.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let config_str = fs::read_to_string(path)?;
    parse_config(&config_str)
}

fn validate(config: &Config) -> Result<()> {
    if config.database.path.is_empty() {
        return Err(RegistryError::InvalidConfig(
            "database.path must be set".to_string(),
        ));
    }
    config.registry.initial_price()?;
    config.registry.administrator()?;
    validate_reward_bps(config.registry.reward_bps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::UNIT;
    use std::io::Write;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.registry.initial_price().unwrap(), UNIT);
        assert_eq!(config.registry.reward_bps, 500);
        assert_eq!(config.database.path, "./data/domainchain.db");
        assert_eq!(config.api.port, 3000);
    }

    #[test]
    fn test_full_file() {
        let admin = Principal::from_label("admin");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "[registry]\ninitial_price = \"2.5\"\nadministrator = \"{}\"\nreward_bps = 100\n\
             [database]\npath = \"/tmp/x.db\"\n[api]\nport = 8080\n",
            admin.to_hex()
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.registry.initial_price().unwrap(), 5 * UNIT / 2);
        assert_eq!(config.registry.administrator().unwrap(), Some(admin));
        assert_eq!(config.registry.reward_bps, 100);
        assert_eq!(config.api.port, 8080);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(parse_config("[database]\npath = \"\"").is_err());
        assert!(parse_config("[registry]\ninitial_price = \"one\"").is_err());
        assert!(parse_config("[registry]\nadministrator = \"zz\"").is_err());
        assert!(matches!(
            parse_config("[registry]\nreward_bps = 600"),
            Err(RegistryError::InvalidConfig(_))
        ));
    }
}
