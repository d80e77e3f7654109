use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use sumi_weave::config::load_config;
///
/// let config = load_config(Path::new("config.toml")).unwrap();
/// println!("Concurrency: {}", config.crawler.concurrency);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok((Config, String))` - Successfully loaded configuration and its hash
/// * `Err(ConfigError)` - Failed to load or parse the configuration
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

/// Deep-merges `overrides` into `base` and validates the result
///
/// Tables merge key by key; any other value, arrays included, replaces the base value.
///
/// # Example
///
/// ```
/// use sumi_weave::config::{merge_config, Config};
///
/// let overrides: toml::Table = toml::from_str("crawler = { concurrency = 2 }").unwrap();
/// let merged = merge_config(&Config::default(), overrides).unwrap();
/// assert_eq!(merged.crawler.concurrency, 2);
/// assert!(merged.crawler.auto_start);
/// ```
pub fn merge_config(base: &Config, overrides: toml::Table) -> Result<Config, ConfigError> {
    let mut table = match toml::Value::try_from(base)? {
        toml::Value::Table(table) => table,
        other => {
            return Err(ConfigError::Validation(format!(
                "configuration serialized to a {} instead of a table",
                other.type_str()
            )))
        }
    };

    deep_merge(&mut table, overrides);

    let merged: Config = toml::Value::Table(table).try_into()?;
    validate(&merged)?;
    Ok(merged)
}

fn deep_merge(base: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                deep_merge(existing, incoming)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
