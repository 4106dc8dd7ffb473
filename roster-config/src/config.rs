//! Raw TOML loading with dot-notation lookups for keys the typed settings
//! do not model.
use std::{fs, path::Path};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid value for `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}

pub trait Configurable {
    fn config(&self) -> &toml::Value;

    fn load_config(path: impl AsRef<Path>) -> Result<toml::Value, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Extract Value from config using dot notation i.e. "queue.max_concurrent"
    fn get_config_value(&self, key: &str) -> Option<&toml::Value> {
        let keys: Vec<&str> = key.split('.').collect();
        Self::get_value_recursive(self.config(), &keys)
    }

    fn get_value_recursive<'a>(
        config: &'a toml::Value,
        keys: &[&str],
    ) -> Option<&'a toml::Value> {
        let (key, remaining_keys) = keys.split_first()?;
        if key.is_empty() {
            return None;
        }

        match config {
            toml::Value::Table(table) => {
                let value = table.get(*key)?;
                if remaining_keys.is_empty() {
                    Some(value)
                } else {
                    Self::get_value_recursive(value, remaining_keys)
                }
            }
            _ => None,
        }
    }
}
