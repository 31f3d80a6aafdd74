use thiserror::Error;

use std::env;
use std::str::FromStr;

use crate::blockchain::hash::MAX_DIFFICULTY;
use crate::blockchain::ChainConfig;

/// Errors that can occur while reading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("MINING_DIFFICULTY must be at most 256, got {0}")]
    DifficultyTooHigh(u32),
}

/// Process configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address the HTTP server binds to
    pub host: String,

    /// Port the HTTP server binds to
    pub port: u16,

    /// Blockchain settings
    pub chain: ChainConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            chain: ChainConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the environment, after reading `.env` if present
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Config::from_lookup(|key| env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let difficulty = parse(&lookup, "MINING_DIFFICULTY")?.unwrap_or(defaults.chain.difficulty);
        if difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::DifficultyTooHigh(difficulty));
        }

        Ok(Config {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse(&lookup, "PORT")?.unwrap_or(defaults.port),
            chain: ChainConfig {
                difficulty,
                max_mining_attempts: parse(&lookup, "MAX_MINING_ATTEMPTS")?,
            },
        })
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}
