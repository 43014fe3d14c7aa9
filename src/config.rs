//! Configuration loading and persistence.
//!
//! Reads and writes the banter configuration file and applies `BANTER_*`
//! environment overrides on top.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

use crate::constants::DEFAULT_SERVER_URL;

/// Configuration for the banter client.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    /// URL of the chat backend.
    pub server_url: String,
    /// Speech-level preference sent with user messages
    /// (`반말` casual / `존댓말` polite). Omitted from frames when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formality: Option<String>,
    /// Whether agent replies reveal incrementally. `false` shows replies
    /// atomically (the scheduler's skip path).
    #[serde(default = "default_typing_reveal")]
    pub typing_reveal: bool,
}

fn default_typing_reveal() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            formality: None,
            typing_reveal: true,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `BANTER_CONFIG_DIR` env var: explicit override (also used by tests)
    /// 2. Default: platform config dir (e.g. `~/.config/banter`)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("BANTER_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("banter")
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file().unwrap_or_else(|_| Self::default());
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");
        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            anyhow::bail!("Config file not found")
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(server_url) = std::env::var("BANTER_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Ok(formality) = std::env::var("BANTER_FORMALITY") {
            self.formality = if formality.is_empty() {
                None
            } else {
                Some(formality)
            };
        }

        if let Ok(reveal) = std::env::var("BANTER_TYPING_REVEAL") {
            if let Ok(value) = reveal.parse::<bool>() {
                self.typing_reveal = value;
            }
        }
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
