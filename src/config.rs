//! Configuration management for scriptsmith
//!
//! Stores settings in ~/.config/scriptsmith/config.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub openrouter_api_key: Option<String>,
    /// Directory containing per-host reference snippets (one subdirectory per host)
    pub samples_dir: Option<PathBuf>,
    /// Directory containing per-host declaration surfaces (`<host>.d.ts`)
    pub declarations_dir: Option<PathBuf>,
    /// Optional per-host declaration surface URLs, checked before `declarations_dir`
    #[serde(default)]
    pub declaration_urls: std::collections::HashMap<String, String>,
}

impl Config {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("scriptsmith"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        tracing::warn!("ignoring malformed config at {}: {err}", path.display());
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to disk
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        fs::create_dir_all(&dir)?;
        let path = dir.join("config.json");
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// API key from config, falling back to the environment.
    pub fn get_api_key(&self) -> Option<String> {
        self.openrouter_api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_no_key() {
        let config = Config::default();
        assert!(config.openrouter_api_key.is_none());
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let mut config = Config::default();
        config.openrouter_api_key = Some("sk-test".into());
        config.samples_dir = Some(PathBuf::from("/tmp/samples"));
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.openrouter_api_key.as_deref(), Some("sk-test"));
        assert_eq!(back.samples_dir, Some(PathBuf::from("/tmp/samples")));
    }
}
