//! Configuration loading from TOML with environment variable overrides.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! The database URL can be overridden with `DATABASE_URL` so deploys
//! don't need to edit the file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub icons: IconsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IconsConfig {
    pub dir: String,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// The database URL, preferring the `DATABASE_URL` environment
    /// variable over the config file.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.database.url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [server]
            port = 8080

            [database]
            url = "sqlite://data/arbledger.db"

            [icons]
            dir = "data/icons"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.database.url, "sqlite://data/arbledger.db");
        assert_eq!(cfg.icons.dir, "data/icons");
    }

    #[test]
    fn test_load_config_file() {
        // This test requires config.toml to be in the working directory.
        if let Ok(cfg) = AppConfig::load("config.toml") {
            assert!(cfg.server.port > 0);
            assert!(cfg.database.url.starts_with("sqlite://"));
        }
        // If config.toml isn't found, that's acceptable in some test environments
    }
}
