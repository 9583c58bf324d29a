use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::constants::{DEFAULT_IMAP_PORT, DEFAULT_SMTP_PORT};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// List of tenant mailboxes served from one cache database.
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Stable identifier scoping all cached data for this mailbox.
    pub id: String,
    pub imap: ImapConfig,
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapConfig {
    pub server: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    pub login: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub login: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub tls: bool,
}

fn default_imap_port() -> u16 {
    DEFAULT_IMAP_PORT
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn config_dir() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("mailsync");
        Ok(dir)
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn data_dir() -> Result<PathBuf> {
        let dir = dirs::data_local_dir()
            .context("Could not find data directory")?
            .join("mailsync");
        Ok(dir)
    }

    /// Path of the shared SQLite cache database.
    pub fn cache_path() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("cache.db"))
    }

    pub fn tenant(&self, id: &str) -> Option<&TenantConfig> {
        self.tenants.iter().find(|t| t.id == id)
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            anyhow::bail!(
                "Configuration file not found at {}\n\
                 Please create a config file. Example:\n\n\
                 [[tenants]]\n\
                 id = \"personal\"\n\n\
                 [tenants.imap]\n\
                 server = \"imap.example.com\"\n\
                 login = \"you@example.com\"\n\
                 password = \"secret\"\n\n\
                 [tenants.smtp]\n\
                 server = \"smtp.example.com\"\n\
                 login = \"you@example.com\"\n\
                 password = \"secret\"",
                path.display()
            );
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if config.tenants.is_empty() {
            anyhow::bail!("Config file {} defines no tenants", path.display());
        }

        Ok(config)
    }

    pub fn ensure_dirs() -> Result<()> {
        fs::create_dir_all(Self::config_dir()?)?;
        fs::create_dir_all(Self::data_dir()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multi_tenant_config() {
        let toml = r#"
            [[tenants]]
            id = "personal"

            [tenants.imap]
            server = "imap.example.com"
            login = "me@example.com"
            password = "secret"

            [tenants.smtp]
            server = "smtp.example.com"
            login = "me@example.com"
            password = "secret"

            [[tenants]]
            id = "work"

            [tenants.imap]
            server = "imap.work.com"
            port = 1993
            login = "me@work.com"
            password = "secret"
            tls = false

            [tenants.smtp]
            server = "smtp.work.com"
            login = "me@work.com"
            password = "secret"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.tenants.len(), 2);
        assert_eq!(config.tenants[0].id, "personal");
        assert_eq!(config.tenants[0].imap.port, 993);
        assert_eq!(config.tenants[0].smtp.port, 587);
        assert!(config.tenants[0].imap.tls);
        assert_eq!(config.tenants[1].imap.port, 1993);
        assert!(!config.tenants[1].imap.tls);

        assert_eq!(config.tenant("work").unwrap().imap.server, "imap.work.com");
        assert!(config.tenant("missing").is_none());
    }
}
