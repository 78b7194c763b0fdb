//! Layered configuration for Pontual.
//!
//! Sources, lowest to highest precedence:
//!
//! 1. Built-in defaults
//! 2. `pontual.toml` (path from `--config`, then `PONTUAL_CONFIG`, then
//!    `./pontual.toml`; a missing default file is not an error)
//! 3. Environment (`.env` is loaded first): `PONTUAL_HOST`, `PONTUAL_PORT`,
//!    `PONTUAL_STORAGE`, `PONTUAL_DB_PATH`, `PONTUAL_JWT_SECRET`,
//!    `PONTUAL_LOG_JSON`
//! 4. CLI flags, applied by the caller
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3000
//! cors = true
//!
//! [storage]
//! backend = "sqlite"
//! path = "data/pontual.db"
//!
//! [auth]
//! required = true
//! jwt_secret = "change-me"
//! token_ttl_secs = 86400
//! reset_token_ttl_secs = 3600
//!
//! [logging]
//! filter = "pontual=info,tower_http=info"
//! json = false
//! directory = "logs"
//!
//! [whatsapp]
//! send_replies = true
//! timeout_secs = 15
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::logging::DEFAULT_FILTER;
use crate::store::BackendKind;

pub const DEFAULT_CONFIG_FILE: &str = "pontual.toml";
pub const CONFIG_ENV: &str = "PONTUAL_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Allow any origin. Off means same-origin only.
    pub cors: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            cors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: BackendKind,
    /// Database or JSON file. Defaults per backend under `data/`.
    pub path: Option<PathBuf>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: BackendKind::Sqlite,
            path: None,
        }
    }
}

impl StorageSection {
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(p) => expand_home(p),
            None => match self.backend {
                BackendKind::File => PathBuf::from("data/pontual.json"),
                _ => PathBuf::from("data/pontual.db"),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub required: bool,
    pub jwt_secret: String,
    pub token_ttl_secs: i64,
    pub reset_token_ttl_secs: i64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            required: true,
            jwt_secret: String::new(),
            token_ttl_secs: 24 * 3600,
            reset_token_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub filter: String,
    pub json: bool,
    /// Also write a daily rolling log file here.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            json: false,
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppSection {
    /// When false, replies are computed and logged but never sent.
    pub send_replies: bool,
    pub timeout_secs: u64,
}

impl Default for WhatsAppSection {
    fn default() -> Self {
        Self {
            send_replies: true,
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub storage: StorageSection,
    pub auth: AuthSection,
    pub logging: LoggingSection,
    pub whatsapp: WhatsAppSection,
}

impl Config {
    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse pontual.toml")
    }

    /// Load file and environment layers.
    ///
    /// An explicitly named file must exist; the default one may be absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let named = explicit.map(Path::to_path_buf).or(env_path);
        let mut config = match &named {
            Some(path) => Self::load_file(path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::load_file(path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Overlay `PONTUAL_*` variables as returned by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("PONTUAL_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PONTUAL_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid PONTUAL_PORT '{}'", port))?;
        }
        if let Some(backend) = lookup("PONTUAL_STORAGE") {
            self.storage.backend = backend.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(path) = lookup("PONTUAL_DB_PATH") {
            self.storage.path = Some(PathBuf::from(path));
        }
        if let Some(secret) = lookup("PONTUAL_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(json) = lookup("PONTUAL_LOG_JSON") {
            self.logging.json = matches!(json.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    /// Problems that prevent serving. Empty means the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.server.port == 0 {
            errors.push("server.port must not be 0".to_string());
        }
        if self.auth.required && self.auth.jwt_secret.trim().is_empty() {
            errors.push(
                "auth.jwt_secret must be set when auth.required is true (PONTUAL_JWT_SECRET)"
                    .to_string(),
            );
        }
        if self.auth.token_ttl_secs <= 0 {
            errors.push("auth.token_ttl_secs must be positive".to_string());
        }
        if self.auth.reset_token_ttl_secs <= 0 {
            errors.push("auth.reset_token_ttl_secs must be positive".to_string());
        }
        if self.whatsapp.timeout_secs == 0 {
            errors.push("whatsapp.timeout_secs must be positive".to_string());
        }
        errors
    }

    pub fn ensure_valid(&self) -> Result<()> {
        let errors = self.validate();
        if !errors.is_empty() {
            anyhow::bail!("Invalid configuration:\n  - {}", errors.join("\n  - "));
        }
        Ok(())
    }

    /// TOML rendering with the JWT secret masked.
    pub fn to_display_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        if !shown.auth.jwt_secret.is_empty() {
            shown.auth.jwt_secret = "********".to_string();
        }
        toml::to_string_pretty(&shown).context("Failed to serialize configuration")
    }
}

/// Expand a leading `~/` to the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.storage.backend, BackendKind::Sqlite);
        assert_eq!(config.storage.resolved_path(), PathBuf::from("data/pontual.db"));
        assert!(config.auth.required);
        assert_eq!(config.logging.filter, DEFAULT_FILTER);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = Config::parse(
            r#"
            [server]
            port = 8080

            [storage]
            backend = "file"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.storage.resolved_path(), PathBuf::from("data/pontual.json"));
        assert_eq!(config.whatsapp.timeout_secs, 15);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(Config::parse("[storage]\nbackend = \"mongo\"").is_err());
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = Config::parse("[server]\nport = 8080").unwrap();
        config
            .apply_env(env(&[
                ("PONTUAL_PORT", "9090"),
                ("PONTUAL_STORAGE", "memory"),
                ("PONTUAL_JWT_SECRET", "s3cret"),
                ("PONTUAL_LOG_JSON", "true"),
            ]))
            .unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.storage.backend, BackendKind::Memory);
        assert_eq!(config.auth.jwt_secret, "s3cret");
        assert!(config.logging.json);
    }

    #[test]
    fn bad_port_in_environment_is_an_error() {
        let mut config = Config::default();
        assert!(config.apply_env(env(&[("PONTUAL_PORT", "http")])).is_err());
    }

    #[test]
    fn validation_requires_secret_only_when_auth_is_required() {
        let mut config = Config::default();
        assert_eq!(config.validate().len(), 1);
        config.auth.required = false;
        assert!(config.validate().is_empty());
        config.server.port = 0;
        assert!(config.ensure_valid().is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn display_masks_secret() {
        let mut config = Config::default();
        config.auth.jwt_secret = "top-secret".into();
        let shown = config.to_display_toml().unwrap();
        assert!(!shown.contains("top-secret"));
        assert!(shown.contains("port = 3000"));
    }

    #[test]
    fn tilde_paths_expand() {
        let expanded = expand_home(Path::new("~/pontual.db"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join("pontual.db"));
        }
    }
}
