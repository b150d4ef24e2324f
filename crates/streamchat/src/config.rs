//! Application configuration.
//!
//! Layered with the `config` crate: built-in defaults, then the TOML file,
//! then `STREAMCHAT__SECTION__KEY` environment variables.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::completion::OpenAiClientConfig;

pub const APP_NAME: &str = "streamchat";

/// Environment variable holding the provider credential.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub sessions: SessionsConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Chat-completion provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Credential. Falls back to `OPENAI_API_KEY` when unset.
    pub api_key: Option<String>,
    /// OpenAI-compatible API root.
    pub base_url: String,
    pub model: String,
    /// Sent ahead of every conversation.
    pub system_prompt: String,
    pub temperature: Option<f32>,
    /// Deadline for a whole round, in seconds.
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            system_prompt: "You are a helpful assistant.".to_string(),
            temperature: None,
            timeout_secs: 120,
            connect_timeout_secs: 10,
        }
    }
}

impl ProviderConfig {
    /// Credential from the config file or the environment.
    pub fn api_key(&self) -> Option<String> {
        resolve_api_key(self.api_key.as_deref(), env::var(API_KEY_ENV).ok())
    }

    pub fn round_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn client_config(&self, api_key: String) -> OpenAiClientConfig {
        let mut config = OpenAiClientConfig::new(api_key);
        config.base_url = self.base_url.clone();
        config.model = self.model.clone();
        config.temperature = self.temperature;
        config.connect_timeout = Duration::from_secs(self.connect_timeout_secs.max(1));
        config
    }
}

/// Pick the first non-blank credential.
pub fn resolve_api_key(configured: Option<&str>, from_env: Option<String>) -> Option<String> {
    configured
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .or_else(|| {
            from_env
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty())
        })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Idle sessions older than this are dropped. 0 keeps them forever.
    pub idle_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 300,
        }
    }
}

impl SessionsConfig {
    pub fn idle_ttl(&self) -> Option<Duration> {
        (self.idle_ttl_secs > 0).then(|| Duration::from_secs(self.idle_ttl_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub title: String,
    /// Directory served under `/static`.
    pub static_dir: Option<String>,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            title: "Streamchat".to_string(),
            static_dir: None,
        }
    }
}

/// Resolved on-disk locations.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_file: PathBuf,
}

impl AppPaths {
    pub fn discover(override_path: Option<PathBuf>) -> Result<Self> {
        let config_file = match override_path {
            Some(path) => {
                let expanded = expand_path(path)?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => default_config_dir()?.join("config.toml"),
        };

        if config_file.parent().is_none() {
            return Err(anyhow!("invalid config file path: {config_file:?}"));
        }

        Ok(Self { config_file })
    }
}

impl std::fmt::Display for AppPaths {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "config: {}", self.config_file.display())
    }
}

/// Build the effective config from defaults, `path` and the environment.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let env_prefix = env_prefix();
    let built = Config::builder()
        .set_default("logging.level", "info")?
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 8000_i64)?
        .add_source(File::from(path).format(FileFormat::Toml).required(false))
        .add_source(Environment::with_prefix(env_prefix.as_str()).separator("__"))
        .build()
        .with_context(|| format!("loading config from {}", path.display()))?;

    built.try_deserialize().context("parsing configuration")
}

/// Write the default config, with a short header, to `path`.
pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    format!(
        "# Configuration for {APP_NAME}\n# File: {}\n# The provider key may also come from {API_KEY_ENV}.\n\n",
        path.display()
    )
}

pub fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

pub fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

/// `STREAMCHAT`, the prefix for environment overrides.
pub fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_round_trips_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        write_default_config(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Configuration for streamchat"));

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.provider.timeout_secs, 120);
        assert_eq!(config.sessions.idle_ttl_secs, 86400);
        assert!(config.provider.api_key.is_none());
    }

    #[test]
    fn test_file_values_override_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[server]
port = 9090

[provider]
model = "gpt-4o"
api_key = "sk-from-file"
timeout_secs = 30

[sessions]
idle_ttl_secs = 0
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.provider.model, "gpt-4o");
        assert_eq!(config.provider.round_timeout(), Duration::from_secs(30));
        assert_eq!(config.sessions.idle_ttl(), None);
        assert_eq!(config.provider.api_key().as_deref(), Some("sk-from-file"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.ui.title, "Streamchat");
    }

    #[test]
    fn test_resolve_api_key() {
        assert_eq!(resolve_api_key(Some("sk-a"), Some("sk-b".into())).as_deref(), Some("sk-a"));
        assert_eq!(resolve_api_key(Some("  "), Some("sk-b".into())).as_deref(), Some("sk-b"));
        assert_eq!(resolve_api_key(None, Some(" ".into())), None);
        assert_eq!(resolve_api_key(None, None), None);
    }

    #[test]
    fn test_client_config_carries_provider_settings() {
        let provider = ProviderConfig {
            base_url: "http://localhost:1234/v1".into(),
            temperature: Some(0.2),
            ..ProviderConfig::default()
        };
        let client = provider.client_config("sk-x".into());
        assert_eq!(client.base_url, "http://localhost:1234/v1");
        assert_eq!(client.temperature, Some(0.2));
        assert_eq!(client.api_key, "sk-x");
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(env_prefix(), "STREAMCHAT");
    }

    #[test]
    fn test_config_dir_override_resolves_file() {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::discover(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(paths.config_file, dir.path().join("config.toml"));

        let file = dir.path().join("custom.toml");
        let paths = AppPaths::discover(Some(file.clone())).unwrap();
        assert_eq!(paths.config_file, file);
    }

    #[test]
    fn test_default_config_has_no_unused_sections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        write_default_config(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        for section in ["[logging]", "[server]", "[provider]", "[sessions]", "[ui]"] {
            assert!(text.contains(section), "missing {section}");
        }
        assert!(!text.contains("profile"));
        assert!(!text.contains("[paths]"));
        assert!(!text.contains("data_dir"));
    }
}
