//! Configuration loader and validator for the review workflow daemon.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub mail: Mail,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_ms: u64,
    pub drain_batch_size: u32,
}

/// Outbound mail settings. `endpoint` is the HTTP transport the daemon
/// posts rendered messages to; delivery itself is out of process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mail {
    pub endpoint: String,
    pub token: String,
    pub from_name: String,
    pub site_url: String,
    pub moderator_email: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if cfg.app.drain_batch_size == 0 {
        return Err(ConfigError::Invalid("app.drain_batch_size must be > 0"));
    }

    if cfg.mail.endpoint.trim().is_empty() {
        return Err(ConfigError::Invalid("mail.endpoint must be non-empty"));
    }
    if cfg.mail.token.trim().is_empty() {
        return Err(ConfigError::Invalid("mail.token must be non-empty"));
    }
    if cfg.mail.from_name.trim().is_empty() {
        return Err(ConfigError::Invalid("mail.from_name must be non-empty"));
    }
    if cfg.mail.site_url.trim().is_empty() {
        return Err(ConfigError::Invalid("mail.site_url must be non-empty"));
    }
    if cfg.mail.moderator_email.trim().is_empty() {
        return Err(ConfigError::Invalid("mail.moderator_email must be non-empty"));
    }

    Ok(())
}

/// Canonical example configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 500
  drain_batch_size: 5

mail:
  endpoint: "https://mail.example.com/send"
  token: "YOUR_MAIL_API_TOKEN"
  from_name: "Portfolio Blog"
  site_url: "https://example.com"
  moderator_email: "admin@example.com"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
    }

    #[test]
    fn invalid_mail_fields() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.mail.endpoint = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("mail.endpoint")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.mail.moderator_email = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("moderator_email")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_app_fields() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.poll_interval_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.drain_batch_size = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.mail.moderator_email, "admin@example.com");
    }
}
