//! Configuration file handling.
//!
//! Settings come from a `.flockroll.toml` file and are then overridden by
//! command-line flags and environment variables.

use crate::auth::AuthSession;
use crate::cli::{Args, OutputFormat};
use crate::models::ChurchId;
use crate::retry::{RetryPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_RETRIES};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file looked up in the current directory.
pub const CONFIG_FILE_NAME: &str = ".flockroll.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub sms: SmsConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Church to operate on when `--church` is not given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub church_id: Option<ChurchId>,

    #[serde(default)]
    pub format: OutputFormat,

    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// JSON data file on this machine.
    #[default]
    Local,
    /// Hosted REST backend.
    Remote,
}

/// Where church data lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    /// Data file of the local backend.
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,

    /// Base URL of the hosted backend.
    #[serde(default)]
    pub url: String,

    /// Public API key sent with every hosted backend request.
    #[serde(default)]
    pub anon_key: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            data_file: default_data_file(),
            url: String::new(),
            anon_key: String::new(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_data_file() -> PathBuf {
    PathBuf::from("flockroll_data.json")
}

fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Device-local follow-up store.
    #[serde(default = "default_follow_up_file")]
    pub follow_up_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            follow_up_file: default_follow_up_file(),
        }
    }
}

fn default_follow_up_file() -> PathBuf {
    crate::followup::FollowUpTracker::default_path(Path::new("."))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmsConfig {
    /// URL of the server-side messaging function. Defaults to the
    /// `send-sms` function of the hosted backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

/// A saved sign-in, restored at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values given on the command line (or through their environment
    /// variables) override the file.
    pub fn merge_with_args(&mut self, args: &Args) {
        if let Some(church) = args.church {
            self.general.church_id = Some(church);
        }
        if let Some(format) = args.format {
            self.general.format = format;
        }
        if args.verbose {
            self.general.verbose = true;
        }
        if let Some(ref token) = args.access_token {
            self.auth.access_token = Some(token.clone());
        }
    }

    /// Where SMS requests are posted.
    pub fn sms_function_url(&self) -> Option<String> {
        self.sms.function_url.clone().or_else(|| {
            (!self.backend.url.is_empty()).then(|| {
                format!("{}/functions/v1/send-sms", self.backend.url.trim_end_matches('/'))
            })
        })
    }

    /// The session to restore, if a token is configured.
    pub fn restored_session(&self) -> Option<AuthSession> {
        let token = self.auth.access_token.clone()?;
        Some(AuthSession {
            user_id: self.auth.user_id.clone().unwrap_or_default(),
            email: None,
            access_token: token,
            church_id: self.general.church_id,
        })
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.backend.kind, BackendKind::Local);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.policy().base_delay, Duration::from_millis(800));
        assert!(config
            .storage
            .follow_up_file
            .ends_with("flockroll_follow_ups.json"));
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
church_id = 7
format = "json"

[backend]
kind = "remote"
url = "https://example.supabase.co/"
anon_key = "public-key"

[retry]
max_retries = 0
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.church_id, Some(7));
        assert_eq!(config.general.format, OutputFormat::Json);
        assert_eq!(config.backend.kind, BackendKind::Remote);
        assert_eq!(config.backend.timeout_seconds, 30);
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.retry.base_delay_ms, 800);
        assert_eq!(
            config.sms_function_url().as_deref(),
            Some("https://example.supabase.co/functions/v1/send-sms")
        );
    }

    #[test]
    fn test_merge_with_args() {
        let mut config: Config = toml::from_str("[general]\nchurch_id = 1\n").unwrap();
        let args = Args::try_parse_from([
            "flockroll",
            "--church",
            "5",
            "--format",
            "json",
            "--access-token",
            "tok",
            "absentees",
        ])
        .unwrap();

        config.merge_with_args(&args);
        assert_eq!(config.general.church_id, Some(5));
        assert_eq!(config.general.format, OutputFormat::Json);

        let session = config.restored_session().unwrap();
        assert_eq!(session.access_token, "tok");
        assert_eq!(session.church_id, Some(5));
    }

    #[test]
    fn test_file_values_survive_missing_flags() {
        let mut config: Config = toml::from_str("[general]\nchurch_id = 3\nformat = \"json\"\n").unwrap();
        let args = Args::try_parse_from(["flockroll", "absentees"]).unwrap();

        config.merge_with_args(&args);
        assert_eq!(config.general.church_id, Some(3));
        assert_eq!(config.general.format, OutputFormat::Json);
        assert!(config.restored_session().is_none());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[backend]"));
        assert!(toml_str.contains("[retry]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.backend.data_file, PathBuf::from("flockroll_data.json"));
    }
}
