use agendify_auth::server::OAuthConfiguration;
use chrono_tz::Tz;
use config::ConfigError;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::engagement::{EngagementSchedule, DEFAULT_SCHEDULES};
use crate::queue::QueueSettings;

/// Variables the deployment already sets, read as low-priority defaults.
const LEGACY_VARIABLES: [(&str, &str); 6] = [
    ("DATABASE_URL", "database.url"),
    ("CLIENT_ID", "oauth.client_id"),
    ("CLIENT_SECRET", "oauth.client_secret"),
    ("SESSION_SECRET", "server.session_secret"),
    ("PORT", "server.port"),
    ("LOG_FORMAT", "logging.format"),
];

#[derive(Debug, Deserialize, Clone)]
pub struct Configuration {
    #[serde(default)]
    pub server: ServerConfiguration,
    #[serde(default)]
    pub oauth: OAuthConfiguration,
    #[serde(default)]
    pub database: DatabaseConfiguration,
    #[serde(default)]
    pub queue: QueueConfiguration,
    #[serde(default)]
    pub engagement: EngagementConfiguration,
    #[serde(default)]
    pub api: ApiConfiguration,
    #[serde(default)]
    pub logging: LoggingConfiguration,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfiguration {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,

    /// Signs the session cookie. A random key is used when unset.
    #[serde(default)]
    pub session_secret: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DatabaseConfiguration {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfiguration {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_job_timeout")]
    pub job_timeout_seconds: u64,

    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Finished one-time jobs older than this are purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngagementConfiguration {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Six-field cron expressions, seconds first.
    #[serde(default = "default_engagement_schedules")]
    pub schedules: Vec<String>,

    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_engagement_program")]
    pub program: String,

    #[serde(default = "default_engagement_args")]
    pub args: Vec<String>,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    #[serde(default = "default_engagement_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfiguration {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfiguration {
    #[serde(default)]
    pub format: LogFormat,

    /// Also write daily-rotated log files here.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_session_ttl() -> u64 {
    600
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    10
}

fn default_job_timeout() -> u64 {
    300
}

fn default_timezone() -> String {
    "Asia/Jerusalem".to_string()
}

fn default_retention_days() -> u32 {
    7
}

fn default_true() -> bool {
    true
}

fn default_engagement_schedules() -> Vec<String> {
    DEFAULT_SCHEDULES.iter().map(|s| s.to_string()).collect()
}

fn default_engagement_program() -> String {
    "node".to_string()
}

fn default_engagement_args() -> Vec<String> {
    vec!["./scripts/update_engagement_metrics.js".to_string()]
}

fn default_engagement_timeout() -> u64 {
    600
}

fn default_api_base_url() -> String {
    x_api::BASE_URL.to_string()
}

impl Default for ServerConfiguration {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            session_ttl_seconds: default_session_ttl(),
            session_secret: None,
        }
    }
}

impl Default for QueueConfiguration {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            batch_size: default_batch_size(),
            job_timeout_seconds: default_job_timeout(),
            timezone: default_timezone(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for EngagementConfiguration {
    fn default() -> Self {
        Self {
            enabled: true,
            schedules: default_engagement_schedules(),
            timezone: default_timezone(),
            program: default_engagement_program(),
            args: default_engagement_args(),
            working_dir: None,
            timeout_seconds: default_engagement_timeout(),
        }
    }
}

impl Default for ApiConfiguration {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
        }
    }
}

impl Configuration {
    /// Load `config.toml` (if present) and `AGENDIFY__*` variables, which
    /// take precedence over it.
    pub fn new() -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        for (variable, key) in LEGACY_VARIABLES {
            if let Ok(value) = std::env::var(variable) {
                builder = builder.set_default(key, value)?;
            }
        }

        if std::path::Path::new("config.toml").exists() {
            builder = builder.add_source(config::File::with_name("config"));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("AGENDIFY")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("engagement.schedules")
                .with_list_parse_key("engagement.args")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// Checks that cannot be expressed as serde defaults. A missing database
    /// URL is the one unrecoverable startup condition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Message("DATABASE_URL is not set".to_string()));
        }
        if self.oauth.client_id.is_empty() {
            tracing::warn!("OAuth client id is not set; authorization will fail at the provider");
        }
        self.queue_settings()?;
        if self.engagement.enabled {
            self.engagement_schedule()?;
        }
        Ok(())
    }

    pub fn queue_settings(&self) -> Result<QueueSettings, ConfigError> {
        if self.queue.batch_size == 0 {
            return Err(ConfigError::Message(
                "queue.batch_size must be at least 1".to_string(),
            ));
        }

        Ok(QueueSettings {
            poll_interval: Duration::from_millis(self.queue.poll_interval_ms.max(1)),
            batch_size: self.queue.batch_size,
            job_timeout: Duration::from_secs(self.queue.job_timeout_seconds),
            timezone: parse_timezone(&self.queue.timezone)?,
        })
    }

    pub fn engagement_schedule(&self) -> Result<EngagementSchedule, ConfigError> {
        let timezone = parse_timezone(&self.engagement.timezone)?;
        EngagementSchedule::new(&self.engagement.schedules, timezone)
            .map_err(|e| ConfigError::Message(format!("engagement: {}", e)))
    }
}

fn parse_timezone(name: &str) -> Result<Tz, ConfigError> {
    name.parse::<Tz>()
        .map_err(|e| ConfigError::Message(format!("Invalid timezone '{}': {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [oauth]
        client_id = "client-123"
        client_secret = "secret-456"

        [database]
        url = "sqlite://agendify.db"
    "#;

    #[test]
    fn minimal_file_gets_defaults() {
        let config = Configuration::from_toml(MINIMAL).unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.session_ttl_seconds, 600);
        assert_eq!(
            config.oauth.redirect_uri,
            "https://agendifyx.up.railway.app/api/auth/twitter/callback2"
        );
        assert_eq!(config.oauth.scope, "tweet.read tweet.write users.read");
        assert_eq!(
            config.engagement.schedules,
            vec!["0 30 13 * * *", "0 0 20 * * *"]
        );
        assert_eq!(config.engagement.timezone, "Asia/Jerusalem");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_database_url_is_fatal() {
        let source = r#"
            [oauth]
            client_id = "client-123"
            client_secret = "secret-456"
        "#;
        let config = Configuration::from_toml(source).unwrap();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL is not set"));
    }

    #[test]
    fn database_only_config_starts_without_credentials() {
        let config = Configuration::from_toml("[database]\nurl = \"sqlite://x.db\"\n").unwrap();

        assert!(config.oauth.client_id.is_empty());
        assert!(config.oauth.client_secret.is_empty());
        assert_eq!(config.oauth.scope, "tweet.read tweet.write users.read");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let mut config = Configuration::from_toml(MINIMAL).unwrap();
        config.queue.timezone = "Mars/Olympus_Mons".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_engagement_schedule_is_rejected_only_when_enabled() {
        let mut config = Configuration::from_toml(MINIMAL).unwrap();
        config.engagement.schedules = vec!["30 13,20 * * *".to_string()];
        assert!(config.validate().is_err());

        config.engagement.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn queue_settings_use_configured_values() {
        let source = format!(
            "{}\n[queue]\npoll_interval_ms = 250\njob_timeout_seconds = 30\ntimezone = \"UTC\"\n",
            MINIMAL
        );
        let settings = Configuration::from_toml(&source)
            .unwrap()
            .queue_settings()
            .unwrap();

        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.job_timeout, Duration::from_secs(30));
        assert_eq!(settings.timezone, Tz::UTC);
    }

    #[test]
    fn json_log_format_parses() {
        let source = format!("{}\n[logging]\nformat = \"json\"\n", MINIMAL);
        let config = Configuration::from_toml(&source).unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
