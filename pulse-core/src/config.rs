use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PulseConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotificationConfig {
    /// Empty or absent disables notifications entirely.
    pub webhook_url: Option<String>,
    pub request_timeout_seconds: u64,
    pub delivery_timeout_seconds: u64,
    pub shutdown_timeout_seconds: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            request_timeout_seconds: 5,
            delivery_timeout_seconds: 30,
            shutdown_timeout_seconds: 5,
        }
    }
}

impl NotificationConfig {
    pub fn destination(&self) -> NotificationDestination {
        match self.webhook_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => NotificationDestination::Webhook(url.to_string()),
            _ => NotificationDestination::Disabled,
        }
    }
}

/// Where transition notifications go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationDestination {
    Disabled,
    Webhook(String),
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SweeperConfig {
    pub interval_seconds: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl PulseConfig {
    /// Load from an optional TOML file, then overlay `PULSE__SECTION__KEY` env vars.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("PULSE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_disable_notifications() {
        let config = PulseConfig::default();
        assert_eq!(config.notification.destination(), NotificationDestination::Disabled);
        assert_eq!(config.sweeper.interval_seconds, 60);
        assert_eq!(config.notification.delivery_timeout_seconds, 30);
        assert!(config.database.is_none());
    }

    #[test]
    fn test_blank_webhook_url_is_disabled() {
        let config = NotificationConfig {
            webhook_url: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(config.destination(), NotificationDestination::Disabled);
    }

    #[test]
    fn test_webhook_url_is_destination() {
        let config = NotificationConfig {
            webhook_url: Some("https://hooks.example.com/x".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.destination(),
            NotificationDestination::Webhook("https://hooks.example.com/x".to_string())
        );
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = PulseConfig::load("does-not-exist-pulse.toml").unwrap();
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.http.host, "127.0.0.1");
    }
}
