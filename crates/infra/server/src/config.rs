//! Service configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use subwatch_webhook_handlers::SubtitleDefaults;
use subwatch_webhooks::{DispatcherConfig, InboundConfig};

/// Complete webhook service configuration, as read from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Outgoing dispatcher settings.
    pub dispatcher: DispatcherConfig,
    /// Inbound router settings.
    pub inbound: InboundConfig,
    /// Input validation applied by every source handler.
    pub validation: ValidationConfig,
    /// Inbound sources to enable.
    pub sources: SourcesConfig,
}

/// Input validation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Directories media paths must live under. Empty allows any absolute path.
    pub media_roots: Vec<PathBuf>,
    /// Provider names accepted from payloads. Empty allows any well-formed name.
    pub known_providers: Vec<String>,
}

/// Enabled inbound sources. A missing table leaves the source unregistered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub sonarr: Option<SourceConfig>,
    pub radarr: Option<SourceConfig>,
    pub custom: Option<SourceConfig>,
}

/// One inbound source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Shared secret for `X-Hub-Signature-256`.
    pub secret: Option<String>,
    /// Subtitle language requested for imported files.
    pub language: String,
    /// Subtitle provider queried for imported files.
    pub provider: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        let defaults = SubtitleDefaults::default();
        Self {
            secret: None,
            language: defaults.language,
            provider: defaults.provider,
        }
    }
}

impl SourceConfig {
    pub fn subtitle_defaults(&self) -> SubtitleDefaults {
        SubtitleDefaults::new(&self.language, &self.provider)
    }
}

/// Loads configuration from a TOML file.
pub fn load_config(path: impl AsRef<Path>) -> Result<ServiceConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::IoError(format!("{}: {e}", path.display())))?;
    parse_config(&content)
}

/// Parses configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ServiceConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use subwatch_webhooks::DeliveryMode;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.dispatcher.history_capacity, 1000);
        assert_eq!(config.inbound.max_payload_bytes, 1024 * 1024);
        assert!(config.sources.sonarr.is_none());
    }

    #[test]
    fn test_parse_full() {
        let config = parse_config(
            r#"
            [dispatcher]
            mode = "sync"
            default_max_retries = 5

            [dispatcher.url_policy]
            resolve_hosts = false

            [inbound]
            allowed_ips = ["10.0.0.0/8", "192.168.1.20"]
            require_signature = true

            [inbound.rate_limit]
            max_tokens = 30

            [validation]
            media_roots = ["/media/tv", "/media/movies"]
            known_providers = ["opensubtitles"]

            [sources.sonarr]
            secret = "s3cret"
            language = "de"

            [sources.custom]
            "#,
        )
        .unwrap();

        assert_eq!(config.dispatcher.mode, DeliveryMode::Sync);
        assert_eq!(config.dispatcher.default_max_retries, 5);
        assert!(!config.dispatcher.url_policy.resolve_hosts);
        assert!(!config.dispatcher.url_policy.allow_http);
        assert_eq!(config.inbound.allowed_ips.len(), 2);
        assert_eq!(config.inbound.rate_limit.max_tokens, 30);
        assert_eq!(config.inbound.rate_limit.interval_secs, 60);
        assert_eq!(config.validation.media_roots.len(), 2);

        let sonarr = config.sources.sonarr.unwrap();
        assert_eq!(sonarr.secret.as_deref(), Some("s3cret"));
        assert_eq!(sonarr.language, "de");
        assert_eq!(sonarr.provider, "opensubtitles");
        assert!(config.sources.radarr.is_none());
        assert!(config.sources.custom.is_some());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            parse_config("[dispatcher]\nmode = \"eventually\""),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_config("/nonexistent/subwatch.toml"),
            Err(ConfigError::IoError(_))
        ));
    }
}
