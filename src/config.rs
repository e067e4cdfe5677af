//! Gateway-Konfiguration
//!
//! Alle Einstellungen kommen aus Umgebungsvariablen (optional über eine
//! `.env` Datei, siehe `main.rs`). Fehlende Werte fallen auf Defaults zurück,
//! ungültige Werte sind ein Startfehler.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// DEFAULTS
// ============================================================================

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.0-flash-preview-image-generation";
pub const DEFAULT_IMAGE_DIR: &str = "generated_images";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

// ============================================================================
// GATEWAY CONFIG
// ============================================================================

/// Laufzeit-Konfiguration des Gateways
#[derive(Clone)]
pub struct GatewayConfig {
    pub host: IpAddr,
    pub port: u16,
    /// API-Key für Gemini (Live + REST). Ohne Key schlagen Verbindungen fehl.
    pub api_key: Option<String>,
    pub live_url: String,
    pub api_base: String,
    pub image_model: String,
    pub image_output_dir: PathBuf,
    pub stun_servers: Vec<String>,
    /// Pause zwischen Trennen und Neuverbinden bei UPDATE_CONFIG
    pub reconfigure_delay: Duration,
    /// Obergrenze für das Schließen einer Upstream-Session
    pub upstream_close_timeout: Duration,
    /// Upstream-Logs als LOG_MESSAGE an den Client weiterleiten
    pub forward_upstream_logs: bool,
}

impl GatewayConfig {
    /// Liest die Konfiguration aus der Prozess-Umgebung
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Liest die Konfiguration über eine beliebige Lookup-Funktion
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let host = match get("GATEWAY_HOST") {
            Some(v) => parse_value("GATEWAY_HOST", &v)?,
            None => defaults.host,
        };
        let port = match get("PORT") {
            Some(v) => parse_value("PORT", &v)?,
            None => defaults.port,
        };
        let reconfigure_delay = match get("RECONFIGURE_DELAY_MS") {
            Some(v) => Duration::from_millis(parse_value("RECONFIGURE_DELAY_MS", &v)?),
            None => defaults.reconfigure_delay,
        };
        let upstream_close_timeout = match get("UPSTREAM_CLOSE_TIMEOUT_MS") {
            Some(v) => Duration::from_millis(parse_value("UPSTREAM_CLOSE_TIMEOUT_MS", &v)?),
            None => defaults.upstream_close_timeout,
        };
        let forward_upstream_logs = match get("FORWARD_UPSTREAM_LOGS") {
            Some(v) => parse_bool("FORWARD_UPSTREAM_LOGS", &v)?,
            None => defaults.forward_upstream_logs,
        };
        let stun_servers = match get("STUN_SERVERS") {
            Some(v) => v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.stun_servers,
        };

        Ok(Self {
            host,
            port,
            api_key: get("GEMINI_API_KEY"),
            live_url: get("GEMINI_LIVE_URL").unwrap_or(defaults.live_url),
            api_base: get("GEMINI_API_BASE").unwrap_or(defaults.api_base),
            image_model: get("IMAGE_MODEL").unwrap_or(defaults.image_model),
            image_output_dir: get("IMAGE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.image_output_dir),
            stun_servers,
            reconfigure_delay,
            upstream_close_timeout,
            forward_upstream_logs,
        })
    }

    /// Adresse für den TCP-Listener
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            api_key: None,
            live_url: DEFAULT_LIVE_URL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            image_output_dir: PathBuf::from(DEFAULT_IMAGE_DIR),
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            reconfigure_delay: Duration::from_millis(100),
            upstream_close_timeout: Duration::from_millis(2000),
            forward_upstream_logs: true,
        }
    }
}

// Der API-Key darf nicht im Log landen
impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("listen", &self.listen_addr())
            .field("api_key_set", &self.api_key.is_some())
            .field("live_url", &self.live_url)
            .field("image_model", &self.image_model)
            .field("stun_servers", &self.stun_servers)
            .field("reconfigure_delay", &self.reconfigure_delay)
            .finish()
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = GatewayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 3001);
        assert_eq!(config.api_key, None);
        assert_eq!(config.stun_servers, vec![DEFAULT_STUN_SERVER.to_string()]);
        assert_eq!(config.reconfigure_delay, Duration::from_millis(100));
        assert!(config.forward_upstream_logs);
    }

    #[test]
    fn overrides_are_applied() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("GEMINI_API_KEY", "secret"),
            ("STUN_SERVERS", "stun:a:1, stun:b:2,"),
            ("RECONFIGURE_DELAY_MS", "250"),
            ("FORWARD_UPSTREAM_LOGS", "off"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.stun_servers, vec!["stun:a:1", "stun:b:2"]);
        assert_eq!(config.reconfigure_delay, Duration::from_millis(250));
        assert!(!config.forward_upstream_logs);
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let config = GatewayConfig::from_lookup(lookup(&[("GEMINI_API_KEY", "  ")])).unwrap();
        assert_eq!(config.api_key, None);
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = GatewayConfig::from_lookup(lookup(&[("PORT", "abc")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "PORT",
                value: "abc".to_string()
            }
        );
    }

    #[test]
    fn debug_output_hides_api_key() {
        let config = GatewayConfig::from_lookup(lookup(&[("GEMINI_API_KEY", "secret")])).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("api_key_set: true"));
    }
}
