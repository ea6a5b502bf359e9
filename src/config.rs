//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nested keys)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Converting between Rust structs and TOML/JSON/environment data
//! - **derive macros**: Generate Debug, Clone, Serialize, Deserialize automatically
//! - **Option<T>**: Optional values such as the API key, which may be absent
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Special environment variables (HOST, PORT, API_KEY, GEMINI_API_KEY)
//! 2. Prefixed environment variables (APP_SERVER__PORT, APP_LIVE__VOICE_NAME, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::live::endpoint::SessionConfig;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub live: LiveConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Settings for the remote conversational endpoint and the voice persona.
///
/// ## Fields:
/// - `endpoint_url`: WebSocket URL of the bidirectional streaming service
/// - `model`: Native-audio model used for live conversations
/// - `voice_name`: Prebuilt voice the assistant speaks with
/// - `system_instruction`: Persona prompt sent with every session setup
/// - `api_key`: Credential appended to the endpoint URL (never echoed back)
/// - `open_timeout_ms`: How long to wait for the endpoint to acknowledge setup
/// - `capture_block_size`: Samples per microphone block the client should send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    pub endpoint_url: String,
    pub model: String,
    pub voice_name: String,
    pub system_instruction: String,
    pub api_key: Option<String>,
    pub open_timeout_ms: u64,
    pub capture_block_size: usize,
}

/// Connection limits and heartbeat tuning.
///
/// ## Fields:
/// - `max_concurrent_sessions`: Live WebSocket connections accepted at once
/// - `heartbeat_interval_secs`: How often the server pings the client
/// - `client_timeout_secs`: Silence after which a client is disconnected
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            live: LiveConfig {
                endpoint_url: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
                model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
                voice_name: "Puck".to_string(),
                system_instruction: "You are a helpful, high-end AI shopping assistant for AI Genie Shop. Speak naturally and concisely.".to_string(),
                api_key: None,
                open_timeout_ms: 10_000,
                capture_block_size: 4096,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_LIVE__VOICE_NAME=Kore`: Override the assistant voice
    /// - `HOST=0.0.0.0` / `PORT=3000`: Deployment platform conventions
    /// - `API_KEY=...` or `GEMINI_API_KEY=...`: Endpoint credential
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        // GEMINI_API_KEY wins over the generic API_KEY when both are set
        if let Some(key) = env::var("GEMINI_API_KEY").ok().or_else(|| env::var("API_KEY").ok()) {
            settings = settings.set_override("live.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.performance.heartbeat_interval_secs == 0
            || self.performance.client_timeout_secs <= self.performance.heartbeat_interval_secs
        {
            return Err(anyhow::anyhow!(
                "Client timeout must be longer than a non-zero heartbeat interval"
            ));
        }

        if !self.live.endpoint_url.starts_with("ws://") && !self.live.endpoint_url.starts_with("wss://") {
            return Err(anyhow::anyhow!("Endpoint URL must use ws:// or wss://"));
        }

        if self.live.model.trim().is_empty() || self.live.voice_name.trim().is_empty() {
            return Err(anyhow::anyhow!("Model and voice name must not be empty"));
        }

        if self.live.open_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Open timeout must be greater than 0"));
        }

        if self.live.capture_block_size == 0 {
            return Err(anyhow::anyhow!("Capture block size must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial JSON update (used by `PUT /api/v1/config`).
    ///
    /// Only the fields present in the JSON are changed, e.g.
    /// `{"live": {"voice_name": "Kore"}}` changes just the voice.
    /// The API key cannot be changed at runtime.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Server port {} is out of range", port))?;
            }
        }

        if let Some(live) = partial_config.get("live") {
            if let Some(url) = live.get("endpoint_url").and_then(|v| v.as_str()) {
                self.live.endpoint_url = url.to_string();
            }
            if let Some(model) = live.get("model").and_then(|v| v.as_str()) {
                self.live.model = model.to_string();
            }
            if let Some(voice) = live.get("voice_name").and_then(|v| v.as_str()) {
                self.live.voice_name = voice.to_string();
            }
            if let Some(instruction) = live.get("system_instruction").and_then(|v| v.as_str()) {
                self.live.system_instruction = instruction.to_string();
            }
            if let Some(timeout) = live.get("open_timeout_ms").and_then(|v| v.as_u64()) {
                self.live.open_timeout_ms = timeout;
            }
            if let Some(block) = live.get("capture_block_size").and_then(|v| v.as_u64()) {
                self.live.capture_block_size = block as usize;
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance.get("max_concurrent_sessions").and_then(|v| v.as_u64()) {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
            if let Some(interval) = performance.get("heartbeat_interval_secs").and_then(|v| v.as_u64()) {
                self.performance.heartbeat_interval_secs = interval;
            }
            if let Some(timeout) = performance.get("client_timeout_secs").and_then(|v| v.as_u64()) {
                self.performance.client_timeout_secs = timeout;
            }
        }

        self.validate()?;
        Ok(())
    }

    /// Session parameters negotiated with the endpoint for a new live session.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(
            self.live.model.clone(),
            self.live.voice_name.clone(),
            self.live.system_instruction.clone(),
        )
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.live.open_timeout_ms)
    }

    /// Whether an endpoint credential is configured (reported by health checks).
    pub fn has_api_key(&self) -> bool {
        self.live
            .api_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.live.voice_name, "Puck");
        assert_eq!(config.live.capture_block_size, 4096);
        assert!(!config.has_api_key());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.live.endpoint_url = "https://example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.client_timeout_secs = config.performance.heartbeat_interval_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "live": {"voice_name": "Kore"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.live.voice_name, "Kore");
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_config_update_rejects_out_of_range_port() {
        let mut config = AppConfig::default();
        assert!(config.update_from_json(r#"{"server": {"port": 70000}}"#).is_err());
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_session_config_uses_fixed_formats() {
        let config = AppConfig::default();
        let session = config.session_config();
        assert_eq!(session.voice_name, "Puck");
        assert_eq!(session.input_sample_rate, 16_000);
        assert_eq!(session.output_sample_rate, 24_000);
        assert_eq!(session.channels, 1);
    }
}
