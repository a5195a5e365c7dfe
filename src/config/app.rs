//! Main application configuration
//!
//! This module defines the primary configuration structures for the
//! practice-room coordinator, including environment variable loading,
//! TOML file support, and validation.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub matchmaking: MatchmakingSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port for the WebSocket gateway and health/metrics endpoints
    pub http_port: u16,
    /// Host to bind to
    pub host: String,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Matchmaking-specific settings
///
/// The offer window and reconnection grace window are deliberately
/// configuration rather than constants; the protocol does not fix them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// How long both parties have to accept an offer, in seconds
    pub offer_window_seconds: u64,
    /// How long a dropped connection is tolerated before the user is gone
    pub grace_window_seconds: u64,
    /// Interval between timeout sweeps, in milliseconds
    pub sweep_interval_ms: u64,
    /// Upper bound on caller-supplied request timeouts, in seconds
    pub max_request_timeout_seconds: u64,
    /// How long ended sessions are kept for idempotent end handling
    pub ended_session_retention_seconds: u64,
    /// How long a finished pairing stays eligible for a rematch
    pub rematch_window_seconds: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "practice-room".to_string(),
            log_level: "info".to_string(),
            http_port: 8080,
            host: "0.0.0.0".to_string(),
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            offer_window_seconds: 30,
            grace_window_seconds: 30,
            sweep_interval_ms: 1000,
            max_request_timeout_seconds: 300, // 5 minutes
            ended_session_retention_seconds: 300,
            rematch_window_seconds: 600, // 10 minutes
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            config.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.service.log_level = log_level;
        }
        if let Ok(port) = env::var("HTTP_PORT") {
            config.service.http_port = port
                .parse()
                .map_err(|_| anyhow!("Invalid HTTP_PORT value: {}", port))?;
        }
        if let Ok(host) = env::var("HTTP_HOST") {
            config.service.host = host;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECONDS") {
            config.service.shutdown_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid SHUTDOWN_TIMEOUT_SECONDS value: {}", timeout))?;
        }

        // Matchmaking settings
        if let Ok(window) = env::var("OFFER_WINDOW_SECONDS") {
            config.matchmaking.offer_window_seconds = window
                .parse()
                .map_err(|_| anyhow!("Invalid OFFER_WINDOW_SECONDS value: {}", window))?;
        }
        if let Ok(grace) = env::var("GRACE_WINDOW_SECONDS") {
            config.matchmaking.grace_window_seconds = grace
                .parse()
                .map_err(|_| anyhow!("Invalid GRACE_WINDOW_SECONDS value: {}", grace))?;
        }
        if let Ok(sweep) = env::var("SWEEP_INTERVAL_MS") {
            config.matchmaking.sweep_interval_ms = sweep
                .parse()
                .map_err(|_| anyhow!("Invalid SWEEP_INTERVAL_MS value: {}", sweep))?;
        }
        if let Ok(max_timeout) = env::var("MAX_REQUEST_TIMEOUT_SECONDS") {
            config.matchmaking.max_request_timeout_seconds = max_timeout
                .parse()
                .map_err(|_| anyhow!("Invalid MAX_REQUEST_TIMEOUT_SECONDS value: {}", max_timeout))?;
        }
        if let Ok(retention) = env::var("ENDED_SESSION_RETENTION_SECONDS") {
            config.matchmaking.ended_session_retention_seconds = retention.parse().map_err(|_| {
                anyhow!("Invalid ENDED_SESSION_RETENTION_SECONDS value: {}", retention)
            })?;
        }
        if let Ok(rematch) = env::var("REMATCH_WINDOW_SECONDS") {
            config.matchmaking.rematch_window_seconds = rematch
                .parse()
                .map_err(|_| anyhow!("Invalid REMATCH_WINDOW_SECONDS value: {}", rematch))?;
        }

        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        validate_config(&config)?;
        Ok(config)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get sweep interval as Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.matchmaking.sweep_interval_ms)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    // Validate ports
    if config.service.http_port == 0 {
        return Err(anyhow!("HTTP port cannot be 0"));
    }

    // Validate timeouts
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }
    if config.matchmaking.offer_window_seconds == 0 {
        return Err(anyhow!("Offer window must be greater than 0"));
    }
    if config.matchmaking.grace_window_seconds == 0 {
        return Err(anyhow!("Grace window must be greater than 0"));
    }
    if config.matchmaking.sweep_interval_ms == 0 {
        return Err(anyhow!("Sweep interval must be greater than 0"));
    }
    if config.matchmaking.max_request_timeout_seconds == 0 {
        return Err(anyhow!("Max request timeout must be greater than 0"));
    }

    Ok(())
}
