// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! When `BACKEND_URL` is unset the service runs fully offline against the
//! in-memory store and broker.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default storage bucket for waypoint photos.
pub const DEFAULT_PHOTO_BUCKET: &str = "route-photos";
/// Default storage bucket for uploaded GPX files.
pub const DEFAULT_GPX_BUCKET: &str = "gpx-files";

/// Geolocation acquisition settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoConfig {
    /// Timeout for the one-shot fix taken on start/resume
    pub fix_timeout: Duration,
    /// Per-fix timeout for the continuous watch
    pub watch_timeout: Duration,
    /// Oldest cached fix that may be reused
    pub max_age: Duration,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            fix_timeout: Duration::from_millis(10_000),
            watch_timeout: Duration::from_millis(5_000),
            max_age: Duration::from_millis(1_000),
        }
    }
}

/// Where row changes come from when a backend is configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RealtimeTransport {
    /// The backend's realtime websocket.
    #[default]
    Socket,
    /// Database webhook calls into `/webhooks/friendships`.
    Webhook,
}

impl FromStr for RealtimeTransport {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "socket" => Ok(Self::Socket),
            "webhook" => Ok(Self::Webhook),
            _ => Err(()),
        }
    }
}

/// Realtime connection settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealtimeConfig {
    pub transport: RealtimeTransport,
    /// Heartbeat period on the realtime socket
    pub heartbeat: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            transport: RealtimeTransport::Socket,
            heartbeat: Duration::from_millis(25_000),
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(10_000),
            max_attempts: 3,
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// Hosted backend base URL (REST, storage). `None` runs offline.
    pub backend_url: Option<String>,
    /// Public API key sent with every backend request
    pub backend_anon_key: String,
    /// Shared secret expected on database webhook calls
    pub webhook_secret: Option<String>,
    pub photo_bucket: String,
    pub gpx_bucket: String,
    pub geo: GeoConfig,
    pub realtime: RealtimeConfig,
}

impl Config {
    /// Config for tests: offline mode with a known webhook secret.
    pub fn test_default() -> Self {
        Self {
            port: 8080,
            frontend_url: "http://localhost:5173".to_string(),
            backend_url: None,
            backend_anon_key: String::new(),
            webhook_secret: Some("test_webhook_secret".to_string()),
            photo_bucket: DEFAULT_PHOTO_BUCKET.to_string(),
            gpx_bucket: DEFAULT_GPX_BUCKET.to_string(),
            geo: GeoConfig::default(),
            realtime: RealtimeConfig::default(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let backend_url = env::var("BACKEND_URL")
            .ok()
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty());

        let backend_anon_key = match &backend_url {
            Some(_) => env::var("BACKEND_ANON_KEY")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("BACKEND_ANON_KEY"))?,
            None => String::new(),
        };

        Ok(Self {
            port: parse_env("PORT", 8080)?,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            backend_url,
            backend_anon_key,
            webhook_secret: env::var("WEBHOOK_SECRET")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            photo_bucket: env::var("PHOTO_BUCKET")
                .unwrap_or_else(|_| DEFAULT_PHOTO_BUCKET.to_string()),
            gpx_bucket: env::var("GPX_BUCKET").unwrap_or_else(|_| DEFAULT_GPX_BUCKET.to_string()),
            geo: GeoConfig {
                fix_timeout: millis_env("GEO_FIX_TIMEOUT_MS", 10_000)?,
                watch_timeout: millis_env("GEO_WATCH_TIMEOUT_MS", 5_000)?,
                max_age: millis_env("GEO_MAX_AGE_MS", 1_000)?,
            },
            realtime: RealtimeConfig {
                transport: parse_env("REALTIME_TRANSPORT", RealtimeTransport::Socket)?,
                heartbeat: millis_env("REALTIME_HEARTBEAT_MS", 25_000)?,
                base_delay: millis_env("REALTIME_BASE_DELAY_MS", 1_000)?,
                max_delay: millis_env("REALTIME_MAX_DELAY_MS", 10_000)?,
                max_attempts: parse_env("REALTIME_MAX_ATTEMPTS", 3)?,
            },
        })
    }

    /// Whether a hosted backend is configured.
    pub fn is_offline(&self) -> bool {
        self.backend_url.is_none()
    }
}

fn parse_env<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, raw)),
        Err(_) => Ok(default),
    }
}

fn millis_env(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    parse_env(name, default_ms).map(Duration::from_millis)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}
