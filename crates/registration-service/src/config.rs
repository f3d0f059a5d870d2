//! Configuration for the registration service.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// One-time code policy
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Captured image limits
    #[serde(default)]
    pub documents: DocumentsConfig,

    /// Signal API configuration (code delivery)
    #[serde(default)]
    pub signal: SignalConfig,

    /// Biometric matcher configuration
    #[serde(default)]
    pub matcher: MatcherConfig,

    /// Submitted registration archive
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Registration session bookkeeping
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerificationConfig {
    /// How long an issued code stays valid
    #[serde(default = "default_code_ttl", with = "humantime_serde")]
    pub code_ttl: Duration,

    /// Wrong guesses allowed before a code is locked
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// How often the code reaper runs
    #[serde(default = "default_reaper_interval", with = "humantime_serde")]
    pub reaper_interval: Duration,

    /// How long finished codes are kept before the reaper drops them
    #[serde(default = "default_retention", with = "humantime_serde")]
    pub retention: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentsConfig {
    /// Upper bound for an inline image payload
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalConfig {
    /// Signal CLI REST API URL
    #[serde(default = "default_signal_api_url")]
    pub api_url: String,

    /// Registered account that sends verification codes
    #[serde(default)]
    pub sender_number: Option<String>,

    /// Deliver codes over Signal (if false, codes are only recorded in memory)
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatcherConfig {
    /// Biometric matcher base URL
    #[serde(default = "default_matcher_url")]
    pub url: String,

    /// Per-comparison timeout
    #[serde(default = "default_matcher_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Directory for encrypted registration files
    #[serde(default = "default_archive_path")]
    pub path: PathBuf,

    /// Enable persistence (if false, submissions are kept in memory only)
    #[serde(default = "default_true")]
    pub persist: bool,

    /// Secret the archive encryption key is derived from
    #[serde(default)]
    pub secret: Option<SecretString>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    /// Idle time after which an unsubmitted registration is discarded
    #[serde(default = "default_idle_ttl", with = "humantime_serde")]
    pub idle_ttl: Duration,

    /// How often idle sessions are swept
    #[serde(default = "default_cleanup_interval", with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Global requests per minute
    #[serde(default = "default_global_rpm")]
    pub global_per_minute: u32,

    /// Requests per minute against any single registration
    #[serde(default = "default_registration_rpm")]
    pub per_registration_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default implementations
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            code_ttl: default_code_ttl(),
            max_attempts: default_max_attempts(),
            reaper_interval: default_reaper_interval(),
            retention: default_retention(),
        }
    }
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            api_url: default_signal_api_url(),
            sender_number: None,
            enabled: true,
        }
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            url: default_matcher_url(),
            timeout: default_matcher_timeout(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            path: default_archive_path(),
            persist: true,
            secret: None,
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_ttl: default_idle_ttl(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_per_minute: default_global_rpm(),
            per_registration_per_minute: default_registration_rpm(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_listen_addr() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8082
}

fn default_code_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_reaper_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_retention() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_max_image_bytes() -> usize {
    registration_core::document::DEFAULT_MAX_IMAGE_BYTES
}

fn default_signal_api_url() -> String {
    "http://signal-api:8080".into()
}

fn default_matcher_url() -> String {
    "http://biometric-matcher:8090".into()
}

fn default_matcher_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_archive_path() -> PathBuf {
    PathBuf::from("/data/registrations")
}

fn default_idle_ttl() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_true() -> bool {
    true
}

fn default_global_rpm() -> u32 {
    60
}

fn default_registration_rpm() -> u32 {
    20
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(false),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
