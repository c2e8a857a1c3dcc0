// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the contact intake service.
//!
//! Every value can be set through the environment (see [`Config::from_env`]).
//! A `.env` file in the working directory is honoured by the binary.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration problems detected while loading or checking [`Config`].
///
/// These are fatal at startup: the binary refuses to serve traffic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Deployment environment, read from `APP_ENV` or `NODE_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" | "" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidValue {
                key: "NODE_ENV",
                reason: format!("unknown environment {other:?}"),
            }),
        }
    }
}

/// Configuration for the contact intake service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:3000)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default)]
    pub environment: Environment,

    /// Allowed CORS origins; `*` allows any origin
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Maximum accepted request body size in bytes (default: 64 KiB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub captcha: CaptchaConfig,

    #[serde(default)]
    pub mail: MailConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Fixed window rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Window length in milliseconds (default: 15 minutes)
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Requests allowed per client per window (default: 100)
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Path prefixes that bypass the limiter
    #[serde(default = "default_skip_paths")]
    pub skip_paths: Vec<String>,

    /// Let loopback clients through without counting them
    #[serde(default)]
    pub exempt_loopback: bool,

    /// Redis URL for the shared store; in-memory store when unset
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Interval of the in-memory store purge task in seconds (default: 60)
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

/// Field-level validation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Honeypot field name (default: website)
    #[serde(default = "default_honeypot_field")]
    pub honeypot_field: String,
}

/// reCAPTCHA verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaConfig {
    #[serde(default)]
    pub secret_key: Option<String>,

    #[serde(default = "default_verify_url")]
    pub verify_url: String,

    /// Lowest accepted score for score-based (v3) tokens (default: 0.5)
    #[serde(default = "default_min_score")]
    pub min_score: f64,

    #[serde(default)]
    pub expected_hostname: Option<String>,

    #[serde(default)]
    pub expected_action: Option<String>,

    /// Payload field carrying the client token
    #[serde(default = "default_token_field")]
    pub token_field: String,

    #[serde(default = "default_captcha_timeout_ms")]
    pub timeout_ms: u64,

    /// How long verdicts stay cached (default: 300)
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

/// SMTP mail transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub smtp_host: Option<String>,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Implicit TLS instead of STARTTLS
    #[serde(default)]
    pub secure: bool,

    #[serde(default)]
    pub from: Option<String>,

    #[serde(default)]
    pub to: Option<String>,

    #[serde(default = "default_smtp_timeout_ms")]
    pub timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

/// Longest accepted rate limit window.
pub const MAX_WINDOW_MS: u64 = 7 * 24 * 60 * 60 * 1000;

fn default_window_ms() -> u64 {
    15 * 60 * 1000
}

fn default_max_requests() -> u32 {
    100
}

fn default_skip_paths() -> Vec<String> {
    ["/api/health", "/health", "/metrics", "/static/", "/assets/", "/favicon.ico"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_honeypot_field() -> String {
    "website".to_string()
}

fn default_verify_url() -> String {
    "https://www.google.com/recaptcha/api/siteverify".to_string()
}

fn default_min_score() -> f64 {
    0.5
}

fn default_token_field() -> String {
    "g-recaptcha-response".to_string()
}

fn default_captcha_timeout_ms() -> u64 {
    5000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            environment: Environment::default(),
            cors_origins: default_cors_origins(),
            max_body_bytes: default_max_body_bytes(),
            rate_limit: RateLimitConfig::default(),
            validation: ValidationConfig::default(),
            captcha: CaptchaConfig::default(),
            mail: MailConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
            skip_paths: default_skip_paths(),
            exempt_loopback: false,
            redis_url: None,
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            honeypot_field: default_honeypot_field(),
        }
    }
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            verify_url: default_verify_url(),
            min_score: default_min_score(),
            expected_hostname: None,
            expected_action: None,
            token_field: default_token_field(),
            timeout_ms: default_captcha_timeout_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            username: None,
            password: None,
            secure: false,
            from: None,
            to: None,
            timeout_ms: default_smtp_timeout_ms(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl RateLimitConfig {
    /// Get the window duration
    pub fn window_duration(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

impl CaptchaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl MailConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn is_configured(&self) -> bool {
        self.smtp_host
            .as_deref()
            .is_some_and(|h| !h.trim().is_empty())
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Unset keys fall back to defaults; set but unparsable keys are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match get("APP_ENV").or_else(|| get("NODE_ENV")) {
            Some(v) => v.parse()?,
            None => Environment::default(),
        };

        let defaults = Config::default();

        let rate_limit = RateLimitConfig {
            window_ms: parse(&get, "RATE_LIMIT_WINDOW_MS")?.unwrap_or(defaults.rate_limit.window_ms),
            max_requests: parse(&get, "RATE_LIMIT_MAX")?
                .unwrap_or(defaults.rate_limit.max_requests),
            skip_paths: get("RATE_LIMIT_SKIP_PATHS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.rate_limit.skip_paths),
            exempt_loopback: parse_bool(&get, "RATE_LIMIT_EXEMPT_LOOPBACK")?
                .unwrap_or(!environment.is_production()),
            redis_url: get("RATE_LIMIT_REDIS_URL"),
            cleanup_interval_secs: parse(&get, "RATE_LIMIT_CLEANUP_SECS")?
                .unwrap_or(defaults.rate_limit.cleanup_interval_secs),
        };

        let captcha = CaptchaConfig {
            secret_key: get("RECAPTCHA_SECRET_KEY"),
            verify_url: get("RECAPTCHA_VERIFY_URL").unwrap_or(defaults.captcha.verify_url),
            min_score: parse(&get, "RECAPTCHA_MIN_SCORE")?.unwrap_or(defaults.captcha.min_score),
            expected_hostname: get("RECAPTCHA_EXPECTED_HOSTNAME"),
            expected_action: get("RECAPTCHA_EXPECTED_ACTION"),
            token_field: get("RECAPTCHA_TOKEN_FIELD").unwrap_or(defaults.captcha.token_field),
            timeout_ms: parse(&get, "RECAPTCHA_TIMEOUT_MS")?.unwrap_or(defaults.captcha.timeout_ms),
            cache_ttl_secs: parse(&get, "RECAPTCHA_CACHE_TTL_SECS")?
                .unwrap_or(defaults.captcha.cache_ttl_secs),
        };

        let mail = MailConfig {
            smtp_host: get("SMTP_HOST"),
            smtp_port: parse(&get, "SMTP_PORT")?.unwrap_or(defaults.mail.smtp_port),
            username: get("SMTP_USER"),
            password: get("SMTP_PASS"),
            secure: parse_bool(&get, "SMTP_SECURE")?.unwrap_or(false),
            from: get("CONTACT_EMAIL_FROM"),
            to: get("CONTACT_EMAIL_TO"),
            timeout_ms: parse(&get, "SMTP_TIMEOUT_MS")?.unwrap_or(defaults.mail.timeout_ms),
        };

        Ok(Config {
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            environment,
            cors_origins: get("CORS_ORIGIN")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.cors_origins),
            max_body_bytes: parse(&get, "MAX_BODY_BYTES")?.unwrap_or(defaults.max_body_bytes),
            rate_limit,
            validation: ValidationConfig {
                honeypot_field: get("HONEYPOT_FIELD").unwrap_or(defaults.validation.honeypot_field),
            },
            captcha,
            mail,
            metrics: MetricsConfig {
                enabled: parse_bool(&get, "METRICS_ENABLED")?.unwrap_or(true),
                ..defaults.metrics
            },
        })
    }

    /// Check the configuration before serving traffic.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                key: "BIND_ADDR",
                reason: e.to_string(),
            })?;

        if self.rate_limit.window_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RATE_LIMIT_WINDOW_MS",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.rate_limit.window_ms > MAX_WINDOW_MS {
            return Err(ConfigError::InvalidValue {
                key: "RATE_LIMIT_WINDOW_MS",
                reason: format!("must be at most {MAX_WINDOW_MS} (7 days)"),
            });
        }
        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RATE_LIMIT_MAX",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.rate_limit.redis_url.is_some() && !cfg!(feature = "redis") {
            return Err(ConfigError::InvalidValue {
                key: "RATE_LIMIT_REDIS_URL",
                reason: "service was built without the `redis` feature".to_string(),
            });
        }

        if self.validation.honeypot_field.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "HONEYPOT_FIELD",
                reason: "must not be empty".to_string(),
            });
        }

        self.validate_captcha()?;
        self.validate_mail()
    }

    fn validate_captcha(&self) -> Result<(), ConfigError> {
        let captcha = &self.captcha;
        if captcha
            .secret_key
            .as_deref()
            .map_or(true, |s| s.trim().is_empty())
        {
            return Err(ConfigError::Missing("RECAPTCHA_SECRET_KEY"));
        }

        if !(0.0..=1.0).contains(&captcha.min_score) {
            return Err(ConfigError::InvalidValue {
                key: "RECAPTCHA_MIN_SCORE",
                reason: format!("{} is outside 0.0..=1.0", captcha.min_score),
            });
        }

        let url = url::Url::parse(&captcha.verify_url).map_err(|e| ConfigError::InvalidValue {
            key: "RECAPTCHA_VERIFY_URL",
            reason: e.to_string(),
        })?;
        if self.environment.is_production() && url.scheme() != "https" {
            return Err(ConfigError::InvalidValue {
                key: "RECAPTCHA_VERIFY_URL",
                reason: "must use https in production".to_string(),
            });
        }
        Ok(())
    }

    fn validate_mail(&self) -> Result<(), ConfigError> {
        if !self.mail.is_configured() {
            if self.environment.is_production() {
                return Err(ConfigError::Missing("SMTP_HOST"));
            }
            return Ok(());
        }

        for (key, value) in [
            ("CONTACT_EMAIL_FROM", &self.mail.from),
            ("CONTACT_EMAIL_TO", &self.mail.to),
        ] {
            let value = value.as_deref().ok_or(ConfigError::Missing(key))?;
            if !email_address::EmailAddress::is_valid(value) {
                return Err(ConfigError::InvalidValue {
                    key,
                    reason: format!("{value:?} is not an email address"),
                });
            }
        }

        if self.mail.username.is_some() != self.mail.password.is_some() {
            return Err(ConfigError::InvalidValue {
                key: "SMTP_USER",
                reason: "SMTP_USER and SMTP_PASS must be set together".to_string(),
            });
        }
        Ok(())
    }
}

fn parse<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|v| {
            v.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key,
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn parse_bool<G>(get: &G, key: &'static str) -> Result<Option<bool>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue {
                key,
                reason: format!("{other:?} is not a boolean"),
            }),
        })
        .transpose()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
