// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! reCAPTCHA verification client.
//!
//! Tokens are checked against the provider's `siteverify` endpoint and the
//! answer is held to the configured policy (hostname, action, minimum
//! score). Provider answers are cached per (token, action) so a resubmitted
//! or double-clicked form does not hit the provider twice.

use crate::config::CaptchaConfig;
use crate::metrics::Metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Verification error types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VerificationError {
    #[error("reCAPTCHA secret key is not configured")]
    NotConfigured,

    #[error("reCAPTCHA token is missing")]
    MissingToken,

    #[error("reCAPTCHA rejected the token ({})", .codes.join(", "))]
    Rejected { codes: Vec<String> },

    #[error("reCAPTCHA hostname mismatch: expected {expected}, got {actual:?}")]
    HostnameMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("reCAPTCHA action mismatch: expected {expected}, got {actual}")]
    ActionMismatch { expected: String, actual: String },

    #[error("reCAPTCHA score {score} is below the minimum {min}")]
    ScoreTooLow { score: f64, min: f64 },

    #[error("reCAPTCHA provider timed out")]
    Timeout,

    #[error("reCAPTCHA provider request failed: {0}")]
    Transport(String),

    #[error("reCAPTCHA provider returned an invalid response: {0}")]
    InvalidResponse(String),
}

impl VerificationError {
    /// Failures caused by the provider or our setup rather than the token.
    pub fn is_service_fault(&self) -> bool {
        matches!(
            self,
            Self::NotConfigured | Self::Timeout | Self::Transport(_) | Self::InvalidResponse(_)
        )
    }

    /// Stable reason code safe to show to clients. Never carries the
    /// configured expectations.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing-token",
            Self::Rejected { .. } => "token-rejected",
            Self::HostnameMismatch { .. } => "hostname-mismatch",
            Self::ActionMismatch { .. } => "action-mismatch",
            Self::ScoreTooLow { .. } => "score-too-low",
            Self::NotConfigured | Self::Timeout | Self::Transport(_) | Self::InvalidResponse(_) => {
                "verification-unavailable"
            }
        }
    }
}

/// Outcome of a verification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Request sent to the provider.
#[derive(Debug, Clone)]
pub struct SiteVerifyRequest<'a> {
    pub secret: &'a str,
    pub response: &'a str,
    pub remote_ip: Option<IpAddr>,
}

/// Provider answer. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SiteVerifyResponse {
    pub success: bool,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub challenge_ts: Option<String>,
    #[serde(rename = "error-codes", default)]
    pub error_codes: Vec<String>,
}

/// Something that can answer a siteverify call.
#[async_trait]
pub trait VerificationProvider: Send + Sync {
    async fn siteverify(
        &self,
        request: &SiteVerifyRequest<'_>,
    ) -> Result<SiteVerifyResponse, VerificationError>;
}

/// Google reCAPTCHA over HTTPS.
pub struct RecaptchaProvider {
    verify_url: String,
    client: reqwest::Client,
}

impl RecaptchaProvider {
    /// Create a provider with a bounded request timeout.
    pub fn new(verify_url: String, timeout: Duration) -> Result<Self, VerificationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VerificationError::Transport(e.to_string()))?;
        Ok(Self { verify_url, client })
    }
}

#[async_trait]
impl VerificationProvider for RecaptchaProvider {
    async fn siteverify(
        &self,
        request: &SiteVerifyRequest<'_>,
    ) -> Result<SiteVerifyResponse, VerificationError> {
        let remote_ip = request.remote_ip.map(|ip| ip.to_string());
        let mut form = vec![("secret", request.secret), ("response", request.response)];
        if let Some(ip) = remote_ip.as_deref() {
            form.push(("remoteip", ip));
        }

        let response = self
            .client
            .post(&self.verify_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VerificationError::Timeout
                } else {
                    VerificationError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(VerificationError::Transport(format!(
                "siteverify returned HTTP {}",
                response.status()
            )));
        }

        response
            .json::<SiteVerifyResponse>()
            .await
            .map_err(|e| VerificationError::InvalidResponse(e.to_string()))
    }
}

/// What a token has to match to be accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct Expectations {
    pub hostname: Option<String>,
    pub action: Option<String>,
    pub min_score: f64,
}

impl Expectations {
    pub fn from_config(config: &CaptchaConfig) -> Self {
        Self {
            hostname: config.expected_hostname.clone(),
            action: config.expected_action.clone(),
            min_score: config.min_score,
        }
    }

    /// Hold a provider answer to this policy.
    ///
    /// A missing hostname fails a hostname expectation; a missing action is
    /// tolerated since checkbox (v2) tokens never carry one.
    pub fn evaluate(
        &self,
        response: &SiteVerifyResponse,
    ) -> Result<VerificationResult, VerificationError> {
        if !response.success {
            return Err(VerificationError::Rejected {
                codes: response.error_codes.clone(),
            });
        }

        if let Some(expected) = &self.hostname {
            let matches = response
                .hostname
                .as_deref()
                .is_some_and(|h| h.eq_ignore_ascii_case(expected));
            if !matches {
                return Err(VerificationError::HostnameMismatch {
                    expected: expected.clone(),
                    actual: response.hostname.clone(),
                });
            }
        }

        if let (Some(expected), Some(actual)) = (&self.action, &response.action) {
            if expected != actual {
                return Err(VerificationError::ActionMismatch {
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
        }

        if let Some(score) = response.score {
            if score < self.min_score {
                return Err(VerificationError::ScoreTooLow {
                    score,
                    min: self.min_score,
                });
            }
        }

        Ok(VerificationResult {
            success: true,
            score: response.score,
            error: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    token: String,
    action: String,
}

type ProviderAnswer = Result<SiteVerifyResponse, VerificationError>;

/// One provider answer per key. Concurrent misses share the cell and wait
/// on a single siteverify call.
struct CacheEntry {
    answer: Arc<OnceCell<ProviderAnswer>>,
    expires_at: Instant,
}

/// Verification client with a per-(token, action) answer cache.
///
/// The cache holds what the provider said, not the verdict: every caller's
/// own expectations are evaluated against it.
pub struct CaptchaVerifier {
    config: CaptchaConfig,
    expectations: Expectations,
    provider: Arc<dyn VerificationProvider>,
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
    metrics: Option<Arc<Metrics>>,
}

impl CaptchaVerifier {
    pub fn new(config: CaptchaConfig, provider: Arc<dyn VerificationProvider>) -> Self {
        Self {
            expectations: Expectations::from_config(&config),
            config,
            provider,
            cache: Mutex::new(HashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Payload field carrying the client token.
    pub fn token_field(&self) -> &str {
        &self.config.token_field
    }

    /// Verify a token against the configured expectations.
    pub async fn verify(
        &self,
        token: Option<&str>,
        remote_ip: Option<IpAddr>,
    ) -> Result<VerificationResult, VerificationError> {
        self.verify_with(token, &self.expectations, remote_ip).await
    }

    /// Verify a token against explicit expectations.
    pub async fn verify_with(
        &self,
        token: Option<&str>,
        expectations: &Expectations,
        remote_ip: Option<IpAddr>,
    ) -> Result<VerificationResult, VerificationError> {
        let secret = self
            .config
            .secret_key
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(VerificationError::NotConfigured)?;

        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(VerificationError::MissingToken)?;

        let key = CacheKey {
            token: token.to_string(),
            action: expectations.action.clone().unwrap_or_default(),
        };

        let cell = self.slot(&key).await;
        let mut called = false;
        let answer = cell
            .get_or_init(|| {
                called = true;
                self.siteverify(secret, token, remote_ip)
            })
            .await
            .clone();

        if called {
            self.record_cache(false);
        } else {
            debug!("reCAPTCHA answer served from cache");
            self.record_cache(true);
        }

        // Only answers the provider vouched for are kept.
        if !matches!(&answer, Ok(response) if response.success) {
            self.evict(&key, &cell).await;
        }

        let verdict = expectations.evaluate(&answer?);
        match &verdict {
            Ok(result) => debug!(score = ?result.score, "reCAPTCHA token accepted"),
            Err(e) => info!(reason = %e, "reCAPTCHA token refused"),
        }
        verdict
    }

    async fn siteverify(
        &self,
        secret: &str,
        token: &str,
        remote_ip: Option<IpAddr>,
    ) -> ProviderAnswer {
        let started = Instant::now();
        let answer = self
            .provider
            .siteverify(&SiteVerifyRequest {
                secret,
                response: token,
                remote_ip,
            })
            .await;
        if let Some(metrics) = &self.metrics {
            metrics.observe_provider(started.elapsed().as_secs_f64());
        }
        if let Err(e) = &answer {
            warn!(error = %e, "reCAPTCHA provider call failed");
        }
        answer
    }

    /// Cell for `key`, replacing it when expired. Expired entries are purged
    /// whenever a new one is opened.
    async fn slot(&self, key: &CacheKey) -> Arc<OnceCell<ProviderAnswer>> {
        let now = Instant::now();
        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.get(key) {
            if entry.expires_at > now {
                return entry.answer.clone();
            }
        }

        cache.retain(|_, entry| entry.expires_at > now);
        let answer = Arc::new(OnceCell::new());
        cache.insert(
            key.clone(),
            CacheEntry {
                answer: answer.clone(),
                expires_at: now + self.config.cache_ttl(),
            },
        );
        answer
    }

    /// Drop `key` if it still points at `cell`.
    async fn evict(&self, key: &CacheKey, cell: &Arc<OnceCell<ProviderAnswer>>) {
        let mut cache = self.cache.lock().await;
        if cache
            .get(key)
            .is_some_and(|entry| Arc::ptr_eq(&entry.answer, cell))
        {
            cache.remove(key);
        }
    }

    /// Number of cached answers, expired ones included.
    pub async fn cache_len(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Drop expired answers. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut cache = self.cache.lock().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.expires_at > now);
        before - cache.len()
    }

    fn record_cache(&self, hit: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cache(hit);
        }
    }
}
