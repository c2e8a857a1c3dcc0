// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! In-process application with mocked outbound collaborators.

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use contact_intake::{
    captcha::{
        CaptchaVerifier, SiteVerifyRequest, SiteVerifyResponse, VerificationError,
        VerificationProvider,
    },
    config::{Config, Environment},
    handlers::AppState,
    limiter::RateLimiter,
    metrics::Metrics,
    notifier::{MailTransport, NotificationError, Notifier, OutgoingMail},
    pipeline::ContactPipeline,
    router,
    validator::ContactValidator,
};
use serde_json::Value;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// CAPTCHA provider answering every siteverify call with a configurable response.
pub struct MockProvider {
    response: Mutex<Result<SiteVerifyResponse, VerificationError>>,
    calls: AtomicUsize,
    remote_ips: Mutex<Vec<Option<IpAddr>>>,
}

impl MockProvider {
    pub fn passing() -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(Ok(SiteVerifyResponse {
                success: true,
                score: Some(0.9),
                hostname: Some("www.example.com".to_string()),
                action: Some("contact".to_string()),
                ..Default::default()
            })),
            calls: AtomicUsize::new(0),
            remote_ips: Mutex::new(Vec::new()),
        })
    }

    pub fn respond_with(&self, response: Result<SiteVerifyResponse, VerificationError>) {
        *self.response.lock().unwrap() = response;
    }

    pub fn reject(&self, codes: &[&str]) {
        self.respond_with(Ok(SiteVerifyResponse {
            success: false,
            error_codes: codes.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn remote_ips(&self) -> Vec<Option<IpAddr>> {
        self.remote_ips.lock().unwrap().clone()
    }
}

#[async_trait]
impl VerificationProvider for MockProvider {
    async fn siteverify(
        &self,
        request: &SiteVerifyRequest<'_>,
    ) -> Result<SiteVerifyResponse, VerificationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.remote_ips.lock().unwrap().push(request.remote_ip);
        self.response.lock().unwrap().clone()
    }
}

/// Mail transport that records every message instead of sending it.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutgoingMail>>,
    fail: AtomicBool,
    panic: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_deliveries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make the next deliveries panic instead of returning an error.
    pub fn panic_on_send(&self, panic: bool) {
        self.panic.store(panic, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotificationError> {
        if self.panic.load(Ordering::SeqCst) {
            panic!("mail transport exploded");
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotificationError::Delivery("connection refused".to_string()));
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

/// Configuration suitable for tests: secret set, no loopback exemption.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.environment = Environment::Test;
    config.captcha.secret_key = Some("test-secret".to_string());
    config.rate_limit.exempt_loopback = false;
    config.mail.from = Some("contact@example.com".to_string());
    config.mail.to = Some("owner@example.com".to_string());
    config
}

/// A router wired to mock collaborators.
pub struct TestApp {
    pub router: Router,
    pub provider: Arc<MockProvider>,
    pub transport: Arc<RecordingTransport>,
    pub state: Arc<AppState>,
}

/// HTTP response collapsed for assertions.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub retry_after: Option<String>,
    pub text: String,
    pub body: Value,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let provider = MockProvider::passing();
        let transport = RecordingTransport::new();
        let metrics = Arc::new(Metrics::new().unwrap());

        let verifier = CaptchaVerifier::new(config.captcha.clone(), provider.clone())
            .with_metrics(metrics.clone());
        let notifier = Notifier::new(
            config.mail.from.clone().unwrap_or_default(),
            config.mail.to.clone().unwrap_or_default(),
            transport.clone(),
        );
        let pipeline = ContactPipeline::new(
            ContactValidator::new(config.validation.clone()),
            verifier,
            notifier,
        );

        let state = Arc::new(AppState {
            pipeline,
            limiter: RateLimiter::new(config.rate_limit.clone()),
            metrics,
            config,
        });

        Self {
            router: router(state.clone()),
            provider,
            transport,
            state,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        TestResponse {
            status,
            retry_after,
            text,
            body,
        }
    }

    pub async fn submit_json(&self, ip: &str, payload: &Value) -> TestResponse {
        self.send(json_request(ip, payload)).await
    }

    pub async fn get(&self, ip: &str, path: &str) -> TestResponse {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }
}

pub fn json_request(ip: &str, payload: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/contact")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, "harness/1.0")
        .header("x-forwarded-for", ip)
        .body(Body::from(payload.to_string()))
        .unwrap()
}

pub fn form_request(ip: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/contact")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header("x-forwarded-for", ip)
        .body(Body::from(body.to_string()))
        .unwrap()
}
