// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the contact intake service.

use crate::config::Config;
use crate::error::ContactError;
use crate::limiter::{client_ip, RateLimitResult, RateLimiter};
use crate::metrics::Metrics;
use crate::notifier::RequestMeta;
use crate::pipeline::{ContactPipeline, Stage};
use crate::validator::RawSubmission;
use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, FromRequest, FromRequestParts, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Form, Json,
};
use chrono::Utc;
use serde::Serialize;
use std::any::Any;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const SUCCESS_MESSAGE: &str = "Your message has been sent successfully.";

/// Shared application state.
pub struct AppState {
    pub pipeline: ContactPipeline,
    pub limiter: RateLimiter,
    pub metrics: Arc<Metrics>,
    pub config: Config,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
}

/// Successful submission response.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub message: &'static str,
}

/// Contact payload, accepted as JSON or url-encoded form.
pub struct ContactPayload(pub RawSubmission);

#[async_trait]
impl<S> FromRequest<S> for ContactPayload
where
    S: Send + Sync,
{
    type Rejection = ContactError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
            .unwrap_or_default();

        match content_type.as_str() {
            "application/json" => {
                let Json(value) = Json::<serde_json::Value>::from_request(req, state)
                    .await
                    .map_err(|e| ContactError::MalformedPayload(e.body_text()))?;
                RawSubmission::from_json(value).map(Self).ok_or_else(|| {
                    ContactError::MalformedPayload("expected a JSON object".to_string())
                })
            }
            "application/x-www-form-urlencoded" => {
                let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
                    .await
                    .map_err(|e| ContactError::MalformedPayload(e.body_text()))?;
                Ok(Self(RawSubmission::from_pairs(pairs)))
            }
            other => Err(ContactError::MalformedPayload(format!(
                "unsupported content type {other:?}"
            ))),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Ok(RequestMeta {
            ip: client_ip(&parts.headers, peer),
            user_agent: parts
                .headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            received_at: Utc::now(),
        })
    }
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Accept a contact form submission.
pub async fn submit_contact(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    payload: Result<ContactPayload, ContactError>,
) -> Response {
    debug!(stage = %Stage::Received, ip = ?meta.ip, "Contact submission received");

    let result = match payload {
        Ok(ContactPayload(raw)) => state.pipeline.process(&raw, &meta).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(_) => {
            state.metrics.record_outcome("accepted");
            info!(stage = %Stage::Responded, ip = ?meta.ip, "Contact submission accepted");
            (
                StatusCode::OK,
                Json(SubmitResponse {
                    success: true,
                    message: SUCCESS_MESSAGE,
                }),
            )
                .into_response()
        }
        Err(err) => reject(&state, &meta, err),
    }
}

fn reject(state: &AppState, meta: &RequestMeta, err: ContactError) -> Response {
    let outcome = err.outcome();
    state.metrics.record_outcome(outcome);
    if err.status().is_server_error() {
        error!(ip = ?meta.ip, outcome, error = %err, "Contact submission failed");
    } else {
        info!(ip = ?meta.ip, outcome, error = %err, "Contact submission rejected");
    }
    err.to_response(!state.config.environment.is_production())
}

/// Prometheus scrape endpoint.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// JSON 404 for unknown routes.
pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "success": false, "error": "Not found" })),
    )
        .into_response()
}

/// Build the response for a panicking request: logged, counted and
/// answered with the generic 500.
pub fn panic_response(
    metrics: Arc<Metrics>,
    expose_detail: bool,
) -> impl Fn(Box<dyn Any + Send + 'static>) -> Response + Clone + Send + Sync + 'static {
    move |panic: Box<dyn Any + Send + 'static>| {
        let detail = if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else if let Some(s) = panic.downcast_ref::<&str>() {
            s.to_string()
        } else {
            "handler panicked".to_string()
        };

        let err = ContactError::Internal(detail);
        metrics.record_outcome(err.outcome());
        error!(outcome = err.outcome(), error = %err, "Request handler panicked");
        err.to_response(expose_detail)
    }
}

/// Fixed window rate limiting in front of every route.
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer);

    if state.limiter.is_exempt(request.uri().path(), ip) {
        return next.run(request).await;
    }

    let client = ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    match state.limiter.check(&client, Utc::now()).await {
        RateLimitResult::Allowed { remaining, .. } => {
            debug!(client = %client, remaining, "Request allowed");
            next.run(request).await
        }
        RateLimitResult::Limited { retry_after } => {
            state.metrics.record_rate_limited();
            info!(
                client = %client,
                path = %request.uri().path(),
                retry_after_secs = retry_after.as_secs(),
                "Request rate limited"
            );
            ContactError::RateLimited { retry_after }.into_response()
        }
    }
}
