// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types for the contact pipeline and their HTTP mapping.

use crate::captcha::VerificationError;
use crate::notifier::NotificationError;
use crate::validator::ValidationError;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

pub const RATE_LIMITED_MESSAGE: &str = "Too many requests, please try again later.";
pub const GENERIC_ERROR_MESSAGE: &str = "An unexpected error occurred. Please try again later.";

/// Application error types
#[derive(Debug, Error)]
pub enum ContactError {
    #[error("Invalid request body: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Duration },

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ContactError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedPayload(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Verification(e) if e.is_service_fault() => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Verification(_) => StatusCode::FORBIDDEN,
            Self::Notification(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label used for logs and the outcome metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::MalformedPayload(_) => "malformed",
            Self::Validation(ValidationError::Honeypot { .. }) => "honeypot",
            Self::Validation(_) => "validation_failed",
            Self::RateLimited { .. } => "rate_limited",
            Self::Verification(_) => "captcha_failed",
            Self::Notification(_) => "notification_failed",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Build the client response. Server-side detail is only exposed when
    /// `expose_detail` is set (never in production).
    pub fn to_response(&self, expose_detail: bool) -> Response {
        let status = self.status();
        let body = match self {
            Self::MalformedPayload(_) => json!({
                "success": false,
                "error": "Invalid request body",
            }),
            Self::Validation(e) => json!({
                "success": false,
                "error": "Validation failed",
                "details": e.details(),
            }),
            Self::RateLimited { retry_after } => {
                return (
                    status,
                    [(header::RETRY_AFTER, retry_after_secs(*retry_after).to_string())],
                    Json(json!({ "success": false, "error": RATE_LIMITED_MESSAGE })),
                )
                    .into_response();
            }
            Self::Verification(e) if status == StatusCode::FORBIDDEN => json!({
                "success": false,
                "message": "reCAPTCHA verification failed",
                "error": e.reason(),
            }),
            Self::Verification(_) | Self::Notification(_) | Self::Internal(_) => {
                let error = if expose_detail {
                    self.to_string()
                } else {
                    GENERIC_ERROR_MESSAGE.to_string()
                };
                json!({ "success": false, "error": error })
            }
        };

        (status, Json(body)).into_response()
    }
}

impl IntoResponse for ContactError {
    fn into_response(self) -> Response {
        self.to_response(false)
    }
}

/// Whole seconds, rounded up so clients never retry early.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ContactError>;
