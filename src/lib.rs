// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Contact Intake
//!
//! This crate accepts contact form submissions for the marketing site and
//! relays them to the site owner:
//!
//! - Per-IP fixed window rate limiting (100 requests / 15 minutes default)
//! - Field validation with a honeypot spam trap
//! - reCAPTCHA verification with a short-lived verdict cache
//! - Email notification over SMTP

pub mod captcha;
pub mod config;
pub mod error;
pub mod handlers;
pub mod limiter;
pub mod metrics;
pub mod notifier;
pub mod pipeline;
pub mod routes;
pub mod validator;

pub use captcha::{CaptchaVerifier, RecaptchaProvider, VerificationError, VerificationResult};
pub use config::{Config, ConfigError};
pub use error::ContactError;
pub use limiter::{MemoryStore, RateLimitResult, RateLimitStore, RateLimiter};
pub use notifier::{LogTransport, MailTransport, Notifier, SmtpTransport};
pub use pipeline::ContactPipeline;
pub use routes::router;
pub use validator::{ContactValidator, Submission, ValidationResult};
