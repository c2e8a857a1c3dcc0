// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Contact submission pipeline.
//!
//! A submission moves through fixed stages and stops at the first failure:
//!
//! ```text
//! RECEIVED -> RATE_CHECKED -> VALIDATED -> CAPTCHA_VERIFIED -> NOTIFIED -> RESPONDED
//!                 |               |               |                |
//!            RATE_LIMITED  VALIDATION_FAILED  CAPTCHA_FAILED  NOTIFICATION_FAILED
//! ```
//!
//! Rate checking happens in the HTTP middleware in front of the route, so
//! [`ContactPipeline::process`] starts at `RATE_CHECKED`. No stage is
//! retried.

use crate::captcha::{CaptchaVerifier, VerificationResult};
use crate::error::Result;
use crate::notifier::{Notifier, RequestMeta};
use crate::validator::{ContactValidator, RawSubmission, Submission};
use std::fmt;
use tracing::{debug, info};

/// Pipeline stage reached by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    RateChecked,
    Validated,
    CaptchaVerified,
    Notified,
    Responded,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::RateChecked => "rate_checked",
            Self::Validated => "validated",
            Self::CaptchaVerified => "captcha_verified",
            Self::Notified => "notified",
            Self::Responded => "responded",
        };
        f.write_str(name)
    }
}

/// A submission that went through every stage.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub submission: Submission,
    pub verification: VerificationResult,
}

/// Validator, verifier and notifier run in order.
pub struct ContactPipeline {
    validator: ContactValidator,
    verifier: CaptchaVerifier,
    notifier: Notifier,
}

impl ContactPipeline {
    pub fn new(validator: ContactValidator, verifier: CaptchaVerifier, notifier: Notifier) -> Self {
        Self {
            validator,
            verifier,
            notifier,
        }
    }

    pub fn verifier(&self) -> &CaptchaVerifier {
        &self.verifier
    }

    /// Run a rate-checked submission through validation, verification and
    /// notification.
    pub async fn process(&self, raw: &RawSubmission, meta: &RequestMeta) -> Result<Accepted> {
        debug!(stage = %Stage::RateChecked, ip = ?meta.ip, "Processing contact submission");

        let submission = self.validator.validate(raw).into_result()?;
        debug!(stage = %Stage::Validated, "Submission validated");

        let token = raw.text(self.verifier.token_field());
        let verification = self.verifier.verify(token, meta.ip).await?;
        debug!(stage = %Stage::CaptchaVerified, score = ?verification.score, "reCAPTCHA verified");

        self.notifier.notify(&submission, meta).await?;
        info!(stage = %Stage::Notified, ip = ?meta.ip, "Contact notification sent");

        Ok(Accepted {
            submission,
            verification,
        })
    }
}
