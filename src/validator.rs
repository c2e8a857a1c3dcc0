// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Contact form validator.
//!
//! Implements field-level validation for contact submissions:
//! - Name, email, phone and message length/format rules
//! - Honeypot detection (terminal, overrides every other error)
//!
//! Field errors are collected together so the form can show all of them
//! at once.

use crate::config::ValidationConfig;
use email_address::EmailAddress;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::debug;

pub const NAME_MIN: usize = 2;
pub const NAME_MAX: usize = 100;
pub const EMAIL_MAX: usize = 100;
pub const PHONE_MAX: usize = 20;
pub const MESSAGE_MIN: usize = 10;
pub const MESSAGE_MAX: usize = 2000;

/// Field name → human-readable message, ordered by field name.
pub type FieldErrors = BTreeMap<String, String>;

/// A single value from the incoming payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    /// Array or object where text was expected
    NotText,
}

/// Payload exactly as the client sent it, keyed by field name.
#[derive(Debug, Clone, Default)]
pub struct RawSubmission {
    fields: HashMap<String, FieldValue>,
}

impl RawSubmission {
    /// Build from a JSON body. Returns `None` unless the body is an object.
    ///
    /// Scalars are kept as their text form and `null` counts as absent.
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        let serde_json::Value::Object(map) = value else {
            return None;
        };

        let fields = map
            .into_iter()
            .filter_map(|(key, value)| {
                let field = match value {
                    serde_json::Value::Null => return None,
                    serde_json::Value::String(s) => FieldValue::Text(s),
                    serde_json::Value::Bool(b) => FieldValue::Text(b.to_string()),
                    serde_json::Value::Number(n) => FieldValue::Text(n.to_string()),
                    serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                        FieldValue::NotText
                    }
                };
                Some((key, field))
            })
            .collect();

        Some(Self { fields })
    }

    /// Build from url-encoded form pairs. A repeated key keeps its last value.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), FieldValue::Text(v.into())))
                .collect(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Text value of a field, if present and textual.
    pub fn text(&self, field: &str) -> Option<&str> {
        match self.fields.get(field) {
            Some(FieldValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// A contact submission that passed validation. Values are trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: String,
}

/// Validation error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Validation failed for {}", .0.keys().cloned().collect::<Vec<_>>().join(", "))]
    Fields(FieldErrors),

    #[error("Honeypot field {field} was filled in")]
    Honeypot { field: String },
}

impl ValidationError {
    /// Per-field messages as returned to the client.
    pub fn details(&self) -> FieldErrors {
        match self {
            Self::Fields(errors) => errors.clone(),
            Self::Honeypot { field } => {
                FieldErrors::from([(field.clone(), "Invalid submission".to_string())])
            }
        }
    }
}

/// Result of validation.
#[derive(Debug, Clone)]
pub enum ValidationResult {
    /// Submission is valid
    Valid(Submission),
    /// Submission is invalid
    Invalid(ValidationError),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid(_))
    }

    pub fn error(&self) -> Option<&ValidationError> {
        match self {
            ValidationResult::Valid(_) => None,
            ValidationResult::Invalid(e) => Some(e),
        }
    }

    pub fn into_result(self) -> Result<Submission, ValidationError> {
        match self {
            ValidationResult::Valid(s) => Ok(s),
            ValidationResult::Invalid(e) => Err(e),
        }
    }
}

/// Contact submission validator.
pub struct ContactValidator {
    config: ValidationConfig,
}

impl ContactValidator {
    /// Create a new validator with the given configuration.
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn honeypot_field(&self) -> &str {
        &self.config.honeypot_field
    }

    /// True when the honeypot field carries any content.
    pub fn honeypot_triggered(&self, raw: &RawSubmission) -> bool {
        match raw.get(&self.config.honeypot_field) {
            None => false,
            Some(FieldValue::Text(s)) => !s.is_empty(),
            Some(FieldValue::NotText) => true,
        }
    }

    /// Validate a complete contact submission.
    pub fn validate(&self, raw: &RawSubmission) -> ValidationResult {
        if self.honeypot_triggered(raw) {
            debug!(field = %self.config.honeypot_field, "Honeypot triggered");
            return ValidationResult::Invalid(ValidationError::Honeypot {
                field: self.config.honeypot_field.clone(),
            });
        }

        let mut errors = FieldErrors::new();
        let mut record = |field: &str, result: Result<String, String>| match result {
            Ok(value) => Some(value),
            Err(message) => {
                errors.insert(field.to_string(), message);
                None
            }
        };

        let name = record("name", validate_name(raw.get("name")));
        let email = record("email", validate_email(raw.get("email")));
        let phone = match validate_phone(raw.get("phone")) {
            Ok(phone) => phone,
            Err(message) => {
                record("phone", Err(message));
                None
            }
        };
        let message = record("message", validate_message(raw.get("message")));

        match (name, email, message) {
            (Some(name), Some(email), Some(message)) if errors.is_empty() => {
                debug!("Submission valid");
                ValidationResult::Valid(Submission {
                    name,
                    email,
                    phone,
                    message,
                })
            }
            _ => {
                debug!(fields = ?errors.keys().collect::<Vec<_>>(), "Submission invalid");
                ValidationResult::Invalid(ValidationError::Fields(errors))
            }
        }
    }
}

fn required_text<'a>(value: Option<&'a FieldValue>, label: &str) -> Result<&'a str, String> {
    match value {
        Some(FieldValue::Text(s)) if !s.trim().is_empty() => Ok(s.trim()),
        Some(FieldValue::NotText) => Err(format!("{label} must be text")),
        _ => Err(format!("{label} is required")),
    }
}

fn check_length(value: &str, label: &str, min: usize, max: usize) -> Result<String, String> {
    let len = value.chars().count();
    if len < min {
        Err(format!("{label} must be at least {min} characters"))
    } else if len > max {
        Err(format!("{label} must be at most {max} characters"))
    } else {
        Ok(value.to_string())
    }
}

fn validate_name(value: Option<&FieldValue>) -> Result<String, String> {
    let name = required_text(value, "Name")?;
    check_length(name, "Name", NAME_MIN, NAME_MAX)
}

fn validate_email(value: Option<&FieldValue>) -> Result<String, String> {
    let email = required_text(value, "Email")?;
    if email.chars().count() > EMAIL_MAX {
        return Err(format!("Email must be at most {EMAIL_MAX} characters"));
    }
    if !is_email_shaped(email) {
        return Err("Invalid email address".to_string());
    }
    Ok(email.to_string())
}

fn validate_phone(value: Option<&FieldValue>) -> Result<Option<String>, String> {
    match value {
        None => Ok(None),
        Some(FieldValue::NotText) => Err("Phone must be text".to_string()),
        Some(FieldValue::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(FieldValue::Text(s)) => {
            check_length(s.trim(), "Phone", 0, PHONE_MAX).map(Some)
        }
    }
}

fn validate_message(value: Option<&FieldValue>) -> Result<String, String> {
    let message = required_text(value, "Message")?;
    check_length(message, "Message", MESSAGE_MIN, MESSAGE_MAX)
}

/// Addr-spec only (no display names) with a dotted domain.
fn is_email_shaped(email: &str) -> bool {
    if email.contains(|c: char| c.is_whitespace() || c == '<' || c == '>') {
        return false;
    }
    let Some((_, domain)) = email.rsplit_once('@') else {
        return false;
    };
    let dotted = domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.');
    dotted && EmailAddress::is_valid(email)
}
