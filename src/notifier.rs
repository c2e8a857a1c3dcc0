// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Email notification of accepted contact submissions.
//!
//! Delivery is attempted once; a transport failure is reported to the
//! caller and never retried here.

use crate::config::MailConfig;
use crate::validator::Submission;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Notification error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("Invalid mail address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("Mail delivery failed: {0}")]
    Delivery(String),
}

/// Request details attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMeta {
    pub ip: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// A fully composed email, independent of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    /// Submitter as `(display name, address)`
    pub reply_to: Option<(String, String)>,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

impl OutgoingMail {
    /// Convert into a MIME message (plain text + HTML alternatives).
    pub fn to_message(&self) -> Result<Message, NotificationError> {
        let mut builder = Message::builder()
            .from(parse_mailbox(&self.from)?)
            .to(parse_mailbox(&self.to)?)
            .subject(self.subject.clone());

        if let Some((name, address)) = &self.reply_to {
            let address = address.parse().map_err(|e: lettre::address::AddressError| {
                NotificationError::InvalidAddress {
                    address: address.clone(),
                    reason: e.to_string(),
                }
            })?;
            builder = builder.reply_to(Mailbox::new(Some(name.clone()), address));
        }

        builder
            .multipart(MultiPart::alternative_plain_html(
                self.text_body.clone(),
                self.html_body.clone(),
            ))
            .map_err(|e| NotificationError::Build(e.to_string()))
    }
}

fn parse_mailbox(value: &str) -> Result<Mailbox, NotificationError> {
    value
        .parse()
        .map_err(|e: lettre::address::AddressError| NotificationError::InvalidAddress {
            address: value.to_string(),
            reason: e.to_string(),
        })
}

/// Anything that can deliver an [`OutgoingMail`].
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotificationError>;
}

/// SMTP delivery through lettre.
pub struct SmtpTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    /// Build from configuration: implicit TLS when `secure`, STARTTLS otherwise.
    pub fn from_config(config: &MailConfig) -> Result<Self, NotificationError> {
        let host = config
            .smtp_host
            .as_deref()
            .ok_or_else(|| NotificationError::Build("SMTP host is not configured".to_string()))?;

        let builder = if config.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
        }
        .map_err(|e| NotificationError::Build(e.to_string()))?;

        let mut builder = builder
            .port(config.smtp_port)
            .timeout(Some(config.timeout()));

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            inner: builder.build(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotificationError> {
        let message = mail.to_message()?;
        let response = self
            .inner
            .send(message)
            .await
            .map_err(|e| NotificationError::Delivery(e.to_string()))?;
        debug!(code = %response.code(), "SMTP server accepted message");
        Ok(())
    }
}

/// Transport that only logs, for development setups without SMTP.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotificationError> {
        // Validates addresses the same way the SMTP path would.
        mail.to_message()?;
        info!(
            to = %mail.to,
            subject = %mail.subject,
            "SMTP not configured, notification logged instead of sent"
        );
        Ok(())
    }
}

/// Composes and dispatches submission notifications.
pub struct Notifier {
    from: String,
    to: String,
    transport: Arc<dyn MailTransport>,
}

impl Notifier {
    pub fn new(from: String, to: String, transport: Arc<dyn MailTransport>) -> Self {
        Self {
            from,
            to,
            transport,
        }
    }

    /// Compose the notification for a submission.
    pub fn compose(&self, submission: &Submission, meta: &RequestMeta) -> OutgoingMail {
        let ip = meta
            .ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let user_agent = meta.user_agent.as_deref().unwrap_or("unknown");
        let received = meta.received_at.to_rfc3339();
        let phone = submission.phone.as_deref().unwrap_or("Not provided");

        let text_body = format!(
            "New contact form submission\n\n\
             Name: {}\nEmail: {}\nPhone: {}\n\nMessage:\n{}\n\n\
             ---\nReceived: {}\nIP: {}\nUser agent: {}\n",
            submission.name, submission.email, phone, submission.message, received, ip, user_agent,
        );

        let html_body = format!(
            "<h2>New contact form submission</h2>\
             <p><strong>Name:</strong> {}</p>\
             <p><strong>Email:</strong> {}</p>\
             <p><strong>Phone:</strong> {}</p>\
             <p><strong>Message:</strong></p>\
             <p>{}</p>\
             <hr>\
             <p><small>Received: {} &middot; IP: {} &middot; User agent: {}</small></p>",
            escape_html(&submission.name),
            escape_html(&submission.email),
            escape_html(phone),
            escape_html(&submission.message).replace('\n', "<br>"),
            escape_html(&received),
            escape_html(&ip),
            escape_html(user_agent),
        );

        OutgoingMail {
            from: self.from.clone(),
            to: self.to.clone(),
            reply_to: Some((submission.name.clone(), submission.email.clone())),
            subject: format!(
                "New contact form submission from {}",
                single_line(&submission.name)
            ),
            text_body,
            html_body,
        }
    }

    /// Send the notification once.
    pub async fn notify(
        &self,
        submission: &Submission,
        meta: &RequestMeta,
    ) -> Result<(), NotificationError> {
        let mail = self.compose(submission, meta);
        self.transport.send(&mail).await.map_err(|e| {
            warn!(error = %e, "Contact notification failed");
            e
        })
    }
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn single_line(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}
