// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Contact Intake Service
//!
//! Accepts contact form submissions from the marketing site, checks them
//! and relays them by email:
//!
//! - `POST /api/contact`: submit the form (JSON or url-encoded)
//! - `GET /api/health`: liveness check
//! - `GET /metrics`: Prometheus metrics
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables (and `.env`):
//!
//! - `BIND_ADDR`: Server bind address (default: 0.0.0.0:3000)
//! - `RATE_LIMIT_WINDOW_MS`, `RATE_LIMIT_MAX`: fixed window (default: 100 per 15 min)
//! - `RECAPTCHA_SECRET_KEY`: required, the service refuses to start without it
//! - `SMTP_HOST`, `SMTP_PORT`, `SMTP_USER`, `SMTP_PASS`: mail transport
//! - `CONTACT_EMAIL_FROM`, `CONTACT_EMAIL_TO`: notification addresses
//! - `HONEYPOT_FIELD`: honeypot field name (default: website)
//! - `CORS_ORIGIN`: allowed origins, comma separated

use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use contact_intake::{
    captcha::{CaptchaVerifier, RecaptchaProvider},
    config::Config,
    handlers::AppState,
    limiter::{MemoryStore, RateLimitStore, RateLimiter},
    metrics::Metrics,
    notifier::{LogTransport, MailTransport, Notifier, SmtpTransport},
    pipeline::ContactPipeline,
    router,
    validator::ContactValidator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    dotenvy::dotenv().ok();

    // Load configuration; a bad config never serves traffic
    let config = Config::from_env()?;
    config.validate()?;
    info!(
        bind_addr = %config.bind_addr,
        environment = ?config.environment,
        window_ms = config.rate_limit.window_ms,
        max_requests = config.rate_limit.max_requests,
        exempt_loopback = config.rate_limit.exempt_loopback,
        smtp = config.mail.is_configured(),
        "Starting contact intake service"
    );

    let metrics = Arc::new(Metrics::new()?);
    let store = rate_limit_store(&config)?;
    let limiter = RateLimiter::with_store(config.rate_limit.clone(), store);

    let provider = RecaptchaProvider::new(config.captcha.verify_url.clone(), config.captcha.timeout())?;
    let verifier =
        CaptchaVerifier::new(config.captcha.clone(), Arc::new(provider)).with_metrics(metrics.clone());

    let pipeline = ContactPipeline::new(
        ContactValidator::new(config.validation.clone()),
        verifier,
        notifier(&config)?,
    );

    let state = Arc::new(AppState {
        pipeline,
        limiter,
        metrics,
        config: config.clone(),
    });

    // Spawn cleanup task
    let cleanup_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_state.config.rate_limit.cleanup_interval());
        loop {
            interval.tick().await;
            cleanup_state.limiter.cleanup(Utc::now()).await;
            cleanup_state.pipeline.verifier().purge_expired().await;
        }
    });

    let app = router(state);

    // Start server
    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

#[cfg(feature = "redis")]
fn rate_limit_store(config: &Config) -> anyhow::Result<Arc<dyn RateLimitStore>> {
    if let Some(url) = &config.rate_limit.redis_url {
        let store = contact_intake::limiter::RedisStore::new(
            url,
            "contact_intake",
            config.rate_limit.window_duration(),
        )?;
        info!("Using Redis rate limit store");
        return Ok(Arc::new(store));
    }
    Ok(Arc::new(MemoryStore::new()))
}

#[cfg(not(feature = "redis"))]
fn rate_limit_store(_config: &Config) -> anyhow::Result<Arc<dyn RateLimitStore>> {
    Ok(Arc::new(MemoryStore::new()))
}

fn notifier(config: &Config) -> anyhow::Result<Notifier> {
    let mail = &config.mail;
    let transport: Arc<dyn MailTransport> = if mail.is_configured() {
        Arc::new(SmtpTransport::from_config(mail)?)
    } else {
        warn!("SMTP_HOST not set, contact notifications will only be logged");
        Arc::new(LogTransport)
    };

    Ok(Notifier::new(
        mail.from.clone().unwrap_or_else(|| "contact@localhost.localdomain".to_string()),
        mail.to.clone().unwrap_or_else(|| "contact@localhost.localdomain".to_string()),
        transport,
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!(error = %e, "Failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
