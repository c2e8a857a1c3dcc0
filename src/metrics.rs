// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus metrics for the contact intake service.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Service metrics, registered on a private registry.
pub struct Metrics {
    registry: Registry,
    submissions: IntCounterVec,
    rate_limited: IntCounter,
    captcha_cache: IntCounterVec,
    provider_latency: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("contact_intake".to_string()), None)?;

        let submissions = IntCounterVec::new(
            Opts::new("submissions_total", "Contact submissions by final outcome"),
            &["outcome"],
        )?;
        let rate_limited = IntCounter::new(
            "rate_limited_total",
            "Requests rejected by the rate limiter",
        )?;
        let captcha_cache = IntCounterVec::new(
            Opts::new("captcha_cache_total", "reCAPTCHA verdict cache lookups"),
            &["result"],
        )?;
        let provider_latency = Histogram::with_opts(
            HistogramOpts::new(
                "captcha_provider_seconds",
                "Latency of reCAPTCHA siteverify calls",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        registry.register(Box::new(submissions.clone()))?;
        registry.register(Box::new(rate_limited.clone()))?;
        registry.register(Box::new(captcha_cache.clone()))?;
        registry.register(Box::new(provider_latency.clone()))?;

        Ok(Self {
            registry,
            submissions,
            rate_limited,
            captcha_cache,
            provider_latency,
        })
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.submissions.with_label_values(&[outcome]).inc();
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.inc();
    }

    pub fn record_cache(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.captcha_cache.with_label_values(&[result]).inc();
    }

    pub fn observe_provider(&self, seconds: f64) {
        self.provider_latency.observe(seconds);
    }

    pub fn outcome_count(&self, outcome: &str) -> u64 {
        self.submissions.with_label_values(&[outcome]).get()
    }

    /// Render every metric in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
