// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Outcome tallies for spam campaign results.

use axum::http::StatusCode;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// How the service answered a single submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Accepted,
    RateLimited,
    Rejected,
    CaptchaFailed,
    ServerError,
}

impl Outcome {
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::OK => Outcome::Accepted,
            StatusCode::TOO_MANY_REQUESTS => Outcome::RateLimited,
            StatusCode::FORBIDDEN => Outcome::CaptchaFailed,
            s if s.is_client_error() => Outcome::Rejected,
            _ => Outcome::ServerError,
        }
    }
}

/// Collects outcomes during a campaign.
#[derive(Debug, Default)]
pub struct Tally {
    start_time: Option<Instant>,
    end_time: Option<Instant>,
    outcomes: HashMap<Outcome, usize>,
    requests_per_ip: HashMap<String, usize>,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
    }

    pub fn finish(&mut self) {
        self.end_time = Some(Instant::now());
    }

    pub fn record(&mut self, outcome: Outcome, ip: &str) {
        *self.outcomes.entry(outcome).or_insert(0) += 1;
        *self.requests_per_ip.entry(ip.to_string()).or_insert(0) += 1;
    }

    pub fn total(&self) -> usize {
        self.outcomes.values().sum()
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    pub fn duration(&self) -> Duration {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Ratio of submissions that did not get through.
    pub fn block_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (total - self.count(Outcome::Accepted)) as f64 / total as f64
    }

    pub fn unique_ips(&self) -> usize {
        self.requests_per_ip.len()
    }
}

impl std::fmt::Display for Tally {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Campaign Report ===")?;
        writeln!(f, "Duration:       {} ms", self.duration().as_millis())?;
        writeln!(f, "Total:          {}", self.total())?;
        writeln!(f, "Accepted:       {}", self.count(Outcome::Accepted))?;
        writeln!(f, "Rate Limited:   {}", self.count(Outcome::RateLimited))?;
        writeln!(f, "Rejected:       {}", self.count(Outcome::Rejected))?;
        writeln!(f, "CAPTCHA Failed: {}", self.count(Outcome::CaptchaFailed))?;
        writeln!(f, "Server Error:   {}", self.count(Outcome::ServerError))?;
        writeln!(f, "Block Rate:     {:.1}%", self.block_rate() * 100.0)?;
        writeln!(f, "Unique IPs:     {}", self.unique_ips())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_rate() {
        let mut tally = Tally::new();
        for _ in 0..3 {
            tally.record(Outcome::Accepted, "10.0.0.1");
        }
        for _ in 0..7 {
            tally.record(Outcome::RateLimited, "10.0.0.1");
        }

        assert_eq!(tally.total(), 10);
        assert_eq!(tally.unique_ips(), 1);
        assert!((tally.block_rate() - 0.7).abs() < 0.01);
    }

    #[test]
    fn test_outcome_from_status() {
        assert_eq!(Outcome::from_status(StatusCode::OK), Outcome::Accepted);
        assert_eq!(Outcome::from_status(StatusCode::BAD_REQUEST), Outcome::Rejected);
        assert_eq!(Outcome::from_status(StatusCode::TOO_MANY_REQUESTS), Outcome::RateLimited);
        assert_eq!(Outcome::from_status(StatusCode::FORBIDDEN), Outcome::CaptchaFailed);
        assert_eq!(Outcome::from_status(StatusCode::INTERNAL_SERVER_ERROR), Outcome::ServerError);
    }
}
