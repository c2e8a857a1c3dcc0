// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Spam campaign patterns and a runner against the in-process router.

use super::generators::{generate_ips, honeypot_payload, valid_payload};
use super::mocks::TestApp;
use super::tally::{Outcome, Tally};

/// Campaign configuration.
#[derive(Debug, Clone)]
pub struct Campaign {
    /// Total number of submissions to send
    pub total_requests: usize,
    /// Number of unique client addresses to rotate through
    pub unique_ips: usize,
    /// Share of submissions that fill the honeypot (0.0-1.0)
    pub honeypot_ratio: f64,
}

impl Default for Campaign {
    fn default() -> Self {
        Self {
            total_requests: 100,
            unique_ips: 1,
            honeypot_ratio: 0.0,
        }
    }
}

impl Campaign {
    /// One address hammering the form.
    pub fn single_ip_flood() -> Self {
        Self {
            total_requests: 150,
            unique_ips: 1,
            ..Default::default()
        }
    }

    /// Botnet spreading submissions thinly across many addresses.
    pub fn distributed_bots() -> Self {
        Self {
            total_requests: 300,
            unique_ips: 100,
            ..Default::default()
        }
    }

    /// Form-filling bots that complete every field, including the hidden one.
    pub fn honeypot_bots() -> Self {
        Self {
            total_requests: 60,
            unique_ips: 20,
            honeypot_ratio: 1.0,
        }
    }

    /// Humans and bots interleaved.
    pub fn mixed_traffic() -> Self {
        Self {
            total_requests: 80,
            unique_ips: 40,
            honeypot_ratio: 0.5,
        }
    }

    /// Number of honeypot submissions the campaign will send.
    pub fn honeypot_count(&self) -> usize {
        (0..self.total_requests).filter(|i| self.is_honeypot(*i)).count()
    }

    fn is_honeypot(&self, i: usize) -> bool {
        // Deterministic interleave: request i is a bot when its bucket falls under the ratio
        ((i % 100) as f64) < self.honeypot_ratio * 100.0
    }

    /// Send every submission sequentially and tally the answers.
    pub async fn run(&self, app: &TestApp) -> Tally {
        let ips = generate_ips(self.unique_ips.max(1));
        let mut tally = Tally::new();
        tally.start();

        for i in 0..self.total_requests {
            let ip = ips[i % ips.len()].to_string();
            let payload = if self.is_honeypot(i) {
                honeypot_payload(i)
            } else {
                valid_payload(i)
            };
            let response = app.submit_json(&ip, &payload).await;
            tally.record(Outcome::from_status(response.status), &ip);
        }

        tally.finish();
        tally
    }
}
