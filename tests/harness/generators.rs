// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Test data generators for contact form traffic.

use serde_json::{json, Value};
use std::net::{IpAddr, Ipv4Addr};

/// Generate a pool of client addresses in the 10.x.x.x range.
pub fn generate_ips(count: usize) -> Vec<IpAddr> {
    (0..count)
        .map(|i| {
            let a = ((i >> 16) & 0xFF) as u8;
            let b = ((i >> 8) & 0xFF) as u8;
            let c = (i & 0xFF) as u8;
            IpAddr::V4(Ipv4Addr::new(10, a, b, c))
        })
        .collect()
}

/// A submission that passes every check.
pub fn valid_payload(i: usize) -> Value {
    json!({
        "name": format!("Visitor {i}"),
        "email": format!("visitor{i}@example.org"),
        "phone": "+44 20 7946 0958",
        "message": format!("Hello, I would like a quote for project number {i}."),
        "g-recaptcha-response": format!("token-{i}"),
    })
}

/// A bot submission that fills the honeypot field.
pub fn honeypot_payload(i: usize) -> Value {
    let mut payload = valid_payload(i);
    payload["website"] = json!(format!("https://spam-{i}.example.net"));
    payload
}

/// Payloads that break one rule each, paired with the field expected to fail.
pub fn invalid_payloads() -> Vec<(&'static str, Value)> {
    let base = valid_payload(0);
    let with = |field: &str, value: Value| {
        let mut payload = base.clone();
        payload[field] = value;
        payload
    };

    vec![
        ("name", with("name", json!(""))),
        ("name", with("name", json!("A"))),
        ("name", with("name", json!("N".repeat(101)))),
        ("name", with("name", json!({ "first": "Ada" }))),
        ("email", with("email", json!("not-an-email"))),
        ("email", with("email", json!("user@localhost"))),
        ("email", with("email", json!(format!("{}@example.org", "e".repeat(95))))),
        ("phone", with("phone", json!("0".repeat(21)))),
        ("message", with("message", json!("Too short"))),
        ("message", with("message", json!("m".repeat(2001)))),
        ("message", with("message", json!(["not", "text"]))),
    ]
}

/// Content types the intake must refuse.
pub fn unsupported_content_types() -> Vec<&'static str> {
    vec![
        "text/plain",
        "multipart/form-data",
        "text/html",
        "application/xml",
    ]
}
