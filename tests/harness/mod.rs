// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Test harness for driving the contact intake router in-process.
//!
//! Provides mock collaborators (CAPTCHA provider, mail transport), payload
//! generators and spam campaign simulation on top of `tower::ServiceExt`.

#![allow(dead_code)]

pub mod campaigns;
pub mod generators;
pub mod mocks;
pub mod tally;
