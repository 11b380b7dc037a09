//! SIM Portal Core - Shared domain types.
//!
//! This crate provides the types used across all SIM portal components:
//! - `portal` - Customer flows (eSIM purchase, SIM swap, KYC compliance) and admin client
//! - `cli` - Operator tooling
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no HTTP
//! clients, no timers. Status classification, request id probing and phone
//! number extraction live here so they can be tested in isolation.
//!
//! # Modules
//!
//! - [`types`] - Request ids, flow kinds, verification statuses, MSISDNs,
//!   prices, payment selections, registration details and extracted identity

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
