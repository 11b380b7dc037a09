//! SIM Portal - customer flows and identity verification orchestration.
//!
//! This crate drives the three customer flows of the portal (eSIM purchase,
//! SIM swap and KYC compliance) against the portal backend, opens the
//! identity verification provider, and reconciles the provider's result with
//! the backend's view of the request.
//!
//! # Modules
//!
//! - [`api`] - Request session client for the backend's request resource
//! - [`provider`] - Verification provider adapter and its host seam
//! - [`reconcile`] - Status reconciliation engine
//! - [`flows`] - Step-flow orchestrators
//! - [`payment`] - Payment sub-flow
//! - [`admin`] - Admin API client and session store
//! - [`notify`] - User-visible notices
//! - [`config`] - Environment configuration
//! - [`state`] - Shared portal state

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod admin;
pub mod api;
pub mod config;
pub mod flows;
pub mod notify;
pub mod payment;
pub mod provider;
pub mod reconcile;
pub mod state;

#[cfg(test)]
mod testing;

pub use state::Portal;
