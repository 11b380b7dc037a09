//! Core types for the SIM portal.
//!
//! This module provides type-safe wrappers for the portal's domain concepts.

pub mod catalog;
pub mod document;
pub mod flow;
pub mod id;
pub mod identity;
pub mod msisdn;
pub mod payment;
pub mod price;
pub mod registration;
pub mod status;

pub use catalog::{PLANS, Plan, SHOPS, SIM_SWAP_FEE, Shop};
pub use document::DocumentType;
pub use flow::FlowKind;
pub use id::{RequestId, SessionId, ShopId, extract_request_id};
pub use identity::ExtractedIdentity;
pub use msisdn::{Msisdn, MsisdnError, extract_msisdns};
pub use payment::{CashType, PaymentError, PaymentMethod, PaymentSelection};
pub use price::{CurrencyCode, Price};
pub use registration::{FieldError, RegistrationDetails, RegistrationError};
pub use status::*;
