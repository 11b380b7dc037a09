//! Request session client: the backend's "request" resource.
//!
//! Each flow (eSIM purchase, SIM swap, KYC compliance) creates a request on
//! the backend and then mutates it step by step. [`RequestSession`] is the
//! seam the orchestrators and the reconciliation engine depend on;
//! [`PortalClient`] is its HTTP implementation.

pub(crate) mod client;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use serde_json::{Value, json};
use sim_portal_core::{
    CurrencyCode, DocumentType, FlowKind, Msisdn, Price, RegistrationDetails, RequestId, ShopId,
};
use thiserror::Error;

pub use client::PortalClient;

/// Errors that can occur when talking to the portal backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status.
    #[error("{message}")]
    Api { status: u16, message: String },

    /// A start call returned no recognizable request id.
    #[error("Backend response did not include a request id")]
    MissingIdentifier,

    /// An authenticated call was rejected; the stored session was cleared.
    #[error("Session expired, please sign in again")]
    Unauthorized,

    /// Failed to parse the response body.
    #[error("Parse error: {0}")]
    Parse(String),

    /// An endpoint URL could not be built from the base URL.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ApiError {
    /// HTTP status of an API error, if the backend answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Unauthorized => Some(401),
            _ => None,
        }
    }
}

/// SIM delivered by a swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimType {
    Esim,
    Physical,
}

/// One step mutation of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    AcceptTerms { accepted: bool },
    SelectNumber { msisdn: Msisdn },
    Registration(RegistrationDetails),
    Payment { amount: Decimal },
    StartKyc { document_type: DocumentType },
    /// eSIM purchase only.
    ConfirmKyc { verified: bool },
    /// eSIM purchase only.
    Activate,
    SendOtp { channel: String },
    VerifyOtp { otp: String },
    /// SIM swap only.
    SimType { sim_type: SimType },
    /// SIM swap only.
    FinalizeEsim,
    /// SIM swap only.
    SelectShop { shop_id: ShopId },
    /// KYC compliance only. The id is forwarded exactly as the status
    /// endpoint reported it.
    Complete {
        verified: bool,
        kyc_verification_id: Option<Value>,
    },
}

impl Mutation {
    /// Endpoint relative to `/api/{flow}/{id}/`.
    #[must_use]
    pub const fn path(&self) -> &'static str {
        match self {
            Self::AcceptTerms { .. } => "terms",
            Self::SelectNumber { .. } => "number",
            Self::Registration(_) => "registration",
            Self::Payment { .. } => "payment",
            Self::StartKyc { .. } => "kyc/start",
            Self::ConfirmKyc { .. } => "confirm-kyc",
            Self::Activate => "activate",
            Self::SendOtp { .. } => "otp/send",
            Self::VerifyOtp { .. } => "otp/verify",
            Self::SimType { .. } => "sim-type",
            Self::FinalizeEsim => "esim/finalize",
            Self::SelectShop { .. } => "shop/select",
            Self::Complete { .. } => "complete",
        }
    }

    /// JSON request body.
    #[must_use]
    pub fn body(&self) -> Value {
        match self {
            Self::AcceptTerms { accepted } => json!({ "accepted": accepted }),
            Self::SelectNumber { msisdn } => json!({ "msisdn": msisdn }),
            Self::Registration(details) => serde_json::to_value(details).unwrap_or(Value::Null),
            Self::Payment { amount } => json!({ "amount": decimal_number(*amount) }),
            Self::StartKyc { document_type } => json!({ "document_type": document_type }),
            Self::ConfirmKyc { verified } => json!({ "verified": verified }),
            Self::Activate | Self::FinalizeEsim => json!({}),
            Self::SendOtp { channel } => json!({ "channel": channel }),
            Self::VerifyOtp { otp } => json!({ "otp": otp }),
            Self::SimType { sim_type } => json!({ "sim_type": sim_type }),
            Self::SelectShop { shop_id } => json!({ "shop_id": shop_id }),
            Self::Complete {
                verified,
                kyc_verification_id,
            } => match kyc_verification_id {
                Some(id) => json!({ "verified": verified, "kyc_verification_id": id }),
                None => json!({ "verified": verified }),
            },
        }
    }
}

/// Entry in the payments ledger, kept for audit and reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msisdn: Option<Msisdn>,
    #[serde(serialize_with = "serialize_amount")]
    pub amount: Decimal,
    pub currency: &'static str,
    pub status: &'static str,
}

impl LedgerEntry {
    /// A completed payment of `price`.
    #[must_use]
    pub fn completed(price: Price, msisdn: Option<Msisdn>) -> Self {
        Self {
            msisdn,
            amount: price.amount,
            currency: CurrencyCode::code(price.currency_code),
            status: "completed",
        }
    }
}

/// Typed facade over the backend's request resource.
///
/// Implementations hold no flow state; every call maps one request to one
/// response.
#[async_trait]
pub trait RequestSession: Send + Sync {
    /// Create a request for `flow` and return its id.
    ///
    /// # Errors
    ///
    /// [`ApiError::MissingIdentifier`] when the response carries no id, or
    /// the transport/API error.
    async fn start(&self, flow: FlowKind) -> Result<RequestId, ApiError>;

    /// Apply one step mutation to a request.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    async fn mutate(
        &self,
        flow: FlowKind,
        request_id: &RequestId,
        mutation: Mutation,
    ) -> Result<Value, ApiError>;

    /// Numbers available for selection.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    async fn list_numbers(
        &self,
        flow: FlowKind,
        request_id: &RequestId,
    ) -> Result<Vec<String>, ApiError>;

    /// Current verification status payload.
    ///
    /// Never fails: network and parse failures come back as `None`, meaning
    /// "no new information".
    async fn poll_status(&self, flow: FlowKind, request_id: &RequestId) -> Option<Value>;

    /// Whether `msisdn` is a known subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    async fn subscriber_lookup(&self, msisdn: &Msisdn) -> Result<bool, ApiError>;

    /// Record a payment in the ledger.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    async fn record_ledger(&self, entry: &LedgerEntry) -> Result<(), ApiError>;
}

/// Amounts go over the wire as JSON numbers.
fn decimal_number(amount: Decimal) -> Value {
    amount
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .map_or(Value::Null, Value::Number)
}

fn serialize_amount<S: serde::Serializer>(amount: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    decimal_number(*amount).serialize(serializer)
}

/// Read a list of numbers from the shapes the numbers endpoint uses:
/// `{"numbers": [...]}`, `{"data": [...]}` or a bare array.
#[must_use]
pub fn parse_numbers(payload: &Value) -> Vec<String> {
    let list = payload
        .get("numbers")
        .or_else(|| payload.get("data"))
        .unwrap_or(payload);
    list.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    Value::Object(_) => item
                        .get("msisdn")
                        .and_then(Value::as_str)
                        .map(ToOwned::to_owned),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numbers_shapes() {
        assert_eq!(parse_numbers(&json!({"numbers": ["71112222"]})), ["71112222"]);
        assert_eq!(parse_numbers(&json!({"data": [71113333]})), ["71113333"]);
        assert_eq!(
            parse_numbers(&json!([{"msisdn": "71114444"}, "71115555"])),
            ["71114444", "71115555"]
        );
        assert!(parse_numbers(&json!({"ok": true})).is_empty());
    }

    #[test]
    fn test_mutation_paths_and_bodies() {
        let msisdn = Msisdn::parse("71112222").unwrap();
        let m = Mutation::SelectNumber { msisdn };
        assert_eq!(m.path(), "number");
        assert_eq!(m.body(), json!({"msisdn": "71112222"}));

        let m = Mutation::StartKyc { document_type: DocumentType::Omang };
        assert_eq!(m.path(), "kyc/start");
        assert_eq!(m.body(), json!({"document_type": "omang"}));

        let m = Mutation::Complete { verified: true, kyc_verification_id: None };
        assert_eq!(m.body(), json!({"verified": true}));

        let m = Mutation::Complete { verified: true, kyc_verification_id: Some(json!(42)) };
        assert_eq!(m.body(), json!({"verified": true, "kyc_verification_id": 42}));

        let m = Mutation::SelectShop { shop_id: ShopId::new(2) };
        assert_eq!(m.body(), json!({"shop_id": 2}));
    }

    #[test]
    fn test_ledger_entry_serialization() {
        let entry = LedgerEntry::completed(Price::pula(110), None);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["currency"], "BWP");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["amount"], json!(110.0));
        assert!(json.get("msisdn").is_none());
    }
}
