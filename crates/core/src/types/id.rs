//! Identifiers for requests, verification sessions and catalog entries.
//!
//! Backend request ids are opaque: some endpoints return strings, others
//! numbers, and the field carrying them is not uniform across responses.
//! [`extract_request_id`] tries a fixed, ordered list of field paths and returns
//! the first usable match.

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Macro to define a type-safe numeric ID wrapper.
///
/// Creates a newtype wrapper around `i32` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`
/// - Conversion methods: `new()`, `as_i32()`
/// - `From<i32>` and `Into<i32>` implementations
///
/// # Example
///
/// ```rust
/// # use sim_portal_core::define_id;
/// define_id!(BranchId);
///
/// let branch = BranchId::new(3);
/// assert_eq!(branch.as_i32(), 3);
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(i32);

        impl $name {
            /// Create a new ID from an i32 value.
            #[must_use]
            pub const fn new(id: i32) -> Self {
                Self(id)
            }

            /// Get the underlying i32 value.
            #[must_use]
            pub const fn as_i32(&self) -> i32 {
                self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i32> for $name {
            fn from(id: i32) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i32 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(ShopId);

/// Identifier of a server-side request (eSIM purchase, SIM swap or KYC
/// compliance), assigned by the backend when a flow starts.
///
/// Numeric ids are stored in their decimal string form so that both shapes
/// compare and print the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Create a request id from its string form.
    ///
    /// Returns `None` for empty or whitespace-only input.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_owned()))
    }

    /// Interpret a JSON value as a request id.
    ///
    /// Accepts non-empty strings and numbers; everything else is rejected.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::new(s.as_str()),
            Value::Number(n) => Self::new(n.to_string()),
            _ => None,
        }
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom("request id must be a non-empty string or number"))
    }
}

/// Locally generated token correlating a provider interaction with its
/// request. Embedded in the metadata handed to the verification provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random session id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Field paths searched for a request id, in priority order.
const REQUEST_ID_PATHS: &[&[&str]] = &[
    &["request_id"],
    &["requestId"],
    &["id"],
    &["data", "request_id"],
    &["data", "requestId"],
    &["data", "id"],
    &["data", "request", "id"],
    &["request", "id"],
    &["request", "request_id"],
];

/// Extract a request id from a backend response.
///
/// Each path in the list is tried in order; the first one holding a
/// non-empty string or a number wins.
///
/// ```
/// use serde_json::json;
/// use sim_portal_core::extract_request_id;
///
/// let id = extract_request_id(&json!({"data": {"request": {"id": 42}}})).unwrap();
/// assert_eq!(id.as_str(), "42");
/// ```
#[must_use]
pub fn extract_request_id(payload: &Value) -> Option<RequestId> {
    REQUEST_ID_PATHS
        .iter()
        .filter_map(|path| lookup(payload, path))
        .find_map(RequestId::from_value)
}

/// Walk a nested object by key path.
pub(crate) fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(*key))
}
