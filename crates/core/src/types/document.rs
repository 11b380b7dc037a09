//! Identity document types accepted for verification.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Document presented during identity verification.
///
/// Citizens verify with an Omang; non-citizens with a passport. Each maps to
/// a different provider-side flow configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// Botswana national identity card.
    Omang,
    /// Passport, for non-citizens.
    Passport,
}

impl DocumentType {
    /// Wire value sent to the backend and the provider.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Omang => "omang",
            Self::Passport => "passport",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Omang => "Omang (National ID)",
            Self::Passport => "Passport",
        }
    }

    /// Whether the document belongs to a citizen.
    #[must_use]
    pub const fn is_citizen(self) -> bool {
        matches!(self, Self::Omang)
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "omang" => Ok(Self::Omang),
            "passport" => Ok(Self::Passport),
            other => Err(format!("invalid document type: {other}")),
        }
    }
}
