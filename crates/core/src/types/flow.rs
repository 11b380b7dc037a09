//! Flow kinds served by the portal.

use core::fmt;

use serde::{Deserialize, Serialize};

/// The customer transaction a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    /// Buy a new eSIM with a bundle.
    EsimPurchase,
    /// Replace a lost or damaged SIM for an existing number.
    SimSwap,
    /// Re-verify the identity of an existing subscriber.
    KycCompliance,
}

impl FlowKind {
    /// Path segment under `/api/` for this flow's endpoints.
    #[must_use]
    pub const fn path_segment(self) -> &'static str {
        match self {
            Self::EsimPurchase => "esim",
            Self::SimSwap => "simswap",
            Self::KycCompliance => "kyc-compliance",
        }
    }

    /// Short name used in user-facing messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::EsimPurchase => "eSIM",
            Self::SimSwap => "SIM swap",
            Self::KycCompliance => "KYC compliance",
        }
    }

    /// Status endpoint relative to the request resource.
    ///
    /// KYC compliance exposes the request status directly; the other flows
    /// nest it under `kyc/`.
    #[must_use]
    pub const fn status_path(self) -> &'static str {
        match self {
            Self::EsimPurchase | Self::SimSwap => "kyc/status",
            Self::KycCompliance => "status",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EsimPurchase => write!(f, "esim_purchase"),
            Self::SimSwap => write!(f, "sim_swap"),
            Self::KycCompliance => write!(f, "kyc_compliance"),
        }
    }
}

impl std::str::FromStr for FlowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "esim_purchase" | "esim" => Ok(Self::EsimPurchase),
            "sim_swap" | "simswap" => Ok(Self::SimSwap),
            "kyc_compliance" | "kyc-compliance" => Ok(Self::KycCompliance),
            _ => Err(format!("invalid flow kind: {s}")),
        }
    }
}
