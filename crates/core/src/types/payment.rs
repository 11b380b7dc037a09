//! Payment method selection and its validation rules.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors raised while validating a [`PaymentSelection`].
///
/// Checked in declaration order; the first failing rule is reported.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// No payment method was chosen.
    #[error("Please select a payment method")]
    MethodRequired,
    /// Cash was chosen without saying whether an agent assists.
    #[error("Please select assisted or non-assisted")]
    CashTypeRequired,
    /// Cash payments need a voucher code.
    #[error("Please enter voucher code")]
    VoucherRequired,
    /// Assisted cash payments need the operator's id.
    #[error("Please enter Customer Care User ID")]
    CustomerCareUserRequired,
    /// The selected plan does not exist.
    #[error("Unknown plan: {0}")]
    UnknownPlan(String),
}

/// How the customer pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Cash,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Card => write!(f, "card"),
            Self::Cash => write!(f, "cash"),
        }
    }
}

/// Whether a customer care agent takes the cash payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashType {
    Assisted,
    NonAssisted,
}

/// Customer's payment choices, captured at the payment step.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaymentSelection {
    /// Plan being bought; absent for flat-fee flows such as SIM swap.
    pub plan_id: Option<String>,
    pub method: Option<PaymentMethod>,
    pub cash_type: Option<CashType>,
    pub voucher_code: String,
    pub customer_care_user_id: String,
}

impl PaymentSelection {
    /// Card payment for an optional plan.
    #[must_use]
    pub fn card(plan_id: Option<&str>) -> Self {
        Self {
            plan_id: plan_id.map(ToOwned::to_owned),
            method: Some(PaymentMethod::Card),
            ..Self::default()
        }
    }

    /// Cash payment with a voucher.
    #[must_use]
    pub fn cash(plan_id: Option<&str>, cash_type: CashType, voucher_code: &str) -> Self {
        Self {
            plan_id: plan_id.map(ToOwned::to_owned),
            method: Some(PaymentMethod::Cash),
            cash_type: Some(cash_type),
            voucher_code: voucher_code.to_owned(),
            customer_care_user_id: String::new(),
        }
    }

    /// Set the customer care operator taking an assisted payment.
    #[must_use]
    pub fn with_customer_care_user(mut self, user_id: &str) -> Self {
        user_id.clone_into(&mut self.customer_care_user_id);
        self
    }

    /// Check the selection before any payment is attempted.
    ///
    /// # Errors
    ///
    /// Returns the first rule that fails: method chosen; for cash, a cash
    /// type, a non-blank voucher code, and for assisted cash a non-blank
    /// customer care user id.
    pub fn validate(&self) -> Result<PaymentMethod, PaymentError> {
        let method = self.method.ok_or(PaymentError::MethodRequired)?;
        if method == PaymentMethod::Cash {
            let cash_type = self.cash_type.ok_or(PaymentError::CashTypeRequired)?;
            if self.voucher_code.trim().is_empty() {
                return Err(PaymentError::VoucherRequired);
            }
            if cash_type == CashType::Assisted && self.customer_care_user_id.trim().is_empty() {
                return Err(PaymentError::CustomerCareUserRequired);
            }
        }
        Ok(method)
    }
}
