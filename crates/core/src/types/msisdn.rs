//! Mobile subscriber numbers.

use core::fmt;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing an [`Msisdn`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MsisdnError {
    /// The input contains no digits.
    #[error("phone number cannot be empty")]
    Empty,
    /// The digit count is outside the accepted range.
    #[error("phone number must have {min}-{max} digits, got {len}")]
    InvalidLength {
        /// Digits found after normalization.
        len: usize,
        /// Minimum accepted digit count.
        min: usize,
        /// Maximum accepted digit count.
        max: usize,
    },
}

/// A mobile subscriber number (MSISDN).
///
/// Parsing strips every non-digit character, so `"712-345-67"` and
/// `"71234567"` are the same number.
///
/// ## Constraints
///
/// - 7-15 digits after normalization
///
/// ## Examples
///
/// ```
/// use sim_portal_core::Msisdn;
///
/// assert_eq!(Msisdn::parse("712-345-67").unwrap().as_str(), "71234567");
/// assert!(Msisdn::parse("12345").is_err());
/// assert!(Msisdn::parse("abcdef").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Msisdn(String);

impl Msisdn {
    /// Minimum number of digits.
    pub const MIN_DIGITS: usize = 7;
    /// Maximum number of digits.
    pub const MAX_DIGITS: usize = 15;
    /// Country calling code prefixed for display.
    pub const COUNTRY_CODE: &'static str = "+267";

    /// Parse an `Msisdn`, discarding formatting characters.
    ///
    /// # Errors
    ///
    /// Returns an error if no digits remain or the digit count is outside
    /// 7-15.
    pub fn parse(s: &str) -> Result<Self, MsisdnError> {
        let digits: String = s.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return Err(MsisdnError::Empty);
        }
        if !(Self::MIN_DIGITS..=Self::MAX_DIGITS).contains(&digits.len()) {
            return Err(MsisdnError::InvalidLength {
                len: digits.len(),
                min: Self::MIN_DIGITS,
                max: Self::MAX_DIGITS,
            });
        }
        Ok(Self(digits))
    }

    /// Returns the digits as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number with the country calling code, e.g. `+267 71234567`.
    #[must_use]
    pub fn international(&self) -> String {
        format!("{} {}", Self::COUNTRY_CODE, self.0)
    }
}

impl fmt::Display for Msisdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Msisdn {
    type Err = MsisdnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Msisdn {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Extract subscriber numbers from a text blob.
///
/// The text is split into cells on line breaks, commas, semicolons, tabs and
/// pipes. Each cell is normalized by stripping non-digits and kept only if
/// 7-15 digits remain. Duplicates collapse to their first occurrence.
///
/// ```
/// use sim_portal_core::extract_msisdns;
///
/// let numbers = extract_msisdns("71234567\n12345\n712-345-67\nabcdef");
/// let digits: Vec<&str> = numbers.iter().map(|n| n.as_str()).collect();
/// assert_eq!(digits, ["71234567"]);
/// ```
#[must_use]
pub fn extract_msisdns(text: &str) -> Vec<Msisdn> {
    let mut seen = HashSet::new();
    text.split(['\n', '\r', ',', ';', '\t', '|'])
        .filter_map(|cell| Msisdn::parse(cell).ok())
        .filter(|msisdn| seen.insert(msisdn.clone()))
        .collect()
}
