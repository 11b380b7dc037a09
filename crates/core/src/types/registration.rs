//! Subscriber registration details collected before identity verification.

use core::fmt;

use serde::{Deserialize, Serialize};

/// A single field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Wire name of the field (camelCase).
    pub field: &'static str,
    pub message: &'static str,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Registration form validation failed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Please fix the form errors")]
pub struct RegistrationError {
    /// Every failing field, in form order.
    pub fields: Vec<FieldError>,
}

impl RegistrationError {
    /// Message for a particular field, if it failed.
    #[must_use]
    pub fn message_for(&self, field: &str) -> Option<&'static str> {
        self.fields
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message)
    }
}

/// Address and next-of-kin details for a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationDetails {
    pub plot_number: String,
    pub ward: String,
    pub village: String,
    pub city: String,
    #[serde(default)]
    pub postal_address: String,
    pub next_of_kin_name: String,
    pub next_of_kin_relation: String,
    pub next_of_kin_phone: String,
    #[serde(default)]
    pub email: String,
}

/// (field, value, required, max length, required message, too-long message)
type Rule<'a> = (&'static str, &'a str, bool, usize, &'static str, &'static str);

impl RegistrationDetails {
    /// Validate the form and return a trimmed copy.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistrationError`] listing every field that is missing
    /// or longer than its limit.
    pub fn validate(&self) -> Result<Self, RegistrationError> {
        let trimmed = self.trimmed();
        let rules: [Rule<'_>; 9] = [
            ("plotNumber", trimmed.plot_number.as_str(), true, 50, "Plot number is required", "Plot number too long"),
            ("ward", trimmed.ward.as_str(), true, 50, "Ward is required", "Ward name too long"),
            ("village", trimmed.village.as_str(), true, 100, "Village is required", "Village name too long"),
            ("city", trimmed.city.as_str(), true, 100, "City is required", "City name too long"),
            ("postalAddress", trimmed.postal_address.as_str(), false, 200, "", "Postal address too long"),
            ("nextOfKinName", trimmed.next_of_kin_name.as_str(), true, 100, "Next of kin name is required", "Name too long"),
            ("nextOfKinRelation", trimmed.next_of_kin_relation.as_str(), true, usize::MAX, "Relationship is required", ""),
            ("nextOfKinPhone", trimmed.next_of_kin_phone.as_str(), true, 20, "Phone number is required", "Phone number too long"),
            ("email", trimmed.email.as_str(), false, 255, "", "Email too long"),
        ];

        let fields: Vec<FieldError> = rules
            .iter()
            .filter_map(|&(field, value, required, max, missing, too_long)| {
                if required && value.is_empty() {
                    Some(FieldError { field, message: missing })
                } else if value.chars().count() > max {
                    Some(FieldError { field, message: too_long })
                } else {
                    None
                }
            })
            .collect();

        if fields.is_empty() {
            Ok(trimmed)
        } else {
            Err(RegistrationError { fields })
        }
    }

    fn trimmed(&self) -> Self {
        Self {
            plot_number: self.plot_number.trim().to_owned(),
            ward: self.ward.trim().to_owned(),
            village: self.village.trim().to_owned(),
            city: self.city.trim().to_owned(),
            postal_address: self.postal_address.trim().to_owned(),
            next_of_kin_name: self.next_of_kin_name.trim().to_owned(),
            next_of_kin_relation: self.next_of_kin_relation.trim().to_owned(),
            next_of_kin_phone: self.next_of_kin_phone.trim().to_owned(),
            email: self.email.trim().to_owned(),
        }
    }
}
