//! Identity fields extracted from a verified document.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::DocumentType;

/// Fields the verification provider read from the customer's document.
///
/// Every field is optional because providers only return what they could
/// read. A record is usable for confirmation only when it names the person
/// or the document (see [`ExtractedIdentity::from_payload`]).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtractedIdentity {
    pub full_name: Option<String>,
    pub first_name: Option<String>,
    pub surname: Option<String>,
    pub date_of_birth: Option<String>,
    pub sex: Option<String>,
    pub document_type: Option<DocumentType>,
    pub document_number: Option<String>,
    pub country: Option<String>,
    pub expiry_date: Option<String>,
}

impl ExtractedIdentity {
    /// Read the identity record from a verified status payload.
    ///
    /// The record is taken from `payload.data` when that is an object, and
    /// from the payload itself otherwise. Returns `None` when the record
    /// carries neither a name nor a document number.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let record = payload
            .get("data")
            .filter(|data| data.is_object())
            .unwrap_or(payload);
        if !record.is_object() {
            return None;
        }

        let identity = Self {
            full_name: text(record, "full_name"),
            first_name: text(record, "first_name"),
            surname: text(record, "surname"),
            date_of_birth: text(record, "date_of_birth"),
            sex: text(record, "sex"),
            document_type: text(record, "document_type").and_then(|s| s.parse().ok()),
            document_number: text(record, "document_number"),
            country: text(record, "country"),
            expiry_date: text(record, "expiry_date"),
        };

        let identifies_someone = identity.full_name.is_some()
            || identity.first_name.is_some()
            || identity.surname.is_some()
            || identity.document_number.is_some();
        identifies_someone.then_some(identity)
    }

    /// Name for display: full name, else first name and surname joined.
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        if let Some(full) = &self.full_name {
            return Some(full.clone());
        }
        let joined = [self.first_name.as_deref(), self.surname.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        (!joined.is_empty()).then_some(joined)
    }

    /// Sex for display (`m`/`male` and `f`/`female` are normalized).
    #[must_use]
    pub fn sex_label(&self) -> Option<String> {
        self.sex.as_deref().map(|sex| match sex.to_lowercase().as_str() {
            "m" | "male" => "Male".to_owned(),
            "f" | "female" => "Female".to_owned(),
            _ => sex.to_owned(),
        })
    }

    /// Date of birth formatted like `05 March 1990`.
    #[must_use]
    pub fn date_of_birth_label(&self) -> Option<String> {
        self.date_of_birth.as_deref().map(format_date)
    }

    /// Document expiry formatted like `05 March 2030`.
    #[must_use]
    pub fn expiry_date_label(&self) -> Option<String> {
        self.expiry_date.as_deref().map(format_date)
    }
}

fn text(record: &Value, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

/// Dates that do not parse as ISO dates are shown verbatim.
fn format_date(raw: &str) -> String {
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_or_else(|_| raw.to_owned(), |date| date.format("%d %B %Y").to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_reads_top_level_fields() {
        let payload = json!({
            "kyc_status": "verified",
            "first_name": "Neo",
            "surname": "Kgosi",
            "document_type": "omang",
            "document_number": "123456789",
            "date_of_birth": "1990-03-05",
            "sex": "F"
        });
        let identity = ExtractedIdentity::from_payload(&payload).unwrap();
        assert_eq!(identity.display_name().as_deref(), Some("Neo Kgosi"));
        assert_eq!(identity.document_type, Some(DocumentType::Omang));
        assert_eq!(identity.sex_label().as_deref(), Some("Female"));
        assert_eq!(identity.date_of_birth_label().as_deref(), Some("05 March 1990"));
    }

    #[test]
    fn test_prefers_nested_data_object() {
        let payload = json!({
            "status": "verified",
            "full_name": "Top Level",
            "data": {"full_name": "Nested Name"}
        });
        let identity = ExtractedIdentity::from_payload(&payload).unwrap();
        assert_eq!(identity.full_name.as_deref(), Some("Nested Name"));
    }

    #[test]
    fn test_missing_identity_fields() {
        assert!(ExtractedIdentity::from_payload(&json!({"kyc_status": "verified"})).is_none());
        assert!(ExtractedIdentity::from_payload(&json!({"data": {"country": "BW"}})).is_none());
        assert!(ExtractedIdentity::from_payload(&json!("verified")).is_none());
    }

    #[test]
    fn test_unparseable_date_is_kept() {
        let identity = ExtractedIdentity {
            expiry_date: Some("soon".into()),
            ..ExtractedIdentity::default()
        };
        assert_eq!(identity.expiry_date_label().as_deref(), Some("soon"));
    }
}
