//! Subscriber list commands.
//!
//! # Usage
//!
//! ```bash
//! # Is a number on the KYC compliance list?
//! portal-cli subscribers lookup 71234567
//!
//! # Upload numbers from a text or CSV export (requires admin login)
//! portal-cli subscribers upload numbers.csv
//! ```

use std::path::Path;

use serde_json::json;
use sim_portal::Portal;
use sim_portal::api::RequestSession;
use sim_portal_core::{Msisdn, extract_msisdns};

use super::{CommandError, print_json};

/// Check whether `number` is a known subscriber.
pub async fn lookup(portal: &Portal, number: &str) -> Result<(), CommandError> {
    let msisdn = Msisdn::parse(number).map_err(|e| CommandError::Invalid(e.to_string()))?;
    let exists = portal.client().subscriber_lookup(&msisdn).await?;
    tracing::info!(msisdn = %msisdn, exists, "Subscriber lookup");
    print_json(&json!({ "msisdn": msisdn, "exists": exists }));
    Ok(())
}

/// Extract numbers from `path` and upload them.
pub async fn upload(portal: &Portal, path: &Path) -> Result<(), CommandError> {
    let text = std::fs::read_to_string(path)?;
    let numbers = extract_msisdns(&text);
    if numbers.is_empty() {
        return Err(CommandError::Invalid(format!(
            "No valid phone numbers found in {}",
            path.display()
        )));
    }
    tracing::info!(count = numbers.len(), "Uploading subscriber list");
    let inserted = portal.admin().subscriber_upload(&numbers).await?;
    tracing::info!(
        "Uploaded {} numbers, {} new",
        numbers.len(),
        inserted
    );
    Ok(())
}
