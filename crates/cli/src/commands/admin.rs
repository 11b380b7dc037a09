//! Admin commands.
//!
//! # Usage
//!
//! ```bash
//! # Sign in; the token is kept in PORTAL_SESSION_FILE
//! ADMIN_PASSWORD=... portal-cli admin login -e ops@example.com
//!
//! # Dashboard summary and payments
//! portal-cli admin dashboard
//! portal-cli admin payments --method cash --from 2024-01-01
//!
//! # Create another admin account
//! portal-cli admin create-user -e new@example.com -n "New Admin"
//! ```
//!
//! # Environment Variables
//!
//! - `PORTAL_API_BASE_URL` - Portal backend
//! - `PORTAL_SESSION_FILE` - Where the admin token is kept between runs
//! - `ADMIN_PASSWORD` - Password for `login` and `create-user`

use chrono::NaiveDate;
use secrecy::SecretString;
use sim_portal::Portal;
use sim_portal::admin::{NewAdminUser, PaymentFilters};

use super::{CommandError, print_json};

/// Sign in and store the session token.
pub async fn login(portal: &Portal, email: &str, password: &str) -> Result<(), CommandError> {
    if portal.config().session_file.is_none() {
        tracing::warn!("PORTAL_SESSION_FILE not set, the session ends with this command");
    }
    let session = portal
        .admin()
        .login(email, &SecretString::from(password))
        .await?;
    tracing::info!(
        "Signed in as {}{}",
        session.email,
        session.name.map(|n| format!(" ({n})")).unwrap_or_default()
    );
    Ok(())
}

/// Forget the stored session.
pub fn logout(portal: &Portal) -> Result<(), CommandError> {
    portal.admin().logout()?;
    Ok(())
}

pub async fn dashboard(portal: &Portal) -> Result<(), CommandError> {
    print_json(&portal.admin().dashboard().await?);
    Ok(())
}

pub async fn users(portal: &Portal) -> Result<(), CommandError> {
    print_json(&portal.admin().users().await?);
    Ok(())
}

/// Create an admin account.
pub async fn create_user(
    portal: &Portal,
    email: &str,
    name: Option<String>,
    password: &str,
) -> Result<(), CommandError> {
    if !email.contains('@') || !email.contains('.') {
        return Err(CommandError::Invalid(format!("Invalid email: {email}")));
    }
    let user = NewAdminUser {
        name,
        email: email.to_owned(),
        password: SecretString::from(password),
    };
    let created = portal.admin().create_user(&user).await?;
    tracing::info!("Admin user created: {email}");
    print_json(&created);
    Ok(())
}

/// List payments matching the given filters.
pub async fn payments(
    portal: &Portal,
    payment_method: Option<String>,
    status: Option<String>,
    service_type: Option<String>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<(), CommandError> {
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(CommandError::Invalid(format!(
                "--from {from} is after --to {to}"
            )));
        }
    }
    let filters = PaymentFilters {
        payment_method,
        status,
        service_type,
        from,
        to,
    };
    print_json(&portal.admin().payments(&filters).await?);
    Ok(())
}
