//! Admin API client.
//!
//! Signs operators in, keeps the bearer token in a [`SessionStore`], and
//! attaches it to every admin call. A 401 from any authenticated call clears
//! the store.

mod session;

use std::sync::Arc;

use chrono::NaiveDate;
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{Value, json};
use sim_portal_core::Msisdn;
use thiserror::Error;
use tracing::{info, instrument, warn};

pub use session::{FileSessionStore, MemorySessionStore, SessionStore, SessionStoreError};

use crate::api::client::read_json;
use crate::api::{ApiError, PortalClient};

/// Errors from admin operations.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Backend call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Session storage failed.
    #[error(transparent)]
    Store(#[from] SessionStoreError),

    /// Login succeeded but the response carried no token.
    #[error("Login response did not include a token")]
    MissingToken,
}

impl AdminError {
    /// Whether the error means the operator must sign in again.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Api(ApiError::Unauthorized))
    }
}

/// Signed-in operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSession {
    pub email: String,
    pub name: Option<String>,
}

/// New admin account.
#[derive(Debug, Clone, Serialize)]
pub struct NewAdminUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub email: String,
    #[serde(serialize_with = "expose")]
    pub password: SecretString,
}

fn expose<S: serde::Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Filters for the payments listing. Unset filters are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentFilters {
    pub payment_method: Option<String>,
    pub status: Option<String>,
    pub service_type: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl PaymentFilters {
    fn pairs(&self) -> Vec<(&'static str, String)> {
        [
            ("payment_method", self.payment_method.clone()),
            ("status", self.status.clone()),
            ("service_type", self.service_type.clone()),
            ("from", self.from.map(|d| d.format("%Y-%m-%d").to_string())),
            ("to", self.to.map(|d| d.format("%Y-%m-%d").to_string())),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect()
    }
}

/// Admin API client.
#[derive(Clone)]
pub struct AdminClient {
    api: PortalClient,
    store: Arc<dyn SessionStore>,
}

impl std::fmt::Debug for AdminClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminClient")
            .field("api", &self.api)
            .field("signed_in", &self.is_signed_in())
            .finish()
    }
}

impl AdminClient {
    #[must_use]
    pub fn new(api: PortalClient, store: Arc<dyn SessionStore>) -> Self {
        Self { api, store }
    }

    /// Whether a token is stored.
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.store.token().is_some()
    }

    /// Email of the signed-in operator, if any.
    #[must_use]
    pub fn signed_in_email(&self) -> Option<String> {
        self.store.email()
    }

    /// Sign in and store the returned token.
    ///
    /// The token is read from `token`, then `access_token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials are rejected, the response has no
    /// token, or the session cannot be stored.
    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn login(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<AdminSession, AdminError> {
        let payload = self
            .api
            .post_json(
                "/api/admin/login",
                &json!({ "email": email, "password": password.expose_secret() }),
            )
            .await?;

        let token = ["token", "access_token"]
            .iter()
            .find_map(|key| payload.get(*key).and_then(Value::as_str))
            .filter(|t| !t.is_empty())
            .ok_or(AdminError::MissingToken)?;

        let user = payload.get("user");
        let session = AdminSession {
            email: user
                .and_then(|u| u.get("email"))
                .and_then(Value::as_str)
                .unwrap_or(email)
                .to_owned(),
            name: user
                .and_then(|u| u.get("name"))
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
        };

        self.store
            .set_token(SecretString::from(token), Some(session.email.clone()))?;
        info!("Admin signed in");
        Ok(session)
    }

    /// Forget the stored session.
    ///
    /// # Errors
    ///
    /// Returns an error if persisted state cannot be removed.
    pub fn logout(&self) -> Result<(), AdminError> {
        self.store.clear()?;
        info!("Admin signed out");
        Ok(())
    }

    /// Confirm the stored token still grants admin access.
    ///
    /// Any failure clears the session.
    pub async fn check_access(&self) -> bool {
        match self.dashboard().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Admin access check failed");
                if let Err(e) = self.store.clear() {
                    warn!(error = %e, "Failed to clear admin session");
                }
                false
            }
        }
    }

    /// Dashboard summary.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails; 401 clears the session.
    pub async fn dashboard(&self) -> Result<Value, AdminError> {
        self.authorized(Method::GET, "/api/admin/dashboard", None::<&Value>)
            .await
    }

    /// Admin accounts.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails; 401 clears the session.
    pub async fn users(&self) -> Result<Value, AdminError> {
        self.authorized(Method::GET, "/api/admin/users", None::<&Value>)
            .await
    }

    /// Create an admin account.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails; 401 clears the session.
    #[instrument(skip(self, user), fields(email = %user.email))]
    pub async fn create_user(&self, user: &NewAdminUser) -> Result<Value, AdminError> {
        self.authorized(Method::POST, "/api/admin/users", Some(user))
            .await
    }

    /// Payments listing.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails; 401 clears the session.
    pub async fn payments(&self, filters: &PaymentFilters) -> Result<Value, AdminError> {
        let pairs = filters.pairs();
        let path = if pairs.is_empty() {
            "/api/admin/payments".to_owned()
        } else {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs)
                .finish();
            format!("/api/admin/payments?{query}")
        };
        self.authorized(Method::GET, &path, None::<&Value>).await
    }

    /// Upload a subscriber list; returns how many numbers were inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    #[instrument(skip(self, numbers), fields(count = numbers.len()))]
    pub async fn subscriber_upload(&self, numbers: &[Msisdn]) -> Result<u64, AdminError> {
        let payload = self
            .api
            .post_json("/api/subscriber-upload", &json!({ "phoneNumbers": numbers }))
            .await?;
        let inserted = payload.get("inserted").and_then(Value::as_u64).unwrap_or(0);
        info!(inserted, "Subscriber list uploaded");
        Ok(inserted)
    }

    async fn authorized<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Value, AdminError> {
        let token = self.store.token().ok_or(ApiError::Unauthorized)?;

        let mut request = self
            .api
            .request(method, path)?
            .bearer_auth(token.expose_secret());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(ApiError::from)?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(path, "Admin session rejected, clearing");
            self.store.clear()?;
            return Err(ApiError::Unauthorized.into());
        }
        Ok(read_json(response).await?)
    }
}
