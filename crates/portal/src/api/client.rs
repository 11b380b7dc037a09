//! HTTP implementation of the request session client.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::Serialize;
use serde_json::{Value, json};
use sim_portal_core::{FlowKind, Msisdn, RequestId, extract_request_id};
use tracing::{debug, instrument, warn};
use url::{Url, form_urlencoded};

use super::{ApiError, LedgerEntry, Mutation, RequestSession, parse_numbers};
use crate::config::ApiConfig;

/// Portal backend client.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct PortalClient {
    client: reqwest::Client,
    base_url: Url,
}

impl PortalClient {
    /// Create a new backend client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    /// Absolute URL for an API path, ignoring trailing slashes on the base.
    ///
    /// # Errors
    ///
    /// Returns error if the joined URL does not parse.
    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    /// Start building a request to an API path.
    pub(crate) fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        Ok(self.client.request(method, self.endpoint(path)?))
    }

    /// POST a JSON body and decode the JSON response.
    pub(crate) async fn post_json<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Value, ApiError> {
        let response = self.request(Method::POST, path)?.json(body).send().await?;
        read_json(response).await
    }

    /// GET and decode the JSON response.
    pub(crate) async fn get_json(&self, path: &str) -> Result<Value, ApiError> {
        let response = self.request(Method::GET, path)?.send().await?;
        read_json(response).await
    }
}

/// Decode a response, turning non-success statuses into [`ApiError::Api`].
///
/// Error messages come from the payload's `message` or `error` field, then
/// the status reason phrase. An empty success body decodes as `null`.
pub(crate) async fn read_json(response: Response) -> Result<Value, ApiError> {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let payload: Option<Value> = serde_json::from_str(&text).ok();

    if !status.is_success() {
        let message = payload
            .as_ref()
            .and_then(|p| {
                ["message", "error"]
                    .iter()
                    .find_map(|key| p.get(*key).and_then(Value::as_str))
            })
            .map(ToOwned::to_owned)
            .or_else(|| status.canonical_reason().map(ToOwned::to_owned))
            .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()));
        return Err(ApiError::Api {
            status: status.as_u16(),
            message,
        });
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    payload.ok_or_else(|| ApiError::Parse(format!("invalid JSON body: {text}")))
}

/// Path of a request step. The id is opaque, so it is percent-encoded as a
/// single segment.
fn request_path(flow: FlowKind, request_id: &RequestId, step: &str) -> String {
    let id = form_urlencoded::byte_serialize(request_id.as_str().as_bytes())
        .collect::<String>()
        .replace('+', "%20");
    format!("/api/{}/{}/{}", flow.path_segment(), id, step)
}

#[async_trait]
impl RequestSession for PortalClient {
    #[instrument(skip(self), fields(flow = %flow))]
    async fn start(&self, flow: FlowKind) -> Result<RequestId, ApiError> {
        let payload = self
            .post_json(&format!("/api/{}/start", flow.path_segment()), &json!({}))
            .await?;

        let request_id = extract_request_id(&payload).ok_or(ApiError::MissingIdentifier)?;
        debug!(request_id = %request_id, "Request started");
        Ok(request_id)
    }

    #[instrument(skip(self, mutation), fields(flow = %flow, request_id = %request_id, step = mutation.path()))]
    async fn mutate(
        &self,
        flow: FlowKind,
        request_id: &RequestId,
        mutation: Mutation,
    ) -> Result<Value, ApiError> {
        self.post_json(&request_path(flow, request_id, mutation.path()), &mutation.body())
            .await
    }

    #[instrument(skip(self), fields(flow = %flow, request_id = %request_id))]
    async fn list_numbers(
        &self,
        flow: FlowKind,
        request_id: &RequestId,
    ) -> Result<Vec<String>, ApiError> {
        let payload = self.get_json(&request_path(flow, request_id, "numbers")).await?;
        Ok(parse_numbers(&payload))
    }

    #[instrument(skip(self), fields(flow = %flow, request_id = %request_id))]
    async fn poll_status(&self, flow: FlowKind, request_id: &RequestId) -> Option<Value> {
        match self
            .get_json(&request_path(flow, request_id, flow.status_path()))
            .await
        {
            Ok(payload) => Some(payload),
            Err(e) => {
                debug!(error = %e, "Status check failed, treating as no update");
                None
            }
        }
    }

    #[instrument(skip(self), fields(msisdn = %msisdn))]
    async fn subscriber_lookup(&self, msisdn: &Msisdn) -> Result<bool, ApiError> {
        let payload = self
            .post_json("/api/subscriber-lookup", &json!({ "msisdn": msisdn }))
            .await?;
        Ok(payload
            .get("exists")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    #[instrument(skip(self, entry), fields(amount = %entry.amount))]
    async fn record_ledger(&self, entry: &LedgerEntry) -> Result<(), ApiError> {
        self.post_json("/api/payments/record", entry)
            .await
            .map(|_| ())
            .inspect_err(|e| warn!(error = %e, "Ledger write rejected"))
    }
}
