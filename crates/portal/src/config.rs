//! Portal configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `PORTAL_API_BASE_URL` - Base URL of the portal backend (e.g. `https://portal.example.com/backend/public`)
//!
//! ## Optional
//! - `PORTAL_HTTP_TIMEOUT_SECS` - Per-request timeout (default: 30)
//! - `PORTAL_SESSION_FILE` - File holding the admin bearer token between runs
//! - `PROVIDER_CLIENT_ID` - Verification provider client id
//! - `PROVIDER_CITIZEN_FLOW_ID` - Provider flow for Omang holders
//! - `PROVIDER_NON_CITIZEN_FLOW_ID` - Provider flow for passport holders
//! - `PROVIDER_SCRIPT_URL` - Provider widget script (default: <https://web-button.metamap.com/button.js>)
//! - `PROVIDER_FRAME_PATTERN` - Regex matching provider iframes (default: `(?i)metamap|getmati|mati`)
//! - `KYC_POLL_INTERVAL_SECS` - Status poll interval (default: 3)
//! - `KYC_VERIFICATION_WINDOW_SECS` - Polling window before timeout (default: 600)
//! - `PAYMENT_PROCESSING_DELAY_MS` - Simulated payment latency (default: 2000)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use sim_portal_core::DocumentType;
use thiserror::Error;
use url::Url;

const DEFAULT_SCRIPT_URL: &str = "https://web-button.metamap.com/button.js";
const DEFAULT_FRAME_PATTERN: &str = "(?i)metamap|getmati|mati";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Portal client configuration.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// Backend HTTP API
    pub api: ApiConfig,
    /// Verification provider widget
    pub provider: ProviderConfig,
    /// Status reconciliation timings
    pub engine: EngineConfig,
    /// Simulated payment processing latency
    pub payment_delay: Duration,
    /// Where the admin bearer token is kept; in-memory when unset
    pub session_file: Option<PathBuf>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Backend HTTP API configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL; trailing slashes are ignored when building endpoint URLs
    pub base_url: Url,
    /// Per-request timeout
    pub timeout: Duration,
}

/// Verification provider widget configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Provider client id passed to the widget
    pub client_id: String,
    /// Flow used for Omang (citizen) verification
    pub citizen_flow_id: String,
    /// Flow used for passport (non-citizen) verification
    pub non_citizen_flow_id: String,
    /// Widget script injected into the host
    pub script_url: String,
    /// Matches provider iframes by src, title, aria-label or name
    pub frame_pattern: Regex,
    /// How often the watchdog checks that the provider UI is still showing
    pub watchdog_interval: Duration,
    /// Hard ceiling on one provider interaction
    pub max_session: Duration,
}

/// Status reconciliation timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Interval between automatic status polls
    pub poll_interval: Duration,
    /// Interval of the countdown that enforces the deadline
    pub countdown_interval: Duration,
    /// Time allowed for a terminal status after polling starts
    pub window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            countdown_interval: Duration::from_secs(1),
            window: Duration::from_secs(600),
        }
    }
}

impl ProviderConfig {
    /// Provider configuration with default script, pattern and timings.
    #[must_use]
    pub fn new(client_id: &str, citizen_flow_id: &str, non_citizen_flow_id: &str) -> Self {
        Self {
            client_id: client_id.to_owned(),
            citizen_flow_id: citizen_flow_id.to_owned(),
            non_citizen_flow_id: non_citizen_flow_id.to_owned(),
            script_url: DEFAULT_SCRIPT_URL.to_owned(),
            frame_pattern: default_frame_pattern(),
            watchdog_interval: Duration::from_millis(800),
            max_session: Duration::from_secs(600),
        }
    }

    /// Provider flow id for a document type.
    #[must_use]
    pub fn flow_for(&self, document_type: DocumentType) -> &str {
        if document_type.is_citizen() {
            &self.citizen_flow_id
        } else {
            &self.non_citizen_flow_id
        }
    }

    fn from_env() -> Result<Self, ConfigError> {
        let frame_pattern = match get_optional_env("PROVIDER_FRAME_PATTERN") {
            Some(pattern) => Regex::new(&pattern).map_err(|e| {
                ConfigError::InvalidEnvVar("PROVIDER_FRAME_PATTERN".to_string(), e.to_string())
            })?,
            None => default_frame_pattern(),
        };

        Ok(Self {
            client_id: get_env_or_default("PROVIDER_CLIENT_ID", ""),
            citizen_flow_id: get_env_or_default("PROVIDER_CITIZEN_FLOW_ID", ""),
            non_citizen_flow_id: get_env_or_default("PROVIDER_NON_CITIZEN_FLOW_ID", ""),
            script_url: get_env_or_default("PROVIDER_SCRIPT_URL", DEFAULT_SCRIPT_URL),
            frame_pattern,
            ..Self::new("", "", "")
        })
    }
}

impl PortalConfig {
    /// Configuration with defaults for everything but the backend URL.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            api: ApiConfig {
                base_url,
                timeout: Duration::from_secs(30),
            },
            provider: ProviderConfig::new("", "", ""),
            engine: EngineConfig::default(),
            payment_delay: Duration::from_secs(2),
            session_file: None,
            sentry_dsn: None,
            sentry_environment: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let base_url = get_required_env("PORTAL_API_BASE_URL")?;
        let base_url = Url::parse(&base_url).map_err(|e| {
            ConfigError::InvalidEnvVar("PORTAL_API_BASE_URL".to_string(), e.to_string())
        })?;

        let engine = EngineConfig {
            poll_interval: get_duration_secs("KYC_POLL_INTERVAL_SECS", 3)?,
            window: get_duration_secs("KYC_VERIFICATION_WINDOW_SECS", 600)?,
            ..EngineConfig::default()
        };

        Ok(Self {
            api: ApiConfig {
                base_url,
                timeout: get_duration_secs("PORTAL_HTTP_TIMEOUT_SECS", 30)?,
            },
            provider: ProviderConfig::from_env()?,
            engine,
            payment_delay: Duration::from_millis(parse_env("PAYMENT_PROCESSING_DELAY_MS", 2000)?),
            session_file: get_optional_env("PORTAL_SESSION_FILE").map(PathBuf::from),
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn default_frame_pattern() -> Regex {
    // The default pattern is a literal known to compile.
    Regex::new(DEFAULT_FRAME_PATTERN).unwrap_or_else(|_| unreachable!("invalid default pattern"))
}

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable, treating blank values as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Parse a numeric environment variable, falling back to a default.
fn parse_env(key: &str, default: u64) -> Result<u64, ConfigError> {
    get_optional_env(key).map_or(Ok(default), |value| {
        value
            .trim()
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

fn get_duration_secs(key: &str, default: u64) -> Result<Duration, ConfigError> {
    let secs = parse_env(key, default)?;
    if secs == 0 {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}
