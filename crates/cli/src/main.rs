//! SIM Portal CLI - operator tooling for the portal backend.
//!
//! # Usage
//!
//! ```bash
//! # Sign in as an admin
//! ADMIN_PASSWORD=... portal-cli admin login -e ops@example.com
//!
//! # Upload the KYC compliance subscriber list
//! portal-cli subscribers upload numbers.csv
//!
//! # Watch a verification until it settles
//! portal-cli kyc watch esim 1234
//! ```
//!
//! # Commands
//!
//! - `admin` - Sign in/out, dashboard, users, payments
//! - `subscribers` - Look up a number, upload a subscriber list
//! - `kyc` - Check or watch a request's verification status

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use sentry::integrations::tracing as sentry_tracing;
use sim_portal::config::PortalConfig;
use sim_portal_core::{FlowKind, VerificationOutcome};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::CommandError;

#[derive(Parser)]
#[command(name = "portal-cli")]
#[command(author, version, about = "SIM portal operator tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Admin session and reports
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
    /// KYC compliance subscriber list
    Subscribers {
        #[command(subcommand)]
        action: SubscriberAction,
    },
    /// Verification status of a request
    Kyc {
        #[command(subcommand)]
        action: KycAction,
    },
}

#[derive(Subcommand)]
enum AdminAction {
    /// Sign in and keep the session token
    Login {
        /// Admin email address
        #[arg(short, long)]
        email: String,

        /// Admin password
        #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored session
    Logout,
    /// Dashboard summary
    Dashboard,
    /// List admin accounts
    Users,
    /// Create an admin account
    CreateUser {
        /// Email address
        #[arg(short, long)]
        email: String,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,

        /// Initial password
        #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// List payments
    Payments {
        /// `card` or `cash`
        #[arg(long)]
        method: Option<String>,

        #[arg(long)]
        status: Option<String>,

        /// `esim_purchase` or `sim_swap`
        #[arg(long)]
        service_type: Option<String>,

        /// First day, `YYYY-MM-DD`
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day, `YYYY-MM-DD`
        #[arg(long)]
        to: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum SubscriberAction {
    /// Check whether a number is on the list
    Lookup {
        /// Phone number
        number: String,
    },
    /// Upload numbers extracted from a text or CSV file
    Upload {
        /// File to read
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum KycAction {
    /// Read the status once
    Status {
        #[arg(value_enum)]
        flow: FlowArg,
        request_id: String,
    },
    /// Poll until the verification settles
    Watch {
        #[arg(value_enum)]
        flow: FlowArg,
        request_id: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FlowArg {
    Esim,
    Simswap,
    KycCompliance,
}

impl From<FlowArg> for FlowKind {
    fn from(flow: FlowArg) -> Self {
        match flow {
            FlowArg::Esim => Self::EsimPurchase,
            FlowArg::Simswap => Self::SimSwap,
            FlowArg::KycCompliance => Self::KycCompliance,
        }
    }
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &PortalConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    Some(guard)
}

/// Errors and warnings become Sentry events; info and debug become breadcrumbs.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    // Before parsing, so ADMIN_PASSWORD can come from .env
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = PortalConfig::from_env();
    let _sentry_guard = config.as_ref().ok().and_then(init_sentry);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sim_portal=info,sim_portal_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let result = match config {
        Ok(config) => run(cli, config).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(ExitStatus::Success) => {}
        Ok(ExitStatus::Unsettled) => std::process::exit(2),
        Err(e) => {
            tracing::error!("Command failed: {e}");
            std::process::exit(1);
        }
    }
}

enum ExitStatus {
    Success,
    /// A watched verification ended without being verified.
    Unsettled,
}

async fn run(cli: Cli, config: PortalConfig) -> Result<ExitStatus, CommandError> {
    let portal = commands::portal(config)?;
    match cli.command {
        Commands::Admin { action } => match action {
            AdminAction::Login { email, password } => {
                commands::admin::login(&portal, &email, &password).await?;
            }
            AdminAction::Logout => commands::admin::logout(&portal)?,
            AdminAction::Dashboard => commands::admin::dashboard(&portal).await?,
            AdminAction::Users => commands::admin::users(&portal).await?,
            AdminAction::CreateUser {
                email,
                name,
                password,
            } => commands::admin::create_user(&portal, &email, name, &password).await?,
            AdminAction::Payments {
                method,
                status,
                service_type,
                from,
                to,
            } => {
                commands::admin::payments(&portal, method, status, service_type, from, to).await?;
            }
        },
        Commands::Subscribers { action } => match action {
            SubscriberAction::Lookup { number } => {
                commands::subscribers::lookup(&portal, &number).await?;
            }
            SubscriberAction::Upload { path } => {
                commands::subscribers::upload(&portal, &path).await?;
            }
        },
        Commands::Kyc { action } => match action {
            KycAction::Status { flow, request_id } => {
                commands::kyc::status(&portal, flow.into(), &request_id).await?;
            }
            KycAction::Watch { flow, request_id } => {
                let outcome = commands::kyc::watch(&portal, flow.into(), &request_id).await?;
                if outcome != VerificationOutcome::Verified {
                    return Ok(ExitStatus::Unsettled);
                }
            }
        },
    }
    Ok(ExitStatus::Success)
}
