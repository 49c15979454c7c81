//! Typed clients for the booking services.
//!
//! # Responsibilities
//! - Bind a dependency name to its base URL and HTTP client
//! - Route every request through the shared call executor
//! - Expose one method per remote operation with typed payloads
//!
//! # Data Flow
//! ```text
//! AuthClient::current_user(ctx, token)
//!     → DownstreamRequest (GET /api/users/currentUser, Authorization)
//!     → Downstream::call → CallExecutor::execute("auth", ...)
//!     → HttpClassifier<User> → Result<User, CallError>
//! ```

pub mod auth;
pub mod notifications;
pub mod reservations;
pub mod types;

use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::call::classify::Classifier;
use crate::call::context::CallContext;
use crate::call::error::CallError;
use crate::call::executor::CallExecutor;
use crate::call::outcome::FailureCause;
use crate::config::schema::{DownstreamConfig, LinkConfig};
use crate::http::request::DownstreamRequest;

pub use auth::AuthClient;
pub use notifications::NotificationClient;
pub use reservations::ReservationClient;
pub use types::{NotificationRequest, ReservationByGuest, User};

pub const AUTH: &str = "auth";
pub const RESERVATIONS: &str = "reservations";
pub const NOTIFICATIONS: &str = "notifications";

/// Connect timeout for downstream HTTP clients; the call deadline bounds the rest.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Response size limit for downstreams built without configuration.
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Errors building a downstream client.
#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("no [downstreams.{0}] section in configuration")]
    NotConfigured(String),

    #[error("invalid base url for {name}: {source}")]
    BaseUrl {
        name: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// One named dependency reachable over HTTP.
#[derive(Debug, Clone)]
pub struct Downstream {
    name: String,
    base_url: Url,
    client: reqwest::Client,
    executor: CallExecutor,
    max_body_bytes: usize,
}

impl Downstream {
    pub fn new(name: impl Into<String>, base_url: Url, client: reqwest::Client, executor: CallExecutor) -> Self {
        Self {
            name: name.into(),
            base_url,
            client,
            executor,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Fail attempts whose response body is larger than `limit` bytes.
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn from_config(
        name: &str,
        config: &DownstreamConfig,
        executor: CallExecutor,
    ) -> Result<Self, DownstreamError> {
        let base_url = Url::parse(&config.base_url).map_err(|source| DownstreamError::BaseUrl {
            name: name.to_string(),
            source,
        })?;

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        if config.accept_invalid_certs {
            tracing::warn!(dependency = %name, "TLS certificate verification disabled");
        }

        Ok(Self::new(name, base_url, client, executor).with_max_body_bytes(config.max_body_bytes))
    }

    /// Look up `name` in the configuration and build its client.
    pub fn from_link_config(
        name: &str,
        config: &LinkConfig,
        executor: CallExecutor,
    ) -> Result<Self, DownstreamError> {
        let downstream = config
            .downstream(name)
            .ok_or_else(|| DownstreamError::NotConfigured(name.to_string()))?;
        Self::from_config(name, downstream, executor)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn executor(&self) -> &CallExecutor {
        &self.executor
    }

    /// Perform `request` with retries, breaker and tracing.
    pub async fn call<T, C>(
        &self,
        ctx: &CallContext,
        request: &DownstreamRequest,
        classifier: &C,
    ) -> Result<T, CallError>
    where
        C: Classifier<T> + ?Sized,
    {
        self.executor
            .execute(ctx, &self.name, classifier, move |attempt| async move {
                request
                    .send(&self.client, &self.base_url, &attempt, self.max_body_bytes)
                    .await
            })
            .await
    }
}

/// A request that could not be built never reaches the network.
pub(crate) fn invalid_request(reason: impl std::fmt::Display) -> CallError {
    CallError::PermanentFailure(FailureCause::Other(format!("invalid request: {}", reason)))
}
