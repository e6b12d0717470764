use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CheckoutError;
use crate::navigator::Navigator;

/// Deployment the client talks to
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Environment {
    Production,
    Development,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Production => write!(f, "Production"),
            Environment::Development => write!(f, "Development"),
        }
    }
}

pub struct ConnectRequest {
    /// The checkout [Config]
    pub config: Config,
    /// The host's location bar
    pub navigator: Arc<dyn Navigator>,
}

/// Configuration for the checkout flow
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the marketplace REST API
    pub gateway_url: String,
    /// Optional bearer token sent with every gateway request
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Directory for storing data files (e.g., SQLite database)
    pub data_dir: String,
    /// Seconds between two automatic verify calls
    pub poll_interval_secs: u64,
    /// Verify calls allowed per verification session, fast path included
    pub max_polls: u32,
    /// Hard deadline for one verification session, in seconds
    pub timeout_window_secs: u64,
    /// Delay before leaving for the history view after a success
    pub success_redirect_delay_secs: u64,
    /// Path of the payment history view, resolved against the current URL
    pub history_path: String,
    /// Per-request timeout for gateway calls, in seconds
    pub request_timeout_secs: u64,
}

impl Config {
    /// Creates a configuration for an explicit gateway URL with default polling settings
    pub fn new(gateway_url: String, data_dir: String) -> Self {
        Self {
            gateway_url,
            auth_token: None,
            data_dir,
            poll_interval_secs: 5,
            max_polls: 24,
            timeout_window_secs: 120,
            success_redirect_delay_secs: 3,
            history_path: "/payment-history".to_string(),
            request_timeout_secs: 15,
        }
    }

    /// Creates a default configuration for the specified environment
    ///
    /// # Arguments
    ///
    /// * `environment` - The deployment to talk to
    /// * `data_dir` - Directory for storing data files
    ///
    /// # Returns
    ///
    /// A new `Config` instance, or `InvalidEnvironment` for deployments
    /// whose endpoints must be supplied with [Config::new]
    pub fn default_config(
        environment: Environment,
        data_dir: String,
    ) -> Result<Self, CheckoutError> {
        match environment {
            Environment::Production => Err(CheckoutError::InvalidEnvironment),
            Environment::Development => Ok(Self::new(
                "http://localhost:5000/api".to_string(),
                data_dir,
            )),
        }
    }

    pub fn validate(&self) -> Result<(), CheckoutError> {
        if self.max_polls == 0 {
            return Err(CheckoutError::InvalidConfig(
                "max_polls must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(CheckoutError::InvalidConfig(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        Url::parse(&self.gateway_url)
            .map_err(|e| CheckoutError::InvalidUrl(format!("{}: {e}", self.gateway_url)))?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout_window(&self) -> Duration {
        Duration::from_secs(self.timeout_window_secs)
    }

    pub fn success_redirect_delay(&self) -> Duration {
        Duration::from_secs(self.success_redirect_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Lifecycle state of a [PaymentAttempt]
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttemptStatus {
    Initiated,
    AwaitingRedirectReturn,
    Verifying,
    Succeeded,
    Failed,
    TimedOut,
}

impl AttemptStatus {
    /// Whether the attempt still blocks a new checkout for the same item
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            AttemptStatus::Initiated | AttemptStatus::AwaitingRedirectReturn | AttemptStatus::Verifying
        )
    }

    /// Whether the gateway has given a final answer
    pub fn is_settled(&self) -> bool {
        matches!(self, AttemptStatus::Succeeded | AttemptStatus::Failed)
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptStatus::Initiated => write!(f, "Initiated"),
            AttemptStatus::AwaitingRedirectReturn => write!(f, "AwaitingRedirectReturn"),
            AttemptStatus::Verifying => write!(f, "Verifying"),
            AttemptStatus::Succeeded => write!(f, "Succeeded"),
            AttemptStatus::Failed => write!(f, "Failed"),
            AttemptStatus::TimedOut => write!(f, "TimedOut"),
        }
    }
}

impl FromStr for AttemptStatus {
    type Err = CheckoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Initiated" => Ok(AttemptStatus::Initiated),
            "AwaitingRedirectReturn" => Ok(AttemptStatus::AwaitingRedirectReturn),
            "Verifying" => Ok(AttemptStatus::Verifying),
            "Succeeded" => Ok(AttemptStatus::Succeeded),
            "Failed" => Ok(AttemptStatus::Failed),
            "TimedOut" => Ok(AttemptStatus::TimedOut),
            other => Err(CheckoutError::StorageError(format!(
                "Invalid attempt status: {other}"
            ))),
        }
    }
}

/// One tracked purchase flow for one item
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PaymentAttempt {
    /// Gateway-issued reference, unique per attempt
    pub reference: String,
    /// Catalog entry being purchased. `None` when the attempt was rebuilt
    /// from a redirect reference with no local record.
    pub item_id: Option<String>,
    pub status: AttemptStatus,
    /// Unix timestamp when the attempt was created
    pub created_at: u64,
    pub poll_count: u32,
    pub max_polls: u32,
}

impl PaymentAttempt {
    pub fn new(reference: String, item_id: Option<String>, max_polls: u32) -> Self {
        let created_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            reference,
            item_id,
            status: AttemptStatus::Initiated,
            created_at,
            poll_count: 0,
            max_polls,
        }
    }

    pub fn polls_exhausted(&self) -> bool {
        self.poll_count >= self.max_polls
    }
}

/// Status reported by the gateway for a reference
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerifyStatus {
    Pending,
    Success,
    Failed,
}

impl fmt::Display for VerifyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyStatus::Pending => write!(f, "pending"),
            VerifyStatus::Success => write!(f, "success"),
            VerifyStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Returned by [crate::gateway::PaymentGateway::initialize]
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    pub reference: String,
    #[serde(alias = "authorization_url")]
    pub redirect_url: String,
}

/// Returned by [crate::gateway::PaymentGateway::verify]
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VerifyResponse {
    pub status: VerifyStatus,
}

// Request/Response structures for the reconciler methods

/// Request for starting a checkout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartPaymentRequest {
    pub item_id: String,
}

/// Response for starting a checkout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartPaymentResponse {
    /// The persisted attempt
    pub attempt: PaymentAttempt,
    /// Where the user was sent to pay
    pub redirect_url: String,
}

/// Request for an ad-hoc status check
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckPaymentStatusRequest {
    pub reference: String,
}

/// Response for an ad-hoc status check
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckPaymentStatusResponse {
    pub attempt: PaymentAttempt,
}

/// Request for abandoning an attempt
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AbandonPaymentRequest {
    pub reference: String,
}

/// Request for listing stored attempts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListAttemptsRequest {}

/// Response for listing stored attempts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListAttemptsResponse {
    /// Stored attempts, newest first
    pub attempts: Vec<PaymentAttempt>,
}
