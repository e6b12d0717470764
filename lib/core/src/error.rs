use thiserror::Error;

/// Error types for the checkout flow
#[derive(Error, Debug)]
pub enum CheckoutError {
    /// The gateway could not initialize a payment
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// A single verify call failed at the network level
    #[error("Payment verification unavailable: {0}")]
    VerificationUnavailable(String),

    /// Automatic polling ran out of budget without a confirmed outcome
    #[error("Payment {0} is still being confirmed. Please check your payment history.")]
    VerificationTimeout(String),

    /// The gateway reported the payment as failed
    #[error("Payment {0} failed")]
    PaymentFailed(String),

    /// A non-terminal attempt already exists for the item
    #[error("A payment for item {0} is already in progress")]
    AttemptInProgress(String),

    #[error("Payment attempt not found: {0}")]
    AttemptNotFound(String),

    /// Error related to the storage
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Production endpoints have no built-in defaults
    #[error("Invalid environment")]
    InvalidEnvironment,

    /// Generic error with a message
    #[error("Generic error: {0}")]
    GenericError(String),
}

impl From<rusqlite::Error> for CheckoutError {
    fn from(err: rusqlite::Error) -> Self {
        CheckoutError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for CheckoutError {
    fn from(err: serde_json::Error) -> Self {
        CheckoutError::GenericError(err.to_string())
    }
}

impl From<std::io::Error> for CheckoutError {
    fn from(err: std::io::Error) -> Self {
        CheckoutError::GenericError(err.to_string())
    }
}

impl From<reqwest::Error> for CheckoutError {
    fn from(err: reqwest::Error) -> Self {
        CheckoutError::GenericError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for CheckoutError {
    fn from(err: tokio::task::JoinError) -> Self {
        CheckoutError::GenericError(err.to_string())
    }
}
