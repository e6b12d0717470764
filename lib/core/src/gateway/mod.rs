pub mod rest;

use async_trait::async_trait;

use crate::error::CheckoutError;
use crate::models::{InitializeResponse, VerifyResponse};

pub use rest::RestPaymentGateway;

/// The external payment processor
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Starts a payment for `item_id`, failing with `GatewayUnavailable`
    async fn initialize(&self, item_id: &str) -> Result<InitializeResponse, CheckoutError>;

    /// Reads the settlement status of `reference` without changing it.
    /// Fails with `VerificationUnavailable` on transient errors.
    async fn verify(&self, reference: &str) -> Result<VerifyResponse, CheckoutError>;
}
