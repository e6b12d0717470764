pub mod builder;
pub mod error;
pub mod events;
pub mod gateway;
mod logger;
pub mod models;
pub mod navigator;
pub mod persist;
pub mod reconciler;

use error::CheckoutError;
use models::ConnectRequest;

pub use builder::ReconcilerBuilder;
pub use events::{CheckoutEvent, EventEmitter, EventListener};
pub use gateway::{PaymentGateway, RestPaymentGateway};
pub use models::{
    AbandonPaymentRequest, AttemptStatus, CheckPaymentStatusRequest, CheckPaymentStatusResponse,
    Config, Environment, InitializeResponse, ListAttemptsRequest, ListAttemptsResponse,
    PaymentAttempt, StartPaymentRequest, StartPaymentResponse, VerifyResponse, VerifyStatus,
};
pub use navigator::Navigator;
pub use persist::{InMemoryAttemptStore, PaymentAttemptStore, SqliteAttemptStore};
pub use reconciler::{PaymentReconciler, VerificationSession};

/// Builds a reconciler with the default SQLite store and REST gateway
pub async fn connect(request: ConnectRequest) -> Result<PaymentReconciler, CheckoutError> {
    ReconcilerBuilder::new(request.config, request.navigator).build()
}
