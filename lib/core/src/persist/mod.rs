pub(crate) mod memory;
pub(crate) mod sqlite;

pub use memory::InMemoryAttemptStore;
pub use sqlite::SqliteAttemptStore;

use crate::error::CheckoutError;
use crate::models::PaymentAttempt;

/// Durable storage for payment attempts, keyed by reference
pub trait PaymentAttemptStore {
    /// Get an attempt by reference
    fn get_attempt(&self, reference: &str) -> Result<Option<PaymentAttempt>, CheckoutError>;

    /// Insert or replace the attempt stored under its reference
    fn set_attempt(&self, attempt: &PaymentAttempt) -> Result<(), CheckoutError>;

    /// Remove the attempt stored under `reference`. Clearing a missing entry is not an error.
    fn clear_attempt(&self, reference: &str) -> Result<(), CheckoutError>;

    /// List all stored attempts, newest first
    fn list_attempts(&self) -> Result<Vec<PaymentAttempt>, CheckoutError>;
}
