use std::{collections::HashMap, sync::RwLock};

use crate::error::CheckoutError;
use crate::models::PaymentAttempt;
use crate::persist::PaymentAttemptStore;

/// Attempt store that lives as long as the process
#[derive(Default)]
pub struct InMemoryAttemptStore {
    attempts: RwLock<HashMap<String, PaymentAttempt>>,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> CheckoutError {
    CheckoutError::StorageError("Attempt store lock poisoned".to_string())
}

impl PaymentAttemptStore for InMemoryAttemptStore {
    fn get_attempt(&self, reference: &str) -> Result<Option<PaymentAttempt>, CheckoutError> {
        Ok(self.attempts.read().map_err(poisoned)?.get(reference).cloned())
    }

    fn set_attempt(&self, attempt: &PaymentAttempt) -> Result<(), CheckoutError> {
        self.attempts
            .write()
            .map_err(poisoned)?
            .insert(attempt.reference.clone(), attempt.clone());

        Ok(())
    }

    fn clear_attempt(&self, reference: &str) -> Result<(), CheckoutError> {
        self.attempts.write().map_err(poisoned)?.remove(reference);
        Ok(())
    }

    fn list_attempts(&self) -> Result<Vec<PaymentAttempt>, CheckoutError> {
        let mut attempts: Vec<PaymentAttempt> = self
            .attempts
            .read()
            .map_err(poisoned)?
            .values()
            .cloned()
            .collect();
        attempts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttemptStatus;

    #[test]
    fn test_set_overwrites_and_clear_forgets() {
        let store = InMemoryAttemptStore::new();
        let mut attempt = PaymentAttempt::new("ref_1".to_string(), Some("item_1".to_string()), 24);
        store.set_attempt(&attempt).unwrap();

        attempt.status = AttemptStatus::Verifying;
        store.set_attempt(&attempt).unwrap();
        assert_eq!(Some(attempt), store.get_attempt("ref_1").unwrap());

        store.clear_attempt("ref_1").unwrap();
        store.clear_attempt("ref_1").unwrap();
        assert_eq!(None, store.get_attempt("ref_1").unwrap());
    }

    #[test]
    fn test_list_is_newest_first() {
        let store = InMemoryAttemptStore::new();
        for (reference, created_at) in [("ref_old", 100), ("ref_new", 300), ("ref_mid", 200)] {
            let mut attempt = PaymentAttempt::new(reference.to_string(), None, 24);
            attempt.created_at = created_at;
            store.set_attempt(&attempt).unwrap();
        }

        let references: Vec<String> = store
            .list_attempts()
            .unwrap()
            .into_iter()
            .map(|a| a.reference)
            .collect();
        assert_eq!(vec!["ref_new", "ref_mid", "ref_old"], references);
    }
}
