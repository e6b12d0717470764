use crate::models::PaymentAttempt;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Notifications surfaced to the presentation layer
#[derive(Clone, Debug, PartialEq)]
pub enum CheckoutEvent {
    /// The gateway confirmed the payment
    Success {
        /// The settled attempt
        attempt: PaymentAttempt,
    },

    /// Something the user has to act on went wrong
    Error {
        reference: Option<String>,
        message: String,
    },

    /// Not a failure, but the user should know about it
    Warning {
        reference: Option<String>,
        message: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Called when an event occurs
    fn on_event(&self, event: &CheckoutEvent);
}

/// Event emitter for checkout events
#[derive(Default)]
pub struct EventEmitter {
    listeners: Mutex<HashMap<String, Box<dyn EventListener>>>,
}

impl EventEmitter {
    /// Creates a new event emitter
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener to the event emitter
    ///
    /// # Returns
    ///
    /// A unique ID for the listener
    pub fn add_listener(&self, listener: Box<dyn EventListener>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.insert(id.clone(), listener);
        id
    }

    /// Removes a listener from the event emitter
    ///
    /// # Returns
    ///
    /// `true` if the listener was found and removed, `false` otherwise
    pub fn remove_listener(&self, id: &str) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.remove(id).is_some()
    }

    /// Emits an event to all listeners
    pub fn emit(&self, event: &CheckoutEvent) {
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.values() {
            listener.on_event(event);
        }
    }

    pub(crate) fn error(&self, reference: Option<&str>, message: String) {
        self.emit(&CheckoutEvent::Error {
            reference: reference.map(str::to_string),
            message,
        });
    }

    pub(crate) fn warning(&self, reference: Option<&str>, message: String) {
        self.emit(&CheckoutEvent::Warning {
            reference: reference.map(str::to_string),
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct CountingListener {
        seen: Arc<Mutex<Vec<CheckoutEvent>>>,
    }

    impl EventListener for CountingListener {
        fn on_event(&self, event: &CheckoutEvent) {
            self.seen.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_emit_reaches_registered_listeners_only() {
        let emitter = EventEmitter::new();
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));

        let first_id = emitter.add_listener(Box::new(CountingListener { seen: first.clone() }));
        emitter.add_listener(Box::new(CountingListener {
            seen: second.clone(),
        }));

        emitter.warning(Some("ref_1"), "still pending".to_string());
        assert!(emitter.remove_listener(&first_id));
        assert!(!emitter.remove_listener(&first_id));
        emitter.error(None, "gateway down".to_string());

        assert_eq!(1, first.lock().unwrap().len());
        assert_eq!(2, second.lock().unwrap().len());
        assert_eq!(
            CheckoutEvent::Error {
                reference: None,
                message: "gateway down".to_string()
            },
            second.lock().unwrap()[1]
        );
    }
}
