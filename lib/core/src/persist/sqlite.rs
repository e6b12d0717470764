use crate::error::CheckoutError;
use crate::models::{AttemptStatus, PaymentAttempt};
use crate::persist::PaymentAttemptStore;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// SQLite implementation of the PaymentAttemptStore trait
pub struct SqliteAttemptStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteAttemptStore {
    /// Creates a new SQLite store
    ///
    /// # Arguments
    ///
    /// * `db_path` - Path to the SQLite database file
    pub fn new(db_path: &Path) -> Result<Self, CheckoutError> {
        let connection = Connection::open(db_path)?;
        let storage = Self {
            connection: Arc::new(Mutex::new(connection)),
        };
        storage.init()?;
        Ok(storage)
    }

    /// Creates a new in-memory SQLite store for testing
    pub fn new_in_memory() -> Result<Self, CheckoutError> {
        let connection = Connection::open_in_memory()?;
        let storage = Self {
            connection: Arc::new(Mutex::new(connection)),
        };
        storage.init()?;
        Ok(storage)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CheckoutError> {
        self.connection
            .lock()
            .map_err(|_| CheckoutError::StorageError("Failed to lock connection".to_string()))
    }

    fn init(&self) -> Result<(), CheckoutError> {
        let connection = self.lock()?;

        connection.execute(
            "CREATE TABLE IF NOT EXISTS payment_attempts (
          reference TEXT PRIMARY KEY,
          item_id TEXT,
          status TEXT NOT NULL,
          created_at INTEGER NOT NULL,
          poll_count INTEGER NOT NULL,
          max_polls INTEGER NOT NULL
      )",
            [],
        )?;

        Ok(())
    }
}

fn attempt_from_row(row: &Row) -> rusqlite::Result<PaymentAttempt> {
    let status_str: String = row.get(2)?;
    let status = status_str.parse::<AttemptStatus>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(2, "Invalid attempt status".to_string(), Type::Text)
    })?;

    Ok(PaymentAttempt {
        reference: row.get(0)?,
        item_id: row.get(1)?,
        status,
        created_at: row.get(3)?,
        poll_count: row.get(4)?,
        max_polls: row.get(5)?,
    })
}

impl PaymentAttemptStore for SqliteAttemptStore {
    fn get_attempt(&self, reference: &str) -> Result<Option<PaymentAttempt>, CheckoutError> {
        let connection = self.lock()?;

        let mut stmt = connection.prepare(
            "SELECT reference, item_id, status, created_at, poll_count, max_polls
             FROM payment_attempts
             WHERE reference = ?",
        )?;

        match stmt.query_row(params![reference], attempt_from_row) {
            Ok(attempt) => Ok(Some(attempt)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CheckoutError::StorageError(e.to_string())),
        }
    }

    fn set_attempt(&self, attempt: &PaymentAttempt) -> Result<(), CheckoutError> {
        let connection = self.lock()?;

        connection.execute(
            "INSERT OR REPLACE INTO payment_attempts (
                reference, item_id, status, created_at, poll_count, max_polls
            ) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                attempt.reference,
                attempt.item_id,
                attempt.status.to_string(),
                attempt.created_at,
                attempt.poll_count,
                attempt.max_polls,
            ],
        )?;

        Ok(())
    }

    fn clear_attempt(&self, reference: &str) -> Result<(), CheckoutError> {
        let connection = self.lock()?;
        connection.execute(
            "DELETE FROM payment_attempts WHERE reference = ?",
            params![reference],
        )?;
        Ok(())
    }

    fn list_attempts(&self) -> Result<Vec<PaymentAttempt>, CheckoutError> {
        let connection = self.lock()?;

        let mut stmt = connection.prepare(
            "SELECT reference, item_id, status, created_at, poll_count, max_polls
             FROM payment_attempts
             ORDER BY created_at DESC",
        )?;

        let attempt_iter = stmt.query_map([], attempt_from_row)?;

        let mut attempts = Vec::new();
        for attempt in attempt_iter {
            attempts.push(attempt?);
        }

        Ok(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_attempt(reference: &str, item_id: &str, created_at: u64) -> PaymentAttempt {
        PaymentAttempt {
            reference: reference.to_string(),
            item_id: Some(item_id.to_string()),
            status: AttemptStatus::Initiated,
            created_at,
            poll_count: 0,
            max_polls: 3,
        }
    }

    #[test]
    fn test_set_and_get_attempt() {
        let storage = SqliteAttemptStore::new_in_memory().unwrap();

        let attempt = create_test_attempt("ref_1", "item_1", 1_700_000_000);
        storage.set_attempt(&attempt).unwrap();

        let retrieved = storage.get_attempt("ref_1").unwrap().unwrap();
        assert_eq!(attempt, retrieved);
    }

    #[test]
    fn test_get_missing_attempt() {
        let storage = SqliteAttemptStore::new_in_memory().unwrap();
        assert!(storage.get_attempt("nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_set_replaces_existing_attempt() {
        let storage = SqliteAttemptStore::new_in_memory().unwrap();

        let mut attempt = create_test_attempt("ref_1", "item_1", 1_700_000_000);
        storage.set_attempt(&attempt).unwrap();

        attempt.status = AttemptStatus::TimedOut;
        attempt.poll_count = 3;
        storage.set_attempt(&attempt).unwrap();

        let retrieved = storage.get_attempt("ref_1").unwrap().unwrap();
        assert_eq!(AttemptStatus::TimedOut, retrieved.status);
        assert_eq!(3, retrieved.poll_count);
        assert_eq!(1, storage.list_attempts().unwrap().len());
    }

    #[test]
    fn test_attempt_without_item_roundtrips() {
        let storage = SqliteAttemptStore::new_in_memory().unwrap();

        let attempt = PaymentAttempt {
            item_id: None,
            ..create_test_attempt("ref_orphan", "unused", 1_700_000_000)
        };
        storage.set_attempt(&attempt).unwrap();

        assert_eq!(None, storage.get_attempt("ref_orphan").unwrap().unwrap().item_id);
    }

    #[test]
    fn test_clear_attempt() {
        let storage = SqliteAttemptStore::new_in_memory().unwrap();

        storage
            .set_attempt(&create_test_attempt("ref_1", "item_1", 1_700_000_000))
            .unwrap();
        storage.clear_attempt("ref_1").unwrap();
        assert!(storage.get_attempt("ref_1").unwrap().is_none());

        // Clearing twice is fine
        storage.clear_attempt("ref_1").unwrap();
    }

    #[test]
    fn test_list_attempts_newest_first() {
        let storage = SqliteAttemptStore::new_in_memory().unwrap();

        storage
            .set_attempt(&create_test_attempt("ref_old", "item_1", 1_700_000_000))
            .unwrap();
        storage
            .set_attempt(&create_test_attempt("ref_new", "item_2", 1_700_000_500))
            .unwrap();
        storage
            .set_attempt(&create_test_attempt("ref_mid", "item_3", 1_700_000_200))
            .unwrap();

        let references: Vec<String> = storage
            .list_attempts()
            .unwrap()
            .into_iter()
            .map(|a| a.reference)
            .collect();
        assert_eq!(vec!["ref_new", "ref_mid", "ref_old"], references);
    }
}
