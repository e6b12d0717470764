use crate::error::CheckoutError;
use crate::gateway::{PaymentGateway, RestPaymentGateway};
use crate::models::Config;
use crate::navigator::Navigator;
use crate::persist::{PaymentAttemptStore, SqliteAttemptStore};
use crate::reconciler::PaymentReconciler;
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

const DB_FILE_NAME: &str = "unihive-checkout.db";

/// Builder for creating and configuring a PaymentReconciler instance
pub struct ReconcilerBuilder {
    config: Config,
    navigator: Arc<dyn Navigator>,
    storage: Option<Arc<dyn PaymentAttemptStore + Send + Sync>>,
    gateway: Option<Arc<dyn PaymentGateway>>,
}

impl ReconcilerBuilder {
    /// Creates a new ReconcilerBuilder
    ///
    /// # Arguments
    ///
    /// * `config` - The checkout configuration
    /// * `navigator` - The host's location bar
    pub fn new(config: Config, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            config,
            navigator,
            storage: None,
            gateway: None,
        }
    }

    /// Sets a custom storage implementation. Defaults to SQLite in `data_dir`.
    pub fn storage(mut self, storage: Arc<dyn PaymentAttemptStore + Send + Sync>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Sets a custom gateway implementation. Defaults to the REST gateway at `gateway_url`.
    pub fn gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Builds the PaymentReconciler instance
    pub fn build(self) -> Result<PaymentReconciler, CheckoutError> {
        self.config.validate()?;

        let storage = match self.storage {
            Some(storage) => storage,
            None => {
                let path = PathBuf::from(&self.config.data_dir);
                fs::create_dir_all(&path)?;
                let db_path = path.join(DB_FILE_NAME);
                info!("Storing payment attempts in {}", db_path.display());
                Arc::new(SqliteAttemptStore::new(&db_path)?)
            }
        };

        let gateway = match self.gateway {
            Some(gateway) => gateway,
            None => Arc::new(RestPaymentGateway::new(&self.config)?),
        };

        let (shutdown_sender, shutdown_receiver) = watch::channel(());

        Ok(PaymentReconciler::new(
            self.config,
            gateway,
            storage,
            self.navigator,
            shutdown_sender,
            shutdown_receiver,
        ))
    }
}
