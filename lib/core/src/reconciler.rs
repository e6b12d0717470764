use crate::error::CheckoutError;
use crate::events::{CheckoutEvent, EventEmitter, EventListener};
use crate::gateway::PaymentGateway;
use crate::models::{
    AbandonPaymentRequest, AttemptStatus, CheckPaymentStatusRequest, CheckPaymentStatusResponse,
    Config, ListAttemptsRequest, ListAttemptsResponse, PaymentAttempt, StartPaymentRequest,
    StartPaymentResponse, VerifyResponse, VerifyStatus,
};
use crate::navigator::{self, Navigator};
use crate::persist::PaymentAttemptStore;
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};

struct ActiveSession {
    id: String,
    cancel: watch::Sender<bool>,
}

type SessionRegistry = Arc<Mutex<HashMap<String, ActiveSession>>>;

/// Settled attempts remembered per reconciler before the oldest is forgotten
const SETTLED_CAPACITY: usize = 256;

/// Recently settled attempts, evicted oldest first
#[derive(Default)]
struct SettledAttempts {
    attempts: HashMap<String, PaymentAttempt>,
    order: VecDeque<String>,
}

impl SettledAttempts {
    fn get(&self, reference: &str) -> Option<&PaymentAttempt> {
        self.attempts.get(reference)
    }

    fn insert(&mut self, attempt: PaymentAttempt) {
        let reference = attempt.reference.clone();
        if self.attempts.insert(reference.clone(), attempt).is_none() {
            self.order.push_back(reference);
        }
        while self.order.len() > SETTLED_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.attempts.remove(&oldest);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives payment attempts from checkout to a terminal status
#[derive(Clone)]
pub struct PaymentReconciler {
    config: Config,
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn PaymentAttemptStore + Send + Sync>,
    navigator: Arc<dyn Navigator>,
    event_emitter: Arc<EventEmitter>,
    /// Items whose `initialize` call has not returned yet
    initializing: Arc<Mutex<HashSet<String>>>,
    /// Attempts this instance has seen succeed or fail. Their store entries are gone.
    settled: Arc<Mutex<SettledAttempts>>,
    /// Serializes verify calls per reference
    verify_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
    sessions: SessionRegistry,
    shutdown_sender: watch::Sender<()>,
    shutdown_receiver: watch::Receiver<()>,
}

/// Releases the in-flight claim on an item when initialization ends
struct InitializingGuard {
    items: Arc<Mutex<HashSet<String>>>,
    item_id: String,
}

impl Drop for InitializingGuard {
    fn drop(&mut self) {
        lock(&self.items).remove(&self.item_id);
    }
}

impl PaymentReconciler {
    /// Creates a new instance of the `PaymentReconciler`
    ///
    /// # Arguments
    ///
    /// * `config` - The checkout configuration
    /// * `gateway` - The payment gateway to initialize and verify against
    /// * `store` - Durable storage for in-flight attempts
    /// * `navigator` - The host's location bar
    /// * `shutdown_sender` - Sender for shutdown signal
    /// * `shutdown_receiver` - Receiver for shutdown signal
    pub fn new(
        config: Config,
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn PaymentAttemptStore + Send + Sync>,
        navigator: Arc<dyn Navigator>,
        shutdown_sender: watch::Sender<()>,
        shutdown_receiver: watch::Receiver<()>,
    ) -> Self {
        Self {
            config,
            gateway,
            store,
            navigator,
            event_emitter: Arc::new(EventEmitter::new()),
            initializing: Arc::new(Mutex::new(HashSet::new())),
            settled: Arc::new(Mutex::new(SettledAttempts::default())),
            verify_locks: Arc::new(Mutex::new(HashMap::new())),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender,
            shutdown_receiver,
        }
    }

    /// Registers a listener to receive checkout notifications
    ///
    /// # Returns
    ///
    /// A unique identifier for the listener, which can be used to remove it later
    pub fn add_event_listener(&self, listener: Box<dyn EventListener>) -> String {
        self.event_emitter.add_listener(listener)
    }

    /// Removes a previously registered event listener
    ///
    /// # Returns
    ///
    /// `true` if the listener was found and removed, `false` otherwise
    pub fn remove_event_listener(&self, id: &str) -> bool {
        self.event_emitter.remove_listener(id)
    }

    /// Stops every verification session and pending history redirect
    ///
    /// It should be called before the application terminates.
    pub fn disconnect(&self) -> Result<(), CheckoutError> {
        for (reference, session) in lock(&self.sessions).drain() {
            debug!("Cancelling verification session for {reference}");
            let _ = session.cancel.send(true);
        }

        self.shutdown_sender
            .send(())
            .map_err(|_| CheckoutError::GenericError("Failed to send shutdown signal".to_string()))
    }

    /// Starts a checkout for an item and sends the user to the gateway
    ///
    /// Rejected with `AttemptInProgress` while another attempt for the same
    /// item is still in flight. Gateway failures surface as an error
    /// notification and persist nothing.
    pub async fn start_payment(
        &self,
        request: StartPaymentRequest,
    ) -> Result<StartPaymentResponse, CheckoutError> {
        info!("Starting payment for item {}", request.item_id);

        let result = self.start_payment_internal(&request.item_id).await;
        if let Err(e) = &result {
            error!("Failed to start payment for item {}: {e}", request.item_id);
            self.event_emitter.error(None, e.to_string());
        }
        result
    }

    async fn start_payment_internal(
        &self,
        item_id: &str,
    ) -> Result<StartPaymentResponse, CheckoutError> {
        let _claim = self.claim_item(item_id)?;

        let response = self.gateway.initialize(item_id).await.map_err(|e| match e {
            CheckoutError::GatewayUnavailable(_) => e,
            other => CheckoutError::GatewayUnavailable(other.to_string()),
        })?;

        let mut attempt = PaymentAttempt::new(
            response.reference,
            Some(item_id.to_string()),
            self.config.max_polls,
        );
        self.store.set_attempt(&attempt)?;

        info!(
            "Redirecting to gateway for payment {} ({})",
            attempt.reference, response.redirect_url
        );
        self.navigator.navigate(&response.redirect_url);

        attempt.status = AttemptStatus::AwaitingRedirectReturn;
        self.store.set_attempt(&attempt)?;

        Ok(StartPaymentResponse {
            attempt,
            redirect_url: response.redirect_url,
        })
    }

    fn claim_item(&self, item_id: &str) -> Result<InitializingGuard, CheckoutError> {
        let stored_in_flight = self
            .store
            .list_attempts()?
            .iter()
            .any(|a| {
                a.item_id.as_deref() == Some(item_id)
                    && a.status.is_in_flight()
                    && self.settled_attempt(&a.reference).is_none()
            });

        let mut initializing = lock(&self.initializing);
        if stored_in_flight || !initializing.insert(item_id.to_string()) {
            return Err(CheckoutError::AttemptInProgress(item_id.to_string()));
        }

        Ok(InitializingGuard {
            items: self.initializing.clone(),
            item_id: item_id.to_string(),
        })
    }

    /// Picks up an in-flight payment after the application (re)starts
    ///
    /// The reference comes from the `reference` query parameter of the
    /// current URL, or else from the newest in-flight attempt in storage.
    /// The parameter is stripped from the visible URL before anything else.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(VerificationSession))` - Polling has started. Dropping the
    ///   session stops it.
    /// * `Ok(None)` - There was nothing to recover
    pub async fn recover_from_redirect(&self) -> Result<Option<VerificationSession>, CheckoutError> {
        let result = self.recover_from_redirect_internal();
        if let Err(e) = &result {
            error!("Failed to recover payment after redirect: {e}");
            self.event_emitter.error(None, e.to_string());
        }
        result
    }

    fn recover_from_redirect_internal(&self) -> Result<Option<VerificationSession>, CheckoutError> {
        let current_url = self.navigator.current_url();
        let from_url = match navigator::take_reference(&current_url) {
            Ok(return_url) => {
                if let Some(stripped) = return_url.stripped {
                    debug!("Stripping reference from {current_url}");
                    self.navigator.replace_url(&stripped);
                }
                return_url.reference
            }
            Err(e) => {
                warn!("Ignoring unparsable location: {e}");
                None
            }
        };

        let reference = match from_url {
            Some(reference) => {
                info!("Recovering payment {reference} from return URL");
                reference
            }
            None => match self.latest_in_flight()? {
                Some(attempt) => {
                    info!("Recovering payment {} from storage", attempt.reference);
                    attempt.reference
                }
                None => {
                    debug!("No payment to recover");
                    return Ok(None);
                }
            },
        };

        if let Some(settled) = self.settled_attempt(&reference) {
            info!("Payment {reference} already settled as {}", settled.status);
            self.clear_settled(&reference);
            return Ok(None);
        }

        let mut attempt = match self.store.get_attempt(&reference)? {
            Some(attempt) => attempt,
            None => {
                warn!("No local record for payment {reference}, tracking it without an item");
                PaymentAttempt::new(reference, None, self.config.max_polls)
            }
        };
        attempt.status = AttemptStatus::Verifying;
        attempt.poll_count = 0;
        attempt.max_polls = self.config.max_polls;
        self.store.set_attempt(&attempt)?;

        Ok(Some(self.spawn_verification(attempt)))
    }

    fn latest_in_flight(&self) -> Result<Option<PaymentAttempt>, CheckoutError> {
        Ok(self
            .store
            .list_attempts()?
            .into_iter()
            .find(|a| a.status.is_in_flight() && self.settled_attempt(&a.reference).is_none()))
    }

    fn spawn_verification(&self, attempt: PaymentAttempt) -> VerificationSession {
        let reference = attempt.reference.clone();
        let session_id = uuid::Uuid::new_v4().to_string();
        let (cancel_sender, cancel_receiver) = watch::channel(false);

        let previous = lock(&self.sessions).insert(
            reference.clone(),
            ActiveSession {
                id: session_id.clone(),
                cancel: cancel_sender,
            },
        );
        if let Some(previous) = previous {
            info!("Replacing verification session for {reference}");
            let _ = previous.cancel.send(true);
        }

        let reconciler = self.clone();
        let handle = tokio::spawn(async move {
            let reference = attempt.reference.clone();
            let result = reconciler.run_verification(attempt, cancel_receiver).await;
            if let Err(e) = &result {
                error!("Verification of payment {reference} aborted: {e}");
                reconciler.event_emitter.error(Some(&reference), e.to_string());
            }
            result
        });

        VerificationSession {
            reference,
            session_id,
            handle: Some(handle),
            sessions: self.sessions.clone(),
        }
    }

    /// The polling protocol: fast path, then one verify per interval until
    /// the gateway settles, `max_polls` is spent or the timeout window closes.
    async fn run_verification(
        &self,
        mut attempt: PaymentAttempt,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<PaymentAttempt, CheckoutError> {
        let mut shutdown = self.shutdown_receiver.clone();
        let deadline = Instant::now() + self.config.timeout_window();
        info!(
            "Verifying payment {} (up to {} polls every {:?})",
            attempt.reference,
            attempt.max_polls,
            self.config.poll_interval()
        );

        loop {
            attempt = tokio::select! {
                biased;
                _ = cancel.changed() => return Ok(self.stopped(attempt, "session cancelled")),
                _ = shutdown.changed() => return Ok(self.stopped(attempt, "shutdown")),
                _ = sleep_until(deadline) => return self.time_out(attempt),
                polled = self.poll_once(attempt.clone()) => polled?,
            };

            match attempt.status {
                AttemptStatus::Succeeded => {
                    tokio::select! {
                        biased;
                        _ = cancel.changed() => {
                            debug!("History redirect for {} cancelled", attempt.reference)
                        }
                        _ = shutdown.changed() => {}
                        _ = sleep(self.config.success_redirect_delay()) => self.redirect_to_history(),
                    }
                    return Ok(attempt);
                }
                AttemptStatus::Failed => return Ok(attempt),
                _ => {}
            }

            if attempt.polls_exhausted() {
                return self.time_out(attempt);
            }

            tokio::select! {
                biased;
                _ = cancel.changed() => return Ok(self.stopped(attempt, "session cancelled")),
                _ = shutdown.changed() => return Ok(self.stopped(attempt, "shutdown")),
                _ = sleep_until(deadline) => return self.time_out(attempt),
                _ = sleep(self.config.poll_interval()) => {}
            }
        }
    }

    /// One scheduled verify call. Transient errors count as a poll.
    async fn poll_once(&self, mut attempt: PaymentAttempt) -> Result<PaymentAttempt, CheckoutError> {
        let verify_lock = self.verify_lock(&attempt.reference);
        let _serialized = verify_lock.lock().await;

        if let Some(settled) = self.settled_attempt(&attempt.reference) {
            return Ok(settled);
        }

        attempt.poll_count += 1;
        match self.gateway.verify(&attempt.reference).await {
            Ok(VerifyResponse {
                status: VerifyStatus::Pending,
            }) => {
                info!(
                    "Payment {} still pending (poll {}/{})",
                    attempt.reference, attempt.poll_count, attempt.max_polls
                );
            }
            Ok(VerifyResponse {
                status: VerifyStatus::Success,
            }) => return Ok(self.settle(attempt, AttemptStatus::Succeeded)),
            Ok(VerifyResponse {
                status: VerifyStatus::Failed,
            }) => return Ok(self.settle(attempt, AttemptStatus::Failed)),
            Err(e) => {
                warn!(
                    "Transient verification error for {} (poll {}/{}): {e}",
                    attempt.reference, attempt.poll_count, attempt.max_polls
                );
            }
        }

        self.store.set_attempt(&attempt)?;
        Ok(attempt)
    }

    /// Performs one ad-hoc verify call outside the automatic loop
    ///
    /// This is the retry affordance once automatic polling has stopped.
    /// A pending answer or a transient error leaves the attempt as it is and
    /// raises a warning. Already settled attempts are returned without
    /// calling the gateway.
    pub async fn check_payment_status(
        &self,
        request: CheckPaymentStatusRequest,
    ) -> Result<CheckPaymentStatusResponse, CheckoutError> {
        info!("Checking status of payment {}", request.reference);

        let result = self.check_payment_status_internal(&request.reference).await;
        if let Err(e) = &result {
            error!("Status check for payment {} failed: {e}", request.reference);
            self.event_emitter.error(Some(&request.reference), e.to_string());
        }
        result.map(|attempt| CheckPaymentStatusResponse { attempt })
    }

    async fn check_payment_status_internal(
        &self,
        reference: &str,
    ) -> Result<PaymentAttempt, CheckoutError> {
        if let Some(settled) = self.settled_attempt(reference) {
            debug!("Payment {reference} already settled as {}", settled.status);
            self.clear_settled(reference);
            return Ok(settled);
        }

        let verify_lock = self.verify_lock(reference);
        let serialized = verify_lock.lock().await;

        // A running session may have settled or advanced the attempt while we waited
        if let Some(settled) = self.settled_attempt(reference) {
            self.clear_settled(reference);
            return Ok(settled);
        }
        let attempt = self
            .store
            .get_attempt(reference)?
            .ok_or_else(|| CheckoutError::AttemptNotFound(reference.to_string()))?;

        let status = match self.gateway.verify(reference).await {
            Ok(VerifyResponse { status }) => status,
            Err(e) => {
                warn!("Transient verification error for {reference} (manual check): {e}");
                self.event_emitter.warning(
                    Some(reference),
                    "Could not reach the payment gateway. Please try again shortly.".to_string(),
                );
                return Ok(attempt);
            }
        };

        let settled = match status {
            VerifyStatus::Pending => {
                info!("Payment {reference} still pending (manual check)");
                let message =
                    format!("Payment {reference} is still pending. Please check again shortly.");
                self.event_emitter.warning(Some(reference), message);
                return Ok(attempt);
            }
            VerifyStatus::Success => self.settle(attempt, AttemptStatus::Succeeded),
            VerifyStatus::Failed => self.settle(attempt, AttemptStatus::Failed),
        };
        drop(serialized);

        self.cancel_session(reference);
        if settled.status == AttemptStatus::Succeeded {
            self.schedule_history_redirect();
        }
        Ok(settled)
    }

    /// Gives up on an attempt: stops its session and forgets it
    pub async fn abandon_payment(&self, request: AbandonPaymentRequest) -> Result<(), CheckoutError> {
        info!("Abandoning payment {}", request.reference);
        self.cancel_session(&request.reference);
        lock(&self.verify_locks).remove(&request.reference);

        if let Err(e) = self.store.clear_attempt(&request.reference) {
            error!("Failed to clear payment {}: {e}", request.reference);
            self.event_emitter.error(Some(&request.reference), e.to_string());
            return Err(e);
        }
        Ok(())
    }

    /// Lists stored attempts, newest first
    pub async fn list_attempts(
        &self,
        _request: ListAttemptsRequest,
    ) -> Result<ListAttemptsResponse, CheckoutError> {
        let attempts = self.store.list_attempts()?;
        Ok(ListAttemptsResponse { attempts })
    }

    /// Applies a settled status. Repeating a settlement is a no-op.
    fn settle(
        &self,
        mut attempt: PaymentAttempt,
        status: AttemptStatus,
    ) -> PaymentAttempt {
        let reference = attempt.reference.clone();
        {
            let mut settled = lock(&self.settled);
            if let Some(existing) = settled.get(&reference) {
                if existing.status != status {
                    warn!(
                        "Ignoring {status} for payment {reference}, already settled as {}",
                        existing.status
                    );
                }
                return existing.clone();
            }
            attempt.status = status;
            settled.insert(attempt.clone());
        }
        lock(&self.verify_locks).remove(&reference);

        // The verdict stands even if the store keeps a stale entry. It is
        // cleared again whenever the reference comes up.
        self.clear_settled(&reference);

        if status == AttemptStatus::Succeeded {
            info!(
                "Payment {reference} succeeded after {} polls",
                attempt.poll_count
            );
            self.event_emitter.emit(&CheckoutEvent::Success {
                attempt: attempt.clone(),
            });
        } else {
            let message = CheckoutError::PaymentFailed(reference.clone()).to_string();
            warn!("{message}");
            self.event_emitter.error(Some(&reference), message);
        }
        attempt
    }

    /// Ends automatic polling without a verdict. The store entry is kept.
    fn time_out(&self, mut attempt: PaymentAttempt) -> Result<PaymentAttempt, CheckoutError> {
        if let Some(settled) = self.settled_attempt(&attempt.reference) {
            return Ok(settled);
        }

        attempt.status = AttemptStatus::TimedOut;
        self.store.set_attempt(&attempt)?;
        lock(&self.verify_locks).remove(&attempt.reference);

        let message = CheckoutError::VerificationTimeout(attempt.reference.clone()).to_string();
        warn!("{message} ({} polls)", attempt.poll_count);
        self.event_emitter.warning(Some(&attempt.reference), message);
        Ok(attempt)
    }

    fn stopped(&self, attempt: PaymentAttempt, why: &str) -> PaymentAttempt {
        info!("Verification of payment {} stopped: {why}", attempt.reference);
        self.settled_attempt(&attempt.reference).unwrap_or(attempt)
    }

    fn cancel_session(&self, reference: &str) {
        let session = lock(&self.sessions).remove(reference);
        if let Some(session) = session {
            debug!("Cancelling verification session for {reference}");
            let _ = session.cancel.send(true);
        }
    }

    fn settled_attempt(&self, reference: &str) -> Option<PaymentAttempt> {
        lock(&self.settled).get(reference).cloned()
    }

    fn clear_settled(&self, reference: &str) {
        if let Err(e) = self.store.clear_attempt(reference) {
            error!("Failed to clear settled payment {reference}: {e}");
        }
    }

    fn verify_lock(&self, reference: &str) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.verify_locks)
            .entry(reference.to_string())
            .or_default()
            .clone()
    }

    fn redirect_to_history(&self) {
        let url = navigator::resolve(&self.navigator.current_url(), &self.config.history_path);
        info!("Redirecting to payment history at {url}");
        self.navigator.navigate(&url);
    }

    fn schedule_history_redirect(&self) {
        let reconciler = self.clone();
        let mut shutdown = self.shutdown_receiver.clone();
        let delay = self.config.success_redirect_delay();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = sleep(delay) => reconciler.redirect_to_history(),
            }
        });
    }

    /// Configures a global logger that writes to `checkout.log` in `log_dir`
    /// and forwards records to an optional application logger.
    ///
    /// It must be called at most once, before any other method. If the
    /// application already registered a global logger, don't call it at all.
    ///
    /// ### Errors
    ///
    /// Fails if the log file cannot be created or a global logger is
    /// already configured.
    pub fn init_logging(log_dir: &str, app_logger: Option<Box<dyn log::Log>>) -> anyhow::Result<()> {
        crate::logger::CheckoutLogger::init(log_dir, app_logger)
    }
}

/// Owns the timers of one verification run
///
/// Dropping the session (the owning view went away) cancels the poll
/// interval, the timeout deadline and any outstanding verify call.
pub struct VerificationSession {
    reference: String,
    session_id: String,
    handle: Option<JoinHandle<Result<PaymentAttempt, CheckoutError>>>,
    sessions: SessionRegistry,
}

impl VerificationSession {
    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Waits for the run to end and returns the attempt as it was left
    pub async fn outcome(mut self) -> Result<PaymentAttempt, CheckoutError> {
        match self.handle.take() {
            Some(handle) => handle.await?,
            None => Err(CheckoutError::GenericError(
                "Verification outcome already taken".to_string(),
            )),
        }
    }

    /// Stops polling. Same as dropping the session.
    pub fn cancel(self) {}
}

impl Drop for VerificationSession {
    fn drop(&mut self) {
        let mut sessions = lock(&self.sessions);
        let owned = sessions
            .get(&self.reference)
            .is_some_and(|s| s.id == self.session_id);
        if owned {
            if let Some(session) = sessions.remove(&self.reference) {
                let _ = session.cancel.send(true);
            }
        }
    }
}
