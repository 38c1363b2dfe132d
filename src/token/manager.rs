//! Token manager: owns the bearer token and keeps it fresh.
//!
//! ```text
//! Uninitialized ─init─▶ Initialized ─store_token─▶ Valid ─refresh─▶ RefreshInProgress
//!                            │                       ▲                 │      │
//!                            └──────────────▶ InvalidOrMissing ◀── auth/error │
//!                                                    ▲          exhausted     │
//!                                                    └────────────────────────┘
//! ```
//!
//! Timers are tokio tasks guarded by `CancellationToken`s. A timer only
//! spawns the refresh worker; the worker sends through the injected
//! [`RefreshChannel`]. An atomic flag keeps at most one refresh in flight
//! from the send until `auth/ok`, `auth/error` or the response timeout.

use super::backoff::Backoff;
use super::clock::Clock;
use super::events::AuthEvent;
use super::record::{token_tail, TokenRecord};
use super::refresh::{RefreshChannel, RefreshRequest, RefreshResponse};
use crate::claim::ClaimClient;
use crate::config::AuthConfig;
use crate::error::{Error, Result, TransportError};
use crate::provisioning::validate_pairing_code;
use crate::storage::CredentialStore;
use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    /// Initialized with nothing persisted.
    Initialized,
    Valid,
    InvalidOrMissing,
    RefreshInProgress,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of [`TokenManager::schedule_auto_refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshSchedule {
    /// Less than the refresh buffer remained; a refresh was launched now.
    Immediate,
    /// Timer armed for this unix time.
    At(u32),
    /// Auto-refresh is switched off.
    Disabled,
    NoToken,
}

struct TokenState {
    state: ManagerState,
    record: Option<TokenRecord>,
    channel: Option<Arc<dyn RefreshChannel>>,
    retry_count: u32,
    backoff: Backoff,
    /// Bumped on every send so stale timeouts are ignored.
    generation: u64,
    root: CancellationToken,
    timer: Option<CancellationToken>,
    watchdog: Option<CancellationToken>,
}

impl TokenState {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }

    fn cancel_watchdog(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.cancel();
        }
    }

    /// `Valid` or `InvalidOrMissing` depending on the token at `now`.
    fn settle(&mut self, now: u32, margin: u32) {
        self.state = match &self.record {
            Some(record) if record.is_valid_at(now, margin) => ManagerState::Valid,
            _ => ManagerState::InvalidOrMissing,
        };
    }
}

struct Shared {
    config: AuthConfig,
    store: CredentialStore,
    clock: Arc<dyn Clock>,
    inner: Mutex<TokenState>,
    claim_lock: Mutex<()>,
    in_flight: AtomicBool,
    auto_refresh: AtomicBool,
    events: broadcast::Sender<AuthEvent>,
}

/// Process-wide token context. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TokenManager {
    shared: Arc<Shared>,
}

fn secs(d: Duration) -> u32 {
    u32::try_from(d.as_secs()).unwrap_or(u32::MAX)
}

impl TokenManager {
    pub fn new(config: AuthConfig, store: CredentialStore, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let backoff = Backoff::from_config(&config);
        Self {
            shared: Arc::new(Shared {
                config,
                store,
                clock,
                inner: Mutex::new(TokenState {
                    state: ManagerState::Uninitialized,
                    record: None,
                    channel: None,
                    retry_count: 0,
                    backoff,
                    generation: 0,
                    root: CancellationToken::new(),
                    timer: None,
                    watchdog: None,
                }),
                claim_lock: Mutex::new(()),
                in_flight: AtomicBool::new(false),
                auto_refresh: AtomicBool::new(true),
                events,
            }),
        }
    }

    fn now(&self) -> u32 {
        self.shared.clock.now_unix()
    }

    fn margin(&self) -> u32 {
        secs(self.shared.config.validity_margin)
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.shared.events.send(event);
    }

    async fn lock(&self) -> MutexGuard<'_, TokenState> {
        self.shared.inner.lock().await
    }

    async fn lock_initialized(&self) -> Result<MutexGuard<'_, TokenState>> {
        let inner = self.lock().await;
        if inner.state == ManagerState::Uninitialized {
            return Err(Error::State("token manager not initialized"));
        }
        Ok(inner)
    }

    /// Load any persisted token and arm auto-refresh. Idempotent.
    ///
    /// Fails closed: if storage cannot be read the manager stays
    /// uninitialized.
    pub async fn init(&self) -> Result<()> {
        let mut inner = self.lock().await;
        if inner.state != ManagerState::Uninitialized {
            return Ok(());
        }

        let record = self.shared.store.load_token_record()?;
        let now = self.now();
        inner.root = CancellationToken::new();
        inner.retry_count = 0;
        inner.backoff.reset();
        match record {
            Some(record) => {
                info!(
                    "Loaded token ...{} ({}s left)",
                    token_tail(&record.token),
                    record.remaining(now)
                );
                inner.record = Some(record);
                inner.settle(now, self.margin());
            }
            None => {
                debug!("No persisted token");
                inner.state = ManagerState::Initialized;
            }
        }
        let has_token = inner.record.is_some();
        drop(inner);

        if has_token {
            self.schedule_auto_refresh().await;
        }
        Ok(())
    }

    /// Install the channel refresh requests are sent through.
    pub async fn set_refresh_channel(&self, channel: Arc<dyn RefreshChannel>) {
        self.lock().await.channel = Some(channel);
    }

    /// Claim the device and store the resulting token.
    ///
    /// Only one claim runs at a time; `claim_with_retry` bounds the attempts.
    pub async fn authenticate_device(&self, pairing_code: &str, client: &ClaimClient) -> Result<()> {
        drop(self.lock_initialized().await?);
        validate_pairing_code(pairing_code)?;

        let _claim = self.shared.claim_lock.lock().await;
        let store = &self.shared.store;
        if let Err(e) = store.save_pairing_code(pairing_code) {
            warn!("Could not persist pairing code: {}", e);
        }
        let child_id = store
            .load_child_id()?
            .ok_or(Error::State("no child_id provisioned"))?;

        let response = match client.claim_with_retry(&child_id).await {
            Ok(response) => response,
            Err(e) => {
                if matches!(e, Error::Auth { .. }) {
                    self.emit(AuthEvent::AuthFailed {
                        reason: e.to_string(),
                    });
                }
                return Err(e);
            }
        };

        if let Err(e) = client.persist_artifacts(&response) {
            warn!("Claim artifacts not fully persisted: {}", e);
        }
        self.store_token(&response.access_token, response.expires_in)
            .await?;

        let expiry = {
            let mut inner = self.lock().await;
            inner.retry_count = 0;
            inner.backoff.reset();
            inner.record.as_ref().map(|r| r.expiry).unwrap_or_default()
        };
        info!("Device authenticated");
        self.emit(AuthEvent::Authenticated { expiry });
        Ok(())
    }

    /// Store `token`, valid for `ttl` seconds from now, and re-arm
    /// auto-refresh.
    ///
    /// A storage failure is logged and the token is still used in memory.
    pub async fn store_token(&self, token: &str, ttl: u32) -> Result<RefreshSchedule> {
        if token.is_empty() {
            return Err(Error::State("refusing to store an empty token"));
        }
        let store = &self.shared.store;
        let device_id = store
            .load_device_id()
            .unwrap_or_else(|_| store.mac().device_id());
        let child_id = store.load_child_id().ok().flatten().unwrap_or_default();

        let mut inner = self.lock_initialized().await?;
        let now = self.now();
        let record = TokenRecord {
            token: token.to_string(),
            expiry: now.saturating_add(ttl),
            device_id,
            child_id,
        };
        if let Err(e) = store.save_token_record(&record) {
            warn!("Token not persisted, keeping it for this session: {}", e);
        }
        let expiry = record.expiry;
        info!("Stored token ...{} (expires in {}s)", token_tail(token), ttl);

        inner.record = Some(record);
        inner.retry_count = 0;
        inner.backoff.reset();
        inner.cancel_watchdog();
        inner.settle(now, self.margin());
        self.shared.in_flight.store(false, Ordering::SeqCst);
        drop(inner);

        self.emit(AuthEvent::TokenStored { expiry });
        Ok(self.schedule_auto_refresh().await)
    }

    /// Arm the refresh timer for `expiry - refresh_buffer`, or refresh now
    /// if less than the buffer remains.
    pub async fn schedule_auto_refresh(&self) -> RefreshSchedule {
        let mut inner = self.lock().await;
        inner.cancel_timer();

        if !self.shared.auto_refresh.load(Ordering::SeqCst) {
            return RefreshSchedule::Disabled;
        }
        let Some(expiry) = inner.record.as_ref().map(|r| r.expiry) else {
            return RefreshSchedule::NoToken;
        };

        let now = self.now();
        let buffer = secs(self.shared.config.refresh_buffer);
        if expiry.saturating_sub(now) < buffer {
            debug!("Token inside refresh buffer, refreshing now");
            drop(inner);
            self.spawn_refresh_worker();
            return RefreshSchedule::Immediate;
        }

        let at = expiry - buffer;
        self.arm_timer(&mut inner, Duration::from_secs(u64::from(at - now)));
        debug!("Refresh scheduled in {}s", at - now);
        RefreshSchedule::At(at)
    }

    fn arm_timer(&self, inner: &mut TokenState, delay: Duration) {
        inner.cancel_timer();
        let cancel = inner.root.child_token();
        inner.timer = Some(cancel.clone());

        let manager = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => manager.spawn_refresh_worker(),
            }
        });
    }

    fn spawn_refresh_worker(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.refresh_token().await {
                debug!("Refresh attempt failed: {}", e);
            }
        });
    }

    /// Send a refresh request.
    ///
    /// Returns immediately with success if a refresh is already in flight.
    /// The response timeout covers the send and the answer; a send failure
    /// or timeout counts against `refresh_max_retries` and schedules a
    /// backed-off retry.
    pub async fn refresh_token(&self) -> Result<()> {
        if self
            .shared
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Refresh already in flight");
            return Ok(());
        }
        let mut flight = InFlight::new(self);

        let (message, channel, generation) = {
            let mut inner = self.lock_initialized().await?;
            let Some(record) = inner.record.as_ref() else {
                return Err(Error::State("no token to refresh"));
            };
            let message = RefreshRequest::new(record.proof()).to_json();
            inner.generation = inner.generation.wrapping_add(1);
            inner.state = ManagerState::RefreshInProgress;
            let generation = inner.generation;
            self.arm_response_watchdog(&mut inner, generation);
            (message, inner.channel.clone(), generation)
        };
        flight.generation = Some(generation);

        let timeout = self.shared.config.refresh_response_timeout;
        let sent = match (message, channel) {
            (Ok(message), Some(channel)) => {
                match tokio::time::timeout(timeout, channel.send_refresh(&message)).await {
                    Ok(sent) => sent.map_err(Error::from),
                    Err(_) => Err(TransportError::Timeout.into()),
                }
            }
            (Ok(_), None) => Err(TransportError::Unavailable.into()),
            (Err(e), _) => Err(e),
        };
        flight.complete();

        match sent {
            Ok(()) => {
                debug!("Refresh request sent");
                Ok(())
            }
            Err(e) => {
                self.on_refresh_failure(generation, &e.to_string()).await;
                Err(e)
            }
        }
    }

    fn arm_response_watchdog(&self, inner: &mut TokenState, generation: u64) {
        inner.cancel_watchdog();
        let cancel = inner.root.child_token();
        inner.watchdog = Some(cancel.clone());

        let timeout = self.shared.config.refresh_response_timeout;
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    manager.on_refresh_failure(generation, "no refresh response").await;
                }
            }
        });
    }

    async fn on_refresh_failure(&self, generation: u64, reason: &str) {
        let mut inner = self.lock().await;
        if inner.generation != generation || inner.state != ManagerState::RefreshInProgress {
            return;
        }
        inner.cancel_watchdog();
        self.shared.in_flight.store(false, Ordering::SeqCst);
        inner.retry_count += 1;
        let attempt = inner.retry_count;
        let max = self.shared.config.refresh_max_retries;
        warn!("Token refresh failed ({}/{}): {}", attempt, max, reason);
        self.emit(AuthEvent::RefreshFailed {
            attempt,
            reason: reason.to_string(),
        });

        if attempt > max {
            inner.cancel_timer();
            inner.record = None;
            inner.state = ManagerState::InvalidOrMissing;
            drop(inner);
            warn!("Token refresh exhausted after {} attempts; re-authentication required", attempt);
            self.emit(AuthEvent::RefreshExhausted { attempts: attempt });
            return;
        }

        inner.settle(self.now(), self.margin());
        let delay = inner.backoff.next_delay();
        self.arm_timer(&mut inner, delay);
        debug!("Refresh retry in {:?}", delay);
    }

    /// Apply an `auth/ok` or `auth/error` message from the server.
    pub async fn handle_refresh_response(&self, message: &str) -> Result<()> {
        let response = RefreshResponse::parse(message)?;
        let mut inner = self.lock_initialized().await?;
        inner.cancel_watchdog();
        inner.generation = inner.generation.wrapping_add(1);
        self.shared.in_flight.store(false, Ordering::SeqCst);

        match response {
            RefreshResponse::Ok { exp_in_sec, token } => {
                let now = self.now();
                let Some(record) = inner.record.as_mut() else {
                    inner.state = ManagerState::InvalidOrMissing;
                    return Err(Error::State("refresh answered but no token held"));
                };
                record.expiry = now.saturating_add(exp_in_sec);
                if let Some(token) = token.filter(|t| !t.is_empty()) {
                    debug!("Server rotated token to ...{}", token_tail(&token));
                    record.token = token;
                }
                let expiry = record.expiry;
                if let Err(e) = self.shared.store.save_token_record(record) {
                    warn!("Refreshed token not persisted: {}", e);
                }
                inner.retry_count = 0;
                inner.backoff.reset();
                inner.settle(now, self.margin());
                drop(inner);

                info!("Token refreshed (expires in {}s)", exp_in_sec);
                self.emit(AuthEvent::Refreshed { expiry });
                self.schedule_auto_refresh().await;
                Ok(())
            }
            RefreshResponse::Error { reason } => {
                warn!("Server rejected token refresh: {}", reason);
                inner.cancel_timer();
                inner.record = None;
                inner.state = ManagerState::InvalidOrMissing;
                let cleared = self.shared.store.clear_tokens();
                drop(inner);

                self.emit(AuthEvent::AuthFailed { reason });
                cleared.map_err(Error::from)
            }
        }
    }

    /// True iff a token is held and more than the validity margin remains.
    pub async fn is_token_valid(&self) -> bool {
        let now = self.now();
        let margin = self.margin();
        self.lock()
            .await
            .record
            .as_ref()
            .is_some_and(|r| r.is_valid_at(now, margin))
    }

    /// Wipe the token from memory and storage and cancel pending timers.
    pub async fn clear_token(&self) -> Result<()> {
        let mut inner = self.lock().await;
        inner.cancel_timer();
        inner.cancel_watchdog();
        inner.generation = inner.generation.wrapping_add(1);
        inner.record = None;
        if inner.state != ManagerState::Uninitialized {
            inner.state = ManagerState::InvalidOrMissing;
        }
        self.shared.in_flight.store(false, Ordering::SeqCst);
        let cleared = self.shared.store.clear_tokens();
        drop(inner);

        info!("Token cleared");
        self.emit(AuthEvent::TokenCleared);
        cleared.map_err(Error::from)
    }

    /// Copy of the current token.
    pub async fn token(&self) -> Option<Zeroizing<String>> {
        self.lock()
            .await
            .record
            .as_ref()
            .map(|r| Zeroizing::new(r.token.clone()))
    }

    pub async fn expiry(&self) -> Option<u32> {
        self.lock().await.record.as_ref().map(|r| r.expiry)
    }

    pub async fn seconds_until_expiry(&self) -> Option<u32> {
        let now = self.now();
        self.lock().await.record.as_ref().map(|r| r.remaining(now))
    }

    pub async fn state(&self) -> ManagerState {
        self.lock().await.state
    }

    /// Consecutive refresh failures.
    pub async fn retry_count(&self) -> u32 {
        self.lock().await.retry_count
    }

    /// Switch auto-refresh on or off. Switching off cancels an armed timer.
    pub async fn set_auto_refresh(&self, enabled: bool) -> RefreshSchedule {
        self.shared.auto_refresh.store(enabled, Ordering::SeqCst);
        self.schedule_auto_refresh().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.shared.events.subscribe()
    }

    /// Cancel every timer and drop the in-memory token. `init` may be called
    /// again afterwards.
    pub async fn shutdown(&self) {
        let mut inner = self.lock().await;
        inner.root.cancel();
        inner.timer = None;
        inner.watchdog = None;
        inner.generation = inner.generation.wrapping_add(1);
        inner.record = None;
        inner.channel = None;
        inner.state = ManagerState::Uninitialized;
        self.shared.in_flight.store(false, Ordering::SeqCst);
        debug!("Token manager shut down");
    }
}

/// Releases the in-flight flag if `refresh_token` returns or is dropped
/// before its send completes.
struct InFlight<'a> {
    manager: &'a TokenManager,
    generation: Option<u64>,
    completed: bool,
}

impl<'a> InFlight<'a> {
    fn new(manager: &'a TokenManager) -> Self {
        Self {
            manager,
            generation: None,
            completed: false,
        }
    }

    /// The send finished; the answer or the watchdog releases the flag now.
    fn complete(&mut self) {
        self.completed = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let manager = self.manager;
        manager.shared.in_flight.store(false, Ordering::SeqCst);
        let Some(generation) = self.generation else {
            return;
        };
        // Contended lock: the armed watchdog settles the state instead
        if let Ok(mut inner) = manager.shared.inner.try_lock() {
            if inner.generation == generation && inner.state == ManagerState::RefreshInProgress {
                inner.cancel_watchdog();
                inner.settle(manager.now(), manager.margin());
                debug!("Refresh abandoned before the request was sent");
            }
        }
    }
}
