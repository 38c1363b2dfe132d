//! Provisioning session state machine.
//!
//! ```text
//! Idle ─start─▶ Advertising ─connect─▶ Connected ─packet─▶ Decrypting ─▶ Validating
//!                    ▲                     │                   │              │
//!                    └────disconnect───────┘                   ▼              ▼
//!                                              AwaitingPacket ◀── failure   Succeeded
//!                                                              └─ terminal failure ─▶ Failed
//!
//! any non-terminal state ── provisioning_timeout since start ──▶ TimedOut
//! ```
//!
//! BLE callbacks run on the NimBLE host task, so the session is driven
//! through a std mutex and never blocks on async work. The hard timeout is
//! enforced both lazily (`check_timeout`, called on every packet) and by an
//! optional tokio watchdog task.

use super::data::ProvisioningData;
use super::packet::{open_packet, PopKey, ProvisioningPacket};
use super::status::{ProvisioningErrorCode, StatusReply};
use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::storage::CredentialStore;
use log::{debug, info, warn};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    Idle,
    Advertising,
    Connected,
    AwaitingPacket,
    Decrypting,
    Validating,
    Succeeded,
    Failed,
    TimedOut,
}

impl ProvisioningState {
    /// States the session never leaves without `start` or `stop`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    /// States counted against the session timeout.
    fn is_running(&self) -> bool {
        !self.is_terminal() && *self != Self::Idle
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Session lifecycle notifications for LEDs, voice prompts and the
/// application state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningEvent {
    Started,
    Succeeded,
    Failed(ProvisioningErrorCode),
    TimedOut,
    Stopped,
}

struct Inner {
    state: ProvisioningState,
    pop_key: Option<PopKey>,
    started_at: Option<Instant>,
    failures: u32,
    watchdog: Option<CancellationToken>,
}

/// One BLE provisioning session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ProvisioningSession {
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<ProvisioningEvent>,
    store: CredentialStore,
    timeout: Duration,
    max_failures: u32,
}

impl ProvisioningSession {
    pub fn new(store: CredentialStore, config: &AuthConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: ProvisioningState::Idle,
                pop_key: None,
                started_at: None,
                failures: 0,
                watchdog: None,
            })),
            events,
            store,
            timeout: config.provisioning_timeout,
            max_failures: config.provisioning_max_failures.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ProvisioningEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Load the Proof-of-Possession key, normally before `start`.
    pub fn set_pop_key(&self, key: PopKey) {
        self.lock().pop_key = Some(key);
        debug!("PoP key loaded");
    }

    /// Drop (and zero) the PoP key.
    pub fn clear_pop_key(&self) {
        self.lock().pop_key = None;
    }

    pub fn has_pop_key(&self) -> bool {
        self.lock().pop_key.is_some()
    }

    pub fn state(&self) -> ProvisioningState {
        self.lock().state
    }

    /// Failed packets seen since `start`.
    pub fn failures(&self) -> u32 {
        self.lock().failures
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProvisioningEvent> {
        self.events.subscribe()
    }

    /// Begin advertising. Allowed from `Idle` or any terminal state.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state.is_running() {
            return Err(Error::State("provisioning already running"));
        }
        if inner.pop_key.is_none() {
            warn!("Provisioning started without a PoP key; every packet will be rejected");
        }
        if let Some(old) = inner.watchdog.take() {
            old.cancel();
        }
        inner.state = ProvisioningState::Advertising;
        inner.started_at = Some(Instant::now());
        inner.failures = 0;
        drop(inner);

        info!("Provisioning started ({}s timeout)", self.timeout.as_secs());
        self.emit(ProvisioningEvent::Started);
        Ok(())
    }

    /// A central connected.
    pub fn on_connect(&self) {
        let mut inner = self.lock();
        if inner.state == ProvisioningState::Advertising {
            inner.state = ProvisioningState::Connected;
            debug!("Provisioning peer connected");
        }
    }

    /// The central went away; resume advertising unless finished.
    pub fn on_disconnect(&self) {
        let mut inner = self.lock();
        if matches!(
            inner.state,
            ProvisioningState::Connected | ProvisioningState::AwaitingPacket
        ) {
            inner.state = ProvisioningState::Advertising;
            debug!("Provisioning peer disconnected");
        }
    }

    /// Process one write on the provisioning characteristic.
    ///
    /// Returns the reply to notify back to the peer.
    pub fn handle_packet(&self, data: &[u8]) -> StatusReply {
        if self.check_timeout() {
            return StatusReply::Timeout;
        }

        let mut inner = self.lock();
        match inner.state {
            ProvisioningState::Connected | ProvisioningState::AwaitingPacket => {}
            ProvisioningState::TimedOut => return StatusReply::Timeout,
            other => {
                warn!("Packet ignored in state {}", other);
                return StatusReply::Error(ProvisioningErrorCode::InternalError);
            }
        }

        match self.process(&mut inner, data) {
            Ok(()) => {
                inner.state = ProvisioningState::Succeeded;
                inner.pop_key = None;
                if let Some(watchdog) = inner.watchdog.take() {
                    watchdog.cancel();
                }
                drop(inner);
                info!("Provisioning succeeded");
                self.emit(ProvisioningEvent::Succeeded);
                StatusReply::Ok
            }
            Err(code) => {
                inner.failures += 1;
                let terminal = code.is_terminal() || inner.failures >= self.max_failures;
                warn!(
                    "Provisioning packet rejected: {} ({}/{})",
                    code, inner.failures, self.max_failures
                );
                if terminal {
                    inner.state = ProvisioningState::Failed;
                    if let Some(watchdog) = inner.watchdog.take() {
                        watchdog.cancel();
                    }
                    drop(inner);
                    self.emit(ProvisioningEvent::Failed(code));
                } else {
                    inner.state = ProvisioningState::AwaitingPacket;
                }
                StatusReply::Error(code)
            }
        }
    }

    fn process(
        &self,
        inner: &mut Inner,
        data: &[u8],
    ) -> std::result::Result<(), ProvisioningErrorCode> {
        let key = inner.pop_key.as_ref().ok_or(ProvisioningErrorCode::NoPopKey)?;

        let packet = ProvisioningPacket::parse(data)
            .map_err(|e| ProvisioningErrorCode::from_error(&e))?;

        inner.state = ProvisioningState::Decrypting;
        let plaintext =
            open_packet(key, &packet).map_err(|e| ProvisioningErrorCode::from_error(&e))?;

        inner.state = ProvisioningState::Validating;
        let data = ProvisioningData::from_json(&plaintext)
            .map_err(|e| ProvisioningErrorCode::from_error(&e))?;

        self.store.save_provisioning(&data).map_err(|e| {
            warn!("Saving provisioning data failed: {}", e);
            ProvisioningErrorCode::SaveFailed
        })?;
        info!("Provisioned for SSID '{}'", data.wifi.ssid);
        Ok(())
    }

    /// Force `TimedOut` once the session has run past its limit.
    ///
    /// Returns true if this call timed the session out.
    pub fn check_timeout(&self) -> bool {
        let mut inner = self.lock();
        let expired = match inner.started_at {
            Some(start) => inner.state.is_running() && start.elapsed() >= self.timeout,
            None => false,
        };
        if !expired {
            return false;
        }

        inner.state = ProvisioningState::TimedOut;
        inner.pop_key = None;
        if let Some(watchdog) = inner.watchdog.take() {
            watchdog.cancel();
        }
        drop(inner);
        warn!("Provisioning timed out after {}s", self.timeout.as_secs());
        self.emit(ProvisioningEvent::TimedOut);
        true
    }

    /// Spawn a task that times the session out even if no packet arrives.
    /// `notify` receives the timeout reply for the connected peer.
    ///
    /// Must be called after `start` from within a tokio runtime.
    pub fn spawn_timeout_watchdog<F>(&self, notify: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce(StatusReply) + Send + 'static,
    {
        let (deadline, cancel) = {
            let mut inner = self.lock();
            let start = inner
                .started_at
                .filter(|_| inner.state.is_running())
                .ok_or(Error::State("provisioning not running"))?;
            let cancel = CancellationToken::new();
            if let Some(old) = inner.watchdog.replace(cancel.clone()) {
                old.cancel();
            }
            (start + self.timeout, cancel)
        };

        let session = self.clone();
        Ok(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    if session.check_timeout() {
                        notify(StatusReply::Timeout);
                    }
                }
            }
        }))
    }

    /// Abort the session and return to `Idle`.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if inner.state == ProvisioningState::Idle {
            return;
        }
        inner.state = ProvisioningState::Idle;
        inner.started_at = None;
        if let Some(watchdog) = inner.watchdog.take() {
            watchdog.cancel();
        }
        drop(inner);
        info!("Provisioning stopped");
        self.emit(ProvisioningEvent::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MacAddress;
    use crate::provisioning::packet::seal_packet;
    use crate::storage::MemoryStore;

    const KEY: [u8; 32] = [0x11; 32];
    const NONCE: [u8; 12] = [7; 12];

    fn session_with(config: AuthConfig) -> (Arc<MemoryStore>, ProvisioningSession) {
        let kv = Arc::new(MemoryStore::new());
        let store = CredentialStore::new(kv.clone(), MacAddress::new([1, 2, 3, 4, 5, 6]));
        (kv, ProvisioningSession::new(store, &config))
    }

    fn connected() -> (Arc<MemoryStore>, ProvisioningSession) {
        let (kv, session) = session_with(AuthConfig::default());
        session.set_pop_key(PopKey::new(KEY));
        session.start().unwrap();
        session.on_connect();
        (kv, session)
    }

    fn valid_json() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "ssid": "HomeNetwork",
            "password": "hunter22",
            "child_id": "123e4567-e89b-12d3-a456-426614174000",
            "pairing_code": "TEDDY-1234",
            "child_age": 5,
        }))
        .unwrap()
    }

    fn sealed(plaintext: &[u8]) -> Vec<u8> {
        seal_packet(&PopKey::new(KEY), &NONCE, plaintext).unwrap()
    }

    // ==================== Lifecycle Tests ====================

    #[test]
    fn test_start_connect_disconnect() {
        let (_kv, session) = session_with(AuthConfig::default());
        let mut events = session.subscribe();
        assert_eq!(session.state(), ProvisioningState::Idle);

        session.start().unwrap();
        assert_eq!(session.state(), ProvisioningState::Advertising);
        assert_eq!(events.try_recv().unwrap(), ProvisioningEvent::Started);
        assert!(session.start().is_err());

        session.on_connect();
        assert_eq!(session.state(), ProvisioningState::Connected);
        session.on_disconnect();
        assert_eq!(session.state(), ProvisioningState::Advertising);

        session.stop();
        assert_eq!(session.state(), ProvisioningState::Idle);
        assert_eq!(events.try_recv().unwrap(), ProvisioningEvent::Stopped);
    }

    #[test]
    fn test_valid_packet_provisions() {
        let (kv, session) = connected();
        let mut events = session.subscribe();

        let reply = session.handle_packet(&sealed(&valid_json()));
        assert_eq!(reply, StatusReply::Ok);
        assert_eq!(session.state(), ProvisioningState::Succeeded);
        assert_eq!(events.try_recv().unwrap(), ProvisioningEvent::Succeeded);
        assert!(!session.has_pop_key());

        let store = CredentialStore::new(kv, MacAddress::new([1, 2, 3, 4, 5, 6]));
        assert!(store.is_provisioned().unwrap());
        assert_eq!(store.load_child_age().unwrap(), Some(5));
    }

    // ==================== Rejection Tests ====================

    #[test]
    fn test_short_packet_rejected() {
        let (kv, session) = connected();
        let reply = session.handle_packet(&[0u8; 20]);
        assert_eq!(
            reply,
            StatusReply::Error(ProvisioningErrorCode::InvalidPacket)
        );
        assert_eq!(session.state(), ProvisioningState::AwaitingPacket);
        assert!(kv.is_empty());
    }

    #[test]
    fn test_missing_pop_key_fails_closed() {
        let (_kv, session) = session_with(AuthConfig::default());
        session.start().unwrap();
        session.on_connect();
        assert_eq!(
            session.handle_packet(&sealed(&valid_json())),
            StatusReply::Error(ProvisioningErrorCode::NoPopKey)
        );
        assert_eq!(
            session.handle_packet(&[0u8; 4]),
            StatusReply::Error(ProvisioningErrorCode::NoPopKey)
        );
    }

    #[test]
    fn test_tampered_packet_not_applied() {
        let (kv, session) = connected();
        let mut packet = sealed(&valid_json());
        packet[12] ^= 0x80;
        assert_eq!(
            session.handle_packet(&packet),
            StatusReply::Error(ProvisioningErrorCode::DecryptionFailed)
        );
        assert!(kv.is_empty());
    }

    #[test]
    fn test_invalid_fields_not_applied() {
        let (kv, session) = connected();
        let json = br#"{"ssid":"","password":"hunter22","child_id":"x","pairing_code":"ABCD"}"#;
        assert_eq!(
            session.handle_packet(&sealed(json)),
            StatusReply::Error(ProvisioningErrorCode::InvalidCredentials)
        );
        assert!(kv.is_empty());
        assert_eq!(session.state(), ProvisioningState::AwaitingPacket);
    }

    #[test]
    fn test_save_failure_is_terminal() {
        let (kv, session) = connected();
        let mut events = session.subscribe();
        kv.set_fail_writes(true);
        assert_eq!(
            session.handle_packet(&sealed(&valid_json())),
            StatusReply::Error(ProvisioningErrorCode::SaveFailed)
        );
        assert_eq!(session.state(), ProvisioningState::Failed);
        assert_eq!(
            events.try_recv().unwrap(),
            ProvisioningEvent::Failed(ProvisioningErrorCode::SaveFailed)
        );
    }

    #[test]
    fn test_failure_limit_ends_session() {
        let config = AuthConfig {
            provisioning_max_failures: 3,
            ..AuthConfig::default()
        };
        let (_kv, session) = session_with(config);
        session.set_pop_key(PopKey::new(KEY));
        session.start().unwrap();
        session.on_connect();

        for _ in 0..2 {
            session.handle_packet(&[0u8; 20]);
            assert_eq!(session.state(), ProvisioningState::AwaitingPacket);
        }
        session.handle_packet(&[0u8; 20]);
        assert_eq!(session.state(), ProvisioningState::Failed);
        assert_eq!(session.failures(), 3);

        // A correct packet no longer helps
        assert_eq!(
            session.handle_packet(&sealed(&valid_json())),
            StatusReply::Error(ProvisioningErrorCode::InternalError)
        );
    }

    // ==================== Timeout Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_timeout_checked_on_packet() {
        let (_kv, session) = connected();
        tokio::time::advance(Duration::from_secs(599)).await;
        assert!(!session.check_timeout());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(session.handle_packet(&sealed(&valid_json())), StatusReply::Timeout);
        assert_eq!(session.state(), ProvisioningState::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_fires_without_packets() {
        let (_kv, session) = connected();
        let mut events = session.subscribe();
        let notified = Arc::new(Mutex::new(Vec::new()));
        let sink = notified.clone();
        let handle = session
            .spawn_timeout_watchdog(move |reply| sink.lock().unwrap().push(reply))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(601)).await;
        handle.await.unwrap();

        assert_eq!(session.state(), ProvisioningState::TimedOut);
        assert_eq!(events.recv().await.unwrap(), ProvisioningEvent::TimedOut);
        assert_eq!(*notified.lock().unwrap(), vec![StatusReply::Timeout]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_cancelled_on_stop() {
        let (_kv, session) = connected();
        let mut events = session.subscribe();
        let notified = Arc::new(Mutex::new(Vec::new()));
        let sink = notified.clone();
        let handle = session
            .spawn_timeout_watchdog(move |reply| sink.lock().unwrap().push(reply))
            .unwrap();

        session.stop();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(700)).await;

        assert_eq!(session.state(), ProvisioningState::Idle);
        assert_eq!(events.try_recv().unwrap(), ProvisioningEvent::Stopped);
        assert!(events.try_recv().is_err());
        assert!(notified.lock().unwrap().is_empty());
    }
}
