//! Link: one transport, one negotiated suite, one outbound queue.
//!
//! ```text
//! Unkeyed ──perform_handshake──► Handshaking ──success──► Established
//!    │                               │                        │
//!    └──────────── close() ──────────┴──────── close() ───────┴──► Closed
//! ```
//!
//! After a successful handshake four threads run per link:
//!
//! - **receive**: transport → decrypt → parse → [`LinkEvent`]
//! - **send**: outbound queue → encrypt → transport
//! - **heartbeat**: enqueues a `Heartbeat` every `heartbeat_interval`
//! - **watchdog**: closes the link after `liveness_timeout` of silence
//!
//! Events are delivered on a channel obtained once via [`Link::take_events`].
//! Every thread holds its own `Arc` to the shared state; the link stays
//! alive until [`Link::close`] runs (explicitly or from one of the loops).

pub mod handshake;
pub mod queue;
pub mod result;

pub use handshake::{negotiate_suite, Role};
pub use queue::BoundedQueue;
pub use result::{HandshakeResult, HandshakeResultKind};

use crate::config::Config;
use crate::crypto::keys::CredentialSource;
use crate::crypto::registry::AlgorithmRegistry;
use crate::crypto::suites::{KeyedSuite, SuiteNames};
use crate::error::{LinkError, Result};
use crate::protocol::{MessageType, Transport, TransportStats, WireMessage};
use crate::storage::{MemoryTrustStore, TrustStore};
use crate::utils::sync::lock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Pause after an empty read from a transport that is still open.
const IDLE_READ_BACKOFF: Duration = Duration::from_millis(5);

// ============================================================================
// Public types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unkeyed,
    Handshaking,
    Established,
    Closed,
}

/// Delivered on the channel returned by [`Link::take_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Application `Data` message.
    Data(WireMessage),
    /// Any other non-heartbeat, non-close message.
    Message(WireMessage),
    /// Fired exactly once, after which the channel disconnects.
    Closed,
}

/// Everything a link needs besides its transport.
#[derive(Clone)]
pub struct LinkContext {
    pub registry: Arc<AlgorithmRegistry>,
    pub trust_store: Arc<dyn TrustStore>,
    pub credentials: CredentialSource,
    pub config: Config,
}

impl LinkContext {
    /// Global registry and config, a fresh in-memory trust store.
    pub fn new(credentials: impl Into<CredentialSource>) -> Self {
        Self {
            registry: AlgorithmRegistry::global(),
            trust_store: Arc::new(MemoryTrustStore::new()),
            credentials: credentials.into(),
            config: Config::global().clone(),
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: Arc<AlgorithmRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_trust_store(mut self, trust_store: Arc<dyn TrustStore>) -> Self {
        self.trust_store = trust_store;
        self
    }
}

impl std::fmt::Debug for LinkContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkContext")
            .field("registry", &self.registry)
            .field("credentials", &self.credentials)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Shared state
// ============================================================================

enum Outbound {
    Message(WireMessage),
    /// Ends the send loop.
    Shutdown,
}

/// What the handshake learned about the peer.
#[derive(Debug, Clone, Default)]
pub(crate) struct PeerInfo {
    pub cert_name: Option<String>,
    pub authority_hash: Option<String>,
    pub authority_key: Option<Vec<u8>>,
    pub trusted_authority: bool,
    pub attestation_token: Option<Vec<u8>>,
}

struct LinkShared {
    id: Uuid,
    transport: Arc<dyn Transport>,
    context: LinkContext,
    suite: OnceLock<KeyedSuite>,
    passthrough: KeyedSuite,
    send_queue: BoundedQueue<Outbound>,
    state: Mutex<LinkState>,
    state_changed: Condvar,
    closed: AtomicBool,
    /// Set by the first Heartbeat received from the peer.
    heartbeat_capable: AtomicBool,
    last_sent: Mutex<Instant>,
    last_received: Mutex<Instant>,
    peer: Mutex<PeerInfo>,
    events_tx: Mutex<Option<Sender<LinkEvent>>>,
    events_rx: Mutex<Option<Receiver<LinkEvent>>>,
    data_bytes_sent: AtomicU64,
    data_bytes_received: AtomicU64,
}

#[derive(Clone)]
pub struct Link {
    shared: Arc<LinkShared>,
}

impl Link {
    pub fn new(transport: Arc<dyn Transport>, context: LinkContext) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        let send_queue = BoundedQueue::with_poll_interval(
            context.config.send_queue_capacity,
            context.config.queue_poll_interval,
        );
        let now = Instant::now();

        Self {
            shared: Arc::new(LinkShared {
                id: Uuid::new_v4(),
                transport,
                context,
                suite: OnceLock::new(),
                passthrough: KeyedSuite::passthrough(),
                send_queue,
                state: Mutex::new(LinkState::Unkeyed),
                state_changed: Condvar::new(),
                closed: AtomicBool::new(false),
                heartbeat_capable: AtomicBool::new(false),
                last_sent: Mutex::new(now),
                last_received: Mutex::new(now),
                peer: Mutex::new(PeerInfo::default()),
                events_tx: Mutex::new(Some(events_tx)),
                events_rx: Mutex::new(Some(events_rx)),
                data_bytes_sent: AtomicU64::new(0),
                data_bytes_received: AtomicU64::new(0),
            }),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> LinkState {
        *lock(&self.shared.state)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// True once the peer has sent at least one Heartbeat.
    pub fn is_heartbeat_capable(&self) -> bool {
        self.shared.heartbeat_capable.load(Ordering::Relaxed)
    }

    pub fn context(&self) -> &LinkContext {
        &self.shared.context
    }

    /// Negotiated algorithm names; `None` until the handshake succeeds.
    pub fn suite_names(&self) -> Option<SuiteNames> {
        self.shared.suite.get().map(|suite| suite.names().clone())
    }

    pub fn peer_cert_name(&self) -> Option<String> {
        lock(&self.shared.peer).cert_name.clone()
    }

    /// Trust-store key of the peer's certificate authority.
    pub fn peer_authority_hash(&self) -> Option<String> {
        lock(&self.shared.peer).authority_hash.clone()
    }

    /// True if the peer's static key was verified by a trusted remote authority.
    pub fn uses_trusted_authority(&self) -> bool {
        lock(&self.shared.peer).trusted_authority
    }

    /// Token the initiator sent in its AuthRequest, if any.
    pub fn attestation_token(&self) -> Option<Vec<u8>> {
        lock(&self.shared.peer).attestation_token.clone()
    }

    pub fn transport_stats(&self) -> TransportStats {
        self.shared.transport.stats()
    }

    /// Bytes of application payload (`data`/`message` fields) sent.
    pub fn data_bytes_sent(&self) -> u64 {
        self.shared.data_bytes_sent.load(Ordering::Relaxed)
    }

    pub fn data_bytes_received(&self) -> u64 {
        self.shared.data_bytes_received.load(Ordering::Relaxed)
    }

    pub fn last_received(&self) -> Instant {
        *lock(&self.shared.last_received)
    }

    pub fn last_sent(&self) -> Instant {
        *lock(&self.shared.last_sent)
    }

    /// Event channel. Returns `None` on every call after the first.
    pub fn take_events(&self) -> Option<Receiver<LinkEvent>> {
        lock(&self.shared.events_rx).take()
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Queues a message for the send loop. Blocks while the queue is full.
    pub fn send_message(&self, message: WireMessage) -> Result<()> {
        match self.state() {
            LinkState::Established => {}
            LinkState::Closed => return Err(LinkError::LinkClosed),
            other => {
                return Err(LinkError::InvalidState(format!(
                    "cannot send on a {:?} link",
                    other
                )))
            }
        }

        let poll = self.shared.context.config.queue_poll_interval;
        let mut item = Outbound::Message(message);
        loop {
            if self.is_closed() {
                return Err(LinkError::LinkClosed);
            }
            match self.shared.send_queue.enqueue_timeout(item, poll) {
                Ok(()) => return Ok(()),
                Err(back) => item = back,
            }
        }
    }

    pub fn send_data(&self, data: &[u8]) -> Result<()> {
        self.send_message(WireMessage::data(data.to_vec()))
    }

    /// Data message with an application-level `type` + `message` envelope.
    pub fn send_typed(&self, kind: &str, message: &[u8]) -> Result<()> {
        self.send_message(WireMessage::typed_data(kind, message.to_vec()))
    }

    // ========================================================================
    // Trust
    // ========================================================================

    /// Marks the peer's certificate authority as (un)trusted in the shared
    /// trust store. Returns `false` if the handshake never saw a peer CA.
    pub fn set_certificate_authority_trust(&self, trusted: bool) -> bool {
        let mut peer = lock(&self.shared.peer);
        let (hash, key) = match (&peer.authority_hash, &peer.authority_key) {
            (Some(hash), Some(key)) => (hash.clone(), key.clone()),
            _ => return false,
        };

        let store = &self.shared.context.trust_store;
        if !store.set_trusted(&hash, trusted) {
            let name = peer.cert_name.clone().unwrap_or_default();
            store.remember(&name, &hash, &key);
            store.set_trusted(&hash, trusted);
        }
        peer.trusted_authority = trusted;
        debug!(link = %self.shared.id, hash = %hash, trusted, "Certificate authority trust updated");
        true
    }

    // ========================================================================
    // Close
    // ========================================================================

    /// Idempotent. Sends a close notice (when established), closes the
    /// transport, stops the send loop and fires [`LinkEvent::Closed`] once.
    pub fn close(&self) {
        let shared = &self.shared;
        if shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let was_established = self.state() == LinkState::Established;
        if was_established {
            if let Err(e) = self.write_frame(&WireMessage::close()) {
                trace!(link = %shared.id, error = %e, "Close notice not delivered");
            }
        }

        shared.transport.close();
        // a full queue is drained by the send loop, which then sees the flag
        let _ = shared.send_queue.try_enqueue(Outbound::Shutdown);

        self.set_state(LinkState::Closed);

        if let Some(events) = lock(&shared.events_tx).take() {
            let _ = events.send(LinkEvent::Closed);
        }

        debug!(link = %shared.id, was_established, "Link closed");
    }

    /// Blocks until the link is closed or `timeout` elapses.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        let state = lock(&self.shared.state);
        let (state, _) = self
            .shared
            .state_changed
            .wait_timeout_while(state, timeout, |state| *state != LinkState::Closed)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *state == LinkState::Closed
    }

    // ========================================================================
    // Internals shared with the handshake
    // ========================================================================

    fn set_state(&self, new_state: LinkState) {
        let mut state = lock(&self.shared.state);
        if *state != LinkState::Closed {
            *state = new_state;
        }
        drop(state);
        self.shared.state_changed.notify_all();
    }

    /// Unkeyed → Handshaking. Fails for any other state.
    pub(crate) fn begin_handshake(&self) -> bool {
        let mut state = lock(&self.shared.state);
        if *state != LinkState::Unkeyed {
            return false;
        }
        *state = LinkState::Handshaking;
        true
    }

    fn current_suite(&self) -> &KeyedSuite {
        self.shared.suite.get().unwrap_or(&self.shared.passthrough)
    }

    /// Encrypts with the current suite and writes one frame.
    pub(crate) fn write_frame(&self, message: &WireMessage) -> Result<()> {
        let plaintext = message.to_bytes()?;
        let frame = self.current_suite().encrypt(&plaintext)?;
        self.shared.transport.send(&frame)?;
        *lock(&self.shared.last_sent) = Instant::now();
        Ok(())
    }

    /// Reads one frame. `Ok(None)` is a frame that failed to decrypt or parse.
    pub(crate) fn read_frame(&self) -> Result<Option<WireMessage>> {
        let frame = loop {
            let frame = self.shared.transport.receive();
            if !frame.is_empty() {
                break frame;
            }
            if self.is_closed() || self.shared.transport.is_closed() {
                return Err(LinkError::LinkClosed);
            }
            thread::sleep(IDLE_READ_BACKOFF);
        };

        let plaintext = self.current_suite().decrypt(&frame);
        if plaintext.is_empty() {
            return Ok(None);
        }

        match WireMessage::parse(&plaintext) {
            Ok(message) => {
                *lock(&self.shared.last_received) = Instant::now();
                Ok(Some(message))
            }
            Err(e) => {
                warn!(link = %self.shared.id, error = %e, "Dropping malformed message");
                Ok(None)
            }
        }
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.shared.transport
    }

    pub(crate) fn update_peer(&self, update: impl FnOnce(&mut PeerInfo)) {
        update(&mut lock(&self.shared.peer));
    }

    /// Installs the keyed suite and marks the link established.
    pub(crate) fn establish(&self, suite: KeyedSuite) -> Result<()> {
        self.shared
            .suite
            .set(suite)
            .map_err(|_| LinkError::InvalidState("suite already installed".to_string()))?;
        self.set_state(LinkState::Established);
        *lock(&self.shared.last_received) = Instant::now();
        Ok(())
    }

    // ========================================================================
    // Loops
    // ========================================================================

    pub(crate) fn start_loops(&self) -> Result<()> {
        let short_id = self.shared.id.simple().to_string();
        let short_id = &short_id[..8];

        let loops: [(&str, fn(Link)); 4] = [
            ("recv", Link::receive_loop),
            ("send", Link::send_loop),
            ("heartbeat", Link::heartbeat_loop),
            ("watchdog", Link::watchdog_loop),
        ];

        for (name, body) in loops {
            let link = self.clone();
            thread::Builder::new()
                .name(format!("bifrost-{}-{}", name, short_id))
                .spawn(move || body(link))?;
        }
        Ok(())
    }

    fn emit(&self, event: LinkEvent) {
        if let Some(events) = lock(&self.shared.events_tx).as_ref() {
            let _ = events.send(event);
        }
    }

    fn receive_loop(self) {
        trace!(link = %self.shared.id, "Receive loop started");
        loop {
            let message = match self.read_frame() {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(_) => break,
            };

            match message.message_type() {
                MessageType::Heartbeat => {
                    if !self.shared.heartbeat_capable.swap(true, Ordering::Relaxed) {
                        debug!(link = %self.shared.id, "Peer is heartbeat capable");
                    }
                    trace!(link = %self.shared.id, "Heartbeat received");
                }
                MessageType::Control if message.is_close_request() => {
                    debug!(link = %self.shared.id, "Peer requested close");
                    break;
                }
                MessageType::Data => {
                    self.shared
                        .data_bytes_received
                        .fetch_add(message.payload_len() as u64, Ordering::Relaxed);
                    self.emit(LinkEvent::Data(message));
                }
                _ => self.emit(LinkEvent::Message(message)),
            }
        }
        trace!(link = %self.shared.id, "Receive loop stopped");
        self.close();
    }

    fn send_loop(self) {
        trace!(link = %self.shared.id, "Send loop started");
        loop {
            let message = match self.shared.send_queue.dequeue() {
                Outbound::Message(message) => message,
                Outbound::Shutdown => break,
            };
            if self.is_closed() {
                break;
            }

            match self.write_frame(&message) {
                Ok(()) => {
                    if message.message_type() == MessageType::Data {
                        self.shared
                            .data_bytes_sent
                            .fetch_add(message.payload_len() as u64, Ordering::Relaxed);
                    }
                }
                Err(e) => {
                    debug!(link = %self.shared.id, error = %e, "Send failed");
                    break;
                }
            }
        }
        trace!(link = %self.shared.id, "Send loop stopped");
        self.close();
    }

    fn heartbeat_loop(self) {
        let interval = self.shared.context.config.heartbeat_interval;
        trace!(link = %self.shared.id, ?interval, "Heartbeat loop started");
        loop {
            // a full queue already carries traffic, skip this beat
            let _ = self
                .shared
                .send_queue
                .try_enqueue(Outbound::Message(WireMessage::heartbeat()));
            if self.wait_closed(interval) {
                break;
            }
        }
        trace!(link = %self.shared.id, "Heartbeat loop stopped");
    }

    fn watchdog_loop(self) {
        let config = &self.shared.context.config;
        let (timeout, poll) = (config.liveness_timeout, config.liveness_poll);
        trace!(link = %self.shared.id, ?timeout, "Watchdog started");
        while !self.wait_closed(poll) {
            let silent_for = self.last_received().elapsed();
            if silent_for > timeout {
                warn!(link = %self.shared.id, ?silent_for, "Peer is silent, closing link");
                self.close();
                break;
            }
        }
        trace!(link = %self.shared.id, "Watchdog stopped");
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("suite", &self.suite_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::CertificateAuthority;
    use crate::protocol::MemoryTransport;

    fn unkeyed_link() -> (Link, MemoryTransport) {
        let (local, remote) = MemoryTransport::pair();
        let context = LinkContext::new(CertificateAuthority::generate().issue());
        (Link::new(Arc::new(local), context), remote)
    }

    #[test]
    fn test_new_link_is_unkeyed() {
        let (link, _remote) = unkeyed_link();
        assert_eq!(link.state(), LinkState::Unkeyed);
        assert!(link.suite_names().is_none());
        assert!(!link.is_closed());
        assert!(!link.is_heartbeat_capable());
    }

    #[test]
    fn test_send_before_handshake_is_rejected() {
        let (link, _remote) = unkeyed_link();
        assert!(matches!(link.send_data(b"early"), Err(LinkError::InvalidState(_))));
    }

    #[test]
    fn test_close_is_idempotent_and_fires_once() {
        let (link, remote) = unkeyed_link();
        let events = link.take_events().unwrap();
        assert!(link.take_events().is_none());

        link.close();
        link.close();

        assert_eq!(link.state(), LinkState::Closed);
        assert!(link.wait_closed(Duration::from_millis(10)));
        assert_eq!(events.recv().unwrap(), LinkEvent::Closed);
        assert!(events.recv().is_err());

        // transport closed underneath
        assert!(remote.receive().is_empty());
        assert!(matches!(link.send_data(b"late"), Err(LinkError::LinkClosed)));
    }

    #[test]
    fn test_closed_link_cannot_handshake() {
        let (link, _remote) = unkeyed_link();
        link.close();
        assert!(!link.begin_handshake());
    }

    /// Open transport that never has anything to read
    #[derive(Default)]
    struct IdleTransport {
        reads: AtomicU64,
        closed: AtomicBool,
    }

    impl Transport for IdleTransport {
        fn send(&self, _frame: &[u8]) -> Result<()> {
            Ok(())
        }

        fn receive(&self) -> Vec<u8> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn stats(&self) -> TransportStats {
            TransportStats::default()
        }
    }

    #[test]
    fn test_idle_reads_back_off() {
        let transport = Arc::new(IdleTransport::default());
        let context = LinkContext::new(CertificateAuthority::generate().issue());
        let link = Link::new(transport.clone(), context);

        let reader = {
            let link = link.clone();
            thread::spawn(move || link.read_frame())
        };
        thread::sleep(Duration::from_millis(100));
        link.close();

        assert!(matches!(reader.join().unwrap(), Err(LinkError::LinkClosed)));
        let reads = transport.reads.load(Ordering::SeqCst);
        assert!(reads > 0 && reads < 100, "{} idle reads in 100 ms", reads);
    }

    #[test]
    fn test_trust_update_needs_peer_authority() {
        let (link, _remote) = unkeyed_link();
        assert!(!link.set_certificate_authority_trust(true));
    }
}
