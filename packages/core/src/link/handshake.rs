//! Handshake: drives a fresh [`Link`] from first contact to an authenticated,
//! keyed state.
//!
//! ```text
//! Initiator                               Responder
//!   ClientHello { allowed_suites }  ──►
//!                                   ◄──   ServerHello { chosen_suite }
//!   AuthRequest { keys, ts, sigs }  ──►
//!                                         check timestamp / replay window
//!                                   ◄──   AuthResponse { keys, ts, sigs, salt }
//!   check timestamp / replay window       check CA + ephemeral signatures
//!   check CA + ephemeral + salt sigs      finalize key exchange
//!   finalize key exchange
//! ```
//!
//! The steps run on a dedicated thread bounded by `handshake_timeout`. On
//! timeout the link is closed, which unblocks the worker's pending receive;
//! the worker also checks a cancellation flag between steps and never
//! installs keys once the caller has given up.

use super::result::{HandshakeResult, HandshakeResultKind};
use super::{Link, LinkState};
use crate::crypto::keys::{trust_hash, Credentials, PublicIdentity};
use crate::crypto::suites::{CipherSuite, CipherSuiteIdentifier, KeyedSuite};
use crate::error::LinkError;
use crate::protocol::{fields, MessageType, WireMessage};
use crate::utils::time;
use rand::rngs::OsRng;
use rand_core::RngCore;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

/// Length of the millisecond timestamp appended to `ecdh_public_key`.
const TIMESTAMP_LENGTH: usize = 8;

const RUNNING: u8 = 0;
const COMPLETED: u8 = 1;
const TIMED_OUT: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

type Step<T> = std::result::Result<T, HandshakeResult>;

fn fail(kind: HandshakeResultKind, message: impl Into<String>) -> HandshakeResult {
    HandshakeResult::new(kind, message)
}

impl From<LinkError> for HandshakeResult {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::LinkClosed => fail(HandshakeResultKind::ConnectionClosed, "Connection closed during handshake"),
            LinkError::MissingField(name) => {
                fail(HandshakeResultKind::UnexpectedMessage, format!("Missing field {}", name))
            }
            other => fail(HandshakeResultKind::Other, other.to_string()),
        }
    }
}

// ============================================================================
// Pure helpers
// ============================================================================

/// Picks the common suite minimizing `local index + peer index`.
///
/// Ties go to the lowest local index. Duplicates in `offered` count at their
/// first position.
pub fn negotiate_suite(
    local: &[CipherSuiteIdentifier],
    offered: &[CipherSuiteIdentifier],
) -> Option<CipherSuiteIdentifier> {
    local
        .iter()
        .enumerate()
        .filter_map(|(local_index, id)| {
            offered
                .iter()
                .position(|candidate| candidate == id)
                .map(|peer_index| (local_index + peer_index, local_index, *id))
        })
        .min_by_key(|&(score, local_index, _)| (score, local_index))
        .map(|(_, _, id)| id)
}

/// `Ok(drift)` when `|now - timestamp| <= max_mismatch`, `Err(drift)` otherwise.
pub(crate) fn check_replay_window(
    now_ms: i64,
    timestamp_ms: i64,
    max_mismatch: Duration,
) -> std::result::Result<Duration, Duration> {
    let drift = time::drift(now_ms, timestamp_ms);
    if drift > max_mismatch {
        Err(drift)
    } else {
        Ok(drift)
    }
}

/// Authentication material the peer sent in AuthRequest / AuthResponse.
struct PeerAuth {
    static_key: Vec<u8>,
    authority_key: Vec<u8>,
    static_signature: Vec<u8>,
    ecdh_field: Vec<u8>,
    ecdh_signature: Vec<u8>,
    cert_name: String,
    timestamp: i64,
}

impl PeerAuth {
    fn extract(message: &WireMessage) -> Step<Self> {
        Ok(Self {
            static_key: message.require(fields::RSA_PUBLIC_KEY)?.to_vec(),
            authority_key: message.require(fields::CA_PUBLIC_KEY)?.to_vec(),
            static_signature: message.require(fields::RSA_SIGNATURE)?.to_vec(),
            ecdh_field: message.require(fields::ECDH_PUBLIC_KEY)?.to_vec(),
            ecdh_signature: message.require(fields::ECDH_SIGNATURE)?.to_vec(),
            cert_name: String::from_utf8_lossy(message.require(fields::CERT_NAME)?).into_owned(),
            timestamp: message
                .require_i64(fields::TIMESTAMP)
                .map_err(|e| fail(HandshakeResultKind::UntrustedTimestamp, e.to_string()))?,
        })
    }

    /// Raw key-exchange public value without the trailing timestamp.
    fn ephemeral_public(&self) -> &[u8] {
        &self.ecdh_field[..self.ecdh_field.len().saturating_sub(TIMESTAMP_LENGTH)]
    }
}

// ============================================================================
// Entry points
// ============================================================================

impl Link {
    /// Runs the initiator (client) side.
    pub fn initiate(&self) -> HandshakeResult {
        self.perform_handshake(Role::Initiator)
    }

    /// Runs the responder (server) side.
    pub fn accept(&self) -> HandshakeResult {
        self.perform_handshake(Role::Responder)
    }

    /// Runs the handshake on a worker thread, bounded by `handshake_timeout`.
    /// Any non-successful result leaves the link closed.
    pub fn perform_handshake(&self, role: Role) -> HandshakeResult {
        if !self.begin_handshake() {
            return fail(
                HandshakeResultKind::Other,
                format!("Handshake requires an unkeyed link, state is {:?}", self.state()),
            );
        }

        let timeout = self.context().config.handshake_timeout;
        let cancel = Arc::new(AtomicBool::new(false));
        let outcome = Arc::new(AtomicU8::new(RUNNING));
        let (result_tx, result_rx) = mpsc::channel();

        let worker = {
            let link = self.clone();
            let cancel = Arc::clone(&cancel);
            let outcome = Arc::clone(&outcome);
            thread::Builder::new()
                .name(format!("bifrost-handshake-{}", &self.id().simple().to_string()[..8]))
                .spawn(move || {
                    let result = Handshake::new(&link, role, &cancel).complete(&outcome);
                    let _ = result_tx.send(result);
                })
        };
        if let Err(e) = worker {
            self.close();
            return self.report(role, fail(HandshakeResultKind::Other, format!("Cannot spawn handshake thread: {}", e)));
        }

        let result = match result_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if outcome
                    .compare_exchange(RUNNING, TIMED_OUT, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    cancel.store(true, Ordering::SeqCst);
                    self.close();
                    fail(
                        HandshakeResultKind::Timeout,
                        format!("Handshake did not complete within {} ms", timeout.as_millis()),
                    )
                } else {
                    // worker committed just before the deadline
                    result_rx.recv().unwrap_or_else(|_| {
                        fail(HandshakeResultKind::Other, "Handshake worker vanished")
                    })
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                self.close();
                fail(HandshakeResultKind::Other, "Handshake worker terminated unexpectedly")
            }
        };

        self.report(role, result)
    }

    fn report(&self, role: Role, result: HandshakeResult) -> HandshakeResult {
        if result.is_successful() {
            let names = self.suite_names();
            info!(
                link = %self.id(),
                ?role,
                cipher = names.as_ref().map(|n| n.cipher),
                key_exchange = names.as_ref().map(|n| n.key_exchange),
                mac = names.as_ref().map(|n| n.mac),
                drift = ?result.time_drift,
                "Handshake completed"
            );
        } else {
            error!(link = %self.id(), ?role, kind = %result.kind, "Handshake failed: {}", result.message);
        }
        result
    }
}

// ============================================================================
// State machine
// ============================================================================

struct Handshake<'a> {
    link: &'a Link,
    role: Role,
    cancel: &'a AtomicBool,
}

impl<'a> Handshake<'a> {
    fn new(link: &'a Link, role: Role, cancel: &'a AtomicBool) -> Self {
        Self { link, role, cancel }
    }

    /// Runs the role's steps, then commits the keys unless the caller
    /// already timed out.
    fn complete(&self, outcome: &AtomicU8) -> HandshakeResult {
        let steps = match self.role {
            Role::Initiator => self.run_initiator(),
            Role::Responder => self.run_responder(),
        };

        let (keyed, drift) = match steps {
            Ok(done) => done,
            Err(result) => {
                self.link.close();
                return result;
            }
        };

        if outcome
            .compare_exchange(RUNNING, COMPLETED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return fail(HandshakeResultKind::Timeout, "Handshake completed after the deadline");
        }

        let committed = self
            .link
            .establish(keyed)
            .and_then(|()| self.link.start_loops());
        if let Err(e) = committed {
            self.link.close();
            return fail(HandshakeResultKind::Other, e.to_string());
        }
        if self.link.state() != LinkState::Established {
            return fail(HandshakeResultKind::ConnectionClosed, "Link closed while establishing");
        }

        HandshakeResult::successful(drift)
    }

    fn check_cancel(&self) -> Step<()> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(fail(HandshakeResultKind::Timeout, "Handshake cancelled"));
        }
        Ok(())
    }

    fn send(&self, message: &WireMessage) -> Step<()> {
        self.check_cancel()?;
        self.link.write_frame(message).map_err(|e| {
            if self.link.transport().is_closed() {
                fail(HandshakeResultKind::ConnectionClosed, e.to_string())
            } else {
                HandshakeResult::from(e)
            }
        })
    }

    fn receive(&self, expected: MessageType) -> Step<WireMessage> {
        loop {
            self.check_cancel()?;
            let frame = self.link.read_frame();
            self.check_cancel()?;

            let message = match frame? {
                Some(message) => message,
                None => {
                    return Err(fail(
                        HandshakeResultKind::UnexpectedMessage,
                        format!("Unreadable frame while waiting for {:?}", expected),
                    ))
                }
            };

            if message.message_type() == MessageType::Heartbeat {
                continue; // peer's loops may already be running
            }
            if !message.check_type(expected, 0) {
                return Err(fail(
                    HandshakeResultKind::UnexpectedMessage,
                    format!(
                        "Expected {:?}, got {:?}/0x{:02X}",
                        expected,
                        message.message_type(),
                        message.subtype()
                    ),
                ));
            }
            return Ok(message);
        }
    }

    fn credentials(&self) -> Step<Credentials> {
        let config = &self.link.context().config;
        self.link
            .context()
            .credentials
            .acquire(config.key_wait_timeout)
            .map_err(|e| fail(HandshakeResultKind::Other, e.to_string()))
    }

    /// `ecdh_public_key` field: raw public value || u64_le(timestamp)
    fn ephemeral_field(suite: &CipherSuite, timestamp: i64) -> Vec<u8> {
        let mut field = suite.key_exchange_public();
        field.extend_from_slice(&timestamp.to_le_bytes());
        field
    }

    fn auth_message(
        &self,
        message_type: MessageType,
        credentials: &Credentials,
        suite: &CipherSuite,
    ) -> WireMessage {
        let config = &self.link.context().config;
        let timestamp = time::now_millis();
        let ecdh_field = Self::ephemeral_field(suite, timestamp);
        let ecdh_signature = credentials.sign(&ecdh_field);

        WireMessage::new(message_type, 0)
            .with_field(fields::RSA_PUBLIC_KEY, credentials.public_key().to_pem().into_bytes())
            .with_field(fields::CA_PUBLIC_KEY, credentials.authority().to_pem().into_bytes())
            .with_field(fields::RSA_SIGNATURE, credentials.signature().to_vec())
            .with_field(fields::ECDH_PUBLIC_KEY, ecdh_field)
            .with_field(fields::ECDH_SIGNATURE, ecdh_signature)
            .with_field(fields::TIMESTAMP, timestamp.to_le_bytes().to_vec())
            .with_field(fields::CERT_NAME, config.cert_name.clone().into_bytes())
    }

    // ------------------------------------------------------------------------
    // Checks
    // ------------------------------------------------------------------------

    /// (a) embedded timestamp matches, (b) within the replay window.
    fn check_timestamp(&self, peer: &PeerAuth) -> Step<Duration> {
        let len = peer.ecdh_field.len();
        let embedded = peer.ecdh_field.get(len.saturating_sub(TIMESTAMP_LENGTH)..);
        if len < TIMESTAMP_LENGTH || embedded != Some(&peer.timestamp.to_le_bytes()[..]) {
            return Err(fail(
                HandshakeResultKind::UntrustedTimestamp,
                "Embedded timestamp does not match the timestamp field",
            ));
        }

        let max = self.link.context().config.max_time_mismatch;
        check_replay_window(time::now_millis(), peer.timestamp, max).map_err(|drift| {
            fail(
                HandshakeResultKind::ReplayAttack,
                format!("Peer clock is {} ms off, limit {} ms", drift.as_millis(), max.as_millis()),
            )
            .with_drift(drift)
        })
    }

    /// (c) static key certified by a trusted remote CA or our own CA,
    /// (d) ephemeral value signed by that static key.
    ///
    /// Returns the peer static key, or `None` with authentication disabled.
    fn check_authenticity(&self, peer: &PeerAuth, credentials: &Credentials) -> Step<Option<PublicIdentity>> {
        let context = self.link.context();
        let hash = trust_hash(&peer.authority_key);
        self.link.update_peer(|info| {
            info.cert_name = Some(peer.cert_name.clone());
            info.authority_hash = Some(hash.clone());
            info.authority_key = Some(peer.authority_key.clone());
        });

        if context.config.no_authentication {
            debug!(link = %self.link.id(), "Authentication disabled, skipping key checks");
            return Ok(None);
        }

        let store = &context.trust_store;
        let mut verified_by_remote = false;
        match store.lookup_by_hash(&hash) {
            Some(known) if store.is_trusted(&hash) => {
                if let Ok(remote_authority) = PublicIdentity::from_pem_bytes(&known) {
                    verified_by_remote = remote_authority.verify(&peer.static_key, &peer.static_signature);
                }
            }
            Some(_) => debug!(link = %self.link.id(), %hash, "Peer authority is known but not trusted"),
            None => {
                if context.config.remember_remote_authority {
                    store.remember(&peer.cert_name, &hash, &peer.authority_key);
                }
            }
        }

        let verified = verified_by_remote
            || credentials
                .authority()
                .verify(&peer.static_key, &peer.static_signature);
        if !verified {
            return Err(fail(
                HandshakeResultKind::UntrustedStaticPublicKey,
                format!("Static key of {} is not signed by a trusted authority", peer.cert_name),
            ));
        }
        self.link.update_peer(|info| info.trusted_authority = verified_by_remote);

        let static_key = PublicIdentity::from_pem_bytes(&peer.static_key).map_err(|e| {
            fail(HandshakeResultKind::UntrustedStaticPublicKey, e.to_string())
        })?;
        if !static_key.verify(&peer.ecdh_field, &peer.ecdh_signature) {
            return Err(fail(
                HandshakeResultKind::UntrustedEphemeralPublicKey,
                "Ephemeral key signature is invalid",
            ));
        }

        Ok(Some(static_key))
    }

    fn finalize(suite: CipherSuite, peer: &PeerAuth) -> Step<KeyedSuite> {
        let (keyed, _shared_secret) = suite
            .finalize_key_exchange(peer.ephemeral_public())
            .map_err(|e| fail(HandshakeResultKind::UntrustedEphemeralPublicKey, e.to_string()))?;
        Ok(keyed)
    }

    // ------------------------------------------------------------------------
    // Roles
    // ------------------------------------------------------------------------

    fn run_initiator(&self) -> Step<(KeyedSuite, Duration)> {
        let context = self.link.context();
        let config = &context.config;
        let credentials = self.credentials()?;

        let allowed = config.effective_suites();
        self.send(&WireMessage::client_hello(CipherSuiteIdentifier::serialize_list(&allowed)))?;

        let hello = self.receive(MessageType::ServerHello)?;
        let chosen = hello.require(fields::CHOSEN_SUITE)?;
        if chosen.is_empty() {
            return Err(fail(HandshakeResultKind::NoCipherSuite, "Peer has no cipher suite in common"));
        }
        let chosen = CipherSuiteIdentifier::from_bytes(chosen)
            .map_err(|e| fail(HandshakeResultKind::NoCipherSuite, e.to_string()))?;
        if !allowed.contains(&chosen) {
            return Err(fail(
                HandshakeResultKind::NoCipherSuite,
                format!("Peer chose {:?}, which was not offered", chosen),
            ));
        }

        let mut suite = context.registry.create_suite(chosen)?;
        debug!(link = %self.link.id(), suite = ?chosen, "Cipher suite chosen by peer");

        let mut request = self.auth_message(MessageType::AuthRequest, &credentials, &suite);
        if let Some(token) = &config.attestation_token {
            request = request.with_field(fields::ATTESTATION_TOKEN, token.clone());
        }
        self.send(&request)?;

        let response = self.receive(MessageType::AuthResponse)?;
        let peer = PeerAuth::extract(&response)?;
        let drift = self.check_timestamp(&peer)?;
        let peer_static = self.check_authenticity(&peer, &credentials)?;

        let salt = response.require(fields::SHARED_SALT)?;
        if salt.len() != config.shared_salt_length {
            return Err(fail(
                HandshakeResultKind::UnexpectedMessage,
                format!("Shared salt must be {} bytes, got {}", config.shared_salt_length, salt.len()),
            ));
        }
        if let Some(peer_static) = peer_static {
            let signature = response.require(fields::SHARED_SALT_SIGNATURE)?;
            if !peer_static.verify(salt, signature) {
                return Err(fail(
                    HandshakeResultKind::UntrustedEphemeralPublicKey,
                    "Shared salt signature is invalid",
                ));
            }
        }

        suite.set_shared_salt(salt);
        let keyed = Self::finalize(suite, &peer)?;
        Ok((keyed, drift))
    }

    fn run_responder(&self) -> Step<(KeyedSuite, Duration)> {
        let context = self.link.context();
        let config = &context.config;

        let hello = self.receive(MessageType::ClientHello)?;
        let offered = CipherSuiteIdentifier::parse_list(hello.require(fields::ALLOWED_SUITES)?);
        let local: Vec<CipherSuiteIdentifier> = config
            .effective_suites()
            .into_iter()
            .filter(|id| context.registry.supports(*id))
            .collect();

        let chosen = match negotiate_suite(&local, &offered) {
            Some(chosen) => chosen,
            None => {
                // refusal; the initiator reports NoCipherSuite on its side too
                let _ = self.send(&WireMessage::server_hello(Vec::new()));
                return Err(fail(
                    HandshakeResultKind::NoCipherSuite,
                    format!("No common cipher suite among {} offered", offered.len()),
                ));
            }
        };
        self.send(&WireMessage::server_hello(chosen.serialize().to_vec()))?;
        debug!(link = %self.link.id(), suite = ?chosen, "Cipher suite negotiated");

        let credentials = self.credentials()?;
        let mut suite = context.registry.create_suite(chosen)?;

        let request = self.receive(MessageType::AuthRequest)?;
        let peer = PeerAuth::extract(&request)?;
        let drift = self.check_timestamp(&peer)?;
        if let Some(token) = request.field(fields::ATTESTATION_TOKEN) {
            let token = token.to_vec();
            self.link.update_peer(|info| info.attestation_token = Some(token));
        }

        let mut salt = vec![0u8; config.shared_salt_length];
        OsRng.fill_bytes(&mut salt);

        let response = self
            .auth_message(MessageType::AuthResponse, &credentials, &suite)
            .with_field(fields::SHARED_SALT_SIGNATURE, credentials.sign(&salt))
            .with_field(fields::SHARED_SALT, salt.clone());
        self.send(&response)?;

        // Checked after the response so mismatched authorities fail on both
        // sides. If only this side rejects, the initiator may already report
        // Successful and then sees the link close.
        self.check_authenticity(&peer, &credentials)?;

        suite.set_shared_salt(&salt);
        let keyed = Self::finalize(suite, &peer)?;
        Ok((keyed, drift))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiation_tie_breaks_on_local_order() {
        let x = CipherSuiteIdentifier::new(2, 1, 0);
        let y = CipherSuiteIdentifier::new(3, 1, 1);
        let z = CipherSuiteIdentifier::new(2, 1, 1);

        // Y: 1+1, Z: 2+0
        for _ in 0..10 {
            assert_eq!(negotiate_suite(&[x, y, z], &[z, y]), Some(y));
        }
    }

    #[test]
    fn test_negotiation_prefers_lowest_score() {
        let x = CipherSuiteIdentifier::new(2, 1, 0);
        let y = CipherSuiteIdentifier::new(3, 1, 1);
        let z = CipherSuiteIdentifier::new(2, 1, 1);

        assert_eq!(negotiate_suite(&[x, y, z], &[z, x]), Some(x));
        assert_eq!(negotiate_suite(&[x, y], &[z]), None);
        assert_eq!(negotiate_suite(&[], &[x]), None);
        // duplicates count at first position
        assert_eq!(negotiate_suite(&[y, z], &[z, z, y]), Some(z));
    }

    #[test]
    fn test_replay_window_boundary() {
        let max = Duration::from_secs(300);
        let now = 1_700_000_000_000i64;

        assert_eq!(check_replay_window(now, now - 300_000, max), Ok(Duration::from_millis(300_000)));
        assert_eq!(check_replay_window(now, now + 300_000, max), Ok(Duration::from_millis(300_000)));
        assert_eq!(check_replay_window(now, now - 300_001, max), Err(Duration::from_millis(300_001)));
        assert_eq!(check_replay_window(now, now + 300_001, max), Err(Duration::from_millis(300_001)));
        assert_eq!(check_replay_window(now, now, max), Ok(Duration::ZERO));
    }

    #[test]
    fn test_link_error_mapping() {
        let closed = HandshakeResult::from(LinkError::LinkClosed);
        assert_eq!(closed.kind, HandshakeResultKind::ConnectionClosed);

        let missing = HandshakeResult::from(LinkError::MissingField("cert_name".to_string()));
        assert_eq!(missing.kind, HandshakeResultKind::UnexpectedMessage);

        let other = HandshakeResult::from(LinkError::Encryption("boom".to_string()));
        assert_eq!(other.kind, HandshakeResultKind::Other);
    }
}
