use std::fmt;
use std::time::Duration;

/// Stable, matchable handshake outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeResultKind {
    Successful,
    Timeout,
    ConnectionClosed,
    UnexpectedMessage,
    NoCipherSuite,
    UntrustedTimestamp,
    ReplayAttack,
    UntrustedStaticPublicKey,
    UntrustedEphemeralPublicKey,
    Other,
}

impl fmt::Display for HandshakeResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeResultKind::Successful => "Successful",
            HandshakeResultKind::Timeout => "Timeout",
            HandshakeResultKind::ConnectionClosed => "ConnectionClosed",
            HandshakeResultKind::UnexpectedMessage => "UnexpectedMessage",
            HandshakeResultKind::NoCipherSuite => "NoCipherSuite",
            HandshakeResultKind::UntrustedTimestamp => "UntrustedTimestamp",
            HandshakeResultKind::ReplayAttack => "ReplayAttack",
            HandshakeResultKind::UntrustedStaticPublicKey => "UntrustedStaticPublicKey",
            HandshakeResultKind::UntrustedEphemeralPublicKey => "UntrustedEphemeralPublicKey",
            HandshakeResultKind::Other => "Other",
        };
        f.write_str(name)
    }
}

/// Result of one handshake attempt. Every failure leaves the link closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    pub kind: HandshakeResultKind,
    /// Free-text diagnostic.
    pub message: String,
    /// Absolute clock drift to the peer, when the peer's timestamp was seen.
    pub time_drift: Option<Duration>,
}

impl HandshakeResult {
    pub fn new(kind: HandshakeResultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            time_drift: None,
        }
    }

    pub fn successful(time_drift: Duration) -> Self {
        Self {
            kind: HandshakeResultKind::Successful,
            message: "Handshake completed".to_string(),
            time_drift: Some(time_drift),
        }
    }

    pub fn with_drift(mut self, time_drift: Duration) -> Self {
        self.time_drift = Some(time_drift);
        self
    }

    pub fn is_successful(&self) -> bool {
        self.kind == HandshakeResultKind::Successful
    }
}

impl fmt::Display for HandshakeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
