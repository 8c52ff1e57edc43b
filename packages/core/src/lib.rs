// Bifrost Core
// Transport-agnostic secure links: negotiated cipher suites, authenticated handshake

#![warn(clippy::all)]

// Модули
pub mod config;
pub mod crypto;
pub mod error;
pub mod link;
pub mod protocol;
pub mod storage;
pub mod utils;

// Re-exports для удобства
pub use config::Config;
pub use crypto::{
    AlgorithmRegistry, CertificateAuthority, CipherSuite, CipherSuiteIdentifier, CredentialSource, Credentials,
    KeyPool, KeyProvider, KeyedSuite, PublicIdentity,
};
pub use error::{LinkError, Result};
pub use link::{HandshakeResult, HandshakeResultKind, Link, LinkContext, LinkEvent, LinkState, Role};
pub use protocol::{MemoryTransport, MessageType, Transport, TransportStats, WireMessage};
pub use storage::{MemoryTrustStore, TrustEntry, TrustStore};
