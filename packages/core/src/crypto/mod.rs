//! Криптографический модуль
//!
//! # Архитектура
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Link / Handshake                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  AlgorithmRegistry                          │
//! │  - id → factory (cipher, key exchange, MAC)                 │
//! │  - create_suite(CipherSuiteIdentifier)                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │           CipherSuite ──finalize──► KeyedSuite              │
//! │  - HKDF (HMAC-SHA512, shared salt, context string)          │
//! │  - Encrypt-then-MAC                                         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                ┌─────────────┼─────────────┐
//!                ▼             ▼             ▼
//!          ┌──────────┐  ┌──────────┐  ┌──────────┐
//!          │  Cipher  │  │KeyExchange│ │   Mac    │
//!          └──────────┘  └──────────┘  └──────────┘
//! ```
//!
//! ## Модули
//!
//! - [`provider`]: трейты алгоритмов для crypto-agility
//! - [`suites`]: идентификаторы наборов, HKDF, encrypt-then-MAC
//! - [`suites::classic`]: конкретные алгоритмы
//! - [`registry`]: реестр алгоритмов
//! - [`keys`]: статические ключи, certificate authority, пул ключей

pub mod keys;
pub mod provider;
pub mod registry;
pub mod suites;

// ============================================================================
// Re-exports для удобства
// ============================================================================

pub use keys::{CertificateAuthority, CredentialSource, Credentials, KeyPool, KeyProvider, PublicIdentity};
pub use provider::{Cipher, KeyExchange, Mac};
pub use registry::AlgorithmRegistry;
pub use suites::{CipherSuite, CipherSuiteIdentifier, KeyedSuite, SuiteNames};
