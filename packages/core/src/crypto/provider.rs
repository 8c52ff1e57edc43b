//! Defines the algorithm traits for crypto-agility.
//!
//! A cipher suite is assembled from three independent parts: a symmetric
//! [`Cipher`], a [`KeyExchange`] and a [`Mac`]. Each concrete algorithm is a
//! fresh, independent instance created by the
//! [`AlgorithmRegistry`](crate::crypto::registry::AlgorithmRegistry).

use crate::error::Result;

/// Symmetric cipher used for the encrypt step of encrypt-then-MAC.
pub trait Cipher: Send + Sync {
    /// 16-bit identifier on the wire.
    fn identifier(&self) -> u16;

    /// Human-readable name; bound into the HKDF context string.
    fn human_name(&self) -> &'static str;

    /// Number of key bytes the cipher expects from HKDF.
    fn key_length(&self) -> usize;

    /// Installs the derived key.
    fn initialize(&mut self, key: &[u8]) -> Result<()>;

    /// Encrypts `plaintext`. Output carries whatever nonce the cipher needs.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Reverses [`Cipher::encrypt`].
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Ephemeral key agreement.
pub trait KeyExchange: Send + Sync {
    fn identifier(&self) -> u16;

    fn human_name(&self) -> &'static str;

    /// Our ephemeral public value, as sent in `ecdh_public_key`.
    fn public_key(&self) -> Vec<u8>;

    /// Completes the exchange with the peer's public value and returns the raw
    /// shared secret. May only be called once.
    fn finalize(&mut self, peer_public: &[u8]) -> Result<Vec<u8>>;
}

/// Message authentication code over the ciphertext.
pub trait Mac: Send + Sync {
    fn identifier(&self) -> u16;

    fn human_name(&self) -> &'static str;

    /// Number of key bytes the MAC expects from HKDF.
    fn key_length(&self) -> usize;

    /// Length of the tag appended to every frame.
    fn output_length(&self) -> usize;

    fn initialize(&mut self, key: &[u8]) -> Result<()>;

    fn calculate(&self, message: &[u8]) -> Result<Vec<u8>>;

    /// Constant-time tag comparison.
    fn verify(&self, message: &[u8], tag: &[u8]) -> bool;
}
