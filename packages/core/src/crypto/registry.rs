//! Algorithm registry: 16-bit id → factory.
//!
//! Built-in algorithms are registered lazily, exactly once per registry.
//! Every `create_*` call returns a fresh, independent instance.

use crate::crypto::provider::{Cipher, KeyExchange, Mac};
use crate::crypto::suites::classic::{
    AesCbcCipher, AesGcmCipher, ChaChaCipher, HmacSha256Mac, IdentityCipher, IdentityMac, X25519KeyExchange,
};
use crate::crypto::suites::{CipherSuite, CipherSuiteIdentifier};
use crate::error::{AlgorithmKind, LinkError, Result};
use crate::utils::sync::{read, write};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Once, RwLock};
use tracing::{debug, warn};

pub type CipherFactory = Arc<dyn Fn() -> Box<dyn Cipher> + Send + Sync>;
pub type KeyExchangeFactory = Arc<dyn Fn() -> Box<dyn KeyExchange> + Send + Sync>;
pub type MacFactory = Arc<dyn Fn() -> Box<dyn Mac> + Send + Sync>;

static GLOBAL_REGISTRY: Lazy<Arc<AlgorithmRegistry>> = Lazy::new(|| Arc::new(AlgorithmRegistry::new()));

pub struct AlgorithmRegistry {
    defaults: Once,
    ciphers: RwLock<HashMap<u16, CipherFactory>>,
    key_exchanges: RwLock<HashMap<u16, KeyExchangeFactory>>,
    macs: RwLock<HashMap<u16, MacFactory>>,
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        Self {
            defaults: Once::new(),
            ciphers: RwLock::new(HashMap::new()),
            key_exchanges: RwLock::new(HashMap::new()),
            macs: RwLock::new(HashMap::new()),
        }
    }

    /// Process-wide registry, used when a `LinkContext` is built without one.
    pub fn global() -> Arc<AlgorithmRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    fn ensure_defaults(&self) {
        self.defaults.call_once(|| {
            let mut ciphers = write(&self.ciphers);
            ciphers.insert(IdentityCipher::IDENTIFIER, Arc::new(|| Box::new(IdentityCipher) as Box<dyn Cipher>));
            ciphers.insert(AesCbcCipher::IDENTIFIER, Arc::new(|| Box::new(AesCbcCipher::default()) as Box<dyn Cipher>));
            ciphers.insert(AesGcmCipher::IDENTIFIER, Arc::new(|| Box::new(AesGcmCipher::default()) as Box<dyn Cipher>));
            ciphers.insert(ChaChaCipher::IDENTIFIER, Arc::new(|| Box::new(ChaChaCipher::default()) as Box<dyn Cipher>));

            let mut key_exchanges = write(&self.key_exchanges);
            key_exchanges.insert(
                X25519KeyExchange::IDENTIFIER,
                Arc::new(|| Box::new(X25519KeyExchange::new()) as Box<dyn KeyExchange>),
            );

            let mut macs = write(&self.macs);
            macs.insert(IdentityMac::IDENTIFIER, Arc::new(|| Box::new(IdentityMac) as Box<dyn Mac>));
            macs.insert(HmacSha256Mac::IDENTIFIER, Arc::new(|| Box::new(HmacSha256Mac::default()) as Box<dyn Mac>));

            debug!(
                ciphers = ciphers.len(),
                key_exchanges = key_exchanges.len(),
                macs = macs.len(),
                "Registered built-in algorithms"
            );
        });
    }

    // ========================================================================
    // Registration
    // ========================================================================

    pub fn register_cipher<F>(&self, id: u16, factory: F)
    where
        F: Fn() -> Box<dyn Cipher> + Send + Sync + 'static,
    {
        self.ensure_defaults();
        if write(&self.ciphers).insert(id, Arc::new(factory)).is_some() {
            warn!(id, kind = %AlgorithmKind::Cipher, "Overriding registered algorithm");
        }
    }

    pub fn register_key_exchange<F>(&self, id: u16, factory: F)
    where
        F: Fn() -> Box<dyn KeyExchange> + Send + Sync + 'static,
    {
        self.ensure_defaults();
        if write(&self.key_exchanges).insert(id, Arc::new(factory)).is_some() {
            warn!(id, kind = %AlgorithmKind::KeyExchange, "Overriding registered algorithm");
        }
    }

    pub fn register_mac<F>(&self, id: u16, factory: F)
    where
        F: Fn() -> Box<dyn Mac> + Send + Sync + 'static,
    {
        self.ensure_defaults();
        if write(&self.macs).insert(id, Arc::new(factory)).is_some() {
            warn!(id, kind = %AlgorithmKind::Mac, "Overriding registered algorithm");
        }
    }

    // ========================================================================
    // Instantiation
    // ========================================================================

    pub fn create_cipher(&self, id: u16) -> Result<Box<dyn Cipher>> {
        self.ensure_defaults();
        // clone the factory out so the lock is not held while it runs
        let factory = read(&self.ciphers).get(&id).cloned();
        factory
            .map(|create| create())
            .ok_or(LinkError::UnknownAlgorithm { kind: AlgorithmKind::Cipher, id })
    }

    pub fn create_key_exchange(&self, id: u16) -> Result<Box<dyn KeyExchange>> {
        self.ensure_defaults();
        let factory = read(&self.key_exchanges).get(&id).cloned();
        factory
            .map(|create| create())
            .ok_or(LinkError::UnknownAlgorithm { kind: AlgorithmKind::KeyExchange, id })
    }

    pub fn create_mac(&self, id: u16) -> Result<Box<dyn Mac>> {
        self.ensure_defaults();
        let factory = read(&self.macs).get(&id).cloned();
        factory
            .map(|create| create())
            .ok_or(LinkError::UnknownAlgorithm { kind: AlgorithmKind::Mac, id })
    }

    /// Unkeyed suite with a fresh ephemeral key pair.
    pub fn create_suite(&self, id: CipherSuiteIdentifier) -> Result<CipherSuite> {
        let cipher = self.create_cipher(id.cipher())?;
        let key_exchange = self.create_key_exchange(id.key_exchange())?;
        let mac = self.create_mac(id.mac())?;
        Ok(CipherSuite::from_parts(id, cipher, key_exchange, mac))
    }

    /// True if every component of `id` is registered.
    pub fn supports(&self, id: CipherSuiteIdentifier) -> bool {
        self.ensure_defaults();
        read(&self.ciphers).contains_key(&id.cipher())
            && read(&self.key_exchanges).contains_key(&id.key_exchange())
            && read(&self.macs).contains_key(&id.mac())
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ciphers: Vec<u16> = read(&self.ciphers).keys().copied().collect();
        let mut key_exchanges: Vec<u16> = read(&self.key_exchanges).keys().copied().collect();
        let mut macs: Vec<u16> = read(&self.macs).keys().copied().collect();
        ciphers.sort_unstable();
        key_exchanges.sort_unstable();
        macs.sort_unstable();
        f.debug_struct("AlgorithmRegistry")
            .field("ciphers", &ciphers)
            .field("key_exchanges", &key_exchanges)
            .field("macs", &macs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_algorithms_are_registered() {
        let registry = AlgorithmRegistry::new();
        for id in CipherSuiteIdentifier::default_suites() {
            assert!(registry.supports(id));
            assert!(registry.create_suite(id).is_ok());
        }
        assert_eq!(registry.create_cipher(0).unwrap().human_name(), "Identity(no encryption)");
        assert_eq!(registry.create_cipher(1).unwrap().human_name(), "AES-CBC");
    }

    #[test]
    fn test_unknown_id_fails() {
        let registry = AlgorithmRegistry::new();
        let err = registry.create_cipher(0x7777).err().unwrap();
        assert!(matches!(
            err,
            LinkError::UnknownAlgorithm { kind: AlgorithmKind::Cipher, id: 0x7777 }
        ));

        let err = registry
            .create_suite(CipherSuiteIdentifier::new(2, 1, 42))
            .err()
            .unwrap();
        assert!(matches!(err, LinkError::UnknownAlgorithm { kind: AlgorithmKind::Mac, id: 42 }));
        assert!(!registry.supports(CipherSuiteIdentifier::new(2, 1, 42)));
    }

    #[test]
    fn test_instances_are_independent() {
        let registry = AlgorithmRegistry::new();
        let a = registry.create_key_exchange(1).unwrap();
        let b = registry.create_key_exchange(1).unwrap();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_register_overrides_existing() {
        let registry = AlgorithmRegistry::new();
        // map the AES-GCM id onto ChaCha to observe the override
        registry.register_cipher(AesGcmCipher::IDENTIFIER, || Box::new(ChaChaCipher::default()));
        let cipher = registry.create_cipher(AesGcmCipher::IDENTIFIER).unwrap();
        assert_eq!(cipher.human_name(), "ChaCha20-Poly1305");

        // other defaults survive the override
        assert!(registry.create_mac(HmacSha256Mac::IDENTIFIER).is_ok());
    }

    #[test]
    fn test_register_new_id() {
        let registry = AlgorithmRegistry::new();
        registry.register_mac(0x0100, || Box::new(IdentityMac));
        assert!(registry.supports(CipherSuiteIdentifier::new(0, 1, 0x0100)));
    }
}
