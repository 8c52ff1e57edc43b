// Статические ключи и certificate authority
//
// Статический ключ link-а и ключ CA: Ed25519. Публичные ключи передаются
// в PEM-подобном текстовом виде (поля `rsa_public_key`, `ca_public_key`),
// CA подписывает именно этот текст статического ключа.

use crate::error::{LinkError, Result};
use crate::link::queue::BoundedQueue;
use crate::utils::b64;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const PEM_HEADER: &str = "-----BEGIN BIFROST PUBLIC KEY-----";
const PEM_FOOTER: &str = "-----END BIFROST PUBLIC KEY-----";

/// Ключ в trust store: base64(SHA-256(байты поля `ca_public_key`))
pub fn trust_hash(ca_public_key: &[u8]) -> String {
    b64::encode(&Sha256::digest(ca_public_key))
}

// ============================================================================
// PublicIdentity
// ============================================================================

/// Публичный Ed25519 ключ (статический ключ peer-а или CA)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicIdentity {
    key: VerifyingKey,
}

impl PublicIdentity {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 32] = bytes.try_into().map_err(|_| {
            LinkError::InvalidKey(format!("Ed25519 public key must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self {
            key: VerifyingKey::from_bytes(&raw)?,
        })
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.key.as_bytes()
    }

    /// PEM-подобное представление, в котором ключ идёт по проводу
    pub fn to_pem(&self) -> String {
        format!("{}\n{}\n{}\n", PEM_HEADER, b64::encode(self.key.as_bytes()), PEM_FOOTER)
    }

    pub fn from_pem(text: &str) -> Result<Self> {
        let body = text
            .trim()
            .strip_prefix(PEM_HEADER)
            .and_then(|rest| rest.strip_suffix(PEM_FOOTER))
            .ok_or_else(|| LinkError::InvalidKey("missing PEM armor".to_string()))?;
        Self::from_bytes(&b64::decode(body)?)
    }

    /// Разобрать поле сообщения (UTF-8 PEM)
    pub fn from_pem_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| LinkError::InvalidKey("public key is not UTF-8".to_string()))?;
        Self::from_pem(text)
    }

    /// Строгая проверка подписи. Любая ошибка формата = `false`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match Signature::from_slice(signature) {
            Ok(signature) => self.key.verify_strict(message, &signature).is_ok(),
            Err(_) => false,
        }
    }

    pub fn trust_hash(&self) -> String {
        trust_hash(self.to_pem().as_bytes())
    }
}

impl std::fmt::Debug for PublicIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicIdentity({})", b64::encode(self.key.as_bytes()))
    }
}

// ============================================================================
// CertificateAuthority
// ============================================================================

/// Локальный certificate authority: выпускает статические ключи link-ов
#[derive(Clone)]
pub struct CertificateAuthority {
    signing_key: SigningKey,
}

impl CertificateAuthority {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut rand::rngs::OsRng),
        }
    }

    /// Восстановить из 32-байтового секрета
    pub fn from_bytes(secret: &[u8]) -> Result<Self> {
        let raw: [u8; 32] = secret.try_into().map_err(|_| {
            LinkError::InvalidKey(format!("Ed25519 secret key must be 32 bytes, got {}", secret.len()))
        })?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&raw),
        })
    }

    pub fn to_bytes(&self) -> zeroize::Zeroizing<[u8; 32]> {
        zeroize::Zeroizing::new(self.signing_key.to_bytes())
    }

    pub fn public_key(&self) -> PublicIdentity {
        PublicIdentity {
            key: self.signing_key.verifying_key(),
        }
    }

    /// Подпись CA над PEM-текстом статического ключа (поле `rsa_signature`)
    pub fn certify(&self, static_key: &PublicIdentity) -> Vec<u8> {
        self.signing_key.sign(static_key.to_pem().as_bytes()).to_bytes().to_vec()
    }

    /// Сгенерировать новый статический ключ и подписать его
    pub fn issue(&self) -> Credentials {
        let static_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let public = PublicIdentity {
            key: static_key.verifying_key(),
        };
        let signature = self.certify(&public);
        Credentials {
            authority: self.public_key(),
            static_key,
            signature,
        }
    }
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Всё, что link заявляет о себе в AuthRequest / AuthResponse
#[derive(Clone)]
pub struct Credentials {
    authority: PublicIdentity,
    static_key: SigningKey,
    signature: Vec<u8>,
}

impl Credentials {
    /// Собрать из ключей, выпущенных вне процесса
    pub fn new(authority: PublicIdentity, static_secret: &[u8], signature: Vec<u8>) -> Result<Self> {
        let raw: [u8; 32] = static_secret.try_into().map_err(|_| {
            LinkError::InvalidKey(format!(
                "Ed25519 secret key must be 32 bytes, got {}",
                static_secret.len()
            ))
        })?;
        Ok(Self {
            authority,
            static_key: SigningKey::from_bytes(&raw),
            signature,
        })
    }

    pub fn authority(&self) -> &PublicIdentity {
        &self.authority
    }

    pub fn public_key(&self) -> PublicIdentity {
        PublicIdentity {
            key: self.static_key.verifying_key(),
        }
    }

    /// Подпись CA над нашим статическим ключом
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Подписать статическим ключом
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.static_key.sign(data).to_bytes().to_vec()
    }

    /// Подпись CA действительно покрывает наш статический ключ
    pub fn is_certified(&self) -> bool {
        self.authority
            .verify(self.public_key().to_pem().as_bytes(), &self.signature)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("authority", &self.authority)
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Key precomputation
// ============================================================================

/// Источник предвычисленных ключей для responder-а
pub trait KeyProvider: Send + Sync {
    /// Следующий готовый набор ключей. По таймауту `KeysUnavailable`.
    fn get_next_available_keys(&self, timeout: Duration) -> Result<Credentials>;
}

/// Пул заранее выпущенных ключей на [`BoundedQueue`]
pub struct KeyPool {
    authority: CertificateAuthority,
    queue: BoundedQueue<Credentials>,
}

impl KeyPool {
    pub fn new(authority: CertificateAuthority, capacity: usize) -> Self {
        Self {
            authority,
            queue: BoundedQueue::new(capacity),
        }
    }

    /// Выпустить до `count` ключей, не блокируясь на полной очереди.
    /// Возвращает число добавленных.
    pub fn precompute(&self, count: usize) -> usize {
        let mut added = 0;
        for _ in 0..count {
            if self.queue.try_enqueue(self.authority.issue()).is_err() {
                break;
            }
            added += 1;
        }
        debug!(added, available = self.queue.len(), "Precomputed link keys");
        added
    }

    pub fn available(&self) -> usize {
        self.queue.len()
    }

    pub fn authority(&self) -> PublicIdentity {
        self.authority.public_key()
    }
}

impl KeyProvider for KeyPool {
    fn get_next_available_keys(&self, timeout: Duration) -> Result<Credentials> {
        self.queue.dequeue_timeout(timeout).ok_or_else(|| {
            LinkError::KeysUnavailable(format!("no keys after {} ms", timeout.as_millis()))
        })
    }
}

/// Откуда link берёт свои статические ключи
#[derive(Clone)]
pub enum CredentialSource {
    Static(Credentials),
    Precomputed(Arc<dyn KeyProvider>),
}

impl CredentialSource {
    pub fn acquire(&self, timeout: Duration) -> Result<Credentials> {
        match self {
            CredentialSource::Static(credentials) => Ok(credentials.clone()),
            CredentialSource::Precomputed(provider) => provider.get_next_available_keys(timeout),
        }
    }
}

impl From<Credentials> for CredentialSource {
    fn from(credentials: Credentials) -> Self {
        CredentialSource::Static(credentials)
    }
}

impl std::fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialSource::Static(credentials) => f.debug_tuple("Static").field(credentials).finish(),
            CredentialSource::Precomputed(_) => f.write_str("Precomputed(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pem_roundtrip() {
        let ca = CertificateAuthority::generate();
        let pem = ca.public_key().to_pem();
        assert!(pem.starts_with("-----BEGIN BIFROST PUBLIC KEY-----\n"));
        assert!(pem.ends_with("-----END BIFROST PUBLIC KEY-----\n"));
        assert_eq!(PublicIdentity::from_pem(&pem).unwrap(), ca.public_key());
        assert_eq!(PublicIdentity::from_pem_bytes(pem.as_bytes()).unwrap(), ca.public_key());
    }

    #[test]
    fn test_pem_rejects_garbage() {
        assert!(PublicIdentity::from_pem("hello").is_err());
        assert!(PublicIdentity::from_pem_bytes(&[0xFF, 0xFE]).is_err());
        let short = format!("{}\n{}\n{}\n", PEM_HEADER, b64::encode(&[1, 2, 3]), PEM_FOOTER);
        assert!(matches!(PublicIdentity::from_pem(&short), Err(LinkError::InvalidKey(_))));
    }

    #[test]
    fn test_issued_credentials_are_certified() {
        let ca = CertificateAuthority::generate();
        let credentials = ca.issue();
        assert!(credentials.is_certified());
        assert_eq!(credentials.authority(), &ca.public_key());

        let other = CertificateAuthority::generate();
        let pem = credentials.public_key().to_pem();
        assert!(!other.public_key().verify(pem.as_bytes(), credentials.signature()));
    }

    #[test]
    fn test_static_key_signatures() {
        let credentials = CertificateAuthority::generate().issue();
        let signature = credentials.sign(b"ephemeral || timestamp");
        assert!(credentials.public_key().verify(b"ephemeral || timestamp", &signature));
        assert!(!credentials.public_key().verify(b"something else", &signature));
        assert!(!credentials.public_key().verify(b"ephemeral || timestamp", &signature[..10]));
    }

    #[test]
    fn test_authority_restore_from_bytes() {
        let ca = CertificateAuthority::generate();
        let restored = CertificateAuthority::from_bytes(&ca.to_bytes()[..]).unwrap();
        assert_eq!(restored.public_key(), ca.public_key());
        assert!(CertificateAuthority::from_bytes(&[0u8; 5]).is_err());
    }

    #[test]
    fn test_trust_hash_is_stable() {
        let ca = CertificateAuthority::generate();
        let pem = ca.public_key().to_pem();
        assert_eq!(ca.public_key().trust_hash(), trust_hash(pem.as_bytes()));
        assert_ne!(trust_hash(b"a"), trust_hash(b"b"));
    }

    #[test]
    fn test_key_pool_times_out_when_empty() {
        let pool = KeyPool::new(CertificateAuthority::generate(), 4);
        assert_eq!(pool.precompute(10), 4);
        for _ in 0..4 {
            assert!(pool.get_next_available_keys(Duration::from_millis(10)).unwrap().is_certified());
        }
        assert!(matches!(
            pool.get_next_available_keys(Duration::from_millis(20)),
            Err(LinkError::KeysUnavailable(_))
        ));
    }
}
