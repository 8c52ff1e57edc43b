// Конкретные реализации алгоритмов для реестра
//
// - Ciphers: Identity (0), AES-CBC (1), AES-GCM (2), ChaCha20-Poly1305 (3)
// - Key exchange: ECDH-X25519 (1)
// - MACs: identity (0), HMAC-SHA256 (1)

use crate::crypto::provider::{Cipher, KeyExchange, Mac};
use crate::error::{LinkError, Result};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::Aes128Gcm;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hmac::{Hmac, Mac as HmacMac};
use rand::rngs::OsRng;
use rand_core::RngCore;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};
use zeroize::Zeroizing;

/// Длина nonce для AES-GCM и ChaCha20-Poly1305 (в байтах)
pub const AEAD_NONCE_LENGTH: usize = 12;

/// Длина IV для AES-CBC (один блок AES)
pub const CBC_IV_LENGTH: usize = 16;

type HmacSha256 = Hmac<Sha256>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

fn random_nonce() -> [u8; AEAD_NONCE_LENGTH] {
    let mut nonce = [0u8; AEAD_NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

// ============================================================================
// Ciphers
// ============================================================================

/// Заглушка без шифрования. Используется во время handshake.
#[derive(Debug, Default)]
pub struct IdentityCipher;

impl IdentityCipher {
    pub const IDENTIFIER: u16 = 0;
}

impl Cipher for IdentityCipher {
    fn identifier(&self) -> u16 {
        Self::IDENTIFIER
    }

    fn human_name(&self) -> &'static str {
        "Identity(no encryption)"
    }

    fn key_length(&self) -> usize {
        0
    }

    fn initialize(&mut self, _key: &[u8]) -> Result<()> {
        Ok(())
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}

/// AES-128-CBC с PKCS7. Формат: IV (16) || ciphertext
///
/// Целостность не обеспечивает: используется в паре с HMAC (encrypt-then-MAC).
#[derive(Default)]
pub struct AesCbcCipher {
    key: Option<Zeroizing<[u8; 16]>>,
}

impl AesCbcCipher {
    pub const IDENTIFIER: u16 = 1;

    fn key(&self) -> Result<&[u8; 16]> {
        self.key
            .as_deref()
            .ok_or_else(|| LinkError::InvalidState("AES-CBC cipher is not keyed".to_string()))
    }
}

impl Cipher for AesCbcCipher {
    fn identifier(&self) -> u16 {
        Self::IDENTIFIER
    }

    fn human_name(&self) -> &'static str {
        "AES-CBC"
    }

    fn key_length(&self) -> usize {
        16
    }

    fn initialize(&mut self, key: &[u8]) -> Result<()> {
        let key: [u8; 16] = key
            .try_into()
            .map_err(|_| LinkError::InvalidKey(format!("AES-CBC key must be 16 bytes, got {}", key.len())))?;
        self.key = Some(Zeroizing::new(key));
        Ok(())
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = self.key()?;
        let mut iv = [0u8; CBC_IV_LENGTH];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = Aes128CbcEnc::new_from_slices(key, &iv)
            .map_err(|e| LinkError::Encryption(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut out = Vec::with_capacity(iv.len() + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let key = self.key()?;
        if data.len() < CBC_IV_LENGTH {
            return Err(LinkError::Decryption("frame shorter than IV".to_string()));
        }

        let (iv, ciphertext) = data.split_at(CBC_IV_LENGTH);
        Aes128CbcDec::new_from_slices(key, iv)
            .map_err(|e| LinkError::Decryption(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| LinkError::Decryption("invalid AES-CBC padding".to_string()))
    }
}

/// AES-128-GCM. Формат: nonce (12) || ciphertext || tag (16)
#[derive(Default)]
pub struct AesGcmCipher {
    cipher: Option<Aes128Gcm>,
}

impl AesGcmCipher {
    pub const IDENTIFIER: u16 = 2;
}

impl Cipher for AesGcmCipher {
    fn identifier(&self) -> u16 {
        Self::IDENTIFIER
    }

    fn human_name(&self) -> &'static str {
        "AES-GCM"
    }

    fn key_length(&self) -> usize {
        16
    }

    fn initialize(&mut self, key: &[u8]) -> Result<()> {
        let cipher = Aes128Gcm::new_from_slice(key)
            .map_err(|_| LinkError::InvalidKey(format!("AES-GCM key must be 16 bytes, got {}", key.len())))?;
        self.cipher = Some(cipher);
        Ok(())
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| LinkError::InvalidState("AES-GCM cipher is not keyed".to_string()))?;

        let nonce = random_nonce();
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| LinkError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(nonce.len() + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| LinkError::InvalidState("AES-GCM cipher is not keyed".to_string()))?;

        if data.len() < AEAD_NONCE_LENGTH {
            return Err(LinkError::Decryption("frame shorter than nonce".to_string()));
        }

        let (nonce, ciphertext) = data.split_at(AEAD_NONCE_LENGTH);
        Ok(cipher.decrypt(Nonce::from_slice(nonce), ciphertext)?)
    }
}

/// ChaCha20-Poly1305. Формат: nonce (12) || ciphertext || tag (16)
#[derive(Default)]
pub struct ChaChaCipher {
    cipher: Option<ChaCha20Poly1305>,
}

impl ChaChaCipher {
    pub const IDENTIFIER: u16 = 3;
}

impl Cipher for ChaChaCipher {
    fn identifier(&self) -> u16 {
        Self::IDENTIFIER
    }

    fn human_name(&self) -> &'static str {
        "ChaCha20-Poly1305"
    }

    fn key_length(&self) -> usize {
        32
    }

    fn initialize(&mut self, key: &[u8]) -> Result<()> {
        let cipher = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| LinkError::InvalidKey(format!("ChaCha20 key must be 32 bytes, got {}", key.len())))?;
        self.cipher = Some(cipher);
        Ok(())
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| LinkError::InvalidState("ChaCha20 cipher is not keyed".to_string()))?;

        let nonce = random_nonce();
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| LinkError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(nonce.len() + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| LinkError::InvalidState("ChaCha20 cipher is not keyed".to_string()))?;

        if data.len() < AEAD_NONCE_LENGTH {
            return Err(LinkError::Decryption("frame shorter than nonce".to_string()));
        }

        let (nonce, ciphertext) = data.split_at(AEAD_NONCE_LENGTH);
        Ok(cipher.decrypt(Nonce::from_slice(nonce), ciphertext)?)
    }
}

// ============================================================================
// Key exchange
// ============================================================================

/// Ephemeral ECDH на Curve25519. Ключевая пара генерируется при создании.
pub struct X25519KeyExchange {
    secret: Option<EphemeralSecret>,
    public: X25519PublicKey,
}

impl X25519KeyExchange {
    pub const IDENTIFIER: u16 = 1;

    pub fn new() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self {
            secret: Some(secret),
            public,
        }
    }
}

impl Default for X25519KeyExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyExchange for X25519KeyExchange {
    fn identifier(&self) -> u16 {
        Self::IDENTIFIER
    }

    fn human_name(&self) -> &'static str {
        "ECDH-X25519"
    }

    fn public_key(&self) -> Vec<u8> {
        self.public.to_bytes().to_vec()
    }

    fn finalize(&mut self, peer_public: &[u8]) -> Result<Vec<u8>> {
        let peer_bytes: [u8; 32] = peer_public.try_into().map_err(|_| {
            LinkError::KeyExchange(format!(
                "X25519 public value must be 32 bytes, got {}",
                peer_public.len()
            ))
        })?;

        // EphemeralSecret потребляется в DH, повторный вызов невозможен
        let secret = self
            .secret
            .take()
            .ok_or_else(|| LinkError::KeyExchange("key exchange already finalized".to_string()))?;

        let shared = secret.diffie_hellman(&X25519PublicKey::from(peer_bytes));
        if !shared.was_contributory() {
            return Err(LinkError::KeyExchange("peer sent a low-order point".to_string()));
        }

        Ok(shared.as_bytes().to_vec())
    }
}

// ============================================================================
// MACs
// ============================================================================

/// MAC-заглушка: пустой тег. Используется во время handshake и в suites с AEAD.
#[derive(Debug, Default)]
pub struct IdentityMac;

impl IdentityMac {
    pub const IDENTIFIER: u16 = 0;
}

impl Mac for IdentityMac {
    fn identifier(&self) -> u16 {
        Self::IDENTIFIER
    }

    fn human_name(&self) -> &'static str {
        "identity MAC"
    }

    fn key_length(&self) -> usize {
        0
    }

    fn output_length(&self) -> usize {
        0
    }

    fn initialize(&mut self, _key: &[u8]) -> Result<()> {
        Ok(())
    }

    fn calculate(&self, _message: &[u8]) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn verify(&self, _message: &[u8], tag: &[u8]) -> bool {
        tag.is_empty()
    }
}

/// HMAC-SHA256 с 64-байтовым ключом
#[derive(Default)]
pub struct HmacSha256Mac {
    key: Option<Zeroizing<Vec<u8>>>,
}

impl HmacSha256Mac {
    pub const IDENTIFIER: u16 = 1;

    fn keyed(&self) -> Result<HmacSha256> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| LinkError::InvalidState("HMAC is not keyed".to_string()))?;
        Ok(<HmacSha256 as HmacMac>::new_from_slice(key)?)
    }
}

impl Mac for HmacSha256Mac {
    fn identifier(&self) -> u16 {
        Self::IDENTIFIER
    }

    fn human_name(&self) -> &'static str {
        "HMAC-SHA256"
    }

    fn key_length(&self) -> usize {
        64
    }

    fn output_length(&self) -> usize {
        32
    }

    fn initialize(&mut self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_length() {
            return Err(LinkError::InvalidKey(format!(
                "HMAC-SHA256 key must be {} bytes, got {}",
                self.key_length(),
                key.len()
            )));
        }
        self.key = Some(Zeroizing::new(key.to_vec()));
        Ok(())
    }

    fn calculate(&self, message: &[u8]) -> Result<Vec<u8>> {
        let mut mac = self.keyed()?;
        mac.update(message);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn verify(&self, message: &[u8], tag: &[u8]) -> bool {
        match self.keyed() {
            Ok(mut mac) => {
                mac.update(message);
                mac.verify_slice(tag).is_ok()
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aes_gcm_roundtrip_and_nonce_prefix() {
        let mut cipher = AesGcmCipher::default();
        cipher.initialize(&[7u8; 16]).unwrap();

        let ciphertext = cipher.encrypt(b"hello bifrost").unwrap();
        // nonce + plaintext + 16-byte tag
        assert_eq!(ciphertext.len(), AEAD_NONCE_LENGTH + 13 + 16);
        assert_eq!(cipher.decrypt(&ciphertext).unwrap(), b"hello bifrost");
    }

    #[test]
    fn test_aes_cbc_roundtrip_and_iv_prefix() {
        let mut cipher = AesCbcCipher::default();
        cipher.initialize(&[9u8; 16]).unwrap();

        // 13 bytes pad to one block, 16 bytes pad to two
        let ciphertext = cipher.encrypt(b"hello bifrost").unwrap();
        assert_eq!(ciphertext.len(), CBC_IV_LENGTH + 16);
        assert_eq!(cipher.decrypt(&ciphertext).unwrap(), b"hello bifrost");

        let ciphertext = cipher.encrypt(&[0u8; 16]).unwrap();
        assert_eq!(ciphertext.len(), CBC_IV_LENGTH + 32);

        let empty = cipher.encrypt(b"").unwrap();
        assert_eq!(empty.len(), CBC_IV_LENGTH + 16);
        assert!(cipher.decrypt(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_aes_cbc_rejects_bad_input() {
        let mut cipher = AesCbcCipher::default();
        assert!(matches!(cipher.encrypt(b"x"), Err(LinkError::InvalidState(_))));
        assert!(cipher.initialize(&[0u8; 32]).is_err());

        cipher.initialize(&[9u8; 16]).unwrap();
        assert!(cipher.decrypt(&[0u8; 8]).is_err());
        // not a whole number of blocks
        assert!(cipher.decrypt(&[0u8; CBC_IV_LENGTH + 5]).is_err());
    }

    #[test]
    fn test_unkeyed_cipher_refuses_to_encrypt() {
        let cipher = ChaChaCipher::default();
        assert!(matches!(cipher.encrypt(b"x"), Err(LinkError::InvalidState(_))));
    }

    #[test]
    fn test_chacha_rejects_wrong_key_length() {
        let mut cipher = ChaChaCipher::default();
        assert!(cipher.initialize(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_x25519_agreement() {
        let mut alice = X25519KeyExchange::new();
        let mut bob = X25519KeyExchange::new();
        let alice_pub = alice.public_key();
        let bob_pub = bob.public_key();

        let s1 = alice.finalize(&bob_pub).unwrap();
        let s2 = bob.finalize(&alice_pub).unwrap();
        assert_eq!(s1, s2);
        assert_eq!(s1.len(), 32);

        // Повторный finalize запрещён
        assert!(alice.finalize(&bob_pub).is_err());
    }

    #[test]
    fn test_hmac_verify() {
        let mut mac = HmacSha256Mac::default();
        mac.initialize(&[1u8; 64]).unwrap();

        let tag = mac.calculate(b"ciphertext").unwrap();
        assert_eq!(tag.len(), 32);
        assert!(mac.verify(b"ciphertext", &tag));
        assert!(!mac.verify(b"ciphertexT", &tag));
        assert!(!mac.verify(b"ciphertext", &tag[..31]));
    }

    #[test]
    fn test_identity_mac_accepts_only_empty_tag() {
        let mac = IdentityMac;
        assert!(mac.verify(b"anything", &[]));
        assert!(!mac.verify(b"anything", &[0]));
    }
}
