//! Криптографические наборы (Cipher Suites)
//!
//! Cipher suite = symmetric cipher + key exchange + MAC, идентифицируется
//! тройкой 16-битных id ([`CipherSuiteIdentifier`]).
//!
//! ## Наборы по умолчанию (в порядке предпочтения)
//!
//! | Cipher | Key exchange | MAC |
//! |---|---|---|
//! | AES-GCM (2) | ECDH-X25519 (1) | identity (0) |
//! | AES-CBC (1) | ECDH-X25519 (1) | HMAC-SHA256 (1) |
//! | ChaCha20-Poly1305 (3) | ECDH-X25519 (1) | HMAC-SHA256 (1) |
//!
//! ## Жизненный цикл
//!
//! ```text
//! AlgorithmRegistry::create_suite(id) ──► CipherSuite (без ключей)
//!        set_shared_salt(salt)
//!        finalize_key_exchange(peer_public) ──► KeyedSuite (encrypt / decrypt)
//! ```
//!
//! Шифрование доступно только у [`KeyedSuite`], поэтому использовать набор
//! до вывода ключей невозможно по построению.

pub mod classic;

use crate::crypto::provider::{Cipher, KeyExchange, Mac};
use crate::error::{LinkError, Result};
use classic::{
    AesCbcCipher, AesGcmCipher, ChaChaCipher, HmacSha256Mac, IdentityCipher, IdentityMac, X25519KeyExchange,
};
use hmac::{Hmac, Mac as _};
use sha2::Sha512;
use tracing::warn;
use zeroize::Zeroizing;

type HmacSha512 = Hmac<Sha512>;

/// Шаблон HKDF контекста. Связывает ключи с именами выбранных алгоритмов.
const HKDF_CONTEXT_TEMPLATE: &str = "cipher-{cipher}\napplication-bifrost\nkey-exchange-{kex}\n";

// ============================================================================
// CipherSuiteIdentifier
// ============================================================================

/// Идентификатор набора: `u16_le(cipher) | u16_le(kex) | u16_le(mac)`.
///
/// Хранится прямо в сериализованной форме, поэтому равенство и хеш
/// определены над этими 6 байтами.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherSuiteIdentifier {
    bytes: [u8; CipherSuiteIdentifier::LENGTH],
}

impl CipherSuiteIdentifier {
    /// Длина сериализованного идентификатора
    pub const LENGTH: usize = 6;

    pub fn new(cipher: u16, key_exchange: u16, mac: u16) -> Self {
        let mut bytes = [0u8; Self::LENGTH];
        bytes[0..2].copy_from_slice(&cipher.to_le_bytes());
        bytes[2..4].copy_from_slice(&key_exchange.to_le_bytes());
        bytes[4..6].copy_from_slice(&mac.to_le_bytes());
        Self { bytes }
    }

    /// Разобрать ровно 6 байт
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let bytes: [u8; Self::LENGTH] = data.try_into().map_err(|_| {
            LinkError::MalformedMessage(format!(
                "cipher suite identifier must be {} bytes, got {}",
                Self::LENGTH,
                data.len()
            ))
        })?;
        Ok(Self { bytes })
    }

    pub fn cipher(&self) -> u16 {
        u16::from_le_bytes([self.bytes[0], self.bytes[1]])
    }

    pub fn key_exchange(&self) -> u16 {
        u16::from_le_bytes([self.bytes[2], self.bytes[3]])
    }

    pub fn mac(&self) -> u16 {
        u16::from_le_bytes([self.bytes[4], self.bytes[5]])
    }

    pub fn serialize(&self) -> [u8; Self::LENGTH] {
        self.bytes
    }

    /// Склеить список идентификаторов (поле `allowed_suites`)
    pub fn serialize_list(suites: &[CipherSuiteIdentifier]) -> Vec<u8> {
        suites.iter().flat_map(|s| s.bytes).collect()
    }

    /// Разобрать склеенный список. Неполный хвост отбрасывается.
    pub fn parse_list(data: &[u8]) -> Vec<CipherSuiteIdentifier> {
        let chunks = data.chunks_exact(Self::LENGTH);
        if !chunks.remainder().is_empty() {
            warn!(
                trailing = chunks.remainder().len(),
                "allowed_suites has a truncated trailing identifier, ignoring it"
            );
        }
        chunks
            .map(|chunk| {
                let mut bytes = [0u8; Self::LENGTH];
                bytes.copy_from_slice(chunk);
                Self { bytes }
            })
            .collect()
    }

    /// Встроенный список разрешённых наборов
    pub fn default_suites() -> Vec<CipherSuiteIdentifier> {
        vec![
            Self::new(AesGcmCipher::IDENTIFIER, X25519KeyExchange::IDENTIFIER, IdentityMac::IDENTIFIER),
            Self::new(AesCbcCipher::IDENTIFIER, X25519KeyExchange::IDENTIFIER, HmacSha256Mac::IDENTIFIER),
            Self::new(ChaChaCipher::IDENTIFIER, X25519KeyExchange::IDENTIFIER, HmacSha256Mac::IDENTIFIER),
        ]
    }
}

impl std::fmt::Debug for CipherSuiteIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CipherSuiteIdentifier(cipher={}, kex={}, mac={})",
            self.cipher(),
            self.key_exchange(),
            self.mac()
        )
    }
}

/// Человекочитаемые имена алгоритмов набора
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteNames {
    pub cipher: &'static str,
    pub key_exchange: &'static str,
    pub mac: &'static str,
}

// ============================================================================
// HKDF
// ============================================================================

/// Expand-only HKDF на HMAC-SHA512.
///
/// ```text
/// prk      = HMAC(salt, secret)
/// block[0] = HMAC(prk, context || u32_le(0))
/// block[i] = HMAC(prk, block[i-1] || context || u32_le(i))
/// ```
///
/// Блоки склеиваются и обрезаются до `length`. `length == 0` возвращает
/// пустой вектор без вызова HMAC.
pub fn calculate_hkdf(salt: &[u8], context: &[u8], secret: &[u8], length: usize) -> Result<Vec<u8>> {
    if length == 0 {
        return Ok(Vec::new());
    }

    let mut extract = HmacSha512::new_from_slice(salt)?;
    extract.update(secret);
    let prk = Zeroizing::new(extract.finalize().into_bytes().to_vec());

    let expander = HmacSha512::new_from_slice(&prk)?;

    let mut first = expander.clone();
    first.update(context);
    first.update(&0u32.to_le_bytes());
    let mut block = first.finalize().into_bytes();

    let mut output = Zeroizing::new(Vec::with_capacity(length + block.len()));
    output.extend_from_slice(&block);

    let mut counter: u32 = 1;
    while output.len() < length {
        let mut next = expander.clone();
        next.update(&block);
        next.update(context);
        next.update(&counter.to_le_bytes());
        block = next.finalize().into_bytes();

        output.extend_from_slice(&block);
        counter += 1;
    }

    Ok(output[..length].to_vec())
}

// ============================================================================
// CipherSuite (без ключей)
// ============================================================================

/// Согласованный, но ещё не ключёванный набор.
///
/// Держит ephemeral ключ обмена и shared salt. Единственный путь к
/// шифрованию: [`CipherSuite::finalize_key_exchange`].
pub struct CipherSuite {
    identifier: CipherSuiteIdentifier,
    cipher: Box<dyn Cipher>,
    key_exchange: Box<dyn KeyExchange>,
    mac: Box<dyn Mac>,
    shared_salt: Option<Zeroizing<Vec<u8>>>,
}

impl CipherSuite {
    pub(crate) fn from_parts(
        identifier: CipherSuiteIdentifier,
        cipher: Box<dyn Cipher>,
        key_exchange: Box<dyn KeyExchange>,
        mac: Box<dyn Mac>,
    ) -> Self {
        Self {
            identifier,
            cipher,
            key_exchange,
            mac,
            shared_salt: None,
        }
    }

    pub fn identifier(&self) -> CipherSuiteIdentifier {
        self.identifier
    }

    pub fn names(&self) -> SuiteNames {
        SuiteNames {
            cipher: self.cipher.human_name(),
            key_exchange: self.key_exchange.human_name(),
            mac: self.mac.human_name(),
        }
    }

    /// Наш ephemeral public value
    pub fn key_exchange_public(&self) -> Vec<u8> {
        self.key_exchange.public_key()
    }

    pub fn set_shared_salt(&mut self, salt: &[u8]) {
        self.shared_salt = Some(Zeroizing::new(salt.to_vec()));
    }

    pub fn shared_salt(&self) -> Option<&[u8]> {
        self.shared_salt.as_ref().map(|salt| salt.as_slice())
    }

    /// HKDF контекст: `cipher-{name}\napplication-bifrost\nkey-exchange-{name}\n`
    pub fn context_string(&self) -> String {
        HKDF_CONTEXT_TEMPLATE
            .replace("{cipher}", self.cipher.human_name())
            .replace("{kex}", self.key_exchange.human_name())
    }

    /// HKDF с установленным shared salt и контекстом этого набора
    pub fn calculate_hkdf(&self, secret: &[u8], length: usize) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }

        let salt = self
            .shared_salt
            .as_ref()
            .ok_or_else(|| LinkError::KeyDerivation("shared salt is not installed".to_string()))?;

        calculate_hkdf(salt, self.context_string().as_bytes(), secret, length)
    }

    /// Завершить обмен ключами: получить общий секрет, вывести ключи шифра и
    /// MAC через HKDF и вернуть готовый [`KeyedSuite`] вместе с сырым секретом
    /// (только для диагностики, никогда не передаётся).
    pub fn finalize_key_exchange(mut self, peer_public: &[u8]) -> Result<(KeyedSuite, Zeroizing<Vec<u8>>)> {
        let shared = Zeroizing::new(self.key_exchange.finalize(peer_public)?);

        let cipher_key = Zeroizing::new(self.calculate_hkdf(&shared, self.cipher.key_length())?);
        let mac_key = Zeroizing::new(self.calculate_hkdf(&shared, self.mac.key_length())?);

        self.cipher.initialize(&cipher_key)?;
        self.mac.initialize(&mac_key)?;

        let keyed = KeyedSuite {
            identifier: Some(self.identifier),
            names: self.names(),
            cipher: self.cipher,
            mac: self.mac,
        };

        Ok((keyed, shared))
    }
}

impl std::fmt::Debug for CipherSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherSuite")
            .field("identifier", &self.identifier)
            .field("names", &self.names())
            .field("has_salt", &self.shared_salt.is_some())
            .finish()
    }
}

// ============================================================================
// KeyedSuite
// ============================================================================

/// Набор с установленными ключами: encrypt-then-MAC / verify-then-decrypt.
pub struct KeyedSuite {
    identifier: Option<CipherSuiteIdentifier>,
    names: SuiteNames,
    cipher: Box<dyn Cipher>,
    mac: Box<dyn Mac>,
}

impl KeyedSuite {
    /// Identity cipher + identity MAC. Кадры handshake идут через него.
    pub fn passthrough() -> Self {
        Self {
            identifier: None,
            names: SuiteNames {
                cipher: IdentityCipher.human_name(),
                key_exchange: "none",
                mac: IdentityMac.human_name(),
            },
            cipher: Box::new(IdentityCipher),
            mac: Box::new(IdentityMac),
        }
    }

    /// `None` для passthrough
    pub fn identifier(&self) -> Option<CipherSuiteIdentifier> {
        self.identifier
    }

    pub fn names(&self) -> &SuiteNames {
        &self.names
    }

    pub fn mac_output_length(&self) -> usize {
        self.mac.output_length()
    }

    /// Encrypt-then-MAC: `ciphertext || MAC(ciphertext)`
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut frame = self.cipher.encrypt(plaintext)?;
        let tag = self.mac.calculate(&frame)?;
        frame.extend_from_slice(&tag);
        Ok(frame)
    }

    /// Verify-then-decrypt. Пустой результат = испорченный кадр, его нужно
    /// отбросить (валидный plaintext link-а никогда не бывает пустым).
    pub fn decrypt(&self, data: &[u8]) -> Vec<u8> {
        let tag_length = self.mac.output_length();
        if data.len() < tag_length {
            warn!(len = data.len(), tag_length, "Frame shorter than MAC tag, dropping");
            return Vec::new();
        }

        let (ciphertext, tag) = data.split_at(data.len() - tag_length);
        if !self.mac.verify(ciphertext, tag) {
            warn!(len = data.len(), mac = self.names.mac, "Invalid MAC, dropping frame");
            return Vec::new(); // corrupt MAC
        }

        match self.cipher.decrypt(ciphertext) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(len = data.len(), cipher = self.names.cipher, error = %e, "Decryption failed, dropping frame");
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for KeyedSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedSuite")
            .field("identifier", &self.identifier)
            .field("names", &self.names)
            .finish()
    }
}
