use thiserror::Error;

/// Вид алгоритма в реестре (для сообщений об ошибках и логов)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmKind {
    Cipher,
    KeyExchange,
    Mac,
}

impl std::fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlgorithmKind::Cipher => write!(f, "cipher"),
            AlgorithmKind::KeyExchange => write!(f, "key exchange"),
            AlgorithmKind::Mac => write!(f, "MAC"),
        }
    }
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Unknown {kind} id {id}/0x{id:02X}")]
    UnknownAlgorithm { kind: AlgorithmKind, id: u16 },
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
    #[error("Missing message field: {0}")]
    MissingField(String),
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("Encryption failed: {0}")]
    Encryption(String),
    #[error("Decryption failed: {0}")]
    Decryption(String),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Signature error: {0}")]
    Signature(String),
    #[error("Key exchange failed: {0}")]
    KeyExchange(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("No precomputed keys available: {0}")]
    KeysUnavailable(String),
    #[error("Link is closed")]
    LinkClosed,
    #[error("Invalid link state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, LinkError>;

// aes-gcm и chacha20poly1305 используют один и тот же aead::Error
impl From<aes_gcm::Error> for LinkError {
    fn from(err: aes_gcm::Error) -> Self {
        LinkError::Decryption(err.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for LinkError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        LinkError::Signature(err.to_string())
    }
}

impl From<hmac::digest::InvalidLength> for LinkError {
    fn from(err: hmac::digest::InvalidLength) -> Self {
        LinkError::InvalidKey(err.to_string())
    }
}

impl From<base64::DecodeError> for LinkError {
    fn from(err: base64::DecodeError) -> Self {
        LinkError::InvalidKey(format!("Base64 decode failed: {}", err))
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Transport(err.to_string())
    }
}
