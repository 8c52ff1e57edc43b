// Модели данных для хранилища

use serde::{Deserialize, Serialize};

/// Известный certificate authority peer-а
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustEntry {
    /// Имя, заявленное peer-ом в `cert_name`
    pub name: String,
    /// base64(SHA-256(public_key))
    pub hash: String,
    /// Байты поля `ca_public_key` как они пришли по проводу
    pub public_key: Vec<u8>,
    pub trusted: bool,
    /// Unix timestamp в миллисекундах
    pub added_at: i64,
}
