// Хранилище доверия к certificate authority peer-ов
//
// Один trust store разделяется всеми link-ами процесса. Реализация должна
// выполнять read-modify-write (`remember`, `set_trusted`) под одной блокировкой.

pub mod memory;
pub mod models;

pub use memory::MemoryTrustStore;
pub use models::TrustEntry;

/// Ключ: base64(SHA-256(ca_public_key)), см. [`crate::crypto::keys::trust_hash`]
pub trait TrustStore: Send + Sync {
    fn lookup_by_hash(&self, hash: &str) -> Option<Vec<u8>>;

    fn is_trusted(&self, hash: &str) -> bool;

    /// Добавить CA как недоверенный. `false`, если hash уже известен
    /// (существующая запись не меняется).
    fn remember(&self, name: &str, hash: &str, public_key: &[u8]) -> bool;

    /// Изменить доверие к известному CA. `false`, если hash неизвестен.
    fn set_trusted(&self, hash: &str, trusted: bool) -> bool;
}
