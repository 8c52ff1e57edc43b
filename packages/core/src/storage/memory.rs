// In-memory trust store для тестов и процессов без персистентности

use crate::storage::models::TrustEntry;
use crate::storage::TrustStore;
use crate::utils::sync::lock;
use crate::utils::time;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

/// In-memory хранилище доверенных CA (hash → entry)
pub struct MemoryTrustStore {
    entries: Mutex<HashMap<String, TrustEntry>>,
}

impl MemoryTrustStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Восстановить из ранее сохранённых записей
    pub fn from_entries(entries: impl IntoIterator<Item = TrustEntry>) -> Self {
        let map = entries
            .into_iter()
            .map(|entry| (entry.hash.clone(), entry))
            .collect();
        Self {
            entries: Mutex::new(map),
        }
    }

    /// Снимок всех записей, отсортированный по времени добавления
    pub fn entries(&self) -> Vec<TrustEntry> {
        let mut entries: Vec<TrustEntry> = lock(&self.entries).values().cloned().collect();
        entries.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.hash.cmp(&b.hash)));
        entries
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

impl Default for MemoryTrustStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustStore for MemoryTrustStore {
    fn lookup_by_hash(&self, hash: &str) -> Option<Vec<u8>> {
        lock(&self.entries).get(hash).map(|entry| entry.public_key.clone())
    }

    fn is_trusted(&self, hash: &str) -> bool {
        lock(&self.entries).get(hash).map_or(false, |entry| entry.trusted)
    }

    fn remember(&self, name: &str, hash: &str, public_key: &[u8]) -> bool {
        let mut entries = lock(&self.entries);
        if entries.contains_key(hash) {
            warn!(hash, name, "Certificate authority is already known");
            return false;
        }

        entries.insert(
            hash.to_string(),
            TrustEntry {
                name: name.to_string(),
                hash: hash.to_string(),
                public_key: public_key.to_vec(),
                trusted: false,
                added_at: time::now_millis(),
            },
        );
        debug!(hash, name, "Remembered certificate authority (untrusted)");
        true
    }

    fn set_trusted(&self, hash: &str, trusted: bool) -> bool {
        match lock(&self.entries).get_mut(hash) {
            Some(entry) => {
                entry.trusted = trusted;
                debug!(hash, trusted, "Updated certificate authority trust");
                true
            }
            None => {
                warn!(hash, "Cannot set trust on unknown certificate authority");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remember_defaults_to_untrusted() {
        let store = MemoryTrustStore::new();
        assert!(store.remember("node-a", "hash-a", b"key-a"));
        assert_eq!(store.lookup_by_hash("hash-a"), Some(b"key-a".to_vec()));
        assert!(!store.is_trusted("hash-a"));
    }

    #[test]
    fn test_remember_keeps_first_entry() {
        let store = MemoryTrustStore::new();
        assert!(store.remember("node-a", "hash-a", b"key-a"));
        store.set_trusted("hash-a", true);

        assert!(!store.remember("impostor", "hash-a", b"other"));
        assert_eq!(store.lookup_by_hash("hash-a"), Some(b"key-a".to_vec()));
        assert!(store.is_trusted("hash-a"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_set_trusted_only_changes_existing() {
        let store = MemoryTrustStore::new();
        assert!(!store.set_trusted("missing", true));
        assert!(store.is_empty());
        assert!(!store.is_trusted("missing"));

        store.remember("node-b", "hash-b", b"key-b");
        assert!(store.set_trusted("hash-b", true));
        assert!(store.is_trusted("hash-b"));
        assert!(store.set_trusted("hash-b", false));
        assert!(!store.is_trusted("hash-b"));
    }

    #[test]
    fn test_restore_from_entries() {
        let store = MemoryTrustStore::new();
        store.remember("node-a", "hash-a", b"key-a");
        store.set_trusted("hash-a", true);

        let restored = MemoryTrustStore::from_entries(store.entries());
        assert!(restored.is_trusted("hash-a"));
        assert_eq!(restored.entries(), store.entries());
    }
}
