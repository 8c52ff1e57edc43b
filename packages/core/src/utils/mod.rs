// Вспомогательные функции: base64, время, блокировки

pub mod b64 {
    use base64::engine::general_purpose;
    use base64::Engine;

    pub fn encode(data: &[u8]) -> String {
        general_purpose::STANDARD.encode(data)
    }

    pub fn decode(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
        general_purpose::STANDARD.decode(data.trim())
    }
}

pub mod time {
    use std::time::Duration;

    /// Текущее Unix-время в миллисекундах (UTC)
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// `|a - b|` без переполнения
    pub fn drift(a: i64, b: i64) -> Duration {
        Duration::from_millis(a.abs_diff(b))
    }
}

pub mod sync {
    use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

    // Паника в другом потоке не должна ронять link: данные под локами
    // остаются согласованными после каждой операции.

    pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
        lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
        lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_b64_roundtrip_ignores_surrounding_whitespace() {
        let encoded = format!("  {}\n", b64::encode(b"bifrost"));
        assert_eq!(b64::decode(&encoded).unwrap(), b"bifrost");
        assert!(b64::decode("not base64!").is_err());
    }

    #[test]
    fn test_drift_is_symmetric() {
        assert_eq!(time::drift(1_000, 4_500), time::drift(4_500, 1_000));
        assert_eq!(time::drift(i64::MIN, i64::MAX).as_millis(), u64::MAX as u128);
    }
}
