//! Централизованная конфигурация для Bifrost Core
//!
//! Все таймауты, размеры и флаги link-а определены здесь, чтобы избежать
//! хардкода по всему проекту. Экземпляр `Config` передаётся в каждый `Link`
//! через `LinkContext`; `Config::global()` используется только как значение
//! по умолчанию.

use crate::crypto::suites::CipherSuiteIdentifier;
use std::sync::OnceLock;
use std::time::Duration;

/// Глобальная конфигурация (синглтон)
static GLOBAL_CONFIG: OnceLock<Config> = OnceLock::new();

/// Основная структура конфигурации
#[derive(Debug, Clone)]
pub struct Config {
    // ============================================
    // HANDSHAKE
    // ============================================

    /// Максимальное время на весь handshake
    pub handshake_timeout: Duration,

    /// Допустимое расхождение часов между peer-ами (окно защиты от replay)
    pub max_time_mismatch: Duration,

    /// Разрешённые cipher suites в порядке предпочтения.
    /// Пустой список = встроенный список по умолчанию.
    pub allowed_suites: Vec<CipherSuiteIdentifier>,

    /// Отключить проверку статических и ephemeral ключей peer-а
    pub no_authentication: bool,

    /// Запоминать неизвестные certificate authority peer-а в trust store
    pub remember_remote_authority: bool,

    /// Имя, которое мы заявляем в поле `cert_name`
    pub cert_name: String,

    /// Непрозрачный токен, отправляемый инициатором в AuthRequest
    pub attestation_token: Option<Vec<u8>>,

    /// Длина shared salt (в байтах)
    pub shared_salt_length: usize,

    /// Сколько ждать предвычисленные ключи
    pub key_wait_timeout: Duration,

    // ============================================
    // LINK LOOPS
    // ============================================

    /// Период отправки heartbeat
    pub heartbeat_interval: Duration,

    /// Link закрывается, если за это время ничего не получено
    pub liveness_timeout: Duration,

    /// Как часто watchdog проверяет время последнего приёма
    pub liveness_poll: Duration,

    /// Периодическое пробуждение send loop для проверки закрытия
    pub queue_poll_interval: Duration,

    /// Ёмкость исходящей очереди
    pub send_queue_capacity: usize,
}

impl Config {
    /// Создать конфигурацию с дефолтными значениями
    pub fn default() -> Self {
        Self {
            // Handshake
            handshake_timeout: Duration::from_secs(10),
            max_time_mismatch: Duration::from_secs(5 * 60), // 5 minutes
            allowed_suites: Vec::new(),
            no_authentication: false,
            remember_remote_authority: false,
            cert_name: default_cert_name(),
            attestation_token: None,
            shared_salt_length: 16,
            key_wait_timeout: Duration::from_secs(5),

            // Link loops
            heartbeat_interval: Duration::from_secs(3),
            liveness_timeout: Duration::from_secs(10),
            liveness_poll: Duration::from_millis(500),
            queue_poll_interval: Duration::from_secs(1),
            send_queue_capacity: 1500,
        }
    }

    /// Создать конфигурацию из переменных окружения
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Переопределяем значения из env, если они заданы
        if let Some(ms) = env_parse::<u64>("BIFROST_HANDSHAKE_TIMEOUT_MS") {
            config.handshake_timeout = Duration::from_millis(ms);
        }

        if let Some(secs) = env_parse::<u64>("BIFROST_MAX_TIME_MISMATCH_SECS") {
            config.max_time_mismatch = Duration::from_secs(secs);
        }

        if let Some(ms) = env_parse::<u64>("BIFROST_HEARTBEAT_INTERVAL_MS") {
            config.heartbeat_interval = Duration::from_millis(ms);
        }

        if let Some(ms) = env_parse::<u64>("BIFROST_LIVENESS_TIMEOUT_MS") {
            config.liveness_timeout = Duration::from_millis(ms);
        }

        if let Some(capacity) = env_parse::<usize>("BIFROST_SEND_QUEUE_CAPACITY") {
            if capacity > 0 {
                config.send_queue_capacity = capacity;
            }
        }

        if let Some(flag) = env_parse::<bool>("BIFROST_NO_AUTHENTICATION") {
            config.no_authentication = flag;
        }

        if let Ok(name) = std::env::var("BIFROST_CERT_NAME") {
            if !name.trim().is_empty() {
                config.cert_name = name;
            }
        }

        config
    }

    /// Получить глобальный экземпляр конфигурации
    ///
    /// Автоматически инициализирует конфигурацию со значениями по умолчанию при первом вызове
    pub fn global() -> &'static Config {
        GLOBAL_CONFIG.get_or_init(Config::default)
    }

    /// Инициализировать глобальную конфигурацию со значениями по умолчанию
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init() -> Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(Self::default())
            .map_err(|_| "Config already initialized")
    }

    /// Инициализировать глобальную конфигурацию из переменных окружения
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init_from_env() -> Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(Self::from_env())
            .map_err(|_| "Config already initialized")
    }

    /// Инициализировать глобальную конфигурацию с кастомным экземпляром
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init_with(config: Config) -> Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(config)
            .map_err(|_| "Config already initialized")
    }

    /// Проверить, инициализирована ли глобальная конфигурация
    pub fn is_initialized() -> bool {
        GLOBAL_CONFIG.get().is_some()
    }

    /// Список suites для handshake: явно заданный или встроенный
    pub fn effective_suites(&self) -> Vec<CipherSuiteIdentifier> {
        if self.allowed_suites.is_empty() {
            CipherSuiteIdentifier::default_suites()
        } else {
            self.allowed_suites.clone()
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|val| val.trim().parse().ok())
}

fn default_cert_name() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.max_time_mismatch, Duration::from_secs(300));
        assert_eq!(config.send_queue_capacity, 1500);
        assert!(!config.no_authentication);
        assert!(!config.cert_name.is_empty());
    }

    #[test]
    fn test_config_values() {
        let config = Config::default();

        // Loops
        assert_eq!(config.heartbeat_interval, Duration::from_secs(3));
        assert_eq!(config.liveness_timeout, Duration::from_secs(10));
        assert_eq!(config.queue_poll_interval, Duration::from_secs(1));

        // Crypto
        assert_eq!(config.shared_salt_length, 16);
    }

    #[test]
    fn test_effective_suites_fall_back_to_defaults() {
        let mut config = Config::default();
        assert_eq!(config.effective_suites(), CipherSuiteIdentifier::default_suites());

        let only = CipherSuiteIdentifier::new(3, 1, 1);
        config.allowed_suites = vec![only];
        assert_eq!(config.effective_suites(), vec![only]);
    }
}
