// Типы сообщений протокола
// Сообщение = тип + subtype + набор именованных бинарных полей

use crate::error::{LinkError, Result};
use std::collections::BTreeMap;

/// Subtype управляющего сообщения "закрыть link"
pub const CONTROL_CLOSE: u8 = 0xFF;

/// Имена полей сообщений
pub mod fields {
    // ClientHello / ServerHello
    pub const ALLOWED_SUITES: &str = "allowed_suites";
    pub const CHOSEN_SUITE: &str = "chosen_suite";

    // AuthRequest / AuthResponse
    pub const ECDH_PUBLIC_KEY: &str = "ecdh_public_key";
    pub const ECDH_SIGNATURE: &str = "ecdh_signature";
    pub const TIMESTAMP: &str = "timestamp";
    pub const RSA_PUBLIC_KEY: &str = "rsa_public_key";
    pub const RSA_SIGNATURE: &str = "rsa_signature";
    pub const CA_PUBLIC_KEY: &str = "ca_public_key";
    pub const CERT_NAME: &str = "cert_name";
    pub const ATTESTATION_TOKEN: &str = "attestation_token";
    pub const SHARED_SALT: &str = "shared_salt";
    pub const SHARED_SALT_SIGNATURE: &str = "shared_salt_signature";

    // Data
    pub const DATA: &str = "data";
    pub const TYPE: &str = "type";
    pub const MESSAGE: &str = "message";
}

/// Код типа сообщения на проводе
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    ClientHello,
    ServerHello,
    AuthRequest,
    AuthResponse,
    Data,
    Heartbeat,
    Control,
}

impl MessageType {
    pub fn code(self) -> u8 {
        match self {
            MessageType::ClientHello => 0x01,
            MessageType::ServerHello => 0x02,
            MessageType::AuthRequest => 0x03,
            MessageType::AuthResponse => 0x04,
            MessageType::Data => 0x10,
            MessageType::Heartbeat => 0x11,
            MessageType::Control => 0x12,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(MessageType::ClientHello),
            0x02 => Some(MessageType::ServerHello),
            0x03 => Some(MessageType::AuthRequest),
            0x04 => Some(MessageType::AuthResponse),
            0x10 => Some(MessageType::Data),
            0x11 => Some(MessageType::Heartbeat),
            0x12 => Some(MessageType::Control),
            _ => None,
        }
    }
}

/// Сообщение link-а. После сборки или разбора не изменяется: поля
/// задаются только через конструкторы и `with_field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    message_type: MessageType,
    subtype: u8,
    fields: BTreeMap<String, Vec<u8>>,
}

impl WireMessage {
    pub fn new(message_type: MessageType, subtype: u8) -> Self {
        Self {
            message_type,
            subtype,
            fields: BTreeMap::new(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn subtype(&self) -> u8 {
        self.subtype
    }

    // === Конструкторы ===

    pub fn client_hello(allowed_suites: Vec<u8>) -> Self {
        Self::new(MessageType::ClientHello, 0).with_field(fields::ALLOWED_SUITES, allowed_suites)
    }

    /// Пустой `chosen_suite` = отказ (нет общего набора)
    pub fn server_hello(chosen_suite: Vec<u8>) -> Self {
        Self::new(MessageType::ServerHello, 0).with_field(fields::CHOSEN_SUITE, chosen_suite)
    }

    pub fn data(payload: Vec<u8>) -> Self {
        Self::new(MessageType::Data, 0).with_field(fields::DATA, payload)
    }

    /// Data с прикладным конвертом `type` + `message`
    pub fn typed_data(kind: &str, message: Vec<u8>) -> Self {
        Self::new(MessageType::Data, 0)
            .with_field(fields::TYPE, kind.as_bytes().to_vec())
            .with_field(fields::MESSAGE, message)
    }

    pub fn heartbeat() -> Self {
        Self::new(MessageType::Heartbeat, 0)
    }

    pub fn close() -> Self {
        Self::new(MessageType::Control, CONTROL_CLOSE)
    }

    // === Поля ===

    /// Добавить или заменить поле
    pub fn with_field(mut self, name: &str, value: Vec<u8>) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn field(&self, name: &str) -> Option<&[u8]> {
        self.fields.get(name).map(Vec::as_slice)
    }

    /// Обязательное поле
    pub fn require(&self, name: &str) -> Result<&[u8]> {
        self.field(name)
            .ok_or_else(|| LinkError::MissingField(name.to_string()))
    }

    /// 8-байтовое little-endian поле (timestamp)
    pub fn require_i64(&self, name: &str) -> Result<i64> {
        let raw = self.require(name)?;
        let bytes: [u8; 8] = raw.try_into().map_err(|_| {
            LinkError::MalformedMessage(format!("field {} must be 8 bytes, got {}", name, raw.len()))
        })?;
        Ok(i64::from_le_bytes(bytes))
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value.as_slice()))
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub(crate) fn insert_parsed(&mut self, name: String, value: Vec<u8>) -> Result<()> {
        if self.fields.contains_key(&name) {
            return Err(LinkError::MalformedMessage(format!("duplicate field {}", name)));
        }
        self.fields.insert(name, value);
        Ok(())
    }

    // === Проверки ===

    pub fn check_type(&self, message_type: MessageType, subtype: u8) -> bool {
        self.message_type == message_type && self.subtype == subtype
    }

    pub fn is_close_request(&self) -> bool {
        self.check_type(MessageType::Control, CONTROL_CLOSE)
    }

    /// Байты прикладных данных (`data` или `message`), для счётчиков
    pub fn payload_len(&self) -> usize {
        self.field(fields::DATA)
            .or_else(|| self.field(fields::MESSAGE))
            .map_or(0, <[u8]>::len)
    }
}
