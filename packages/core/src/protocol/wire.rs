// Бинарный формат WireMessage
//
// type (1) | subtype (1) | { u16_le name_len | name | u32_le value_len | value }*
//
// Записи идут до конца буфера. Поля сериализуются в порядке имён.

use crate::error::{LinkError, Result};
use crate::protocol::messages::{MessageType, WireMessage};

const HEADER_LEN: usize = 2;

/// Упаковать сообщение
pub fn serialize(message: &WireMessage) -> Result<Vec<u8>> {
    let body: usize = message
        .fields()
        .map(|(name, value)| 2 + name.len() + 4 + value.len())
        .sum();
    let mut buffer = Vec::with_capacity(HEADER_LEN + body);
    buffer.push(message.message_type().code());
    buffer.push(message.subtype());

    for (name, value) in message.fields() {
        let name_len = u16::try_from(name.len())
            .map_err(|_| LinkError::MalformedMessage(format!("field name too long: {} bytes", name.len())))?;
        let value_len = u32::try_from(value.len()).map_err(|_| {
            LinkError::MalformedMessage(format!("field {} too long: {} bytes", name, value.len()))
        })?;

        buffer.extend_from_slice(&name_len.to_le_bytes());
        buffer.extend_from_slice(name.as_bytes());
        buffer.extend_from_slice(&value_len.to_le_bytes());
        buffer.extend_from_slice(value);
    }

    Ok(buffer)
}

/// Распаковать сообщение. Любое переполнение длины = `MalformedMessage`.
pub fn parse(data: &[u8]) -> Result<WireMessage> {
    if data.len() < HEADER_LEN {
        return Err(LinkError::MalformedMessage(format!(
            "message too short: {} bytes",
            data.len()
        )));
    }

    let message_type = MessageType::from_code(data[0])
        .ok_or_else(|| LinkError::MalformedMessage(format!("unknown message type 0x{:02X}", data[0])))?;
    let mut message = WireMessage::new(message_type, data[1]);

    let mut reader = Reader {
        data,
        offset: HEADER_LEN,
    };
    while !reader.is_empty() {
        let name_len = u16::from_le_bytes(reader.take_array::<2>("name length")?) as usize;
        let name = reader.take(name_len, "name")?;
        let name = std::str::from_utf8(name)
            .map_err(|_| LinkError::MalformedMessage("field name is not UTF-8".to_string()))?
            .to_string();

        let value_len = u32::from_le_bytes(reader.take_array::<4>("value length")?) as usize;
        let value = reader.take(value_len, &name)?.to_vec();

        message.insert_parsed(name, value)?;
    }

    Ok(message)
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let remaining = self.data.len() - self.offset;
        if len > remaining {
            return Err(LinkError::MalformedMessage(format!(
                "{} overruns buffer at offset {}: need {}, have {}",
                what, self.offset, len, remaining
            )));
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }
}

impl WireMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        parse(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::fields;

    #[test]
    fn test_layout() {
        let msg = WireMessage::data(vec![0xAA, 0xBB]);
        let bytes = serialize(&msg).unwrap();
        assert_eq!(
            bytes,
            vec![0x10, 0x00, 4, 0, b'd', b'a', b't', b'a', 2, 0, 0, 0, 0xAA, 0xBB]
        );
        assert_eq!(parse(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_heartbeat_has_no_records() {
        let bytes = serialize(&WireMessage::heartbeat()).unwrap();
        assert_eq!(bytes, vec![0x11, 0x00]);
    }

    #[test]
    fn test_auth_request_roundtrip() {
        let msg = WireMessage::new(MessageType::AuthRequest, 0)
            .with_field(fields::ECDH_PUBLIC_KEY, vec![7; 40])
            .with_field(fields::TIMESTAMP, 42i64.to_le_bytes().to_vec())
            .with_field(fields::CERT_NAME, b"node-a".to_vec())
            .with_field(fields::ATTESTATION_TOKEN, Vec::new());
        let parsed = parse(&serialize(&msg).unwrap()).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.field(fields::ATTESTATION_TOKEN), Some(&[][..]));
    }

    #[test]
    fn test_value_overrun_is_malformed() {
        let mut bytes = serialize(&WireMessage::data(vec![1, 2, 3])).unwrap();
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(parse(&bytes), Err(LinkError::MalformedMessage(_))));
    }

    #[test]
    fn test_truncated_length_prefix_is_malformed() {
        // header + one byte of a two-byte name length
        assert!(matches!(parse(&[0x10, 0x00, 0x04]), Err(LinkError::MalformedMessage(_))));
        assert!(matches!(parse(&[0x10]), Err(LinkError::MalformedMessage(_))));
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        assert!(matches!(parse(&[0x55, 0x00]), Err(LinkError::MalformedMessage(_))));
    }

    #[test]
    fn test_duplicate_field_is_malformed() {
        let record = [1u8, 0, b'x', 1, 0, 0, 0, 9];
        let mut bytes = vec![0x10, 0x00];
        bytes.extend_from_slice(&record);
        bytes.extend_from_slice(&record);
        assert!(matches!(parse(&bytes), Err(LinkError::MalformedMessage(_))));
    }

    #[test]
    fn test_non_utf8_name_is_malformed() {
        let bytes = [0x10, 0x00, 1, 0, 0xFF, 0, 0, 0, 0];
        assert!(matches!(parse(&bytes), Err(LinkError::MalformedMessage(_))));
    }
}
