// Протокол link-а: сообщения, бинарный формат, транспорт

pub mod messages;
pub mod transport;
pub mod wire;

pub use messages::{fields, MessageType, WireMessage, CONTROL_CLOSE};
pub use transport::{MemoryTransport, Transport, TransportStats};
