// Транспорт link-а
//
// Link не знает о фрейминге: один `receive()` = один зашифрованный blob.
// Конкретные носители (TCP, WebSocket, UDP) реализуют `Transport` снаружи;
// здесь только контракт и in-memory пара для тестов и локальных link-ов.

use crate::error::{LinkError, Result};
use crate::utils::sync::lock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

/// Накопительные счётчики транспорта
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
}

/// Носитель зашифрованных кадров
pub trait Transport: Send + Sync {
    fn send(&self, frame: &[u8]) -> Result<()>;

    /// Блокирующее чтение одного кадра. Пустой результат = транспорт закрыт
    /// (или idle-чтение, тогда `is_closed()` остаётся `false`).
    fn receive(&self) -> Vec<u8>;

    /// Идемпотентно
    fn close(&self);

    fn is_closed(&self) -> bool;

    fn stats(&self) -> TransportStats;
}

#[derive(Default)]
struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> TransportStats {
        TransportStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// MemoryTransport
// ============================================================================

/// Один конец in-memory канала. Создаётся парой через [`MemoryTransport::pair`].
pub struct MemoryTransport {
    outgoing: Mutex<Option<Sender<Vec<u8>>>>,
    incoming: Mutex<Receiver<Vec<u8>>>,
    closed: AtomicBool,
    peer_gone: AtomicBool,
    poll_interval: Duration,
    counters: Counters,
}

impl MemoryTransport {
    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    fn new(outgoing: Sender<Vec<u8>>, incoming: Receiver<Vec<u8>>) -> Self {
        Self {
            outgoing: Mutex::new(Some(outgoing)),
            incoming: Mutex::new(incoming),
            closed: AtomicBool::new(false),
            peer_gone: AtomicBool::new(false),
            poll_interval: Self::POLL_INTERVAL,
            counters: Counters::default(),
        }
    }
}

impl Transport for MemoryTransport {
    fn send(&self, frame: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LinkError::Transport("transport is closed".to_string()));
        }

        let outgoing = lock(&self.outgoing);
        let sender = outgoing
            .as_ref()
            .ok_or_else(|| LinkError::Transport("transport is closed".to_string()))?;
        sender.send(frame.to_vec()).map_err(|_| {
            self.peer_gone.store(true, Ordering::SeqCst);
            LinkError::Transport("peer has gone away".to_string())
        })?;

        self.counters.bytes_sent.fetch_add(frame.len() as u64, Ordering::Relaxed);
        self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn receive(&self) -> Vec<u8> {
        let incoming = lock(&self.incoming);
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Vec::new();
            }
            // буферизованные кадры отдаём раньше, чем сообщаем об обрыве
            match incoming.recv_timeout(self.poll_interval) {
                Ok(frame) => {
                    self.counters
                        .bytes_received
                        .fetch_add(frame.len() as u64, Ordering::Relaxed);
                    self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
                    return frame;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.peer_gone.store(true, Ordering::SeqCst);
                    return Vec::new();
                }
            }
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            // dropping the sender disconnects the peer's receiver
            lock(&self.outgoing).take();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.peer_gone.load(Ordering::SeqCst)
    }

    fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_pair_delivers_frames_in_order() {
        let (a, b) = MemoryTransport::pair();
        a.send(b"one").unwrap();
        a.send(b"two").unwrap();
        assert_eq!(b.receive(), b"one");
        assert_eq!(b.receive(), b"two");

        let stats = a.stats();
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.bytes_sent, 6);
        assert_eq!(b.stats().bytes_received, 6);
    }

    #[test]
    fn test_close_unblocks_peer_receive() {
        let (a, b) = MemoryTransport::pair();
        let reader = thread::spawn(move || {
            let frame = b.receive();
            (frame, b.is_closed())
        });
        thread::sleep(Duration::from_millis(100));
        a.close();
        let (frame, closed) = reader.join().unwrap();
        assert!(frame.is_empty());
        assert!(closed);
    }

    #[test]
    fn test_close_unblocks_own_receive() {
        let (a, _b) = MemoryTransport::pair();
        let a = std::sync::Arc::new(a);
        let reader = {
            let a = std::sync::Arc::clone(&a);
            thread::spawn(move || a.receive())
        };
        thread::sleep(Duration::from_millis(100));
        a.close();
        assert!(reader.join().unwrap().is_empty());
        assert!(a.send(b"late").is_err());
    }

    #[test]
    fn test_buffered_frames_survive_peer_close() {
        let (a, b) = MemoryTransport::pair();
        a.send(b"last words").unwrap();
        a.close();
        assert_eq!(b.receive(), b"last words");
        assert!(b.receive().is_empty());
        assert!(b.is_closed());
    }
}
