//! Bounded connections between ports, and network-wide cancellation
//!
//! A [`Connection`] is a bounded FIFO of [`Packet`]s, backed by a
//! `flume::bounded` channel. Unlike a plain channel, a `Connection` also
//! tracks how many upstream output ports still feed it explicitly: FBP
//! closes a connection only when every upstream *port* has closed (not
//! merely when every `Sender` handle has been dropped), so the count is
//! kept as its own field rather than inferred from flume's internal
//! sender bookkeeping.
//!
//! Blocking operations are implemented as short-interval timeout polling
//! (`send_timeout`/`recv_timeout`) rather than a `flume::Selector` race
//! between the data channel and the network's shutdown signal. That trade
//! a small, bounded wake-up latency (`POLL_INTERVAL`) for an implementation
//! that never has to reason about which side of a multi-way select "wins"
//! ownership of an in-flight packet — the same `recv_timeout` idiom the
//! per-connection suspension watchdog already used.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{FbpError, Result};
use crate::packet::Packet;

/// How often a blocked `send`/`recv` re-checks for cancellation or closure.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(15);

/// Outcome of a blocking connection operation that can also be
/// interrupted by cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    /// Connection ended because every upstream port closed and the queue
    /// drained.
    EndOfStream,
    Cancelled,
}

/// The receiving half of the network's shutdown flag. Held by every
/// connection; becomes "triggered" once `Network::stop` (or deadlock
/// unwind) fires the paired [`ShutdownToken`].
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: flume::Receiver<()>,
}

impl ShutdownSignal {
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        matches!(self.rx.try_recv(), Err(flume::TryRecvError::Disconnected))
    }
}

/// The sending half, held by the network. Dropping it (via
/// [`ShutdownToken::trigger`], or simply letting the network itself drop)
/// fires every [`ShutdownSignal`] clone at once.
pub struct ShutdownToken {
    tx: Option<flume::Sender<()>>,
}

impl ShutdownToken {
    #[must_use]
    pub fn new() -> (Self, ShutdownSignal) {
        let (tx, rx) = flume::bounded(0);
        (Self { tx: Some(tx) }, ShutdownSignal { rx })
    }

    /// Signal every connection's blocked `send`/`recv` to wake up.
    pub fn trigger(&mut self) {
        self.tx.take();
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.tx.is_none()
    }
}

struct Shared {
    name: String,
    capacity: usize,
    data_tx: flume::Sender<Packet>,
    data_rx: flume::Receiver<Packet>,
    shutdown: ShutdownSignal,
    /// Upstream output ports that have not yet called `close_upstream`.
    /// Reaches zero exactly once, at which point the connection is closed
    /// to further sends and drains to end-of-stream.
    upstream_remaining: AtomicUsize,
    closed: AtomicBool,
}

/// A bounded FIFO connecting one or more `OutputPort`s to one `InputPort`.
///
/// Cloning a `Connection` clones the handle, not the queue: all clones
/// share the same underlying channel and close-accounting state.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Create a new connection with the given name and capacity, wired to
    /// the network's shutdown signal. `upstream_count` is how many
    /// `close_upstream` calls are needed before the connection closes;
    /// it is 1 for every connection this crate's `Network` builds today
    /// (one edge, one producing output port) but the count is tracked
    /// explicitly so a future multi-producer wiring doesn't require
    /// touching this type.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        shutdown: ShutdownSignal,
        upstream_count: usize,
    ) -> Self {
        assert!(capacity > 0, "connection capacity must be non-zero");
        assert!(upstream_count > 0, "connection must have at least one upstream");
        let (data_tx, data_rx) = flume::bounded(capacity);
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                capacity,
                data_tx,
                data_rx,
                shutdown,
                upstream_remaining: AtomicUsize::new(upstream_count),
                closed: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of packets currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.data_rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= self.shared.capacity
    }

    /// True once every upstream has called `close_upstream`.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// True once the connection is closed *and* drained: the state that
    /// makes a downstream `receive` return end-of-stream.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.is_closed() && self.is_empty()
    }

    #[must_use]
    pub(crate) fn shutdown_triggered(&self) -> bool {
        self.shared.shutdown.is_triggered()
    }

    /// Record that one upstream output port has finished sending. Once
    /// every registered upstream has called this, the connection is
    /// marked closed.
    pub fn close_upstream(&self) {
        let result = self.shared.upstream_remaining.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |remaining| remaining.checked_sub(1),
        );
        if let Ok(1) = result {
            self.shared.closed.store(true, Ordering::Release);
            tracing::debug!(connection = %self.name(), "connection closed: all upstreams finished");
        }
    }

    /// Non-blocking receive attempt. Used by `InputPort`'s fan-in loop and
    /// by the scheduler's quiescence checks.
    #[must_use]
    pub(crate) fn try_recv_raw(&self) -> Option<Packet> {
        self.shared.data_rx.try_recv().ok()
    }

    /// Block until either the packet is accepted by the connection, the
    /// connection closes, or shutdown is signalled. Consumes `packet`; on
    /// any non-`Sent` outcome the packet is dropped as an accounted,
    /// non-leak discard.
    pub fn send(&self, packet: Packet) -> Result<SendOutcome> {
        if self.is_closed() || self.shared.shutdown.is_triggered() {
            packet.drop_packet();
            return Err(FbpError::connection_closed(self.name()));
        }

        let mut packet = packet;
        loop {
            match self.shared.data_tx.send_timeout(packet, POLL_INTERVAL) {
                Ok(()) => return Ok(SendOutcome::Sent),
                Err(flume::SendTimeoutError::Disconnected(pkt)) => {
                    pkt.drop_packet();
                    return Err(FbpError::connection_closed(self.name()));
                }
                Err(flume::SendTimeoutError::Timeout(pkt)) => {
                    if self.shared.shutdown.is_triggered() {
                        pkt.drop_packet();
                        return Err(FbpError::connection_closed(self.name()));
                    }
                    if self.is_closed() {
                        pkt.drop_packet();
                        return Err(FbpError::connection_closed(self.name()));
                    }
                    packet = pkt;
                }
            }
        }
    }

    /// Block until either a packet is available, the connection is
    /// drained with no more upstreams, or shutdown is signalled.
    pub fn recv(&self) -> Result<std::result::Result<Packet, RecvOutcome>> {
        loop {
            match self.shared.data_rx.recv_timeout(POLL_INTERVAL) {
                Ok(packet) => return Ok(Ok(packet)),
                Err(flume::RecvTimeoutError::Disconnected) => {
                    return Ok(Err(RecvOutcome::EndOfStream));
                }
                Err(flume::RecvTimeoutError::Timeout) => {
                    if self.shared.shutdown.is_triggered() {
                        return Ok(Err(RecvOutcome::Cancelled));
                    }
                    if self.is_ended() {
                        return Ok(Err(RecvOutcome::EndOfStream));
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.capacity)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn test_signal() -> ShutdownSignal {
        ShutdownToken::new().1
    }

    #[test]
    fn send_then_recv_round_trips() {
        let conn = Connection::new("A.out -> B.in", 4, test_signal(), 1);
        let packet = Packet::new(Value::from(42), "A");
        assert_eq!(conn.send(packet).unwrap(), SendOutcome::Sent);
        match conn.recv().unwrap() {
            Ok(packet) => {
                assert_eq!(packet.content(), Some(&Value::from(42)));
                packet.drop_packet();
            }
            Err(_) => panic!("expected a packet"),
        }
    }

    #[test]
    fn empty_channel_try_recv_is_none() {
        let conn = Connection::new("A.out -> B.in", 1, test_signal(), 1);
        assert!(conn.try_recv_raw().is_none());
    }

    #[test]
    fn close_upstream_ends_connection_once_drained() {
        let conn = Connection::new("A.out -> B.in", 2, test_signal(), 1);
        assert!(!conn.is_closed());
        conn.close_upstream();
        assert!(conn.is_closed());
        assert!(conn.is_ended());
        match conn.recv().unwrap() {
            Err(RecvOutcome::EndOfStream) => {}
            other => panic!("expected end-of-stream, got {other:?}"),
        }
    }

    #[test]
    fn close_upstream_requires_every_registered_upstream() {
        let conn = Connection::new("A,B.out -> C.in", 2, test_signal(), 2);
        conn.close_upstream();
        assert!(!conn.is_closed());
        conn.close_upstream();
        assert!(conn.is_closed());
    }

    #[test]
    fn buffered_packets_are_drained_before_end_of_stream() {
        let conn = Connection::new("A.out -> B.in", 4, test_signal(), 1);
        conn.send(Packet::new(Value::from(1), "A")).unwrap();
        conn.close_upstream();
        match conn.recv().unwrap() {
            Ok(packet) => packet.drop_packet(),
            Err(_) => panic!("expected buffered packet before end-of-stream"),
        }
        match conn.recv().unwrap() {
            Err(RecvOutcome::EndOfStream) => {}
            other => panic!("expected end-of-stream after drain, got {other:?}"),
        }
    }

    #[test]
    fn send_on_closed_connection_fails_and_drops_the_packet() {
        let conn = Connection::new("A.out -> B.in", 1, test_signal(), 1);
        conn.close_upstream();
        let packet = Packet::new(Value::from(1), "A");
        let err = conn.send(packet).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn shutdown_interrupts_blocked_recv() {
        let (mut token, signal) = ShutdownToken::new();
        let conn = Connection::new("A.out -> X.in", 1, signal, 1);

        let handle = {
            let conn = conn.clone();
            std::thread::spawn(move || conn.recv().unwrap())
        };
        std::thread::sleep(Duration::from_millis(50));
        token.trigger();

        assert_eq!(handle.join().unwrap(), Err(RecvOutcome::Cancelled));
    }

    #[test]
    fn capacity_bounds_length() {
        let conn = Connection::new("A.out -> B.in", 2, test_signal(), 1);
        conn.send(Packet::new(Value::from(1), "A")).unwrap();
        conn.send(Packet::new(Value::from(2), "A")).unwrap();
        assert!(conn.is_full());
        assert_eq!(conn.len(), conn.capacity());
    }
}
