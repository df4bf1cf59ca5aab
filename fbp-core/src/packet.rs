//! Packets and ownership discipline
//!
//! A [`Packet`] is the unit of data flowing between components. Ownership
//! of a packet is single-threaded at all times: whichever component holds
//! it is the only one allowed to read, send, or drop it. A `Packet` is
//! armed on creation and disarms only when handed off through an accounted
//! operation (`Connection::send`, `Packet::drop_packet`); if it is dropped
//! while still armed, that's a leak, and the owning component's thread
//! records it so the component runtime can turn it into a `PacketLeakError`
//! once the component's logic returns.
//!
//! This mirrors a guard that defaults to "poisoned" until explicitly
//! disarmed: the unsafe state is the default, and only a deliberate,
//! accounted action clears it.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde_json::Value;

/// Packet kind, used for bracket-packet substream framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// A normal data packet.
    Normal,
    /// Opens a substream. Must be balanced by a matching `Close`.
    Open,
    /// Closes a substream opened by a preceding `Open`.
    Close,
}

/// A single unit of data moving through the network.
///
/// `Packet` is not `Clone`: ownership transfer is the only way content
/// moves between components, which is what makes the leak-detection in
/// [`Packet::drop`] sound.
pub struct Packet {
    kind: PacketType,
    content: Option<Value>,
    owner: String,
    /// `true` until the packet is consumed through an accounted path.
    armed: AtomicBool,
    /// Set once this packet has been claimed by a receiver, i.e. it
    /// crossed at least one connection. Read at final disposal to decide
    /// which terminal-disposition counter it belongs to: a packet claimed
    /// at least once and then disposed of counts as delivered; one
    /// disposed of without ever being claimed (e.g. a send rejected by a
    /// closed connection) counts as dropped instead. The two are mutually
    /// exclusive so `created == delivered + dropped + leaked` holds.
    delivered: AtomicBool,
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("kind", &self.kind)
            .field("content", &self.content)
            .field("owner", &self.owner)
            .finish()
    }
}

impl Packet {
    /// Create a new normal packet, owned by `owner`.
    #[must_use]
    pub fn new(content: Value, owner: impl Into<String>) -> Self {
        STATS.created.fetch_add(1, Ordering::Relaxed);
        Self {
            kind: PacketType::Normal,
            content: Some(content),
            owner: owner.into(),
            armed: AtomicBool::new(true),
            delivered: AtomicBool::new(false),
        }
    }

    /// Create a bracket-open packet.
    #[must_use]
    pub fn open_bracket(owner: impl Into<String>) -> Self {
        STATS.created.fetch_add(1, Ordering::Relaxed);
        Self {
            kind: PacketType::Open,
            content: None,
            owner: owner.into(),
            armed: AtomicBool::new(true),
            delivered: AtomicBool::new(false),
        }
    }

    /// Create a bracket-close packet.
    #[must_use]
    pub fn close_bracket(owner: impl Into<String>) -> Self {
        STATS.created.fetch_add(1, Ordering::Relaxed);
        Self {
            kind: PacketType::Close,
            content: None,
            owner: owner.into(),
            armed: AtomicBool::new(true),
            delivered: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn kind(&self) -> PacketType {
        self.kind
    }

    #[must_use]
    pub fn is_bracket(&self) -> bool {
        matches!(self.kind, PacketType::Open | PacketType::Close)
    }

    /// Borrow the packet's content. `None` for bracket packets.
    #[must_use]
    pub fn content(&self) -> Option<&Value> {
        self.content.as_ref()
    }

    /// The name of the component currently holding this packet.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Reassign ownership to another component. Used when a packet crosses
    /// a connection: the sending component's `send` hands it to the
    /// channel unchanged, and the receiving component re-arms and retags it
    /// on receipt. Marks the packet as having been claimed at least once,
    /// which `drop_packet` consults to count it as delivered rather than
    /// dropped.
    pub(crate) fn claim(&mut self, new_owner: impl Into<String>) {
        self.owner = new_owner.into();
        self.armed.store(true, Ordering::Release);
        self.delivered.store(true, Ordering::Release);
    }

    /// Disarm the packet without counting it anywhere: used when a packet
    /// is discarded as a side effect of an already-accounted operation
    /// (e.g. a send rejected by a closed connection).
    pub(crate) fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }

    /// Explicitly discard a packet's content without sending it onward.
    /// This is the accounted alternative to letting a `Packet` fall out of
    /// scope: a bare `drop(packet)` is always a leak. Counted as delivered
    /// if the packet was ever claimed by a receiver, or dropped otherwise —
    /// the two are mutually exclusive terminal dispositions, so
    /// `created == delivered + dropped + leaked` holds for every packet.
    pub fn drop_packet(self) {
        if self.delivered.load(Ordering::Acquire) {
            STATS.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            STATS.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.disarm();
    }

    #[must_use]
    pub(crate) fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

impl Drop for Packet {
    fn drop(&mut self) {
        if self.armed.load(Ordering::Acquire) {
            STATS.leaked.fetch_add(1, Ordering::Relaxed);
            LEAKS_ON_THIS_THREAD.with(|count| count.set(count.get() + 1));
            tracing::error!(
                owner = %self.owner,
                kind = ?self.kind,
                "packet dropped without being sent or explicitly discarded"
            );
        }
    }
}

/// Process-wide packet accounting, exposed for the conservation-of-packets
/// property: `created == delivered + dropped + leaked` should hold for
/// every network run (modulo packets still in flight mid-run).
#[derive(Debug, Default)]
struct Stats {
    created: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    leaked: AtomicU64,
}

static STATS: Stats = Stats {
    created: AtomicU64::new(0),
    delivered: AtomicU64::new(0),
    dropped: AtomicU64::new(0),
    leaked: AtomicU64::new(0),
};

thread_local! {
    /// Packets leaked on the *current* thread since the last reset. Each
    /// component runs on its own dedicated OS thread (see `network`), so
    /// this doubles as "packets this component leaked" without any extra
    /// coordination between the runtime and the packets it hands out.
    static LEAKS_ON_THIS_THREAD: Cell<u64> = const { Cell::new(0) };
}

/// Snapshot of the process-wide packet counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketStats {
    pub created: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub leaked: u64,
}

/// Read the current process-wide packet counters.
#[must_use]
pub fn stats() -> PacketStats {
    PacketStats {
        created: STATS.created.load(Ordering::Relaxed),
        delivered: STATS.delivered.load(Ordering::Relaxed),
        dropped: STATS.dropped.load(Ordering::Relaxed),
        leaked: STATS.leaked.load(Ordering::Relaxed),
    }
}

/// Reset this thread's leak counter and return whatever had accumulated
/// since the last reset. Called by the component runtime both before and
/// after running a component's logic, so leaks from an unrelated prior
/// activation on a reused thread are never misattributed.
pub(crate) fn take_thread_leaks() -> u64 {
    LEAKS_ON_THIS_THREAD.with(|count| count.replace(0))
}
