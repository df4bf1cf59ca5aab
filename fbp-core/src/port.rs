//! Input and output ports
//!
//! A port is a named, typed attachment point on a component. `OutputPort`
//! wraps the sending half of one or more [`Connection`]s (an array port
//! fans out one element per connection); `InputPort` wraps the receiving
//! half of one or more connections (fan-in selects across them), or
//! carries a single pre-staged IIP packet instead of a live connection.
//!
//! Each `InputPort` tracks bracket nesting with a signed depth counter: an
//! `Open` packet increments it, a `Close` decrements it, and a `Close`
//! that would take it negative is a validation failure rather than being
//! silently ignored.
//!
//! Both port kinds report their suspension into the network's [`Ledger`]
//! around any call that could block, so the scheduler's quiescence check
//! sees a component as suspended only for the span it is actually parked.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::Arc;
use std::thread;

use serde_json::Value;

use crate::connection::{Connection, POLL_INTERVAL};
use crate::error::{FbpError, Result};
use crate::ledger::{ComponentState, Ledger};
use crate::packet::{Packet, PacketType};
use crate::types::TypeDescriptor;

/// Static description of a port, supplied when a component is built.
#[derive(Debug, Clone)]
pub struct PortSpec {
    pub name: String,
    pub descriptor: TypeDescriptor,
    /// Array ports accept multiple incoming/outgoing connections, one per
    /// element, rather than a single scalar connection.
    pub is_array: bool,
    /// Marks an input port optional: a network may validly omit wiring
    /// or an IIP into it.
    pub optional: bool,
    /// Human-readable description, carried through to `get_spec()`-style
    /// introspection only; never consulted at runtime.
    pub description: Option<String>,
}

impl PortSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, descriptor: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            descriptor,
            is_array: false,
            optional: false,
            description: None,
        }
    }

    #[must_use]
    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    #[must_use]
    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// The outgoing side of a port: one or more connections a component can
/// push packets onto.
pub struct OutputPort {
    spec: PortSpec,
    owner: String,
    connections: Vec<Connection>,
    ledger: Arc<Ledger>,
    closed: AtomicBool,
}

impl OutputPort {
    pub(crate) fn new(
        spec: PortSpec,
        owner: impl Into<String>,
        connections: Vec<Connection>,
        ledger: Arc<Ledger>,
    ) -> Self {
        Self {
            spec,
            owner: owner.into(),
            connections,
            ledger,
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.connections.is_empty()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Validate `value` against this port's declared type, wrap it in a
    /// packet owned by this component, and send it on every attached
    /// connection (fan-out for array ports; exactly one for scalar
    /// ports). Blocks if an attached connection is full.
    pub fn send(&self, value: Value) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FbpError::port_not_open(&self.spec.name));
        }

        let validated = crate::types::validate(self.spec.descriptor, value).map_err(|_| {
            FbpError::packet_validation(&self.spec.name, "value rejected by port type")
        })?;

        if self.connections.is_empty() {
            // Unconnected optional output: nothing downstream to hold it.
            return Ok(());
        }

        for connection in &self.connections {
            let packet = Packet::new(validated.clone(), self.owner.clone());
            self.send_on(connection, packet)?;
        }
        Ok(())
    }

    fn send_on(&self, connection: &Connection, packet: Packet) -> Result<()> {
        let might_block = connection.is_full();
        if might_block {
            self.ledger.set_state(&self.owner, ComponentState::SuspendedSend);
        }
        let result = connection.send(packet);
        if might_block {
            self.ledger.set_state(&self.owner, ComponentState::Active);
        }
        result.map(|_| ())
    }

    /// Open a bracketed substream on every attached connection.
    pub fn open_bracket(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FbpError::port_not_open(&self.spec.name));
        }
        for connection in &self.connections {
            self.send_on(connection, Packet::open_bracket(self.owner.clone()))?;
        }
        Ok(())
    }

    /// Close a bracketed substream on every attached connection.
    pub fn close_bracket(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FbpError::port_not_open(&self.spec.name));
        }
        for connection in &self.connections {
            self.send_on(connection, Packet::close_bracket(self.owner.clone()))?;
        }
        Ok(())
    }

    /// Close this output port: no further `send` is accepted, and every
    /// attached connection has its upstream count decremented, which may
    /// surface as end-of-stream downstream. Idempotent.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for connection in &self.connections {
            connection.close_upstream();
        }
        tracing::debug!(port = %self.spec.name, owner = %self.owner, "output port closed");
    }
}

/// The incoming side of a port.
pub struct InputPort {
    spec: PortSpec,
    owner: String,
    connections: Vec<Connection>,
    /// Pre-staged IIP, consumed on first receive before any connection is
    /// polled.
    iip: Option<Value>,
    bracket_depth: AtomicIsize,
    ledger: Arc<Ledger>,
    closed: AtomicBool,
    /// Round-robin cursor over `connections`, so a fan-in input doesn't
    /// starve a slower upstream behind a chattier one.
    rr_cursor: Cell<usize>,
}

impl InputPort {
    pub(crate) fn new(
        spec: PortSpec,
        owner: impl Into<String>,
        connections: Vec<Connection>,
        iip: Option<Value>,
        ledger: Arc<Ledger>,
    ) -> Self {
        Self {
            spec,
            owner: owner.into(),
            connections,
            iip,
            bracket_depth: AtomicIsize::new(0),
            ledger,
            closed: AtomicBool::new(false),
            rr_cursor: Cell::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.connections.is_empty() || self.iip.is_some()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn account_bracket(&self, kind: PacketType) -> Result<()> {
        match kind {
            PacketType::Open => {
                self.bracket_depth.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
            PacketType::Close => {
                let previous = self.bracket_depth.fetch_sub(1, Ordering::AcqRel);
                if previous <= 0 {
                    self.bracket_depth.store(0, Ordering::Release);
                    Err(FbpError::packet_validation(
                        &self.spec.name,
                        "unmatched close-bracket packet",
                    ))
                } else {
                    Ok(())
                }
            }
            PacketType::Normal => Ok(()),
        }
    }

    /// Receive the next packet, pulling the staged IIP first if present.
    /// Blocks if no connection has data ready. Returns `Ok(None)` once the
    /// port is exhausted (no IIP remains and every connection is drained
    /// and closed).
    pub fn receive(&mut self) -> Result<Option<Packet>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FbpError::port_not_open(&self.spec.name));
        }

        if let Some(value) = self.iip.take() {
            let mut packet = Packet::new(value, self.owner.clone());
            packet.claim(self.owner.clone());
            return Ok(Some(packet));
        }

        if self.connections.is_empty() {
            return Ok(None);
        }

        let mut suspended = false;
        let result = loop {
            let n = self.connections.len();
            let mut found = None;
            for offset in 0..n {
                let idx = (self.rr_cursor.get() + offset) % n;
                if let Some(packet) = self.connections[idx].try_recv_raw() {
                    self.rr_cursor.set((idx + 1) % n);
                    found = Some(packet);
                    break;
                }
            }

            if let Some(mut packet) = found {
                self.account_bracket(packet.kind())?;
                packet.claim(self.owner.clone());
                break Ok(Some(packet));
            }

            if self.connections.iter().all(Connection::is_ended) {
                break Ok(None);
            }

            if self.connections.iter().any(Connection::shutdown_triggered) {
                break Err(FbpError::connection_closed(&self.spec.name));
            }

            if !suspended {
                self.ledger.set_state(&self.owner, ComponentState::SuspendedReceive);
                suspended = true;
            }
            thread::sleep(POLL_INTERVAL);
        };

        if suspended {
            self.ledger.set_state(&self.owner, ComponentState::Active);
        }
        result
    }

    /// Read the IIP (or the first real packet) if present, then mark the
    /// port closed from the reader's side so subsequent calls fail with
    /// `PortNotOpenError`. Returns `default` if nothing was available.
    pub fn receive_once(&mut self, default: Value) -> Result<Value> {
        let value = match self.receive()? {
            Some(packet) => {
                let value = packet.content().cloned().unwrap_or(Value::Null);
                packet.drop_packet();
                value
            }
            None => default,
        };
        self.closed.store(true, Ordering::Release);
        Ok(value)
    }

    /// A lazy, finite, non-restartable iterator over this port's packets.
    pub fn iter(&mut self) -> InputIter<'_> {
        InputIter { port: self }
    }

    #[must_use]
    pub fn bracket_depth(&self) -> isize {
        self.bracket_depth.load(Ordering::Acquire)
    }

    /// True once every attached connection has reported end-of-stream and
    /// no IIP remains; used by the quiescence check.
    #[must_use]
    pub(crate) fn is_drained(&self) -> bool {
        self.iip.is_none() && self.connections.iter().all(Connection::is_ended)
    }
}

/// Iterator returned by [`InputPort::iter`]. Yields `Ok(packet)` for each
/// delivered packet and ends (returns `None`) at end-of-stream; a
/// `ConnectionClosedError` from network cancellation surfaces as one
/// final `Some(Err(_))` item rather than being swallowed.
pub struct InputIter<'a> {
    port: &'a mut InputPort,
}

impl<'a> Iterator for InputIter<'a> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.port.receive() {
            Ok(Some(packet)) => Some(Ok(packet)),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ShutdownToken;

    fn ledger_for(name: &str) -> Arc<Ledger> {
        Arc::new(Ledger::new([name.to_string()]))
    }

    fn test_connection(name: &str, capacity: usize) -> Connection {
        let (_token, signal) = ShutdownToken::new();
        Connection::new(name, capacity, signal, 1)
    }

    #[test]
    fn iip_is_consumed_before_connections() {
        let spec = PortSpec::new("IN", TypeDescriptor::Int);
        let mut port = InputPort::new(spec, "Comp", vec![], Some(Value::from(7)), ledger_for("Comp"));
        let packet = port.receive().unwrap().unwrap();
        assert_eq!(packet.content(), Some(&Value::from(7)));
        packet.drop_packet();
        assert!(port.receive().unwrap().is_none());
    }

    #[test]
    fn unmatched_close_bracket_is_rejected() {
        let spec = PortSpec::new("IN", TypeDescriptor::Any);
        let conn = test_connection("x -> IN", 4);
        conn.send(Packet::close_bracket("Up")).unwrap();
        conn.close_upstream();
        let mut port = InputPort::new(spec, "Comp", vec![conn], None, ledger_for("Comp"));
        let err = port.receive().unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn balanced_brackets_track_depth() {
        let spec = PortSpec::new("IN", TypeDescriptor::Any);
        let conn = test_connection("x -> IN", 4);
        conn.send(Packet::open_bracket("Up")).unwrap();
        conn.send(Packet::close_bracket("Up")).unwrap();
        conn.close_upstream();
        let mut port = InputPort::new(spec, "Comp", vec![conn], None, ledger_for("Comp"));
        port.receive().unwrap().unwrap().drop_packet();
        assert_eq!(port.bracket_depth(), 1);
        port.receive().unwrap().unwrap().drop_packet();
        assert_eq!(port.bracket_depth(), 0);
    }

    #[test]
    fn receive_once_reports_default_when_nothing_available() {
        let spec = PortSpec::new("IN", TypeDescriptor::Any);
        let conn = test_connection("x -> IN", 4);
        conn.close_upstream();
        let mut port = InputPort::new(spec, "Comp", vec![conn], None, ledger_for("Comp"));
        let value = port.receive_once(Value::from("fallback")).unwrap();
        assert_eq!(value, Value::from("fallback"));
        assert!(port.is_closed());
        assert!(port.receive().is_err());
    }

    #[test]
    fn closed_output_port_rejects_further_sends() {
        let spec = PortSpec::new("OUT", TypeDescriptor::Any);
        let conn = test_connection("OUT -> x", 4);
        let output = OutputPort::new(spec, "Comp", vec![conn], ledger_for("Comp"));
        output.close();
        let err = output.send(Value::from(1)).unwrap_err();
        assert!(matches!(err, FbpError::PortNotOpen { .. }));
    }

    #[test]
    fn closing_output_port_closes_its_connections() {
        let spec = PortSpec::new("OUT", TypeDescriptor::Any);
        let conn = test_connection("OUT -> x", 4);
        let conn_clone = conn.clone();
        let output = OutputPort::new(spec, "Comp", vec![conn], ledger_for("Comp"));
        assert!(!conn_clone.is_closed());
        output.close();
        assert!(conn_clone.is_closed());
    }

    #[test]
    fn fan_in_delivers_from_every_upstream() {
        let spec = PortSpec::new("IN", TypeDescriptor::Any).array();
        let conn_a = test_connection("A -> IN", 4);
        let conn_b = test_connection("B -> IN", 4);
        conn_a.send(Packet::new(Value::from("a1"), "A")).unwrap();
        conn_a.send(Packet::new(Value::from("a2"), "A")).unwrap();
        conn_b.send(Packet::new(Value::from("b1"), "B")).unwrap();
        conn_a.close_upstream();
        conn_b.close_upstream();

        let mut port = InputPort::new(spec, "Comp", vec![conn_a, conn_b], None, ledger_for("Comp"));
        let mut seen = Vec::new();
        for packet in port.iter() {
            let packet = packet.unwrap();
            seen.push(packet.content().cloned().unwrap());
            packet.drop_packet();
        }
        seen.sort_by_key(ToString::to_string);
        assert_eq!(seen, vec![Value::from("a1"), Value::from("a2"), Value::from("b1")]);
    }
}
