//! Transport boundary
//!
//! The server never touches sockets or APDU framing. A [`Transport`]
//! implementation delivers frames to a connection, queues low priority frames
//! for every active connection and answers per-connection parameter queries.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::message::{Asdu, RawAsdu};

/// Opaque connection identity assigned by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Peer connection lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    Closed,
    /// STARTDT received, the peer is an active receiver
    Activated,
    /// STOPDT received, the peer is muted
    Deactivated,
}

pub trait Transport: Send + Sync {
    /// Send a frame to one connection with high priority
    fn send(&self, connection: ConnectionId, asdu: &Asdu) -> bool;

    /// Send an inbound frame back to its sender (confirmations, mirrors)
    fn send_raw(&self, connection: ConnectionId, asdu: &RawAsdu) -> bool;

    /// Queue a low priority frame for every active connection
    fn enqueue(&self, asdu: &Asdu);

    /// Originator address negotiated for a connection
    fn originator_address(&self, connection: ConnectionId) -> Option<u8>;

    fn peer_address(&self, connection: ConnectionId) -> Option<String>;

    fn close(&self, connection: ConnectionId);
}

/// Frame handed to a [`RecordingTransport`]
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Direct(ConnectionId, Asdu),
    Raw(ConnectionId, RawAsdu),
    Queued(Asdu),
}

#[derive(Default)]
struct Recording {
    sent: Vec<Sent>,
    closed: Vec<ConnectionId>,
    originators: FxHashMap<ConnectionId, u8>,
    peers: FxHashMap<ConnectionId, String>,
}

/// In-memory transport recording every frame
#[derive(Default)]
pub struct RecordingTransport {
    inner: Mutex<Recording>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_originator_address(&self, connection: ConnectionId, originator_address: u8) {
        self.inner
            .lock()
            .originators
            .insert(connection, originator_address);
    }

    pub fn set_peer_address(&self, connection: ConnectionId, peer: impl Into<String>) {
        self.inner.lock().peers.insert(connection, peer.into());
    }

    /// Everything sent so far, in order
    pub fn sent(&self) -> Vec<Sent> {
        self.inner.lock().sent.clone()
    }

    /// High priority frames sent to `connection`
    pub fn direct(&self, connection: ConnectionId) -> Vec<Asdu> {
        self.inner
            .lock()
            .sent
            .iter()
            .filter_map(|s| match s {
                Sent::Direct(c, asdu) if *c == connection => Some(asdu.clone()),
                _ => None,
            })
            .collect()
    }

    /// Replies to inbound frames sent to `connection`
    pub fn raw(&self, connection: ConnectionId) -> Vec<RawAsdu> {
        self.inner
            .lock()
            .sent
            .iter()
            .filter_map(|s| match s {
                Sent::Raw(c, asdu) if *c == connection => Some(asdu.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn queued(&self) -> Vec<Asdu> {
        self.inner
            .lock()
            .sent
            .iter()
            .filter_map(|s| match s {
                Sent::Queued(asdu) => Some(asdu.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn closed(&self) -> Vec<ConnectionId> {
        self.inner.lock().closed.clone()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.sent.clear();
        inner.closed.clear();
    }
}

impl Transport for RecordingTransport {
    fn send(&self, connection: ConnectionId, asdu: &Asdu) -> bool {
        self.inner
            .lock()
            .sent
            .push(Sent::Direct(connection, asdu.clone()));
        true
    }

    fn send_raw(&self, connection: ConnectionId, asdu: &RawAsdu) -> bool {
        self.inner
            .lock()
            .sent
            .push(Sent::Raw(connection, asdu.clone()));
        true
    }

    fn enqueue(&self, asdu: &Asdu) {
        self.inner.lock().sent.push(Sent::Queued(asdu.clone()));
    }

    fn originator_address(&self, connection: ConnectionId) -> Option<u8> {
        self.inner.lock().originators.get(&connection).copied()
    }

    fn peer_address(&self, connection: ConnectionId) -> Option<String> {
        self.inner.lock().peers.get(&connection).cloned()
    }

    fn close(&self, connection: ConnectionId) {
        self.inner.lock().closed.push(connection);
    }
}

/// Transport that only logs frames, used by the standalone service
#[derive(Debug, Default)]
pub struct LogTransport {
    sent: AtomicU64,
    queued: AtomicU64,
}

impl LogTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn queued_count(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }
}

impl Transport for LogTransport {
    fn send(&self, connection: ConnectionId, asdu: &Asdu) -> bool {
        self.sent.fetch_add(1, Ordering::Relaxed);
        debug!(
            "{} <- {} {} CA:{} objects:{}",
            connection,
            asdu.type_id,
            asdu.cot,
            asdu.common_address,
            asdu.len()
        );
        true
    }

    fn send_raw(&self, connection: ConnectionId, asdu: &RawAsdu) -> bool {
        self.sent.fetch_add(1, Ordering::Relaxed);
        debug!(
            "{} <- type:{} cot:{} CA:{} negative:{}",
            connection, asdu.type_code, asdu.cot_code, asdu.common_address, asdu.negative
        );
        true
    }

    fn enqueue(&self, asdu: &Asdu) {
        self.queued.fetch_add(1, Ordering::Relaxed);
        debug!(
            "queue <- {} {} CA:{} objects:{}",
            asdu.type_id,
            asdu.cot,
            asdu.common_address,
            asdu.len()
        );
    }

    fn originator_address(&self, _connection: ConnectionId) -> Option<u8> {
        None
    }

    fn peer_address(&self, _connection: ConnectionId) -> Option<String> {
        None
    }

    fn close(&self, connection: ConnectionId) {
        debug!("{} closed", connection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CauseOfTransmission, TypeId};

    #[test]
    fn test_recording_transport_filters() {
        let transport = RecordingTransport::new();
        let a = ConnectionId(1);
        let b = ConnectionId(2);
        let asdu = Asdu::new(TypeId::M_SP_NA_1, CauseOfTransmission::Request, 1);

        transport.send(a, &asdu);
        transport.send(b, &asdu);
        transport.enqueue(&asdu);
        transport.send_raw(a, &RawAsdu::new(45, 7, 1));

        assert_eq!(transport.direct(a).len(), 1);
        assert_eq!(transport.raw(a).len(), 1);
        assert!(transport.raw(b).is_empty());
        assert_eq!(transport.queued().len(), 1);
        assert_eq!(transport.sent().len(), 4);

        transport.clear();
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_connection_parameters() {
        let transport = RecordingTransport::new();
        let conn = ConnectionId(5);
        assert_eq!(transport.originator_address(conn), None);
        transport.set_originator_address(conn, 9);
        transport.set_peer_address(conn, "10.0.0.2:40000");
        assert_eq!(transport.originator_address(conn), Some(9));
        assert_eq!(transport.peer_address(conn).as_deref(), Some("10.0.0.2:40000"));
    }

    #[test]
    fn test_log_transport_counts() {
        let transport = LogTransport::new();
        let asdu = Asdu::new(TypeId::M_ME_NC_1, CauseOfTransmission::Periodic, 1);
        transport.enqueue(&asdu);
        transport.send(ConnectionId(1), &asdu);
        assert_eq!(transport.queued_count(), 1);
        assert_eq!(transport.sent_count(), 1);
    }
}
