//! Connection bookkeeping
//!
//! One map records per connection whether it is an active receiver; the
//! aggregate active count is updated under the same lock.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::transport::{ConnectionEvent, ConnectionId};

#[derive(Default)]
struct Connections {
    receivers: FxHashMap<ConnectionId, bool>,
    active: usize,
}

#[derive(Default)]
pub struct ConnectionTable {
    inner: Mutex<Connections>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event(&self, connection: ConnectionId, event: ConnectionEvent) {
        let mut inner = self.inner.lock();
        let previous = inner.receivers.get(&connection).copied();
        match event {
            ConnectionEvent::Opened | ConnectionEvent::Deactivated => {
                inner.receivers.insert(connection, false);
                if previous == Some(true) {
                    inner.active -= 1;
                }
            },
            ConnectionEvent::Activated => {
                inner.receivers.insert(connection, true);
                if previous != Some(true) {
                    inner.active += 1;
                }
            },
            ConnectionEvent::Closed => {
                if inner.receivers.remove(&connection) == Some(true) {
                    inner.active -= 1;
                }
            },
        }
    }

    pub fn open_count(&self) -> usize {
        self.inner.lock().receivers.len()
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active
    }

    pub fn is_active(&self, connection: ConnectionId) -> bool {
        self.inner
            .lock()
            .receivers
            .get(&connection)
            .copied()
            .unwrap_or(false)
    }

    pub fn connections(&self) -> Vec<ConnectionId> {
        self.inner.lock().receivers.keys().copied().collect()
    }

    /// Forget every connection, returning them
    pub fn clear(&self) -> Vec<ConnectionId> {
        let mut inner = self.inner.lock();
        inner.active = 0;
        inner.receivers.drain().map(|(id, _)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_sequence() {
        let table = ConnectionTable::new();
        let a = ConnectionId(1);
        let b = ConnectionId(2);

        table.on_event(a, ConnectionEvent::Opened);
        table.on_event(b, ConnectionEvent::Opened);
        assert_eq!(table.open_count(), 2);
        assert_eq!(table.active_count(), 0);

        table.on_event(a, ConnectionEvent::Activated);
        table.on_event(a, ConnectionEvent::Activated);
        assert_eq!(table.active_count(), 1);
        assert!(table.is_active(a));

        table.on_event(b, ConnectionEvent::Activated);
        table.on_event(a, ConnectionEvent::Deactivated);
        assert_eq!(table.active_count(), 1);
        assert!(!table.is_active(a));

        table.on_event(b, ConnectionEvent::Closed);
        assert_eq!(table.active_count(), 0);
        assert_eq!(table.open_count(), 1);
    }

    #[test]
    fn test_reopen_resets_receiver() {
        let table = ConnectionTable::new();
        let a = ConnectionId(1);
        table.on_event(a, ConnectionEvent::Activated);
        table.on_event(a, ConnectionEvent::Opened);
        assert_eq!(table.active_count(), 0);
        assert_eq!(table.open_count(), 1);

        table.on_event(a, ConnectionEvent::Closed);
        table.on_event(a, ConnectionEvent::Closed);
        assert_eq!(table.open_count(), 0);
        assert!(table.clear().is_empty());
    }
}
