//! Select-before-operate arbitration
//!
//! At most one live selection exists per (common address, IOA). A selection
//! is held by the pair (connection, originator address) and expires after the
//! configured timeout unless the holder selects again.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{IecSrvError, Result};
use crate::transport::ConnectionId;
use crate::types::TypeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub originator_address: u8,
    pub common_address: u16,
    pub ioa: u32,
    pub type_id: TypeId,
    pub connection: ConnectionId,
    pub created: Instant,
}

impl Selection {
    pub fn new(
        connection: ConnectionId,
        originator_address: u8,
        common_address: u16,
        ioa: u32,
        type_id: TypeId,
    ) -> Self {
        Self {
            originator_address,
            common_address,
            ioa,
            type_id,
            connection,
            created: Instant::now(),
        }
    }

    fn key(&self) -> (u16, u32) {
        (self.common_address, self.ioa)
    }

    fn same_holder(&self, other: &Selection) -> bool {
        self.connection == other.connection && self.originator_address == other.originator_address
    }
}

pub struct SelectionManager {
    timeout: Duration,
    entries: Mutex<FxHashMap<(u16, u32), Selection>>,
}

impl SelectionManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn is_expired(&self, selection: &Selection, now: Instant) -> bool {
        now.saturating_duration_since(selection.created) >= self.timeout
    }

    /// Acquire or refresh a selection
    ///
    /// Returns `false` when another holder owns a live selection of the point.
    /// Only selectable command types are accepted.
    pub fn add(&self, selection: Selection) -> Result<bool> {
        if !selection.type_id.is_selectable() {
            return Err(IecSrvError::invalid_argument(format!(
                "{} cannot be selected",
                selection.type_id
            )));
        }

        let now = Instant::now();
        let mut entries = self.entries.lock();
        let key = selection.key();
        if let Some(existing) = entries.get(&key) {
            if !self.is_expired(existing, now) && !existing.same_holder(&selection) {
                debug!(
                    "Selection of CA:{} IOA:{} held by OA {}, denied to OA {}",
                    key.0, key.1, existing.originator_address, selection.originator_address
                );
                return Ok(false);
            }
        }
        entries.insert(key, selection);
        Ok(true)
    }

    /// Install or refresh ownership without arbitration
    pub fn replace(&self, selection: Selection) {
        self.entries.lock().insert(selection.key(), selection);
    }

    /// Release a selection without the unselect side effect
    pub fn remove(&self, common_address: u16, ioa: u32) -> Option<Selection> {
        self.entries.lock().remove(&(common_address, ioa))
    }

    /// Release the selection only while it is still the one created at `created`
    ///
    /// A refresh by the holder stores a new creation instant, so a delayed
    /// release of a consumed selection leaves the refreshed one in place.
    pub fn remove_if(&self, common_address: u16, ioa: u32, created: Instant) -> Option<Selection> {
        let mut entries = self.entries.lock();
        let key = (common_address, ioa);
        if entries.get(&key)?.created != created {
            return None;
        }
        entries.remove(&key)
    }

    /// Creation instant of the stored selection of the point
    pub fn created_at(&self, common_address: u16, ioa: u32) -> Option<Instant> {
        self.entries
            .lock()
            .get(&(common_address, ioa))
            .map(|s| s.created)
    }

    /// Live selection of the point held by the same holder as `selection`
    pub fn exists(&self, selection: &Selection) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .get(&selection.key())
            .is_some_and(|s| !self.is_expired(s, now) && s.same_holder(selection))
    }

    /// Originator address of the live holder
    pub fn get(&self, common_address: u16, ioa: u32) -> Option<u8> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(&(common_address, ioa))
            .filter(|s| !self.is_expired(s, now))
            .map(|s| s.originator_address)
    }

    /// Drop expired selections and return them for unselect handling
    pub fn cleanup(&self) -> Vec<Selection> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.is_empty() {
            return Vec::new();
        }
        let expired: Vec<(u16, u32)> = entries
            .iter()
            .filter(|(_, s)| self.is_expired(s, now))
            .map(|(key, _)| *key)
            .collect();
        expired
            .into_iter()
            .filter_map(|key| entries.remove(&key))
            .collect()
    }

    /// Drop every selection held through `connection`
    pub fn remove_by_connection(&self, connection: ConnectionId) -> Vec<Selection> {
        let mut entries = self.entries.lock();
        let keys: Vec<(u16, u32)> = entries
            .iter()
            .filter(|(_, s)| s.connection == connection)
            .map(|(key, _)| *key)
            .collect();
        keys.into_iter()
            .filter_map(|key| entries.remove(&key))
            .collect()
    }

    /// Number of live selections
    pub fn active_count(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|s| !self.is_expired(s, now))
            .count()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use std::thread;

    use super::*;

    const A: ConnectionId = ConnectionId(1);
    const B: ConnectionId = ConnectionId(2);

    fn select(connection: ConnectionId, oa: u8, ioa: u32) -> Selection {
        Selection::new(connection, oa, 1, ioa, TypeId::C_SC_NA_1)
    }

    #[test]
    fn test_single_holder_per_point() {
        let manager = SelectionManager::new(Duration::from_secs(10));
        assert!(manager.add(select(A, 1, 100)).unwrap());
        assert!(!manager.add(select(B, 2, 100)).unwrap());
        // Same originator through another connection is another holder
        assert!(!manager.add(select(B, 1, 100)).unwrap());
        assert!(manager.add(select(B, 2, 101)).unwrap());

        assert_eq!(manager.get(1, 100), Some(1));
        assert!(manager.exists(&select(A, 1, 100)));
        assert!(!manager.exists(&select(B, 2, 100)));
        assert_eq!(manager.active_count(), 2);
    }

    #[test]
    fn test_holder_refreshes_selection() {
        let manager = SelectionManager::new(Duration::from_millis(200));
        assert!(manager.add(select(A, 1, 100)).unwrap());
        thread::sleep(Duration::from_millis(120));
        assert!(manager.add(select(A, 1, 100)).unwrap());
        thread::sleep(Duration::from_millis(120));
        assert!(manager.exists(&select(A, 1, 100)));
    }

    #[test]
    fn test_expired_selection_is_evicted() {
        let manager = SelectionManager::new(Duration::from_millis(30));
        assert!(manager.add(select(A, 1, 100)).unwrap());
        thread::sleep(Duration::from_millis(50));

        assert!(!manager.exists(&select(A, 1, 100)));
        assert_eq!(manager.get(1, 100), None);
        assert!(manager.add(select(B, 2, 100)).unwrap());
        assert_eq!(manager.get(1, 100), Some(2));
    }

    #[test]
    fn test_ineligible_types_are_rejected() {
        let manager = SelectionManager::new(Duration::from_secs(1));
        for type_id in [TypeId::C_BO_NA_1, TypeId::C_BO_TA_1, TypeId::M_SP_NA_1, TypeId::C_IC_NA_1]
        {
            let selection = Selection::new(A, 1, 1, 5, type_id);
            assert!(matches!(
                manager.add(selection),
                Err(IecSrvError::InvalidArgument(_))
            ));
        }
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_cleanup_returns_only_expired() {
        let manager = SelectionManager::new(Duration::from_millis(30));
        manager.add(select(A, 1, 100)).unwrap();
        thread::sleep(Duration::from_millis(50));
        manager.add(select(A, 1, 101)).unwrap();

        let expired = manager.cleanup();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].ioa, 100);
        assert!(manager.cleanup().is_empty());
        assert_eq!(manager.get(1, 101), Some(1));
    }

    #[test]
    fn test_remove_and_replace() {
        let manager = SelectionManager::new(Duration::from_secs(10));
        manager.add(select(A, 1, 100)).unwrap();
        manager.replace(select(B, 2, 100));
        assert_eq!(manager.get(1, 100), Some(2));

        assert!(manager.remove(1, 100).is_some());
        assert!(manager.remove(1, 100).is_none());
        assert!(manager.cleanup().is_empty());
    }

    #[test]
    fn test_remove_if_keeps_refreshed_selection() {
        let manager = SelectionManager::new(Duration::from_secs(10));
        manager.add(select(A, 1, 100)).unwrap();
        let consumed = manager.created_at(1, 100).unwrap();

        thread::sleep(Duration::from_millis(2));
        assert!(manager.add(select(A, 1, 100)).unwrap());
        assert!(manager.remove_if(1, 100, consumed).is_none());
        assert_eq!(manager.get(1, 100), Some(1));

        let refreshed = manager.created_at(1, 100).unwrap();
        assert!(manager.remove_if(1, 100, refreshed).is_some());
        assert_eq!(manager.get(1, 100), None);
        assert!(manager.remove_if(1, 100, refreshed).is_none());
    }

    #[test]
    fn test_remove_by_connection() {
        let manager = SelectionManager::new(Duration::from_secs(10));
        manager.add(select(A, 1, 100)).unwrap();
        manager.add(select(A, 1, 101)).unwrap();
        manager.add(select(B, 2, 102)).unwrap();

        let released = manager.remove_by_connection(A);
        assert_eq!(released.len(), 2);
        assert_eq!(manager.active_count(), 1);
        assert!(manager.add(select(B, 2, 100)).unwrap());
    }
}
