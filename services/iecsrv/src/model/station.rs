use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::{DataPoint, PointHandle, PointRegistry, PointSpec};
use crate::error::{IecSrvError, Result};
use crate::types::{CommandMode, MAX_INFORMATION_OBJECT_ADDRESS};

/// Station identified by its common address
///
/// Points are owned by the shared registry; dropping the station removes them.
pub struct Station {
    common_address: u16,
    registry: Arc<PointRegistry>,
    points: RwLock<BTreeMap<u32, PointHandle>>,
}

impl Station {
    pub(crate) fn new(common_address: u16, registry: Arc<PointRegistry>) -> Self {
        Self {
            common_address,
            registry,
            points: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn common_address(&self) -> u16 {
        self.common_address
    }

    pub fn add_point(&self, spec: PointSpec) -> Result<Arc<DataPoint>> {
        if spec.ioa > MAX_INFORMATION_OBJECT_ADDRESS {
            return Err(IecSrvError::out_of_range(format!(
                "IOA {} exceeds {}",
                spec.ioa, MAX_INFORMATION_OBJECT_ADDRESS
            )));
        }
        if !spec.type_id.is_monitoring() && !spec.type_id.is_command() {
            return Err(IecSrvError::invalid_argument(format!(
                "{} is not a point type",
                spec.type_id
            )));
        }
        if spec.type_id.is_command() && spec.report_interval_ms > 0 {
            return Err(IecSrvError::invalid_argument(format!(
                "cyclic report on command point {}",
                spec.ioa
            )));
        }
        if spec.command_mode == CommandMode::SelectAndExecute && !spec.type_id.is_selectable() {
            return Err(IecSrvError::invalid_argument(format!(
                "{} does not support select-and-execute",
                spec.type_id
            )));
        }
        if spec.related_auto_return && spec.related_ioa.is_none() {
            return Err(IecSrvError::invalid_argument(format!(
                "auto return on point {} without related IOA",
                spec.ioa
            )));
        }

        let mut points = self.points.write();
        if points.contains_key(&spec.ioa) {
            return Err(IecSrvError::PointExists {
                ca: self.common_address,
                ioa: spec.ioa,
            });
        }
        let ioa = spec.ioa;
        let handle = self.registry.insert(spec.build(self.common_address));
        points.insert(ioa, handle);
        debug!("Station {} added point {}", self.common_address, ioa);

        self.registry
            .get(handle)
            .ok_or_else(|| IecSrvError::invalid_argument("point removed concurrently"))
    }

    pub fn remove_point(&self, ioa: u32) -> bool {
        let handle = self.points.write().remove(&ioa);
        match handle {
            Some(handle) => self.registry.remove(handle).is_some(),
            None => false,
        }
    }

    pub fn get_point(&self, ioa: u32) -> Option<Arc<DataPoint>> {
        let handle = self.handle(ioa)?;
        self.registry.get(handle)
    }

    pub fn handle(&self, ioa: u32) -> Option<PointHandle> {
        self.points.read().get(&ioa).copied()
    }

    pub fn has_point(&self, ioa: u32) -> bool {
        self.points.read().contains_key(&ioa)
    }

    /// Live points in ascending IOA order
    pub fn points(&self) -> Vec<Arc<DataPoint>> {
        let handles: Vec<PointHandle> = self.points.read().values().copied().collect();
        handles
            .into_iter()
            .filter_map(|h| self.registry.get(h))
            .collect()
    }

    pub fn handles(&self) -> Vec<(u32, PointHandle)> {
        self.points
            .read()
            .iter()
            .map(|(ioa, handle)| (*ioa, *handle))
            .collect()
    }

    /// Remove every point from the registry
    pub(crate) fn clear(&self) {
        let handles = std::mem::take(&mut *self.points.write());
        for handle in handles.values() {
            self.registry.remove(*handle);
        }
    }

    pub fn len(&self) -> usize {
        self.points.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Station {
    fn drop(&mut self) {
        for handle in self.points.get_mut().values() {
            self.registry.remove(*handle);
        }
    }
}

impl fmt::Debug for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Station")
            .field("common_address", &self.common_address)
            .field("points", &self.len())
            .finish()
    }
}
