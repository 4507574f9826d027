//! Grouping of homogeneous monitoring points into transmission units
//!
//! A [`Batch`] holds point handles, never the points themselves. Points
//! removed from their station silently drop out of the batch.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::{IecSrvError, Result};
use crate::message::Asdu;
use crate::model::{DataPoint, PointHandle, PointRegistry};
use crate::types::{CauseOfTransmission, TypeId};

#[derive(Default)]
struct Members {
    type_id: Option<TypeId>,
    common_address: Option<u16>,
    points: BTreeMap<u32, PointHandle>,
}

pub struct Batch {
    registry: Arc<PointRegistry>,
    cot: CauseOfTransmission,
    test: bool,
    negative: bool,
    members: Mutex<Members>,
}

impl Batch {
    pub fn new(registry: Arc<PointRegistry>, cot: CauseOfTransmission) -> Self {
        Self {
            registry,
            cot,
            test: false,
            negative: false,
            members: Mutex::new(Members::default()),
        }
    }

    pub fn with_test(mut self, test: bool) -> Self {
        self.test = test;
        self
    }

    pub fn with_negative(mut self, negative: bool) -> Self {
        self.negative = negative;
        self
    }

    pub fn cot(&self) -> CauseOfTransmission {
        self.cot
    }

    pub fn is_test(&self) -> bool {
        self.test
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Type fixed by the first point added
    pub fn type_id(&self) -> Option<TypeId> {
        self.members.lock().type_id
    }

    /// Station fixed by the first point added
    pub fn common_address(&self) -> Option<u16> {
        self.members.lock().common_address
    }

    /// Add a monitoring point
    ///
    /// The first point fixes type and station. A rejected point leaves the
    /// batch unchanged.
    pub fn add_point(&self, handle: PointHandle) -> Result<()> {
        let point = self
            .registry
            .get(handle)
            .ok_or_else(|| IecSrvError::invalid_argument("point no longer exists"))?;
        if !point.type_id().is_monitoring() {
            return Err(IecSrvError::invalid_argument(format!(
                "{} at IOA {} is not a monitoring point",
                point.type_id(),
                point.ioa()
            )));
        }

        let mut members = self.members.lock();
        if let Some(type_id) = members.type_id {
            if type_id != point.type_id() {
                return Err(IecSrvError::invalid_argument(format!(
                    "batch holds {}, got {}",
                    type_id,
                    point.type_id()
                )));
            }
        }
        if let Some(ca) = members.common_address {
            if ca != point.common_address() {
                return Err(IecSrvError::invalid_argument(format!(
                    "batch holds station {}, got {}",
                    ca,
                    point.common_address()
                )));
            }
        }
        if let Some(existing) = members.points.get(&point.ioa()) {
            if self.registry.contains(*existing) {
                return Err(IecSrvError::invalid_argument(format!(
                    "IOA {} already in batch",
                    point.ioa()
                )));
            }
        }

        members.type_id = Some(point.type_id());
        members.common_address = Some(point.common_address());
        members.points.insert(point.ioa(), handle);
        Ok(())
    }

    /// Live member points in ascending IOA order
    pub fn points(&self) -> Vec<Arc<DataPoint>> {
        let handles: Vec<PointHandle> = self.members.lock().points.values().copied().collect();
        handles
            .into_iter()
            .filter_map(|h| self.registry.get(h))
            .collect()
    }

    fn live_ioas(&self) -> Vec<u32> {
        self.members
            .lock()
            .points
            .iter()
            .filter(|(_, h)| self.registry.contains(**h))
            .map(|(ioa, _)| *ioa)
            .collect()
    }

    pub fn has_points(&self) -> bool {
        self.number_of_objects() > 0
    }

    pub fn number_of_objects(&self) -> usize {
        self.live_ioas().len()
    }

    /// Live IOAs form one contiguous ascending run
    pub fn is_sequence(&self) -> bool {
        self.live_ioas().windows(2).all(|w| w[1] == w[0] + 1)
    }

    /// Encode live members into as many ASDUs as the size limit requires
    pub fn build_asdus(&self, originator_address: u8) -> Vec<Asdu> {
        let (Some(type_id), Some(ca)) = (self.type_id(), self.common_address()) else {
            return Vec::new();
        };
        let points = self.points();
        if points.is_empty() {
            return Vec::new();
        }
        let sequence = points.len() > 1 && self.is_sequence();
        let fresh = || {
            Asdu::new(type_id, self.cot, ca)
                .with_originator(originator_address)
                .with_test(self.test)
                .with_negative(self.negative)
                .with_sequence(sequence)
        };

        let mut asdus = Vec::new();
        let mut asdu = fresh();
        for point in points {
            let object = point.information_object();
            if asdu.try_add_object(object.clone()) {
                continue;
            }
            asdus.push(std::mem::replace(&mut asdu, fresh()));
            if !asdu.try_add_object(object) {
                warn!(
                    "Dropped {} at IOA {}: does not fit into an empty ASDU",
                    type_id,
                    point.ioa()
                );
            }
        }
        if !asdu.is_empty() {
            asdus.push(asdu);
        }
        asdus
    }
}
