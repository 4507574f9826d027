//! Outgoing transmission: single points, batches, interrogation responses
//! and the periodic duties

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::{Server, ServerShared};
use crate::batch::Batch;
use crate::error::{IecSrvError, Result};
use crate::message::{Asdu, InformationObject};
use crate::model::DataPoint;
use crate::selection::Selection;
use crate::transport::ConnectionId;
use crate::types::{now_ms, CauseOfTransmission, TypeId, GLOBAL_COMMON_ADDRESS};

impl Server {
    /// Send the current value of a point
    ///
    /// Monitoring points report their value; command points confirm a
    /// previous command lazily (e.g. with activation confirmation).
    pub fn transmit(&self, point: &DataPoint, cot: CauseOfTransmission) -> Result<bool> {
        self.shared.transmit(point, cot, None)
    }

    /// Send a frame; `None` queues it for all active connections
    ///
    /// Periodic and spontaneous frames are always queued. Returns `false`
    /// when the server is stopped or no connection is active.
    pub fn send(&self, asdu: Asdu, connection: Option<ConnectionId>) -> bool {
        self.shared.send(asdu, connection)
    }

    pub fn send_batch(&self, batch: &Batch, connection: Option<ConnectionId>) -> bool {
        self.shared.send_batch(batch, connection) > 0
    }

    /// Send the monitoring points addressed by `common_address`, grouped per
    /// station and type; returns the number of frames sent
    pub fn send_interrogation_response(
        &self,
        cot: CauseOfTransmission,
        common_address: u16,
        connection: Option<ConnectionId>,
    ) -> usize {
        self.shared
            .send_interrogation_response(cot, common_address, connection)
    }
}

impl ServerShared {
    fn can_send(&self) -> bool {
        self.is_enabled() && self.connections.active_count() > 0
    }

    pub(super) fn transmit(
        &self,
        point: &DataPoint,
        cot: CauseOfTransmission,
        connection: Option<ConnectionId>,
    ) -> Result<bool> {
        let type_id = point.type_id();
        if !type_id.is_monitoring() && !type_id.is_command() {
            return Err(IecSrvError::invalid_argument(format!(
                "cannot transmit {}",
                type_id
            )));
        }
        let mut asdu = Asdu::new(type_id, cot, point.common_address());
        asdu.try_add_object(point.information_object());
        Ok(self.send(asdu, connection))
    }

    pub(super) fn send(&self, mut asdu: Asdu, connection: Option<ConnectionId>) -> bool {
        if !self.can_send() {
            return false;
        }
        if let Some(oa) = connection.and_then(|c| self.transport.originator_address(c)) {
            asdu.originator_address = oa;
        }
        self.deliver(&asdu, connection);
        debug!(
            "Sent {} {} CA:{} objects:{}",
            asdu.type_id,
            asdu.cot,
            asdu.common_address,
            asdu.len()
        );
        true
    }

    fn deliver(&self, asdu: &Asdu, connection: Option<ConnectionId>) {
        match connection {
            Some(connection) if !asdu.cot.is_low_priority() => {
                self.transport.send(connection, asdu);
            },
            _ => self.transport.enqueue(asdu),
        }
    }

    /// Returns the number of frames delivered
    pub(super) fn send_batch(&self, batch: &Batch, connection: Option<ConnectionId>) -> usize {
        if !self.can_send() || !batch.has_points() {
            return 0;
        }
        let oa = connection
            .and_then(|c| self.transport.originator_address(c))
            .unwrap_or(0);
        let asdus = batch.build_asdus(oa);
        for asdu in &asdus {
            self.deliver(asdu, connection);
        }
        asdus.len()
    }

    pub(super) fn send_interrogation_response(
        &self,
        cot: CauseOfTransmission,
        common_address: u16,
        connection: Option<ConnectionId>,
    ) -> usize {
        if !self.can_send() {
            return 0;
        }

        let now = now_ms();
        let mut frames = 0;
        for station in self.addressed_stations(common_address) {
            // One batch set per station, flushed before the next station
            let mut groups: BTreeMap<TypeId, Batch> = BTreeMap::new();

            for (ioa, handle) in station.handles() {
                let Some(point) = self.registry.get(handle) else {
                    continue;
                };
                let type_id = point.type_id();
                match cot {
                    CauseOfTransmission::Periodic => {
                        if !type_id.is_monitoring() {
                            continue;
                        }
                        match point.next_report_at_ms() {
                            Some(next) if next <= now => {},
                            _ => continue,
                        }
                        point.on_before_auto_transmit();
                        point.mark_reported(now);
                    },
                    CauseOfTransmission::RequestedByGeneralCounter => {
                        if !type_id.is_counter() {
                            continue;
                        }
                        point.on_before_read();
                    },
                    _ => {
                        if !type_id.is_readable() {
                            continue;
                        }
                        point.on_before_read();
                    },
                }

                let batch = groups
                    .entry(type_id)
                    .or_insert_with(|| Batch::new(self.registry.clone(), cot));
                if let Err(e) = batch.add_point(handle) {
                    warn!("Skipped IOA {} in interrogation response: {}", ioa, e);
                }
            }

            for batch in groups.values() {
                frames += self.send_batch(batch, connection);
            }
        }
        frames
    }

    /// Periodic duty: cyclic reports of every station
    pub(super) fn send_periodic(&self) {
        if self.connections.active_count() == 0 {
            return;
        }
        let frames =
            self.send_interrogation_response(CauseOfTransmission::Periodic, GLOBAL_COMMON_ADDRESS, None);
        if frames > 0 {
            debug!("Periodic transmission: {} frames", frames);
        }
    }

    /// Periodic duty: expire selections, then dispatch due point timers
    pub(super) fn sweep(&self) {
        for selection in self.selections.cleanup() {
            debug!(
                "Selection of CA:{} IOA:{} by OA {} expired",
                selection.common_address, selection.ioa, selection.originator_address
            );
            self.defer(-1, move |shared| shared.send_unselect(&selection));
        }

        let now = now_ms();
        for station in self.stations() {
            for (_, handle) in station.handles() {
                let Some(point) = self.registry.get(handle) else {
                    continue;
                };
                match point.next_timer_at_ms() {
                    Some(next) if next <= now => {},
                    _ => continue,
                }
                point.mark_timer(now);
                self.defer(-1, move |shared| {
                    if let Some(point) = shared.registry.get(handle) {
                        point.on_timer();
                    }
                });
            }
        }
    }

    /// Activation termination for a selection that was never executed
    fn send_unselect(&self, selection: &Selection) {
        let value = self
            .get_station(selection.common_address)
            .and_then(|s| s.get_point(selection.ioa))
            .map_or(0.0, |p| p.value());
        let mut asdu = Asdu::new(
            selection.type_id,
            CauseOfTransmission::ActivationTermination,
            selection.common_address,
        )
        .with_originator(selection.originator_address);
        asdu.try_add_object(InformationObject::new(selection.ioa, value).with_select(true));
        self.transport.send(selection.connection, &asdu);
    }
}
