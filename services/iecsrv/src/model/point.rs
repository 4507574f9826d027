use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::message::{IncomingMessage, InformationObject};
use crate::types::{now_ms, CommandMode, Quality, ResponseState, TypeId};

/// Value, quality and update time of a point before a command was applied
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointSnapshot {
    pub value: f64,
    pub quality: Quality,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Command handler; receives the point after the command value was applied
pub type ReceiveHook =
    Arc<dyn Fn(&DataPoint, PointSnapshot, &IncomingMessage) -> ResponseState + Send + Sync>;

/// Read, auto-transmit and timer callbacks
pub type PointHook = Arc<dyn Fn(&DataPoint) + Send + Sync>;

/// Point definition used to create a [`DataPoint`] inside a station
#[derive(Debug, Clone)]
pub struct PointSpec {
    pub ioa: u32,
    pub type_id: TypeId,
    pub report_interval_ms: u64,
    pub timer_interval_ms: u64,
    pub command_mode: CommandMode,
    pub related_ioa: Option<u32>,
    pub related_auto_return: bool,
}

impl PointSpec {
    pub fn new(ioa: u32, type_id: TypeId) -> Self {
        Self {
            ioa,
            type_id,
            report_interval_ms: 0,
            timer_interval_ms: 0,
            command_mode: CommandMode::Direct,
            related_ioa: None,
            related_auto_return: false,
        }
    }

    pub fn report_ms(mut self, interval_ms: u64) -> Self {
        self.report_interval_ms = interval_ms;
        self
    }

    pub fn timer_ms(mut self, interval_ms: u64) -> Self {
        self.timer_interval_ms = interval_ms;
        self
    }

    pub fn command_mode(mut self, mode: CommandMode) -> Self {
        self.command_mode = mode;
        self
    }

    /// Link a monitoring point; with `auto_return` it is retransmitted after
    /// every successful command
    pub fn related(mut self, ioa: u32, auto_return: bool) -> Self {
        self.related_ioa = Some(ioa);
        self.related_auto_return = auto_return;
        self
    }

    pub(crate) fn build(self, common_address: u16) -> DataPoint {
        let now = now_ms();
        DataPoint {
            common_address,
            ioa: self.ioa,
            type_id: self.type_id,
            command_mode: self.command_mode,
            related_ioa: self.related_ioa,
            related_auto_return: self.related_auto_return,
            state: Mutex::new(PointState {
                value: 0.0,
                quality: Quality::default(),
                updated_at: None,
                report_interval_ms: self.report_interval_ms,
                reported_at_ms: now,
                timer_interval_ms: self.timer_interval_ms,
                timer_at_ms: now,
            }),
            hooks: RwLock::new(PointHooks::default()),
        }
    }
}

struct PointState {
    value: f64,
    quality: Quality,
    updated_at: Option<DateTime<Utc>>,
    report_interval_ms: u64,
    reported_at_ms: u64,
    timer_interval_ms: u64,
    timer_at_ms: u64,
}

#[derive(Default)]
struct PointHooks {
    on_receive: Option<ReceiveHook>,
    on_before_read: Option<PointHook>,
    on_before_auto_transmit: Option<PointHook>,
    on_timer: Option<PointHook>,
}

/// Monitoring or control point of a station
///
/// Hooks are cloned out of their lock before being called, so a hook may
/// freely read or update its own point.
pub struct DataPoint {
    common_address: u16,
    ioa: u32,
    type_id: TypeId,
    command_mode: CommandMode,
    related_ioa: Option<u32>,
    related_auto_return: bool,
    state: Mutex<PointState>,
    hooks: RwLock<PointHooks>,
}

impl DataPoint {
    pub fn common_address(&self) -> u16 {
        self.common_address
    }

    pub fn ioa(&self) -> u32 {
        self.ioa
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn command_mode(&self) -> CommandMode {
        self.command_mode
    }

    pub fn related_ioa(&self) -> Option<u32> {
        self.related_ioa
    }

    pub fn related_auto_return(&self) -> bool {
        self.related_auto_return
    }

    pub fn value(&self) -> f64 {
        self.state.lock().value
    }

    pub fn quality(&self) -> Quality {
        self.state.lock().quality
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().updated_at
    }

    pub fn snapshot(&self) -> PointSnapshot {
        let state = self.state.lock();
        PointSnapshot {
            value: state.value,
            quality: state.quality,
            updated_at: state.updated_at,
        }
    }

    pub fn set_value(&self, value: f64) {
        let mut state = self.state.lock();
        state.value = value;
        state.updated_at = Some(Utc::now());
    }

    pub fn set_quality(&self, quality: Quality) {
        self.state.lock().quality = quality;
    }

    pub fn report_interval_ms(&self) -> u64 {
        self.state.lock().report_interval_ms
    }

    pub fn set_report_interval_ms(&self, interval_ms: u64) {
        self.state.lock().report_interval_ms = interval_ms;
    }

    pub fn timer_interval_ms(&self) -> u64 {
        self.state.lock().timer_interval_ms
    }

    /// Next cyclic report deadline, `None` when cyclic reporting is disabled
    pub fn next_report_at_ms(&self) -> Option<u64> {
        let state = self.state.lock();
        (state.report_interval_ms > 0).then(|| state.reported_at_ms + state.report_interval_ms)
    }

    /// Next timer deadline, `None` without timer
    pub fn next_timer_at_ms(&self) -> Option<u64> {
        let state = self.state.lock();
        (state.timer_interval_ms > 0).then(|| state.timer_at_ms + state.timer_interval_ms)
    }

    pub fn mark_reported(&self, now_ms: u64) {
        self.state.lock().reported_at_ms = now_ms;
    }

    pub fn mark_timer(&self, now_ms: u64) {
        self.state.lock().timer_at_ms = now_ms;
    }

    /// Current value as an information object
    pub fn information_object(&self) -> InformationObject {
        let state = self.state.lock();
        let timestamp = if self.type_id.has_timestamp() {
            Some(state.updated_at.unwrap_or_else(Utc::now))
        } else {
            None
        };
        InformationObject::new(self.ioa, state.value)
            .with_quality(state.quality)
            .with_timestamp(timestamp)
    }

    // ------------------------------------------------------------------
    // Hooks
    // ------------------------------------------------------------------

    pub fn set_on_receive<F>(&self, hook: F)
    where
        F: Fn(&DataPoint, PointSnapshot, &IncomingMessage) -> ResponseState + Send + Sync + 'static,
    {
        self.hooks.write().on_receive = Some(Arc::new(hook));
    }

    pub fn set_on_before_read<F>(&self, hook: F)
    where
        F: Fn(&DataPoint) + Send + Sync + 'static,
    {
        self.hooks.write().on_before_read = Some(Arc::new(hook));
    }

    pub fn set_on_before_auto_transmit<F>(&self, hook: F)
    where
        F: Fn(&DataPoint) + Send + Sync + 'static,
    {
        self.hooks.write().on_before_auto_transmit = Some(Arc::new(hook));
    }

    pub fn set_on_timer<F>(&self, hook: F)
    where
        F: Fn(&DataPoint) + Send + Sync + 'static,
    {
        self.hooks.write().on_timer = Some(Arc::new(hook));
    }

    /// Apply a command and ask the receive hook for the outcome
    ///
    /// Without a hook the command is accepted.
    pub fn on_receive(&self, message: &IncomingMessage) -> ResponseState {
        let previous = {
            let mut state = self.state.lock();
            let previous = PointSnapshot {
                value: state.value,
                quality: state.quality,
                updated_at: state.updated_at,
            };
            state.value = message.value();
            state.updated_at = Some(message.timestamp().unwrap_or_else(Utc::now));
            previous
        };

        let hook = self.hooks.read().on_receive.clone();
        match hook {
            Some(hook) => {
                debug!("on_receive at IOA {}", self.ioa);
                hook(self, previous, message)
            },
            None => ResponseState::Success,
        }
    }

    pub fn on_before_read(&self) {
        let hook = self.hooks.read().on_before_read.clone();
        if let Some(hook) = hook {
            debug!("on_before_read at IOA {}", self.ioa);
            hook(self);
        }
    }

    pub fn on_before_auto_transmit(&self) {
        let hook = self.hooks.read().on_before_auto_transmit.clone();
        if let Some(hook) = hook {
            debug!("on_before_auto_transmit at IOA {}", self.ioa);
            hook(self);
        }
    }

    pub fn on_timer(&self) {
        let hook = self.hooks.read().on_timer.clone();
        if let Some(hook) = hook {
            debug!("on_timer at IOA {}", self.ioa);
            hook(self);
        }
    }
}

impl fmt::Debug for DataPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataPoint")
            .field("common_address", &self.common_address)
            .field("ioa", &self.ioa)
            .field("type_id", &self.type_id)
            .field("command_mode", &self.command_mode)
            .field("value", &self.value())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::message::RawAsdu;
    use crate::types::CauseOfTransmission;

    fn command(value: f64) -> IncomingMessage {
        let raw = RawAsdu::single(
            TypeId::C_SE_NC_1,
            CauseOfTransmission::Activation,
            1,
            InformationObject::new(20, value),
        );
        IncomingMessage::parse(raw).unwrap()
    }

    #[test]
    fn test_receive_without_hook_applies_value() {
        let point = PointSpec::new(20, TypeId::C_SE_NC_1).build(1);
        assert_eq!(point.on_receive(&command(42.5)), ResponseState::Success);
        assert_eq!(point.value(), 42.5);
        assert!(point.updated_at().is_some());
    }

    #[test]
    fn test_receive_hook_sees_previous_state() {
        let point = PointSpec::new(20, TypeId::C_SE_NC_1).build(1);
        point.set_value(1.0);
        point.set_on_receive(|p, previous, _| {
            assert_eq!(previous.value, 1.0);
            assert_eq!(p.value(), 7.0);
            ResponseState::Failure
        });
        assert_eq!(point.on_receive(&command(7.0)), ResponseState::Failure);
    }

    #[test]
    fn test_deadlines() {
        let point = PointSpec::new(1, TypeId::M_ME_NC_1).report_ms(1000).build(1);
        let next = point.next_report_at_ms().unwrap();
        point.mark_reported(next);
        assert_eq!(point.next_report_at_ms(), Some(next + 1000));
        assert_eq!(point.next_timer_at_ms(), None);

        let point = PointSpec::new(2, TypeId::M_SP_NA_1).build(1);
        assert_eq!(point.next_report_at_ms(), None);
    }

    #[test]
    fn test_information_object_timestamp_by_type() {
        let point = PointSpec::new(3, TypeId::M_SP_TB_1).build(1);
        assert!(point.information_object().timestamp.is_some());

        let point = PointSpec::new(4, TypeId::M_SP_NA_1).build(1);
        point.set_quality(Quality {
            invalid: true,
            ..Quality::default()
        });
        let object = point.information_object();
        assert!(object.timestamp.is_none());
        assert!(object.quality.invalid);
    }
}
