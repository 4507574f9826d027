//! Inbound message handling
//!
//! Entry points called by the transport on its own thread. Replies that
//! answer a frame (confirmations, terminations, negative mirrors) go straight
//! back to the sending connection.

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::{Server, ServerShared};
use crate::message::{IncomingMessage, RawAsdu};
use crate::model::{DataPoint, PointHandle, Station};
use crate::selection::Selection;
use crate::transport::{ConnectionEvent, ConnectionId};
use crate::types::{
    CauseOfTransmission, CommandMode, ResponseState, TypeId, UnexpectedMessageCause,
    GLOBAL_COMMON_ADDRESS, QCC_GENERAL, QOI_STATION, SELECTION_RELEASE_DELAY_MS,
};

/// Request counter qualifier bits (RQT) of a QCC
const QCC_RQT_MASK: u8 = 0x3F;

impl Server {
    /// Accept or refuse a new peer
    pub fn on_connection_request(&self, peer: &str) -> bool {
        let shared = &self.shared;
        let max = shared.options.max_open_connections;
        if max > 0 && shared.connections.open_count() >= max {
            warn!("Connection from {} refused: {} connections open", peer, max);
            return false;
        }
        shared.hooks.connect(peer)
    }

    pub fn on_connection_event(&self, connection: ConnectionId, event: ConnectionEvent) {
        let shared = &self.shared;
        shared.connections.on_event(connection, event);
        if event == ConnectionEvent::Closed {
            let released = shared.selections.remove_by_connection(connection);
            if !released.is_empty() {
                debug!("{} closed, released {} selections", connection, released.len());
            }
        }
        info!(
            "{} {:?}, active connections: {}",
            connection,
            event,
            shared.connections.active_count()
        );
    }

    /// Raw APDU observed by the transport; hooks run on the executor
    pub fn on_raw_message(&self, connection: ConnectionId, data: Bytes, sent: bool) {
        if self.shared.hooks.raw_hook(sent).is_none() {
            return;
        }
        self.shared.defer(-1, move |shared| {
            if let Some(hook) = shared.hooks.raw_hook(sent) {
                hook(connection, &data[..]);
            }
        });
    }

    /// Handle an inbound ASDU
    pub fn on_asdu(&self, connection: ConnectionId, asdu: RawAsdu) {
        let shared = &self.shared;
        if !shared.is_enabled() {
            debug!("Dropped ASDU from {}: server stopped", connection);
            return;
        }
        let Some(message) = shared.valid_message(connection, asdu) else {
            return;
        };
        debug!(
            "{} -> {} {} CA:{} IOA:{}",
            connection,
            message.type_id(),
            message.cot(),
            message.common_address(),
            message.ioa()
        );

        match message.type_id() {
            TypeId::C_IC_NA_1 => shared.handle_interrogation(connection, &message),
            TypeId::C_CI_NA_1 => shared.handle_counter_interrogation(connection, &message),
            TypeId::C_RD_NA_1 => shared.handle_read(connection, &message),
            TypeId::C_CS_NA_1 => shared.handle_clock_sync(connection, &message),
            _ => shared.handle_asdu(connection, &message),
        }
    }
}

impl ServerShared {
    /// Decode and check an inbound frame; rejected frames are answered and
    /// reported here
    fn valid_message(&self, connection: ConnectionId, raw: RawAsdu) -> Option<IncomingMessage> {
        let message = match IncomingMessage::parse(raw) {
            Ok(message) => message,
            Err(rejected) => {
                debug!("Rejected ASDU from {}: {}", connection, rejected.cause);
                self.unexpected(connection, &rejected.asdu, rejected.cause);
                return None;
            },
        };

        let type_id = message.type_id();
        let control = type_id.is_command()
            || matches!(
                type_id,
                TypeId::C_IC_NA_1 | TypeId::C_CI_NA_1 | TypeId::C_RD_NA_1 | TypeId::C_CS_NA_1
            );
        if control && !message.is_valid_cause() {
            debug!("Invalid cause {} for {}", message.cot(), type_id);
            if message.requires_confirmation() {
                self.send_confirmation(connection, &message, true);
            }
            self.unexpected(connection, message.raw(), UnexpectedMessageCause::InvalidCot);
            return None;
        }

        if !self.has_station(message.common_address()) {
            debug!("Unknown common address {}", message.common_address());
            if message.requires_confirmation() {
                self.send_confirmation(connection, &message, true);
            }
            self.unexpected(connection, message.raw(), UnexpectedMessageCause::UnknownCa);
            return None;
        }

        Some(message)
    }

    /// Mirror the frame with a negative cause and notify the hook
    fn unexpected(&self, connection: ConnectionId, asdu: &RawAsdu, cause: UnexpectedMessageCause) {
        if let Some(cot) = cause.negative_cot() {
            self.transport.send_raw(connection, &asdu.mirror(cot));
        }
        debug!("Unexpected message from {}: {}", connection, cause);
        self.hooks.unexpected_message(connection, asdu, cause);
    }

    /// Send `reply` once, or once per station with that station's common
    /// address when addressed globally
    fn reply(&self, connection: ConnectionId, mut reply: RawAsdu) {
        if reply.common_address == GLOBAL_COMMON_ADDRESS {
            for station in self.stations() {
                reply.common_address = station.common_address();
                self.transport.send_raw(connection, &reply);
            }
        } else {
            self.transport.send_raw(connection, &reply);
        }
    }

    fn send_confirmation(&self, connection: ConnectionId, message: &IncomingMessage, negative: bool) {
        self.reply(connection, message.confirmation(negative));
    }

    fn send_termination(&self, connection: ConnectionId, message: &IncomingMessage) {
        self.reply(connection, message.termination());
    }

    // ------------------------------------------------------------------
    // Interrogation, read and clock synchronisation
    // ------------------------------------------------------------------

    fn handle_interrogation(&self, connection: ConnectionId, message: &IncomingMessage) {
        if message.cot() == CauseOfTransmission::Deactivation {
            self.send_confirmation(connection, message, false);
            return;
        }
        if message.qualifier() != QOI_STATION {
            self.send_confirmation(connection, message, true);
            self.unexpected(connection, message.raw(), UnexpectedMessageCause::UnimplementedGroup);
            return;
        }

        self.send_confirmation(connection, message, false);
        self.send_interrogation_response(
            CauseOfTransmission::InterrogatedByStation,
            message.common_address(),
            Some(connection),
        );
        self.send_termination(connection, message);
    }

    fn handle_counter_interrogation(&self, connection: ConnectionId, message: &IncomingMessage) {
        if message.qualifier() & QCC_RQT_MASK != QCC_GENERAL {
            self.send_confirmation(connection, message, true);
            self.unexpected(connection, message.raw(), UnexpectedMessageCause::UnimplementedGroup);
            return;
        }

        self.send_confirmation(connection, message, false);
        self.send_interrogation_response(
            CauseOfTransmission::RequestedByGeneralCounter,
            message.common_address(),
            Some(connection),
        );
        self.send_termination(connection, message);
    }

    /// Answer a read command with the point's current value
    fn handle_read(&self, connection: ConnectionId, message: &IncomingMessage) {
        let cause = match self.get_station(message.common_address()) {
            None => Some(UnexpectedMessageCause::UnknownCa),
            Some(station) => match station.get_point(message.ioa()) {
                None => Some(UnexpectedMessageCause::UnknownIoa),
                Some(point) if !point.type_id().is_readable() => {
                    Some(UnexpectedMessageCause::InvalidTypeId)
                },
                Some(point) => {
                    point.on_before_read();
                    if let Err(e) =
                        self.transmit(&point, CauseOfTransmission::Request, Some(connection))
                    {
                        warn!("Read response for IOA {} failed: {}", point.ioa(), e);
                    }
                    None
                },
            },
        };
        if let Some(cause) = cause {
            self.unexpected(connection, message.raw(), cause);
        }
    }

    fn handle_clock_sync(&self, connection: ConnectionId, message: &IncomingMessage) {
        let state = match message.timestamp() {
            Some(time) => {
                let peer = self.transport.peer_address(connection).unwrap_or_default();
                debug!("Clock synchronisation from {}: {}", connection, time);
                self.hooks.clock_sync(&peer, time)
            },
            None => ResponseState::Failure,
        };
        if state != ResponseState::None && message.requires_confirmation() {
            self.send_confirmation(connection, message, state == ResponseState::Failure);
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn handle_asdu(&self, connection: ConnectionId, message: &IncomingMessage) {
        let mut state = ResponseState::Failure;
        let mut cause = None;
        let mut related: Option<PointHandle> = None;
        let mut require_termination = false;

        if !message.type_id().is_command() {
            cause = Some(UnexpectedMessageCause::InvalidTypeId);
        } else if let Some(station) = self.get_station(message.common_address()) {
            match station.get_point(message.ioa()) {
                None => cause = Some(UnexpectedMessageCause::UnknownIoa),
                Some(point) if point.type_id() != message.type_id() => {
                    cause = Some(UnexpectedMessageCause::MismatchedTypeId);
                },
                Some(point) => {
                    state = self.handle_command(connection, &point, message);
                    if state == ResponseState::Success
                        && message.cot() == CauseOfTransmission::Activation
                        && !message.is_select_command()
                    {
                        require_termination =
                            point.command_mode() == CommandMode::SelectAndExecute;
                        related = Self::auto_return_target(&station, &point);
                    }
                },
            }
        } else {
            cause = Some(UnexpectedMessageCause::UnknownCa);
        }

        if state != ResponseState::None && message.requires_confirmation() {
            self.send_confirmation(connection, message, state == ResponseState::Failure);
        }

        if require_termination {
            self.send_termination(connection, message);
            let (ca, ioa) = (message.common_address(), message.ioa());
            if let Some(created) = self.selections.created_at(ca, ioa) {
                // Release only the consumed selection; a re-select in between keeps its hold
                self.defer(SELECTION_RELEASE_DELAY_MS, move |shared| {
                    shared.selections.remove_if(ca, ioa, created);
                });
            }
        }

        if let Some(cause) = cause {
            self.unexpected(connection, message.raw(), cause);
        }

        if let Some(handle) = related {
            self.defer(0, move |shared| {
                let Some(point) = shared.registry.get(handle) else {
                    return;
                };
                if let Err(e) = shared.transmit(&point, CauseOfTransmission::ReturnInfoRemote, None)
                {
                    warn!("Auto return of IOA {} failed: {}", point.ioa(), e);
                }
            });
        }
    }

    /// Arbitrate a command against the point's command mode
    fn handle_command(
        &self,
        connection: ConnectionId,
        point: &DataPoint,
        message: &IncomingMessage,
    ) -> ResponseState {
        let selection = Selection::new(
            connection,
            message.originator_address(),
            message.common_address(),
            message.ioa(),
            message.type_id(),
        );

        if message.cot() == CauseOfTransmission::Deactivation {
            if self.selections.exists(&selection) {
                self.selections.remove(selection.common_address, selection.ioa);
                debug!("Selection of IOA {} released by deactivation", selection.ioa);
                return ResponseState::Success;
            }
            return ResponseState::Failure;
        }

        match (point.command_mode(), message.is_select_command()) {
            (CommandMode::Direct, true) => {
                debug!("Select on direct command point {}", point.ioa());
                ResponseState::Failure
            },
            (CommandMode::SelectAndExecute, true) => match self.selections.add(selection) {
                Ok(true) => ResponseState::Success,
                Ok(false) => ResponseState::Failure,
                Err(e) => {
                    warn!("Select on IOA {} rejected: {}", point.ioa(), e);
                    ResponseState::Failure
                },
            },
            (CommandMode::SelectAndExecute, false) => {
                if self.selections.exists(&selection) {
                    point.on_receive(message)
                } else {
                    debug!(
                        "Execute on IOA {} without selection by OA {}",
                        point.ioa(),
                        selection.originator_address
                    );
                    ResponseState::Failure
                }
            },
            (CommandMode::Direct, false) => point.on_receive(message),
        }
    }

    fn auto_return_target(station: &Station, point: &DataPoint) -> Option<PointHandle> {
        if !point.related_auto_return() {
            return None;
        }
        point.related_ioa().and_then(|ioa| station.handle(ioa))
    }
}
