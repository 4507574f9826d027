//! Shared fixture for server integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use iecsrv::{
    CauseOfTransmission, ConnectionEvent, ConnectionId, InformationObject, RawAsdu,
    RecordingTransport, Server, ServerOptions, TypeId,
};

pub const A: ConnectionId = ConnectionId(1);
pub const B: ConnectionId = ConnectionId(2);
pub const OA_A: u8 = 1;
pub const OA_B: u8 = 2;

pub struct Fixture {
    pub server: Server,
    pub transport: Arc<RecordingTransport>,
}

impl Fixture {
    /// Running server with connections A and B opened and activated
    pub fn new(select_timeout_ms: u64) -> Self {
        let transport = Arc::new(RecordingTransport::new());
        let options = ServerOptions {
            tick_rate_ms: 50,
            select_timeout_ms,
            max_open_connections: 0,
        };
        let server = Server::new(options, transport.clone()).unwrap();
        server.start().unwrap();

        for (connection, oa) in [(A, OA_A), (B, OA_B)] {
            transport.set_originator_address(connection, oa);
            transport.set_peer_address(connection, format!("127.0.0.1:{}", 40000 + oa as u16));
            server.on_connection_event(connection, ConnectionEvent::Opened);
            server.on_connection_event(connection, ConnectionEvent::Activated);
        }
        Self { server, transport }
    }

    /// `(cot, negative)` of every reply sent to `connection`
    pub fn replies(&self, connection: ConnectionId) -> Vec<(u8, bool)> {
        self.transport
            .raw(connection)
            .iter()
            .map(|r| (r.cot_code, r.negative))
            .collect()
    }
}

pub fn command(
    type_id: TypeId,
    cot: CauseOfTransmission,
    oa: u8,
    ca: u16,
    ioa: u32,
    value: f64,
    select: bool,
) -> RawAsdu {
    RawAsdu::single(
        type_id,
        cot,
        ca,
        InformationObject::new(ioa, value).with_select(select),
    )
    .with_originator(oa)
}

pub fn single_command(oa: u8, ioa: u32, value: f64, select: bool) -> RawAsdu {
    command(
        TypeId::C_SC_NA_1,
        CauseOfTransmission::Activation,
        oa,
        1,
        ioa,
        value,
        select,
    )
}

pub fn interrogation(ca: u16, qualifier: u8) -> RawAsdu {
    RawAsdu::single(
        TypeId::C_IC_NA_1,
        CauseOfTransmission::Activation,
        ca,
        InformationObject::new(0, 0.0).with_qualifier(qualifier),
    )
}

/// Poll until `condition` holds or two seconds pass
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
