//! Event notification hooks of the server

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::Server;
use crate::message::RawAsdu;
use crate::transport::ConnectionId;
use crate::types::{ResponseState, UnexpectedMessageCause};

/// Decides whether a peer (`ip:port`) may connect
pub type ConnectHook = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Handles a clock synchronisation command from a peer
pub type ClockSyncHook = Arc<dyn Fn(&str, DateTime<Utc>) -> ResponseState + Send + Sync>;

pub type UnexpectedMessageHook =
    Arc<dyn Fn(ConnectionId, &RawAsdu, UnexpectedMessageCause) + Send + Sync>;

/// Observes raw APDUs received from or sent to a connection
pub type RawMessageHook = Arc<dyn Fn(ConnectionId, &[u8]) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ServerHooks {
    on_connect: RwLock<Option<ConnectHook>>,
    on_clock_sync: RwLock<Option<ClockSyncHook>>,
    on_unexpected_message: RwLock<Option<UnexpectedMessageHook>>,
    on_receive_raw: RwLock<Option<RawMessageHook>>,
    on_send_raw: RwLock<Option<RawMessageHook>>,
}

impl ServerHooks {
    pub(crate) fn connect(&self, peer: &str) -> bool {
        let hook = self.on_connect.read().clone();
        match hook {
            Some(hook) => hook(peer),
            None => true,
        }
    }

    pub(crate) fn clock_sync(&self, peer: &str, time: DateTime<Utc>) -> ResponseState {
        let hook = self.on_clock_sync.read().clone();
        match hook {
            Some(hook) => hook(peer, time),
            None => ResponseState::Success,
        }
    }

    pub(crate) fn unexpected_message(
        &self,
        connection: ConnectionId,
        asdu: &RawAsdu,
        cause: UnexpectedMessageCause,
    ) {
        let hook = self.on_unexpected_message.read().clone();
        if let Some(hook) = hook {
            debug!("on_unexpected_message: {}", cause);
            hook(connection, asdu, cause);
        }
    }

    pub(crate) fn raw_hook(&self, sent: bool) -> Option<RawMessageHook> {
        if sent {
            self.on_send_raw.read().clone()
        } else {
            self.on_receive_raw.read().clone()
        }
    }
}

impl Server {
    pub fn set_on_connect<F>(&self, hook: F)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        *self.shared.hooks.on_connect.write() = Some(Arc::new(hook));
    }

    /// Without a hook clock synchronisation is confirmed positively
    pub fn set_on_clock_sync<F>(&self, hook: F)
    where
        F: Fn(&str, DateTime<Utc>) -> ResponseState + Send + Sync + 'static,
    {
        *self.shared.hooks.on_clock_sync.write() = Some(Arc::new(hook));
    }

    pub fn set_on_unexpected_message<F>(&self, hook: F)
    where
        F: Fn(ConnectionId, &RawAsdu, UnexpectedMessageCause) + Send + Sync + 'static,
    {
        *self.shared.hooks.on_unexpected_message.write() = Some(Arc::new(hook));
    }

    pub fn set_on_receive_raw<F>(&self, hook: F)
    where
        F: Fn(ConnectionId, &[u8]) + Send + Sync + 'static,
    {
        *self.shared.hooks.on_receive_raw.write() = Some(Arc::new(hook));
    }

    pub fn set_on_send_raw<F>(&self, hook: F)
    where
        F: Fn(ConnectionId, &[u8]) + Send + Sync + 'static,
    {
        *self.shared.hooks.on_send_raw.write() = Some(Arc::new(hook));
    }
}
