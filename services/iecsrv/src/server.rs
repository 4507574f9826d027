//! Server orchestrator
//!
//! Composes the point model, [`SelectionManager`], [`Batch`] and the task
//! executor into the behaviour of an IEC 60870-5-104 controlled station:
//!
//! - inbound frames are validated and dispatched on the transport's thread
//!   ([`Server::on_asdu`])
//! - follow-up work (selection release, auto-return, raw message hooks, point
//!   timers) runs on the executor's worker thread
//! - two periodic duties run at the tick rate: inventory transmission and the
//!   selection sweep with point timers
//!
//! Scheduled work captures a `Weak` reference to the server state and
//! becomes a no-op once the server is gone.

mod handlers;
mod hooks;
mod outbound;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use voltage_tasks::{PeriodicHandle, TaskExecutor, MIN_PERIODIC_INTERVAL_MS};

pub use hooks::{ClockSyncHook, ConnectHook, RawMessageHook, UnexpectedMessageHook};

use crate::batch::Batch;
use crate::connection::ConnectionTable;
use crate::error::{IecSrvError, Result};
use crate::model::{PointRegistry, Station};
use crate::selection::SelectionManager;
use crate::transport::Transport;
use crate::types::{CauseOfTransmission, DEFAULT_SELECT_TIMEOUT_MS, GLOBAL_COMMON_ADDRESS};
use hooks::ServerHooks;

/// Runtime parameters of a [`Server`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Interval of the periodic duties, at least 50 ms
    pub tick_rate_ms: u64,
    pub select_timeout_ms: u64,
    /// 0 = unlimited
    pub max_open_connections: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            tick_rate_ms: 100,
            select_timeout_ms: DEFAULT_SELECT_TIMEOUT_MS,
            max_open_connections: 0,
        }
    }
}

pub(crate) struct ServerShared {
    me: Weak<ServerShared>,
    options: ServerOptions,
    transport: Arc<dyn Transport>,
    executor: TaskExecutor,
    registry: Arc<PointRegistry>,
    stations: RwLock<BTreeMap<u16, Arc<Station>>>,
    selections: SelectionManager,
    connections: ConnectionTable,
    hooks: ServerHooks,
    enabled: AtomicBool,
    duties: Mutex<Vec<PeriodicHandle>>,
}

pub struct Server {
    shared: Arc<ServerShared>,
}

impl Server {
    pub fn new(options: ServerOptions, transport: Arc<dyn Transport>) -> Result<Self> {
        if options.tick_rate_ms < MIN_PERIODIC_INTERVAL_MS {
            return Err(IecSrvError::out_of_range(format!(
                "tick rate {} ms below minimum {} ms",
                options.tick_rate_ms, MIN_PERIODIC_INTERVAL_MS
            )));
        }
        if options.select_timeout_ms == 0 {
            return Err(IecSrvError::invalid_argument("select timeout must be positive"));
        }

        let executor = TaskExecutor::new()?;
        let shared = Arc::new_cyclic(|me| ServerShared {
            me: me.clone(),
            selections: SelectionManager::new(Duration::from_millis(options.select_timeout_ms)),
            options,
            transport,
            executor,
            registry: Arc::new(PointRegistry::new()),
            stations: RwLock::new(BTreeMap::new()),
            connections: ConnectionTable::new(),
            hooks: ServerHooks::default(),
            enabled: AtomicBool::new(false),
            duties: Mutex::new(Vec::new()),
        });
        Ok(Self { shared })
    }

    pub fn options(&self) -> &ServerOptions {
        &self.shared.options
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Enable message handling and register the periodic duties
    pub fn start(&self) -> Result<()> {
        let shared = &self.shared;
        if shared
            .enabled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Server already running");
            return Ok(());
        }

        let tick = shared.options.tick_rate_ms;
        let duties = self.schedule_duty(tick, ServerShared::send_periodic).and_then(|inventory| {
            self.schedule_duty(tick, ServerShared::sweep)
                .map(|sweep| [inventory.clone(), sweep])
                .inspect_err(|_| inventory.cancel())
        });
        match duties {
            Ok(handles) => {
                shared.duties.lock().extend(handles);
                info!("Server started, tick rate {} ms", tick);
                Ok(())
            },
            Err(e) => {
                shared.enabled.store(false, Ordering::SeqCst);
                Err(e)
            },
        }
    }

    fn schedule_duty(&self, interval_ms: u64, duty: fn(&ServerShared)) -> Result<PeriodicHandle> {
        let weak = self.shared.me.clone();
        let handle = self.shared.executor.add_periodic(
            move || {
                if let Some(shared) = weak.upgrade() {
                    duty(&shared);
                }
            },
            interval_ms,
        )?;
        Ok(handle)
    }

    /// Cancel periodic duties, close every connection and drop selections
    ///
    /// The executor keeps running; the server can be started again.
    pub fn stop(&self) {
        let shared = &self.shared;
        if shared
            .enabled
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Server already stopped");
            return;
        }

        for handle in shared.duties.lock().drain(..) {
            handle.cancel();
        }
        for connection in shared.connections.clear() {
            shared.transport.close(connection);
        }
        shared.selections.clear();
        info!("Server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_enabled()
    }

    // ------------------------------------------------------------------
    // Stations
    // ------------------------------------------------------------------

    pub fn add_station(&self, common_address: u16) -> Result<Arc<Station>> {
        if common_address == GLOBAL_COMMON_ADDRESS {
            return Err(IecSrvError::invalid_argument(format!(
                "{} is the global common address",
                GLOBAL_COMMON_ADDRESS
            )));
        }
        let mut stations = self.shared.stations.write();
        if stations.contains_key(&common_address) {
            return Err(IecSrvError::StationExists(common_address));
        }
        let station = Arc::new(Station::new(
            common_address,
            Arc::clone(&self.shared.registry),
        ));
        stations.insert(common_address, Arc::clone(&station));
        info!("Station {} added", common_address);
        Ok(station)
    }

    /// Remove a station and all of its points
    pub fn remove_station(&self, common_address: u16) -> bool {
        let removed = self.shared.stations.write().remove(&common_address);
        match removed {
            Some(station) => {
                station.clear();
                info!("Station {} removed", common_address);
                true
            },
            None => false,
        }
    }

    pub fn get_station(&self, common_address: u16) -> Option<Arc<Station>> {
        self.shared.get_station(common_address)
    }

    /// Whether a station answers to `common_address`; the global address
    /// always matches
    pub fn has_station(&self, common_address: u16) -> bool {
        self.shared.has_station(common_address)
    }

    pub fn stations(&self) -> Vec<Arc<Station>> {
        self.shared.stations()
    }

    pub fn registry(&self) -> &Arc<PointRegistry> {
        &self.shared.registry
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn open_connection_count(&self) -> usize {
        self.shared.connections.open_count()
    }

    pub fn active_connection_count(&self) -> usize {
        self.shared.connections.active_count()
    }

    pub fn has_active_connections(&self) -> bool {
        self.active_connection_count() > 0
    }

    /// Originator address holding a live selection of the point
    pub fn selection_holder(&self, common_address: u16, ioa: u32) -> Option<u8> {
        self.shared.selections.get(common_address, ioa)
    }

    pub fn active_selection_count(&self) -> usize {
        self.shared.selections.active_count()
    }

    /// Tasks waiting on the executor
    pub fn pending_tasks(&self) -> usize {
        self.shared.executor.pending()
    }

    /// New empty batch bound to this server's points
    pub fn new_batch(&self, cot: CauseOfTransmission) -> Batch {
        Batch::new(Arc::clone(&self.shared.registry), cot)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
        self.shared.executor.stop();
    }
}

impl ServerShared {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn get_station(&self, common_address: u16) -> Option<Arc<Station>> {
        self.stations.read().get(&common_address).cloned()
    }

    fn has_station(&self, common_address: u16) -> bool {
        common_address == GLOBAL_COMMON_ADDRESS
            || self.stations.read().contains_key(&common_address)
    }

    fn stations(&self) -> Vec<Arc<Station>> {
        self.stations.read().values().cloned().collect()
    }

    /// Stations addressed by `common_address`, all of them for the global one
    fn addressed_stations(&self, common_address: u16) -> Vec<Arc<Station>> {
        if common_address == GLOBAL_COMMON_ADDRESS {
            self.stations()
        } else {
            self.get_station(common_address).into_iter().collect()
        }
    }

    /// Schedule work capturing only a weak reference to the server
    fn defer<F>(&self, delay_ms: i64, task: F) -> bool
    where
        F: FnOnce(&ServerShared) + Send + 'static,
    {
        let weak = self.me.clone();
        self.executor.add(
            move || {
                if let Some(shared) = weak.upgrade() {
                    task(&shared);
                }
            },
            delay_ms,
        )
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::transport::RecordingTransport;

    fn server() -> Server {
        Server::new(ServerOptions::default(), Arc::new(RecordingTransport::new())).unwrap()
    }

    #[test]
    fn test_tick_rate_minimum() {
        let options = ServerOptions {
            tick_rate_ms: 49,
            ..ServerOptions::default()
        };
        let result = Server::new(options, Arc::new(RecordingTransport::new()));
        assert!(matches!(result, Err(IecSrvError::OutOfRange(_))));
    }

    #[test]
    fn test_station_management() {
        let server = server();
        server.add_station(1).unwrap();
        server.add_station(2).unwrap();
        assert!(matches!(
            server.add_station(1),
            Err(IecSrvError::StationExists(1))
        ));
        assert!(server.add_station(GLOBAL_COMMON_ADDRESS).is_err());

        assert!(server.has_station(1));
        assert!(server.has_station(GLOBAL_COMMON_ADDRESS));
        assert!(!server.has_station(3));
        assert_eq!(server.stations().len(), 2);

        assert!(server.remove_station(2));
        assert!(!server.remove_station(2));
        assert!(server.get_station(2).is_none());
    }

    #[test]
    fn test_removed_station_releases_points() {
        let server = server();
        let station = server.add_station(1).unwrap();
        station
            .add_point(crate::model::PointSpec::new(
                1,
                crate::types::TypeId::M_SP_NA_1,
            ))
            .unwrap();
        let handle = station.handle(1).unwrap();

        server.remove_station(1);
        assert!(!server.registry().contains(handle));
        // A caller still holding the station sees it empty
        assert!(station.is_empty());
    }

    #[test]
    #[traced_test]
    fn test_start_stop() {
        let server = server();
        assert!(!server.is_running());
        server.start().unwrap();
        server.start().unwrap();
        assert!(server.is_running());
        server.stop();
        server.stop();
        assert!(!server.is_running());
        server.start().unwrap();
        assert!(server.is_running());
        assert!(logs_contain("Server started, tick rate 100 ms"));
        assert!(logs_contain("Server stopped"));
    }
}
