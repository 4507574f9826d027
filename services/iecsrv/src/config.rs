//! Service configuration
//!
//! Layered through figment: built-in defaults, then an optional YAML, TOML or
//! JSON file, then `IECSRV_*` environment variables.
//!
//! ```yaml
//! port: 2404
//! tick_rate_ms: 100
//! stations:
//!   - common_address: 1
//!     points:
//!       - { ioa: 100, type_id: M_ME_NC_1, report_ms: 5000 }
//!       - { ioa: 200, type_id: C_SC_NA_1, command_mode: select_and_execute,
//!           related_ioa: 201, related_auto_return: true }
//!       - { ioa: 201, type_id: M_SP_NA_1 }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use common::logging::LogConfig;
use serde::{Deserialize, Serialize};
use tracing::info;
use voltage_tasks::MIN_PERIODIC_INTERVAL_MS;

use crate::error::{IecSrvError, Result};
use crate::model::PointSpec;
use crate::server::{Server, ServerOptions};
use crate::types::{
    CommandMode, TypeId, DEFAULT_SELECT_TIMEOUT_MS, GLOBAL_COMMON_ADDRESS,
    MAX_INFORMATION_OBJECT_ADDRESS,
};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "IECSRV_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_ip: String,
    pub port: u16,
    pub tick_rate_ms: u64,
    pub select_timeout_ms: u64,
    /// 0 = unlimited
    pub max_open_connections: usize,
    pub logging: LogConfig,
    pub stations: Vec<StationConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".to_string(),
            port: 2404,
            tick_rate_ms: 100,
            select_timeout_ms: DEFAULT_SELECT_TIMEOUT_MS,
            max_open_connections: 0,
            logging: LogConfig {
                file_prefix: "iecsrv".to_string(),
                ..LogConfig::default()
            },
            stations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    pub common_address: u16,
    #[serde(default)]
    pub points: Vec<PointConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointConfig {
    pub ioa: u32,
    /// IEC mnemonic, e.g. `M_ME_NC_1`
    pub type_id: TypeId,
    #[serde(default)]
    pub report_ms: u64,
    #[serde(default)]
    pub timer_ms: u64,
    #[serde(default)]
    pub command_mode: CommandMode,
    #[serde(default)]
    pub related_ioa: Option<u32>,
    #[serde(default)]
    pub related_auto_return: bool,
}

impl PointConfig {
    pub fn to_spec(&self) -> PointSpec {
        let mut spec = PointSpec::new(self.ioa, self.type_id)
            .report_ms(self.report_ms)
            .timer_ms(self.timer_ms)
            .command_mode(self.command_mode);
        if let Some(related) = self.related_ioa {
            spec = spec.related(related, self.related_auto_return);
        }
        spec
    }
}

impl ServerConfig {
    /// Load defaults, the optional file and `IECSRV_*` overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = common::config_loader::load_config(path, ENV_PREFIX)?;
        Ok(config)
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            tick_rate_ms: self.tick_rate_ms,
            select_timeout_ms: self.select_timeout_ms,
            max_open_connections: self.max_open_connections,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_rate_ms < MIN_PERIODIC_INTERVAL_MS {
            return Err(IecSrvError::config(format!(
                "tick_rate_ms {} below minimum {}",
                self.tick_rate_ms, MIN_PERIODIC_INTERVAL_MS
            )));
        }
        if self.select_timeout_ms == 0 {
            return Err(IecSrvError::config("select_timeout_ms must be positive"));
        }

        let mut addresses = HashSet::new();
        for station in &self.stations {
            let ca = station.common_address;
            if ca == GLOBAL_COMMON_ADDRESS {
                return Err(IecSrvError::config(format!(
                    "common address {} is reserved for global addressing",
                    GLOBAL_COMMON_ADDRESS
                )));
            }
            if !addresses.insert(ca) {
                return Err(IecSrvError::config(format!("duplicate common address {}", ca)));
            }
            Self::validate_points(station)?;
        }
        Ok(())
    }

    fn validate_points(station: &StationConfig) -> Result<()> {
        let ca = station.common_address;
        let mut types = BTreeMap::new();
        for point in &station.points {
            if point.ioa > MAX_INFORMATION_OBJECT_ADDRESS {
                return Err(IecSrvError::config(format!(
                    "station {}: IOA {} exceeds {}",
                    ca, point.ioa, MAX_INFORMATION_OBJECT_ADDRESS
                )));
            }
            if types.insert(point.ioa, point.type_id).is_some() {
                return Err(IecSrvError::config(format!(
                    "station {}: duplicate IOA {}",
                    ca, point.ioa
                )));
            }
            if !point.type_id.is_monitoring() && !point.type_id.is_command() {
                return Err(IecSrvError::config(format!(
                    "station {}: {} at IOA {} is not a point type",
                    ca, point.type_id, point.ioa
                )));
            }
            if point.type_id.is_command() && point.report_ms > 0 {
                return Err(IecSrvError::config(format!(
                    "station {}: cyclic report on command point {}",
                    ca, point.ioa
                )));
            }
            if point.command_mode == CommandMode::SelectAndExecute && !point.type_id.is_selectable()
            {
                return Err(IecSrvError::config(format!(
                    "station {}: {} at IOA {} does not support select-and-execute",
                    ca, point.type_id, point.ioa
                )));
            }
        }

        for point in station.points.iter().filter(|p| p.related_auto_return) {
            let Some(related) = point.related_ioa else {
                return Err(IecSrvError::config(format!(
                    "station {}: auto return on IOA {} without related_ioa",
                    ca, point.ioa
                )));
            };
            match types.get(&related) {
                Some(type_id) if type_id.is_monitoring() => {},
                Some(type_id) => {
                    return Err(IecSrvError::config(format!(
                        "station {}: auto return target {} of IOA {} is {}",
                        ca, related, point.ioa, type_id
                    )));
                },
                None => {
                    return Err(IecSrvError::config(format!(
                        "station {}: auto return target {} of IOA {} does not exist",
                        ca, related, point.ioa
                    )));
                },
            }
        }
        Ok(())
    }

    /// Create the configured stations and points on `server`
    pub fn build_stations(&self, server: &Server) -> Result<()> {
        for station_config in &self.stations {
            let station = server.add_station(station_config.common_address)?;
            for point in &station_config.points {
                station.add_point(point.to_spec())?;
            }
            info!(
                "Station {} configured with {} points",
                station_config.common_address,
                station.len()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use std::io::Write;

    use tempfile::Builder;

    use super::*;

    const YAML: &str = r#"
port: 2405
tick_rate_ms: 200
logging:
  level: debug
stations:
  - common_address: 1
    points:
      - { ioa: 100, type_id: M_ME_NC_1, report_ms: 5000 }
      - { ioa: 200, type_id: C_SC_NA_1, command_mode: select_and_execute, related_ioa: 201, related_auto_return: true }
      - { ioa: 201, type_id: M_SP_NA_1 }
"#;

    fn point(ioa: u32, type_id: TypeId) -> PointConfig {
        PointConfig {
            ioa,
            type_id,
            report_ms: 0,
            timer_ms: 0,
            command_mode: CommandMode::Direct,
            related_ioa: None,
            related_auto_return: false,
        }
    }

    fn with_points(points: Vec<PointConfig>) -> ServerConfig {
        ServerConfig {
            stations: vec![StationConfig {
                common_address: 1,
                points,
            }],
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.port, 2405);
        assert_eq!(config.tick_rate_ms, 200);
        assert_eq!(config.bind_ip, "0.0.0.0");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.stations[0].points.len(), 3);
        assert_eq!(
            config.stations[0].points[1].command_mode,
            CommandMode::SelectAndExecute
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_defaults_without_file() {
        let config = ServerConfig::load(None).unwrap();
        assert_eq!(config.port, 2404);
        assert_eq!(config.select_timeout_ms, DEFAULT_SELECT_TIMEOUT_MS);
        assert!(config.stations.is_empty());
        assert_eq!(config.server_options(), ServerOptions::default());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = ServerConfig::load(Some(Path::new("/nonexistent/iecsrv.yaml")));
        assert!(matches!(result, Err(IecSrvError::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let config = ServerConfig {
            tick_rate_ms: 10,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = with_points(vec![]);
        config.stations.push(StationConfig {
            common_address: 1,
            points: vec![],
        });
        assert!(config.validate().is_err());

        let mut config = with_points(vec![]);
        config.stations[0].common_address = GLOBAL_COMMON_ADDRESS;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_points() {
        let duplicate = with_points(vec![
            point(1, TypeId::M_SP_NA_1),
            point(1, TypeId::M_DP_NA_1),
        ]);
        assert!(duplicate.validate().is_err());

        let mut cyclic_command = point(2, TypeId::C_SC_NA_1);
        cyclic_command.report_ms = 1000;
        assert!(with_points(vec![cyclic_command]).validate().is_err());

        let mut bitstring = point(3, TypeId::C_BO_NA_1);
        bitstring.command_mode = CommandMode::SelectAndExecute;
        assert!(with_points(vec![bitstring]).validate().is_err());

        let mut dangling = point(4, TypeId::C_SC_NA_1);
        dangling.related_auto_return = true;
        assert!(with_points(vec![dangling.clone()]).validate().is_err());

        dangling.related_ioa = Some(5);
        assert!(with_points(vec![dangling.clone(), point(5, TypeId::C_DC_NA_1)])
            .validate()
            .is_err());
        assert!(with_points(vec![dangling, point(5, TypeId::M_SP_NA_1)])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_build_stations() {
        let config = with_points(vec![point(1, TypeId::M_SP_NA_1), point(2, TypeId::C_SC_NA_1)]);
        let server = Server::new(
            config.server_options(),
            std::sync::Arc::new(crate::transport::RecordingTransport::new()),
        )
        .unwrap();
        config.build_stations(&server).unwrap();
        let station = server.get_station(1).unwrap();
        assert_eq!(station.len(), 2);
        assert!(config.build_stations(&server).is_err());
    }
}
