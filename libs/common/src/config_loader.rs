//! Configuration loading helpers
//!
//! Priority (highest to lowest): environment variables, config file, defaults.

use std::path::Path;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// File provider chosen by extension (`toml`, `yaml`/`yml`, `json`)
fn file_figment(path: &Path) -> Result<Figment> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::config("Config file must have an extension"))?;

    match extension {
        "toml" => Ok(Figment::new().merge(Toml::file(path))),
        "yaml" | "yml" => Ok(Figment::new().merge(Yaml::file(path))),
        "json" => Ok(Figment::new().merge(Json::file(path))),
        _ => Err(Error::config(format!(
            "Unsupported config file format: {}",
            extension
        ))),
    }
}

/// Load configuration from a single file
pub fn load_config_from_file<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    file_figment(path)?
        .extract()
        .map_err(|e| Error::config(format!("Failed to load configuration from file: {}", e)))
}

/// Load layered configuration: `T::default()`, then the optional file, then
/// `{env_prefix}*` variables (`__` separates nested keys, e.g.
/// `IECSRV_LOGGING__LEVEL=debug`).
pub fn load_config<T, P>(path: Option<P>, env_prefix: &str) -> Result<T>
where
    T: DeserializeOwned + Serialize + Default,
    P: AsRef<Path>,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = path {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        info!("Loading configuration from {}", path.display());
        figment = figment.merge(file_figment(path)?);
    } else {
        debug!("No config file given, using defaults");
    }

    figment
        .merge(Env::prefixed(env_prefix).split("__"))
        .extract()
        .map_err(|e| Error::config(format!("Failed to load configuration: {}", e)))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;
    use tempfile::Builder;

    #[derive(Debug, Default, PartialEq, Deserialize, Serialize)]
    #[serde(default)]
    struct TestConfig {
        name: String,
        port: u16,
        nested: NestedConfig,
    }

    #[derive(Debug, Default, PartialEq, Deserialize, Serialize)]
    #[serde(default)]
    struct NestedConfig {
        enabled: bool,
    }

    fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_yaml_file() {
        let file = write_temp(".yaml", "name: test\nport: 2404\nnested:\n  enabled: true\n");
        let config: TestConfig = load_config_from_file(file.path()).unwrap();
        assert_eq!(config.name, "test");
        assert_eq!(config.port, 2404);
        assert!(config.nested.enabled);
    }

    #[test]
    fn test_load_toml_file() {
        let file = write_temp(".toml", "name = \"t\"\nport = 1\n[nested]\nenabled = false\n");
        let config: TestConfig = load_config_from_file(file.path()).unwrap();
        assert_eq!(config.port, 1);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = write_temp(".ini", "name=x");
        let result: Result<TestConfig> = load_config_from_file(file.path());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_file() {
        let result: Result<TestConfig> = load_config(Some("/nonexistent/cfg.yaml"), "TESTCFG_");
        assert!(result.is_err());
    }

    #[test]
    fn test_layered_defaults_and_file() {
        let file = write_temp(".json", "{\"port\": 8080}");
        let config: TestConfig = load_config(Some(file.path()), "CFGLOADER_TEST_UNUSED_").unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.name, "");
        assert!(!config.nested.enabled);
    }
}
