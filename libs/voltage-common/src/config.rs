//! Configuration loading helpers
//!
//! Files are picked by extension (toml, yaml/yml, json). Environment
//! variables can override any key; nested keys use a double underscore,
//! e.g. `PLCMON_PLC__RECONNECT_DELAY_MS=250`.

use crate::{Error, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::Deserialize;
use std::path::Path;

/// Build a figment holding a single configuration file
pub fn file_figment(path: &Path) -> Result<Figment> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::config("Config file must have an extension"))?;

    if !path.exists() {
        return Err(Error::config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

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

/// Load configuration from a specific file
pub fn load_config_from_file<T, P>(path: P) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
    P: AsRef<Path>,
{
    file_figment(path.as_ref())?
        .extract()
        .map_err(|e| Error::config(format!("Failed to load configuration from file: {}", e)))
}

/// Load configuration from multiple sources
///
/// Priority (highest to lowest):
/// 1. Environment variables starting with `env_prefix`
/// 2. The config file, when one is given
/// 3. Default values of `T`
pub fn load_config<T>(path: Option<&Path>, env_prefix: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Default + serde::Serialize,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));
    if let Some(path) = path {
        figment = figment.merge(file_figment(path)?);
    }

    figment
        .merge(Env::prefixed(env_prefix).split("__"))
        .extract()
        .map_err(|e| Error::config(format!("Failed to load configuration: {}", e)))
}
