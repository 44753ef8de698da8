// src/config/loader.rs

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Deserialize the TOML file at `path` without checking cross references.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let raw: RawConfigFile = toml::from_str(&text)?;
    debug!(
        path = %path.display(),
        queues = raw.queue.len(),
        nodes = raw.node.len(),
        job_definitions = raw.job_definition.len(),
        "config file read"
    );
    Ok(raw)
}

/// Read `path` and turn it into a validated [`ConfigFile`]: durations parsed,
/// engine defaults applied, queue and node references checked.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    ConfigFile::try_from(load_from_path(path)?)
}
