use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Protocol version implemented by the server
pub const API_VERSION: &str = "0.12.1";

/// Driver description read from `driver.json`.
///
/// Unknown fields are kept and returned verbatim by `get_driver_metadata`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverMetadata {
    pub driver_id: String,
    pub version: String,
    /// Localized name, e.g. `{"en": "Denon AVR"}`
    #[serde(default)]
    pub name: Value,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DriverMetadata {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_slice(&data).with_context(|| format!("Invalid driver metadata in {}", path.display()))
    }

    /// English name, falling back to the driver id
    pub fn display_name(&self) -> &str {
        match &self.name {
            Value::String(name) => name,
            Value::Object(names) => names.get("en").and_then(Value::as_str).unwrap_or(&self.driver_id),
            _ => &self.driver_id,
        }
    }

    pub fn developer(&self) -> Option<&str> {
        self.extra.get("developer")?.get("name")?.as_str()
    }
}
