use anyhow::{Context, Result};
use avr_core::DeviceConfig;
use parking_lot::RwLock;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

pub const CONFIG_FILENAME: &str = "config.json";

/// Configured receivers, persisted as a JSON array in `config.json`.
pub struct Devices {
    config_file: PathBuf,
    devices: RwLock<Vec<DeviceConfig>>,
    /// Serializes file writes
    write_lock: tokio::sync::Mutex<()>,
}

impl Devices {
    /// Open the configuration in `data_path`, creating the directory if needed.
    ///
    /// An unreadable configuration file is logged and treated as empty.
    pub async fn open(data_path: impl Into<PathBuf>) -> Result<Self> {
        let data_path = data_path.into();
        tokio::fs::create_dir_all(&data_path)
            .await
            .with_context(|| format!("Failed to create config directory {}", data_path.display()))?;

        let devices = Self {
            config_file: data_path.join(CONFIG_FILENAME),
            devices: RwLock::new(Vec::new()),
            write_lock: tokio::sync::Mutex::new(()),
        };

        match devices.load().await {
            Ok(count) => info!("Loaded {} configured receiver(s)", count),
            Err(e) => error!("Cannot load {}: {:#}", devices.config_file.display(), e),
        }
        Ok(devices)
    }

    pub fn all(&self) -> Vec<DeviceConfig> {
        self.devices.read().clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.read().iter().any(|d| d.id == id)
    }

    pub fn get(&self, id: &str) -> Option<DeviceConfig> {
        self.devices.read().iter().find(|d| d.id == id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Add a receiver, replacing an existing entry with the same id, and persist.
    pub async fn add(&self, config: DeviceConfig) -> Result<()> {
        {
            let mut devices = self.devices.write();
            match devices.iter_mut().find(|d| d.id == config.id) {
                Some(existing) => {
                    info!("Replacing configuration of receiver {}", config.id);
                    *existing = config;
                }
                None => devices.push(config),
            }
        }
        self.store().await
    }

    /// Forget all receivers and delete the configuration file.
    pub async fn clear(&self) -> Result<()> {
        self.devices.write().clear();

        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.config_file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", self.config_file.display())),
        }
    }

    /// Write the configuration file through a temporary file and a rename.
    pub async fn store(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let json = serde_json::to_vec_pretty(&*self.devices.read()).context("Failed to serialize configuration")?;

        let tmp_file = self.config_file.with_extension("json.tmp");
        tokio::fs::write(&tmp_file, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp_file.display()))?;
        tokio::fs::rename(&tmp_file, &self.config_file)
            .await
            .with_context(|| format!("Failed to replace {}", self.config_file.display()))?;

        debug!("Stored configuration in {}", self.config_file.display());
        Ok(())
    }

    /// Replace the in-memory configuration with the file contents.
    ///
    /// A missing file is an empty configuration. Entries without `id`, `name`
    /// or `address` are skipped.
    pub async fn load(&self) -> Result<usize> {
        let data = match tokio::fs::read(&self.config_file).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.devices.write().clear();
                return Ok(0);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.config_file.display()));
            }
        };

        let items: Vec<Value> = serde_json::from_slice(&data).context("Empty or invalid config file")?;
        let devices: Vec<DeviceConfig> = items
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| match serde_json::from_value(item) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Skipping invalid receiver entry {}: {}", index, e);
                    None
                }
            })
            .collect();

        let count = devices.len();
        *self.devices.write() = devices;
        Ok(count)
    }
}
