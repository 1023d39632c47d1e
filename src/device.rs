use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::board::Pin;
use crate::error::GpiosError;

pub const DEVICE_TYPE: &str = "gpio";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceMode {
    Input,
    Output,
    Reserved,
}

impl DeviceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceMode::Input => "input",
            DeviceMode::Output => "output",
            DeviceMode::Reserved => "reserved",
        }
    }
}

/// Logical gpio device, as persisted by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub uuid: String,
    pub name: String,
    pub mode: DeviceMode,
    pub pin: Pin,
    pub gpio: String,
    /// Output state survives a restart.
    pub keep: bool,
    pub on: bool,
    /// Input is "on" when the pin is high instead of low.
    pub inverted: bool,
    pub owner: String,
    #[serde(rename = "type", default = "default_device_type")]
    pub kind: String,
    /// Mode for inputs and outputs, usage for reserved gpios.
    pub subtype: String,
}

fn default_device_type() -> String {
    DEVICE_TYPE.to_string()
}

/// Store of the module devices. Stands for the host device registry.
pub trait DeviceRegistry: Send + Sync {
    fn get_device(&self, uuid: &str) -> Option<Device>;
    fn devices(&self) -> Vec<Device>;
    /// Stores a new device under a freshly generated uuid and returns it.
    fn add_device(&self, device: Device) -> Result<Device, GpiosError>;
    fn update_device(&self, uuid: &str, device: &Device) -> Result<(), GpiosError>;
    fn delete_device(&self, uuid: &str) -> Result<(), GpiosError>;

    fn find_by_name(&self, name: &str) -> Option<Device> {
        self.devices().into_iter().find(|d| d.name == name)
    }

    fn find_by_gpio(&self, gpio: &str) -> Option<Device> {
        self.devices().into_iter().find(|d| d.gpio == gpio)
    }

    fn find_by_subtype(&self, subtype: &str) -> Vec<Device> {
        self.devices()
            .into_iter()
            .filter(|d| d.subtype == subtype)
            .collect()
    }
}

/// In-memory registry, optionally mirrored to a JSON file on every change.
pub struct MemoryDeviceRegistry {
    devices: RwLock<FxHashMap<String, Device>>,
    path: Option<PathBuf>,
    seq: AtomicU64,
}

impl Default for MemoryDeviceRegistry {
    fn default() -> Self {
        Self {
            devices: RwLock::new(FxHashMap::default()),
            path: None,
            seq: AtomicU64::new(0),
        }
    }
}

impl MemoryDeviceRegistry {
    /// Loads devices from `path` when it exists, later changes are written back to it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GpiosError> {
        let path = path.as_ref().to_path_buf();

        let devices: FxHashMap<String, Device> = if path.exists() {
            let contents = fs::read_to_string(&path)
                .map_err(|e| GpiosError::Config(format!("Failed to read devices: {e}")))?;
            serde_json::from_str(&contents)
                .map_err(|e| GpiosError::Config(format!("Invalid devices json: {e}")))?
        } else {
            FxHashMap::default()
        };
        debug!("Loaded {} device(s) from {}", devices.len(), path.display());

        Ok(Self {
            devices: RwLock::new(devices),
            path: Some(path),
            seq: AtomicU64::new(0),
        })
    }

    fn next_uuid(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{millis:012x}-{seq:04x}")
    }

    fn persist(&self, devices: &FxHashMap<String, Device>) -> Result<(), GpiosError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let contents = serde_json::to_string_pretty(devices)
            .map_err(|e| GpiosError::Command(format!("Failed to serialize devices: {e}")))?;
        fs::write(path, contents).map_err(|e| {
            warn!("Unable to write devices to {}: {e}", path.display());
            GpiosError::Command(format!("Failed to save devices: {e}"))
        })
    }
}

impl DeviceRegistry for MemoryDeviceRegistry {
    fn get_device(&self, uuid: &str) -> Option<Device> {
        self.devices.read().get(uuid).cloned()
    }

    fn devices(&self) -> Vec<Device> {
        self.devices.read().values().cloned().collect()
    }

    fn add_device(&self, mut device: Device) -> Result<Device, GpiosError> {
        let mut devices = self.devices.write();

        device.uuid = self.next_uuid();
        devices.insert(device.uuid.clone(), device.clone());
        if let Err(e) = self.persist(&devices) {
            devices.remove(&device.uuid);
            return Err(e);
        }

        Ok(device)
    }

    fn update_device(&self, uuid: &str, device: &Device) -> Result<(), GpiosError> {
        let mut devices = self.devices.write();

        let entry = devices
            .get_mut(uuid)
            .ok_or_else(|| GpiosError::DeviceNotFound(uuid.to_string()))?;
        *entry = Device {
            uuid: uuid.to_string(),
            ..device.clone()
        };

        self.persist(&devices)
    }

    fn delete_device(&self, uuid: &str) -> Result<(), GpiosError> {
        let mut devices = self.devices.write();

        devices
            .remove(uuid)
            .ok_or_else(|| GpiosError::DeviceNotFound(uuid.to_string()))?;

        self.persist(&devices)
    }
}
