use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::GpiosError;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    pub unix_socket: Option<String>,
    pub host: Option<String>,
    pub path: String,
    /// Client request timeout, in seconds. 0 keeps the server default.
    #[serde(default)]
    pub timeout: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub http: HttpConfig,
    /// P1 header revision of the board (1, 2 or 3).
    #[serde(default = "default_revision")]
    pub revision: u8,
    #[serde(default = "default_chip")]
    pub chip: String,
    /// Devices are kept in memory only when unset.
    #[serde(default)]
    pub devices_file: Option<String>,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    #[serde(default = "default_event_history_capacity")]
    pub event_history_capacity: usize,
}

fn default_revision() -> u8 {
    3
}

fn default_chip() -> String {
    "/dev/gpiochip0".to_string()
}

fn default_broadcast_capacity() -> usize {
    64
}

fn default_event_history_capacity() -> usize {
    32
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, GpiosError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| GpiosError::Config(format!("Failed to read config: {e}")))?;
        serde_json::from_str(&contents)
            .map_err(|e| GpiosError::Config(format!("Invalid config json: {e}")))
    }
}
