use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::device::Device;
use crate::error::GpiosError;

/// On/off change of a device, as seen by the module.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEvent {
    pub device_id: String,
    pub gpio: String,
    pub is_on: bool,
    pub is_initial_reading: bool,
    /// Only set for "off" changes.
    pub on_duration_seconds: Option<f64>,
}

impl StateEvent {
    pub fn on(device: &Device, is_initial_reading: bool) -> Self {
        Self {
            device_id: device.uuid.clone(),
            gpio: device.gpio.clone(),
            is_on: true,
            is_initial_reading,
            on_duration_seconds: None,
        }
    }

    pub fn off(device: &Device, is_initial_reading: bool, duration: f64) -> Self {
        Self {
            device_id: device.uuid.clone(),
            gpio: device.gpio.clone(),
            is_on: false,
            is_initial_reading,
            on_duration_seconds: Some(duration),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventName {
    #[serde(rename = "gpios.gpio.on")]
    GpioOn,
    #[serde(rename = "gpios.gpio.off")]
    GpioOff,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::GpioOn => "gpios.gpio.on",
            EventName::GpioOff => "gpios.gpio.off",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventParams {
    // off first, untagged deserialization picks the first matching variant
    Off { gpio: String, init: bool, duration: f64 },
    On { gpio: String, init: bool },
}

/// Event broadcast to subscribers and kept in the device history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpioEvent {
    pub event: EventName,
    pub device_id: String,
    pub params: EventParams,
    pub timestamp_ms: u64,
}

impl From<StateEvent> for GpioEvent {
    fn from(state: StateEvent) -> Self {
        let (event, params) = if state.is_on {
            (
                EventName::GpioOn,
                EventParams::On {
                    gpio: state.gpio,
                    init: state.is_initial_reading,
                },
            )
        } else {
            (
                EventName::GpioOff,
                EventParams::Off {
                    gpio: state.gpio,
                    init: state.is_initial_reading,
                    duration: state.on_duration_seconds.unwrap_or(0.0),
                },
            )
        };

        Self {
            event,
            device_id: state.device_id,
            params,
            timestamp_ms: epoch_millis(),
        }
    }
}

/// Receiver of the module state changes.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: StateEvent) -> Result<(), GpiosError>;
}

/// Broadcasts events to live subscribers and keeps a bounded history per device.
pub struct EventBus {
    event_tx: broadcast::Sender<GpioEvent>,
    event_history: RwLock<FxHashMap<String, VecDeque<GpioEvent>>>,
    event_history_capacity: usize,
}

impl EventBus {
    pub fn new(broadcast_capacity: usize, event_history_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(broadcast_capacity.max(1));

        Self {
            event_tx,
            event_history: RwLock::new(FxHashMap::default()),
            event_history_capacity,
        }
    }

    pub fn dispatch(&self, event: GpioEvent) {
        if self.event_history_capacity > 0 {
            let mut map = self.event_history.write();
            let history = map.entry(event.device_id.clone()).or_default();
            while history.len() >= self.event_history_capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        // no subscriber is not an error
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GpioEvent> {
        self.event_tx.subscribe()
    }

    /// Oldest first, the `limit` most recent events when given.
    pub fn events(&self, device_id: &str, limit: Option<usize>) -> Vec<GpioEvent> {
        let map = self.event_history.read();
        let Some(history) = map.get(device_id) else {
            return Vec::new();
        };

        let skip = limit
            .map(|lim| history.len().saturating_sub(lim))
            .unwrap_or(0);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn last_event(&self, device_id: &str) -> Option<GpioEvent> {
        self.event_history
            .read()
            .get(device_id)
            .and_then(|h| h.back().cloned())
    }

    pub fn forget(&self, device_id: &str) {
        self.event_history.write().remove(device_id);
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: StateEvent) -> Result<(), GpiosError> {
        self.dispatch(event.into());
        Ok(())
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
