pub mod backend;
pub mod board;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod events;
pub mod gpio;
pub mod manager;
pub mod routes;
pub mod watcher;

pub use board::{Board, Pin};
pub use config::{AppConfig, HttpConfig};
pub use controller::PinController;
pub use device::{Device, DeviceMode, DeviceRegistry, MemoryDeviceRegistry};
pub use error::GpiosError;
pub use events::{EventBus, EventName, EventParams, EventSink, GpioEvent, StateEvent};
pub use gpio::{GpioBackend, Level, PinSetup, PullBias, ReadLevel};
pub use manager::{GpioManager, GpioUsage, ModuleConfig, PinUsage};
pub use routes::AppState;
pub use watcher::{InputWatcher, WatcherTiming};

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodBackend;
pub use backend::MockGpioBackend;
