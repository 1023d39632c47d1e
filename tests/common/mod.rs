#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use gpios::{
    Board, Device, DeviceMode, DeviceRegistry, GpiosError, Level, MemoryDeviceRegistry, Pin,
    ReadLevel, WatcherTiming,
};
use parking_lot::Mutex;

pub const FAST_TIMING: WatcherTiming = WatcherTiming {
    debounce: Duration::from_millis(20),
    idle: Duration::from_millis(10),
};

/// Serves the given levels in order, then keeps repeating the last one.
pub struct ScriptedReader {
    levels: Mutex<VecDeque<Level>>,
    last: Mutex<Level>,
    reads: Mutex<usize>,
}

impl ScriptedReader {
    pub fn new(levels: &[Level]) -> Arc<Self> {
        Arc::new(Self {
            levels: Mutex::new(levels.iter().copied().collect()),
            last: Mutex::new(*levels.last().unwrap_or(&Level::Low)),
            reads: Mutex::new(0),
        })
    }

    pub fn is_exhausted(&self) -> bool {
        self.levels.lock().is_empty()
    }

    pub fn reads(&self) -> usize {
        *self.reads.lock()
    }
}

impl ReadLevel for ScriptedReader {
    fn read_level(&self, _pin: Pin) -> Result<Level, GpiosError> {
        *self.reads.lock() += 1;
        let next = self.levels.lock().pop_front();
        Ok(next.unwrap_or(*self.last.lock()))
    }
}

pub struct FailingReader;

impl ReadLevel for FailingReader {
    fn read_level(&self, pin: Pin) -> Result<Level, GpiosError> {
        Err(GpiosError::Gpio(format!("pin {} unreadable", pin.number)))
    }
}

pub fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub fn add_device(
    registry: &MemoryDeviceRegistry,
    name: &str,
    gpio: &str,
    mode: DeviceMode,
    inverted: bool,
) -> Device {
    let pin = Board::new(3).gpio_pin(gpio).expect("known gpio");
    registry
        .add_device(Device {
            uuid: String::new(),
            name: name.to_string(),
            mode,
            pin,
            gpio: gpio.to_string(),
            keep: false,
            on: false,
            inverted,
            owner: "gpios".to_string(),
            kind: "gpio".to_string(),
            subtype: mode.as_str().to_string(),
        })
        .expect("device added")
}
