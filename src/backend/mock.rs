use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::board::Pin;
use crate::error::GpiosError;
use crate::gpio::{GpioBackend, Level, PinSetup, ReadLevel};

/// In-memory backend. Inputs are driven with [`MockGpioBackend::set_level`].
#[derive(Default)]
pub struct MockGpioBackend {
    pins: RwLock<FxHashMap<u32, MockPinState>>, // keyed by header pin number
    setups: Mutex<Vec<(Pin, PinSetup)>>,
    fail_setup: AtomicBool,
}

#[derive(Clone)]
struct MockPinState {
    setup: Option<PinSetup>,
    level: Level,
}

impl Default for MockPinState {
    fn default() -> Self {
        Self {
            setup: None,
            level: Level::Low,
        }
    }
}

impl MockGpioBackend {
    /// Forces the level seen by readers, whatever the pin direction.
    pub fn set_level(&self, pin_number: u32, level: Level) {
        self.pins.write().entry(pin_number).or_default().level = level;
    }

    pub fn level(&self, pin_number: u32) -> Option<Level> {
        self.pins.read().get(&pin_number).map(|p| p.level)
    }

    pub fn pin_setup(&self, pin_number: u32) -> Option<PinSetup> {
        self.pins.read().get(&pin_number).and_then(|p| p.setup)
    }

    /// Every `setup_pin` call received, in order.
    pub fn setup_calls(&self) -> Vec<(Pin, PinSetup)> {
        self.setups.lock().clone()
    }

    /// Makes the next `setup_pin` calls fail, like a busy line would.
    pub fn fail_setup(&self, fail: bool) {
        self.fail_setup.store(fail, Ordering::SeqCst);
    }
}

impl ReadLevel for MockGpioBackend {
    fn read_level(&self, pin: Pin) -> Result<Level, GpiosError> {
        Ok(self
            .pins
            .read()
            .get(&pin.number)
            .map(|p| p.level)
            .unwrap_or(Level::Low))
    }
}

impl GpioBackend for MockGpioBackend {
    fn setup_pin(&self, pin: Pin, setup: PinSetup) -> Result<(), GpiosError> {
        if self.fail_setup.load(Ordering::SeqCst) {
            return Err(GpiosError::Gpio(format!("pin {} is busy", pin.number)));
        }

        self.setups.lock().push((pin, setup));

        let mut pins = self.pins.write();
        let state = pins.entry(pin.number).or_default();
        state.setup = Some(setup);
        if let PinSetup::Output { initial } = setup {
            state.level = initial;
        }

        Ok(())
    }

    fn write_level(&self, pin: Pin, level: Level) -> Result<(), GpiosError> {
        let mut pins = self.pins.write();
        let state = pins.get_mut(&pin.number).ok_or_else(|| {
            GpiosError::InvalidState("pin not configured, set it up first".into())
        })?;

        if !state.setup.map(|s| s.is_output()).unwrap_or(false) {
            return Err(GpiosError::InvalidState(
                "pin must be in output mode to set level".into(),
            ));
        }
        state.level = level;

        Ok(())
    }

    fn cleanup(&self) -> Result<(), GpiosError> {
        for state in self.pins.write().values_mut() {
            state.setup = None;
        }

        Ok(())
    }
}
