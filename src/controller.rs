use log::{debug, error, warn};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::board::Board;
use crate::device::{Device, DeviceMode, DeviceRegistry};
use crate::error::GpiosError;
use crate::events::{EventSink, StateEvent};
use crate::gpio::{GpioBackend, Level, PinSetup, PullBias, ReadLevel};
use crate::watcher::{InputWatcher, OffCallback, OnCallback, WatcherTiming};

/// Outputs are active low: driving the pin low turns the load on.
pub const OUTPUT_ON_LEVEL: Level = Level::Low;
pub const OUTPUT_OFF_LEVEL: Level = Level::High;

/// Resolves watcher callbacks to their device and forwards them to the sink.
#[derive(Clone)]
struct Notifier {
    registry: Arc<dyn DeviceRegistry>,
    sink: Arc<dyn EventSink>,
    states: Arc<Mutex<FxHashMap<String, bool>>>, // last on/off per device uuid
}

impl Notifier {
    fn device(&self, device_id: &str) -> Result<Device, GpiosError> {
        self.registry
            .get_device(device_id)
            .ok_or_else(|| GpiosError::DeviceNotFound(device_id.to_string()))
    }

    fn notify(&self, event: StateEvent) -> Result<(), GpiosError> {
        self.states
            .lock()
            .insert(event.device_id.clone(), event.is_on);
        self.sink.publish(event)
    }

    fn input_on(&self, device_id: &str) -> Result<(), GpiosError> {
        debug!("on callback for device {device_id} triggered");
        let device = self.device(device_id)?;
        self.notify(StateEvent::on(&device, false))
    }

    fn input_off(&self, device_id: &str, duration: f64) -> Result<(), GpiosError> {
        debug!("off callback for device {device_id} triggered ({duration:.3}s)");
        let device = self.device(device_id)?;
        self.notify(StateEvent::off(&device, false, duration))
    }
}

/// Keeps one [`InputWatcher`] per input device and drives output devices.
pub struct PinController<B: GpioBackend> {
    backend: Arc<B>,
    board: Board,
    notifier: Notifier,
    timing: WatcherTiming,
    watchers: Mutex<FxHashMap<String, InputWatcher>>, // keyed by device uuid
}

impl<B: GpioBackend + 'static> PinController<B> {
    pub fn new(
        backend: Arc<B>,
        board: Board,
        registry: Arc<dyn DeviceRegistry>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            backend,
            board,
            notifier: Notifier {
                registry,
                sink,
                states: Arc::new(Mutex::new(FxHashMap::default())),
            },
            timing: WatcherTiming::default(),
            watchers: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn with_timing(mut self, timing: WatcherTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Sets the pin up according to the device mode. Hardware failures are
    /// logged and reported as `false`.
    pub fn configure(&self, device: &Device) -> bool {
        debug!("Configure gpio for device {device:?}");

        match self.try_configure(device) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to configure gpio {}: {e}", device.gpio);
                false
            }
        }
    }

    fn try_configure(&self, device: &Device) -> Result<(), GpiosError> {
        match device.mode {
            DeviceMode::Reserved => {
                debug!("Reserved gpio {} cannot be configured", device.gpio);
                Ok(())
            }
            DeviceMode::Output => {
                let initial = if device.on {
                    OUTPUT_ON_LEVEL
                } else {
                    OUTPUT_OFF_LEVEL
                };
                debug!(
                    "Configure gpio {} (pin {}) as output, initial {initial:?}",
                    device.gpio, device.pin.number
                );
                self.backend
                    .setup_pin(device.pin, PinSetup::Output { initial })?;

                let event = if device.on {
                    StateEvent::on(device, true)
                } else {
                    StateEvent::off(device, true, 0.0)
                };
                self.notifier.notify(event)
            }
            DeviceMode::Input => {
                debug!(
                    "Configure gpio {} (pin {}) as input{}",
                    device.gpio,
                    device.pin.number,
                    if device.inverted { " inverted" } else { "" }
                );
                self.backend.setup_pin(
                    device.pin,
                    PinSetup::Input {
                        bias: PullBias::PullDown,
                    },
                )?;
                self.launch_input_watcher(device)
            }
        }
    }

    fn launch_input_watcher(&self, device: &Device) -> Result<(), GpiosError> {
        let trigger_level = if device.inverted {
            Level::High
        } else {
            Level::Low
        };
        debug!(
            "Launch input watcher for device {} (inverted={})",
            device.uuid, device.inverted
        );

        let on_notifier = self.notifier.clone();
        let on_callback: OnCallback = Arc::new(move |id: &str| on_notifier.input_on(id));
        let off_notifier = self.notifier.clone();
        let off_callback: OffCallback =
            Arc::new(move |id: &str, duration: f64| off_notifier.input_off(id, duration));

        let reader: Arc<dyn ReadLevel> = self.backend.clone();
        let watcher = InputWatcher::new(
            device.pin,
            device.uuid.clone(),
            reader,
            on_callback,
            off_callback,
            trigger_level,
        )
        .with_timing(self.timing);

        // a stale watcher must be gone before a new one polls the same pin
        let previous = self.watchers.lock().remove(&device.uuid);
        if let Some(previous) = previous {
            warn!("Replacing running watcher of device {}", device.uuid);
            previous.stop();
            previous.join();
        }

        watcher.start()?;
        self.watchers.lock().insert(device.uuid.clone(), watcher);
        Ok(())
    }

    fn take_watcher(&self, device: &Device) -> Option<InputWatcher> {
        let watcher = self.watchers.lock().remove(&device.uuid);
        if watcher.is_none() {
            debug!("No gpio watcher found for device {}", device.uuid);
        }
        watcher
    }

    /// Stops the device watcher without waiting for its thread.
    pub fn deconfigure(&self, device: &Device) -> bool {
        self.notifier.states.lock().remove(&device.uuid);
        if device.mode == DeviceMode::Output {
            return true;
        }

        match self.take_watcher(device) {
            Some(watcher) => {
                watcher.stop();
                true
            }
            None => false,
        }
    }

    /// Like [`deconfigure`](Self::deconfigure), but returns once the watcher
    /// thread has exited, so no callback for the device is still in flight.
    pub fn release(&self, device: &Device) -> bool {
        let released = match self.take_watcher(device) {
            Some(watcher) => {
                watcher.stop();
                watcher.join();
                true
            }
            None => device.mode == DeviceMode::Output,
        };
        self.notifier.states.lock().remove(&device.uuid);
        released
    }

    /// Last on/off state seen for the device, from its watcher or its last command.
    pub fn device_state(&self, device_id: &str) -> Option<bool> {
        self.notifier.states.lock().get(device_id).copied()
    }

    /// Replaces the device watcher so it picks up the device current flags.
    pub fn reconfigure(&self, device: &Device) -> bool {
        if device.mode == DeviceMode::Output {
            return true;
        }

        if let Some(watcher) = self.take_watcher(device) {
            watcher.stop();
            watcher.join();

            if let Err(e) = self.launch_input_watcher(device) {
                error!("Failed to relaunch watcher of device {}: {e}", device.uuid);
            }
        }

        true
    }

    pub fn on_watcher_on(&self, device_id: &str) -> Result<(), GpiosError> {
        self.notifier.input_on(device_id)
    }

    pub fn on_watcher_off(&self, device_id: &str, duration: f64) -> Result<(), GpiosError> {
        self.notifier.input_off(device_id, duration)
    }

    fn output_device(&self, device_id: &str, action: &str) -> Result<Device, GpiosError> {
        let device = self.notifier.device(device_id)?;
        if device.mode != DeviceMode::Output {
            return Err(GpiosError::InvalidState(format!(
                "Gpio \"{}\" configured as \"{}\" cannot be turned {action}",
                device.gpio,
                device.mode.as_str()
            )));
        }
        Ok(device)
    }

    pub fn turn_on(&self, device_id: &str) -> Result<(), GpiosError> {
        let mut device = self.output_device(device_id, "on")?;

        debug!("Turn on gpio {}", device.gpio);
        self.backend.write_level(device.pin, OUTPUT_ON_LEVEL)?;

        device.on = true;
        self.keep_state(&device);

        self.notifier.notify(StateEvent::on(&device, false))
    }

    pub fn turn_off(&self, device_id: &str) -> Result<(), GpiosError> {
        let mut device = self.output_device(device_id, "off")?;

        debug!("Turn off gpio {}", device.gpio);
        self.backend.write_level(device.pin, OUTPUT_OFF_LEVEL)?;

        device.on = false;
        self.keep_state(&device);

        self.notifier.notify(StateEvent::off(&device, false, 0.0))
    }

    // the pin is already driven, a failed save must not hide the change
    fn keep_state(&self, device: &Device) {
        if !device.keep {
            return;
        }
        if let Err(e) = self.notifier.registry.update_device(&device.uuid, device) {
            warn!("Unable to keep state of device {}: {e}", device.uuid);
        }
    }

    /// Raw level of any gpio of the board, configured as device or not.
    pub fn is_pin_high(&self, gpio: &str) -> Result<bool, GpiosError> {
        let pin = self
            .board
            .gpio_pin(gpio)
            .ok_or_else(|| GpiosError::InvalidParameter(format!("Gpio \"{gpio}\" is invalid")))?;
        debug!("Read value for gpio {gpio} (pin {})", pin.number);

        Ok(self.backend.read_level(pin)?.is_high())
    }

    /// Turns off every output device. All outputs are tried, the first
    /// failure is returned afterwards.
    pub fn reset_all(&self) -> Result<(), GpiosError> {
        let mut first_error = None;

        for device in self.notifier.registry.devices() {
            if device.mode != DeviceMode::Output {
                continue;
            }
            if let Err(e) = self.turn_off(&device.uuid) {
                warn!("Unable to turn off gpio {} on reset: {e}", device.gpio);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn has_watcher(&self, device_id: &str) -> bool {
        self.watchers.lock().contains_key(device_id)
    }

    pub fn watcher_trigger_level(&self, device_id: &str) -> Option<Level> {
        self.watchers
            .lock()
            .get(device_id)
            .map(|w| w.trigger_level())
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.lock().len()
    }

    /// Stops every watcher, waits for their threads and releases the pins.
    pub fn stop_all(&self) -> Result<(), GpiosError> {
        let watchers: Vec<InputWatcher> = self.watchers.lock().drain().map(|(_, w)| w).collect();
        for watcher in &watchers {
            watcher.stop();
        }
        for watcher in &watchers {
            watcher.join();
        }

        self.backend.cleanup()
    }
}
