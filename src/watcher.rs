use log::{debug, error, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::board::Pin;
use crate::error::GpiosError;
use crate::gpio::{Level, ReadLevel};

/// Pause after every detected edge, swallows contact bounce.
pub const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(200);
/// Pause between two samples when nothing changed.
pub const IDLE_INTERVAL: Duration = Duration::from_millis(125);

pub type OnCallback = Arc<dyn Fn(&str) -> Result<(), GpiosError> + Send + Sync>;
pub type OffCallback = Arc<dyn Fn(&str, f64) -> Result<(), GpiosError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherTiming {
    pub debounce: Duration,
    pub idle: Duration,
}

impl Default for WatcherTiming {
    fn default() -> Self {
        Self {
            debounce: DEBOUNCE_INTERVAL,
            idle: IDLE_INTERVAL,
        }
    }
}

/// Polls one input pin on its own thread and reports debounced on/off
/// transitions to the callbacks.
///
/// The first sample is always reported: `on` when the pin already sits at
/// the trigger level, `off` with a zero duration otherwise. After that, one
/// `on` is emitted per transition into the trigger level and one `off`,
/// carrying the seconds elapsed since the last `on`, per transition away
/// from it.
///
/// The watcher does not configure the pin, that is up to the caller.
pub struct InputWatcher {
    pin: Pin,
    device_id: String,
    trigger_level: Level,
    timing: WatcherTiming,
    reader: Arc<dyn ReadLevel>,
    on_callback: OnCallback,
    off_callback: OffCallback,
    running: Arc<AtomicBool>,
    started: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl InputWatcher {
    pub fn new(
        pin: Pin,
        device_id: impl Into<String>,
        reader: Arc<dyn ReadLevel>,
        on_callback: OnCallback,
        off_callback: OffCallback,
        trigger_level: Level,
    ) -> Self {
        Self {
            pin,
            device_id: device_id.into(),
            trigger_level,
            timing: WatcherTiming::default(),
            reader,
            on_callback,
            off_callback,
            running: Arc::new(AtomicBool::new(true)),
            started: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    pub fn with_timing(mut self, timing: WatcherTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn trigger_level(&self) -> Level {
        self.trigger_level
    }

    /// Spawns the polling thread. A watcher can only be started once.
    pub fn start(&self) -> Result<(), GpiosError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(GpiosError::InvalidState(format!(
                "watcher for device {} already started",
                self.device_id
            )));
        }

        let poller = Poller {
            pin: self.pin,
            device_id: self.device_id.clone(),
            trigger_level: self.trigger_level,
            timing: self.timing,
            reader: self.reader.clone(),
            on_callback: self.on_callback.clone(),
            off_callback: self.off_callback.clone(),
            running: self.running.clone(),
        };

        let handle = thread::Builder::new()
            .name(format!("gpio-watcher-{}", self.pin.number))
            .spawn(move || poller.run())
            .map_err(|e| GpiosError::Gpio(format!("spawn watcher thread: {e}")))?;
        *self.handle.lock() = Some(handle);

        debug!(
            "Input watcher started for device {} on pin {} (trigger {:?})",
            self.device_id, self.pin.number, self.trigger_level
        );
        Ok(())
    }

    /// Asks the loop to exit. Returns immediately, use [`InputWatcher::join`]
    /// to wait for the thread.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether the polling thread is still executing.
    pub fn is_alive(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Waits for the polling thread to exit. Does not stop it.
    pub fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!("Input watcher thread for device {} panicked", self.device_id);
        }
    }
}

impl Drop for InputWatcher {
    fn drop(&mut self) {
        // thread is left to finish its current sleep on its own
        self.stop();
    }
}

struct Poller {
    pin: Pin,
    device_id: String,
    trigger_level: Level,
    timing: WatcherTiming,
    reader: Arc<dyn ReadLevel>,
    on_callback: OnCallback,
    off_callback: OffCallback,
    running: Arc<AtomicBool>,
}

impl Poller {
    fn run(self) {
        if let Err(e) = self.poll() {
            error!(
                "Input watcher for device {} (pin {}) terminated: {e}",
                self.device_id, self.pin.number
            );
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn poll(&self) -> Result<(), GpiosError> {
        let mut last_level: Option<Level> = None;
        let mut on_since = Instant::now();

        while self.is_running() {
            let level = self.reader.read_level(self.pin)?;

            // stop may have been requested while reading
            if !self.is_running() {
                break;
            }

            match last_level {
                None => {
                    if level == self.trigger_level {
                        on_since = Instant::now();
                        (self.on_callback)(&self.device_id)?;
                    } else {
                        (self.off_callback)(&self.device_id, 0.0)?;
                    }
                }
                Some(last) if level != last && level == self.trigger_level => {
                    trace!("Input {} on", self.pin.number);
                    on_since = Instant::now();
                    (self.on_callback)(&self.device_id)?;
                    thread::sleep(self.timing.debounce);
                }
                Some(last) if level != last => {
                    trace!("Input {} off", self.pin.number);
                    let duration = on_since.elapsed().as_secs_f64();
                    (self.off_callback)(&self.device_id, duration)?;
                    thread::sleep(self.timing.debounce);
                }
                Some(_) => thread::sleep(self.timing.idle),
            }

            last_level = Some(level);
        }

        Ok(())
    }
}
