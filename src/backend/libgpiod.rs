use log::debug;
use std::path::PathBuf;

use libgpiod::{chip::Chip, line, request};
use parking_lot::{FairMutex, RwLock, RwLockUpgradableReadGuard};
use rustc_hash::FxHashMap;

use crate::board::Pin;
use crate::error::GpiosError;
use crate::gpio::{GpioBackend, Level, PinSetup, PullBias, ReadLevel};

/// Character device backend. Each configured pin owns one line request on
/// the chip, released on `cleanup` or drop.
pub struct LibgpiodBackend {
    chip: String,
    lines: RwLock<FxHashMap<u32, LineHandle>>, // keyed by line offset
}

struct LineHandle {
    setup: PinSetup,
    request: FairMutex<request::Request>,
}

impl LibgpiodBackend {
    pub fn new(chip: &str) -> Result<Self, GpiosError> {
        // fail early on a missing chip rather than on the first device
        Self::open_chip(chip)?;

        Ok(Self {
            chip: chip.to_string(),
            lines: RwLock::new(FxHashMap::default()),
        })
    }

    fn open_chip(path: &str) -> Result<Chip, GpiosError> {
        let p = PathBuf::from(path);
        Chip::open(&p).map_err(|e| GpiosError::Gpio(format!("open chip {path}: {e}")))
    }

    fn request_lines(&self, line_cfg: &line::Config) -> Result<request::Request, GpiosError> {
        let chip = Self::open_chip(&self.chip)?;
        let mut req_cfg = request::Config::new()
            .map_err(|e| GpiosError::Gpio(format!("request config: {e}")))?;
        req_cfg
            .set_consumer(env!("CARGO_PKG_NAME"))
            .map_err(|e| GpiosError::Gpio(format!("request consumer: {e}")))?;
        chip.request_lines(Some(&req_cfg), line_cfg)
            .map_err(|e| GpiosError::Gpio(format!("request lines: {e}")))
    }

    fn make_line_settings(setup: PinSetup) -> Result<line::Settings, GpiosError> {
        let mut ls = line::Settings::new()
            .map_err(|e| GpiosError::Gpio(format!("libgpiod settings: {e}")))?;

        match setup {
            PinSetup::Output { initial } => {
                ls.set_direction(line::Direction::Output)
                    .map_err(|e| GpiosError::Gpio(format!("set direction: {e}")))?;
                ls.set_drive(line::Drive::PushPull)
                    .map_err(|e| GpiosError::Gpio(format!("set drive: {e}")))?;
                ls.set_output_value(to_value(initial))
                    .map_err(|e| GpiosError::Gpio(format!("set output value: {e}")))?;
            }
            PinSetup::Input { bias } => {
                ls.set_direction(line::Direction::Input)
                    .map_err(|e| GpiosError::Gpio(format!("set direction: {e}")))?;
                let bias = match bias {
                    PullBias::Floating => None,
                    PullBias::PullUp => Some(line::Bias::PullUp),
                    PullBias::PullDown => Some(line::Bias::PullDown),
                };
                ls.set_bias(bias)
                    .map_err(|e| GpiosError::Gpio(format!("set bias: {e}")))?;
            }
        }

        Ok(ls)
    }

    fn make_line_config(offset: u32, settings: line::Settings) -> Result<line::Config, GpiosError> {
        let mut cfg =
            line::Config::new().map_err(|e| GpiosError::Gpio(format!("line config: {e}")))?;
        cfg.add_line_settings(&[offset], settings)
            .map_err(|e| GpiosError::Gpio(format!("line config add settings: {e}")))?;
        Ok(cfg)
    }
}

fn to_value(level: Level) -> line::Value {
    match level {
        Level::Low => line::Value::InActive,
        Level::High => line::Value::Active,
    }
}

fn to_level(value: line::Value) -> Level {
    match value {
        line::Value::InActive => Level::Low,
        line::Value::Active => Level::High,
    }
}

impl ReadLevel for LibgpiodBackend {
    fn read_level(&self, pin: Pin) -> Result<Level, GpiosError> {
        let lines = self.lines.read();
        if let Some(handle) = lines.get(&pin.line) {
            let value = handle
                .request
                .lock()
                .value(pin.line)
                .map_err(|e| GpiosError::Gpio(format!("get value: {e}")))?;
            return Ok(to_level(value));
        }
        drop(lines);

        // undeclared pin: sample it through a short lived input request
        let settings = Self::make_line_settings(PinSetup::Input {
            bias: PullBias::Floating,
        })?;
        let line_cfg = Self::make_line_config(pin.line, settings)?;
        let value = self
            .request_lines(&line_cfg)?
            .value(pin.line)
            .map_err(|e| GpiosError::Gpio(format!("get value: {e}")))?;

        Ok(to_level(value))
    }
}

impl GpioBackend for LibgpiodBackend {
    fn setup_pin(&self, pin: Pin, setup: PinSetup) -> Result<(), GpiosError> {
        let line_settings = Self::make_line_settings(setup)?;
        let line_cfg = Self::make_line_config(pin.line, line_settings)?;

        let lines = self.lines.upgradable_read();
        match lines.get(&pin.line) {
            Some(handle) => {
                debug!("Reconfigure line {} (pin {})", pin.line, pin.number);
                handle
                    .request
                    .lock()
                    .reconfigure_lines(&line_cfg)
                    .map_err(|e| GpiosError::Gpio(format!("reconfigure lines: {e}")))?;

                let mut lines = RwLockUpgradableReadGuard::upgrade(lines);
                if let Some(handle) = lines.get_mut(&pin.line) {
                    handle.setup = setup;
                }
            }
            None => {
                debug!("Request line {} (pin {})", pin.line, pin.number);
                // upgradable read lock is exclusive, no other setup can request the line meanwhile
                let request = self.request_lines(&line_cfg)?;

                let mut lines = RwLockUpgradableReadGuard::upgrade(lines);
                lines.insert(
                    pin.line,
                    LineHandle {
                        setup,
                        request: FairMutex::new(request),
                    },
                );
            }
        }

        Ok(())
    }

    fn write_level(&self, pin: Pin, level: Level) -> Result<(), GpiosError> {
        let lines = self.lines.read();
        let handle = lines.get(&pin.line).ok_or_else(|| {
            GpiosError::InvalidState("pin not configured, set it up first".into())
        })?;

        if !handle.setup.is_output() {
            return Err(GpiosError::InvalidState(
                "pin must be in output mode to set level".into(),
            ));
        }

        handle
            .request
            .lock()
            .set_value(pin.line, to_value(level))
            .map_err(|e| GpiosError::Gpio(format!("set value: {e}")))?;
        Ok(())
    }

    fn cleanup(&self) -> Result<(), GpiosError> {
        // dropping the requests hands the lines back to the kernel
        self.lines.write().clear();
        Ok(())
    }
}
