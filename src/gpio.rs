use serde::{Deserialize, Serialize};

use crate::board::Pin;
use crate::error::GpiosError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(&self) -> bool {
        matches!(self, Level::High)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullBias {
    Floating,
    PullUp,
    PullDown,
}

/// Direction requested for a pin, with its direction specific option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PinSetup {
    Output { initial: Level },
    Input { bias: PullBias },
}

impl PinSetup {
    pub fn is_output(&self) -> bool {
        matches!(self, PinSetup::Output { .. })
    }
}

/// Sampling side of the hardware, shared by every input watcher.
///
/// Implementations are expected to serve concurrent reads of different pins.
pub trait ReadLevel: Send + Sync {
    fn read_level(&self, pin: Pin) -> Result<Level, GpiosError>;
}

pub trait GpioBackend: ReadLevel {
    fn setup_pin(&self, pin: Pin, setup: PinSetup) -> Result<(), GpiosError>;
    fn write_level(&self, pin: Pin, level: Level) -> Result<(), GpiosError>;
    /// Releases every pin requested so far.
    fn cleanup(&self) -> Result<(), GpiosError>;
}
