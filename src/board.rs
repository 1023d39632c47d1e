use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Physical header pin paired with the SoC line driving it.
///
/// `number` follows the BOARD numbering (header position), `line` is the
/// BCM offset on the gpio chip, i.e. the `N` of `GPIO<N>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pin {
    pub number: u32,
    pub line: u32,
}

impl Pin {
    pub fn new(number: u32, line: u32) -> Self {
        Self { number, line }
    }
}

const GPIOS_REV1: &[(&str, u32)] = &[
    ("GPIO0", 3),
    ("GPIO1", 5),
    ("GPIO4", 7),
    ("GPIO14", 8),
    ("GPIO15", 10),
    ("GPIO17", 11),
    ("GPIO18", 12),
    ("GPIO21", 13),
    ("GPIO22", 15),
    ("GPIO23", 16),
    ("GPIO24", 18),
    ("GPIO10", 19),
    ("GPIO9", 21),
    ("GPIO25", 22),
    ("GPIO11", 23),
    ("GPIO8", 24),
    ("GPIO7", 26),
];

const GPIOS_REV2: &[(&str, u32)] = &[
    ("GPIO4", 7),
    ("GPIO17", 11),
    ("GPIO18", 12),
    ("GPIO22", 15),
    ("GPIO23", 16),
    ("GPIO24", 18),
    ("GPIO25", 22),
    ("GPIO27", 13),
    ("GPIO2", 3),
    ("GPIO3", 5),
    ("GPIO7", 26),
    ("GPIO8", 24),
    ("GPIO9", 21),
    ("GPIO10", 19),
    ("GPIO11", 23),
    ("GPIO14", 8),
    ("GPIO15", 10),
];

// 40 pins header extras, on top of GPIOS_REV2
const GPIOS_REV3: &[(&str, u32)] = &[
    ("GPIO5", 29),
    ("GPIO6", 31),
    ("GPIO12", 32),
    ("GPIO13", 33),
    ("GPIO26", 37),
    ("GPIO0", 27),
    ("GPIO1", 28),
    ("GPIO19", 35),
    ("GPIO16", 36),
    ("GPIO20", 38),
    ("GPIO21", 40),
];

const PINS_REV1: &[(u32, &str)] = &[
    (1, "3.3V"),
    (2, "5V"),
    (3, "GPIO0"),
    (4, "5V"),
    (5, "GPIO1"),
    (6, "GND"),
    (7, "GPIO4"),
    (8, "GPIO14"),
    (9, "GND"),
    (10, "GPIO15"),
    (11, "GPIO17"),
    (12, "GPIO18"),
    (13, "GPIO21"),
    (14, "GND"),
    (15, "GPIO22"),
    (16, "GPIO23"),
    (17, "3.3V"),
    (18, "GPIO24"),
    (19, "GPIO10"),
    (20, "GND"),
    (21, "GPIO9"),
    (22, "GPIO25"),
    (23, "GPIO11"),
    (24, "GPIO8"),
    (25, "GND"),
    (26, "GPIO7"),
];

const PINS_REV2: &[(u32, &str)] = &[
    (1, "3.3V"),
    (2, "5V"),
    (3, "GPIO2"),
    (4, "5V"),
    (5, "GPIO3"),
    (6, "GND"),
    (7, "GPIO4"),
    (8, "GPIO14"),
    (9, "GND"),
    (10, "GPIO15"),
    (11, "GPIO17"),
    (12, "GPIO18"),
    (13, "GPIO27"),
    (14, "GND"),
    (15, "GPIO22"),
    (16, "GPIO23"),
    (17, "3.3V"),
    (18, "GPIO24"),
    (19, "GPIO10"),
    (20, "GND"),
    (21, "GPIO9"),
    (22, "GPIO25"),
    (23, "GPIO11"),
    (24, "GPIO8"),
    (25, "GND"),
    (26, "GPIO7"),
];

const PINS_REV3: &[(u32, &str)] = &[
    (1, "3.3V"),
    (2, "5V"),
    (3, "GPIO2"),
    (4, "5V"),
    (5, "GPIO3"),
    (6, "GND"),
    (7, "GPIO4"),
    (8, "GPIO14"),
    (9, "GND"),
    (10, "GPIO15"),
    (11, "GPIO17"),
    (12, "GPIO18"),
    (13, "GPIO27"),
    (14, "GND"),
    (15, "GPIO22"),
    (16, "GPIO23"),
    (17, "3.3V"),
    (18, "GPIO24"),
    (19, "GPIO10"),
    (20, "GND"),
    (21, "GPIO9"),
    (22, "GPIO25"),
    (23, "GPIO11"),
    (24, "GPIO8"),
    (25, "GND"),
    (26, "GPIO7"),
    (27, "DNC"),
    (28, "DNC"),
    (29, "GPIO5"),
    (30, "GND"),
    (31, "GPIO6"),
    (32, "GPIO12"),
    (33, "GPIO13"),
    (34, "GND"),
    (35, "GPIO19"),
    (36, "GPIO16"),
    (37, "GPIO26"),
    (38, "GPIO20"),
    (39, "GND"),
    (40, "GPIO21"),
];

/// Pin layout of a Raspberry Pi board revision (P1 header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Board {
    revision: u8,
}

impl Board {
    pub fn new(revision: u8) -> Self {
        Self { revision }
    }

    pub fn revision(&self) -> u8 {
        self.revision
    }

    pub fn pins_number(&self) -> u32 {
        match self.revision {
            1 | 2 => 26,
            3 => 40,
            _ => 0,
        }
    }

    /// Gpio name to header pin number for this revision.
    pub fn gpios(&self) -> FxHashMap<&'static str, u32> {
        let tables: &[&[(&str, u32)]] = match self.revision {
            1 => &[GPIOS_REV1],
            2 => &[GPIOS_REV2],
            3 => &[GPIOS_REV2, GPIOS_REV3],
            _ => &[],
        };

        tables
            .iter()
            .flat_map(|table| table.iter().copied())
            .collect()
    }

    /// Header pin number to label (gpio name, power rail, ground...).
    pub fn pins(&self) -> BTreeMap<u32, &'static str> {
        let table = match self.revision {
            1 => PINS_REV1,
            2 => PINS_REV2,
            3 => PINS_REV3,
            _ => &[],
        };

        table.iter().copied().collect()
    }

    pub fn gpio_pin(&self, gpio: &str) -> Option<Pin> {
        let number = *self.gpios().get(gpio)?;
        let line = gpio.strip_prefix("GPIO")?.parse().ok()?;

        Some(Pin::new(number, line))
    }
}
