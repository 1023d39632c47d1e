use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::board::Board;
use crate::config::AppConfig;
use crate::controller::PinController;
use crate::device::{DEVICE_TYPE, Device, DeviceMode, DeviceRegistry};
use crate::error::GpiosError;
use crate::events::{EventBus, GpioEvent};
use crate::gpio::GpioBackend;
use crate::watcher::WatcherTiming;

/// Commands coming from the rpc server are owned by the module itself.
const RPC_SENDER: &str = "rpcserver";
const MODULE_SENDER: &str = "gpios";

#[derive(Debug, Clone, Serialize)]
pub struct ModuleConfig {
    pub revision: u8,
    pub pinsnumber: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct GpioUsage {
    pub assigned: bool,
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PinUsage {
    pub label: String,
    pub gpio: Option<GpioUsage>,
}

fn command_sender(sender: &str) -> String {
    if sender == RPC_SENDER {
        MODULE_SENDER.to_string()
    } else {
        sender.to_string()
    }
}

fn require(value: &str, param: &str) -> Result<(), GpiosError> {
    if value.is_empty() {
        return Err(GpiosError::MissingParameter(format!(
            "Parameter \"{param}\" is missing"
        )));
    }
    Ok(())
}

/// The gpios module: device commands on top of the [`PinController`].
pub struct GpioManager<B: GpioBackend> {
    board: Board,
    registry: Arc<dyn DeviceRegistry>,
    events: Arc<EventBus>,
    controller: PinController<B>,
}

impl<B: GpioBackend + 'static> GpioManager<B> {
    pub fn new(config: &AppConfig, backend: Arc<B>, registry: Arc<dyn DeviceRegistry>) -> Self {
        let board = Board::new(config.revision);
        let events = Arc::new(EventBus::new(
            config.broadcast_capacity,
            config.event_history_capacity,
        ));
        let controller = PinController::new(backend, board, registry.clone(), events.clone());

        Self {
            board,
            registry,
            events,
            controller,
        }
    }

    pub fn with_timing(mut self, timing: WatcherTiming) -> Self {
        self.controller = self.controller.with_timing(timing);
        self
    }

    pub fn controller(&self) -> &PinController<B> {
        &self.controller
    }

    /// Configures every stored device.
    pub fn start(&self) {
        let devices = self.registry.devices();
        info!("Configuring {} gpio device(s)", devices.len());

        for device in devices {
            if !self.controller.configure(&device) {
                warn!("Device {} ({}) left unconfigured", device.name, device.gpio);
            }
        }
    }

    pub fn stop(&self) -> Result<(), GpiosError> {
        self.controller.stop_all()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<GpioEvent> {
        self.events.subscribe()
    }

    pub fn get_events(
        &self,
        device_uuid: &str,
        limit: Option<usize>,
    ) -> Result<Vec<GpioEvent>, GpiosError> {
        self.get_device(device_uuid)?;
        Ok(self.events.events(device_uuid, limit))
    }

    pub fn get_last_event(&self, device_uuid: &str) -> Result<Option<GpioEvent>, GpiosError> {
        self.get_device(device_uuid)?;
        Ok(self.events.last_event(device_uuid))
    }

    pub fn get_device(&self, device_uuid: &str) -> Result<Device, GpiosError> {
        self.registry
            .get_device(device_uuid)
            .ok_or_else(|| GpiosError::DeviceNotFound(device_uuid.to_string()))
    }

    pub fn get_devices(&self) -> FxHashMap<String, Device> {
        self.registry
            .devices()
            .into_iter()
            .map(|d| (d.uuid.clone(), d))
            .collect()
    }

    pub fn get_module_config(&self) -> ModuleConfig {
        ModuleConfig {
            revision: self.board.revision(),
            pinsnumber: self.board.pins_number(),
        }
    }

    pub fn get_pins_number(&self) -> u32 {
        self.board.pins_number()
    }

    pub fn get_raspi_gpios(&self) -> FxHashMap<&'static str, u32> {
        self.board.gpios()
    }

    pub fn get_assigned_gpios(&self) -> Vec<String> {
        self.registry.devices().into_iter().map(|d| d.gpio).collect()
    }

    /// Header pins with, for gpios, whether a device uses them and who owns it.
    pub fn get_pins_usage(&self) -> BTreeMap<u32, PinUsage> {
        let gpios = self.board.gpios();
        let devices = self.registry.devices();

        self.board
            .pins()
            .into_iter()
            .map(|(number, label)| {
                let gpio = gpios.contains_key(label).then(|| {
                    let owner = devices.iter().find(|d| d.gpio == label);
                    GpioUsage {
                        assigned: owner.is_some(),
                        owner: owner.map(|d| d.owner.clone()),
                    }
                });
                (
                    number,
                    PinUsage {
                        label: label.to_string(),
                        gpio,
                    },
                )
            })
            .collect()
    }

    /// Flags a gpio as used by another component (onewire, lirc...).
    ///
    /// Reserving again with the same usage returns the existing device.
    pub fn reserve_gpio(
        &self,
        name: &str,
        gpio: &str,
        usage: &str,
        sender: &str,
    ) -> Result<Device, GpiosError> {
        let owner = command_sender(sender);

        require(gpio, "gpio")?;
        if let Some(found) = self.registry.find_by_gpio(gpio) {
            if found.subtype != usage {
                return Err(GpiosError::InvalidParameter(format!(
                    "Gpio \"{}\" is already reserved for \"{}\" usage",
                    found.gpio, found.subtype
                )));
            }
            return Ok(found);
        }
        require(name, "name")?;
        if self.registry.find_by_name(name).is_some() {
            return Err(GpiosError::InvalidParameter(format!(
                "Name \"{name}\" is already used"
            )));
        }
        let pin = self.board.gpio_pin(gpio).ok_or_else(|| {
            GpiosError::InvalidParameter(format!(
                "Gpio \"{gpio}\" does not exist for this raspberry pi"
            ))
        })?;
        require(usage, "usage")?;

        let device = self.registry.add_device(Device {
            uuid: String::new(),
            name: name.to_string(),
            mode: DeviceMode::Reserved,
            pin,
            gpio: gpio.to_string(),
            keep: false,
            on: false,
            inverted: false,
            owner,
            kind: DEVICE_TYPE.to_string(),
            subtype: usage.to_string(),
        })?;
        debug!("Gpio {gpio} reserved for {usage}");

        Ok(device)
    }

    pub fn get_reserved_gpios(&self, usage: &str) -> Result<Vec<Device>, GpiosError> {
        require(usage, "usage")?;

        Ok(self
            .registry
            .find_by_subtype(usage)
            .into_iter()
            .filter(|d| d.mode == DeviceMode::Reserved)
            .collect())
    }

    pub fn is_reserved_gpio(&self, gpio: &str) -> bool {
        self.registry
            .find_by_gpio(gpio)
            .map(|d| d.mode == DeviceMode::Reserved)
            .unwrap_or(false)
    }

    pub fn add_gpio(
        &self,
        name: &str,
        gpio: &str,
        mode: DeviceMode,
        keep: bool,
        inverted: bool,
        sender: &str,
    ) -> Result<Device, GpiosError> {
        let owner = command_sender(sender);

        require(gpio, "gpio")?;
        require(name, "name")?;
        if self.registry.find_by_name(name).is_some() {
            return Err(GpiosError::InvalidParameter(format!(
                "Name \"{name}\" is already used"
            )));
        }
        let pin = self.board.gpio_pin(gpio).ok_or_else(|| {
            GpiosError::InvalidParameter(format!(
                "Gpio \"{gpio}\" does not exist for this raspberry pi"
            ))
        })?;
        if mode == DeviceMode::Reserved {
            return Err(GpiosError::InvalidParameter(format!(
                "Parameter mode \"{}\" is invalid",
                mode.as_str()
            )));
        }
        if self.registry.find_by_gpio(gpio).is_some() {
            return Err(GpiosError::InvalidParameter(format!(
                "Gpio \"{gpio}\" is already configured"
            )));
        }

        let device = self.registry.add_device(Device {
            uuid: String::new(),
            name: name.to_string(),
            mode,
            pin,
            gpio: gpio.to_string(),
            keep,
            on: inverted,
            inverted,
            owner,
            kind: DEVICE_TYPE.to_string(),
            subtype: mode.as_str().to_string(),
        })?;

        if !self.controller.configure(&device) {
            warn!("Gpio {gpio} added but not configured");
        }

        Ok(device)
    }

    pub fn delete_gpio(&self, device_uuid: &str, sender: &str) -> Result<(), GpiosError> {
        let sender = command_sender(sender);

        require(device_uuid, "device_uuid")?;
        let device = self.registry.get_device(device_uuid).ok_or_else(|| {
            GpiosError::InvalidParameter(format!("Device \"{device_uuid}\" does not exist"))
        })?;
        if device.owner != sender {
            return Err(GpiosError::PermissionDenied(
                "Device can only be deleted by its owner".into(),
            ));
        }

        // watcher thread is gone before the registry forgets the device
        self.controller.release(&device);
        if let Err(e) = self.registry.delete_device(device_uuid) {
            warn!("Failed to delete device {device_uuid}, restoring its gpio: {e}");
            self.controller.configure(&device);
            return Err(GpiosError::Command(format!(
                "Failed to delete device \"{device_uuid}\""
            )));
        }
        self.events.forget(device_uuid);

        Ok(())
    }

    pub fn update_gpio(
        &self,
        device_uuid: &str,
        name: &str,
        keep: bool,
        inverted: bool,
        sender: &str,
    ) -> Result<Device, GpiosError> {
        let sender = command_sender(sender);

        require(device_uuid, "device_uuid")?;
        let mut device = self.registry.get_device(device_uuid).ok_or_else(|| {
            GpiosError::InvalidParameter(format!("Device \"{device_uuid}\" does not exist"))
        })?;
        require(name, "name")?;
        if device.owner != sender {
            return Err(GpiosError::PermissionDenied(
                "Device can only be updated by its owner".into(),
            ));
        }

        device.name = name.to_string();
        device.keep = keep;
        device.inverted = inverted;
        self.registry
            .update_device(device_uuid, &device)
            .map_err(|_| {
                GpiosError::Command(format!("Failed to update device \"{device_uuid}\""))
            })?;

        self.controller.reconfigure(&device);

        Ok(device)
    }

    pub fn turn_on(&self, device_uuid: &str) -> Result<(), GpiosError> {
        self.controller.turn_on(device_uuid)
    }

    pub fn turn_off(&self, device_uuid: &str) -> Result<(), GpiosError> {
        self.controller.turn_off(device_uuid)
    }

    /// Current state of an input or output device.
    pub fn is_on(&self, device_uuid: &str) -> Result<bool, GpiosError> {
        let device = self.get_device(device_uuid)?;

        match device.mode {
            DeviceMode::Reserved => Err(GpiosError::InvalidState(format!(
                "Gpio \"{}\" configured as \"{}\" cannot be checked",
                device.gpio,
                device.mode.as_str()
            ))),
            DeviceMode::Output | DeviceMode::Input => Ok(self
                .controller
                .device_state(device_uuid)
                .unwrap_or(device.on)),
        }
    }

    pub fn is_gpio_on(&self, gpio: &str) -> Result<bool, GpiosError> {
        self.controller.is_pin_high(gpio)
    }

    pub fn reset_gpios(&self) -> Result<(), GpiosError> {
        self.controller.reset_all()
    }
}
