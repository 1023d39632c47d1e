mod common;

use std::sync::Arc;
use std::time::Duration;

use gpios::{
    AppConfig, DeviceMode, DeviceRegistry, EventName, GpioManager, GpiosError, Level,
    MemoryDeviceRegistry, MockGpioBackend,
};
use tempfile::TempDir;

use common::{FAST_TIMING, wait_until};

fn sample_config() -> AppConfig {
    serde_json::from_str(
        r#"
        {
            "http": {
                "host": "localhost:8080",
                "path": "/api/v1"
            },
            "revision": 3,
            "event_history_capacity": 16
        }
        "#,
    )
    .expect("valid sample config")
}

fn manager_with(
    registry: Arc<dyn DeviceRegistry>,
) -> (GpioManager<MockGpioBackend>, Arc<MockGpioBackend>) {
    manager_with_config(&sample_config(), registry)
}

fn manager_with_config(
    config: &AppConfig,
    registry: Arc<dyn DeviceRegistry>,
) -> (GpioManager<MockGpioBackend>, Arc<MockGpioBackend>) {
    let backend = Arc::new(MockGpioBackend::default());
    let manager = GpioManager::new(config, backend.clone(), registry).with_timing(FAST_TIMING);
    (manager, backend)
}

fn manager() -> (GpioManager<MockGpioBackend>, Arc<MockGpioBackend>) {
    manager_with(Arc::new(MemoryDeviceRegistry::default()))
}

#[test]
fn add_gpio_validates_parameters() {
    let (manager, _) = manager();
    manager
        .add_gpio("relay", "GPIO17", DeviceMode::Output, false, false, "rpcserver")
        .unwrap();

    let cases = [
        ("", "GPIO18", DeviceMode::Output),
        ("lamp", "", DeviceMode::Output),
        ("relay", "GPIO18", DeviceMode::Output),
        ("lamp", "GPIO99", DeviceMode::Output),
        ("lamp", "GPIO18", DeviceMode::Reserved),
        ("lamp", "GPIO17", DeviceMode::Input),
    ];
    for (name, gpio, mode) in cases {
        let res = manager.add_gpio(name, gpio, mode, false, false, "rpcserver");
        assert!(
            matches!(
                res,
                Err(GpiosError::MissingParameter(_)) | Err(GpiosError::InvalidParameter(_))
            ),
            "{name:?} {gpio:?} {mode:?} -> {res:?}"
        );
    }
}

#[test]
fn add_gpio_stores_and_configures_device() {
    let (manager, backend) = manager();

    let device = manager
        .add_gpio("button", "GPIO27", DeviceMode::Input, true, true, "rpcserver")
        .unwrap();

    assert_eq!(device.owner, "gpios");
    assert_eq!(device.subtype, "input");
    assert_eq!(device.kind, "gpio");
    assert_eq!(device.pin.number, 13);
    assert_eq!(device.pin.line, 27);
    assert!(device.on);
    assert!(backend.pin_setup(13).is_some());
    assert!(manager.controller().has_watcher(&device.uuid));
    assert_eq!(manager.get_assigned_gpios(), vec!["GPIO27".to_string()]);

    manager.stop().unwrap();
}

#[test]
fn delete_gpio_requires_owner() {
    let (manager, _) = manager();
    let device = manager
        .add_gpio("button", "GPIO27", DeviceMode::Input, false, false, "alarm")
        .unwrap();

    assert!(matches!(
        manager.delete_gpio(&device.uuid, "rpcserver"),
        Err(GpiosError::PermissionDenied(_))
    ));
    assert!(matches!(
        manager.delete_gpio("missing", "alarm"),
        Err(GpiosError::InvalidParameter(_))
    ));

    manager.delete_gpio(&device.uuid, "alarm").unwrap();

    assert!(!manager.controller().has_watcher(&device.uuid));
    assert_eq!(manager.controller().device_state(&device.uuid), None);
    assert!(matches!(
        manager.get_device(&device.uuid),
        Err(GpiosError::DeviceNotFound(_))
    ));
}

#[test]
fn update_gpio_relaunches_watcher() {
    let (manager, _) = manager();
    let device = manager
        .add_gpio("button", "GPIO27", DeviceMode::Input, false, false, "rpcserver")
        .unwrap();

    let updated = manager
        .update_gpio(&device.uuid, "doorbell", true, true, "gpios")
        .unwrap();

    assert_eq!(updated.name, "doorbell");
    assert!(updated.keep);
    assert!(updated.inverted);
    assert_eq!(manager.get_device(&device.uuid).unwrap(), updated);
    assert_eq!(
        manager.controller().watcher_trigger_level(&device.uuid),
        Some(Level::High)
    );
    assert!(matches!(
        manager.update_gpio(&device.uuid, "", true, true, "gpios"),
        Err(GpiosError::MissingParameter(_))
    ));
    assert!(matches!(
        manager.update_gpio(&device.uuid, "bell", true, true, "other"),
        Err(GpiosError::PermissionDenied(_))
    ));

    manager.stop().unwrap();
}

#[test]
fn reserve_gpio_is_idempotent_per_usage() {
    let (manager, backend) = manager();

    let reserved = manager
        .reserve_gpio("onewire", "GPIO4", "onewire", "onewire_module")
        .unwrap();
    let again = manager
        .reserve_gpio("other", "GPIO4", "onewire", "onewire_module")
        .unwrap();

    assert_eq!(reserved, again);
    assert_eq!(reserved.mode, DeviceMode::Reserved);
    assert!(backend.setup_calls().is_empty());
    assert!(matches!(
        manager.reserve_gpio("lirc", "GPIO4", "lirc", "lirc_module"),
        Err(GpiosError::InvalidParameter(_))
    ));
    assert!(matches!(
        manager.reserve_gpio("onewire", "GPIO5", "onewire", "onewire_module"),
        Err(GpiosError::InvalidParameter(_))
    ));
    assert!(matches!(
        manager.reserve_gpio("lirc", "GPIO5", "", "lirc_module"),
        Err(GpiosError::MissingParameter(_))
    ));

    assert!(manager.is_reserved_gpio("GPIO4"));
    assert!(!manager.is_reserved_gpio("GPIO5"));
    assert_eq!(manager.get_reserved_gpios("onewire").unwrap(), vec![reserved]);
    assert!(manager.get_reserved_gpios("lirc").unwrap().is_empty());
}

#[test]
fn is_on_follows_events() {
    let (manager, backend) = manager();
    let relay = manager
        .add_gpio("relay", "GPIO17", DeviceMode::Output, false, false, "rpcserver")
        .unwrap();
    let button = manager
        .add_gpio("button", "GPIO27", DeviceMode::Input, false, false, "rpcserver")
        .unwrap();
    let onewire = manager
        .reserve_gpio("onewire", "GPIO4", "onewire", "rpcserver")
        .unwrap();

    assert!(!manager.is_on(&relay.uuid).unwrap());
    manager.turn_on(&relay.uuid).unwrap();
    assert!(manager.is_on(&relay.uuid).unwrap());

    // input idles low: on for a non inverted input
    assert!(wait_until(Duration::from_secs(2), || manager
        .get_last_event(&button.uuid)
        .unwrap()
        .is_some()));
    assert!(manager.is_on(&button.uuid).unwrap());
    backend.set_level(button.pin.number, Level::High);
    assert!(wait_until(Duration::from_secs(2), || !manager
        .is_on(&button.uuid)
        .unwrap()));

    assert!(matches!(
        manager.is_on(&onewire.uuid),
        Err(GpiosError::InvalidState(_))
    ));
    manager.stop().unwrap();
}

#[test]
fn is_on_without_event_history() {
    let mut config = sample_config();
    config.event_history_capacity = 0;
    let (manager, backend) =
        manager_with_config(&config, Arc::new(MemoryDeviceRegistry::default()));
    let relay = manager
        .add_gpio("relay", "GPIO17", DeviceMode::Output, false, false, "rpcserver")
        .unwrap();
    let button = manager
        .add_gpio("button", "GPIO27", DeviceMode::Input, false, true, "rpcserver")
        .unwrap();

    manager.turn_on(&relay.uuid).unwrap();
    assert!(manager.is_on(&relay.uuid).unwrap());
    assert!(!manager.get_device(&relay.uuid).unwrap().on);

    // inverted input stored with on=true, but a low pin is off
    assert!(button.on);
    assert!(wait_until(Duration::from_secs(2), || !manager
        .is_on(&button.uuid)
        .unwrap()));
    backend.set_level(button.pin.number, Level::High);
    assert!(wait_until(Duration::from_secs(2), || manager
        .is_on(&button.uuid)
        .unwrap()));
    assert!(manager.get_last_event(&button.uuid).unwrap().is_none());

    manager.stop().unwrap();
}

#[test]
fn reset_gpios_turns_everything_off() {
    let (manager, _) = manager();
    let relay = manager
        .add_gpio("relay", "GPIO17", DeviceMode::Output, false, false, "rpcserver")
        .unwrap();
    manager.turn_on(&relay.uuid).unwrap();

    manager.reset_gpios().unwrap();

    let last = manager.get_last_event(&relay.uuid).unwrap().unwrap();
    assert_eq!(last.event, EventName::GpioOff);
}

#[test]
fn pins_usage_reports_assignment() {
    let (manager, _) = manager();
    manager
        .add_gpio("relay", "GPIO17", DeviceMode::Output, false, false, "alarm")
        .unwrap();

    let usage = manager.get_pins_usage();

    assert_eq!(usage.len(), 40);
    assert_eq!(usage[&1].label, "3.3V");
    assert!(usage[&1].gpio.is_none());
    let relay = usage[&11].gpio.as_ref().unwrap();
    assert!(relay.assigned);
    assert_eq!(relay.owner.as_deref(), Some("alarm"));
    assert!(!usage[&12].gpio.as_ref().unwrap().assigned);

    let config = manager.get_module_config();
    assert_eq!(config.revision, 3);
    assert_eq!(config.pinsnumber, 40);
    assert_eq!(manager.get_raspi_gpios().len(), 28);
}

#[test]
fn devices_survive_restart_with_kept_state() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gpios.json");

    let relay_uuid = {
        let registry = Arc::new(MemoryDeviceRegistry::open(&path).unwrap());
        let (manager, _) = manager_with(registry);
        let relay = manager
            .add_gpio("relay", "GPIO17", DeviceMode::Output, true, false, "rpcserver")
            .unwrap();
        manager.turn_on(&relay.uuid).unwrap();
        manager.stop().unwrap();
        relay.uuid
    };

    let registry = Arc::new(MemoryDeviceRegistry::open(&path).unwrap());
    let (manager, backend) = manager_with(registry);
    manager.start();

    let relay = manager.get_device(&relay_uuid).unwrap();
    assert!(relay.on);
    assert_eq!(backend.level(relay.pin.number), Some(Level::Low));
    let last = manager.get_last_event(&relay_uuid).unwrap().unwrap();
    assert_eq!(last.event, EventName::GpioOn);
}
