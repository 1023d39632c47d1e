mod common;

use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{App, test, web};
use gpios::routes::COMMAND_SENDER_HEADER;
use gpios::{AppConfig, AppState, GpioManager, MemoryDeviceRegistry, MockGpioBackend};
use serde_json::Value;

use common::FAST_TIMING;

fn sample_config() -> AppConfig {
    serde_json::from_str(
        r#"
        {
            "http": {
                "host": "localhost:8080",
                "path": "/api/v1",
                "timeout": 30
            },
            "revision": 2,
            "broadcast_capacity": 16,
            "event_history_capacity": 32
        }
        "#,
    )
    .expect("valid sample config")
}

fn app_state() -> (AppState<MockGpioBackend>, String) {
    let cfg = sample_config();
    let backend = Arc::new(MockGpioBackend::default());
    let registry = Arc::new(MemoryDeviceRegistry::default());
    let manager = Arc::new(GpioManager::new(&cfg, backend, registry).with_timing(FAST_TIMING));
    (AppState { manager }, cfg.http.path)
}

macro_rules! init_app {
    () => {{
        let (state, scope_path) = app_state();
        test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .service(state.api_scope(&scope_path)),
        )
        .await
    }};
}

#[actix_rt::test]
async fn module_config_reports_revision() {
    let app = init_app!();

    let req = test::TestRequest::get().uri("/api/v1/config").to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(resp["revision"], 2);
    assert_eq!(resp["pinsnumber"], 26);
}

#[actix_rt::test]
async fn list_raspi_gpios() {
    let app = init_app!();

    let req = test::TestRequest::get().uri("/api/v1/gpios").to_request();
    let resp: HashMap<String, u32> = test::call_and_read_body_json(&app, req).await;

    assert_eq!(resp.len(), 17);
    assert_eq!(resp["GPIO27"], 13);
}

#[actix_rt::test]
async fn wrong_method_returns_405() {
    let app = init_app!();

    let req = test::TestRequest::post().uri("/api/v1/config").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 405);
}

#[actix_rt::test]
async fn unknown_device_returns_404() {
    let app = init_app!();

    let req = test::TestRequest::get()
        .uri("/api/v1/devices/nope")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    let req = test::TestRequest::post()
        .uri("/api/v1/devices/nope/on")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_rt::test]
async fn add_output_and_toggle_it() {
    let app = init_app!();

    let req = test::TestRequest::post()
        .uri("/api/v1/devices")
        .set_payload(
            r#"{"name":"relay","gpio":"GPIO17","mode":"output","keep":false,"inverted":false}"#,
        )
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let device: Value = test::read_body_json(resp).await;
    assert_eq!(device["owner"], "gpios");
    assert_eq!(device["type"], "gpio");
    let uuid = device["uuid"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/devices/{uuid}/on"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/devices/{uuid}/state"))
        .to_request();
    let state: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(state["on"], true);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/devices/{uuid}/events?limit=1"))
        .to_request();
    let events: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event"], "gpios.gpio.on");
    assert_eq!(events[0]["device_id"], uuid.as_str());
    assert_eq!(events[0]["params"]["gpio"], "GPIO17");
    assert_eq!(events[0]["params"]["init"], false);
    assert!(events[0]["params"].get("duration").is_none());
}

#[actix_rt::test]
async fn add_rejects_missing_and_invalid_parameters() {
    let app = init_app!();

    let req = test::TestRequest::post()
        .uri("/api/v1/devices")
        .set_payload(r#"{"name":"relay","gpio":"GPIO17","mode":"output","keep":false}"#)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let req = test::TestRequest::post()
        .uri("/api/v1/devices")
        .set_payload(
            r#"{"name":"relay","gpio":"GPIO5","mode":"output","keep":false,"inverted":false}"#,
        )
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let req = test::TestRequest::post()
        .uri("/api/v1/devices")
        .set_payload("not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_rt::test]
async fn turn_on_input_is_rejected() {
    let app = init_app!();

    let req = test::TestRequest::post()
        .uri("/api/v1/devices")
        .set_payload(
            r#"{"name":"button","gpio":"GPIO27","mode":"input","keep":false,"inverted":false}"#,
        )
        .to_request();
    let device: Value = test::call_and_read_body_json(&app, req).await;
    let uuid = device["uuid"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/devices/{uuid}/on"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/devices/{uuid}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 204);
}

#[actix_rt::test]
async fn delete_by_other_sender_is_forbidden() {
    let app = init_app!();

    let req = test::TestRequest::post()
        .uri("/api/v1/devices")
        .insert_header((COMMAND_SENDER_HEADER, "alarm"))
        .set_payload(
            r#"{"name":"siren","gpio":"GPIO18","mode":"output","keep":true,"inverted":false}"#,
        )
        .to_request();
    let device: Value = test::call_and_read_body_json(&app, req).await;
    let uuid = device["uuid"].as_str().unwrap().to_string();

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/devices/{uuid}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/devices/{uuid}"))
        .insert_header((COMMAND_SENDER_HEADER, "alarm"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 204);
}

#[actix_rt::test]
async fn reserve_and_query_reserved_gpios() {
    let app = init_app!();

    let req = test::TestRequest::post()
        .uri("/api/v1/reserved")
        .set_payload(r#"{"name":"onewire","gpio":"GPIO4","usage":"onewire"}"#)
        .to_request();
    let device: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(device["mode"], "reserved");
    assert_eq!(device["subtype"], "onewire");

    let req = test::TestRequest::get()
        .uri("/api/v1/gpio/GPIO4/reserved")
        .to_request();
    let reserved: bool = test::call_and_read_body_json(&app, req).await;
    assert!(reserved);

    let req = test::TestRequest::get()
        .uri("/api/v1/reserved?usage=onewire")
        .to_request();
    let devices: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(devices.len(), 1);

    let req = test::TestRequest::get().uri("/api/v1/reserved").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let req = test::TestRequest::get().uri("/api/v1/pins").to_request();
    let pins: HashMap<String, Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(pins.len(), 26);
    assert_eq!(pins["7"]["label"], "GPIO4");
    assert_eq!(pins["7"]["gpio"]["assigned"], true);
    assert_eq!(pins["7"]["gpio"]["owner"], "gpios");
    assert!(pins["6"]["gpio"].is_null());
}

#[actix_rt::test]
async fn read_raw_gpio_value() {
    let app = init_app!();

    let req = test::TestRequest::get()
        .uri("/api/v1/gpio/GPIO17/value")
        .to_request();
    let high: bool = test::call_and_read_body_json(&app, req).await;
    assert!(!high);

    let req = test::TestRequest::get()
        .uri("/api/v1/gpio/GPIO99/value")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}
