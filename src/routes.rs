use log::warn;
use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, Responder, guard, http::Method, web};
use actix_ws::{Message, MessageStream, Session};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::device::DeviceMode;
use crate::error::GpiosError;
use crate::events::GpioEvent;
use crate::gpio::GpioBackend;
use crate::manager::GpioManager;

/// Header naming the component issuing a command, defaults to the rpc server.
pub const COMMAND_SENDER_HEADER: &str = "X-Command-Sender";
const DEFAULT_SENDER: &str = "rpcserver";

pub struct AppState<B: GpioBackend> {
    pub manager: Arc<GpioManager<B>>,
}

impl<B: GpioBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

#[derive(Deserialize)]
struct AddGpioPayload {
    name: Option<String>,
    gpio: Option<String>,
    mode: Option<DeviceMode>,
    keep: Option<bool>,
    inverted: Option<bool>,
}

#[derive(Deserialize)]
struct UpdateGpioPayload {
    name: Option<String>,
    keep: Option<bool>,
    inverted: Option<bool>,
}

#[derive(Deserialize)]
struct ReserveGpioPayload {
    name: Option<String>,
    gpio: Option<String>,
    usage: Option<String>,
}

#[derive(Deserialize, Default)]
struct EventsQuery {
    limit: Option<usize>,
}

#[derive(Deserialize, Default)]
struct UsageQuery {
    usage: Option<String>,
}

#[derive(Deserialize, Default)]
struct DeviceFilterQuery {
    device: Option<String>,
}

async fn handle_event_websocket(
    mut session: Session,
    mut client_stream: MessageStream,
    rx: broadcast::Receiver<GpioEvent>,
    device_filter: Option<String>,
) {
    let mut events = BroadcastStream::new(rx);

    loop {
        tokio::select! {
            msg = client_stream.recv() => {
                let Some(msg) = msg else { break; };

                match msg {
                    Ok(Message::Ping(bytes)) => {
                        let _ = session.pong(&bytes).await;
                    }
                    Ok(Message::Close(reason)) => {
                        let _ = session.close(reason).await;
                        break;
                    }
                    Ok(Message::Text(_))
                    | Ok(Message::Binary(_))
                    | Ok(Message::Pong(_))
                    | Ok(Message::Continuation(_))
                    | Ok(Message::Nop) => {}
                    Err(_) => break,
                }
            }
            event = events.next() => {
                let Some(event) = event else { break; };

                match event {
                    Ok(event) => {
                        if device_filter.as_ref().map(|d| *d == event.device_id).unwrap_or(true)
                            && let Ok(text) = serde_json::to_string(&event)
                            && session.text(text).await.is_err()
                        {
                            warn!("WebSocket client disconnected");
                            break;
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        if session.text(GpiosError::Gpio(format!("Event stream lagged by {n} messages")).to_string()).await.is_err() {
                            warn!("WebSocket client lagged and disconnected");
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl<B: GpioBackend + 'static> AppState<B> {
    pub fn api_scope(&self, base_path: &str) -> actix_web::Scope {
        web::scope(base_path)
            .service(
                web::resource("/config")
                    .route(web::get().to(module_config::<B>))
                    .route(not_allowed(&[Method::GET])),
            )
            .service(
                web::resource("/gpios")
                    .route(web::get().to(raspi_gpios::<B>))
                    .route(not_allowed(&[Method::GET])),
            )
            .service(
                web::resource("/gpios/assigned")
                    .route(web::get().to(assigned_gpios::<B>))
                    .route(not_allowed(&[Method::GET])),
            )
            .service(
                web::resource("/gpios/events")
                    .route(web::get().to(events_ws::<B>))
                    .route(not_allowed(&[Method::GET])),
            )
            .service(
                web::resource("/gpio/{gpio}/value")
                    .route(web::get().to(gpio_value::<B>))
                    .route(not_allowed(&[Method::GET])),
            )
            .service(
                web::resource("/gpio/{gpio}/reserved")
                    .route(web::get().to(gpio_reserved::<B>))
                    .route(not_allowed(&[Method::GET])),
            )
            .service(
                web::resource("/pins")
                    .route(web::get().to(pins_usage::<B>))
                    .route(not_allowed(&[Method::GET])),
            )
            .service(
                web::resource("/devices")
                    .route(web::get().to(list_devices::<B>))
                    .route(web::post().to(add_gpio::<B>))
                    .route(not_allowed(&[Method::GET, Method::POST])),
            )
            .service(
                web::resource("/devices/{uuid}")
                    .route(web::get().to(get_device::<B>))
                    .route(web::post().to(update_gpio::<B>))
                    .route(web::delete().to(delete_gpio::<B>))
                    .route(not_allowed(&[Method::GET, Method::POST, Method::DELETE])),
            )
            .service(
                web::resource("/devices/{uuid}/state")
                    .route(web::get().to(is_on::<B>))
                    .route(not_allowed(&[Method::GET])),
            )
            .service(
                web::resource("/devices/{uuid}/on")
                    .route(web::post().to(turn_on::<B>))
                    .route(not_allowed(&[Method::POST])),
            )
            .service(
                web::resource("/devices/{uuid}/off")
                    .route(web::post().to(turn_off::<B>))
                    .route(not_allowed(&[Method::POST])),
            )
            .service(
                web::resource("/devices/{uuid}/event")
                    .route(web::get().to(get_last_event::<B>))
                    .route(not_allowed(&[Method::GET])),
            )
            .service(
                web::resource("/devices/{uuid}/events")
                    .route(web::get().to(get_events::<B>))
                    .route(not_allowed(&[Method::GET])),
            )
            .service(
                web::resource("/reserved")
                    .route(web::get().to(reserved_gpios::<B>))
                    .route(web::post().to(reserve_gpio::<B>))
                    .route(not_allowed(&[Method::GET, Method::POST])),
            )
            .service(
                web::resource("/reset")
                    .route(web::post().to(reset_gpios::<B>))
                    .route(not_allowed(&[Method::POST])),
            )
    }
}

async fn module_config<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, GpiosError> {
    Ok(web::Json(state.manager.get_module_config()))
}

async fn raspi_gpios<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, GpiosError> {
    Ok(web::Json(state.manager.get_raspi_gpios()))
}

async fn assigned_gpios<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, GpiosError> {
    Ok(web::Json(state.manager.get_assigned_gpios()))
}

async fn pins_usage<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, GpiosError> {
    Ok(web::Json(state.manager.get_pins_usage()))
}

async fn gpio_value<B: GpioBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, GpiosError> {
    let gpio = path_param(&req, "gpio")?;

    Ok(web::Json(state.manager.is_gpio_on(gpio)?))
}

async fn gpio_reserved<B: GpioBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, GpiosError> {
    let gpio = path_param(&req, "gpio")?;

    Ok(web::Json(state.manager.is_reserved_gpio(gpio)))
}

async fn list_devices<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, GpiosError> {
    Ok(web::Json(state.manager.get_devices()))
}

async fn get_device<B: GpioBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, GpiosError> {
    let uuid = path_param(&req, "uuid")?;

    Ok(web::Json(state.manager.get_device(uuid)?))
}

async fn add_gpio<B: GpioBackend + 'static>(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, GpiosError> {
    let payload: AddGpioPayload = parse_payload(&body)?;

    let device = state.manager.add_gpio(
        &required(payload.name, "name")?,
        &required(payload.gpio, "gpio")?,
        required(payload.mode, "mode")?,
        required(payload.keep, "keep")?,
        required(payload.inverted, "inverted")?,
        command_sender(&req),
    )?;

    Ok(HttpResponse::Created().json(device))
}

async fn update_gpio<B: GpioBackend + 'static>(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, GpiosError> {
    let uuid = path_param(&req, "uuid")?;
    let payload: UpdateGpioPayload = parse_payload(&body)?;

    let device = state.manager.update_gpio(
        uuid,
        &required(payload.name, "name")?,
        required(payload.keep, "keep")?,
        required(payload.inverted, "inverted")?,
        command_sender(&req),
    )?;

    Ok(web::Json(device))
}

async fn delete_gpio<B: GpioBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, GpiosError> {
    let uuid = path_param(&req, "uuid")?;

    state.manager.delete_gpio(uuid, command_sender(&req))?;

    Ok(HttpResponse::NoContent())
}

async fn is_on<B: GpioBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, GpiosError> {
    let uuid = path_param(&req, "uuid")?;

    Ok(web::Json(json!({ "on": state.manager.is_on(uuid)? })))
}

async fn turn_on<B: GpioBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, GpiosError> {
    let uuid = path_param(&req, "uuid")?;

    state.manager.turn_on(uuid)?;

    Ok(HttpResponse::Ok())
}

async fn turn_off<B: GpioBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, GpiosError> {
    let uuid = path_param(&req, "uuid")?;

    state.manager.turn_off(uuid)?;

    Ok(HttpResponse::Ok())
}

async fn get_last_event<B: GpioBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, GpiosError> {
    let uuid = path_param(&req, "uuid")?;

    let last = state.manager.get_last_event(uuid)?;

    match last {
        Some(event) => Ok(HttpResponse::Ok().json(event)),
        None => Ok(HttpResponse::Ok().finish()),
    }
}

async fn get_events<B: GpioBackend + 'static>(
    req: HttpRequest,
    query: web::Query<EventsQuery>,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, GpiosError> {
    let uuid = path_param(&req, "uuid")?;

    let events = state.manager.get_events(uuid, query.limit)?;

    Ok(web::Json(events))
}

async fn reserved_gpios<B: GpioBackend + 'static>(
    query: web::Query<UsageQuery>,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, GpiosError> {
    let usage = query.usage.as_deref().unwrap_or_default();

    Ok(web::Json(state.manager.get_reserved_gpios(usage)?))
}

async fn reserve_gpio<B: GpioBackend + 'static>(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, GpiosError> {
    let payload: ReserveGpioPayload = parse_payload(&body)?;

    let device = state.manager.reserve_gpio(
        payload.name.as_deref().unwrap_or_default(),
        payload.gpio.as_deref().unwrap_or_default(),
        payload.usage.as_deref().unwrap_or_default(),
        command_sender(&req),
    )?;

    Ok(web::Json(device))
}

async fn reset_gpios<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, GpiosError> {
    state.manager.reset_gpios()?;

    Ok(HttpResponse::Ok())
}

async fn events_ws<B: GpioBackend + 'static>(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<DeviceFilterQuery>,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, GpiosError> {
    let rx = state.manager.subscribe_events();
    let device_filter = query.into_inner().device;
    let (response, session, client_stream) = actix_ws::handle(&req, stream)
        .map_err(|e| GpiosError::Gpio(format!("Websocket error: {e}")))?;

    actix_web::rt::spawn(async move {
        handle_event_websocket(session, client_stream, rx, device_filter).await;
    });

    Ok(response)
}

fn command_sender(req: &HttpRequest) -> &str {
    req.headers()
        .get(COMMAND_SENDER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_SENDER)
}

fn path_param<'a>(req: &'a HttpRequest, name: &str) -> Result<&'a str, GpiosError> {
    req.match_info()
        .get(name)
        .ok_or_else(|| GpiosError::MissingParameter(format!("Missing {name}")))
}

fn parse_payload<T: DeserializeOwned>(body: &[u8]) -> Result<T, GpiosError> {
    if body.is_empty() {
        return Err(GpiosError::InvalidParameter("Empty payload".into()));
    }

    serde_json::from_slice(body)
        .map_err(|e| GpiosError::InvalidParameter(format!("Invalid payload: {e}")))
}

fn required<T>(value: Option<T>, param: &str) -> Result<T, GpiosError> {
    value.ok_or_else(|| GpiosError::MissingParameter(format!("Parameter \"{param}\" is missing")))
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

fn not_allowed(methods: &[Method]) -> actix_web::Route {
    web::route()
        .guard(guard_not_methods(methods))
        .to(method_not_allowed)
}

fn guard_not_methods(methods: &[Method]) -> impl guard::Guard + use<> {
    let allowed: Vec<Method> = methods.to_vec();
    guard::fn_guard(move |ctx| !allowed.iter().any(|m| m == ctx.head().method))
}
