use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use flametech_core::{BridgeError, Intent, IntentSource, ThermostatMode};
use flametech_mqtt::MqttService;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::controller::{self, Outcome, Reconciler};
use crate::metrics::{self, Metrics};

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub mqtt: MqttService,
    pub metrics: Arc<Metrics>,
}

#[derive(Debug, Deserialize)]
pub struct SwitchPayload {
    pub on: bool,
}

#[derive(Debug, Deserialize)]
pub struct LevelPayload {
    pub level: f64,
}

/// `{}` enters heat at the remembered target, `{"target_f": 74}` heats to 74,
/// `{"mode": "off"}` leaves thermostat mode.
#[derive(Debug, Default, Deserialize)]
pub struct SmartPayload {
    pub mode: Option<String>,
    pub target_f: Option<f64>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/version", get(version))
        .route("/metrics", get(metrics_handler))
        .route("/api/fireplace/state", get(api_state))
        .route("/api/fireplace/power", post(api_power))
        .route("/api/fireplace/smart", post(api_smart))
        .route("/api/fireplace/fan", post(api_fan))
        .route("/api/fireplace/flame", post(api_flame))
        .route("/api/fireplace/overhead", post(api_overhead))
        .route("/api/fireplace/split", post(api_split))
        .route("/api/fireplace/ember", post(api_ember))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<AppState>) -> StatusCode {
    // MQTT must be up and at least one poll must have landed
    if state.mqtt.is_ready() && state.metrics.has_polled() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn version() -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics_handler() -> Response {
    let (content_type, body) = metrics::render();
    ([(axum::http::header::CONTENT_TYPE, content_type)], body).into_response()
}

async fn api_state(State(state): State<AppState>) -> Response {
    match state.reconciler.refresh().await {
        Ok(current) => Json(json!({ "ok": true, "state": current })).into_response(),
        Err(e) => failure(&e),
    }
}

async fn api_power(State(state): State<AppState>, body: Result<Json<SwitchPayload>, JsonRejection>) -> Response {
    match body {
        Ok(Json(p)) => run_intent(&state.reconciler, &state.metrics, Intent::Power(p.on)).await,
        Err(e) => bad_request(e.body_text()),
    }
}

async fn api_smart(State(state): State<AppState>, body: Result<Json<SmartPayload>, JsonRejection>) -> Response {
    let payload = match body {
        Ok(Json(p)) => p,
        Err(e) => return bad_request(e.body_text()),
    };
    match smart_intent(&payload) {
        Ok(intent) => run_intent(&state.reconciler, &state.metrics, intent).await,
        Err(msg) => bad_request(msg),
    }
}

async fn api_fan(State(state): State<AppState>, body: Result<Json<LevelPayload>, JsonRejection>) -> Response {
    level_route(&state, body, Intent::Fan).await
}

async fn api_flame(State(state): State<AppState>, body: Result<Json<LevelPayload>, JsonRejection>) -> Response {
    level_route(&state, body, Intent::Flame).await
}

async fn api_overhead(State(state): State<AppState>, body: Result<Json<LevelPayload>, JsonRejection>) -> Response {
    level_route(&state, body, Intent::Overhead).await
}

async fn api_split(State(state): State<AppState>, body: Result<Json<SwitchPayload>, JsonRejection>) -> Response {
    match body {
        Ok(Json(p)) => run_intent(&state.reconciler, &state.metrics, Intent::Split(p.on)).await,
        Err(e) => bad_request(e.body_text()),
    }
}

async fn api_ember(State(state): State<AppState>, body: Result<Json<SwitchPayload>, JsonRejection>) -> Response {
    match body {
        Ok(Json(p)) => run_intent(&state.reconciler, &state.metrics, Intent::Ember(p.on)).await,
        Err(e) => bad_request(e.body_text()),
    }
}

async fn level_route(
    state: &AppState,
    body: Result<Json<LevelPayload>, JsonRejection>,
    build: fn(u8) -> Intent,
) -> Response {
    let level = match body {
        Ok(Json(p)) => p.level,
        Err(e) => return bad_request(e.body_text()),
    };
    match whole_number(level, "level") {
        Ok(value) => run_intent(&state.reconciler, &state.metrics, build(value)).await,
        Err(msg) => bad_request(msg),
    }
}

pub fn smart_intent(payload: &SmartPayload) -> Result<Intent, String> {
    if let Some(mode) = payload.mode.as_deref() {
        let mode = ThermostatMode::parse(mode).ok_or_else(|| format!("unknown thermostat mode {mode:?}"))?;
        if mode == ThermostatMode::Off || payload.target_f.is_none() {
            return Ok(Intent::ThermostatMode(mode));
        }
    }
    match payload.target_f {
        Some(target) => whole_number(target, "target_f").map(Intent::Temperature),
        None => Ok(Intent::ThermostatMode(ThermostatMode::Heat)),
    }
}

fn whole_number(value: f64, field: &str) -> Result<u8, String> {
    if !value.is_finite() || value < 0.0 || value > f64::from(u8::MAX) {
        return Err(format!("{field} must be between 0 and 255"));
    }
    Ok(value.round() as u8)
}

/// Runs an API intent through the controller and shapes the reply.
pub async fn run_intent(reconciler: &Reconciler, metrics: &Metrics, intent: Intent) -> Response {
    let received_at = controller::now();
    match reconciler.handle(intent, IntentSource::Api, received_at).await {
        Ok(outcome) => {
            metrics.record_intent(intent.kind(), outcome.label());
            match outcome {
                Outcome::Applied { commands, state } => {
                    metrics.commands_dispatched_total.inc_by(commands.len() as u64);
                    Json(json!({ "ok": true, "commands": commands, "state": state })).into_response()
                }
                Outcome::Interrupted { commands, error, state } => {
                    metrics.commands_dispatched_total.inc_by(commands.len() as u64);
                    warn!(error = %error, kind = intent.kind(), sent = commands.len(), "API intent interrupted");
                    let body = json!({
                        "ok": false,
                        "error": error.kind(),
                        "message": error.to_string(),
                        "commands": commands,
                        "state": state,
                    });
                    (failure_status(&error), Json(body)).into_response()
                }
                Outcome::Discarded(reason) => (
                    StatusCode::CONFLICT,
                    Json(json!({ "ok": false, "error": "discarded", "message": reason.as_str() })),
                )
                    .into_response(),
            }
        }
        Err(e) => {
            metrics.record_intent(intent.kind(), e.kind());
            warn!(error = %e, kind = intent.kind(), "API intent failed");
            failure(&e)
        }
    }
}

fn failure_status(e: &BridgeError) -> StatusCode {
    match e {
        BridgeError::TransportUnavailable(_) => StatusCode::BAD_GATEWAY,
        BridgeError::DataUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        BridgeError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
    }
}

fn failure(e: &BridgeError) -> Response {
    let body = json!({ "ok": false, "error": e.kind(), "message": e.to_string() });
    (failure_status(e), Json(body)).into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    let message: String = message.into();
    (StatusCode::BAD_REQUEST, Json(json!({ "ok": false, "error": "bad_payload", "message": message }))).into_response()
}
