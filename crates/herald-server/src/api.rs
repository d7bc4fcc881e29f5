use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use herald_core::{DeliveryTime, DispatchService};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ApiError;

pub const ROUTE_ECHO_AT_TIME: &str = "/echoAtTime";
pub const BODY_SCHEDULED: &str = "Message scheduled successfully";

#[derive(Clone)]
struct AppState {
    service: DispatchService,
}

pub fn router(service: DispatchService) -> Router {
    Router::new()
        .route(ROUTE_ECHO_AT_TIME, post(echo_at_time))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
}

/// A validated submission.
#[derive(Debug)]
struct EchoRequest {
    time: DeliveryTime,
    message: String,
}

impl EchoRequest {
    /// `time` and `message` must both be present and truthy, and `message`
    /// must be a string. Presence is checked before the time is interpreted.
    fn from_body(body: &Value) -> Result<Self, ApiError> {
        let time = body.get("time").filter(|v| is_truthy(v));
        let message = body
            .get("message")
            .filter(|v| is_truthy(v))
            .and_then(Value::as_str);

        let (Some(time), Some(message)) = (time, message) else {
            return Err(ApiError::MissingFields);
        };

        let time = match time {
            Value::Number(n) => DeliveryTime::from(n.as_f64().ok_or(ApiError::InvalidTime)?),
            Value::String(s) => DeliveryTime::from(s.as_str()),
            _ => return Err(ApiError::InvalidTime),
        };
        Ok(Self {
            time,
            message: message.to_string(),
        })
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

async fn echo_at_time(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<&'static str, ApiError> {
    let request = EchoRequest::from_body(&body)?;
    let id = state
        .service
        .schedule_message(request.time, request.message)
        .await?;
    info!(msg_id = %id, "message accepted");
    Ok(BODY_SCHEDULED)
}
