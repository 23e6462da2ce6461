use std::collections::HashMap;

use axum::{
    Json,
    extract::{Form, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use afyagate_core::UssdError;
use afyagate_core::models::OtpOutcome;

use crate::WebState;
use crate::dto::{
    RegisterRequest, RegisterResponse, SendOtpRequest, SendOtpResponse, SessionListResponse,
};
use crate::error::ussd_error_response;

/// The gateway callback. Always answers 200 with a gateway-formatted
/// plain-text payload; failure recovery is the engine's job.
pub async fn callback(
    State(state): State<WebState>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let handler = state.handler.clone();
    let body = match tokio::task::spawn_blocking(move || handler.handle(&form)).await {
        Ok(body) => body,
        Err(_) => format!(
            "END {}",
            afyagate_core::handler::SERVICE_UNAVAILABLE_MESSAGE
        ),
    };
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

pub async fn metrics(State(state): State<WebState>) -> Response {
    match state.handler.metrics() {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(err) => ussd_error_response(err, "metrics"),
    }
}

pub async fn sessions(State(state): State<WebState>) -> Response {
    match state.handler.active_sessions() {
        Ok(sessions) => {
            (StatusCode::OK, Json(SessionListResponse { sessions })).into_response()
        }
        Err(err) => ussd_error_response(err, "sessions.list"),
    }
}

/// Issuing a code sends an SMS through the blocking collaborator client,
/// so the work moves off the async workers like the callback route.
pub async fn send_otp(
    State(state): State<WebState>,
    Json(request): Json<SendOtpRequest>,
) -> Response {
    let handler = state.handler.clone();
    let phone = request.phone.clone();
    let result =
        tokio::task::spawn_blocking(move || handler.request_link_otp(&phone, request.user_id))
            .await;
    match result {
        Ok(Ok(())) => (
            StatusCode::OK,
            Json(SendOtpResponse {
                status: "ok".to_string(),
                message: format!("OTP sent to {}", request.phone),
            }),
        )
            .into_response(),
        Ok(Err(err)) => ussd_error_response(err, "otp.send"),
        Err(_) => ussd_error_response(
            UssdError::Internal("otp send task failed".to_string()),
            "otp.send",
        ),
    }
}

pub async fn register(
    State(state): State<WebState>,
    Json(request): Json<RegisterRequest>,
) -> Response {
    match state.handler.confirm_link(&request.phone, &request.otp) {
        Ok(OtpOutcome::Ok) => (
            StatusCode::OK,
            Json(RegisterResponse {
                status: "linked".to_string(),
                message: "Account linked. Dial the service code to start.".to_string(),
            }),
        )
            .into_response(),
        Ok(outcome) => {
            let message = match outcome {
                OtpOutcome::Expired => "Code expired. Request a new one.",
                OtpOutcome::AttemptsExceeded => "Too many attempts. Request a new code later.",
                _ => "Code does not match.",
            };
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(RegisterResponse {
                    status: "rejected".to_string(),
                    message: message.to_string(),
                }),
            )
                .into_response()
        }
        Err(err) => ussd_error_response(err, "otp.register"),
    }
}
