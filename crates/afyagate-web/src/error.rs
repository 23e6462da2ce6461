use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use afyagate_core::UssdError;

#[expect(
    clippy::needless_pass_by_value,
    reason = "handlers naturally own error values from `Result` and pass them through"
)]
pub fn ussd_error_response(err: UssdError, operation: &str) -> Response {
    let status = status_for_error(&err);
    let payload = err.to_payload(operation.to_string());
    (status, Json(payload)).into_response()
}

fn status_for_error(err: &UssdError) -> StatusCode {
    match err {
        UssdError::InvalidRequest(_) | UssdError::IllegalInput(_) | UssdError::Validation(_) => {
            StatusCode::BAD_REQUEST
        }
        UssdError::NotFound(_) | UssdError::SessionExpired(_) => StatusCode::NOT_FOUND,
        UssdError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        UssdError::OtpInvalid | UssdError::OtpExpired | UssdError::OtpAttemptsExceeded => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        UssdError::Collaborator(_) | UssdError::Http(_) => StatusCode::BAD_GATEWAY,
        UssdError::CollaboratorTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        UssdError::Sqlite(_) | UssdError::Json(_) | UssdError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
