use serde::{Deserialize, Serialize};

use afyagate_core::models::SessionSummary;

#[derive(Debug, Deserialize)]
pub struct SendOtpRequest {
    pub phone: String,
    pub user_id: i64,
}

#[derive(Debug, Serialize)]
pub struct SendOtpResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub phone: String,
    pub otp: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
}
