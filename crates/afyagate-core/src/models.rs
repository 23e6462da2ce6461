use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Expired,
    Error,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "completed" => Self::Completed,
            "expired" => Self::Expired,
            "error" => Self::Error,
            _ => Self::Active,
        }
    }
}

/// One live USSD dialogue, keyed by the gateway-assigned session id.
///
/// `input_path` is the ordered keystroke sequence submitted so far
/// (`"2*5*1"` shape) and only ever grows within a session's lifetime;
/// `scratch` carries mid-flow values that are not menu-path semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub phone_number: String,
    pub linked_user_id: Option<i64>,
    pub input_path: String,
    pub scratch: BTreeMap<String, String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: &str, phone_number: &str, ttl_secs: u64, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            phone_number: phone_number.to_string(),
            linked_user_id: None,
            input_path: String::new(),
            scratch: BTreeMap::new(),
            status: SessionStatus::Active,
            created_at: now,
            last_activity_at: now,
            expires_at: now + Duration::seconds(ttl_secs as i64),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn push_token(&mut self, token: &str) {
        if self.input_path.is_empty() {
            self.input_path = token.to_string();
        } else {
            self.input_path = format!("{}*{}", self.input_path, token);
        }
    }

    pub fn scratch_get(&self, key: &str) -> Option<&str> {
        self.scratch.get(key).map(String::as_str)
    }

    pub fn scratch_set(&mut self, key: &str, value: impl Into<String>) {
        self.scratch.insert(key.to_string(), value.into());
    }

    /// Count of accumulated-text tokens consumed outside menu navigation
    /// (an OTP entry is a keystroke the gateway accumulates but the menu
    /// path does not carry).
    pub fn consumed_extra_tokens(&self) -> usize {
        self.scratch_get("otp_consumed")
            .and_then(|raw| raw.parse::<usize>().ok())
            .unwrap_or(0)
    }

    pub fn bump_consumed_extra_tokens(&mut self) {
        let next = self.consumed_extra_tokens() + 1;
        self.scratch_set("otp_consumed", next.to_string());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtpPurpose {
    Registration,
    Verification,
    Reset,
}

impl OtpPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Verification => "verification",
            Self::Reset => "reset",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "verification" => Self::Verification,
            "reset" => Self::Reset,
            _ => Self::Registration,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OtpRecord {
    pub id: i64,
    pub phone_number: String,
    pub code: String,
    pub purpose: OtpPurpose,
    pub attempts: u32,
    pub max_attempts: u32,
    pub is_used: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpOutcome {
    Ok,
    Invalid,
    Expired,
    AttemptsExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Success,
    Error,
    Timeout,
}

impl TxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "error" => Self::Error,
            "timeout" => Self::Timeout,
            _ => Self::Success,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    SessionStart,
    Navigation,
    InvalidInput,
    EmergencyAlert,
    Booking,
    Otp,
    Terminal,
    Exit,
    Rejected,
}

impl TxKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::Navigation => "navigation",
            Self::InvalidInput => "invalid_input",
            Self::EmergencyAlert => "emergency_alert",
            Self::Booking => "booking",
            Self::Otp => "otp",
            Self::Terminal => "terminal",
            Self::Exit => "exit",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "session_start" => Self::SessionStart,
            "invalid_input" => Self::InvalidInput,
            "emergency_alert" => Self::EmergencyAlert,
            "booking" => Self::Booking,
            "otp" => Self::Otp,
            "terminal" => Self::Terminal,
            "exit" => Self::Exit,
            "rejected" => Self::Rejected,
            _ => Self::Navigation,
        }
    }
}

/// Append-only audit row, one per inbound callback regardless of outcome.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionEntry {
    pub id: String,
    pub session_id: String,
    pub phone_number: String,
    pub linked_user_id: Option<i64>,
    pub kind: TxKind,
    pub menu_path: String,
    pub input_text: String,
    pub response_text: String,
    pub status: TxStatus,
    pub error_message: Option<String>,
    pub processing_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Gateway-independent view of one inbound callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRequest {
    pub session_id: String,
    pub phone_number: String,
    pub accumulated_text: String,
    pub service_code: String,
}

/// Protocol-level reply: keep the handset session open, or close it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UssdOutcome {
    Continue(String),
    Terminate(String),
}

impl UssdOutcome {
    pub fn text(&self) -> &str {
        match self {
            Self::Continue(text) | Self::Terminate(text) => text,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertRequest {
    pub severity: u8,
    pub symptoms: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertReceipt {
    pub alert_id: String,
    #[serde(default)]
    pub expected_response_time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkedPhone {
    pub phone_number: String,
    pub user_id: i64,
    pub verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorCount {
    pub message: String,
    pub count: u64,
}

/// Read-only operational snapshot for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub active_sessions: u64,
    pub transactions_last_hour: u64,
    pub errors_last_hour: u64,
    pub top_errors: Vec<ErrorCount>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub phone_number: String,
    pub input_path: String,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
