use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::json;

use crate::config::{read_env_u64, read_non_empty_env};
use crate::error::{Result, UssdError};

pub const SMS_URL_ENV: &str = "AFYAGATE_SMS_URL";
pub const SMS_API_KEY_ENV: &str = "AFYAGATE_SMS_API_KEY";
pub const SMS_SENDER_ID_ENV: &str = "AFYAGATE_SMS_SENDER_ID";
pub const SMS_TIMEOUT_MS_ENV: &str = "AFYAGATE_SMS_TIMEOUT_MS";

/// Outbound SMS collaborator: OTP delivery and action confirmations.
pub trait SmsSender: Send + Sync {
    fn send(&self, phone: &str, message: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub sender_id: Option<String>,
    pub timeout_ms: u64,
}

impl SmsConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            base_url: normalize_base_url(
                &read_non_empty_env(SMS_URL_ENV)
                    .unwrap_or_else(|| "http://127.0.0.1:8601".to_string()),
            ),
            api_key: read_non_empty_env(SMS_API_KEY_ENV),
            sender_id: read_non_empty_env(SMS_SENDER_ID_ENV),
            timeout_ms: read_env_u64(SMS_TIMEOUT_MS_ENV, 3000, 1),
        }
    }
}

#[derive(Clone)]
pub struct HttpSmsSender {
    config: SmsConfig,
    http: Client,
}

impl std::fmt::Debug for HttpSmsSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSmsSender")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpSmsSender {
    pub fn new(config: SmsConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|e| UssdError::Validation(format!("invalid {SMS_API_KEY_ENV}: {e}")))?;
            headers.insert("api-key", value);
        }

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self { config, http })
    }
}

impl SmsSender for HttpSmsSender {
    fn send(&self, phone: &str, message: &str) -> Result<()> {
        let url = format!("{}/sms/v1/send", self.config.base_url);
        let mut body = json!({
            "to": phone,
            "message": message,
        });
        if let Some(sender_id) = &self.config.sender_id {
            body["from"] = json!(sender_id);
        }

        let resp = self.http.post(url).json(&body).send().map_err(|e| {
            if e.is_timeout() {
                UssdError::CollaboratorTimeout(format!(
                    "sms send exceeded {}ms: {e}",
                    self.config.timeout_ms
                ))
            } else {
                UssdError::Collaborator(format!("sms send failed: {e}"))
            }
        })?;
        if !resp.status().is_success() {
            return Err(UssdError::Collaborator(format!(
                "sms send failed with status {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim_end_matches('/').to_string()
}
