use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue};

use crate::config::{read_env_u64, read_non_empty_env};
use crate::error::{Result, UssdError};
use crate::models::{AlertReceipt, AlertRequest};

pub const ALERT_URL_ENV: &str = "AFYAGATE_ALERT_URL";
pub const ALERT_API_KEY_ENV: &str = "AFYAGATE_ALERT_API_KEY";
pub const ALERT_TIMEOUT_MS_ENV: &str = "AFYAGATE_ALERT_TIMEOUT_MS";

/// Emergency triage collaborator. The timeout is deliberately tight: the
/// gateway abandons a USSD turn after a few seconds, so a slow triage
/// backend must degrade into the local fallback message, not a stall.
pub trait EmergencyAlertService: Send + Sync {
    fn submit(&self, request: &AlertRequest) -> Result<AlertReceipt>;
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl AlertConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            base_url: normalize_base_url(
                &read_non_empty_env(ALERT_URL_ENV)
                    .unwrap_or_else(|| "http://127.0.0.1:8600".to_string()),
            ),
            api_key: read_non_empty_env(ALERT_API_KEY_ENV),
            timeout_ms: read_env_u64(ALERT_TIMEOUT_MS_ENV, 3000, 1),
        }
    }
}

#[derive(Clone)]
pub struct HttpEmergencyAlerts {
    config: AlertConfig,
    http: Client,
}

impl std::fmt::Debug for HttpEmergencyAlerts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmergencyAlerts")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpEmergencyAlerts {
    pub fn new(config: AlertConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|e| UssdError::Validation(format!("invalid {ALERT_API_KEY_ENV}: {e}")))?;
            headers.insert("api-key", value);
        }

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self { config, http })
    }
}

impl EmergencyAlertService for HttpEmergencyAlerts {
    fn submit(&self, request: &AlertRequest) -> Result<AlertReceipt> {
        let url = format!("{}/emergency/triage", self.config.base_url);
        let resp = self.http.post(url).json(request).send().map_err(|e| {
            if e.is_timeout() {
                UssdError::CollaboratorTimeout(format!(
                    "alert submit exceeded {}ms: {e}",
                    self.config.timeout_ms
                ))
            } else {
                UssdError::Collaborator(format!("alert submit failed: {e}"))
            }
        })?;
        if !resp.status().is_success() {
            return Err(UssdError::Collaborator(format!(
                "alert submit failed with status {}",
                resp.status()
            )));
        }

        let receipt = resp
            .json::<AlertReceipt>()
            .map_err(|e| UssdError::Collaborator(format!("alert receipt unreadable: {e}")))?;
        Ok(receipt)
    }
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim_end_matches('/').to_string()
}
