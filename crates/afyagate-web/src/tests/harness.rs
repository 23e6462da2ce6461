use std::sync::{Arc, Mutex};

use axum::{
    Router,
    body::{Body, to_bytes},
    response::Response,
};

use afyagate_core::alert::EmergencyAlertService;
use afyagate_core::gateway::AfricasTalkingGateway;
use afyagate_core::models::{AlertReceipt, AlertRequest};
use afyagate_core::sms::SmsSender;
use afyagate_core::{CallbackHandler, EngineConfig, Result as CoreResult, SqliteUssdStore};

use crate::{WebState, app_router};

pub(super) struct RecordingAlerts {
    pub(super) calls: Mutex<Vec<AlertRequest>>,
}

impl EmergencyAlertService for RecordingAlerts {
    fn submit(&self, request: &AlertRequest) -> CoreResult<AlertReceipt> {
        self.calls
            .lock()
            .expect("alert mutex")
            .push(request.clone());
        Ok(AlertReceipt {
            alert_id: "alert-web-1".to_string(),
            expected_response_time: Some("IMMEDIATE".to_string()),
        })
    }
}

pub(super) struct RecordingSms {
    pub(super) messages: Mutex<Vec<(String, String)>>,
}

impl SmsSender for RecordingSms {
    fn send(&self, phone: &str, message: &str) -> CoreResult<()> {
        self.messages
            .lock()
            .expect("sms mutex")
            .push((phone.to_string(), message.to_string()));
        Ok(())
    }
}

pub(super) struct TestHarness {
    _temp: tempfile::TempDir,
    pub(super) state: WebState,
    pub(super) router: Router,
    pub(super) alerts: Arc<RecordingAlerts>,
    pub(super) sms: Arc<RecordingSms>,
}

impl TestHarness {
    pub(super) fn setup() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SqliteUssdStore::open(temp.path().join("ussd.db")).expect("store");
        let alerts = Arc::new(RecordingAlerts {
            calls: Mutex::new(Vec::new()),
        });
        let sms = Arc::new(RecordingSms {
            messages: Mutex::new(Vec::new()),
        });
        let handler = Arc::new(CallbackHandler::new(
            store,
            Arc::new(AfricasTalkingGateway),
            alerts.clone(),
            sms.clone(),
            EngineConfig::default(),
        ));

        let state = WebState { handler };
        let router = app_router(state.clone());
        Self {
            _temp: temp,
            state,
            router,
            alerts,
            sms,
        }
    }

    pub(super) fn last_sms(&self) -> Option<String> {
        self.sms
            .messages
            .lock()
            .expect("sms mutex")
            .last()
            .map(|(_, message)| message.clone())
    }
}

pub(super) async fn decode_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body bytes");
    serde_json::from_slice(&bytes).expect("decode json")
}

pub(super) async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body bytes");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

pub(super) fn callback_request(pairs: &[(&str, &str)]) -> axum::http::Request<Body> {
    let body = pairs
        .iter()
        .map(|(key, value)| format!("{}={}", form_encode(key), form_encode(value)))
        .collect::<Vec<_>>()
        .join("&");
    axum::http::Request::builder()
        .method("POST")
        .uri("/ussd/callback")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .expect("callback request")
}

#[expect(
    clippy::needless_pass_by_value,
    reason = "tests usually pass temporary `json!` values directly"
)]
pub(super) fn json_request(path: &str, body: serde_json::Value) -> axum::http::Request<Body> {
    axum::http::Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_vec(&body).expect("json request body"),
        ))
        .expect("json request")
}

fn form_encode(raw: &str) -> String {
    let mut out = String::new();
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'*' => {
                out.push(char::from(byte));
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
