use std::collections::HashMap;

use crate::error::{Result, UssdError};
use crate::models::{NormalizedRequest, UssdOutcome};

/// Normalizes one carrier gateway's callback shape into the engine's view
/// and renders the engine's outcome back into that gateway's wire format.
/// Continuation vs. termination is a protocol-level flag the handset obeys.
pub trait GatewayAdapter: Send + Sync {
    fn parse(&self, form: &HashMap<String, String>) -> Result<NormalizedRequest>;
    fn format(&self, outcome: &UssdOutcome) -> String;
}

/// Africa's Talking convention: form fields `sessionId`, `phoneNumber`,
/// `text`, `serviceCode`; replies are `CON <text>` to keep the session
/// open and `END <text>` to close it.
#[derive(Debug, Clone, Default)]
pub struct AfricasTalkingGateway;

impl GatewayAdapter for AfricasTalkingGateway {
    fn parse(&self, form: &HashMap<String, String>) -> Result<NormalizedRequest> {
        let session_id = non_empty(form, "sessionId")
            .ok_or_else(|| UssdError::InvalidRequest("missing sessionId".to_string()))?;
        let raw_phone = non_empty(form, "phoneNumber")
            .or_else(|| non_empty(form, "phone"))
            .ok_or_else(|| UssdError::InvalidRequest("missing phoneNumber".to_string()))?;

        Ok(NormalizedRequest {
            session_id,
            phone_number: normalize_msisdn(&raw_phone)?,
            accumulated_text: form
                .get("text")
                .map(|raw| raw.trim().to_string())
                .unwrap_or_default(),
            service_code: form.get("serviceCode").cloned().unwrap_or_default(),
        })
    }

    fn format(&self, outcome: &UssdOutcome) -> String {
        match outcome {
            UssdOutcome::Continue(text) => format!("CON {text}"),
            UssdOutcome::Terminate(text) => format!("END {text}"),
        }
    }
}

fn non_empty(form: &HashMap<String, String>, key: &str) -> Option<String> {
    form.get(key)
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Folds gateway-specific MSISDN shapes into E.164: strips separators,
/// rewrites a `00` international prefix, and prepends the missing `+`.
pub fn normalize_msisdn(raw: &str) -> Result<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '(' && *c != ')')
        .collect();

    let digits = match compact.strip_prefix('+') {
        Some(rest) => rest.to_string(),
        None => match compact.strip_prefix("00") {
            Some(rest) => rest.to_string(),
            None => compact,
        },
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(UssdError::InvalidRequest(format!(
            "unparseable phone number: {raw}"
        )));
    }
    Ok(format!("+{digits}"))
}
