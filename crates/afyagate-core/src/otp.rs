use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::models::{OtpOutcome, OtpPurpose};
use crate::sms::SmsSender;
use crate::store::SqliteUssdStore;

/// Issues and checks short-lived numeric codes for phone-to-account
/// linking. Attempt counting is unconditional: every `verify` call costs
/// one attempt whether or not the code matches.
#[derive(Clone)]
pub struct OtpVerifier {
    store: SqliteUssdStore,
    sms: Arc<dyn SmsSender>,
    length: usize,
    ttl_secs: u64,
    max_attempts: u32,
}

impl std::fmt::Debug for OtpVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpVerifier")
            .field("length", &self.length)
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl OtpVerifier {
    pub fn new(store: SqliteUssdStore, sms: Arc<dyn SmsSender>, config: &EngineConfig) -> Self {
        Self {
            store,
            sms,
            length: config.otp_length,
            ttl_secs: config.otp_ttl_secs,
            max_attempts: config.otp_max_attempts,
        }
    }

    /// Generates a fresh code, retires any unused one for the same
    /// `(phone, purpose)` pair, and hands the code to the SMS sender.
    pub fn issue(
        &self,
        phone_number: &str,
        purpose: OtpPurpose,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let code = generate_code(self.length);
        self.store.insert_otp(
            phone_number,
            &code,
            purpose,
            self.max_attempts,
            self.ttl_secs,
            now,
        )?;
        self.sms.send(
            phone_number,
            &format!(
                "Your AfyaGate code is {code}. It expires in {} minutes.",
                self.ttl_secs.div_ceil(60)
            ),
        )?;
        Ok(code)
    }

    pub fn verify(
        &self,
        phone_number: &str,
        purpose: OtpPurpose,
        submitted: &str,
        now: DateTime<Utc>,
    ) -> Result<OtpOutcome> {
        let Some(record) = self.store.latest_otp(phone_number, purpose)? else {
            return Ok(OtpOutcome::Invalid);
        };

        let attempts = self.store.bump_otp_attempts(record.id)?;

        if record.is_used {
            return Ok(OtpOutcome::Invalid);
        }
        if now >= record.expires_at {
            return Ok(OtpOutcome::Expired);
        }
        if attempts > record.max_attempts {
            return Ok(OtpOutcome::AttemptsExceeded);
        }

        if record.code == submitted.trim() {
            self.store.mark_otp_used(record.id, now)?;
            return Ok(OtpOutcome::Ok);
        }

        if attempts >= record.max_attempts {
            Ok(OtpOutcome::AttemptsExceeded)
        } else {
            Ok(OtpOutcome::Invalid)
        }
    }
}

fn generate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10)))
        .collect()
}
