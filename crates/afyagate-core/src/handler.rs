use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::alert::EmergencyAlertService;
use crate::config::EngineConfig;
use crate::error::{Result, UssdError};
use crate::gateway::{GatewayAdapter, normalize_msisdn};
use crate::menu::{self, ActionKind, MenuOutcome, NewToken};
use crate::models::{
    AlertRequest, MetricsSnapshot, NormalizedRequest, OtpOutcome, OtpPurpose, Session,
    SessionSummary, TransactionEntry, TxKind, TxStatus, UssdOutcome,
};
use crate::otp::OtpVerifier;
use crate::sms::SmsSender;
use crate::store::SqliteUssdStore;

pub const INVALID_REQUEST_MESSAGE: &str = "Invalid request.";
pub const SERVICE_UNAVAILABLE_MESSAGE: &str =
    "Service temporarily unavailable.\nPlease try again later.";
pub const SESSION_RATE_MESSAGE: &str =
    "Too many requests from this number.\nPlease try again later.";
pub const ALERT_RATE_MESSAGE: &str =
    "Too many emergency alerts from this number.\nPlease call the emergency line directly.";
pub const ALERT_FALLBACK_MESSAGE: &str =
    "Request recorded. You will be contacted shortly.\nIf this is life-threatening, call the emergency line now.";
pub const NO_ACCOUNT_MESSAGE: &str =
    "No account is linked to this phone.\nRegister on the AfyaGate portal first.";
pub const OTP_SEND_FAILED_MESSAGE: &str =
    "We could not send a verification code.\nPlease try again later.";
pub const OTP_WRONG_MESSAGE: &str = "That code is not correct. Try again.\n0. Exit";
pub const OTP_EXPIRED_MESSAGE: &str = "That code has expired.\nDial again to request a new one.";
pub const OTP_EXHAUSTED_MESSAGE: &str = "Too many incorrect codes.\nPlease try again later.";

struct Turn {
    outcome: UssdOutcome,
    kind: TxKind,
    status: TxStatus,
    error_message: Option<String>,
    menu_path: String,
    linked_user_id: Option<i64>,
}

/// A timed-out collaborator is logged as `timeout`, everything else as
/// `error`; the handset-facing outcome is the same best-effort message.
fn failure_status(err: &UssdError) -> TxStatus {
    match err {
        UssdError::CollaboratorTimeout(_) => TxStatus::Timeout,
        _ => TxStatus::Error,
    }
}

impl Turn {
    fn rejected(message: &str) -> Self {
        Self {
            outcome: UssdOutcome::Terminate(message.to_string()),
            kind: TxKind::Rejected,
            status: TxStatus::Success,
            error_message: None,
            menu_path: String::new(),
            linked_user_id: None,
        }
    }

    fn of(session: &Session, outcome: UssdOutcome, kind: TxKind) -> Self {
        Self {
            outcome,
            kind,
            status: TxStatus::Success,
            error_message: None,
            menu_path: session.input_path.clone(),
            linked_user_id: session.linked_user_id,
        }
    }
}

/// Ties the pieces together, one inbound callback at a time: adapt,
/// rate-limit, load-or-create, evaluate, act, persist, log, respond.
/// Collaborator failures never fail the turn; only a store failure may.
pub struct CallbackHandler {
    store: SqliteUssdStore,
    gateway: Arc<dyn GatewayAdapter>,
    alerts: Arc<dyn EmergencyAlertService>,
    sms: Arc<dyn SmsSender>,
    otp: OtpVerifier,
    config: EngineConfig,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CallbackHandler {
    pub fn new(
        store: SqliteUssdStore,
        gateway: Arc<dyn GatewayAdapter>,
        alerts: Arc<dyn EmergencyAlertService>,
        sms: Arc<dyn SmsSender>,
        config: EngineConfig,
    ) -> Self {
        let otp = OtpVerifier::new(store.clone(), sms.clone(), &config);
        Self {
            store,
            gateway,
            alerts,
            sms,
            otp,
            config,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Entry point per gateway callback. Always produces a well-formed
    /// gateway payload; malformed input and store outages degrade into
    /// terminal messages rather than propagated failures.
    pub fn handle(&self, form: &HashMap<String, String>) -> String {
        let started = Instant::now();

        let request = match self.gateway.parse(form) {
            Ok(request) => request,
            Err(err) => {
                let outcome = UssdOutcome::Terminate(INVALID_REQUEST_MESSAGE.to_string());
                let entry = TransactionEntry {
                    id: Uuid::new_v4().to_string(),
                    session_id: form.get("sessionId").cloned().unwrap_or_default(),
                    phone_number: form.get("phoneNumber").cloned().unwrap_or_default(),
                    linked_user_id: None,
                    kind: TxKind::Rejected,
                    menu_path: String::new(),
                    input_text: form.get("text").cloned().unwrap_or_default(),
                    response_text: outcome.text().to_string(),
                    status: TxStatus::Error,
                    error_message: Some(err.to_string()),
                    processing_time_ms: started.elapsed().as_millis() as u64,
                    created_at: Utc::now(),
                };
                let _ = self.store.append_transaction(&entry);
                return self.gateway.format(&outcome);
            }
        };

        // Serialize callbacks sharing a session id; the gateway does not
        // normally overlap them, so this only guards retried deliveries.
        let lock = self.session_lock(&request.session_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let turn = match self.process(&request) {
            Ok(turn) => turn,
            Err(err) => Turn {
                outcome: UssdOutcome::Terminate(SERVICE_UNAVAILABLE_MESSAGE.to_string()),
                kind: TxKind::Rejected,
                status: TxStatus::Error,
                error_message: Some(err.to_string()),
                menu_path: String::new(),
                linked_user_id: None,
            },
        };

        let entry = TransactionEntry {
            id: Uuid::new_v4().to_string(),
            session_id: request.session_id.clone(),
            phone_number: request.phone_number.clone(),
            linked_user_id: turn.linked_user_id,
            kind: turn.kind,
            menu_path: turn.menu_path.clone(),
            input_text: request.accumulated_text.clone(),
            response_text: turn.outcome.text().to_string(),
            status: turn.status,
            error_message: turn.error_message.clone(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            created_at: Utc::now(),
        };
        let _ = self.store.append_transaction(&entry);

        self.gateway.format(&turn.outcome)
    }

    fn process(&self, request: &NormalizedRequest) -> Result<Turn> {
        let now = Utc::now();

        let (mut session, created) = match self.store.get_session(&request.session_id, now)? {
            Some(session) => (session, false),
            None => {
                let since = self.window_start(now);
                let recent = self.store.count_transactions_since(
                    &request.phone_number,
                    TxKind::SessionStart,
                    since,
                )?;
                if recent >= u64::from(self.config.max_sessions_per_window) {
                    return Ok(Turn::rejected(SESSION_RATE_MESSAGE));
                }
                let linked = self.store.linked_user_for(&request.phone_number)?;
                let session = self.store.create_session(
                    &request.session_id,
                    &request.phone_number,
                    linked,
                    self.config.session_ttl_secs,
                    now,
                )?;
                (session, true)
            }
        };

        if session.scratch_get(menu::SCRATCH_AWAITING_OTP) == Some("1") {
            return self.otp_substep(&mut session, request, now);
        }

        let token = match menu::extract_new_token(&session, &request.accumulated_text) {
            NewToken::One(token) => Some(token),
            NewToken::None => None,
            NewToken::OutOfSync => {
                let prompt = menu::render_current(&session);
                self.save(&mut session, now)?;
                let kind = if created {
                    TxKind::SessionStart
                } else {
                    TxKind::Navigation
                };
                return Ok(Turn::of(&session, UssdOutcome::Continue(prompt), kind));
            }
        };

        match menu::evaluate(&mut session, token.as_deref()) {
            MenuOutcome::Prompt(prompt) => {
                if session.input_path == "5"
                    && session.linked_user_id.is_none()
                    && session.scratch_get(menu::SCRATCH_AWAITING_OTP).is_none()
                {
                    return self.begin_identity_gate(&mut session, prompt, now);
                }
                self.save(&mut session, now)?;
                let kind = if created {
                    TxKind::SessionStart
                } else {
                    TxKind::Navigation
                };
                Ok(Turn::of(&session, UssdOutcome::Continue(prompt), kind))
            }
            MenuOutcome::Invalid(prompt) => {
                self.save(&mut session, now)?;
                Ok(Turn::of(
                    &session,
                    UssdOutcome::Continue(prompt),
                    TxKind::InvalidInput,
                ))
            }
            MenuOutcome::Action(action) => self.execute_action(action, &mut session, now),
        }
    }

    /// The caller has entered the identity-gated flow without a verified
    /// link: issue a verification code and hold the session on the gate.
    fn begin_identity_gate(
        &self,
        session: &mut Session,
        prompt: String,
        now: DateTime<Utc>,
    ) -> Result<Turn> {
        if self.store.pending_link_for(&session.phone_number)?.is_none() {
            self.remove_session(session)?;
            return Ok(Turn::of(
                session,
                UssdOutcome::Terminate(NO_ACCOUNT_MESSAGE.to_string()),
                TxKind::Terminal,
            ));
        }

        match self
            .otp
            .issue(&session.phone_number, OtpPurpose::Verification, now)
        {
            Ok(_) => {
                session.scratch_set(menu::SCRATCH_AWAITING_OTP, "1");
                self.save(session, now)?;
                Ok(Turn::of(
                    session,
                    UssdOutcome::Continue(prompt),
                    TxKind::Otp,
                ))
            }
            Err(
                err @ (UssdError::Collaborator(_)
                | UssdError::CollaboratorTimeout(_)
                | UssdError::Http(_)),
            ) => {
                self.remove_session(session)?;
                let mut turn = Turn::of(
                    session,
                    UssdOutcome::Terminate(OTP_SEND_FAILED_MESSAGE.to_string()),
                    TxKind::Otp,
                );
                turn.status = failure_status(&err);
                turn.error_message = Some(err.to_string());
                Ok(turn)
            }
            Err(err) => Err(err),
        }
    }

    /// The next token is an OTP code, not a menu choice. It is consumed
    /// outside `input_path` semantics and accounted for so later tokens
    /// still line up with the accumulated text.
    fn otp_substep(
        &self,
        session: &mut Session,
        request: &NormalizedRequest,
        now: DateTime<Utc>,
    ) -> Result<Turn> {
        let token = match menu::extract_new_token(session, &request.accumulated_text) {
            NewToken::One(token) => token,
            NewToken::None | NewToken::OutOfSync => {
                let prompt = menu::render_current(session);
                self.save(session, now)?;
                return Ok(Turn::of(session, UssdOutcome::Continue(prompt), TxKind::Otp));
            }
        };

        if token == "0" {
            return self.execute_action(ActionKind::Exit, session, now);
        }

        let outcome =
            self.otp
                .verify(&session.phone_number, OtpPurpose::Verification, &token, now)?;
        session.bump_consumed_extra_tokens();

        match outcome {
            OtpOutcome::Ok => {
                self.store.mark_phone_verified(&session.phone_number, now)?;
                session.linked_user_id = self.store.linked_user_for(&session.phone_number)?;
                session.scratch.remove(menu::SCRATCH_AWAITING_OTP);
                let prompt = menu::render_current(session);
                self.save(session, now)?;
                Ok(Turn::of(session, UssdOutcome::Continue(prompt), TxKind::Otp))
            }
            OtpOutcome::Invalid => {
                self.save(session, now)?;
                Ok(Turn::of(
                    session,
                    UssdOutcome::Continue(OTP_WRONG_MESSAGE.to_string()),
                    TxKind::Otp,
                ))
            }
            OtpOutcome::Expired => {
                self.remove_session(session)?;
                Ok(Turn::of(
                    session,
                    UssdOutcome::Terminate(OTP_EXPIRED_MESSAGE.to_string()),
                    TxKind::Otp,
                ))
            }
            OtpOutcome::AttemptsExceeded => {
                self.remove_session(session)?;
                Ok(Turn::of(
                    session,
                    UssdOutcome::Terminate(OTP_EXHAUSTED_MESSAGE.to_string()),
                    TxKind::Otp,
                ))
            }
        }
    }

    fn execute_action(
        &self,
        action: ActionKind,
        session: &mut Session,
        now: DateTime<Utc>,
    ) -> Result<Turn> {
        match action {
            ActionKind::Exit => {
                self.remove_session(session)?;
                Ok(Turn::of(
                    session,
                    UssdOutcome::Terminate(menu::EXIT_MESSAGE.to_string()),
                    TxKind::Exit,
                ))
            }
            ActionKind::SubmitEmergency => self.submit_emergency(session, now),
            ActionKind::CancelEmergency => {
                self.remove_session(session)?;
                Ok(Turn::of(
                    session,
                    UssdOutcome::Terminate("Alert cancelled.".to_string()),
                    TxKind::Terminal,
                ))
            }
            ActionKind::ConfirmBooking => self.confirm_booking(session, now),
            ActionKind::CancelBooking => {
                self.remove_session(session)?;
                Ok(Turn::of(
                    session,
                    UssdOutcome::Terminate("Booking cancelled.".to_string()),
                    TxKind::Terminal,
                ))
            }
            ActionKind::MedicationList => self.terminal_message(
                session,
                "Active Medications:\n\n1. Paracetamol 500mg\n2. Amoxicillin 250mg\n\nFor details, visit the web portal.",
            ),
            ActionKind::MedicationRefill => {
                let sms_failure = self
                    .sms
                    .send(
                        &session.phone_number,
                        "AfyaGate: your refill request was received. A pharmacist will confirm by SMS.",
                    )
                    .err();
                self.remove_session(session)?;
                let mut turn = Turn::of(
                    session,
                    UssdOutcome::Terminate(
                        "Request submitted.\nYou will receive SMS with refill code.".to_string(),
                    ),
                    TxKind::Terminal,
                );
                if let Some(err) = sms_failure {
                    turn.status = failure_status(&err);
                    turn.error_message = Some(err.to_string());
                }
                Ok(turn)
            }
            ActionKind::MedicationSideEffect => self.terminal_message(
                session,
                "Side effect reported.\nA doctor will contact you within 24 hours.",
            ),
            ActionKind::MedicationInteractions => self.terminal_message(
                session,
                "Check drug interactions on the web portal,\nor call the support line.",
            ),
            ActionKind::HistorySummary => self.terminal_message(
                session,
                "Health Summary:\n\nBlood Type: O+\nAllergies: Penicillin\n\nFull history on the web portal.",
            ),
            ActionKind::HistoryVisits => self.terminal_message(
                session,
                "Recent Visits:\n\n1. Jan 15 - General Checkup\n2. Jan 8 - Dental\n\nView details on the web portal.",
            ),
            ActionKind::HistoryConditions => self.terminal_message(
                session,
                "Active Conditions:\n\nSee your doctor for the current list.\nDetails on the web portal.",
            ),
            ActionKind::SymptomRecommendation => self.terminal_message(
                session,
                "Recommendation:\nRest, fluids, and monitor for 24 hours.\nSeek care if symptoms worsen.",
            ),
            ActionKind::SymptomBooking => self.terminal_message(
                session,
                "To book a doctor, dial again\nand choose 3. Book Doctor.",
            ),
            ActionKind::SymptomClinic => self.terminal_message(
                session,
                "Nearby clinics are listed on the web portal,\nor call the support line.",
            ),
        }
    }

    fn submit_emergency(&self, session: &mut Session, now: DateTime<Utc>) -> Result<Turn> {
        let since = self.window_start(now);
        let sent = self.store.count_transactions_since(
            &session.phone_number,
            TxKind::EmergencyAlert,
            since,
        )?;
        if sent >= u64::from(self.config.max_alerts_per_window) {
            self.remove_session(session)?;
            let mut turn = Turn::rejected(ALERT_RATE_MESSAGE);
            turn.menu_path = session.input_path.clone();
            turn.linked_user_id = session.linked_user_id;
            return Ok(turn);
        }

        let severity = session
            .scratch_get(menu::SCRATCH_SEVERITY)
            .and_then(|raw| raw.parse::<u8>().ok())
            .unwrap_or(3);
        let symptoms = session
            .scratch_get(menu::SCRATCH_SYMPTOM)
            .map(menu::emergency_symptom_label)
            .unwrap_or("Other")
            .to_string();

        let alert = AlertRequest {
            severity,
            symptoms,
            phone: session.phone_number.clone(),
            location: None,
        };

        let turn = match self.alerts.submit(&alert) {
            Ok(receipt) => {
                let eta = receipt
                    .expected_response_time
                    .clone()
                    .unwrap_or_else(|| menu::expected_response_time(severity).to_string());
                Turn::of(
                    session,
                    UssdOutcome::Terminate(format!(
                        "EMERGENCY ALERT SENT\n\n\
                         Alert ID: {}\n\
                         Level: {severity}/5\n\
                         Expected response: {eta}\n\n\
                         You will receive SMS updates.",
                        receipt.alert_id
                    )),
                    TxKind::EmergencyAlert,
                )
            }
            Err(err) => {
                let mut turn = Turn::of(
                    session,
                    UssdOutcome::Terminate(ALERT_FALLBACK_MESSAGE.to_string()),
                    TxKind::EmergencyAlert,
                );
                turn.status = failure_status(&err);
                turn.error_message = Some(err.to_string());
                turn
            }
        };

        self.remove_session(session)?;
        Ok(turn)
    }

    fn confirm_booking(&self, session: &mut Session, _now: DateTime<Utc>) -> Result<Turn> {
        let specialty = session
            .scratch_get(menu::SCRATCH_SPECIALTY)
            .map(menu::specialty_label)
            .unwrap_or("General Practice");
        let date = session
            .scratch_get(menu::SCRATCH_DATE)
            .map(menu::date_label)
            .unwrap_or("Today");

        let confirmation = format!(
            "AfyaGate: your {specialty} appointment ({date}) was received. A doctor will confirm by SMS."
        );
        let sms_failure = self.sms.send(&session.phone_number, &confirmation).err();

        self.remove_session(session)?;
        let mut turn = Turn::of(
            session,
            UssdOutcome::Terminate(
                "Appointment booked!\nYou will receive SMS confirmation\nwith doctor details & time."
                    .to_string(),
            ),
            TxKind::Booking,
        );
        if let Some(err) = sms_failure {
            turn.status = failure_status(&err);
            turn.error_message = Some(err.to_string());
        }
        Ok(turn)
    }

    fn terminal_message(&self, session: &mut Session, message: &str) -> Result<Turn> {
        self.remove_session(session)?;
        Ok(Turn::of(
            session,
            UssdOutcome::Terminate(message.to_string()),
            TxKind::Terminal,
        ))
    }

    /// Web-surface entry: stage a phone/account pair and send a
    /// registration code.
    pub fn request_link_otp(&self, phone: &str, user_id: i64) -> Result<()> {
        let phone = normalize_msisdn(phone)?;
        let now = Utc::now();
        self.store
            .upsert_linked_phone(&phone, user_id, false, now)?;
        self.otp.issue(&phone, OtpPurpose::Registration, now)?;
        Ok(())
    }

    /// Web-surface entry: verify a registration code and activate the
    /// phone/account link.
    pub fn confirm_link(&self, phone: &str, code: &str) -> Result<OtpOutcome> {
        let phone = normalize_msisdn(phone)?;
        let now = Utc::now();
        let outcome = self
            .otp
            .verify(&phone, OtpPurpose::Registration, code, now)?;
        if outcome == OtpOutcome::Ok {
            self.store.mark_phone_verified(&phone, now)?;
        }
        Ok(outcome)
    }

    pub fn metrics(&self) -> Result<MetricsSnapshot> {
        self.store.metrics(Utc::now())
    }

    pub fn active_sessions(&self) -> Result<Vec<SessionSummary>> {
        self.store.list_active_sessions(Utc::now())
    }

    pub fn store(&self) -> &SqliteUssdStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn save(&self, session: &mut Session, now: DateTime<Utc>) -> Result<()> {
        self.store
            .save_session(session, self.config.session_ttl_secs, now)
    }

    fn remove_session(&self, session: &Session) -> Result<()> {
        self.store.delete_session(&session.session_id)?;
        if let Ok(mut locks) = self.session_locks.lock() {
            locks.remove(&session.session_id);
        }
        Ok(())
    }

    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::seconds(self.config.rate_window_secs as i64)
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(session_id.to_string()).or_default().clone()
    }
}
