use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Result, UssdError};
use crate::models::{
    ErrorCount, MetricsSnapshot, OtpPurpose, OtpRecord, Session, SessionStatus, SessionSummary,
    TransactionEntry, TxKind, TxStatus,
};

/// Durable home of sessions, OTP codes, the transaction log, and
/// phone-to-account links. One mutexed connection serializes row access;
/// callers needing read-modify-write atomicity per session hold the
/// handler's per-session lock on top.
#[derive(Clone)]
pub struct SqliteUssdStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteUssdStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteUssdStore").finish_non_exhaustive()
    }
}

impl SqliteUssdStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| UssdError::Internal("sqlite mutex poisoned".to_string()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                phone_number TEXT NOT NULL,
                linked_user_id INTEGER,
                input_path TEXT NOT NULL DEFAULT '',
                scratch_json TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                last_activity_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_phone ON sessions(phone_number);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);
            CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);

            CREATE TABLE IF NOT EXISTS otp_codes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                phone_number TEXT NOT NULL,
                code TEXT NOT NULL,
                purpose TEXT NOT NULL DEFAULT 'registration',
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                is_used INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                verified_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_otp_phone ON otp_codes(phone_number);
            CREATE INDEX IF NOT EXISTS idx_otp_expires ON otp_codes(expires_at);

            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                phone_number TEXT NOT NULL,
                linked_user_id INTEGER,
                kind TEXT NOT NULL,
                menu_path TEXT NOT NULL,
                input_text TEXT NOT NULL,
                response_text TEXT NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT,
                processing_time_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tx_phone ON transactions(phone_number);
            CREATE INDEX IF NOT EXISTS idx_tx_created ON transactions(created_at);
            CREATE INDEX IF NOT EXISTS idx_tx_kind ON transactions(kind);
            CREATE INDEX IF NOT EXISTS idx_tx_session ON transactions(session_id);

            CREATE TABLE IF NOT EXISTS linked_phones (
                phone_number TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                verified INTEGER NOT NULL DEFAULT 0,
                verified_at TEXT,
                created_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// An expired row reads identically to a missing one; the reaper owns
    /// physical deletion.
    pub fn get_session(&self, session_id: &str, now: DateTime<Utc>) -> Result<Option<Session>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| UssdError::Internal("sqlite mutex poisoned".to_string()))?;
        let row = conn
            .query_row(
                r#"
                SELECT session_id, phone_number, linked_user_id, input_path, scratch_json,
                       status, created_at, last_activity_at, expires_at
                FROM sessions
                WHERE session_id = ?1
                "#,
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            session_id,
            phone_number,
            linked_user_id,
            input_path,
            scratch_json,
            status,
            created_at,
            last_activity_at,
            expires_at,
        )) = row
        else {
            return Ok(None);
        };

        let scratch = serde_json::from_str::<BTreeMap<String, String>>(&scratch_json)
            .unwrap_or_default();
        let session = Session {
            session_id,
            phone_number,
            linked_user_id,
            input_path,
            scratch,
            status: SessionStatus::parse(&status),
            created_at: parse_ts(&created_at),
            last_activity_at: parse_ts(&last_activity_at),
            expires_at: parse_ts(&expires_at),
        };

        if session.status != SessionStatus::Active || session.is_expired(now) {
            return Ok(None);
        }
        Ok(Some(session))
    }

    pub fn create_session(
        &self,
        session_id: &str,
        phone_number: &str,
        linked_user_id: Option<i64>,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let mut session = Session::new(session_id, phone_number, ttl_secs, now);
        session.linked_user_id = linked_user_id;

        let conn = self
            .conn
            .lock()
            .map_err(|_| UssdError::Internal("sqlite mutex poisoned".to_string()))?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO sessions(
                session_id, phone_number, linked_user_id, input_path, scratch_json,
                status, created_at, last_activity_at, expires_at
            )
            VALUES (?1, ?2, ?3, '', '{}', 'active', ?4, ?4, ?5)
            "#,
            params![
                session.session_id,
                session.phone_number,
                session.linked_user_id,
                now.to_rfc3339(),
                session.expires_at.to_rfc3339(),
            ],
        )?;
        Ok(session)
    }

    /// Touches `last_activity_at` and recomputes `expires_at` on every
    /// successful turn, per the session TTL contract.
    pub fn save_session(
        &self,
        session: &mut Session,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        session.last_activity_at = now;
        session.expires_at = now + Duration::seconds(ttl_secs as i64);

        let scratch_json = serde_json::to_string(&session.scratch)?;
        let conn = self
            .conn
            .lock()
            .map_err(|_| UssdError::Internal("sqlite mutex poisoned".to_string()))?;
        conn.execute(
            r#"
            UPDATE sessions
            SET linked_user_id = ?2,
                input_path = ?3,
                scratch_json = ?4,
                status = ?5,
                last_activity_at = ?6,
                expires_at = ?7
            WHERE session_id = ?1
            "#,
            params![
                session.session_id,
                session.linked_user_id,
                session.input_path,
                scratch_json,
                session.status.as_str(),
                session.last_activity_at.to_rfc3339(),
                session.expires_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| UssdError::Internal("sqlite mutex poisoned".to_string()))?;
        conn.execute(
            "DELETE FROM sessions WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(())
    }

    pub fn linked_user_for(&self, phone_number: &str) -> Result<Option<i64>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| UssdError::Internal("sqlite mutex poisoned".to_string()))?;
        let value = conn
            .query_row(
                "SELECT user_id FROM linked_phones WHERE phone_number = ?1 AND verified = 1",
                params![phone_number],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn pending_link_for(&self, phone_number: &str) -> Result<Option<i64>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| UssdError::Internal("sqlite mutex poisoned".to_string()))?;
        let value = conn
            .query_row(
                "SELECT user_id FROM linked_phones WHERE phone_number = ?1 AND verified = 0",
                params![phone_number],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn upsert_linked_phone(
        &self,
        phone_number: &str,
        user_id: i64,
        verified: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let verified_at = verified.then(|| now.to_rfc3339());
        let conn = self
            .conn
            .lock()
            .map_err(|_| UssdError::Internal("sqlite mutex poisoned".to_string()))?;
        conn.execute(
            r#"
            INSERT INTO linked_phones(phone_number, user_id, verified, verified_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(phone_number) DO UPDATE SET
              user_id = excluded.user_id,
              verified = excluded.verified,
              verified_at = excluded.verified_at
            "#,
            params![
                phone_number,
                user_id,
                verified as i64,
                verified_at,
                now.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn mark_phone_verified(&self, phone_number: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| UssdError::Internal("sqlite mutex poisoned".to_string()))?;
        let affected = conn.execute(
            "UPDATE linked_phones SET verified = 1, verified_at = ?2 WHERE phone_number = ?1",
            params![phone_number, now.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Persists a fresh code, retiring any unused one for the same
    /// `(phone, purpose)` pair first so at most one code is live.
    pub fn insert_otp(
        &self,
        phone_number: &str,
        code: &str,
        purpose: OtpPurpose,
        max_attempts: u32,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let expires_at = now + Duration::seconds(ttl_secs as i64);
        let conn = self
            .conn
            .lock()
            .map_err(|_| UssdError::Internal("sqlite mutex poisoned".to_string()))?;
        conn.execute(
            "UPDATE otp_codes SET is_used = 1 WHERE phone_number = ?1 AND purpose = ?2 AND is_used = 0",
            params![phone_number, purpose.as_str()],
        )?;
        conn.execute(
            r#"
            INSERT INTO otp_codes(phone_number, code, purpose, attempts, max_attempts,
                                  is_used, created_at, expires_at)
            VALUES (?1, ?2, ?3, 0, ?4, 0, ?5, ?6)
            "#,
            params![
                phone_number,
                code,
                purpose.as_str(),
                max_attempts,
                now.to_rfc3339(),
                expires_at.to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn latest_otp(&self, phone_number: &str, purpose: OtpPurpose) -> Result<Option<OtpRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| UssdError::Internal("sqlite mutex poisoned".to_string()))?;
        let row = conn
            .query_row(
                r#"
                SELECT id, phone_number, code, purpose, attempts, max_attempts, is_used,
                       created_at, expires_at
                FROM otp_codes
                WHERE phone_number = ?1 AND purpose = ?2
                ORDER BY id DESC
                LIMIT 1
                "#,
                params![phone_number, purpose.as_str()],
                |row| {
                    Ok(OtpRecord {
                        id: row.get(0)?,
                        phone_number: row.get(1)?,
                        code: row.get(2)?,
                        purpose: OtpPurpose::parse(&row.get::<_, String>(3)?),
                        attempts: row.get::<_, i64>(4)? as u32,
                        max_attempts: row.get::<_, i64>(5)? as u32,
                        is_used: row.get::<_, i64>(6)? != 0,
                        created_at: parse_ts(&row.get::<_, String>(7)?),
                        expires_at: parse_ts(&row.get::<_, String>(8)?),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn bump_otp_attempts(&self, id: i64) -> Result<u32> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| UssdError::Internal("sqlite mutex poisoned".to_string()))?;
        conn.execute(
            "UPDATE otp_codes SET attempts = attempts + 1 WHERE id = ?1",
            params![id],
        )?;
        let attempts = conn.query_row(
            "SELECT attempts FROM otp_codes WHERE id = ?1",
            params![id],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(attempts as u32)
    }

    pub fn mark_otp_used(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| UssdError::Internal("sqlite mutex poisoned".to_string()))?;
        conn.execute(
            "UPDATE otp_codes SET is_used = 1, verified_at = ?2 WHERE id = ?1",
            params![id, now.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn append_transaction(&self, entry: &TransactionEntry) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| UssdError::Internal("sqlite mutex poisoned".to_string()))?;
        conn.execute(
            r#"
            INSERT INTO transactions(
                id, session_id, phone_number, linked_user_id, kind, menu_path,
                input_text, response_text, status, error_message, processing_time_ms, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                entry.id,
                entry.session_id,
                entry.phone_number,
                entry.linked_user_id,
                entry.kind.as_str(),
                entry.menu_path,
                entry.input_text,
                entry.response_text,
                entry.status.as_str(),
                entry.error_message,
                entry.processing_time_ms as i64,
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Rolling-window count used by the rate limiter.
    pub fn count_transactions_since(
        &self,
        phone_number: &str,
        kind: TxKind,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| UssdError::Internal("sqlite mutex poisoned".to_string()))?;
        let count: i64 = conn.query_row(
            r#"
            SELECT COUNT(*)
            FROM transactions
            WHERE phone_number = ?1 AND kind = ?2 AND created_at >= ?3
            "#,
            params![phone_number, kind.as_str(), since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn recent_transactions(&self, limit: usize) -> Result<Vec<TransactionEntry>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| UssdError::Internal("sqlite mutex poisoned".to_string()))?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, session_id, phone_number, linked_user_id, kind, menu_path,
                   input_text, response_text, status, error_message, processing_time_ms, created_at
            FROM transactions
            ORDER BY created_at DESC, id ASC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(TransactionEntry {
                id: row.get(0)?,
                session_id: row.get(1)?,
                phone_number: row.get(2)?,
                linked_user_id: row.get(3)?,
                kind: TxKind::parse(&row.get::<_, String>(4)?),
                menu_path: row.get(5)?,
                input_text: row.get(6)?,
                response_text: row.get(7)?,
                status: TxStatus::parse(&row.get::<_, String>(8)?),
                error_message: row.get(9)?,
                processing_time_ms: row.get::<_, i64>(10)?.max(0) as u64,
                created_at: parse_ts(&row.get::<_, String>(11)?),
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn metrics(&self, now: DateTime<Utc>) -> Result<MetricsSnapshot> {
        let hour_ago = (now - Duration::hours(1)).to_rfc3339();
        let conn = self
            .conn
            .lock()
            .map_err(|_| UssdError::Internal("sqlite mutex poisoned".to_string()))?;

        let active_sessions: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE status = 'active' AND expires_at > ?1",
            params![now.to_rfc3339()],
            |row| row.get(0),
        )?;
        let transactions_last_hour: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE created_at >= ?1",
            params![hour_ago],
            |row| row.get(0),
        )?;
        let errors_last_hour: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE created_at >= ?1 AND status <> 'success'",
            params![hour_ago],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            r#"
            SELECT error_message, COUNT(*) AS n
            FROM transactions
            WHERE error_message IS NOT NULL
            GROUP BY error_message
            ORDER BY n DESC, error_message ASC
            LIMIT 5
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ErrorCount {
                message: row.get(0)?,
                count: row.get::<_, i64>(1)? as u64,
            })
        })?;
        let mut top_errors = Vec::new();
        for row in rows {
            top_errors.push(row?);
        }

        Ok(MetricsSnapshot {
            active_sessions: active_sessions as u64,
            transactions_last_hour: transactions_last_hour as u64,
            errors_last_hour: errors_last_hour as u64,
            top_errors,
            generated_at: now,
        })
    }

    pub fn list_active_sessions(&self, now: DateTime<Utc>) -> Result<Vec<SessionSummary>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| UssdError::Internal("sqlite mutex poisoned".to_string()))?;
        let mut stmt = conn.prepare(
            r#"
            SELECT session_id, phone_number, input_path, last_activity_at, expires_at
            FROM sessions
            WHERE status = 'active' AND expires_at > ?1
            ORDER BY last_activity_at DESC
            "#,
        )?;
        let rows = stmt.query_map(params![now.to_rfc3339()], |row| {
            Ok(SessionSummary {
                session_id: row.get(0)?,
                phone_number: row.get(1)?,
                input_path: row.get(2)?,
                last_activity_at: parse_ts(&row.get::<_, String>(3)?),
                expires_at: parse_ts(&row.get::<_, String>(4)?),
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Deletes expired sessions and OTP rows. Deleting an already-gone row
    /// is a no-op, so concurrent sweeps are safe.
    pub fn reap_expired(&self, now: DateTime<Utc>) -> Result<(usize, usize)> {
        let cutoff = now.to_rfc3339();
        let conn = self
            .conn
            .lock()
            .map_err(|_| UssdError::Internal("sqlite mutex poisoned".to_string()))?;
        let sessions = conn.execute(
            "DELETE FROM sessions WHERE expires_at < ?1",
            params![cutoff],
        )?;
        let otps = conn.execute(
            "DELETE FROM otp_codes WHERE expires_at < ?1",
            params![cutoff],
        )?;
        Ok((sessions, otps))
    }
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;
    use uuid::Uuid;

    use super::*;

    fn open_store(dir: &tempfile::TempDir) -> SqliteUssdStore {
        SqliteUssdStore::open(dir.path().join("ussd.db")).expect("open store")
    }

    fn tx(phone: &str, kind: TxKind, created_at: DateTime<Utc>) -> TransactionEntry {
        TransactionEntry {
            id: Uuid::new_v4().to_string(),
            session_id: "sess-1".to_string(),
            phone_number: phone.to_string(),
            linked_user_id: None,
            kind,
            menu_path: String::new(),
            input_text: String::new(),
            response_text: "ok".to_string(),
            status: TxStatus::Success,
            error_message: None,
            processing_time_ms: 4,
            created_at,
        }
    }

    #[test]
    fn session_roundtrip_preserves_path_and_scratch() {
        let temp = tempdir().expect("tempdir");
        let store = open_store(&temp);
        let now = Utc::now();

        let mut session = store
            .create_session("at-001", "+254720000001", None, 600, now)
            .expect("create");
        session.push_token("2");
        session.push_token("5");
        session.scratch_set("severity", "5");
        store
            .save_session(&mut session, 600, now)
            .expect("save");

        let loaded = store
            .get_session("at-001", now)
            .expect("get")
            .expect("present");
        assert_eq!(loaded.input_path, "2*5");
        assert_eq!(loaded.scratch_get("severity"), Some("5"));
        assert_eq!(loaded.phone_number, "+254720000001");
    }

    #[test]
    fn expired_session_reads_as_missing() {
        let temp = tempdir().expect("tempdir");
        let store = open_store(&temp);
        let now = Utc::now();

        store
            .create_session("at-002", "+254720000002", None, 600, now)
            .expect("create");

        let later = now + Duration::seconds(601);
        assert!(store.get_session("at-002", later).expect("get").is_none());

        // Same gateway id after expiry restarts from a fresh row.
        let fresh = store
            .create_session("at-002", "+254720000002", None, 600, later)
            .expect("recreate");
        assert_eq!(fresh.input_path, "");
    }

    #[test]
    fn save_recomputes_expiry_on_every_turn() {
        let temp = tempdir().expect("tempdir");
        let store = open_store(&temp);
        let now = Utc::now();

        let mut session = store
            .create_session("at-003", "+254720000003", None, 600, now)
            .expect("create");
        let first_expiry = session.expires_at;

        let later = now + Duration::seconds(300);
        store
            .save_session(&mut session, 600, later)
            .expect("save");
        assert!(session.expires_at > first_expiry);

        let loaded = store
            .get_session("at-003", later)
            .expect("get")
            .expect("present");
        assert_eq!(
            loaded.expires_at.timestamp(),
            (later + Duration::seconds(600)).timestamp()
        );
    }

    #[test]
    fn delete_session_is_idempotent() {
        let temp = tempdir().expect("tempdir");
        let store = open_store(&temp);
        let now = Utc::now();

        store
            .create_session("at-004", "+254720000004", None, 600, now)
            .expect("create");
        store.delete_session("at-004").expect("delete");
        store.delete_session("at-004").expect("delete again");
        assert!(store.get_session("at-004", now).expect("get").is_none());
    }

    #[test]
    fn insert_otp_retires_prior_unused_code() {
        let temp = tempdir().expect("tempdir");
        let store = open_store(&temp);
        let now = Utc::now();

        store
            .insert_otp("+254720000005", "1111", OtpPurpose::Registration, 3, 300, now)
            .expect("first otp");
        store
            .insert_otp("+254720000005", "2222", OtpPurpose::Registration, 3, 300, now)
            .expect("second otp");

        let latest = store
            .latest_otp("+254720000005", OtpPurpose::Registration)
            .expect("latest")
            .expect("present");
        assert_eq!(latest.code, "2222");
        assert!(!latest.is_used);
    }

    #[test]
    fn otp_attempts_and_used_flag_roundtrip() {
        let temp = tempdir().expect("tempdir");
        let store = open_store(&temp);
        let now = Utc::now();

        let id = store
            .insert_otp("+254720000006", "4321", OtpPurpose::Verification, 3, 300, now)
            .expect("insert");
        assert_eq!(store.bump_otp_attempts(id).expect("bump"), 1);
        assert_eq!(store.bump_otp_attempts(id).expect("bump"), 2);

        store.mark_otp_used(id, now).expect("mark used");
        let record = store
            .latest_otp("+254720000006", OtpPurpose::Verification)
            .expect("latest")
            .expect("present");
        assert!(record.is_used);
        assert_eq!(record.attempts, 2);
    }

    #[test]
    fn transaction_counts_respect_kind_and_window() {
        let temp = tempdir().expect("tempdir");
        let store = open_store(&temp);
        let now = Utc::now();

        store
            .append_transaction(&tx("+254720000007", TxKind::SessionStart, now))
            .expect("tx1");
        store
            .append_transaction(&tx("+254720000007", TxKind::EmergencyAlert, now))
            .expect("tx2");
        store
            .append_transaction(&tx(
                "+254720000007",
                TxKind::SessionStart,
                now - Duration::hours(2),
            ))
            .expect("tx3 outside window");

        let since = now - Duration::hours(1);
        assert_eq!(
            store
                .count_transactions_since("+254720000007", TxKind::SessionStart, since)
                .expect("count"),
            1
        );
        assert_eq!(
            store
                .count_transactions_since("+254720000007", TxKind::EmergencyAlert, since)
                .expect("count"),
            1
        );
    }

    #[test]
    fn metrics_report_active_sessions_and_top_errors() {
        let temp = tempdir().expect("tempdir");
        let store = open_store(&temp);
        let now = Utc::now();

        store
            .create_session("at-008", "+254720000008", None, 600, now)
            .expect("create");

        let mut failed = tx("+254720000008", TxKind::EmergencyAlert, now);
        failed.status = TxStatus::Error;
        failed.error_message = Some("alert dispatch timed out".to_string());
        store.append_transaction(&failed).expect("failed tx");
        store
            .append_transaction(&tx("+254720000008", TxKind::Navigation, now))
            .expect("ok tx");

        let snapshot = store.metrics(now).expect("metrics");
        assert_eq!(snapshot.active_sessions, 1);
        assert_eq!(snapshot.transactions_last_hour, 2);
        assert_eq!(snapshot.errors_last_hour, 1);
        assert_eq!(snapshot.top_errors.len(), 1);
        assert_eq!(snapshot.top_errors[0].message, "alert dispatch timed out");
    }

    #[test]
    fn reap_removes_only_expired_rows() {
        let temp = tempdir().expect("tempdir");
        let store = open_store(&temp);
        let now = Utc::now();

        store
            .create_session("fresh", "+254720000009", None, 600, now)
            .expect("fresh session");
        store
            .create_session("stale", "+254720000010", None, 600, now - Duration::seconds(900))
            .expect("stale session");
        store
            .insert_otp(
                "+254720000010",
                "9999",
                OtpPurpose::Registration,
                3,
                300,
                now - Duration::seconds(600),
            )
            .expect("stale otp");

        let (sessions, otps) = store.reap_expired(now).expect("sweep");
        assert_eq!(sessions, 1);
        assert_eq!(otps, 1);

        // Second sweep finds nothing; live rows are untouched.
        let (sessions2, otps2) = store.reap_expired(now).expect("sweep again");
        assert_eq!(sessions2, 0);
        assert_eq!(otps2, 0);
        assert!(store.get_session("fresh", now).expect("get").is_some());
    }

    #[test]
    fn linked_phone_upsert_and_lookup() {
        let temp = tempdir().expect("tempdir");
        let store = open_store(&temp);
        let now = Utc::now();

        store
            .upsert_linked_phone("+254720000011", 42, false, now)
            .expect("upsert pending");
        assert_eq!(
            store.linked_user_for("+254720000011").expect("lookup"),
            None
        );
        assert_eq!(
            store.pending_link_for("+254720000011").expect("pending"),
            Some(42)
        );

        assert!(store
            .mark_phone_verified("+254720000011", now)
            .expect("verify"));
        assert_eq!(
            store.linked_user_for("+254720000011").expect("lookup"),
            Some(42)
        );
    }
}
