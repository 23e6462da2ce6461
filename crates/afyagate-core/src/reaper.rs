use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use chrono::Utc;

use crate::error::Result;
use crate::store::SqliteUssdStore;

/// Periodic sweep that deletes expired sessions and OTP rows. Owns no
/// state of its own and issues only deletes, so it can restart at any
/// point and run concurrently with live traffic.
pub struct SessionReaper {
    store: SqliteUssdStore,
    interval: Duration,
    stop: Arc<AtomicBool>,
}

impl SessionReaper {
    pub fn new(store: SqliteUssdStore, interval_secs: u64) -> Self {
        Self {
            store,
            interval: Duration::from_secs(interval_secs.max(1)),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag shared with the spawned thread; set it to wind the loop down.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn sweep_once(&self) -> Result<(usize, usize)> {
        self.store.reap_expired(Utc::now())
    }

    /// Runs the sweep loop on a dedicated thread until the stop flag is
    /// set. Sweep failures are absorbed: a transient store error must not
    /// kill the reaper.
    pub fn spawn(self) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let tick = Duration::from_millis(200);
            loop {
                let mut slept = Duration::ZERO;
                while slept < self.interval {
                    if self.stop.load(Ordering::Relaxed) {
                        return;
                    }
                    thread::sleep(tick);
                    slept += tick;
                }
                if self.stop.load(Ordering::Relaxed) {
                    return;
                }
                if let Ok((sessions, otps)) = self.sweep_once() {
                    if sessions > 0 || otps > 0 {
                        println!("session reaper: removed {sessions} sessions, {otps} otp codes");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};
    use tempfile::tempdir;

    use super::*;
    use crate::models::OtpPurpose;

    #[test]
    fn sweep_is_idempotent_and_spares_live_rows() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteUssdStore::open(temp.path().join("ussd.db")).expect("store");
        let now = Utc::now();

        store
            .create_session("live", "+254720181818", None, 600, now)
            .expect("live session");
        store
            .create_session(
                "dead",
                "+254720191919",
                None,
                600,
                now - ChronoDuration::seconds(1200),
            )
            .expect("dead session");
        store
            .insert_otp(
                "+254720191919",
                "1234",
                OtpPurpose::Registration,
                3,
                300,
                now - ChronoDuration::seconds(900),
            )
            .expect("dead otp");

        let reaper = SessionReaper::new(store.clone(), 300);
        assert_eq!(reaper.sweep_once().expect("first sweep"), (1, 1));
        assert_eq!(reaper.sweep_once().expect("second sweep"), (0, 0));
        assert!(store.get_session("live", now).expect("get").is_some());
    }

    #[test]
    fn spawned_reaper_stops_on_flag() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteUssdStore::open(temp.path().join("ussd.db")).expect("store");

        let reaper = SessionReaper::new(store, 600);
        let stop = reaper.stop_handle();
        let join = reaper.spawn();

        stop.store(true, Ordering::Relaxed);
        join.join().expect("reaper thread exits");
    }
}
