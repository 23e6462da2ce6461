pub const SESSION_TTL_ENV: &str = "AFYAGATE_SESSION_TTL_SECS";
pub const OTP_TTL_ENV: &str = "AFYAGATE_OTP_TTL_SECS";
pub const OTP_LENGTH_ENV: &str = "AFYAGATE_OTP_LENGTH";
pub const OTP_MAX_ATTEMPTS_ENV: &str = "AFYAGATE_OTP_MAX_ATTEMPTS";
pub const RATE_WINDOW_ENV: &str = "AFYAGATE_RATE_WINDOW_SECS";
pub const MAX_SESSIONS_ENV: &str = "AFYAGATE_MAX_SESSIONS_PER_WINDOW";
pub const MAX_ALERTS_ENV: &str = "AFYAGATE_MAX_ALERTS_PER_WINDOW";
pub const REAPER_INTERVAL_ENV: &str = "AFYAGATE_REAPER_INTERVAL_SECS";

/// Engine knobs; every value has a serviceable default so a bare
/// environment still runs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub session_ttl_secs: u64,
    pub otp_ttl_secs: u64,
    pub otp_length: usize,
    pub otp_max_attempts: u32,
    pub rate_window_secs: u64,
    pub max_sessions_per_window: u32,
    pub max_alerts_per_window: u32,
    pub reaper_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 600,
            otp_ttl_secs: 300,
            otp_length: 4,
            otp_max_attempts: 3,
            rate_window_secs: 3600,
            max_sessions_per_window: 10,
            max_alerts_per_window: 3,
            reaper_interval_secs: 300,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            session_ttl_secs: read_env_u64(SESSION_TTL_ENV, defaults.session_ttl_secs, 1),
            otp_ttl_secs: read_env_u64(OTP_TTL_ENV, defaults.otp_ttl_secs, 1),
            otp_length: read_env_usize(OTP_LENGTH_ENV, defaults.otp_length, 4),
            otp_max_attempts: read_env_u32(OTP_MAX_ATTEMPTS_ENV, defaults.otp_max_attempts, 1),
            rate_window_secs: read_env_u64(RATE_WINDOW_ENV, defaults.rate_window_secs, 1),
            max_sessions_per_window: read_env_u32(
                MAX_SESSIONS_ENV,
                defaults.max_sessions_per_window,
                1,
            ),
            max_alerts_per_window: read_env_u32(MAX_ALERTS_ENV, defaults.max_alerts_per_window, 1),
            reaper_interval_secs: read_env_u64(
                REAPER_INTERVAL_ENV,
                defaults.reaper_interval_secs,
                1,
            ),
        }
    }
}

#[must_use]
pub(crate) fn read_non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[must_use]
pub(crate) fn read_env_u64(name: &str, default_value: u64, min_value: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|value| *value >= min_value)
        .unwrap_or(default_value)
}

#[must_use]
pub(crate) fn read_env_u32(name: &str, default_value: u32, min_value: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .filter(|value| *value >= min_value)
        .unwrap_or(default_value)
}

#[must_use]
pub(crate) fn read_env_usize(name: &str, default_value: usize, min_value: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|value| *value >= min_value)
        .unwrap_or(default_value)
}
