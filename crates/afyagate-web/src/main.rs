use std::sync::Arc;

use anyhow::{Context, Result};

use afyagate_core::alert::{AlertConfig, HttpEmergencyAlerts};
use afyagate_core::gateway::AfricasTalkingGateway;
use afyagate_core::sms::{HttpSmsSender, SmsConfig};
use afyagate_core::{CallbackHandler, EngineConfig, SessionReaper, SqliteUssdStore};

fn main() -> Result<()> {
    let db_path = std::env::var("AFYAGATE_DB").unwrap_or_else(|_| "afyagate.db".to_string());
    let host = std::env::var("AFYAGATE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("AFYAGATE_PORT")
        .ok()
        .and_then(|raw| raw.parse::<u16>().ok())
        .unwrap_or(8080);

    let config = EngineConfig::from_env();
    let store = SqliteUssdStore::open(&db_path)
        .with_context(|| format!("failed to open session store at {db_path}"))?;
    let alerts =
        HttpEmergencyAlerts::new(AlertConfig::from_env()).context("failed to build alert client")?;
    let sms = HttpSmsSender::new(SmsConfig::from_env()).context("failed to build sms client")?;

    let reaper = SessionReaper::new(store.clone(), config.reaper_interval_secs);
    let _reaper_thread = reaper.spawn();

    let handler = Arc::new(CallbackHandler::new(
        store,
        Arc::new(AfricasTalkingGateway),
        Arc::new(alerts),
        Arc::new(sms),
        config,
    ));

    afyagate_web::serve_web(handler, &host, port)
}
