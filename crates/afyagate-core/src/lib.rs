// Public fallible APIs in this crate share one concrete error contract
// (`UssdError`); per-function `# Errors` boilerplate would duplicate it.
#![allow(
    clippy::missing_errors_doc,
    reason = "crate-wide fallible API uses one explicit error type; per-item boilerplate would duplicate contract"
)]

pub mod alert;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod menu;
pub mod models;
pub mod otp;
pub mod reaper;
pub mod sms;
pub mod store;

pub use config::EngineConfig;
pub use error::{Result, UssdError};
pub use handler::CallbackHandler;
pub use models::{Session, UssdOutcome};
pub use reaper::SessionReaper;
pub use store::SqliteUssdStore;
