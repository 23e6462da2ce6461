use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};

use afyagate_core::CallbackHandler;

mod dto;
mod error;
mod handlers;

#[cfg(test)]
mod tests;

#[derive(Clone)]
pub(crate) struct WebState {
    pub(crate) handler: Arc<CallbackHandler>,
}

/// Start the USSD gateway server and block until shutdown.
///
/// # Errors
/// Returns an error when the runtime cannot be created, the socket cannot
/// be bound, or the server exits with a runtime failure.
pub fn serve_web(handler: Arc<CallbackHandler>, host: &str, port: u16) -> Result<()> {
    let state = WebState { handler };
    let bind_addr = format!("{host}:{port}");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build web runtime")?;

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind ussd gateway at {bind_addr}"))?;
        println!("ussd gateway listening on http://{}", listener.local_addr()?);

        axum::serve(listener, app_router(state))
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
            .context("ussd gateway failed")
    })
}

pub(crate) fn app_router(state: WebState) -> Router {
    Router::new()
        .route("/ussd/callback", post(handlers::callback))
        .route("/ussd/metrics", get(handlers::metrics))
        .route("/ussd/sessions", get(handlers::sessions))
        .route("/ussd/otp/send", post(handlers::send_otp))
        .route("/ussd/register", post(handlers::register))
        .with_state(state)
}
