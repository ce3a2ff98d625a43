//! # procsman-http
//!
//! The admin HTTP surface: thin axum glue over
//! [`procsman_supervisor::AdminService`]. Every route sits behind the
//! `X-Auth-Key` middleware; errors serialize as
//! `{message_code, message_default, details}` with the status the admin
//! taxonomy dictates.

pub mod auth;
mod handlers;
mod response;

use auth::AuthKey;
use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use procsman_notify::TelegramNotifier;
use procsman_supervisor::AdminService;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub admin: AdminService,
    pub notifier: Arc<TelegramNotifier>,
    pub auth: Arc<AuthKey>,
    pub allow_origin: HeaderValue,
}

/// Build the admin router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/processes",
            get(handlers::get_processes).post(handlers::add_process),
        )
        .route(
            "/processes/:id",
            get(handlers::get_process)
                .put(handlers::update_process)
                .delete(handlers::delete_process),
        )
        .route("/processes/:id/start", post(handlers::start_process))
        .route("/processes/:id/stop", post(handlers::stop_process))
        .route("/processes/:id/restart", post(handlers::restart_process))
        .route("/processes/:id/stdin", post(handlers::post_stdin))
        .route("/processes/:id/events", get(handlers::get_events))
        .route("/processes/:id/stats", get(handlers::get_stats))
        .route("/processes/:id/logs", get(handlers::get_logs))
        .route("/groups", get(handlers::get_groups).post(handlers::create_group))
        .route(
            "/groups/:id",
            get(handlers::get_group).delete(handlers::delete_group),
        )
        .route("/config/default", get(handlers::get_default_configuration))
        .route(
            "/notifications",
            get(handlers::get_notifications).put(handlers::update_notifications),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_auth))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::wrap_request,
        ))
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "admin interface listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
