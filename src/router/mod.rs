//! HTTP handlers.
mod check_email;
mod dashboard;
mod home;
mod logout;
mod metrics;
mod status;
mod submit;

use axum::Router;
use axum::routing::{get, post};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        // `GET /` goes to `home`.
        .route("/", get(home::handler))
        // `POST /submit` goes to `submit`.
        .route("/submit", post(submit::handler))
        // `GET /dashboard` goes to `dashboard`. Session required.
        .route("/dashboard", get(dashboard::handler))
        .route("/logout", get(logout::handler))
        .route("/check_email", post(check_email::handler))
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(status::handler))
        .route("/metrics", get(metrics::handler))
}
