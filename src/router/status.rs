//! Public configuration page for front-end identification.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::config::Configuration;

/// Structured configuration.
#[derive(Debug, Serialize)]
pub struct Status {
    name: String,
    url: String,
    version: String,
}

/// Public server status (configuration).
pub async fn handler(State(config): State<Arc<Configuration>>) -> Json<Status> {
    Json(Status {
        name: config.name.clone(),
        url: config.url.clone(),
        version: config.version().to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use crate::*;
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_status_handler() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = test_state(dir.path());

        let response = make_request(
            app(state),
            Method::GET,
            "/status.json",
            String::default(),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(status["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(status["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(status["url"], "http://localhost:5000/");
        assert!(status.get("session").is_none());
    }
}
