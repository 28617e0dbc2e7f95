use axum::extract::State;

use crate::AppState;
use crate::error::{Result, ServerError};

/// Prometheus exposition, when the recorder is installed.
pub async fn handler(State(state): State<AppState>) -> Result<String> {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(ServerError::NotFound)
}

#[cfg(test)]
mod tests {
    use crate::*;
    use axum::http::{Method, StatusCode};

    #[tokio::test]
    async fn test_metrics_disabled() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = test_state(dir.path());

        let response =
            make_request(app(state), Method::GET, "/metrics", String::default(), None)
                .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
