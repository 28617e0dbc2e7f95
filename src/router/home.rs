use axum::extract::State;
use axum::response::Html;

use crate::AppState;
use crate::session::Session;
use crate::templates;

/// Capture page.
///
/// Stale captures are removed on each visit.
pub async fn handler(
    State(state): State<AppState>,
    mut session: Session,
) -> (Session, Html<String>) {
    let store = state.auth.store().clone();
    let max_age = state.config.storage.max_file_age();
    match tokio::task::spawn_blocking(move || store.cleanup_old_files(max_age)).await {
        Ok(0) => {},
        Ok(removed) => tracing::info!(removed, "old captures removed"),
        Err(err) => tracing::error!(error = %err, "cleanup task failed"),
    }

    let flashes = session.take_flashes();
    let page = templates::index(&state.config.name, &flashes);

    (session, page)
}
