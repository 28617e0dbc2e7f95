use axum::response::Redirect;

use crate::session::{Category, Session};

pub async fn handler(mut session: Session) -> (Session, Redirect) {
    if let Some(email) = session.email() {
        tracing::info!(%email, "user logged out");
    }

    session.clear();
    session.flash(Category::Info, "You have been logged out successfully.");

    (session, Redirect::to("/"))
}

#[cfg(test)]
mod tests {
    use crate::session::{Category, SessionData};
    use crate::*;
    use axum::http::{Method, StatusCode, header};

    #[tokio::test]
    async fn test_logout_handler() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = test_state(dir.path());
        let cookie = cookie_for(
            &state,
            &SessionData {
                email: Some("jane@mail.io".into()),
                logged_in: true,
                permanent: true,
                ..Default::default()
            },
        );

        let response = make_request(
            app(state.clone()),
            Method::GET,
            "/logout",
            String::default(),
            Some(&cookie),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");

        let session = session_of(&state, &response);
        assert!(!session.logged_in);
        assert_eq!(session.email, None);
        assert_eq!(session.flashes.len(), 1);
        assert_eq!(session.flashes[0].category, Category::Info);
    }
}
