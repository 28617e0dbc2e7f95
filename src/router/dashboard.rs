use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Redirect, Response};

use crate::config::Configuration;
use crate::session::{Category, Session};
use crate::templates;

/// Page reserved to logged in users.
pub async fn handler(
    State(config): State<Arc<Configuration>>,
    mut session: Session,
) -> Response {
    let email = session
        .email()
        .filter(|_| session.is_logged_in())
        .map(str::to_owned);
    let Some(email) = email else {
        session.flash(Category::Error, "You need to log in first.");
        return (session, Redirect::to("/")).into_response();
    };

    let flashes = session.take_flashes();
    let page = templates::dashboard(&config.name, &email, &flashes);
    (session, page).into_response()
}

#[cfg(test)]
mod tests {
    use crate::session::SessionData;
    use crate::*;
    use axum::http::{Method, StatusCode, header};
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_dashboard_requires_login() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = test_state(dir.path());

        let response = make_request(
            app(state.clone()),
            Method::GET,
            "/dashboard",
            String::default(),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");

        let flashes = session_of(&state, &response).flashes;
        assert_eq!(flashes[0].message, "You need to log in first.");
    }

    #[tokio::test]
    async fn test_dashboard_shows_email() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = test_state(dir.path());
        let cookie = cookie_for(
            &state,
            &SessionData {
                email: Some("jane@mail.io".into()),
                logged_in: true,
                ..Default::default()
            },
        );

        let response = make_request(
            app(state),
            Method::GET,
            "/dashboard",
            String::default(),
            Some(&cookie),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let page = String::from_utf8(body.to_vec()).unwrap();
        assert!(page.contains("<strong>jane@mail.io</strong>"));
    }
}
