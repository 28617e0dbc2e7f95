use axum::Form;
use axum::extract::State;
use axum::extract::rejection::FormRejection;
use axum::response::Redirect;
use serde::Deserialize;
use validator::Validate;

use crate::AppState;
use crate::auth::{AuthError, Mode, Outcome};
use crate::error::Result;
use crate::session::{Category, Session};

const MISSING_FIELDS: &str = "Missing email, image, or mode.";
const NO_SINGLE_FACE: &str = "No face or multiple faces detected. Please recapture with your face centered and well-lit.";
const ALREADY_REGISTERED: &str =
    "You're already registered with this email. Try logging in.";
const REGISTERED: &str = "Registration successful! You are now logged in.";
const NOT_REGISTERED: &str =
    "No registered face found for this email. Please register first.";

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct Body {
    #[validate(length(min = 1))]
    email: String,
    #[validate(length(min = 1))]
    image_data: String,
    mode: String,
}

/// Handler to register or log in with a captured face.
///
/// Every outcome is reported with a flash message and a redirect.
pub async fn handler(
    State(state): State<AppState>,
    mut session: Session,
    body: std::result::Result<Form<Body>, FormRejection>,
) -> Result<(Session, Redirect)> {
    let Form(mut body) = body?;
    body.email = body.email.trim().to_lowercase();

    let mode = match (body.validate(), body.mode.parse::<Mode>()) {
        (Ok(()), Ok(mode)) => mode,
        _ => {
            session.flash(Category::Error, MISSING_FIELDS);
            return Ok((session, Redirect::to("/")));
        },
    };

    let outcome = state
        .auth
        .authenticate(mode, &body.email, &body.image_data)
        .await;

    let location = match outcome {
        Ok(Outcome::Registered) => {
            session.login(&body.email);
            session.flash(Category::Success, REGISTERED);
            "/dashboard"
        },
        Ok(Outcome::Verified) => {
            session.login(&body.email);
            session.flash(Category::Success, format!("Welcome back, {}!", body.email));
            "/dashboard"
        },
        Ok(Outcome::AlreadyRegistered) => {
            session.flash(Category::Info, ALREADY_REGISTERED);
            "/"
        },
        Ok(Outcome::NoSingleFace) => {
            session.flash(Category::Error, NO_SINGLE_FACE);
            "/"
        },
        Ok(Outcome::NotRegistered) => {
            session.flash(Category::Error, NOT_REGISTERED);
            "/"
        },
        Ok(Outcome::Rejected { similarity }) => {
            session.flash(
                Category::Error,
                format!(
                    "Face not recognized (similarity: {similarity:.1}%). Try again with better lighting and a neutral expression."
                ),
            );
            "/"
        },
        Err(AuthError::Decode(err)) => {
            tracing::warn!(error = %err, "captured image rejected");
            session.flash(
                Category::Error,
                format!("Could not decode captured image: {err}"),
            );
            "/"
        },
        Err(AuthError::Backend(err)) => {
            tracing::error!(error = %err, %mode, "authentication failed");
            session.flash(Category::Error, format!("Authentication error: {err}"));
            "/"
        },
    };

    Ok((session, Redirect::to(location)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::stub::data_url;
    use crate::*;
    use axum::http::{Method, StatusCode, header};
    use tower::ServiceExt;

    const RED: [u8; 3] = [200, 10, 10];
    const BLUE: [u8; 3] = [10, 10, 200];

    async fn submit(
        state: &AppState,
        mode: &str,
        email: &str,
        image: &str,
    ) -> axum::response::Response {
        make_request(
            app(state.clone()),
            Method::POST,
            "/submit",
            form(&[("mode", mode), ("email", email), ("image_data", image)]),
            None,
        )
        .await
    }

    fn last_flash(state: &AppState, response: &axum::response::Response) -> String {
        session_of(state, response)
            .flashes
            .pop()
            .map(|flash| flash.message)
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = test_state(dir.path());

        let response = submit(&state, "register", "  Jane@Mail.io ", &data_url(&[RED])).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/dashboard");

        let session = session_of(&state, &response);
        assert!(session.logged_in);
        assert_eq!(session.email.as_deref(), Some("jane@mail.io"));
        assert_eq!(session.flashes[0].message, REGISTERED);
        assert!(dir.path().join("jane_at_mail_io.jpg").exists());

        let response = submit(&state, "login", "jane@mail.io", &data_url(&[RED])).await;
        assert_eq!(response.headers()[header::LOCATION], "/dashboard");
        assert_eq!(last_flash(&state, &response), "Welcome back, jane@mail.io!");
    }

    #[tokio::test]
    async fn test_missing_fields() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = test_state(dir.path());
        let image = data_url(&[RED]);

        for (mode, email, image) in [
            ("login", "   ", image.as_str()),
            ("login", "jane@mail.io", ""),
            ("delete", "jane@mail.io", image.as_str()),
        ] {
            let response = submit(&state, mode, email, image).await;
            assert_eq!(response.headers()[header::LOCATION], "/");
            assert_eq!(last_flash(&state, &response), MISSING_FIELDS);
        }
    }

    #[tokio::test]
    async fn test_flash_messages() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = test_state(dir.path());

        let response = submit(&state, "login", "jane@mail.io", &data_url(&[RED])).await;
        assert_eq!(last_flash(&state, &response), NOT_REGISTERED);

        let response =
            submit(&state, "register", "jane@mail.io", &data_url(&[RED, BLUE])).await;
        assert_eq!(last_flash(&state, &response), NO_SINGLE_FACE);

        submit(&state, "register", "jane@mail.io", &data_url(&[RED])).await;
        let response = submit(&state, "register", "jane@mail.io", &data_url(&[RED])).await;
        assert_eq!(last_flash(&state, &response), ALREADY_REGISTERED);

        let response = submit(&state, "login", "jane@mail.io", &data_url(&[BLUE])).await;
        let message = last_flash(&state, &response);
        assert!(message.starts_with("Face not recognized (similarity: "));
        assert!(!session_of(&state, &response).logged_in);

        let response = submit(&state, "login", "jane@mail.io", "data:image/jpeg;base64").await;
        assert_eq!(
            last_flash(&state, &response),
            "Could not decode captured image: Invalid image data format"
        );
    }

    #[tokio::test]
    async fn test_backend_error_is_flashed() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = test_state(dir.path());
        std::fs::write(state.auth.store().registered_path("jane@mail.io"), b"corrupted")
            .unwrap();

        let response = submit(&state, "login", "jane@mail.io", &data_url(&[RED])).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");

        let session = session_of(&state, &response);
        assert!(!session.logged_in);
        assert_eq!(session.flashes[0].category, crate::session::Category::Error);
        assert!(session.flashes[0].message.starts_with("Authentication error: "));
    }

    #[tokio::test]
    async fn test_body_limit() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = config::Configuration::default();
        config.http.max_body_bytes = 1024;
        let state = test_state_with(dir.path(), config);

        let image = format!("data:image/png;base64,{}", "A".repeat(4096));
        let response = submit(&state, "register", "jane@mail.io", &image).await;

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!state.auth.store().is_registered("jane@mail.io"));
    }

    #[tokio::test]
    async fn test_wrong_content_type() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = test_state(dir.path());

        let response = app(state)
            .oneshot(
                axum::extract::Request::builder()
                    .method(Method::POST)
                    .uri("/submit")
                    .header(header::CONTENT_TYPE, "text/plain")
                    .body(axum::body::Body::from("mode=login"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
