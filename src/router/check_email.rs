use axum::extract::State;
use axum::extract::rejection::FormRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AppState;
use crate::error::Result;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Body {
    email: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Registered {
    pub registered: bool,
}

/// Tell whether an email already has a reference photo.
pub async fn handler(
    State(state): State<AppState>,
    body: std::result::Result<Form<Body>, FormRejection>,
) -> Result<Response> {
    let Form(body) = body?;
    let email = body.email.trim().to_lowercase();

    if email.is_empty() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Email required" })),
        )
            .into_response());
    }

    let registered = state.auth.store().is_registered(&email);
    Ok(Json(Registered { registered }).into_response())
}
