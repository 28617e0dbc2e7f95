//! Signed cookie sessions.
//!
//! The whole session lives in the cookie: `base64url(json).base64url(mac)`,
//! where `mac` is HMAC-SHA256 of the first part. Nothing is kept server-side.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponseParts, ResponseParts};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::AppState;

pub const COOKIE_NAME: &str = "facegate_session";

type HmacSha256 = Hmac<Sha256>;

/// Kind of a flash message, used by templates for styling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Success,
    Error,
    Info,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Success => "success",
            Category::Error => "error",
            Category::Info => "info",
        }
    }
}

/// One-shot message shown on the next rendered page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub category: Category,
    pub message: String,
}

/// Session payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub logged_in: bool,
    #[serde(default)]
    pub permanent: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flashes: Vec<Flash>,
    /// Unix timestamp, only set on permanent sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl SessionData {
    fn is_empty(&self) -> bool {
        self.email.is_none() && !self.logged_in && self.flashes.is_empty()
    }
}

/// Signs and checks session cookies.
#[derive(Clone)]
pub struct SessionManager {
    key: Arc<[u8]>,
    lifetime: Duration,
    secure: bool,
}

impl SessionManager {
    /// Create a new [`SessionManager`].
    pub fn new(secret: impl AsRef<[u8]>, lifetime: Duration) -> Self {
        Self {
            key: Arc::from(secret.as_ref()),
            lifetime,
            secure: false,
        }
    }

    /// Only send the cookie over HTTPS.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size")
    }

    /// Serialize and sign `data`.
    pub fn encode(&self, data: &SessionData) -> String {
        let json = serde_json::to_vec(data).unwrap_or_default();
        let payload = URL_SAFE_NO_PAD.encode(json);

        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{payload}.{signature}")
    }

    /// Check and deserialize a cookie value.
    ///
    /// Returns `None` when the cookie was tampered with, is malformed or
    /// expired.
    pub fn decode(&self, value: &str) -> Option<SessionData> {
        let (payload, signature) = value.split_once('.')?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;

        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).ok()?;

        let json = URL_SAFE_NO_PAD.decode(payload).ok()?;
        let data: SessionData = serde_json::from_slice(&json).ok()?;

        match data.expires_at {
            Some(expires_at) if expires_at <= chrono::Utc::now().timestamp() => {
                tracing::debug!(expires_at, "session expired");
                None
            },
            _ => Some(data),
        }
    }

    /// Read the session out of request headers.
    pub fn from_headers(&self, headers: &HeaderMap) -> Session {
        let data = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|header| header.to_str().ok())
            .flat_map(|header| header.split(';'))
            .filter_map(|cookie| cookie.trim().split_once('='))
            .find(|(name, _)| *name == COOKIE_NAME)
            .and_then(|(_, value)| self.decode(value))
            .unwrap_or_default();

        Session {
            data,
            manager: self.clone(),
        }
    }

    fn set_cookie(&self, data: &SessionData) -> String {
        let secure = if self.secure { "; Secure" } else { "" };

        if data.is_empty() {
            return format!(
                "{COOKIE_NAME}=; Max-Age=0; Path=/; HttpOnly; SameSite=Lax{secure}"
            );
        }

        let max_age = if data.permanent {
            format!("; Max-Age={}", self.lifetime.as_secs())
        } else {
            String::default()
        };

        format!(
            "{COOKIE_NAME}={}{max_age}; Path=/; HttpOnly; SameSite=Lax{secure}",
            self.encode(data)
        )
    }
}

impl FromRef<AppState> for SessionManager {
    fn from_ref(state: &AppState) -> SessionManager {
        state.sessions.clone()
    }
}

/// Session of the current request.
///
/// Extract it in a handler, then return it as part of the response to save
/// changes.
#[derive(Clone)]
pub struct Session {
    data: SessionData,
    manager: SessionManager,
}

impl Session {
    pub fn data(&self) -> &SessionData {
        &self.data
    }

    pub fn email(&self) -> Option<&str> {
        self.data.email.as_deref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.data.logged_in
    }

    /// Queue a message for the next rendered page.
    pub fn flash(&mut self, category: Category, message: impl Into<String>) {
        self.data.flashes.push(Flash {
            category,
            message: message.into(),
        });
    }

    /// Pop every pending message.
    pub fn take_flashes(&mut self) -> Vec<Flash> {
        std::mem::take(&mut self.data.flashes)
    }

    /// Mark `email` as logged in, for the configured lifetime.
    pub fn login(&mut self, email: &str) {
        self.data.permanent = true;
        self.data.email = Some(email.to_owned());
        self.data.logged_in = true;
    }

    /// Forget everything, flashes included.
    pub fn clear(&mut self) {
        self.data = SessionData::default();
    }
}

impl<S> FromRequestParts<S> for Session
where
    SessionManager: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        Ok(SessionManager::from_ref(state).from_headers(&parts.headers))
    }
}

impl IntoResponseParts for Session {
    type Error = Infallible;

    fn into_response_parts(
        mut self,
        mut res: ResponseParts,
    ) -> Result<ResponseParts, Self::Error> {
        // Permanent sessions slide on every response.
        self.data.expires_at = self.data.permanent.then(|| {
            chrono::Utc::now().timestamp() + self.manager.lifetime.as_secs() as i64
        });

        match HeaderValue::from_str(&self.manager.set_cookie(&self.data)) {
            Ok(value) => {
                res.headers_mut().append(SET_COOKIE, value);
            },
            Err(err) => tracing::error!(error = %err, "invalid session cookie"),
        }

        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    fn manager() -> SessionManager {
        SessionManager::new("secret", Duration::from_secs(1800))
    }

    fn cookie_of(response: &axum::response::Response) -> String {
        let header = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        let (pair, _) = header.split_once(';').unwrap();
        pair.to_owned()
    }

    #[test]
    fn test_encode_decode() {
        let manager = manager();
        let data = SessionData {
            email: Some("jane@mail.io".into()),
            logged_in: true,
            permanent: false,
            flashes: vec![Flash {
                category: Category::Success,
                message: "Welcome back, jane@mail.io!".into(),
            }],
            expires_at: None,
        };

        let cookie = manager.encode(&data);
        assert!(cookie.is_ascii());
        assert!(!cookie.contains(';'));
        assert_eq!(manager.decode(&cookie), Some(data));
    }

    #[test]
    fn test_tampered_cookie_is_rejected() {
        let manager = manager();
        let data = SessionData {
            email: Some("jane@mail.io".into()),
            ..Default::default()
        };
        let cookie = manager.encode(&data);
        let (_, signature) = cookie.split_once('.').unwrap();

        let forged = SessionData {
            email: Some("admin@mail.io".into()),
            logged_in: true,
            ..Default::default()
        };
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());

        assert_eq!(manager.decode(&format!("{forged_payload}.{signature}")), None);
        assert_eq!(manager.decode("garbage"), None);
        assert_eq!(manager.decode("a.b.c"), None);

        let other = SessionManager::new("other", Duration::from_secs(1800));
        assert_eq!(other.decode(&cookie), None);
    }

    #[test]
    fn test_expired_cookie_is_rejected() {
        let manager = manager();
        let data = SessionData {
            logged_in: true,
            permanent: true,
            expires_at: Some(chrono::Utc::now().timestamp() - 1),
            ..Default::default()
        };

        assert_eq!(manager.decode(&manager.encode(&data)), None);
    }

    #[test]
    fn test_from_headers() {
        let manager = manager();
        let data = SessionData {
            email: Some("jane@mail.io".into()),
            logged_in: true,
            ..Default::default()
        };

        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark"));
        headers.append(
            COOKIE,
            HeaderValue::from_str(&format!("lang=fr; {COOKIE_NAME}={}", manager.encode(&data)))
                .unwrap(),
        );

        let session = manager.from_headers(&headers);
        assert!(session.is_logged_in());
        assert_eq!(session.email(), Some("jane@mail.io"));

        let session = manager.from_headers(&HeaderMap::new());
        assert_eq!(session.data(), &SessionData::default());
    }

    #[test]
    fn test_login_sets_max_age() {
        let manager = manager();
        let mut session = manager.from_headers(&HeaderMap::new());
        session.login("jane@mail.io");

        let response = (session, "ok").into_response();
        let header = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(header.contains("Max-Age=1800"));
        assert!(header.contains("HttpOnly"));

        let cookie = cookie_of(&response);
        let (_, value) = cookie.split_once('=').unwrap();
        let data = manager.decode(value).unwrap();
        assert!(data.logged_in);
        assert!(data.permanent);
        assert!(data.expires_at.unwrap() > chrono::Utc::now().timestamp());
    }

    #[test]
    fn test_flashes_are_consumed() {
        let manager = manager().secure(true);
        let mut session = manager.from_headers(&HeaderMap::new());
        session.flash(Category::Info, "You have been logged out successfully.");

        let response = (session, "ok").into_response();
        let header = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(header.contains("Secure"));
        assert!(!header.contains("Max-Age"));

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(&cookie_of(&response)).unwrap());
        let mut session = manager.from_headers(&headers);
        let flashes = session.take_flashes();
        assert_eq!(flashes.len(), 1);
        assert_eq!(flashes[0].category, Category::Info);

        // Nothing left: the cookie is dropped.
        let response = (session, "ok").into_response();
        let header = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(header.starts_with(&format!("{COOKIE_NAME}=;")));
        assert!(header.contains("Max-Age=0"));
    }
}
