//! Face enrollment and verification use case.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::face::{FaceError, FaceVerifier};
use crate::store::{FaceStore, StoreError};

/// What the user asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Login,
    Register,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Login => "login",
            Mode::Register => "register",
        }
    }
}

impl FromStr for Mode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "login" => Ok(Mode::Login),
            "register" => Ok(Mode::Register),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision taken on a capture.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Zero or several faces on the capture.
    NoSingleFace,
    AlreadyRegistered,
    Registered,
    NotRegistered,
    Verified,
    /// Face does not match the reference. `similarity` is in percent.
    Rejected { similarity: f32 },
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::NoSingleFace => "no_single_face",
            Outcome::AlreadyRegistered => "already_registered",
            Outcome::Registered => "registered",
            Outcome::NotRegistered => "not_registered",
            Outcome::Verified => "verified",
            Outcome::Rejected { .. } => "rejected",
        }
    }

    /// Whether the user is now logged in.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Registered | Outcome::Verified)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    /// The capture could not be saved.
    #[error("{0}")]
    Decode(#[from] StoreError),
    /// Face backend or filesystem failure during the decision.
    #[error("{0}")]
    Backend(String),
}

impl From<FaceError> for AuthError {
    fn from(err: FaceError) -> Self {
        AuthError::Backend(err.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(err: std::io::Error) -> Self {
        AuthError::Backend(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AuthError {
    fn from(err: tokio::task::JoinError) -> Self {
        AuthError::Backend(err.to_string())
    }
}

/// Runs enrollment and verification against the face store.
#[derive(Clone)]
pub struct Authenticator {
    store: FaceStore,
    verifier: FaceVerifier,
}

impl Authenticator {
    /// Create a new [`Authenticator`].
    pub fn new(store: FaceStore, verifier: FaceVerifier) -> Self {
        Self { store, verifier }
    }

    pub fn store(&self) -> &FaceStore {
        &self.store
    }

    /// Enroll or verify `image_data` (a data URL) for `email`.
    pub async fn authenticate(
        &self,
        mode: Mode,
        email: &str,
        image_data: &str,
    ) -> Result<Outcome, AuthError> {
        let result = self.decide(mode, email, image_data).await;

        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(AuthError::Decode(_)) => "decode_error",
            Err(AuthError::Backend(_)) => "backend_error",
        };
        metrics::counter!(
            "auth_attempts_total",
            "mode" => mode.as_str(),
            "outcome" => outcome
        )
        .increment(1);

        result
    }

    async fn decide(
        &self,
        mode: Mode,
        email: &str,
        image_data: &str,
    ) -> Result<Outcome, AuthError> {
        let store = self.store.clone();
        let verifier = self.verifier.clone();
        let email = email.to_owned();
        let image_data = image_data.to_owned();

        // Decoding, models and disk: keep all of it off the runtime.
        tokio::task::spawn_blocking(move || -> Result<Outcome, AuthError> {
            // Removed on every return path unless promoted.
            let capture = store.save_capture(&email, &image_data)?;
            let registered_path = store.registered_path(&email);

            if !verifier.single_face_present(capture.path()) {
                return Ok(Outcome::NoSingleFace);
            }

            match mode {
                Mode::Register => {
                    if registered_path.exists() {
                        return Ok(Outcome::AlreadyRegistered);
                    }

                    capture.promote(&registered_path)?;
                    tracing::info!(%email, "face registered");
                    Ok(Outcome::Registered)
                },
                Mode::Login => {
                    if !registered_path.exists() {
                        return Ok(Outcome::NotRegistered);
                    }

                    let verification = verifier.verify(capture.path(), &registered_path)?;
                    tracing::info!(
                        %email,
                        verified = verification.verified,
                        distance = verification.distance,
                        threshold = verification.threshold,
                        metric = %verification.metric,
                        "face verified"
                    );

                    if verification.verified {
                        Ok(Outcome::Verified)
                    } else {
                        Ok(Outcome::Rejected {
                            similarity: verification.similarity(),
                        })
                    }
                },
            }
        })
        .await?
    }
}
