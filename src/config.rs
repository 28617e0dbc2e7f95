//! Configuration manager for facegate.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;
use crate::face::{DistanceMetric, OnnxConfig};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DEFAULT_SECRET_KEY: &str = "change-me-in-production";
/// Environment variable holding the session signing key.
pub const SECRET_KEY_ENV: &str = "FACEGATE_SECRET_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Public URL of current instance.
    pub url: String,
    /// Listening address.
    #[serde(skip_serializing)]
    pub address: String,
    #[serde(skip_serializing)]
    pub port: u16,
    #[serde(skip_deserializing)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to enrolled faces storage.
    #[serde(skip_serializing)]
    pub storage: Storage,
    /// Related to session cookies.
    #[serde(skip_serializing)]
    pub session: SessionSettings,
    /// Related to HTTP limits.
    #[serde(skip_serializing)]
    pub http: Http,
    /// Related to face detection and verification.
    #[serde(skip_serializing)]
    pub face: Face,
    /// Related to telemetry exporters.
    #[serde(skip_serializing)]
    pub telemetry: Option<Telemetry>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            url: "http://localhost:5000/".to_owned(),
            address: "0.0.0.0".to_owned(),
            port: 5000,
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            storage: Storage::default(),
            session: SessionSettings::default(),
            http: Http::default(),
            face: Face::default(),
            telemetry: None,
        }
    }
}

/// Enrolled faces storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Storage {
    /// Directory of reference photos.
    pub students_dir: PathBuf,
    /// Temporary captures older than this are removed.
    pub max_file_age_days: u64,
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            students_dir: PathBuf::from("students"),
            max_file_age_days: 30,
        }
    }
}

impl Storage {
    pub fn max_file_age(&self) -> Duration {
        Duration::from_secs(self.max_file_age_days * 86_400)
    }
}

/// Session cookie configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub lifetime_minutes: u64,
    /// Add `Secure` flag on cookie.
    pub secure: bool,
    /// Signing key. Prefer `FACEGATE_SECRET_KEY` environment variable.
    pub secret_key: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            lifetime_minutes: 30,
            secure: false,
            secret_key: None,
        }
    }
}

impl SessionSettings {
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_minutes * 60)
    }

    /// Environment first, then configuration file, then the insecure default.
    pub fn secret_key(&self) -> String {
        if let Ok(key) = std::env::var(SECRET_KEY_ENV) {
            if !key.is_empty() {
                return key;
            }
        }

        match &self.secret_key {
            Some(key) if !key.is_empty() => key.clone(),
            _ => {
                tracing::warn!(
                    "no session key set, using the default one; set `{SECRET_KEY_ENV}` in production"
                );
                DEFAULT_SECRET_KEY.to_owned()
            },
        }
    }
}

/// HTTP server limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Http {
    /// Maximum request body, in bytes.
    pub max_body_bytes: usize,
    /// Request timeout, in seconds.
    pub timeout_secs: u64,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            max_body_bytes: 16 * 1024 * 1024, // 16 MiB.
            timeout_secs: 30,
        }
    }
}

/// Face recognition configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Face {
    /// Name of recognition model, for logs.
    pub model_name: String,
    pub metric: DistanceMetric,
    /// Override default threshold of `metric`.
    pub threshold: Option<f32>,
    #[serde(flatten)]
    pub onnx: OnnxConfig,
}

impl Default for Face {
    fn default() -> Self {
        Self {
            model_name: "ArcFace".to_owned(),
            metric: DistanceMetric::default(),
            threshold: None,
            onnx: OnnxConfig::default(),
        }
    }
}

/// OpenTelemetry configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// OTLP gRPC endpoint receiving traces.
    pub otlp_endpoint: Option<String>,
    /// Expose `/metrics` for Prometheus.
    #[serde(default)]
    pub prometheus: bool,
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => {
                let mut config: Configuration =
                    match serde_yaml::from_reader(file) {
                        Ok(config) => config,
                        Err(err) => {
                            return Ok(Arc::new(self.error(err)));
                        },
                    };

                // set app version.
                config.version = VERSION.to_owned();
                config.path = file_path.clone();

                // normalize URLs.
                config.url = self.normalize_url(&config.url)?;

                Ok(Arc::new(config))
            },
            Err(err) => Ok(Arc::new(self.error(err))),
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found or invalid");
        Self {
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_configuration() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
name: Campus
url: faces.example.com
port: 8080
storage:
  students_dir: /srv/students
session:
  lifetime_minutes: 10
face:
  metric: euclidean_l2
  threshold: 1.0
  detector: /models/detector.onnx
telemetry:
  prometheus: true
"#
        )
        .unwrap();

        let config = Configuration::default()
            .path(file.path().to_path_buf())
            .read()
            .unwrap();

        assert_eq!(config.name, "Campus");
        assert_eq!(config.url, "https://faces.example.com/");
        assert_eq!(config.port, 8080);
        assert_eq!(config.address, "0.0.0.0");
        assert_eq!(config.version(), VERSION);
        assert_eq!(config.storage.students_dir, PathBuf::from("/srv/students"));
        assert_eq!(config.storage.max_file_age_days, 30);
        assert_eq!(config.session.lifetime(), Duration::from_secs(600));
        assert_eq!(config.face.metric, DistanceMetric::EuclideanL2);
        assert_eq!(config.face.threshold, Some(1.0));
        assert_eq!(config.face.onnx.detector, PathBuf::from("/models/detector.onnx"));
        assert_eq!(config.face.onnx.recognizer_input, 112);
        assert!(config.telemetry.as_ref().unwrap().prometheus);
        assert_eq!(config.http.max_body_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_file_falls_back_to_default() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "port: [not, a, port]").unwrap();

        let config = Configuration::default()
            .path(file.path().to_path_buf())
            .read()
            .unwrap();

        assert_eq!(config.port, 5000);
        assert_eq!(config.storage.max_file_age(), Duration::from_secs(30 * 86_400));
    }

    #[test]
    fn test_public_status_hides_internals() {
        let value = serde_json::to_value(Configuration::default()).unwrap();
        assert!(value.get("name").is_some());
        assert!(value.get("version").is_some());
        assert!(value.get("storage").is_none());
        assert!(value.get("face").is_none());
    }
}
