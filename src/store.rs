//! Flat file store of reference faces.
//!
//! Each enrolled user owns exactly one `<sanitized email>.jpg` file under the
//! store root. Captures waiting for a decision live next to them as
//! `temp_<sanitized email>_<random>.jpg`.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;

pub const TEMP_PREFIX: &str = "temp_";
const EXTENSION: &str = "jpg";

type Result<T> = std::result::Result<T, StoreError>;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Invalid image data format")]
    InvalidFormat,
    #[error("{0}")]
    Base64(#[from] base64::DecodeError),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot create store directory {path}: {source}")]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Create a safe file name from an email.
///
/// Path separators are replaced too: the name never leaves the store root.
pub fn sanitize_email(email: &str) -> String {
    email
        .trim()
        .to_lowercase()
        .replace('@', "_at_")
        .replace(['.', '/', '\\'], "_")
}

/// Directory of enrolled faces.
#[derive(Clone, Debug)]
pub struct FaceStore {
    root: PathBuf,
}

impl FaceStore {
    /// Open a [`FaceStore`], creating the directory if it does not exist.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Directory {
            path: root.clone(),
            source,
        })?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the reference photo of `email`.
    pub fn registered_path(&self, email: &str) -> PathBuf {
        self.root
            .join(format!("{}.{EXTENSION}", sanitize_email(email)))
    }

    pub fn is_registered(&self, email: &str) -> bool {
        self.registered_path(email).exists()
    }

    fn temp_path(&self, email: &str) -> PathBuf {
        let mut bytes = [0u8; 4];
        rand::rngs::OsRng.fill_bytes(&mut bytes);

        self.root.join(format!(
            "{TEMP_PREFIX}{}_{}.{EXTENSION}",
            sanitize_email(email),
            hex::encode(bytes)
        ))
    }

    /// Decode a base64 data URL (`data:image/jpeg;base64,...`) and write it
    /// to a fresh temporary file.
    pub fn save_capture(&self, email: &str, data_url: &str) -> Result<TempImage> {
        let (_header, encoded) =
            data_url.split_once(',').ok_or(StoreError::InvalidFormat)?;
        let bytes = general_purpose::STANDARD.decode(encoded.trim())?;

        let path = self.temp_path(email);
        let mut file = File::create(&path).map_err(|source| StoreError::Write {
            path: path.clone(),
            source,
        })?;
        // From here the guard owns the file, even if the write fails.
        let image = TempImage { path: Some(path) };
        file.write_all(&bytes)
            .and_then(|_| file.flush())
            .map_err(|source| StoreError::Write {
                path: image.path().to_path_buf(),
                source,
            })?;

        Ok(image)
    }

    /// Remove temporary captures older than `max_age`.
    ///
    /// Never fails: errors are logged and the sweep goes on.
    pub fn cleanup_old_files(&self, max_age: Duration) -> usize {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::error!(error = %err, root = %self.root.display(), "error cleaning up files");
                return 0;
            },
        };

        let Some(limit) = SystemTime::now().checked_sub(max_age) else {
            return 0;
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.starts_with(TEMP_PREFIX) {
                continue;
            }

            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(err) => {
                    tracing::error!(error = %err, file = name, "error cleaning up files");
                    continue;
                },
            };

            if modified < limit {
                match fs::remove_file(entry.path()) {
                    Ok(()) => {
                        tracing::info!(file = name, "removed old temp file");
                        removed += 1;
                    },
                    Err(err) => {
                        tracing::error!(error = %err, file = name, "error cleaning up files")
                    },
                }
            }
        }

        removed
    }
}

/// A capture on disk. Deleted when dropped unless promoted.
#[derive(Debug)]
pub struct TempImage {
    path: Option<PathBuf>,
}

impl TempImage {
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or(Path::new(""))
    }

    /// Move the capture over `target`, replacing any existing file.
    pub fn promote(mut self, target: &Path) -> std::io::Result<()> {
        let Some(path) = self.path.take() else {
            return Ok(());
        };

        if let Err(err) = fs::rename(&path, target) {
            // Give the file back to the guard so it is still cleaned up.
            self.path = Some(path);
            return Err(err);
        }

        Ok(())
    }
}

impl Drop for TempImage {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if path.exists() {
                let _ = fs::remove_file(path);
            }
        }
    }
}
