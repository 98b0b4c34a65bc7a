//! Model registry: one checksummed artifact at a fixed path.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::model::TrainedModel;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("artifact io at {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("serialize model: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    format_version: u32,
    /// Hex SHA-256 of `payload`.
    checksum: String,
    payload: String,
}

fn digest(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

pub fn model_exists(path: &Path) -> bool {
    path.is_file()
}

/// Replace the artifact at `path`. The bytes land in a sibling temp file
/// first and are renamed over the target, so readers see the old artifact or
/// the new one.
pub fn save_model(model: &TrainedModel, path: &Path) -> Result<(), RegistryError> {
    let io_err = |source| RegistryError::Io { path: path.to_path_buf(), source };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(io_err)?;

    let payload = serde_json::to_string(model)?;
    let envelope = Envelope { format_version: FORMAT_VERSION, checksum: digest(&payload), payload };
    let bytes = serde_json::to_vec(&envelope)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    info!(path = %path.display(), model_type = %model.kind(), bytes = bytes.len(), "model artifact saved");
    Ok(())
}

/// The stored model, or `None` when the artifact is missing or fails any
/// integrity check. Corruption is logged, never returned as an error.
pub fn load_model(path: &Path) -> Option<TrainedModel> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "model artifact unreadable");
            return None;
        }
    };
    match decode(&bytes) {
        Ok(model) => {
            info!(path = %path.display(), model_type = %model.kind(), "model artifact loaded");
            Some(model)
        }
        Err(reason) => {
            warn!(path = %path.display(), reason = %reason, "discarding corrupt model artifact");
            None
        }
    }
}

fn decode(bytes: &[u8]) -> Result<TrainedModel, String> {
    let envelope: Envelope = serde_json::from_slice(bytes).map_err(|e| format!("envelope: {e}"))?;
    if envelope.format_version != FORMAT_VERSION {
        return Err(format!("unsupported format version {}", envelope.format_version));
    }
    if digest(&envelope.payload) != envelope.checksum {
        return Err("checksum mismatch".into());
    }
    serde_json::from_str(&envelope.payload).map_err(|e| format!("payload: {e}"))
}
