//! On-disk form of a trained model generation.
//!
//! A generation is stored as a JSON envelope carrying the serialised
//! generation as a string payload plus its SHA-256 checksum:
//!
//! ```json
//! { "format_version": 1, "checksum": "<hex>", "payload": "<json>" }
//! ```
//!
//! Writes go to a sibling temporary file which is then renamed over the
//! target, so readers see either the old file or the new one.

use std::{
  io::ErrorKind,
  path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
  Error, Result,
  ensemble::ModelEnsemble,
  features::{FeatureEngineer, FeatureLayout},
};

pub const FORMAT_VERSION: u32 = 1;

/// Name recorded in performance records for generations built by this crate.
pub const MODEL_NAME: &str = "subject_ensemble";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelGeneration {
  pub model_name:    String,
  pub model_version: String,
  pub created_at:    DateTime<Utc>,
  /// Feature ordering the ensemble was trained on.
  pub feature_names: FeatureLayout,
  pub ensemble:      ModelEnsemble,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
  format_version: u32,
  checksum:       String,
  payload:        String,
}

fn checksum(payload: &str) -> String { hex::encode(Sha256::digest(payload.as_bytes())) }

impl ModelGeneration {
  /// A feature engineer bound to this generation's ordering.
  pub fn engineer(&self) -> FeatureEngineer {
    FeatureEngineer::with_layout(self.feature_names.clone())
  }

  pub fn to_bytes(&self) -> Result<Vec<u8>> {
    let payload = serde_json::to_string(self)?;
    let envelope = Envelope {
      format_version: FORMAT_VERSION,
      checksum: checksum(&payload),
      payload,
    };
    Ok(serde_json::to_vec(&envelope)?)
  }

  /// Decode an envelope. `path` is only used for error reporting.
  pub fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self> {
    let envelope: Envelope = serde_json::from_slice(bytes)?;
    if envelope.format_version != FORMAT_VERSION {
      return Err(Error::UnsupportedFormat(envelope.format_version));
    }
    if checksum(&envelope.payload) != envelope.checksum {
      return Err(Error::ChecksumMismatch { path: path.to_owned() });
    }
    Ok(serde_json::from_str(&envelope.payload)?)
  }

  /// Write atomically to `path`, creating parent directories.
  pub fn save(&self, path: &Path) -> Result<()> { write_atomic(path, &self.to_bytes()?) }

  /// Read a generation. A missing file is `Ok(None)`.
  pub fn load(path: &Path) -> Result<Option<Self>> {
    match std::fs::read(path) {
      Ok(bytes) => Self::from_bytes(&bytes, path).map(Some),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }
}

/// Replace `path` with `bytes` through a sibling temporary file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
  if let Some(dir) = path.parent() {
    std::fs::create_dir_all(dir)?;
  }
  let tmp = temp_path(path);
  std::fs::write(&tmp, bytes)?;
  if let Err(e) = std::fs::rename(&tmp, path) {
    let _ = std::fs::remove_file(&tmp);
    return Err(e.into());
  }
  Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
  let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
  path.with_file_name(name)
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use super::*;

  fn generation() -> ModelGeneration {
    ModelGeneration {
      model_name:    MODEL_NAME.into(),
      model_version: "v20250101_020000_000".into(),
      created_at:    Utc::now(),
      feature_names: FeatureLayout::new(vec!["a".into(), "b".into()]),
      ensemble:      ModelEnsemble { families: Vec::new(), subjects: BTreeMap::new() },
    }
  }

  fn scratch() -> PathBuf {
    std::env::temp_dir().join(format!("marksight-artifact-{}", uuid::Uuid::new_v4()))
  }

  #[test]
  fn save_then_load() {
    let dir = scratch();
    let path = dir.join("nested/current.json");
    generation().save(&path).unwrap();

    let loaded = ModelGeneration::load(&path).unwrap().unwrap();
    assert_eq!(loaded.model_version, "v20250101_020000_000");
    assert_eq!(loaded.feature_names.names(), ["a", "b"]);
    assert_eq!(loaded.engineer().layout(), Some(&loaded.feature_names));

    // No temporary files left behind.
    let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
    assert_eq!(entries, 1);
    std::fs::remove_dir_all(dir).unwrap();
  }

  #[test]
  fn raw_bytes_replace_an_existing_file() {
    let dir = scratch();
    let path = dir.join("current.json");
    generation().save(&path).unwrap();
    write_atomic(&path, b"restored").unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), b"restored");
    assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 1);
    std::fs::remove_dir_all(dir).unwrap();
  }

  #[test]
  fn missing_file_is_none() {
    let path = scratch().join("current.json");
    assert!(ModelGeneration::load(&path).unwrap().is_none());
  }

  #[test]
  fn tampered_payload_fails_its_checksum() {
    let bytes = generation().to_bytes().unwrap();
    let mut envelope: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let payload = envelope["payload"].as_str().unwrap().replace("v2025", "v2026");
    envelope["payload"] = payload.into();
    let tampered = serde_json::to_vec(&envelope).unwrap();

    let err = ModelGeneration::from_bytes(&tampered, Path::new("x.json")).unwrap_err();
    assert!(matches!(err, Error::ChecksumMismatch { .. }));
  }

  #[test]
  fn garbage_is_an_error_not_a_panic() {
    let err = ModelGeneration::from_bytes(b"{ not json", Path::new("x.json")).unwrap_err();
    assert!(matches!(err, Error::Json(_)));

    let future = br#"{"format_version":9,"checksum":"","payload":""}"#;
    let err = ModelGeneration::from_bytes(future, Path::new("x.json")).unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat(9)));
  }
}
