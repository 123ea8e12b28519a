//! Model volume pre-flight check.
//!
//! The volume root and the model directory must exist; the per-type
//! subdirectories (`unet`, `vae`, `clip`, `loras`) are reported but not
//! required, so a job that needs no LoRAs still runs on a volume without
//! them.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::error::JobError;

/// Model subdirectories reported by [`validate_volume`].
pub const MODEL_SUBDIRS: [&str; 4] = ["unet", "vae", "clip", "loras"];

/// Maximum number of entry names listed per subdirectory.
pub const PREVIEW_LIMIT: usize = 5;

/// Marker reported for an absent subdirectory.
pub const MISSING_MARKER: &str = "missing";

/// Errors from the volume check.
#[derive(Debug, thiserror::Error)]
pub enum VolumeError {
    /// A hard-required directory does not exist.
    #[error("Required directory missing: {}", .path.display())]
    Missing { path: PathBuf },
}

impl From<VolumeError> for JobError {
    fn from(err: VolumeError) -> Self {
        match err {
            VolumeError::Missing { path } => JobError::ResourceMissing { path },
        }
    }
}

/// State of one model subdirectory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubdirStatus {
    Present {
        /// First [`PREVIEW_LIMIT`] entry names, sorted.
        preview: Vec<String>,
        /// Total number of entries.
        total: usize,
    },
    /// The directory exists but could not be listed.
    Unreadable(String),
    Missing,
}

impl Serialize for SubdirStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Present { preview, total } => {
                let mut s = serializer.serialize_struct("SubdirStatus", 2)?;
                s.serialize_field("preview", preview)?;
                s.serialize_field("total", total)?;
                s.end()
            }
            Self::Unreadable(error) => {
                let mut s = serializer.serialize_struct("SubdirStatus", 1)?;
                s.serialize_field("error", error)?;
                s.end()
            }
            Self::Missing => serializer.serialize_str(MISSING_MARKER),
        }
    }
}

/// Summary of the model directory, logged once per invocation.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeSummary {
    pub models_dir: PathBuf,
    pub subdirs: IndexMap<&'static str, SubdirStatus>,
}

impl VolumeSummary {
    /// Names of subdirectories that are absent.
    pub fn missing(&self) -> Vec<&'static str> {
        self.subdirs
            .iter()
            .filter(|(_, status)| **status == SubdirStatus::Missing)
            .map(|(name, _)| *name)
            .collect()
    }
}

/// One clause per subdirectory, e.g. `unet: 2 [a.safetensors, b.safetensors]; loras: missing`.
impl fmt::Display for VolumeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, status)) in self.subdirs.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            match status {
                SubdirStatus::Present { preview, total } => {
                    write!(f, "{name}: {total} [{}]", preview.join(", "))?;
                }
                SubdirStatus::Unreadable(_) => write!(f, "{name}: unreadable")?,
                SubdirStatus::Missing => write!(f, "{name}: {MISSING_MARKER}")?,
            }
        }
        Ok(())
    }
}

/// Check that `volume_root` and `models_dir` exist and summarize the
/// model subdirectories.
pub fn validate_volume(volume_root: &Path, models_dir: &Path) -> Result<VolumeSummary, VolumeError> {
    for required in [volume_root, models_dir] {
        if !required.is_dir() {
            return Err(VolumeError::Missing {
                path: required.to_path_buf(),
            });
        }
    }

    let subdirs = MODEL_SUBDIRS
        .iter()
        .map(|&name| (name, inspect_subdir(&models_dir.join(name))))
        .collect();

    let summary = VolumeSummary {
        models_dir: models_dir.to_path_buf(),
        subdirs,
    };

    let assets = serde_json::to_string(&summary.subdirs).unwrap_or_else(|_| summary.to_string());
    let missing = summary.missing();
    if missing.is_empty() {
        tracing::info!(models_dir = %models_dir.display(), %assets, "Model volume verified");
    } else {
        tracing::warn!(
            models_dir = %models_dir.display(),
            %assets,
            ?missing,
            "Model volume is missing subdirectories",
        );
    }

    Ok(summary)
}

fn inspect_subdir(path: &Path) -> SubdirStatus {
    if !path.is_dir() {
        return SubdirStatus::Missing;
    }

    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => return SubdirStatus::Unreadable(e.to_string()),
    };

    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    let total = names.len();
    names.truncate(PREVIEW_LIMIT);

    SubdirStatus::Present {
        preview: names,
        total,
    }
}
