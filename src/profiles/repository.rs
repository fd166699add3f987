//! Local profile repository
//!
//! Owns the profiles base directory:
//!
//! ```text
//! <base>/<preset or custom dirs>/profile.json
//! <base>/tmp/download-XXXXXX/        private, in-progress downloads
//! <base>/downloads/<timestamp>/      committed downloads
//! <base>/partial/<timestamp>/        failed downloads, kept for inspection
//! <base>/.state/last_applied.json
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use super::presets::PresetTable;
use crate::protocol::{download_timestamp, ErrorCode};

const TMP_DIR: &str = "tmp";
const DOWNLOADS_DIR: &str = "downloads";
const PARTIAL_DIR: &str = "partial";
const STATE_DIR: &str = ".state";
const LAST_APPLIED_FILE: &str = "last_applied.json";

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("profiles directory {} not found or not a directory", .0.display())]
    BaseDirMissing(PathBuf),

    #[error("no preset named '{0}'")]
    PresetNotFound(String),

    #[error("invalid custom directory '{0}': must be a relative path inside the profiles directory")]
    InvalidCustomPath(String),

    #[error("custom directory {} not found", .0.display())]
    CustomNotFound(PathBuf),

    #[error("no last applied profile recorded")]
    LastAppliedMissing,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to persist last applied profile: {0}")]
    Persist(#[source] io::Error),

    #[error("malformed last applied state: {0}")]
    Json(#[from] serde_json::Error),
}

impl RepoError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RepoError::BaseDirMissing(_) => ErrorCode::ConfigInvalid,
            RepoError::PresetNotFound(_)
            | RepoError::InvalidCustomPath(_)
            | RepoError::CustomNotFound(_)
            | RepoError::LastAppliedMissing => ErrorCode::ProfileNotFound,
            RepoError::Io { .. } => ErrorCode::ProfileDownloadFailed,
            RepoError::Persist(_) | RepoError::Json(_) => ErrorCode::StatePersistFailed,
        }
    }

    fn io(context: impl Into<String>, source: io::Error) -> Self {
        RepoError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Persisted record of the last successful apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastAppliedProfile {
    pub schema_version: i32,
    pub profile_name: String,
    pub is_preset: bool,
    pub applied_at: DateTime<Utc>,
}

/// A download directory published under its final name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedDownload {
    pub path: PathBuf,
    pub partial: bool,
    pub timestamp: String,
}

impl CommittedDownload {
    /// Root the download landed under ("downloads" or "partial")
    pub fn tag(&self) -> &'static str {
        if self.partial {
            PARTIAL_DIR
        } else {
            DOWNLOADS_DIR
        }
    }
}

#[derive(Debug)]
pub struct ProfileRepository {
    base: PathBuf,
    presets: PresetTable,
}

impl ProfileRepository {
    /// Bind the repository to an existing base directory
    pub fn init(base: impl Into<PathBuf>, presets: PresetTable) -> Result<Self, RepoError> {
        let base = base.into();
        if !base.is_dir() {
            return Err(RepoError::BaseDirMissing(base));
        }

        info!(
            "[REPO] Profiles directory {} ({} presets)",
            base.display(),
            presets.len()
        );
        Ok(Self { base, presets })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    pub fn presets(&self) -> &PresetTable {
        &self.presets
    }

    pub fn resolve_preset(&self, name: &str) -> Result<PathBuf, RepoError> {
        let entry = self
            .presets
            .find(name)
            .ok_or_else(|| RepoError::PresetNotFound(name.trim().to_string()))?;

        let dir = self.base.join(&entry.directory);
        debug!("[REPO] Preset '{}' -> {}", entry.display_name, dir.display());
        Ok(dir)
    }

    pub fn resolve_custom(&self, relative: &str) -> Result<PathBuf, RepoError> {
        let trimmed = relative.trim();
        let path = Path::new(trimmed);

        let escapes = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if trimmed.is_empty() || escapes {
            return Err(RepoError::InvalidCustomPath(trimmed.to_string()));
        }

        let dir = self.base.join(path);
        if !dir.is_dir() {
            return Err(RepoError::CustomNotFound(dir));
        }

        debug!("[REPO] Custom directory '{}' -> {}", trimmed, dir.display());
        Ok(dir)
    }

    /// Create a uniquely named private directory under `<base>/tmp`
    pub fn create_temp_download_dir(&self) -> Result<PathBuf, RepoError> {
        let tmp_root = self.base.join(TMP_DIR);
        fs::create_dir_all(&tmp_root)
            .map_err(|e| RepoError::io(format!("create {}", tmp_root.display()), e))?;

        let dir = tempfile::Builder::new()
            .prefix("download-")
            .tempdir_in(&tmp_root)
            .map_err(|e| RepoError::io("create temporary download directory", e))?
            .keep();

        debug!("[REPO] Temporary download directory {}", dir.display());
        Ok(dir)
    }

    /// Publish `temp_dir` under `downloads/<timestamp>` or `partial/<timestamp>`.
    ///
    /// The rename is the only operation that makes the directory visible.
    pub fn commit_temp_download_dir(
        &self,
        temp_dir: &Path,
        partial: bool,
    ) -> Result<CommittedDownload, RepoError> {
        let root = self
            .base
            .join(if partial { PARTIAL_DIR } else { DOWNLOADS_DIR });
        fs::create_dir_all(&root)
            .map_err(|e| RepoError::io(format!("create {}", root.display()), e))?;

        let timestamp = download_timestamp();
        let mut target = root.join(&timestamp);
        let mut suffix = 1;
        while target.exists() {
            target = root.join(format!("{timestamp}-{suffix}"));
            suffix += 1;
        }

        fs::rename(temp_dir, &target).map_err(|e| {
            RepoError::io(
                format!("rename {} to {}", temp_dir.display(), target.display()),
                e,
            )
        })?;

        let committed = CommittedDownload {
            path: target,
            partial,
            timestamp,
        };
        info!(
            "[REPO] Download committed under {}: {}",
            committed.tag(),
            committed.path.display()
        );
        Ok(committed)
    }

    /// Atomically replace `.state/last_applied.json`
    pub fn write_last_applied(
        &self,
        profile_name: &str,
        is_preset: bool,
    ) -> Result<LastAppliedProfile, RepoError> {
        let record = LastAppliedProfile {
            schema_version: 1,
            profile_name: profile_name.to_string(),
            is_preset,
            applied_at: Utc::now(),
        };

        let state_dir = self.base.join(STATE_DIR);
        fs::create_dir_all(&state_dir).map_err(RepoError::Persist)?;

        let json = serde_json::to_vec_pretty(&record)?;
        let mut tmp = NamedTempFile::new_in(&state_dir).map_err(RepoError::Persist)?;
        tmp.write_all(&json).map_err(RepoError::Persist)?;
        tmp.as_file().sync_all().map_err(RepoError::Persist)?;
        tmp.persist(state_dir.join(LAST_APPLIED_FILE))
            .map_err(|e| RepoError::Persist(e.error))?;

        debug!("[REPO] Last applied profile: {}", profile_name);
        Ok(record)
    }

    pub fn read_last_applied(&self) -> Result<LastAppliedProfile, RepoError> {
        let path = self.base.join(STATE_DIR).join(LAST_APPLIED_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RepoError::LastAppliedMissing)
            }
            Err(e) => return Err(RepoError::io(format!("read {}", path.display()), e)),
        };

        Ok(serde_json::from_str(&text)?)
    }

    pub fn shutdown(self) {
        debug!("[REPO] Profiles repository at {} released", self.base.display());
    }
}
