//! Profile descriptor (`profile.json`)
//!
//! A profile describes the desired welcome animation and ring button sound.
//! A section is inert when it is disabled or names no file; inert sections are
//! neither patched into the device configuration nor transferred.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::errors::ErrorCode;

/// File name of the profile descriptor inside a profile directory
pub const PROFILE_FILE_NAME: &str = "profile.json";

/// Current descriptor schema version
pub const SCHEMA_VERSION: i32 = 1;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile descriptor not found at {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize profile: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl ProfileError {
    /// Map to the published error code
    pub fn code(&self) -> ErrorCode {
        match self {
            ProfileError::NotFound(_) => ErrorCode::ProfileNotFound,
            ProfileError::Read { .. } | ProfileError::Parse { .. } => ErrorCode::ProfileInvalid,
            ProfileError::Write { .. } | ProfileError::Serialize(_) => {
                ErrorCode::ProfileDownloadFailed
            }
        }
    }
}

/// Welcome animation section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Welcome {
    pub enabled: bool,
    pub file: String,
    pub count: i32,
    pub duration_ms: i32,
    #[serde(rename = "loop")]
    pub loop_: bool,
    pub gui_id: String,
}

impl Welcome {
    pub fn is_active(&self) -> bool {
        self.enabled && !self.file.is_empty()
    }
}

/// Ring button sound section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RingButton {
    pub enabled: bool,
    pub file: String,
    pub repeat_times: i32,
    pub volume: i32,
    pub sound_state_name: String,
}

impl Default for RingButton {
    fn default() -> Self {
        Self {
            enabled: false,
            file: String::new(),
            repeat_times: 1,
            volume: 100,
            sound_state_name: String::new(),
        }
    }
}

impl RingButton {
    pub fn is_active(&self) -> bool {
        self.enabled && !self.file.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
    pub schema_version: i32,
    pub welcome: Welcome,
    pub ring_button: RingButton,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            welcome: Welcome::default(),
            ring_button: RingButton::default(),
        }
    }
}

impl Profile {
    /// Load `<dir>/profile.json`
    pub fn load_from_dir(dir: &Path) -> Result<Self, ProfileError> {
        let path = dir.join(PROFILE_FILE_NAME);
        if !path.is_file() {
            return Err(ProfileError::NotFound(path));
        }

        let text = fs::read_to_string(&path).map_err(|source| ProfileError::Read {
            path: path.clone(),
            source,
        })?;

        serde_json::from_str(&text).map_err(|source| ProfileError::Parse { path, source })
    }

    /// Serialize to pretty JSON and write it to `path`
    pub fn write_to_file(&self, path: &Path) -> Result<(), ProfileError> {
        let mut out = self.clone();
        out.schema_version = SCHEMA_VERSION;

        let json = serde_json::to_string_pretty(&out).map_err(ProfileError::Serialize)?;
        fs::write(path, json).map_err(|source| ProfileError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Animation file to transfer, if the welcome section is active
    pub fn active_animation(&self) -> Option<&str> {
        self.welcome.is_active().then_some(self.welcome.file.as_str())
    }

    /// Sound file to transfer, if the ring button section is active
    pub fn active_sound(&self) -> Option<&str> {
        self.ring_button.is_active().then_some(self.ring_button.file.as_str())
    }
}
