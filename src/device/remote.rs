//! Remote apply pipeline
//!
//! A [`RemotePipeline`] owns one open session for the duration of a single
//! apply or download and closes it when dropped, whatever the outcome.

use md5::{Digest, Md5};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::conf::{self, ConfError};
use crate::protocol::{
    build_apply_script, classify_step_error, device, parse_step_error, ErrorCode, Profile,
    ProfileError, ScriptError, StepError, PROFILE_FILE_NAME,
};
use crate::transport::{RemoteSession, SessionError};

/// Mode of every file placed in the staging directory
const STAGED_FILE_MODE: i32 = 0o644;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("local working directory: {0}")]
    WorkDir(#[source] io::Error),

    #[error("downloading {remote}: {source}")]
    Download {
        remote: String,
        #[source]
        source: SessionError,
    },

    #[error(transparent)]
    Conf(#[from] ConfError),

    #[error("preparing remote staging directory: {0}")]
    Staging(#[source] SessionError),

    #[error("invalid asset file name '{0}'")]
    InvalidFileName(String),

    #[error("asset {} does not exist", .0.display())]
    MissingAsset(PathBuf),

    #[error("checksum of {}: {source}", path.display())]
    Checksum {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("upload: {0}")]
    Upload(#[source] SessionError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("apply script failed with status {exit_status}{}", step_suffix(.step))]
    Remote {
        step: Option<StepError>,
        exit_status: i32,
        stderr: String,
    },

    #[error("apply script: {0}")]
    Exec(#[source] SessionError),

    #[error(transparent)]
    Profile(#[from] ProfileError),
}

fn step_suffix(step: &Option<StepError>) -> String {
    match step {
        Some(s) => format!(" at step '{}' (rc={})", s.step, s.rc),
        None => String::new(),
    }
}

impl ApplyError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ApplyError::WorkDir(_) | ApplyError::Staging(_) | ApplyError::Checksum { .. } => {
                ErrorCode::ProfileUploadFailed
            }
            ApplyError::Download { .. } | ApplyError::Profile(_) => {
                ErrorCode::ProfileDownloadFailed
            }
            ApplyError::Conf(e) => e.code(),
            ApplyError::InvalidFileName(_)
            | ApplyError::MissingAsset(_)
            | ApplyError::Script(_) => ErrorCode::ProfileInvalid,
            ApplyError::Upload(_) => ErrorCode::ProfileUploadTransferFailed,
            ApplyError::Remote { step, .. } => classify_step_error(step.as_ref()),
            ApplyError::Exec(_) => ErrorCode::ProfileApplyFailed,
        }
    }
}

pub struct RemotePipeline {
    session: Box<dyn RemoteSession>,
    work_dir: PathBuf,
    staging_dir: String,
}

impl RemotePipeline {
    /// `work_dir` is the local root for apply scratch space, `staging_dir`
    /// the remote directory assets are uploaded to before installation.
    pub fn new(
        session: Box<dyn RemoteSession>,
        work_dir: impl Into<PathBuf>,
        staging_dir: impl Into<String>,
    ) -> Self {
        Self {
            session,
            work_dir: work_dir.into(),
            staging_dir: staging_dir.into(),
        }
    }

    /// Patch, transfer and install `profile` (assets read from `profile_dir`)
    pub fn upload_and_apply(mut self, profile_dir: &Path, profile: &Profile) -> Result<(), ApplyError> {
        let animation = profile.active_animation();
        let sound = profile.active_sound();
        for file in animation.iter().chain(sound.iter()) {
            check_file_name(file)?;
        }
        let script = build_apply_script(&self.staging_dir, animation, sound)?;

        fs::create_dir_all(&self.work_dir).map_err(ApplyError::WorkDir)?;
        let scratch = tempfile::Builder::new()
            .prefix("upload-")
            .tempdir_in(&self.work_dir)
            .map_err(ApplyError::WorkDir)?;

        self.download_confs(scratch.path())?;
        self.reset_staging()?;

        if let Some(file) = animation {
            let patched = patched_path(&scratch, device::LCM_GUI_CONF_NAME);
            conf::patch_lcm_gui_conf(
                &scratch.path().join(device::LCM_GUI_CONF_NAME),
                &patched,
                profile,
            )?;
            self.stage_asset(&scratch, profile_dir, file, &patched)?;
        }

        if let Some(file) = sound {
            let patched = patched_path(&scratch, device::SOUNDS_LEDS_CONF_NAME);
            conf::patch_sounds_leds_conf(
                &scratch.path().join(device::SOUNDS_LEDS_CONF_NAME),
                &patched,
                profile,
            )?;
            self.stage_asset(&scratch, profile_dir, file, &patched)?;
        }

        match self.session.exec(&script) {
            Ok(output) => {
                if !output.stdout.lines().any(|l| l.trim() == "OK") {
                    warn!("[APPLY] Script exited 0 without OK marker: {}", output);
                }
                info!(
                    "[APPLY] Profile applied (welcome={}, ring={})",
                    animation.unwrap_or("-"),
                    sound.unwrap_or("-")
                );
                Ok(())
            }
            Err(SessionError::NonZeroExit { output }) => {
                let step = parse_step_error(&output.stderr);
                match &step {
                    Some(s) => error!(
                        "[APPLY] Apply failed at step '{}' with rc {}",
                        s.step, s.rc
                    ),
                    None => error!(
                        "[APPLY] Apply failed with status {} and no step marker",
                        output.exit_status
                    ),
                }
                Err(ApplyError::Remote {
                    step,
                    exit_status: output.exit_status,
                    stderr: output.stderr,
                })
            }
            Err(e) => Err(ApplyError::Exec(e)),
        }
        // `scratch` is removed here; the session closes when `self` drops
    }

    /// Download both configuration documents and the assets they reference
    /// into `dest`, then write `dest/profile.json`.
    pub fn download_and_load(mut self, dest: &Path) -> Result<Profile, ApplyError> {
        self.download_confs(dest)?;

        let mut profile = Profile::default();
        conf::read_lcm_gui_conf(&dest.join(device::LCM_GUI_CONF_NAME), &mut profile)?;
        conf::read_sounds_leds_conf(&dest.join(device::SOUNDS_LEDS_CONF_NAME), &mut profile)?;

        if !profile.welcome.file.is_empty() {
            let file = profile.welcome.file.clone();
            check_file_name(&file)?;
            let remote = format!(
                "{}/{}.{}",
                device::ANIMATION_DIR,
                file,
                device::ANIMATION_EXT
            );
            self.download(&remote, &dest.join(&file))?;
        }

        if !profile.ring_button.file.is_empty() {
            let file = profile.ring_button.file.clone();
            check_file_name(&file)?;
            let remote = format!("{}/{}", device::SOUNDS_DIR, file);
            self.download(&remote, &dest.join(&file))?;
        }

        profile.write_to_file(&dest.join(PROFILE_FILE_NAME))?;
        info!("[DOWNLOAD] Device profile saved to {}", dest.display());
        Ok(profile)
    }

    fn download(&mut self, remote: &str, local: &Path) -> Result<(), ApplyError> {
        self.session
            .download_file(remote, local)
            .map_err(|source| ApplyError::Download {
                remote: remote.to_string(),
                source,
            })
    }

    fn download_confs(&mut self, dir: &Path) -> Result<(), ApplyError> {
        self.download(device::LCM_GUI_CONF, &dir.join(device::LCM_GUI_CONF_NAME))?;
        self.download(
            device::SOUNDS_LEDS_CONF,
            &dir.join(device::SOUNDS_LEDS_CONF_NAME),
        )
    }

    fn reset_staging(&mut self) -> Result<(), ApplyError> {
        let dir = self.staging_dir.trim_end_matches('/').to_string();
        self.session
            .exec(&format!("rm -rf '{dir}'"))
            .map_err(ApplyError::Staging)?;
        self.session
            .exec(&format!("mkdir -p '{dir}'"))
            .map_err(ApplyError::Staging)?;
        debug!("[APPLY] Staging directory {} reset", dir);
        Ok(())
    }

    /// Upload the asset, its `.md5` sidecar and the patched document
    fn stage_asset(
        &mut self,
        scratch: &TempDir,
        profile_dir: &Path,
        file: &str,
        patched_conf: &Path,
    ) -> Result<(), ApplyError> {
        let asset = profile_dir.join(file);
        if !asset.is_file() {
            return Err(ApplyError::MissingAsset(asset));
        }

        let digest = md5_hex(&asset).map_err(|source| ApplyError::Checksum {
            path: asset.clone(),
            source,
        })?;
        let sidecar = scratch.path().join(format!("{file}.md5"));
        fs::write(&sidecar, &digest).map_err(|source| ApplyError::Checksum {
            path: sidecar.clone(),
            source,
        })?;
        debug!("[APPLY] {} md5={}", file, digest);

        for local in [asset.as_path(), sidecar.as_path(), patched_conf] {
            self.session
                .upload_file(local, &self.staging_dir, STAGED_FILE_MODE)
                .map_err(ApplyError::Upload)?;
        }
        Ok(())
    }
}

impl Drop for RemotePipeline {
    fn drop(&mut self) {
        self.session.close();
    }
}

fn patched_path(scratch: &TempDir, conf_name: &str) -> PathBuf {
    scratch
        .path()
        .join(format!("{conf_name}{}", device::PATCHED_SUFFIX))
}

/// Asset names are single path components
fn check_file_name(file: &str) -> Result<(), ApplyError> {
    if file.is_empty() || file == "." || file == ".." || file.contains(['/', '\\']) {
        return Err(ApplyError::InvalidFileName(file.to_string()));
    }
    Ok(())
}

fn md5_hex(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
