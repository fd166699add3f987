//! Command handlers, one per user-facing command
//!
//! Handlers run on the router's worker thread. Every failure is published on
//! `last_error` with its code and turned into [`CommandResult::Failed`];
//! nothing propagates back to the router.

mod custom;
mod download;
mod preset;
mod test_config;

pub use custom::handle_apply_custom;
pub use download::handle_download_assets;
pub use preset::handle_preset_set;
pub use test_config::handle_test_config;

use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use super::CommandResult;
use crate::config::PathsConfig;
use crate::connection::PublishMode;
use crate::device::{ApplyError, RemotePipeline};
use crate::profiles::{ProfileRepository, RepoError};
use crate::protocol::{ErrorCode, Profile, ProfileError};
use crate::status::StatusReporter;
use crate::transport::{SessionConnector, SessionError};

/// Capabilities shared by all handlers
#[derive(Clone)]
pub struct HandlerContext {
    pub reporter: Arc<StatusReporter>,
    pub repository: Arc<ProfileRepository>,
    pub connector: Arc<dyn SessionConnector>,
    pub paths: PathsConfig,
}

/// A coded failure, published as-is on `last_error`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub code: ErrorCode,
    pub message: String,
}

impl Failure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

macro_rules! coded_failure {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Failure {
            fn from(err: $ty) -> Self {
                Failure::new(err.code(), err.to_string())
            }
        })*
    };
}

coded_failure!(RepoError, ProfileError, SessionError, ApplyError);

/// Trimmed UTF-8 payload, or `None` if blank
fn payload_text(payload: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(payload);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn busy(err: crate::status::Busy) -> CommandResult {
    CommandResult::Rejected {
        message: err.to_string(),
    }
}

/// Load `profile.json` from `dir` and push it to the device
fn apply_profile_dir(ctx: &HandlerContext, dir: &Path) -> Result<Profile, Failure> {
    let profile = Profile::load_from_dir(dir)?;
    let session = ctx.connector.open()?;
    RemotePipeline::new(session, &ctx.paths.work_dir, &ctx.paths.remote_staging_dir)
        .upload_and_apply(dir, &profile)?;
    Ok(profile)
}

/// Publish a successful apply and persist it as the last applied profile.
///
/// A failed write leaves the device applied; it is reported but does not
/// fail the command.
fn record_applied(ctx: &HandlerContext, name: &str, is_preset: bool) {
    ctx.reporter.clear_error();

    match ctx.repository.write_last_applied(name, is_preset) {
        Ok(record) => ctx.reporter.last_applied(&record, PublishMode::Wait),
        Err(e) => {
            let code = ErrorCode::StatePersistFailed;
            warn!(
                code = code.code(),
                name = code.name(),
                "[REPO] Applied '{}' but could not persist it: {}",
                name,
                e
            );
            ctx.reporter.active_profile(name);
            ctx.reporter.set_error(code, &e.to_string());
        }
    }
}

/// Publish the failure, if any, and convert to a [`CommandResult`]
fn finish(ctx: &HandlerContext, result: Result<String, Failure>) -> CommandResult {
    match result {
        Ok(message) => CommandResult::Completed { message },
        Err(failure) => {
            ctx.reporter.set_error(failure.code, &failure.message);
            CommandResult::Failed {
                message: failure.message,
            }
        }
    }
}
