//! Custom profile command handler

use tracing::info;

use super::{apply_profile_dir, busy, finish, payload_text, record_applied, Failure, HandlerContext};
use crate::command::CommandResult;
use crate::status::Activity;

/// Apply the profile in `<profiles>/<payload>`
pub fn handle_apply_custom(ctx: &HandlerContext, payload: &[u8]) -> CommandResult {
    let Some(relative) = payload_text(payload) else {
        return CommandResult::Rejected {
            message: "empty custom directory".into(),
        };
    };

    ctx.reporter.custom_directory(&relative);

    let _activity = match ctx.reporter.begin(Activity::Upload) {
        Ok(guard) => guard,
        Err(e) => return busy(e),
    };

    let result = apply_custom(ctx, &relative);
    finish(ctx, result)
}

fn apply_custom(ctx: &HandlerContext, relative: &str) -> Result<String, Failure> {
    let dir = ctx.repository.resolve_custom(relative)?;

    info!("[APPLY] Applying custom profile {}", dir.display());
    apply_profile_dir(ctx, &dir)?;
    record_applied(ctx, relative, false);

    Ok(format!("custom profile '{relative}' applied"))
}
