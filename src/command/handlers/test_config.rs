//! Test command handler: applies the bundled test profile

use super::{apply_profile_dir, busy, finish, record_applied, Failure, HandlerContext};
use crate::command::CommandResult;
use crate::status::Activity;

/// Active profile name shown after a test apply
pub const TEST_PROFILE_NAME: &str = "Test";

pub fn handle_test_config(ctx: &HandlerContext, _payload: &[u8]) -> CommandResult {
    let _activity = match ctx.reporter.begin(Activity::Upload) {
        Ok(guard) => guard,
        Err(e) => return busy(e),
    };

    let result = apply_test_profile(ctx);
    finish(ctx, result)
}

fn apply_test_profile(ctx: &HandlerContext) -> Result<String, Failure> {
    apply_profile_dir(ctx, &ctx.paths.test_profile_dir)?;
    record_applied(ctx, TEST_PROFILE_NAME, false);
    Ok("test profile applied".into())
}
