//! Preset command handler

use tracing::info;

use super::{apply_profile_dir, busy, finish, payload_text, record_applied, Failure, HandlerContext};
use crate::command::CommandResult;
use crate::status::Activity;

/// Apply the preset whose display name is the payload
pub fn handle_preset_set(ctx: &HandlerContext, payload: &[u8]) -> CommandResult {
    let Some(name) = payload_text(payload) else {
        return CommandResult::Rejected {
            message: "empty preset name".into(),
        };
    };

    ctx.reporter.preset_selected(&name);

    let _activity = match ctx.reporter.begin(Activity::Upload) {
        Ok(guard) => guard,
        Err(e) => return busy(e),
    };

    let result = apply_preset(ctx, &name);
    finish(ctx, result)
}

fn apply_preset(ctx: &HandlerContext, name: &str) -> Result<String, Failure> {
    let dir = ctx.repository.resolve_preset(name)?;
    let display_name = ctx
        .repository
        .presets()
        .find(name)
        .map(|p| p.display_name.clone())
        .unwrap_or_else(|| name.to_string());

    info!("[PRESETS] Applying '{}' from {}", display_name, dir.display());
    apply_profile_dir(ctx, &dir)?;
    record_applied(ctx, &display_name, true);

    Ok(format!("preset '{display_name}' applied"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::handlers::testing::harness;
    use crate::transport::traits::fake::ScriptOutcome;

    #[test]
    fn test_applies_preset_case_insensitively() {
        let h = harness(|_| {});

        let result = handle_preset_set(&h.ctx, b" christmas ");

        assert!(matches!(result, CommandResult::Completed { .. }), "{result:?}");
        assert_eq!(h.publisher.payloads("/preset/selected"), vec!["christmas"]);
        assert_eq!(h.publisher.payloads("/active_profile"), vec!["Christmas"]);
        assert_eq!(h.statuses(), vec!["Uploading", "Idle"]);
        assert!(h.errors().is_empty());

        let record = h.ctx.repository.read_last_applied().unwrap();
        assert_eq!(record.profile_name, "Christmas");
        assert!(record.is_preset);

        let staged = h.device.path().join("tmp/doorbell-mqtt-unifi");
        assert!(staged.join("xmas.md5").is_file());
        assert_eq!(h.log.lock().unwrap().closed, 1);
    }

    #[test]
    fn test_unknown_preset_reports_not_found() {
        let h = harness(|_| {});

        let result = handle_preset_set(&h.ctx, b"Easter");

        assert!(matches!(result, CommandResult::Failed { .. }));
        let errors = h.errors();
        assert_eq!(errors[0]["code"], 200);
        assert_eq!(errors[0]["name"], "ERROR_PROFILE_NOT_FOUND");
        assert_eq!(h.statuses(), vec!["Uploading", "Idle"]);
        assert!(h.log.lock().unwrap().commands.is_empty());
    }

    #[test]
    fn test_empty_payload_rejected() {
        let h = harness(|_| {});

        let result = handle_preset_set(&h.ctx, b"  ");

        assert!(matches!(result, CommandResult::Rejected { .. }));
        assert!(h.publisher.take().is_empty());
    }

    #[test]
    fn test_remote_step_failure_is_classified() {
        let h = harness(|c| {
            c.script = ScriptOutcome::Fail {
                status: 28,
                stderr: "ERROR step=move_snd rc=28\n".into(),
            }
        });

        let result = handle_preset_set(&h.ctx, b"Christmas");

        assert!(matches!(result, CommandResult::Failed { .. }));
        assert_eq!(h.errors()[0]["name"], "ERROR_REMOTE_DISK_FULL");
        assert!(h.publisher.payloads("/active_profile").is_empty());
        assert!(h.ctx.repository.read_last_applied().is_err());
        assert_eq!(h.statuses().last().map(String::as_str), Some("Idle"));
    }

    #[test]
    fn test_connect_failure() {
        let h = harness(|c| c.refuse = true);

        handle_preset_set(&h.ctx, b"Christmas");

        assert_eq!(h.errors()[0]["name"], "ERROR_SSH_CONNECT_FAILED");
        assert_eq!(h.statuses(), vec!["Uploading", "Idle"]);
    }
}
