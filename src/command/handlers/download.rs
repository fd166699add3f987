//! Asset download handler
//!
//! Pulls the device's current welcome animation and ring sound into a private
//! temp directory, then publishes it under `downloads/` or, on any failure,
//! `partial/`.

use std::path::Path;
use tracing::{error, info};

use super::{busy, finish, Failure, HandlerContext};
use crate::command::CommandResult;
use crate::device::RemotePipeline;
use crate::protocol::Profile;
use crate::status::Activity;

pub fn handle_download_assets(ctx: &HandlerContext, _payload: &[u8]) -> CommandResult {
    let _activity = match ctx.reporter.begin(Activity::Download) {
        Ok(guard) => guard,
        Err(e) => return busy(e),
    };

    let result = download(ctx);
    finish(ctx, result)
}

fn fetch(ctx: &HandlerContext, dest: &Path) -> Result<Profile, Failure> {
    let session = ctx.connector.open()?;
    let profile =
        RemotePipeline::new(session, &ctx.paths.work_dir, &ctx.paths.remote_staging_dir)
            .download_and_load(dest)?;
    Ok(profile)
}

fn download(ctx: &HandlerContext) -> Result<String, Failure> {
    let temp = ctx.repository.create_temp_download_dir()?;
    let fetched = fetch(ctx, &temp);

    let partial = fetched.is_err();

    let committed = match ctx.repository.commit_temp_download_dir(&temp, partial) {
        Ok(committed) => Ok(committed),
        Err(e) if !partial => {
            error!("[DOWNLOAD] Commit failed, keeping as partial: {}", e);
            match ctx.repository.commit_temp_download_dir(&temp, true) {
                Ok(kept) => ctx.reporter.download_committed(&kept),
                Err(kept_err) => error!(
                    "[DOWNLOAD] Could not keep partial download, left at {}: {}",
                    temp.display(),
                    kept_err
                ),
            }
            Err(Failure::from(e))
        }
        Err(e) => {
            error!("[DOWNLOAD] Could not keep partial download: {}", e);
            Err(Failure::from(e))
        }
    };
    if let Ok(committed) = &committed {
        ctx.reporter.download_committed(committed);
    }

    // A fetch failure outranks a failure to keep its leftovers
    let profile = fetched?;
    let committed = committed?;
    ctx.reporter.clear_error();

    info!(
        "[DOWNLOAD] Saved to {} (welcome={}, ring={})",
        committed.path.display(),
        profile.welcome.file,
        profile.ring_button.file
    );
    Ok(format!("assets downloaded to {}", committed.path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::handlers::testing::harness;
    use crate::protocol::PROFILE_FILE_NAME;
    use crate::transport::traits::fake::seed_device;
    use serde_json::json;
    use std::fs;

    fn seed_assets(device: &Path) {
        seed_device(
            device,
            &json!({"customAnimations": [
                {"guiId": "WELCOME", "file": "pumpkin", "enable": true, "count": 3}
            ]})
            .to_string(),
            &json!({"customSounds": [
                {"soundStateName": "RING_BUTTON_PRESSED", "file": "creak.wav", "enable": true}
            ]})
            .to_string(),
        );
        let persist = device.join("etc/persistent");
        fs::write(persist.join("lcm/animation/pumpkin.anim"), b"A").unwrap();
        fs::write(persist.join("sounds/creak.wav"), b"S").unwrap();
    }

    fn only_entry(dir: &Path) -> std::path::PathBuf {
        let entries: Vec<_> = fs::read_dir(dir).unwrap().map(|e| e.unwrap().path()).collect();
        assert_eq!(entries.len(), 1, "{entries:?}");
        entries.into_iter().next().unwrap()
    }

    #[test]
    fn test_download_commits_under_downloads() {
        let h = harness(|_| {});
        seed_assets(h.device.path());

        let result = handle_download_assets(&h.ctx, b"PRESS");

        assert!(matches!(result, CommandResult::Completed { .. }), "{result:?}");
        let committed = only_entry(&h.base.path().join("downloads"));
        assert!(committed.join(PROFILE_FILE_NAME).is_file());
        assert_eq!(fs::read(committed.join("pumpkin")).unwrap(), b"A");
        assert!(!h.base.path().join("partial").exists());
        assert_eq!(fs::read_dir(h.base.path().join("tmp")).unwrap().count(), 0);

        assert_eq!(
            h.publisher.payloads("/download/last_path"),
            vec![committed.display().to_string()]
        );
        let attributes: serde_json::Value =
            serde_json::from_str(&h.publisher.payloads("/download/attributes")[0]).unwrap();
        assert_eq!(attributes["partial"], false);
        assert_eq!(h.statuses(), vec!["Downloading", "Idle"]);
    }

    #[test]
    fn test_failed_download_lands_under_partial() {
        let h = harness(|_| {});
        // Conf references an animation the device does not have
        seed_device(
            h.device.path(),
            &json!({"customAnimations": [{"guiId": "WELCOME", "file": "gone"}]}).to_string(),
            "{}",
        );

        let result = handle_download_assets(&h.ctx, b"PRESS");

        assert!(matches!(result, CommandResult::Failed { .. }));
        let partial = only_entry(&h.base.path().join("partial"));
        assert!(partial.join("ubnt_lcm_gui.conf").is_file());
        assert!(!h.base.path().join("downloads").exists());

        assert_eq!(
            h.publisher.payloads("/download/last_path"),
            vec![partial.display().to_string()]
        );
        assert_eq!(h.errors()[0]["name"], "ERROR_PROFILE_DOWNLOAD_FAILED");
        assert_eq!(h.statuses(), vec!["Downloading", "Idle"]);
    }

    #[test]
    fn test_commit_failure_after_fetch_lands_under_partial() {
        let h = harness(|_| {});
        seed_assets(h.device.path());
        // A plain file where the downloads root should be
        fs::write(h.base.path().join("downloads"), b"not a directory").unwrap();

        let result = handle_download_assets(&h.ctx, b"PRESS");

        assert!(matches!(result, CommandResult::Failed { .. }), "{result:?}");
        let partial = only_entry(&h.base.path().join("partial"));
        assert!(partial.join(PROFILE_FILE_NAME).is_file());
        assert_eq!(fs::read(partial.join("pumpkin")).unwrap(), b"A");
        assert_eq!(fs::read_dir(h.base.path().join("tmp")).unwrap().count(), 0);

        assert_eq!(
            h.publisher.payloads("/download/last_path"),
            vec![partial.display().to_string()]
        );
        let attributes: serde_json::Value =
            serde_json::from_str(&h.publisher.payloads("/download/attributes")[0]).unwrap();
        assert_eq!(attributes["partial"], true);
        assert_eq!(h.errors()[0]["name"], "ERROR_PROFILE_DOWNLOAD_FAILED");
        assert_eq!(h.statuses(), vec!["Downloading", "Idle"]);
    }

    #[test]
    fn test_connect_failure_still_reports_partial_path() {
        let h = harness(|c| c.refuse = true);

        handle_download_assets(&h.ctx, b"PRESS");

        only_entry(&h.base.path().join("partial"));
        assert_eq!(h.publisher.payloads("/download/last_path").len(), 1);
        assert_eq!(h.errors()[0]["name"], "ERROR_SSH_CONNECT_FAILED");
    }
}
