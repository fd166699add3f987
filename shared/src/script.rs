//! Step-coded remote apply script
//!
//! The apply script runs on the device under `sh`. Every side effect is
//! wrapped in `run <step> <command...>`; on failure the script prints
//!
//! ```text
//! ERROR step=<step> rc=<rc>
//! ```
//!
//! to stderr and exits with `rc`. On success the final line of stdout is `OK`.

use std::fmt::Write as _;
use thiserror::Error;

use crate::device::{
    ANIMATION_DIR, ANIMATION_EXT, LCM_GUI_CONF_NAME, LCM_GUI_PROCESS, PATCHED_SUFFIX,
    PERSIST_DIR, SOUNDS_DIR, SOUNDS_LEDS_CONF_NAME, SOUNDS_LEDS_PROCESS,
};
use crate::errors::ErrorCode;
use crate::limits::{
    RESTART_POLL_INTERVAL, RESTART_START_POLLS, RESTART_START_TIMEOUT_RC, RESTART_STOP_POLLS,
    RESTART_STOP_TIMEOUT_RC,
};

/// Marker that prefixes a step failure on stderr
pub const STEP_ERROR_MARKER: &str = "ERROR step=";

/// Line printed by a successful script
pub const SUCCESS_LINE: &str = "OK";

/// Errno-style exit codes the device shell reports
const RC_PERMISSION_DENIED: i32 = 13;
const RC_NO_SPACE: i32 = 28;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("{what} is empty")]
    Empty { what: &'static str },

    #[error("{what} contains a quote or line break: {value:?}")]
    UnsafeArgument { what: &'static str, value: String },
}

/// Step failure parsed from the script's stderr
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepError {
    pub step: String,
    pub rc: i32,
}

/// Build the apply script.
///
/// `tmp_dir` is the remote staging directory holding the uploaded assets and
/// patched configuration documents. Only the sections given as `Some` are
/// installed; services are restarted in every case.
pub fn build_apply_script(
    tmp_dir: &str,
    animation: Option<&str>,
    sound: Option<&str>,
) -> Result<String, ScriptError> {
    check_argument("staging directory", tmp_dir)?;
    if let Some(file) = animation {
        check_argument("animation file", file)?;
    }
    if let Some(file) = sound {
        check_argument("sound file", file)?;
    }

    let tmp = tmp_dir.trim_end_matches('/');
    let mut script = String::with_capacity(4096);

    script.push_str("set -eu\n");
    script.push_str("STEP=\"\"\n");
    script.push_str("fail() { rc=$1; echo \"ERROR step=$STEP rc=$rc\" 1>&2; exit $rc; }\n");
    script.push_str("run() { STEP=$1; shift; \"$@\" || fail $?; }\n");
    script.push('\n');
    let _ = writeln!(script, "PERSIST_DIR='{PERSIST_DIR}'");
    let _ = writeln!(script, "ANIM_DIR='{ANIMATION_DIR}'");
    let _ = writeln!(script, "SND_DIR='{SOUNDS_DIR}'");
    script.push_str("run ensure_dirs mkdir -p \"$ANIM_DIR\" \"$SND_DIR\"\n");

    if let Some(file) = animation {
        script.push_str("run cleanup_anim rm -f \"$ANIM_DIR\"/*\n");
        let _ = writeln!(
            script,
            "run move_anim mv -f '{tmp}/{file}' \"$ANIM_DIR\"/'{file}.{ANIMATION_EXT}'"
        );
        let _ = writeln!(
            script,
            "run move_anim_md5 mv -f '{tmp}/{file}.md5' \"$ANIM_DIR\"/'{file}.md5'"
        );
        let _ = writeln!(
            script,
            "run move_anim_conf mv -f '{tmp}/{LCM_GUI_CONF_NAME}{PATCHED_SUFFIX}' \"$PERSIST_DIR\"/'{LCM_GUI_CONF_NAME}'"
        );
    }

    if let Some(file) = sound {
        script.push_str("run cleanup_snd rm -f \"$SND_DIR\"/*\n");
        let _ = writeln!(
            script,
            "run move_snd mv -f '{tmp}/{file}' \"$SND_DIR\"/'{file}'"
        );
        let _ = writeln!(
            script,
            "run move_snd_md5 mv -f '{tmp}/{file}.md5' \"$SND_DIR\"/'{file}.md5'"
        );
        let _ = writeln!(
            script,
            "run move_snd_conf mv -f '{tmp}/{SOUNDS_LEDS_CONF_NAME}{PATCHED_SUFFIX}' \"$PERSIST_DIR\"/'{SOUNDS_LEDS_CONF_NAME}'"
        );
    }

    script.push_str(&restart_step());

    Ok(script)
}

/// The `restart` step: stop both consumers, wait for them to exit, then wait
/// for the supervisor to respawn them.
fn restart_step() -> String {
    let gui = LCM_GUI_PROCESS;
    let snd = SOUNDS_LEDS_PROCESS;
    let poll = RESTART_POLL_INTERVAL;

    let mut step = String::new();
    step.push_str("run restart sh -c '\n");
    step.push_str("  has_proc() { pidof \"$1\" >/dev/null 2>&1; }\n");
    step.push_str(
        "  kill_ok() { killall \"$1\" >/dev/null 2>&1; rc=$?; [ $rc -eq 0 -o $rc -eq 1 ] || exit $rc; }\n",
    );
    step.push('\n');
    step.push_str("  wait_both_gone() {\n");
    step.push_str("    t=$1; while [ $t -gt 0 ]; do\n");
    let _ = writeln!(
        step,
        "      if ! has_proc {gui} && ! has_proc {snd}; then return 0; fi"
    );
    let _ = writeln!(step, "      sleep {poll}; t=$((t-1));");
    step.push_str("    done; return 1;\n");
    step.push_str("  }\n");
    step.push('\n');
    step.push_str("  wait_both_back() {\n");
    step.push_str("    t=$1; while [ $t -gt 0 ]; do\n");
    let _ = writeln!(
        step,
        "      if has_proc {gui} && has_proc {snd}; then return 0; fi"
    );
    let _ = writeln!(step, "      sleep {poll}; t=$((t-1));");
    step.push_str("    done; return 1;\n");
    step.push_str("  }\n");
    step.push('\n');
    let _ = writeln!(step, "  kill_ok {gui}");
    let _ = writeln!(step, "  kill_ok {snd}");
    step.push('\n');
    let _ = writeln!(
        step,
        "  wait_both_gone {RESTART_STOP_POLLS} || exit {RESTART_STOP_TIMEOUT_RC}"
    );
    let _ = writeln!(
        step,
        "  wait_both_back {RESTART_START_POLLS} || exit {RESTART_START_TIMEOUT_RC}"
    );
    let _ = writeln!(step, "  echo \"{SUCCESS_LINE}\"");
    step.push_str("'\n");
    step
}

fn check_argument(what: &'static str, value: &str) -> Result<(), ScriptError> {
    if value.is_empty() {
        return Err(ScriptError::Empty { what });
    }
    if value.contains(['\'', '\n', '\r']) {
        return Err(ScriptError::UnsafeArgument {
            what,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Parse the last `ERROR step=<step> rc=<rc>` marker in `stderr`
pub fn parse_step_error(stderr: &str) -> Option<StepError> {
    stderr.lines().rev().find_map(parse_marker_line)
}

fn parse_marker_line(line: &str) -> Option<StepError> {
    let start = line.find(STEP_ERROR_MARKER)?;
    let rest = &line[start + STEP_ERROR_MARKER.len()..];

    let mut parts = rest.split_whitespace();
    let step = parts.next()?;
    let rc = parts.next()?.strip_prefix("rc=")?.parse::<i32>().ok()?;

    if step.is_empty() {
        return None;
    }

    Some(StepError {
        step: step.to_string(),
        rc,
    })
}

/// Classify a failed apply into its published error code
pub fn classify_step_error(error: Option<&StepError>) -> ErrorCode {
    let Some(error) = error else {
        return ErrorCode::ProfileApplyFailed;
    };

    match error.rc {
        RC_PERMISSION_DENIED => return ErrorCode::ProfileApplyPermissionDenied,
        RC_NO_SPACE => return ErrorCode::RemoteDiskFull,
        _ => {}
    }

    if error.step.starts_with("move_") {
        ErrorCode::ProfileApplyFileOperationFailed
    } else if error.step.starts_with("verify_") {
        ErrorCode::ProfileApplyVerifyFailed
    } else if error.step == "restart" {
        ErrorCode::ProfileApplyRestartFailed
    } else {
        ErrorCode::ProfileApplyFailed
    }
}
