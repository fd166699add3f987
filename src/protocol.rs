//! Shared doorbell types used across the daemon

pub use doorbell_shared::{
    device, download_timestamp, errors::ErrorCode, limits, now_ms,
    profile::{Profile, ProfileError, RingButton, Welcome, PROFILE_FILE_NAME},
    script::{build_apply_script, classify_step_error, parse_step_error, ScriptError, StepError},
    state_machine::{PipelineEvent, PipelineState, PipelineStateMachine, TransitionResult},
};
