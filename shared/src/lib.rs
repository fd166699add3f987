//! Doorbell bridge shared types
//!
//! This crate provides the profile model, the stable error code table, the
//! remote script codec and the apply state machine used by the bridge daemon.

pub mod errors;
pub mod profile;
pub mod script;
pub mod state_machine;

use std::time::{SystemTime, UNIX_EPOCH};

pub use errors::ErrorCode;
pub use profile::{Profile, ProfileError, RingButton, Welcome};
pub use script::{ScriptError, StepError};
pub use state_machine::{PipelineEvent, PipelineState, PipelineStateMachine, TransitionResult};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Local timestamp used to name committed download directories ("YYYYMMDD-HHMMSS")
pub fn download_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// Fixed locations on the doorbell filesystem
pub mod device {
    /// Persistent configuration root
    pub const PERSIST_DIR: &str = "/etc/persistent";

    /// LCM GUI configuration (welcome animation)
    pub const LCM_GUI_CONF: &str = "/etc/persistent/ubnt_lcm_gui.conf";

    /// Sounds & LEDs configuration (ring button sound)
    pub const SOUNDS_LEDS_CONF: &str = "/etc/persistent/ubnt_sounds_leds.conf";

    /// Animation asset directory
    pub const ANIMATION_DIR: &str = "/etc/persistent/lcm/animation";

    /// Sound asset directory
    pub const SOUNDS_DIR: &str = "/etc/persistent/sounds";

    /// File name of the LCM GUI configuration document
    pub const LCM_GUI_CONF_NAME: &str = "ubnt_lcm_gui.conf";

    /// File name of the Sounds & LEDs configuration document
    pub const SOUNDS_LEDS_CONF_NAME: &str = "ubnt_sounds_leds.conf";

    /// Suffix appended to a patched configuration document before upload
    pub const PATCHED_SUFFIX: &str = ".patched";

    /// Extension the device expects on installed animations
    pub const ANIMATION_EXT: &str = "anim";

    /// Processes that consume the configuration documents
    pub const LCM_GUI_PROCESS: &str = "ubnt_lcm_gui";
    pub const SOUNDS_LEDS_PROCESS: &str = "ubnt_sounds_leds";

    /// Entry identifiers patched inside the configuration documents
    pub const WELCOME_GUI_ID: &str = "WELCOME";
    pub const RING_BUTTON_STATE: &str = "RING_BUTTON_PRESSED";
}

/// Limits for the inbound command path
pub mod limits {
    /// Capacity of the inbound command queue
    pub const INBOUND_QUEUE_CAPACITY: usize = 64;

    /// Maximum number of command routes
    pub const MAX_ROUTES: usize = 16;

    /// Poll interval used by the remote restart step, in seconds
    pub const RESTART_POLL_INTERVAL: &str = "0.2";

    /// Poll attempts while waiting for services to stop (0.2s * 25 = 5s)
    pub const RESTART_STOP_POLLS: u32 = 25;

    /// Poll attempts while waiting for services to come back (0.2s * 50 = 10s)
    pub const RESTART_START_POLLS: u32 = 50;

    /// Exit code of the restart step when services did not stop
    pub const RESTART_STOP_TIMEOUT_RC: i32 = 210;

    /// Exit code of the restart step when services did not come back
    pub const RESTART_START_TIMEOUT_RC: i32 = 211;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_timestamp_format() {
        let ts = download_timestamp();
        assert_eq!(ts.len(), 15);
        assert_eq!(&ts[8..9], "-");
        assert!(ts.chars().filter(|c| *c != '-').all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_now_ms_is_positive() {
        assert!(now_ms() > 0);
    }
}
