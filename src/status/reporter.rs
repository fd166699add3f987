//! Status Reporter
//!
//! Owns the pipeline state machine and publishes every state change, coded
//! error and display value to the bus. All topics are retained.

use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::connection::topics::{self, Topics, AVAILABILITY_ONLINE};
use crate::connection::{BusPublisher, PublishMode};
use crate::profiles::{CommittedDownload, LastAppliedProfile};
use crate::protocol::{ErrorCode, PipelineEvent, PipelineState, PipelineStateMachine, TransitionResult};

/// Status published once the bus connection is up
pub const STATUS_ONLINE: &str = "Online";

/// Remote operation a command is about to start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Upload,
    Download,
}

impl Activity {
    fn event(self) -> PipelineEvent {
        match self {
            Activity::Upload => PipelineEvent::UploadStarted,
            Activity::Download => PipelineEvent::DownloadStarted,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("another operation is in progress ({state})")]
pub struct Busy {
    pub state: PipelineState,
}

pub struct StatusReporter {
    publisher: Arc<dyn BusPublisher>,
    topics: Topics,
    fsm: Mutex<PipelineStateMachine>,
    last_error: Mutex<Option<(ErrorCode, String)>>,
}

/// Keeps the pipeline busy; publishes `Idle` when dropped
#[must_use = "the activity ends when the guard is dropped"]
pub struct ActivityGuard<'a> {
    reporter: &'a StatusReporter,
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.reporter.finish();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StatusReporter {
    pub fn new(publisher: Arc<dyn BusPublisher>, topics: Topics) -> Self {
        Self {
            publisher,
            topics,
            fsm: Mutex::new(PipelineStateMachine::new()),
            last_error: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PipelineState {
        lock(&self.fsm).state()
    }

    /// Enter `Uploading` or `Downloading`, or fail if already busy
    pub fn begin(&self, activity: Activity) -> Result<ActivityGuard<'_>, Busy> {
        let result = lock(&self.fsm).process_event(activity.event());
        match result {
            TransitionResult::Success(state) => {
                info!("[STATUS] {}", state);
                self.publish_text(topics::STATUS, state.as_str(), PublishMode::Wait);
                Ok(ActivityGuard { reporter: self })
            }
            TransitionResult::Invalid { from, event } => {
                warn!("[STATUS] Rejected {:?} while {}", event, from);
                Err(Busy { state: from })
            }
        }
    }

    fn finish(&self) {
        let mut fsm = lock(&self.fsm);
        let from = fsm.state();
        let elapsed = fsm.elapsed_ms(crate::protocol::now_ms());
        fsm.process_event(PipelineEvent::Finished);
        drop(fsm);

        info!("[STATUS] {} -> Idle after {} ms", from, elapsed);
        self.publish_text(topics::STATUS, PipelineState::Idle.as_str(), PublishMode::Wait);
    }

    /// Availability `online`, status `Online`. Called from the network task.
    pub fn announce_online(&self) {
        self.publish_text(topics::AVAILABILITY, AVAILABILITY_ONLINE, PublishMode::NoWait);
        self.publish_text(topics::STATUS, STATUS_ONLINE, PublishMode::NoWait);
    }

    /// Publish a coded error on `last_error`.
    ///
    /// An empty `message` falls back to the code's default message. The error
    /// is logged only when it differs from the previous one.
    pub fn set_error(&self, code: ErrorCode, message: &str) {
        let message = if message.is_empty() {
            code.default_message().to_string()
        } else {
            message.to_string()
        };

        {
            let mut last = lock(&self.last_error);
            let changed = last
                .as_ref()
                .map_or(true, |(c, m)| *c != code || *m != message);
            if changed {
                error!(code = code.code(), name = code.name(), "{}", message);
                *last = Some((code, message.clone()));
            }
        }

        let payload = json!({
            "code": code.code(),
            "name": code.name(),
            "message": message,
        });
        self.publish_json(topics::LAST_ERROR, &payload, PublishMode::Wait);
    }

    /// Publish `ERROR_NONE` if an error is currently shown
    pub fn clear_error(&self) {
        if lock(&self.last_error).take().is_none() {
            return;
        }
        let code = ErrorCode::None;
        let payload = json!({
            "code": code.code(),
            "name": code.name(),
            "message": code.default_message(),
        });
        self.publish_json(topics::LAST_ERROR, &payload, PublishMode::Wait);
    }

    pub fn active_profile(&self, name: &str) {
        self.publish_text(topics::ACTIVE_PROFILE, name, PublishMode::Wait);
    }

    pub fn preset_selected(&self, name: &str) {
        self.publish_text(topics::PRESET_SELECTED, name, PublishMode::Wait);
    }

    pub fn custom_directory(&self, dir: &str) {
        self.publish_text(topics::CUSTOM_DIRECTORY, dir, PublishMode::Wait);
    }

    /// `active_profile` plus the `last_applied` record
    pub fn last_applied(&self, record: &LastAppliedProfile, mode: PublishMode) {
        self.publish_text(topics::ACTIVE_PROFILE, &record.profile_name, mode);
        match serde_json::to_value(record) {
            Ok(payload) => self.publish_json(topics::LAST_APPLIED, &payload, mode),
            Err(e) => warn!("[STATUS] Cannot serialize last applied record: {}", e),
        }
    }

    pub fn download_committed(&self, download: &CommittedDownload) {
        let path = download.path.display().to_string();
        self.publish_text(topics::DOWNLOAD_LAST_PATH, &path, PublishMode::Wait);
        self.publish_text(
            topics::DOWNLOAD_LAST_TIMESTAMP,
            &download.timestamp,
            PublishMode::Wait,
        );
        let attributes = json!({
            "path": path,
            "partial": download.partial,
            "timestamp": download.timestamp,
        });
        self.publish_json(topics::DOWNLOAD_ATTRIBUTES, &attributes, PublishMode::Wait);
    }

    fn publish_json(&self, suffix: &str, payload: &serde_json::Value, mode: PublishMode) {
        self.publish_text(suffix, &payload.to_string(), mode);
    }

    fn publish_text(&self, suffix: &str, payload: &str, mode: PublishMode) {
        let topic = self.topics.topic(suffix);
        match self.publisher.publish(&topic, payload.as_bytes(), true, mode) {
            Ok(()) => debug!("[STATUS] {} = {}", topic, payload),
            Err(e) => warn!("[STATUS] {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::publisher::recording::RecordingPublisher;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    fn reporter() -> (Arc<RecordingPublisher>, StatusReporter) {
        let publisher = Arc::new(RecordingPublisher::default());
        let reporter = StatusReporter::new(publisher.clone(), Topics::new("cht", "default"));
        (publisher, reporter)
    }

    #[test]
    fn test_guard_publishes_idle_on_drop() {
        let (publisher, reporter) = reporter();

        {
            let _guard = reporter.begin(Activity::Upload).unwrap();
            assert_eq!(reporter.state(), PipelineState::Uploading);
        }

        assert_eq!(reporter.state(), PipelineState::Idle);
        assert_eq!(publisher.payloads("/status"), vec!["Uploading", "Idle"]);
    }

    #[test]
    fn test_second_begin_is_rejected() {
        let (publisher, reporter) = reporter();

        let _guard = reporter.begin(Activity::Download).unwrap();
        let busy = reporter.begin(Activity::Upload).err().unwrap();

        assert_eq!(busy.state, PipelineState::Downloading);
        assert_eq!(publisher.payloads("/status"), vec!["Downloading"]);
    }

    #[test]
    fn test_error_payload() {
        let (publisher, reporter) = reporter();

        reporter.set_error(ErrorCode::ProfileNotFound, "");
        reporter.set_error(ErrorCode::ProfileNotFound, "");

        let errors = publisher.payloads("/last_error");
        assert_eq!(errors.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(&errors[0]).unwrap();
        assert_eq!(parsed["code"], 200);
        assert_eq!(parsed["name"], "ERROR_PROFILE_NOT_FOUND");
        assert_eq!(parsed["message"], "Profile not found");
    }

    #[test]
    fn test_clear_error_only_when_set() {
        let (publisher, reporter) = reporter();

        reporter.clear_error();
        assert!(publisher.payloads("/last_error").is_empty());

        reporter.set_error(ErrorCode::RemoteDiskFull, "no space");
        reporter.clear_error();

        let errors = publisher.payloads("/last_error");
        assert_eq!(errors.len(), 2);
        assert!(errors[1].contains("ERROR_NONE"));
    }

    #[test]
    fn test_online_uses_no_wait() {
        let (publisher, reporter) = reporter();

        reporter.announce_online();

        let published = publisher.take();
        assert_eq!(published[0].topic, "cht/doorbell-mqtt/default/availability");
        assert_eq!(published[0].payload, "online");
        assert_eq!(published[1].payload, "Online");
        assert!(published.iter().all(|p| p.mode == PublishMode::NoWait && p.retain));
    }

    #[test]
    fn test_last_applied_and_download() {
        let (publisher, reporter) = reporter();
        let record = LastAppliedProfile {
            schema_version: 1,
            profile_name: "Christmas".into(),
            is_preset: true,
            applied_at: Utc.with_ymd_and_hms(2025, 12, 1, 8, 0, 0).unwrap(),
        };

        reporter.last_applied(&record, PublishMode::Wait);
        reporter.download_committed(&CommittedDownload {
            path: PathBuf::from("/profiles/partial/20251201-080000"),
            partial: true,
            timestamp: "20251201-080000".into(),
        });

        assert_eq!(publisher.payloads("/active_profile"), vec!["Christmas"]);
        let applied: serde_json::Value =
            serde_json::from_str(&publisher.payloads("/last_applied")[0]).unwrap();
        assert_eq!(applied["profileName"], "Christmas");
        assert_eq!(applied["isPreset"], true);

        assert_eq!(
            publisher.payloads("/download/last_path"),
            vec!["/profiles/partial/20251201-080000"]
        );
        let attributes: serde_json::Value =
            serde_json::from_str(&publisher.payloads("/download/attributes")[0]).unwrap();
        assert_eq!(attributes["partial"], true);
    }
}
