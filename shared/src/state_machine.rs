//! Apply Pipeline State Machine
//!
//! At most one remote operation is in flight: `Idle -> Uploading -> Idle` or
//! `Idle -> Downloading -> Idle`.

use std::fmt;

/// Pipeline activity, published verbatim on the status topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Uploading,
    Downloading,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::Uploading => "Uploading",
            PipelineState::Downloading => "Downloading",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A profile upload and apply started
    UploadStarted,
    /// A download of the device's current assets started
    DownloadStarted,
    /// The in-flight operation ended, successfully or not
    Finished,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(PipelineState),
    /// Transition was invalid from current state
    Invalid {
        from: PipelineState,
        event: PipelineEvent,
    },
}

impl TransitionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TransitionResult::Success(_))
    }
}

#[derive(Debug)]
pub struct PipelineStateMachine {
    current_state: PipelineState,
    entered_at_ms: u64,
}

impl Default for PipelineStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStateMachine {
    /// Create a new state machine in Idle state
    pub fn new() -> Self {
        Self {
            current_state: PipelineState::Idle,
            entered_at_ms: crate::now_ms(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.current_state
    }

    /// Milliseconds spent in the current state
    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.entered_at_ms)
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: PipelineEvent) -> TransitionResult {
        match self.next_state(event) {
            Some(state) => {
                self.current_state = state;
                self.entered_at_ms = crate::now_ms();
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    fn next_state(&self, event: PipelineEvent) -> Option<PipelineState> {
        use PipelineEvent::*;
        use PipelineState::*;

        match (self.current_state, event) {
            (Idle, UploadStarted) => Some(Uploading),
            (Idle, DownloadStarted) => Some(Downloading),
            (Uploading | Downloading, Finished) => Some(Idle),
            // Finishing while idle is harmless and keeps cleanup paths simple
            (Idle, Finished) => Some(Idle),
            _ => None,
        }
    }
}
