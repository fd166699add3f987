//! Command executor - dispatches routed commands to their handlers

use std::time::Instant;
use tracing::{info, warn};

use super::handlers::{self, HandlerContext};
use super::kind::CommandKind;
use super::router::Execute;
use crate::protocol::ErrorCode;

/// Result of command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Command ran to completion
    Completed { message: String },
    /// Command ran and failed; the error has been published
    Failed { message: String },
    /// Command was not attempted (empty payload, pipeline busy)
    Rejected { message: String },
}

/// Runs commands on the router's worker thread
pub struct CommandExecutor {
    ctx: HandlerContext,
}

impl CommandExecutor {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }

    pub fn run(&self, kind: CommandKind, payload: &[u8]) -> CommandResult {
        let started = Instant::now();
        info!("[CMD] Executing {} ({} bytes)", kind, payload.len());

        let result = match kind {
            CommandKind::PresetSet => handlers::handle_preset_set(&self.ctx, payload),
            CommandKind::ApplyCustom => handlers::handle_apply_custom(&self.ctx, payload),
            CommandKind::TestConfig => handlers::handle_test_config(&self.ctx, payload),
            CommandKind::DownloadAssets => handlers::handle_download_assets(&self.ctx, payload),
        };

        let elapsed = started.elapsed().as_millis();
        match &result {
            CommandResult::Completed { message } => {
                info!("[CMD] {} completed in {} ms: {}", kind, elapsed, message)
            }
            CommandResult::Failed { message } => {
                warn!("[CMD] {} failed after {} ms: {}", kind, elapsed, message)
            }
            CommandResult::Rejected { message } => warn!("[CMD] {} rejected: {}", kind, message),
        }
        result
    }
}

impl Execute for CommandExecutor {
    fn execute(&self, kind: CommandKind, payload: &[u8]) {
        self.run(kind, payload);
    }

    fn panicked(&self, kind: CommandKind, detail: &str) {
        self.ctx
            .reporter
            .set_error(ErrorCode::CommandPanicked, &format!("{kind}: {detail}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::handlers::testing::harness;
    use crate::status::Activity;

    #[test]
    fn test_dispatches_by_kind() {
        let h = harness(|_| {});
        let executor = CommandExecutor::new(h.ctx.clone());

        let result = executor.run(CommandKind::TestConfig, b"PRESS");

        assert!(matches!(result, CommandResult::Completed { .. }));
        assert_eq!(h.publisher.payloads("/active_profile"), vec!["Test"]);
    }

    #[test]
    fn test_busy_pipeline_rejects() {
        let h = harness(|_| {});
        let executor = CommandExecutor::new(h.ctx.clone());
        let _guard = h.ctx.reporter.begin(Activity::Download).unwrap();

        let result = executor.run(CommandKind::PresetSet, b"Christmas");

        assert!(matches!(result, CommandResult::Rejected { .. }));
        assert!(h.log.lock().unwrap().commands.is_empty());
    }

    #[test]
    fn test_panic_is_published() {
        let h = harness(|_| {});
        let executor = CommandExecutor::new(h.ctx.clone());

        executor.panicked(CommandKind::DownloadAssets, "index out of bounds");

        let errors = h.errors();
        assert_eq!(errors[0]["code"], 500);
        assert_eq!(errors[0]["name"], "ERROR_COMMAND_PANICKED");
        assert!(errors[0]["message"]
            .as_str()
            .unwrap()
            .contains("download_assets"));
    }
}
