//! Remote session abstraction for pluggable device backends
//!
//! All session I/O is blocking and runs on the command worker thread.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::protocol::ErrorCode;

/// Captured output of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl fmt::Display for ExecOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "exit={} stdout={:?} stderr={:?}",
            self.exit_status,
            self.stdout.trim_end(),
            self.stderr.trim_end()
        )
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connect to {target} failed: {reason}")]
    Connect { target: String, reason: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("exec failed: {0}")]
    Exec(String),

    /// The command ran but exited non-zero; output is kept for diagnosis
    #[error("command exited with status {}", output.exit_status)]
    NonZeroExit { output: ExecOutput },

    #[error("transfer of {} failed: {reason}", path.display())]
    Transfer { path: PathBuf, reason: String },

    #[error("session is closed")]
    Closed,
}

impl SessionError {
    /// Map to the published error code
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::Connect { .. } => ErrorCode::SshConnectFailed,
            SessionError::Auth(_) => ErrorCode::SshAuthFailed,
            SessionError::Transfer { .. } => ErrorCode::ProfileUploadTransferFailed,
            SessionError::Exec(_) | SessionError::NonZeroExit { .. } | SessionError::Closed => {
                ErrorCode::ProfileApplyFailed
            }
        }
    }

    pub(crate) fn transfer(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        SessionError::Transfer {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// One open connection to the managed device
pub trait RemoteSession: Send {
    /// Run `command`, draining stdout and stderr before reading the exit status.
    ///
    /// A non-zero exit is returned as [`SessionError::NonZeroExit`].
    fn exec(&mut self, command: &str) -> Result<ExecOutput, SessionError>;

    /// Copy `local` into `remote_dir`, keeping its file name
    fn upload_file(&mut self, local: &Path, remote_dir: &str, mode: i32)
        -> Result<(), SessionError>;

    /// Copy `remote_path` to `local`
    fn download_file(&mut self, remote_path: &str, local: &Path) -> Result<(), SessionError>;

    /// Release the connection. Safe to call more than once.
    fn close(&mut self);
}

/// Factory for opening sessions to the device
pub trait SessionConnector: Send + Sync {
    fn open(&self) -> Result<Box<dyn RemoteSession>, SessionError>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}

#[cfg(test)]
pub(crate) mod fake {
    //! Session backed by a local directory that stands in for the device root

    use super::*;
    use std::fs;
    use std::sync::{Arc, Mutex};

    /// Shared record of what a [`FakeSession`] was asked to do
    #[derive(Debug, Default)]
    pub struct FakeLog {
        pub commands: Vec<String>,
        pub uploads: Vec<String>,
        pub closed: usize,
    }

    /// Script outcome returned for commands that look like the apply script
    #[derive(Debug, Clone)]
    pub enum ScriptOutcome {
        Ok,
        Fail { status: i32, stderr: String },
    }

    pub struct FakeSession {
        root: PathBuf,
        log: Arc<Mutex<FakeLog>>,
        script: ScriptOutcome,
        fail_upload: bool,
        open: bool,
    }

    impl FakeSession {
        fn remote(&self, path: &str) -> PathBuf {
            self.root.join(path.trim_start_matches('/'))
        }
    }

    impl RemoteSession for FakeSession {
        fn exec(&mut self, command: &str) -> Result<ExecOutput, SessionError> {
            if !self.open {
                return Err(SessionError::Closed);
            }
            self.log.lock().unwrap().commands.push(command.to_string());

            if command.starts_with("set -eu") {
                return match &self.script {
                    ScriptOutcome::Ok => Ok(ExecOutput {
                        stdout: "OK\n".into(),
                        ..Default::default()
                    }),
                    ScriptOutcome::Fail { status, stderr } => Err(SessionError::NonZeroExit {
                        output: ExecOutput {
                            stdout: String::new(),
                            stderr: stderr.clone(),
                            exit_status: *status,
                        },
                    }),
                };
            }
            if let Some(dir) = command.strip_prefix("rm -rf ") {
                let _ = fs::remove_dir_all(self.remote(dir.trim_matches('\'')));
            } else if let Some(dir) = command.strip_prefix("mkdir -p ") {
                fs::create_dir_all(self.remote(dir.trim_matches('\'')))
                    .map_err(|e| SessionError::Exec(e.to_string()))?;
            }
            Ok(ExecOutput::default())
        }

        fn upload_file(
            &mut self,
            local: &Path,
            remote_dir: &str,
            _mode: i32,
        ) -> Result<(), SessionError> {
            if self.fail_upload {
                return Err(SessionError::transfer(local, "injected failure"));
            }
            let name = local
                .file_name()
                .ok_or_else(|| SessionError::transfer(local, "no file name"))?;
            let dest = self.remote(remote_dir).join(name);
            fs::copy(local, &dest).map_err(|e| SessionError::transfer(local, e))?;
            self.log
                .lock()
                .unwrap()
                .uploads
                .push(name.to_string_lossy().into_owned());
            Ok(())
        }

        fn download_file(&mut self, remote_path: &str, local: &Path) -> Result<(), SessionError> {
            fs::copy(self.remote(remote_path), local)
                .map(|_| ())
                .map_err(|e| SessionError::transfer(remote_path, e))
        }

        fn close(&mut self) {
            if self.open {
                self.open = false;
                self.log.lock().unwrap().closed += 1;
            }
        }
    }

    /// Connector handing out [`FakeSession`]s over one device root
    pub struct FakeConnector {
        pub root: PathBuf,
        pub log: Arc<Mutex<FakeLog>>,
        pub script: ScriptOutcome,
        pub fail_upload: bool,
        pub refuse: bool,
    }

    impl FakeConnector {
        pub fn new(root: &Path) -> Self {
            Self {
                root: root.to_path_buf(),
                log: Arc::default(),
                script: ScriptOutcome::Ok,
                fail_upload: false,
                refuse: false,
            }
        }

        pub fn session(&self) -> FakeSession {
            FakeSession {
                root: self.root.clone(),
                log: self.log.clone(),
                script: self.script.clone(),
                fail_upload: self.fail_upload,
                open: true,
            }
        }
    }

    impl SessionConnector for FakeConnector {
        fn open(&self) -> Result<Box<dyn RemoteSession>, SessionError> {
            if self.refuse {
                return Err(SessionError::Connect {
                    target: "fake".into(),
                    reason: "refused".into(),
                });
            }
            Ok(Box::new(self.session()))
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    /// Lay out a device filesystem with both configuration documents
    pub fn seed_device(root: &Path, lcm_gui: &str, sounds_leds: &str) {
        let persist = root.join("etc/persistent");
        fs::create_dir_all(persist.join("lcm/animation")).unwrap();
        fs::create_dir_all(persist.join("sounds")).unwrap();
        fs::write(persist.join("ubnt_lcm_gui.conf"), lcm_gui).unwrap();
        fs::write(persist.join("ubnt_sounds_leds.conf"), sounds_leds).unwrap();
    }
}
