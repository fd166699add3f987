//! Stable error codes published on the `last_error` topic

use std::fmt;

/// Error codes with stable numeric values and symbolic names.
///
/// The numeric value and the name are part of the bus contract; never
/// renumber an existing variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    None,
    ConfigInvalid,
    ProfileNotFound,
    ProfileInvalid,
    ProfileDownloadFailed,
    ProfileUploadFailed,
    ProfileUploadTransferFailed,
    ProfileApplyFailed,
    ProfileApplyPermissionDenied,
    RemoteDiskFull,
    ProfileApplyFileOperationFailed,
    ProfileApplyVerifyFailed,
    ProfileApplyRestartFailed,
    SshConnectFailed,
    SshAuthFailed,
    StatePersistFailed,
    CommandPanicked,
}

impl ErrorCode {
    /// All known codes
    pub const ALL: [ErrorCode; 17] = [
        ErrorCode::None,
        ErrorCode::ConfigInvalid,
        ErrorCode::ProfileNotFound,
        ErrorCode::ProfileInvalid,
        ErrorCode::ProfileDownloadFailed,
        ErrorCode::ProfileUploadFailed,
        ErrorCode::ProfileUploadTransferFailed,
        ErrorCode::ProfileApplyFailed,
        ErrorCode::ProfileApplyPermissionDenied,
        ErrorCode::RemoteDiskFull,
        ErrorCode::ProfileApplyFileOperationFailed,
        ErrorCode::ProfileApplyVerifyFailed,
        ErrorCode::ProfileApplyRestartFailed,
        ErrorCode::SshConnectFailed,
        ErrorCode::SshAuthFailed,
        ErrorCode::StatePersistFailed,
        ErrorCode::CommandPanicked,
    ];

    /// Numeric code
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::None => 0,
            ErrorCode::ConfigInvalid => 100,
            ErrorCode::ProfileNotFound => 200,
            ErrorCode::ProfileInvalid => 201,
            ErrorCode::ProfileDownloadFailed => 202,
            ErrorCode::ProfileUploadFailed => 203,
            ErrorCode::ProfileUploadTransferFailed => 204,
            ErrorCode::ProfileApplyFailed => 210,
            ErrorCode::ProfileApplyPermissionDenied => 211,
            ErrorCode::RemoteDiskFull => 212,
            ErrorCode::ProfileApplyFileOperationFailed => 213,
            ErrorCode::ProfileApplyVerifyFailed => 214,
            ErrorCode::ProfileApplyRestartFailed => 215,
            ErrorCode::SshConnectFailed => 300,
            ErrorCode::SshAuthFailed => 301,
            ErrorCode::StatePersistFailed => 400,
            ErrorCode::CommandPanicked => 500,
        }
    }

    /// Symbolic name
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::None => "ERROR_NONE",
            ErrorCode::ConfigInvalid => "ERROR_CONFIG_INVALID",
            ErrorCode::ProfileNotFound => "ERROR_PROFILE_NOT_FOUND",
            ErrorCode::ProfileInvalid => "ERROR_PROFILE_INVALID",
            ErrorCode::ProfileDownloadFailed => "ERROR_PROFILE_DOWNLOAD_FAILED",
            ErrorCode::ProfileUploadFailed => "ERROR_PROFILE_UPLOAD_FAILED",
            ErrorCode::ProfileUploadTransferFailed => "ERROR_PROFILE_UPLOAD_TRANSFER_FAILED",
            ErrorCode::ProfileApplyFailed => "ERROR_PROFILE_APPLY_FAILED",
            ErrorCode::ProfileApplyPermissionDenied => "ERROR_PROFILE_APPLY_PERMISSION_DENIED",
            ErrorCode::RemoteDiskFull => "ERROR_REMOTE_DISK_FULL",
            ErrorCode::ProfileApplyFileOperationFailed => {
                "ERROR_PROFILE_APPLY_FILE_OPERATION_FAILED"
            }
            ErrorCode::ProfileApplyVerifyFailed => "ERROR_PROFILE_APPLY_VERIFY_FAILED",
            ErrorCode::ProfileApplyRestartFailed => "ERROR_PROFILE_APPLY_RESTART_FAILED",
            ErrorCode::SshConnectFailed => "ERROR_SSH_CONNECT_FAILED",
            ErrorCode::SshAuthFailed => "ERROR_SSH_AUTH_FAILED",
            ErrorCode::StatePersistFailed => "ERROR_STATE_PERSIST_FAILED",
            ErrorCode::CommandPanicked => "ERROR_COMMAND_PANICKED",
        }
    }

    /// Human-readable default message
    pub fn default_message(self) -> &'static str {
        match self {
            ErrorCode::None => "No error",
            ErrorCode::ConfigInvalid => "Configuration is invalid",
            ErrorCode::ProfileNotFound => "Profile not found",
            ErrorCode::ProfileInvalid => "Profile is invalid",
            ErrorCode::ProfileDownloadFailed => "Profile download failed",
            ErrorCode::ProfileUploadFailed => "Profile upload failed",
            ErrorCode::ProfileUploadTransferFailed => "Profile file transfer failed",
            ErrorCode::ProfileApplyFailed => "Profile apply failed",
            ErrorCode::ProfileApplyPermissionDenied => "Permission denied while applying profile",
            ErrorCode::RemoteDiskFull => "Remote disk is full",
            ErrorCode::ProfileApplyFileOperationFailed => {
                "File operation failed while applying profile"
            }
            ErrorCode::ProfileApplyVerifyFailed => "Verification failed while applying profile",
            ErrorCode::ProfileApplyRestartFailed => {
                "Service restart failed while applying profile"
            }
            ErrorCode::SshConnectFailed => "SSH connection failed",
            ErrorCode::SshAuthFailed => "SSH authentication failed",
            ErrorCode::StatePersistFailed => "Failed to persist last applied profile",
            ErrorCode::CommandPanicked => "Command handler crashed",
        }
    }

    /// Look up a code by its numeric value
    pub fn from_code(code: i32) -> Option<ErrorCode> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }

    /// Build the message published for this code, appending `detail` when present
    pub fn message_with(self, detail: &str) -> String {
        if detail.is_empty() {
            self.default_message().to_string()
        } else {
            format!("{}: {}", self.default_message(), detail)
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}
