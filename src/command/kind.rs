//! User-facing commands accepted on `<base>/cmd/<name>`

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Apply a configured preset by display name
    PresetSet,
    /// Apply a profile directory relative to the profiles base
    ApplyCustom,
    /// Apply the bundled test profile
    TestConfig,
    /// Pull the device's current profile into the repository
    DownloadAssets,
}

impl CommandKind {
    pub const ALL: [CommandKind; 4] = [
        CommandKind::PresetSet,
        CommandKind::ApplyCustom,
        CommandKind::TestConfig,
        CommandKind::DownloadAssets,
    ];

    /// Last segment of the command topic
    pub fn topic_name(self) -> &'static str {
        match self {
            CommandKind::PresetSet => "preset_set",
            CommandKind::ApplyCustom => "apply_custom",
            CommandKind::TestConfig => "test_config",
            CommandKind::DownloadAssets => "download_assets",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic_name())
    }
}
