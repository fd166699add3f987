//! Local profiles: preset lookup and the on-disk repository

mod presets;
mod repository;

pub use presets::{normalize_key, PresetEntry, PresetTable};
pub use repository::{CommittedDownload, LastAppliedProfile, ProfileRepository, RepoError};
