//! Preset table: display name -> profile directory

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetEntry {
    pub display_name: String,
    pub normalized_key: String,
    /// Relative to the profiles base directory
    pub directory: PathBuf,
}

/// Read-only set of presets, loaded once at startup
#[derive(Debug, Clone, Default)]
pub struct PresetTable {
    entries: Vec<PresetEntry>,
}

/// Trim, lowercase and collapse interior whitespace runs to one space
pub fn normalize_key(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

impl PresetTable {
    /// Build from the `presets` config object.
    ///
    /// Any invalid entry (empty name, non-string or empty directory) or a
    /// duplicate normalized key yields an empty table.
    pub fn from_config(raw: &BTreeMap<String, Value>) -> Self {
        let mut entries: Vec<PresetEntry> = Vec::with_capacity(raw.len());

        for (name, value) in raw {
            let key = normalize_key(name);
            if key.is_empty() {
                warn!("[PRESETS] Preset with empty name; no presets loaded");
                return Self::default();
            }

            let directory = match value.as_str().map(str::trim) {
                Some(dir) if !dir.is_empty() => PathBuf::from(dir),
                _ => {
                    warn!(
                        "[PRESETS] Preset '{}' has no valid directory; no presets loaded",
                        name
                    );
                    return Self::default();
                }
            };

            if entries.iter().any(|e| e.normalized_key == key) {
                warn!(
                    "[PRESETS] Duplicate preset name '{}' (key '{}'); no presets loaded",
                    name, key
                );
                return Self::default();
            }

            entries.push(PresetEntry {
                display_name: name.trim().to_string(),
                normalized_key: key,
                directory,
            });
        }

        Self { entries }
    }

    /// Exact match on the normalized key
    pub fn find(&self, name: &str) -> Option<&PresetEntry> {
        let key = normalize_key(name);
        self.entries.iter().find(|e| e.normalized_key == key)
    }

    pub fn display_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.display_name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(pairs: &[(&str, Value)]) -> PresetTable {
        let raw = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        PresetTable::from_config(&raw)
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("  Happy   New\tYear "), "happy new year");
        assert_eq!(normalize_key(" christmas "), "christmas");
    }

    #[test]
    fn test_lookup_is_case_and_whitespace_insensitive() {
        let presets = table(&[
            ("Christmas", json!("christmas")),
            ("Halloween", json!("halloween")),
        ]);

        let a = presets.find(" christmas ").unwrap();
        let b = presets.find("Christmas").unwrap();
        assert_eq!(a.directory, b.directory);
        assert_eq!(a.directory, PathBuf::from("christmas"));
        assert!(presets.find("christ").is_none());
    }

    #[test]
    fn test_duplicate_keys_yield_empty_table() {
        let presets = table(&[
            ("Christmas", json!("a")),
            ("CHRISTMAS ", json!("b")),
        ]);

        assert!(presets.is_empty());
        assert!(presets.find("christmas").is_none());
    }

    #[test]
    fn test_invalid_directory_yields_empty_table() {
        assert!(table(&[("Easter", json!(3))]).is_empty());
        assert!(table(&[("Easter", json!(""))]).is_empty());
        assert!(table(&[("  ", json!("x"))]).is_empty());
    }
}
