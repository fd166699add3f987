//! On-device configuration documents
//!
//! `ubnt_lcm_gui.conf` holds the welcome animation in `customAnimations`
//! (entry with `guiId == "WELCOME"`); `ubnt_sounds_leds.conf` holds the ring
//! sound in `customSounds` (entry with `soundStateName == "RING_BUTTON_PRESSED"`).
//! Both are JSON. Patching keeps every other key and entry intact.

use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::protocol::{device, ErrorCode, Profile};

const ANIMATIONS_KEY: &str = "customAnimations";
const SOUNDS_KEY: &str = "customSounds";

#[derive(Debug, Error)]
pub enum ConfError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{} is not a JSON object", .0.display())]
    NotAnObject(PathBuf),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ConfError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ConfError::Write { .. } => ErrorCode::ProfileUploadFailed,
            _ => ErrorCode::ProfileDownloadFailed,
        }
    }
}

fn load(path: &Path) -> Result<Map<String, Value>, ConfError> {
    let text = fs::read_to_string(path).map_err(|source| ConfError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    match serde_json::from_str(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ConfError::NotAnObject(path.to_path_buf())),
        Err(source) => Err(ConfError::Parse {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn store(path: &Path, root: Map<String, Value>) -> Result<(), ConfError> {
    let write_err = |source| ConfError::Write {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_string_pretty(&Value::Object(root))
        .map_err(|e| write_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;
    fs::write(path, json).map_err(write_err)
}

fn copy_unchanged(in_path: &Path, out_path: &Path) -> Result<(), ConfError> {
    fs::copy(in_path, out_path)
        .map(|_| ())
        .map_err(|source| ConfError::Write {
            path: out_path.to_path_buf(),
            source,
        })
}

/// Find the entry whose `key` equals `id`
fn find_entry<'a>(entries: &'a [Value], key: &str, id: &str) -> Option<&'a Map<String, Value>> {
    entries
        .iter()
        .filter_map(Value::as_object)
        .find(|entry| entry.get(key).and_then(Value::as_str) == Some(id))
}

/// Find-or-create the entry whose `key` equals `id`, then set `fields` on it
fn upsert_entry(
    root: &mut Map<String, Value>,
    array_key: &str,
    key: &str,
    id: &str,
    fields: Vec<(&str, Value)>,
) {
    let slot = root
        .entry(array_key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    let Value::Array(entries) = slot else {
        return;
    };

    let position = entries
        .iter()
        .position(|e| e.get(key).and_then(Value::as_str) == Some(id));
    let index = position.unwrap_or_else(|| {
        let mut entry = Map::new();
        entry.insert(key.to_string(), Value::String(id.to_string()));
        entries.push(Value::Object(entry));
        entries.len() - 1
    });

    if let Some(entry) = entries[index].as_object_mut() {
        for (name, value) in fields {
            entry.insert(name.to_string(), value);
        }
    }
}

fn get_i32(entry: &Map<String, Value>, key: &str) -> Option<i32> {
    entry
        .get(key)
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
}

fn get_bool(entry: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|k| entry.get(*k).and_then(Value::as_bool))
}

fn get_string(entry: &Map<String, Value>, key: &str) -> Option<String> {
    entry.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Read the welcome entry into `out.welcome`. Returns whether it was present.
pub fn read_lcm_gui_conf(path: &Path, out: &mut Profile) -> Result<bool, ConfError> {
    let root = load(path)?;
    let entries = root
        .get(ANIMATIONS_KEY)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let Some(entry) = find_entry(entries, "guiId", device::WELCOME_GUI_ID) else {
        debug!("[CONF] No {} entry in {}", device::WELCOME_GUI_ID, path.display());
        return Ok(false);
    };

    let welcome = &mut out.welcome;
    welcome.gui_id = device::WELCOME_GUI_ID.to_string();
    welcome.file = get_string(entry, "file").unwrap_or_default();
    welcome.count = get_i32(entry, "count").unwrap_or(1);
    welcome.duration_ms = get_i32(entry, "durationMs").unwrap_or(0);
    welcome.enabled = get_bool(entry, &["enable", "enabled"]).unwrap_or(false);
    welcome.loop_ = get_bool(entry, &["loop"]).unwrap_or(false);
    Ok(true)
}

/// Read the ring button entry into `out.ring_button`. Returns whether it was present.
pub fn read_sounds_leds_conf(path: &Path, out: &mut Profile) -> Result<bool, ConfError> {
    let root = load(path)?;
    let entries = root
        .get(SOUNDS_KEY)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let Some(entry) = find_entry(entries, "soundStateName", device::RING_BUTTON_STATE) else {
        debug!("[CONF] No {} entry in {}", device::RING_BUTTON_STATE, path.display());
        return Ok(false);
    };

    let ring = &mut out.ring_button;
    ring.sound_state_name = device::RING_BUTTON_STATE.to_string();
    ring.enabled = get_bool(entry, &["enable", "enabled"]).unwrap_or(false);
    ring.file = get_string(entry, "file").unwrap_or_default();
    ring.repeat_times = get_i32(entry, "repeatTimes").unwrap_or(1);
    ring.volume = get_i32(entry, "volume").unwrap_or(100);
    Ok(true)
}

/// Write `out_path` as `in_path` with the welcome entry set from `desired`.
///
/// An inert welcome section copies the document unchanged.
pub fn patch_lcm_gui_conf(
    in_path: &Path,
    out_path: &Path,
    desired: &Profile,
) -> Result<(), ConfError> {
    if !desired.welcome.is_active() {
        debug!("[CONF] Welcome inactive, copying {} unchanged", in_path.display());
        return copy_unchanged(in_path, out_path);
    }

    let mut root = load(in_path)?;
    let welcome = &desired.welcome;
    upsert_entry(
        &mut root,
        ANIMATIONS_KEY,
        "guiId",
        device::WELCOME_GUI_ID,
        vec![
            ("count", welcome.count.into()),
            ("durationMs", welcome.duration_ms.into()),
            ("enable", welcome.enabled.into()),
            ("file", welcome.file.clone().into()),
            ("loop", welcome.loop_.into()),
        ],
    );

    store(out_path, root)
}

/// Write `out_path` as `in_path` with the ring button entry set from `desired`.
///
/// An inert ring button section copies the document unchanged.
pub fn patch_sounds_leds_conf(
    in_path: &Path,
    out_path: &Path,
    desired: &Profile,
) -> Result<(), ConfError> {
    if !desired.ring_button.is_active() {
        debug!("[CONF] Ring button inactive, copying {} unchanged", in_path.display());
        return copy_unchanged(in_path, out_path);
    }

    let mut root = load(in_path)?;
    let ring = &desired.ring_button;
    upsert_entry(
        &mut root,
        SOUNDS_KEY,
        "soundStateName",
        device::RING_BUTTON_STATE,
        vec![
            ("enable", ring.enabled.into()),
            ("file", ring.file.clone().into()),
            ("repeatTimes", ring.repeat_times.into()),
            ("volume", ring.volume.into()),
        ],
    );

    store(out_path, root)
}
