//! Shared file-IO helpers for the coordination stores.
//!
//! Two rules hold for every store in this crate:
//!
//! 1. Writes go through an atomic replace: the payload is written to a
//!    unique temp file in the destination directory, then renamed over the
//!    target. POSIX rename atomicity guarantees a reader sees either the
//!    old record or the new one, never a torn write.
//! 2. Reads are tolerant: a missing record is `Absent`, an unreadable or
//!    unparseable record is `Corrupt`. Corrupt records get logged and
//!    deleted by the caller; they are never an error.

use leadloop_core::constants::MAX_FILE_STEM_LEN;
use leadloop_core::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Outcome of a tolerant read.
#[derive(Debug)]
pub enum ReadOutcome<T> {
    Found(T),
    Absent,
    /// The file exists but cannot be read or parsed.
    Corrupt,
}

/// Atomically replace `path` with the JSON serialization of `value`.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let contents =
        serde_json::to_string_pretty(value).map_err(|e| StoreError::serialize(path, e))?;
    atomic_write_string(path, &contents)
}

/// Atomically replace `path` with `contents`.
///
/// Parent directories are created lazily. The temp file lives in the same
/// directory as the target so the rename stays on one filesystem.
pub fn atomic_write_string(path: &Path, contents: &str) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "record".to_string());
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::now_v7()));

    fs::write(&tmp, contents).map_err(|e| StoreError::io(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

/// Read and deserialize a JSON record.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> ReadOutcome<T> {
    match read_string(path) {
        ReadOutcome::Found(contents) => match serde_json::from_str(&contents) {
            Ok(value) => ReadOutcome::Found(value),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unparseable record");
                ReadOutcome::Corrupt
            }
        },
        ReadOutcome::Absent => ReadOutcome::Absent,
        ReadOutcome::Corrupt => ReadOutcome::Corrupt,
    }
}

/// Read a record as a string.
pub fn read_string(path: &Path) -> ReadOutcome<String> {
    match fs::read_to_string(path) {
        Ok(contents) => ReadOutcome::Found(contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ReadOutcome::Absent,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Unreadable record");
            ReadOutcome::Corrupt
        }
    }
}

/// Delete a corrupt record so it cannot wedge the store. Best-effort.
pub fn discard_corrupt(path: &Path, store: &str) {
    tracing::warn!(store, path = %path.display(), "Discarding corrupt record");
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to discard corrupt record");
        }
    }
}

/// Remove a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Normalize a caller-supplied key into a filesystem-safe file stem.
///
/// Alphanumerics plus `-`, `_`, and interior `.` survive; everything else
/// becomes `_`. Keys longer than [`MAX_FILE_STEM_LEN`] are truncated
/// head/tail-preserving around a sha256-derived middle, so distinct long
/// keys stay distinct while the readable ends survive for debugging.
pub fn safe_file_stem(raw: &str) -> String {
    const HEAD: usize = 48;
    const TAIL: usize = 48;
    const DIGEST_HEX: usize = 16;

    let mut stem: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if stem.is_empty() {
        stem.push('_');
    }
    // A leading dot would collide with the temp-file namespace.
    if stem.starts_with('.') {
        stem.replace_range(0..1, "_");
    }

    if stem.len() <= MAX_FILE_STEM_LEN {
        return stem;
    }

    let digest = Sha256::digest(raw.as_bytes());
    let middle = &hex::encode(digest)[..DIGEST_HEX];
    let head = &stem[..HEAD];
    let tail = &stem[stem.len() - TAIL..];
    format!("{head}-{middle}-{tail}")
}

// ============================================================================
// TESTS
// ============================================================================
