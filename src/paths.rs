//! Path handling for bag internals.
//!
//! Every path stored in memory or written to a tag file uses forward
//! slashes; OS-native separators only appear when a `PathBuf` is handed to
//! the filesystem.

use std::path::{Path, PathBuf};
use tokio::fs;

/// Windows device names that must not be used as payload file names.
const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Characters Windows rejects in file names. Legal in a bag, but worth a
/// warning for anyone unpacking on that platform.
const WINDOWS_ILLEGAL: [char; 7] = ['<', '>', ':', '"', '|', '?', '*'];

fn unify(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Lexically resolve `.` and `..` segments. Returns `None` when `..`
/// climbs past the start of the path.
pub(crate) fn resolve_dots(path: &str) -> Option<String> {
    let absolute = path.starts_with('/');
    let mut stack: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop()?;
            }
            other => stack.push(other),
        }
    }

    let joined = stack.join("/");
    Some(if absolute {
        format!("/{joined}")
    } else {
        joined
    })
}

/// Join `rel` to the bag root, unless it already is prefixed by the root.
pub(crate) fn make_absolute(root: &Path, rel: impl AsRef<Path>) -> PathBuf {
    let rel = rel.as_ref();
    if rel.starts_with(root) {
        rel.to_path_buf()
    } else {
        root.join(rel)
    }
}

/// Root-relative portion of `path` in forward-slash form, or `""` when the
/// resolved path does not lie under the root.
pub(crate) fn make_relative(root: &Path, path: impl AsRef<Path>) -> String {
    let root = unify(root);
    let root = root.trim_end_matches('/');

    let Some(resolved) = resolve_dots(&unify(path.as_ref())) else {
        return String::new();
    };

    if resolved == root {
        return String::new();
    }

    resolved
        .strip_prefix(&format!("{root}/"))
        .map(str::to_string)
        .unwrap_or_default()
}

/// Whether `rel` lands inside the payload directory of a bag at `root`.
pub(crate) fn path_in_payload(root: &Path, rel: impl AsRef<Path>) -> bool {
    make_relative(root, make_absolute(root, rel)).starts_with("data/")
}

/// Normalize a caller-supplied destination to a payload-relative path
/// (`data/...`). Returns `None` for absolute destinations, ones escaping
/// the bag, or the payload directory itself.
pub(crate) fn payload_relative(dest: &str) -> Option<String> {
    let cleaned = resolve_dots(&dest.replace('\\', "/"))?;

    if cleaned.is_empty() || cleaned.starts_with('/') || cleaned == "data" {
        return None;
    }

    Some(if cleaned.starts_with("data/") {
        cleaned
    } else {
        format!("data/{cleaned}")
    })
}

/// True when the final segment of `rel`, uppercased, is a Windows device
/// name.
pub(crate) fn reserved_name(rel: &str) -> bool {
    rel.rsplit('/')
        .next()
        .map(|segment| RESERVED_NAMES.contains(&segment.to_ascii_uppercase().as_str()))
        .unwrap_or(false)
}

/// True when any segment of `rel` contains a character Windows cannot
/// store.
pub(crate) fn has_windows_illegal_characters(rel: &str) -> bool {
    rel.chars().any(|c| WINDOWS_ILLEGAL.contains(&c))
}

/// Percent-encode the characters RFC 8493 section 2.1.3 requires in
/// manifest and fetch paths.
pub(crate) fn encode_manifest_path(path: &str) -> String {
    path.replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Inverse of [`encode_manifest_path`]. Only the three defined escapes are
/// decoded; any other `%` passes through untouched.
pub(crate) fn decode_manifest_path(path: &str) -> String {
    let mut result = String::with_capacity(path.len());
    let mut rest = path;

    while let Some(idx) = rest.find('%') {
        result.push_str(&rest[..idx]);
        let tail = &rest[idx..];

        match tail.get(1..3).map(|hex| hex.to_ascii_uppercase()).as_deref() {
            Some("25") => {
                result.push('%');
                rest = &tail[3..];
            }
            Some("0A") => {
                result.push('\n');
                rest = &tail[3..];
            }
            Some("0D") => {
                result.push('\r');
                rest = &tail[3..];
            }
            _ => {
                result.push('%');
                rest = &tail[1..];
            }
        }
    }

    result.push_str(rest);
    result
}

/// Collect every file under `start`, returned relative to `root` in sorted
/// forward-slash form.
pub(crate) async fn walk_files(root: &Path, start: &Path) -> Result<Vec<String>, std::io::Error> {
    let mut pending = vec![start.to_path_buf()];
    let mut files = Vec::new();

    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else {
                files.push(make_relative(root, &path));
            }
        }
    }

    files.sort();
    Ok(files)
}
