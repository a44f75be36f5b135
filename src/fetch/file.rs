//! Local file retrieval, restricted to a configured root directory.
//!
//! Both `file://` URLs and bare paths are accepted. A path is rejected
//! before anything is opened if it resolves outside the feed root (via
//! absolute components or `..` traversal) or if any component is an
//! OS-reserved device name.

use std::path::{Component, Path, PathBuf};

use url::Url;

use super::{FetchConfig, FetchError, Retrieved};

pub(super) async fn retrieve(config: &FetchConfig, url: &str) -> Result<Retrieved, FetchError> {
    let root = config
        .feed_root
        .as_deref()
        .ok_or(FetchError::LocalFilesDisabled)?;

    let path = extract_path(url);
    let resolved = resolve_root(root, &path)?;
    if let Some(component) = reserved_component(&resolved) {
        return Err(FetchError::ReservedPath(component));
    }

    tracing::debug!(url = %url, path = %resolved.display(), "reading feed file");
    let bytes = tokio::fs::read(&resolved).await?;

    Ok(Retrieved::Document {
        bytes,
        etag: None,
        last_modified: None,
    })
}

/// Extracts the filesystem path from a `file://` URL, or returns a bare
/// path unchanged.
fn extract_path(url: &str) -> PathBuf {
    if let Ok(parsed) = Url::parse(url) {
        if parsed.scheme() == "file" {
            if let Ok(path) = parsed.to_file_path() {
                return path;
            }
            return PathBuf::from(parsed.path());
        }
    }
    PathBuf::from(url)
}

/// Resolves `path` against `root`, rejecting anything that escapes it.
///
/// Resolution is purely lexical (no filesystem access, no symlink
/// following), so the check happens before any file is opened. Absolute
/// paths are allowed only if they already sit under the root.
fn resolve_root(root: &Path, path: &Path) -> Result<PathBuf, FetchError> {
    let candidate = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };

    let normalized = normalize(&candidate);
    if !normalized.starts_with(normalize(root)) {
        return Err(FetchError::PathOutsideRoot(
            path.display().to_string(),
        ));
    }
    Ok(normalized)
}

/// Lexical normalization: removes `.` and folds `..` into its parent.
/// A `..` with nothing left to pop keeps the path outside any root.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    // Popping past the root (or an unanchored prefix):
                    // keep the component so the prefix check fails.
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Returns the first path component that is an OS-reserved device name
/// (CON, PRN, AUX, NUL, COM1-9, LPT1-9), if any.
fn reserved_component(path: &Path) -> Option<String> {
    for component in path.components() {
        if let Component::Normal(name) = component {
            let name = name.to_string_lossy();
            // Reserved names apply with or without an extension (NUL.txt
            // is still the NUL device).
            let stem = name.split('.').next().unwrap_or(&name);
            let upper = stem.to_ascii_uppercase();
            let reserved = matches!(upper.as_str(), "CON" | "PRN" | "AUX" | "NUL")
                || matches!(
                    upper.as_str(),
                    "COM1" | "COM2" | "COM3" | "COM4" | "COM5" | "COM6" | "COM7" | "COM8" | "COM9"
                )
                || matches!(
                    upper.as_str(),
                    "LPT1" | "LPT2" | "LPT3" | "LPT4" | "LPT5" | "LPT6" | "LPT7" | "LPT8" | "LPT9"
                );
            if reserved {
                return Some(name.into_owned());
            }
        }
    }
    None
}
