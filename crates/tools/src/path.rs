//! Path resolution for the file tools.
//!
//! Relative paths are joined onto the call's working directory, `..` and
//! `.` are folded away, symlinks are resolved where the path (or its
//! parent) exists, and the result is checked against forbidden prefixes.

use codecrab_core::error::ToolError;
use std::path::{Component, Path, PathBuf};

/// Resolve `raw` for `tool_name`, rejecting anything under a forbidden
/// prefix. `~` in either the path or a prefix expands to `$HOME`.
pub fn resolve(
    tool_name: &str,
    working_dir: &Path,
    raw: &str,
    forbidden_paths: &[String],
) -> Result<PathBuf, ToolError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ToolError::InvalidArguments("'path' must not be empty".into()));
    }

    let expanded = expand_tilde(raw);
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        working_dir.join(expanded)
    };
    let resolved = canonicalize_lenient(&normalize(&joined));

    for forbidden in forbidden_paths {
        let prefix = canonicalize_lenient(&normalize(&expand_tilde(forbidden)));
        if resolved.starts_with(&prefix) {
            return Err(ToolError::PermissionDenied {
                tool_name: tool_name.into(),
                reason: format!("'{raw}' is under forbidden path '{forbidden}'"),
            });
        }
    }

    Ok(resolved)
}

/// Fold `.` and `..` lexically. `..` at the root stays at the root.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Canonicalize the longest existing ancestor and re-append the rest, so
/// a symlinked directory cannot smuggle a write past the prefix check.
fn canonicalize_lenient(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    let mut tail = Vec::new();
    let mut current = path.to_path_buf();
    while let Some(name) = current.file_name().map(|n| n.to_os_string()) {
        tail.push(name);
        if !current.pop() {
            break;
        }
        if let Ok(mut canonical) = current.canonicalize() {
            for part in tail.iter().rev() {
                canonical.push(part);
            }
            return canonical;
        }
    }
    path.to_path_buf()
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(home) = home_dir() {
        if path == "~" {
            return home;
        }
        if let Some(rest) = path.strip_prefix("~/") {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let var = "USERPROFILE";
    #[cfg(not(target_os = "windows"))]
    let var = "HOME";
    std::env::var_os(var).map(PathBuf::from)
}
