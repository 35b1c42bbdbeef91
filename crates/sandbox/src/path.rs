//! POSIX path helpers for paths inside sandboxes.
//!
//! Sandbox paths are always `/`-separated regardless of the host platform,
//! so these operate on strings rather than `std::path`.

use crate::error::{SandboxError, SandboxResult};

/// Normalize an absolute sandbox path: collapse duplicate and trailing
/// slashes and drop `.` components. `..` is rejected.
pub fn normalize_absolute(path: &str) -> SandboxResult<String> {
    if !path.starts_with('/') {
        return Err(SandboxError::InvalidPath(format!(
            "expected absolute path: {path}"
        )));
    }
    let mut parts = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                return Err(SandboxError::InvalidPath(format!(
                    "parent components not allowed: {path}"
                )));
            }
            other => parts.push(other),
        }
    }
    Ok(format!("/{}", parts.join("/")))
}

/// Validate a relative archive path and return it without `./` prefix or
/// trailing slashes.
pub fn normalize_relative(path: &str) -> SandboxResult<String> {
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(SandboxError::InvalidPath(format!(
            "absolute path not allowed: {path}"
        )));
    }
    let mut parts = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                return Err(SandboxError::InvalidPath(format!(
                    "path traversal not allowed: {path}"
                )));
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(SandboxError::InvalidPath(format!("empty path: {path:?}")));
    }
    Ok(parts.join("/"))
}

/// Join an absolute directory and a relative path.
pub fn join(base: &str, relative: &str) -> String {
    let base = base.trim_end_matches('/');
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        if base.is_empty() {
            "/".to_string()
        } else {
            base.to_string()
        }
    } else {
        format!("{base}/{relative}")
    }
}

/// Split a normalized absolute path into parent directory and final name.
///
/// Fails for `/`, which has no name.
pub fn split_parent(path: &str) -> SandboxResult<(String, String)> {
    let path = normalize_absolute(path)?;
    match path.rsplit_once('/') {
        Some((_, "")) | None => Err(SandboxError::InvalidPath(
            "the root directory has no parent".to_string(),
        )),
        Some(("", name)) => Ok(("/".to_string(), name.to_string())),
        Some((parent, name)) => Ok((parent.to_string(), name.to_string())),
    }
}

/// First component of a relative path and the remainder, if any.
pub fn split_first(relative: &str) -> (&str, Option<&str>) {
    match relative.split_once('/') {
        Some((first, rest)) => (first, Some(rest)),
        None => (relative, None),
    }
}
