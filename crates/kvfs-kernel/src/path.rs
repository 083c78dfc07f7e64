//! Path normalization.
//!
//! Paths are cleaned before they reach the namespace index; the index itself
//! compares bytes.

use crate::error::{FsError, FsResult};

/// The root path.
pub const ROOT: &str = "/";

/// Maximum length of a single name.
pub const NAME_MAX: usize = 255;

/// Normalize a path: make it absolute, resolve `.` and `..`, drop repeated
/// and trailing slashes. `..` at the root stays at the root.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    if parts.is_empty() {
        ROOT.to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Clean a single child name.
///
/// Accepts the forms a shell hands over (`./a/`, `a/`) and rejects anything
/// that does not reduce to exactly one component.
pub fn clean_name(name: &str) -> FsResult<String> {
    let parts: Vec<&str> = name
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect();
    match parts.as_slice() {
        [] => Err(FsError::invalid_argument(format!("empty name: {name:?}"))),
        [".."] => Err(FsError::invalid_argument(format!("name escapes parent: {name:?}"))),
        [single] if single.len() > NAME_MAX => {
            Err(FsError::invalid_argument(format!("name too long: {} bytes", single.len())))
        }
        [single] => Ok((*single).to_string()),
        _ => Err(FsError::invalid_argument(format!("name has separators: {name:?}"))),
    }
}

/// Join a normalized parent path and a cleaned name.
pub fn join(parent: &str, name: &str) -> String {
    if parent == ROOT {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Split a normalized path into parent path and final name. `None` for root.
pub fn split(path: &str) -> Option<(String, String)> {
    if path == ROOT {
        return None;
    }
    let idx = path.rfind('/')?;
    let parent = if idx == 0 { ROOT } else { &path[..idx] };
    Some((parent.to_string(), path[idx + 1..].to_string()))
}
