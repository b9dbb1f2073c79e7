//! Virtual path handling
//!
//! Normalized paths are absolute, POSIX-style, with no trailing slash, no
//! empty or `.` components, and no `..`. The root is `/`.

use cvfs_core::{CvfsError, CvfsResult};

pub const ROOT: &str = "/";

/// Normalize a caller-supplied path.
pub fn normalize(path: &str) -> CvfsResult<String> {
    let mut out = String::with_capacity(path.len() + 1);
    for component in path.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                return Err(CvfsError::InvalidPath(format!(
                    "parent references are not allowed: {path}"
                )))
            }
            name => {
                out.push('/');
                out.push_str(name);
            }
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// Components of a normalized path, root first. Empty for `/`.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

/// Split a normalized path into parent path and final name. `None` for root.
pub fn split_parent(path: &str) -> Option<(&str, &str)> {
    if path == ROOT {
        return None;
    }
    let idx = path.rfind('/')?;
    let parent = if idx == 0 { ROOT } else { &path[..idx] };
    Some((parent, &path[idx + 1..]))
}

pub fn join(parent: &str, name: &str) -> String {
    if parent == ROOT {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// True if `path` is `prefix` or lies below it.
pub fn is_within(path: &str, prefix: &str) -> bool {
    if prefix == ROOT {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Re-root `path` from under `old` to under `new`.
pub fn replace_prefix(path: &str, old: &str, new: &str) -> Option<String> {
    if !is_within(path, old) {
        return None;
    }
    let rest = if old == ROOT { path } else { &path[old.len()..] };
    if rest.is_empty() || rest == ROOT {
        return Some(new.to_string());
    }
    if new == ROOT {
        Some(rest.to_string())
    } else {
        Some(format!("{new}{rest}"))
    }
}

/// Item names are single non-empty components.
pub fn validate_name(name: &str) -> CvfsResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(CvfsError::InvalidPath(format!("invalid item name {name:?}")));
    }
    Ok(())
}
