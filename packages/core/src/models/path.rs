//! Path and Name Helpers
//!
//! Absolute paths are the primary key of the tree. Every subtree operation is a
//! prefix match over them, so all path arithmetic lives here.
//!
//! - Root is `/`, depth 0, empty name
//! - `/a/b` has parent `/a`, name `b`, depth 2
//! - Names may carry one namespace prefix (`jcr:content`)

/// Root path of every workspace
pub const ROOT_PATH: &str = "/";

/// Characters that may never appear inside a single name segment
const ILLEGAL_NAME_CHARS: [char; 6] = ['/', '[', ']', '|', '*', '\t'];

pub fn is_root(path: &str) -> bool {
    path == ROOT_PATH
}

/// Validate a single name, with or without prefix
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name == "." || name == ".." {
        return false;
    }
    if name.chars().any(|c| ILLEGAL_NAME_CHARS.contains(&c) || c.is_control()) {
        return false;
    }
    let (prefix, local) = split_name(name);
    if local.is_empty() || local.contains(':') {
        return false;
    }
    // `:foo` is malformed, `foo` has an empty prefix
    !(prefix.is_empty() && name.starts_with(':'))
}

/// Validate an absolute path (no trailing slash, no empty segments)
pub fn is_valid_absolute_path(path: &str) -> bool {
    if is_root(path) {
        return true;
    }
    if !path.starts_with('/') || path.ends_with('/') {
        return false;
    }
    path[1..].split('/').all(is_valid_name)
}

/// Parent path, or `None` for root
///
/// # Examples
///
/// ```rust
/// use arbor_core::models::path::parent_path;
///
/// assert_eq!(parent_path("/a/b"), Some("/a"));
/// assert_eq!(parent_path("/a"), Some("/"));
/// assert_eq!(parent_path("/"), None);
/// ```
pub fn parent_path(path: &str) -> Option<&str> {
    if is_root(path) {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT_PATH),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of a path (empty for root)
pub fn node_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Split `prefix:local` into its parts; unprefixed names return an empty prefix
pub fn split_name(name: &str) -> (&str, &str) {
    match name.find(':') {
        Some(idx) => (&name[..idx], &name[idx + 1..]),
        None => ("", name),
    }
}

/// Number of path segments (root = 0)
pub fn depth(path: &str) -> i64 {
    if is_root(path) {
        0
    } else {
        path.matches('/').count() as i64
    }
}

/// Append a name to a parent path
pub fn join(parent: &str, name: &str) -> String {
    if is_root(parent) {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// True if `path` equals `ancestor` or lies below it
pub fn is_self_or_descendant(path: &str, ancestor: &str) -> bool {
    if is_root(ancestor) {
        return path.starts_with('/');
    }
    path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

/// Split `/a/b/prop` into (`/a/b`, `prop`)
pub fn split_property_path(path: &str) -> Option<(&str, &str)> {
    let parent = parent_path(path)?;
    let name = node_name(path);
    if name.is_empty() {
        None
    } else {
        Some((parent, name))
    }
}

/// Prefix shared by every strict descendant of `path`
pub fn descendant_prefix(path: &str) -> String {
    if is_root(path) {
        ROOT_PATH.to_string()
    } else {
        format!("{}/", path)
    }
}

/// LIKE pattern matching every strict descendant of `path`, for use with `ESCAPE '\'`
pub fn descendant_like_pattern(path: &str) -> String {
    let escaped = path
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    if is_root(path) {
        "/%".to_string()
    } else {
        format!("{}/%", escaped)
    }
}
