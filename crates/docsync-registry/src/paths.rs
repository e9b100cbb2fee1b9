//! Registry path helpers.

/// Join a resource id or path with sub-path segments into an absolute path.
///
/// ```
/// use docsync_registry::paths::join;
/// assert_eq!(join("resources/abc", &["_meta", "vdoc"]), "/resources/abc/_meta/vdoc");
/// ```
pub fn join(base: &str, parts: &[&str]) -> String {
    let mut path = String::from("/");
    path.push_str(base.trim_matches('/'));
    for part in parts {
        let part = part.trim_matches('/');
        if part.is_empty() {
            continue;
        }
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(part);
    }
    path
}

/// Non-empty segments of a path.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Resource id (`resources/<key>`) from a `Content-Location` style value.
pub fn resource_id(location: &str) -> String {
    let trimmed = location.trim_start_matches('/');
    match trimmed.split('/').collect::<Vec<_>>().as_slice() {
        ["resources", key, ..] => format!("resources/{}", key),
        _ => trimmed.to_string(),
    }
}
