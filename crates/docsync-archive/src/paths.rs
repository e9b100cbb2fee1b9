//! Conversion between base-relative `/` paths and archive `\` paths.

/// Join a base-relative path onto the base folder using `\` separators.
///
/// ```
/// use docsync_archive::paths::to_archive;
/// assert_eq!(to_archive("/FSQA", "/trellis/Acme"), "\\FSQA\\trellis\\Acme");
/// assert_eq!(to_archive("/FSQA", "/"), "\\FSQA");
/// ```
pub fn to_archive(base: &str, path: &str) -> String {
    let mut out = String::new();
    for segment in split(base).chain(split(path)) {
        out.push('\\');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('\\');
    }
    out
}

/// Strip the base folder from an archive path and return it with `/`
/// separators and a leading `/`. Paths outside the base are returned whole.
pub fn from_archive(base: &str, path: &str) -> String {
    let base: Vec<&str> = split(base).collect();
    let segments: Vec<&str> = split(path).collect();
    let rest = if segments.len() >= base.len()
        && segments
            .iter()
            .zip(&base)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    {
        &segments[base.len()..]
    } else {
        &segments[..]
    };
    format!("/{}", rest.join("/"))
}

/// Parent folder of an archive entry given its full path and name.
///
/// The archive reports either the folder or the full entry path depending on
/// the endpoint; a trailing segment equal to `name` is dropped.
pub fn parent_folder(base: &str, path: &str, name: &str) -> String {
    let relative = from_archive(base, path);
    match relative.rsplit_once('/') {
        Some((parent, last)) if last == name && !name.is_empty() => {
            if parent.is_empty() {
                "/".to_string()
            } else {
                parent.to_string()
            }
        }
        _ => relative,
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\']).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_archive() {
        assert_eq!(
            to_archive("/FSQA", "/trellis/Acme/Shared To X"),
            "\\FSQA\\trellis\\Acme\\Shared To X"
        );
        assert_eq!(to_archive("", "/"), "\\");
        assert_eq!(to_archive("\\FSQA\\", "a/"), "\\FSQA\\a");
    }

    #[test]
    fn test_from_archive() {
        assert_eq!(from_archive("/FSQA", "\\FSQA\\trellis\\Acme"), "/trellis/Acme");
        assert_eq!(from_archive("/FSQA", "\\fsqa"), "/");
        assert_eq!(from_archive("/FSQA", "\\Other\\x"), "/Other/x");
    }

    #[test]
    fn test_parent_folder() {
        assert_eq!(
            parent_folder("/FSQA", "\\FSQA\\trellis\\doc.pdf", "doc.pdf"),
            "/trellis"
        );
        assert_eq!(parent_folder("/FSQA", "\\FSQA\\trellis", "doc.pdf"), "/trellis");
        assert_eq!(parent_folder("/FSQA", "\\FSQA\\doc.pdf", "doc.pdf"), "/");
    }
}
