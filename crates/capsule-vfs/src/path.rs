//! Virtual path normalization.
//!
//! Virtual paths are compared by exact string match against the archive's
//! member index, so every query is normalized first: forward slashes, no
//! `.`/`..` segments, no leading or trailing separator.

/// Normalize a virtual path lexically.
///
/// `..` pops the previous segment and is a no-op at the root.
pub fn normalize(path: &str) -> String {
    let forward = path.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for segment in forward.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

/// The directory part of a normalized virtual path (`""` at the root).
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..i],
        None => "",
    }
}

/// The final segment of a normalized virtual path.
pub fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Join a directory and a name, then normalize.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        normalize(name)
    } else {
        normalize(&format!("{}/{}", dir, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("./pkg/spam.so"), "pkg/spam.so");
        assert_eq!(normalize("pkg//spam.so"), "pkg/spam.so");
        assert_eq!(normalize("pkg/sub/../spam.so"), "pkg/spam.so");
        assert_eq!(normalize("pkg/"), "pkg");
        assert_eq!(normalize("/pkg"), "pkg");
        assert_eq!(normalize("pkg\\spam.so"), "pkg/spam.so");
        assert_eq!(normalize("../../x"), "x");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_parent_and_base() {
        assert_eq!(parent("pkg/sub/a.so"), "pkg/sub");
        assert_eq!(parent("a.so"), "");
        assert_eq!(base_name("pkg/sub/a.so"), "a.so");
        assert_eq!(base_name("a.so"), "a.so");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("pkg", "libhelper.so"), "pkg/libhelper.so");
        assert_eq!(join("pkg/sub/..", "a.so"), "pkg/a.so");
        assert_eq!(join("", "a.so"), "a.so");
    }
}
