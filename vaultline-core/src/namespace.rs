//! Namespace path handling.
//!
//! Namespaces are `/`-separated paths. Surrounding separators carry no
//! meaning, so `"/teamA/"`, `"teamA/"` and `"teamA"` all denote the same
//! namespace and normalize to `"teamA"`.

/// Trim surrounding `/` separators (and whitespace) from a namespace.
pub fn normalize(namespace: &str) -> &str {
    namespace.trim().trim_matches('/')
}

/// Normalize an optional namespace, mapping empty results to `None`.
pub fn normalize_opt(namespace: Option<&str>) -> Option<&str> {
    namespace.map(normalize).filter(|ns| !ns.is_empty())
}

/// Compose `child` below `root`.
///
/// Both parts are normalized; an empty root leaves the child unchanged.
///
/// ```
/// use vaultline_core::namespace::compose;
///
/// assert_eq!(compose(Some("a"), "b"), "a/b");
/// assert_eq!(compose(Some("/a/"), "/b/"), "a/b");
/// assert_eq!(compose(None, "b/"), "b");
/// ```
pub fn compose(root: Option<&str>, child: &str) -> String {
    let child = normalize(child);
    match normalize_opt(root) {
        Some(root) if child.is_empty() => root.to_string(),
        Some(root) => format!("{}/{}", root, child),
        None => child.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_trims_separators() {
        assert_eq!(normalize("teamA"), "teamA");
        assert_eq!(normalize("/teamA/"), "teamA");
        assert_eq!(normalize("//teamA/sub//"), "teamA/sub");
        assert_eq!(normalize(" /teamA "), "teamA");
        assert_eq!(normalize("/"), "");
    }

    #[test]
    fn test_normalize_opt() {
        assert_eq!(normalize_opt(None), None);
        assert_eq!(normalize_opt(Some("")), None);
        assert_eq!(normalize_opt(Some("//")), None);
        assert_eq!(normalize_opt(Some("/ns1/")), Some("ns1"));
    }

    #[test]
    fn test_compose() {
        assert_eq!(compose(Some("a"), "b"), "a/b");
        assert_eq!(compose(Some("a/"), "/b/c/"), "a/b/c");
        assert_eq!(compose(Some(""), "b"), "b");
        assert_eq!(compose(None, "/b"), "b");
        assert_eq!(compose(Some("a"), "/"), "a");
    }
}
