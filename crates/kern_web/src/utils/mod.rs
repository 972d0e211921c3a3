mod hierarchy;
mod serve_dir;

pub use hierarchy::{Hierarchy, HierarchyDir, HierarchyError};
pub use serve_dir::ServeDir;

use std::path::{Component, Path, PathBuf};

/// Keep only the normal components of a request path, so it cannot escape
/// the directory it is joined onto.
pub(crate) fn sanitize(rel: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in Path::new(rel).components() {
        if let Component::Normal(s) = comp {
            out.push(s)
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_drops_traversal() {
        assert_eq!(sanitize("/../etc/passwd"), PathBuf::from("etc/passwd"));
        assert_eq!(sanitize("a/./b/../c"), PathBuf::from("a/b/c"));
        assert_eq!(sanitize(""), PathBuf::new());
    }
}
