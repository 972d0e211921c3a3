/// Join `path` onto `base` segment-wise and clean the result.
///
/// `join("/shop", "/")` is `/shop`, `join("/", "a//b/")` is `/a/b`.
pub fn join(base: &str, path: &str) -> String {
    clean(&format!("{}/{}", base, path))
}

/// Lexically normalize an absolute URL path: collapse repeated slashes,
/// resolve `.` and `..`, and drop any trailing slash (except for the root).
pub fn clean(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    let mut out = String::with_capacity(path.len() + 1);
    for seg in &segments {
        out.push('/');
        out.push_str(seg);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_normalizes_slashes() {
        assert_eq!(join("/", "/a"), "/a");
        assert_eq!(join("/shop", "/"), "/shop");
        assert_eq!(join("/shop/", "/cart/"), "/shop/cart");
        assert_eq!(join("/", "a//b/"), "/a/b");
        assert_eq!(join("/", "/"), "/");
    }

    #[test]
    fn clean_resolves_dots() {
        assert_eq!(clean("/a/./b/../c"), "/a/c");
        assert_eq!(clean("/../.."), "/");
        assert_eq!(clean(""), "/");
    }
}
