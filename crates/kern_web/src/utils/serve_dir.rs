use std::path::PathBuf;

use async_trait::async_trait;

use crate::core::{Handler, Next, Request, Response};
use crate::error::WebError;

/// Serve static files from a directory.
///
/// The matched route path is stripped from the request path and the
/// remainder is looked up below `root`. Directories serve their `index.html`.
///
/// Security: performs simple path normalization to prevent path traversal.
pub struct ServeDir {
    root: PathBuf,
    prefix: Option<String>,
}

impl ServeDir {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            prefix: None,
        }
    }

    /// Strip `prefix` instead of the matched route path, for use outside a
    /// [`Router`](crate::Router) route.
    pub fn strip_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

#[async_trait]
impl Handler for ServeDir {
    async fn handle(
        &self,
        res: &mut Response,
        req: &mut Request,
        next: &mut Next,
    ) -> Result<(), WebError> {
        let prefix = self.prefix.as_deref().unwrap_or(next.route_path());
        let rel = req.path().strip_prefix(prefix).unwrap_or("");
        let mut full = self.root.join(super::sanitize(rel));

        if let Ok(meta) = tokio::fs::metadata(&full).await
            && meta.is_dir()
        {
            full = full.join("index.html");
        }

        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => res.file(200, &full),
            _ => res.text(404, "Not Found"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Body, Method};
    use futures::StreamExt;

    async fn fetch(handler: &ServeDir, path: &str) -> (u16, Vec<u8>) {
        let mut res = Response::default();
        let mut req = Request::new(Method::GET, path);
        handler.handle(&mut res, &mut req, &mut Next::default()).await.unwrap();
        let body = match res.body {
            Body::Bytes(b) => b.to_vec(),
            Body::Stream(s) => s.collect::<Vec<_>>().await.concat(),
        };
        (res.status.as_u16(), body)
    }

    #[tokio::test]
    async fn serves_files_below_prefix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("css")).unwrap();
        std::fs::write(dir.path().join("css/site.css"), "body{}").unwrap();
        std::fs::write(dir.path().join("index.html"), "home").unwrap();

        let handler = ServeDir::new(dir.path()).strip_prefix("/assets");
        assert_eq!(fetch(&handler, "/assets/css/site.css").await, (200, b"body{}".to_vec()));
        assert_eq!(fetch(&handler, "/assets").await, (200, b"home".to_vec()));
        assert_eq!(fetch(&handler, "/assets/").await, (200, b"home".to_vec()));
        assert_eq!(fetch(&handler, "/assets/missing.js").await.0, 404);
    }

    #[tokio::test]
    async fn traversal_stays_inside_root() {
        let outer = tempfile::tempdir().unwrap();
        std::fs::write(outer.path().join("secret.txt"), "secret").unwrap();
        let root = outer.path().join("public");
        std::fs::create_dir(&root).unwrap();

        let handler = ServeDir::new(&root).strip_prefix("/pub");
        assert_eq!(fetch(&handler, "/pub/../secret.txt").await.0, 404);
    }
}
