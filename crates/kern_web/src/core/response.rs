use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::BoxStream;
use http::{HeaderMap, HeaderValue, StatusCode};
use tokio::io::AsyncReadExt;

/// Response sink handed to modules and route handlers.
///
/// Handlers write into it instead of returning a fresh value, so several
/// handlers along a `next` chain can contribute to the same response.
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

pub enum Body {
    Bytes(BytesMut),
    Stream(BoxStream<'static, Bytes>),
}

impl Default for Response {
    fn default() -> Self {
        Self::new(200)
    }
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: HeaderMap::new(),
            body: Body::Bytes(BytesMut::new()),
        }
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    }

    /// Append a chunk to the body. Writing after a stream body chains the
    /// chunk behind the stream.
    pub fn write<B: AsRef<[u8]>>(&mut self, chunk: B) {
        match &mut self.body {
            Body::Bytes(buf) => buf.extend_from_slice(chunk.as_ref()),
            Body::Stream(_) => {
                let tail = Bytes::copy_from_slice(chunk.as_ref());
                let prev = std::mem::replace(&mut self.body, Body::Bytes(BytesMut::new()));
                if let Body::Stream(s) = prev {
                    self.body = Body::Stream(s.chain(futures::stream::once(async move { tail })).boxed());
                }
            }
        }
    }

    /// Drop everything written so far.
    pub fn clear_body(&mut self) {
        self.body = Body::Bytes(BytesMut::new());
    }

    /// Buffered body bytes, `None` for streaming bodies.
    pub fn body_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            Body::Bytes(b) => Some(b.as_ref()),
            Body::Stream(_) => None,
        }
    }

    pub fn content_type(&mut self, value: &str) {
        self.set_header(http::header::CONTENT_TYPE, value);
    }

    pub fn text<S: AsRef<str>>(&mut self, status: u16, body: S) {
        self.set_status(status);
        self.headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.write(body.as_ref());
    }

    pub fn html<S: AsRef<str>>(&mut self, status: u16, body: S) {
        self.set_status(status);
        self.headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        self.write(body.as_ref());
    }

    pub fn json(&mut self, status: u16, value: impl serde::Serialize) {
        match serde_json::to_vec(&value) {
            Ok(bytes) => {
                self.set_status(status);
                self.headers.insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                self.write(bytes);
            }
            Err(e) => {
                tracing::error!(error = %e, "JSON serialization failed");
                self.status = StatusCode::INTERNAL_SERVER_ERROR;
            }
        }
    }

    /// Stream a file as the body. The file is not buffered in memory.
    pub fn file<P: AsRef<std::path::Path>>(&mut self, status: u16, path: P) {
        self.set_status(status);
        let ct = mime_guess::from_path(path.as_ref()).first_or_octet_stream();
        self.set_header(http::header::CONTENT_TYPE, ct.as_ref());

        if let Ok(meta) = std::fs::metadata(path.as_ref()) {
            self.set_header(http::header::CONTENT_LENGTH, meta.len().to_string());
        }

        let pathbuf = path.as_ref().to_path_buf();
        let stream = futures::stream::unfold(
            Some((None::<tokio::fs::File>, pathbuf)),
            |state| async move {
                let (opt_file, path) = state?;
                // opened lazily on first pull
                let mut file = match opt_file {
                    Some(f) => f,
                    None => match tokio::fs::File::open(&path).await {
                        Ok(f) => f,
                        Err(e) => {
                            tracing::error!(path = %path.display(), error = %e, "Cannot open file");
                            return None;
                        }
                    },
                };
                let mut buf = vec![0u8; 64 * 1024];
                match file.read(&mut buf).await {
                    Ok(0) => None,
                    Ok(n) => {
                        buf.truncate(n);
                        Some((Bytes::from(buf), Some((Some(file), path))))
                    }
                    Err(_) => None,
                }
            },
        );
        self.body = Body::Stream(Box::pin(stream));
    }

    pub fn set_header<K, V>(&mut self, k: K, v: V)
    where
        K: TryInto<http::HeaderName>,
        V: TryInto<HeaderValue>,
        K::Error: std::fmt::Debug,
        V::Error: std::fmt::Debug,
    {
        if let (Ok(key), Ok(value)) = (k.try_into(), v.try_into()) {
            self.headers.insert(key, value);
        }
    }

    /// Like [`set_header`](Self::set_header) but keeps existing values, e.g. for `set-cookie`.
    pub fn append_header<K, V>(&mut self, k: K, v: V)
    where
        K: TryInto<http::HeaderName>,
        V: TryInto<HeaderValue>,
        K::Error: std::fmt::Debug,
        V::Error: std::fmt::Debug,
    {
        if let (Ok(key), Ok(value)) = (k.try_into(), v.try_into()) {
            self.headers.append(key, value);
        }
    }

    pub fn header<K, V>(mut self, k: K, v: V) -> Self
    where
        K: TryInto<http::HeaderName>,
        V: TryInto<HeaderValue>,
        K::Error: std::fmt::Debug,
        V::Error: std::fmt::Debug,
    {
        self.set_header(k, v);
        self
    }
}

/// Minimal HTML escaping for text embedded in built-in pages.
pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn writes_accumulate() {
        let mut res = Response::default();
        res.write("A");
        res.write(b"B");
        assert_eq!(res.status.as_u16(), 200);
        assert_eq!(res.body_bytes(), Some(&b"AB"[..]));

        res.clear_body();
        assert_eq!(res.body_bytes(), Some(&b""[..]));
    }

    #[test]
    fn json_sets_content_type() {
        let v = json!({"a": 1, "b": "x"});
        let mut res = Response::default();
        res.json(201, &v);
        assert_eq!(res.status.as_u16(), 201);
        assert_eq!(
            res.headers
                .get(http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("application/json")
        );
        assert_eq!(res.body_bytes().unwrap(), serde_json::to_vec(&v).unwrap().as_slice());
    }

    #[test]
    fn html_and_text() {
        let mut res = Response::default();
        res.html(200, "<h1>ok</h1>");
        assert_eq!(
            res.headers
                .get(http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("text/html; charset=utf-8")
        );
        // content-length is set by App::serve, not here
        assert!(!res.headers.contains_key(http::header::CONTENT_LENGTH));

        let mut res = Response::default();
        res.text(404, "gone");
        assert_eq!(res.status.as_u16(), 404);
        assert_eq!(res.body_bytes(), Some(&b"gone"[..]));
    }

    #[tokio::test]
    async fn write_after_stream_chains() {
        let mut res = Response::default();
        res.body = Body::Stream(futures::stream::iter(vec![Bytes::from_static(b"s1")]).boxed());
        res.write("s2");
        let Body::Stream(s) = res.body else {
            panic!("expected stream body");
        };
        let chunks: Vec<Bytes> = s.collect().await;
        assert_eq!(chunks.concat(), b"s1s2");
    }

    #[test]
    fn append_header_keeps_values() {
        let mut res = Response::default();
        res.append_header("set-cookie", "a=1");
        res.append_header("set-cookie", "b=2");
        assert_eq!(res.headers.get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }
}
