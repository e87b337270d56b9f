//! Response records and their wire form.

use std::collections::BTreeMap;

use serde::Serialize;

/// A clean (connection-preserving) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub reason: &'static str,
    headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    pub fn not_found() -> Self {
        Self::new(404, "Not Found")
    }

    pub fn too_early() -> Self {
        Self::new(425, "Too Early")
    }

    /// 200 with a JSON body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::ok()
            .header("Content-Type", "application/json")
            .body(body))
    }

    /// Set a header. Names are case-insensitive; the last write wins.
    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Wire bytes: status line, sorted headers, blank line, body.
    ///
    /// Adds `server` and `content-length` when absent.
    ///
    /// # Panics
    ///
    /// If a handler declared a `content-length` that differs from the body.
    pub fn serialize(&self, server_name: &str) -> Vec<u8> {
        let mut headers = self.headers.clone();
        headers
            .entry("server".to_string())
            .or_insert_with(|| server_name.to_string());
        let length = headers
            .entry("content-length".to_string())
            .or_insert_with(|| self.body.len().to_string());
        assert_eq!(
            length.parse::<usize>().ok(),
            Some(self.body.len()),
            "declared content-length does not match body"
        );

        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason).into_bytes();
        for (name, value) in &headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_adds_defaults() {
        let wire = Response::ok().body("hi").serialize("pairwise");
        assert_eq!(
            wire,
            b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nserver: pairwise\r\n\r\nhi"
        );
    }

    #[test]
    fn test_headers_lowercased_sorted_last_wins() {
        let wire = Response::not_found()
            .header("X-Zeta", "1")
            .header("Server", "custom")
            .header("x-zeta", "2")
            .serialize("pairwise");
        let text = String::from_utf8(wire).unwrap();
        assert_eq!(
            text,
            "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nserver: custom\r\nx-zeta: 2\r\n\r\n"
        );
    }

    #[test]
    fn test_json() {
        let response = Response::json(&serde_json::json!({"ok": true})).unwrap();
        assert_eq!(response.get_header("Content-Type"), Some("application/json"));
        assert_eq!(response.body, br#"{"ok":true}"#);
    }

    #[test]
    #[should_panic(expected = "content-length")]
    fn test_content_length_mismatch_panics() {
        Response::ok()
            .header("Content-Length", "5")
            .body("abc")
            .serialize("pairwise");
    }

    #[test]
    fn test_matching_content_length_kept() {
        let wire = Response::ok()
            .header("Content-Length", "3")
            .body("abc")
            .serialize("pairwise");
        assert!(wire.ends_with(b"content-length: 3\r\nserver: pairwise\r\n\r\nabc"));
    }
}
