//! Minimal client speaking the same restricted HTTP/1.1 dialect.
//!
//! Requests are written the way the server parses them. Responses may be a
//! full response or a status-only abort followed by close; the latter is
//! reported through [`ClientResponse::connection_closed`].

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::Method;
use super::request::MAX_LINE;

/// Largest response body the client will buffer.
pub const MAX_RESPONSE_BODY: usize = 1024 * 1024;

const MAX_RESPONSE_HEADERS: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed response: {0}")]
    Malformed(&'static str),
    #[error("connection closed by peer")]
    Closed,
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response body too large: {0} bytes")]
    TooLarge(usize),
}

#[derive(Debug, Clone)]
pub struct ClientResponse {
    pub status: u16,
    pub reason: String,
    /// Lower-cased header names.
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    /// The server closed the connection after this response.
    pub connection_closed: bool,
}

impl ClientResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// One connection, sequential requests.
pub struct HttpClient<S> {
    stream: BufReader<S>,
    host: String,
    closed: bool,
}

impl<S> HttpClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, host: impl Into<String>) -> Self {
        Self {
            stream: BufReader::new(stream),
            host: host.into(),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    pub async fn get(&mut self, path: &str) -> Result<ClientResponse, ClientError> {
        self.request(Method::Get, path, None).await
    }

    pub async fn put_json<T: Serialize>(
        &mut self,
        path: &str,
        value: &T,
    ) -> Result<ClientResponse, ClientError> {
        let body = serde_json::to_vec(value)?;
        self.request(Method::Put, path, Some(body)).await
    }

    pub async fn post_json<T: Serialize>(
        &mut self,
        path: &str,
        value: &T,
    ) -> Result<ClientResponse, ClientError> {
        let body = serde_json::to_vec(value)?;
        self.request(Method::Post, path, Some(body)).await
    }

    pub async fn request(
        &mut self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<ClientResponse, ClientError> {
        if self.closed {
            return Err(ClientError::Closed);
        }

        let mut head = format!("{method} {path} HTTP/1.1\r\nHost: {}\r\n", self.host);
        if let Some(body) = &body {
            head.push_str("Content-Type: application/json\r\n");
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        head.push_str("\r\n");

        let mut wire = head.into_bytes();
        if let Some(body) = body {
            wire.extend_from_slice(&body);
        }
        self.send_raw(&wire).await?;
        self.read_response().await
    }

    /// Write bytes as-is.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        let stream = self.stream.get_mut();
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Read one response.
    pub async fn read_response(&mut self) -> Result<ClientResponse, ClientError> {
        let Some(status_line) = self.read_line().await? else {
            self.closed = true;
            return Err(ClientError::Closed);
        };
        let (status, reason) = parse_status_line(&status_line)?;

        let mut headers = BTreeMap::new();
        loop {
            let Some(line) = self.read_line().await? else {
                // Status-only abort.
                self.closed = true;
                return Ok(ClientResponse {
                    status,
                    reason,
                    headers,
                    body: Vec::new(),
                    connection_closed: true,
                });
            };
            if line.is_empty() {
                break;
            }
            if headers.len() >= MAX_RESPONSE_HEADERS {
                return Err(ClientError::Malformed("too many headers"));
            }
            let (name, value) = line
                .split_once(": ")
                .ok_or(ClientError::Malformed("bad header line"))?;
            headers.insert(name.to_ascii_lowercase(), value.to_string());
        }

        let length = match headers.get("content-length") {
            Some(value) => value
                .parse::<usize>()
                .map_err(|_| ClientError::Malformed("bad content-length"))?,
            None => 0,
        };
        if length > MAX_RESPONSE_BODY {
            return Err(ClientError::TooLarge(length));
        }
        let mut body = Vec::with_capacity(length);
        (&mut self.stream)
            .take(length as u64)
            .read_to_end(&mut body)
            .await?;
        if body.len() != length {
            self.closed = true;
            return Err(ClientError::Closed);
        }

        Ok(ClientResponse {
            status,
            reason,
            headers,
            body,
            connection_closed: false,
        })
    }

    async fn read_line(&mut self) -> Result<Option<String>, ClientError> {
        let mut buf = Vec::new();
        let n = (&mut self.stream)
            .take(MAX_LINE as u64)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if !buf.ends_with(b"\r\n") {
            return Err(ClientError::Malformed("bad line termination"));
        }
        buf.truncate(buf.len() - 2);
        String::from_utf8(buf)
            .map(Some)
            .map_err(|_| ClientError::Malformed("bad line encoding"))
    }
}

fn parse_status_line(line: &str) -> Result<(u16, String), ClientError> {
    let rest = line
        .strip_prefix("HTTP/1.1 ")
        .ok_or(ClientError::Malformed("bad status line"))?;
    let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
    let status = code
        .parse()
        .map_err(|_| ClientError::Malformed("bad status code"))?;
    Ok((status, reason.to_string()))
}
