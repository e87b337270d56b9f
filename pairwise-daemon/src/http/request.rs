//! Bounded request parsing.
//!
//! The parser owns every size limit. A handler only ever sees a request
//! whose line, headers and body were read within bounds and validated.

use std::collections::BTreeMap;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::Abort;

/// Maximum request or header line, CRLF included.
pub const MAX_LINE: usize = 4096;

/// Maximum number of header lines.
pub const MAX_HEADERS: usize = 10;

/// Maximum request body.
pub const MAX_BODY: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Put,
    Post,
    Delete,
}

impl Method {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "GET" => Some(Method::Get),
            "HEAD" => Some(Method::Head),
            "PUT" => Some(Method::Put),
            "POST" => Some(Method::Post),
            "DELETE" => Some(Method::Delete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }

    fn has_body(self) -> bool {
        matches!(self, Method::Put | Method::Post)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request headers keyed CGI-style: `CONTENT_TYPE`, `CONTENT_LENGTH`, and
/// `HTTP_<NAME>` for everything else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get("CONTENT_TYPE")
    }

    pub fn content_length(&self) -> Option<&str> {
        self.get("CONTENT_LENGTH")
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn insert(&mut self, name: &str, value: &str) -> Result<(), Abort> {
        let key = header_key(name)?;
        if self.0.contains_key(&key) {
            return Err(Abort::DuplicateHeader);
        }
        self.0.insert(key, value.to_string());
        Ok(())
    }
}

/// A validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: Headers,
    pub body: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("request aborted: {0}")]
    Abort(#[from] Abort),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read one request. `Ok(None)` means the peer closed the connection
/// cleanly before sending a request line.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Request>, RequestError>
where
    R: AsyncBufRead + Unpin,
{
    let Some(line) = read_line(reader, Abort::RequestLineTooLong).await? else {
        return Ok(None);
    };
    let (method, path, query) = parse_request_line(&line)?;

    let mut headers = Headers::default();
    let mut count = 0;
    loop {
        let Some(line) = read_line(reader, Abort::HeaderLineTooLong).await? else {
            return Err(unexpected_eof().into());
        };
        if line.is_empty() {
            break;
        }
        count += 1;
        if count > MAX_HEADERS {
            return Err(Abort::TooManyHeaders.into());
        }
        let (name, value) = parse_header_line(&line)?;
        headers.insert(name, value)?;
    }

    let body = read_body(reader, method, &headers).await?;

    Ok(Some(Request {
        method,
        path,
        query,
        headers,
        body,
    }))
}

fn unexpected_eof() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed mid-request")
}

/// Read a CRLF-terminated line of at most [`MAX_LINE`] bytes and return it
/// without the terminator.
async fn read_line<R>(reader: &mut R, too_long: Abort) -> Result<Option<String>, RequestError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }

    if buf.last() != Some(&b'\n') {
        if buf.len() >= MAX_LINE {
            return Err(too_long.into());
        }
        return Err(Abort::BadLineTermination.into());
    }
    buf.pop();
    if buf.pop() != Some(b'\r') || buf.contains(&b'\r') {
        return Err(Abort::BadLineTermination.into());
    }

    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| Abort::BadLineEncoding.into())
}

fn parse_request_line(line: &str) -> Result<(Method, String, Option<String>), Abort> {
    let tokens: Vec<&str> = line.split(' ').collect();
    let [method, uri, protocol] = tokens.as_slice() else {
        return Err(Abort::BadRequestLine);
    };
    if method.is_empty() || uri.is_empty() || protocol.is_empty() {
        return Err(Abort::BadRequestLine);
    }
    if *protocol != "HTTP/1.1" {
        return Err(Abort::VersionNotSupported);
    }
    let method = Method::parse(method).ok_or(Abort::MethodNotAllowed)?;

    if !uri.starts_with('/') {
        return Err(Abort::BadRequestPath);
    }
    if uri.contains("..") {
        return Err(Abort::NaughtyPath);
    }
    let (path, query) = match uri.split_once('?') {
        Some((_, query)) if query.contains('?') => return Err(Abort::BadRequestPath),
        Some((path, query)) => (path, Some(query.to_string())),
        None => (*uri, None),
    };

    Ok((method, path.to_string(), query))
}

fn parse_header_line(line: &str) -> Result<(&str, &str), Abort> {
    let (name, rest) = line.split_once(':').ok_or(Abort::BadHeaderLine)?;
    let value = rest.strip_prefix(' ').ok_or(Abort::BadHeaderLine)?;
    if name.is_empty() || value.starts_with(' ') {
        return Err(Abort::BadHeaderLine);
    }
    Ok((name, value))
}

fn header_key(name: &str) -> Result<String, Abort> {
    if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
        return Err(Abort::BadHeaderName);
    }
    let key = name.to_ascii_uppercase().replace('-', "_");
    match key.as_str() {
        "CONTENT_TYPE" | "CONTENT_LENGTH" => Ok(key),
        _ => Ok(format!("HTTP_{key}")),
    }
}

async fn read_body<R>(reader: &mut R, method: Method, headers: &Headers) -> Result<Vec<u8>, RequestError>
where
    R: AsyncBufRead + Unpin,
{
    let declared = headers.content_length();
    if !method.has_body() {
        return match declared {
            Some(_) => Err(Abort::UnexpectedBody.into()),
            None => Ok(Vec::new()),
        };
    }

    let declared = declared.ok_or(Abort::LengthRequired)?;
    if declared.is_empty() || !declared.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Abort::BadContentLength.into());
    }
    let length: usize = declared.parse().map_err(|_| Abort::BadContentLength)?;
    if length > MAX_BODY {
        return Err(Abort::BodyTooLarge.into());
    }

    let mut body = Vec::with_capacity(length);
    (&mut *reader).take(length as u64).read_to_end(&mut body).await?;
    if body.len() != length {
        return Err(unexpected_eof().into());
    }
    Ok(body)
}
