//! Connection-fatal request failures.
//!
//! An abort writes only `HTTP/1.1 <status> <reason>\r\n` and closes the
//! connection. The reason strings are the only error text a peer ever sees.

/// Why a request was refused before (or instead of) a normal response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abort {
    // Framing
    BadLineTermination,
    BadLineEncoding,
    RequestLineTooLong,
    BadRequestLine,
    VersionNotSupported,
    MethodNotAllowed,
    BadRequestPath,
    NaughtyPath,
    HeaderLineTooLong,
    TooManyHeaders,
    BadHeaderLine,
    BadHeaderName,
    DuplicateHeader,
    LengthRequired,
    UnexpectedBody,
    BadContentLength,
    BodyTooLarge,

    // Application
    BadRequestOrder,
    BadRequestBody,
    Unauthorized,
    Forbidden,
    Internal,
}

impl Abort {
    pub fn status(self) -> u16 {
        match self {
            Abort::BadLineTermination
            | Abort::BadLineEncoding
            | Abort::BadRequestLine
            | Abort::BadRequestPath
            | Abort::NaughtyPath
            | Abort::BadHeaderLine
            | Abort::BadHeaderName
            | Abort::DuplicateHeader
            | Abort::UnexpectedBody
            | Abort::BadContentLength
            | Abort::BadRequestOrder
            | Abort::BadRequestBody => 400,
            Abort::Unauthorized => 401,
            Abort::Forbidden => 403,
            Abort::MethodNotAllowed => 405,
            Abort::LengthRequired => 411,
            Abort::BodyTooLarge => 413,
            Abort::RequestLineTooLong => 414,
            Abort::HeaderLineTooLong | Abort::TooManyHeaders => 431,
            Abort::Internal => 500,
            Abort::VersionNotSupported => 505,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Abort::BadLineTermination => "Bad Line Termination",
            Abort::BadLineEncoding => "Bad Line Encoding",
            Abort::RequestLineTooLong => "Request-URI Too Long",
            Abort::BadRequestLine => "Bad Request Line",
            Abort::VersionNotSupported => "HTTP Version Not Supported",
            Abort::MethodNotAllowed => "Method Not Allowed",
            Abort::BadRequestPath => "Bad Request Path",
            Abort::NaughtyPath => "Naughty Path",
            Abort::HeaderLineTooLong => "Request Header Fields Too Large",
            Abort::TooManyHeaders => "Too Many Request Headers",
            Abort::BadHeaderLine => "Bad Header Line",
            Abort::BadHeaderName => "Bad Header Name",
            Abort::DuplicateHeader => "Duplicate Header",
            Abort::LengthRequired => "Length Required",
            Abort::UnexpectedBody => "Unexpected Request Body",
            Abort::BadContentLength => "Bad Content Length",
            Abort::BodyTooLarge => "Request Entity Too Large",
            Abort::BadRequestOrder => "Bad Request Order",
            Abort::BadRequestBody => "Bad Request Body",
            Abort::Unauthorized => "Unauthorized",
            Abort::Forbidden => "Forbidden",
            Abort::Internal => "Internal Server Error",
        }
    }

    /// The full status line, CRLF included.
    pub fn status_line(self) -> String {
        format!("HTTP/1.1 {} {}\r\n", self.status(), self.reason())
    }
}

impl std::fmt::Display for Abort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status(), self.reason())
    }
}

impl std::error::Error for Abort {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line() {
        assert_eq!(
            Abort::RequestLineTooLong.status_line(),
            "HTTP/1.1 414 Request-URI Too Long\r\n"
        );
        assert_eq!(
            Abort::TooManyHeaders.status_line(),
            "HTTP/1.1 431 Too Many Request Headers\r\n"
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Abort::NaughtyPath.to_string(), "400 Naughty Path");
        assert_eq!(Abort::Unauthorized.to_string(), "401 Unauthorized");
    }
}
