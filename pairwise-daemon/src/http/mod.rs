//! Restricted HTTP/1.1 transport for the pairing exchange.
//!
//! Only the subset the pairing protocol needs: fixed-length bodies, no
//! chunking, no header repetition, sequential requests per connection.
//! Every malformed or oversized input is a status-only [`Abort`] followed by
//! close.

mod abort;
pub mod client;
mod request;
mod response;
mod server;

pub use abort::Abort;
pub use client::{ClientError, ClientResponse, HttpClient};
pub use request::{Headers, MAX_BODY, MAX_HEADERS, MAX_LINE, Method, Request, RequestError, read_request};
pub use response::Response;
pub use server::{
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_INLINE_TIMEOUT, DEFAULT_IO_TIMEOUT, Handler, ServeMode,
    Server, ServerError, ServerOptions, serve_connection,
};
