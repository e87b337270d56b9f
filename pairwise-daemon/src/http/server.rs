//! Accept loop and per-connection request loop.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use super::{Abort, Request, RequestError, Response, read_request};
use crate::tls::{TlsConnectInfo, TlsServerConfig};

/// Default per-request I/O timeout.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-request timeout when serving inline.
pub const DEFAULT_INLINE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connections that don't complete the TLS handshake within this time are
/// dropped.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Application callback for validated requests.
///
/// Returning an [`Abort`] closes the connection after a status-only reply;
/// a [`Response`] keeps it open for the next request. Handlers run on the
/// blocking pool, so they may touch the filesystem directly.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: &Request, conn: &TlsConnectInfo) -> Result<Response, Abort>;
}

/// How accepted connections are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServeMode {
    /// One task per connection, looping over sequential requests.
    #[default]
    PerConnection,
    /// Connections are polled on the accept loop's own task, interleaved
    /// with each other and with accepting, under the shorter inline timeout.
    Inline,
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub mode: ServeMode,
    pub io_timeout: Duration,
    pub inline_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Value of the `server` response header.
    pub server_name: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            mode: ServeMode::default(),
            io_timeout: DEFAULT_IO_TIMEOUT,
            inline_timeout: DEFAULT_INLINE_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            server_name: concat!("pairwise/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("refusing to serve without TLS on non-loopback address {addr}")]
    InsecureBind { addr: SocketAddr },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bound listener ready to serve `H`.
pub struct Server<H> {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    handler: Arc<H>,
    options: Arc<ServerOptions>,
}

impl<H: Handler> Server<H> {
    /// Bind a listener. Plain (non-TLS) serving is only allowed on loopback.
    pub async fn bind(
        addr: SocketAddr,
        tls: Option<TlsServerConfig>,
        handler: Arc<H>,
        options: ServerOptions,
    ) -> Result<Self, ServerError> {
        if tls.is_none() && !addr.ip().is_loopback() {
            return Err(ServerError::InsecureBind { addr });
        }
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        tracing::info!(
            addr = %listener.local_addr()?,
            tls = tls.is_some(),
            mode = ?options.mode,
            "Listener bound"
        );

        Ok(Self {
            listener,
            tls: tls.map(|config| TlsAcceptor::from(config.into_rustls_config())),
            handler,
            options: Arc::new(options),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` resolves. Spawned connections keep running to
    /// completion; inline connections are dropped with the loop.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut inline: FuturesUnordered<BoxFuture<'static, ()>> = FuturesUnordered::new();
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(
                        inline_connections = inline.len(),
                        "Shutdown signal received, stopping accept loop"
                    );
                    return Ok(());
                }
                Some(()) = inline.next(), if !inline.is_empty() => {}
                result = self.listener.accept() => {
                    let (tcp, peer_addr) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!(error = %e, "TCP accept failed");
                            continue;
                        }
                    };
                    let tls = self.tls.clone();
                    let handler = self.handler.clone();
                    let options = self.options.clone();
                    match self.options.mode {
                        ServeMode::PerConnection => {
                            let io_timeout = options.io_timeout;
                            tokio::spawn(async move {
                                accept_connection(tcp, peer_addr, tls, handler, options, io_timeout).await;
                            });
                        }
                        ServeMode::Inline => {
                            let io_timeout = options.inline_timeout;
                            inline.push(
                                accept_connection(tcp, peer_addr, tls, handler, options, io_timeout)
                                    .boxed(),
                            );
                        }
                    }
                }
            }
        }
    }

    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }
}

async fn accept_connection<H: Handler>(
    tcp: TcpStream,
    peer_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    handler: Arc<H>,
    options: Arc<ServerOptions>,
    io_timeout: Duration,
) {
    let Some(acceptor) = tls else {
        let info = TlsConnectInfo::plain(Some(peer_addr));
        serve_connection(tcp, &info, handler, &options.server_name, io_timeout).await;
        return;
    };

    match tokio::time::timeout(options.handshake_timeout, acceptor.accept(tcp)).await {
        Ok(Ok(stream)) => {
            let info = TlsConnectInfo::from_peer_certificates(
                Some(peer_addr),
                stream.get_ref().1.peer_certificates(),
            );
            tracing::debug!(
                peer = %peer_addr,
                peer_id = ?info.peer_id,
                "TLS handshake successful"
            );
            serve_connection(stream, &info, handler, &options.server_name, io_timeout).await;
        }
        Ok(Err(e)) => {
            tracing::debug!(peer = %peer_addr, error = %e, "TLS handshake failed");
        }
        Err(_) => {
            tracing::warn!(
                peer = %peer_addr,
                timeout_secs = ?options.handshake_timeout,
                "TLS handshake timed out"
            );
        }
    }
}

/// Serve sequential requests on one connection until it closes, idles out
/// or a request aborts.
pub async fn serve_connection<S, H>(
    stream: S,
    info: &TlsConnectInfo,
    handler: Arc<H>,
    server_name: &str,
    io_timeout: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler + ?Sized,
{
    let mut stream = BufReader::new(stream);
    let peer = info.remote_addr;
    let info = Arc::new(info.clone());

    loop {
        let request = match tokio::time::timeout(io_timeout, read_request(&mut stream)).await {
            Err(_) => {
                tracing::debug!(peer = ?peer, "Connection idle, dropping");
                return;
            }
            Ok(Ok(None)) => return,
            Ok(Ok(Some(request))) => request,
            Ok(Err(RequestError::Abort(abort))) => {
                tracing::debug!(peer = ?peer, status = abort.status(), reason = abort.reason(), "Request aborted");
                write_abort(&mut stream, abort, io_timeout).await;
                return;
            }
            Ok(Err(RequestError::Io(e))) => {
                tracing::debug!(peer = ?peer, error = %e, "Connection read failed");
                return;
            }
        };

        let handled = tokio::task::spawn_blocking({
            let handler = handler.clone();
            let info = info.clone();
            move || {
                let outcome = handler.handle(&request, &info);
                (request, outcome)
            }
        })
        .await;
        let (request, outcome) = match handled {
            Ok(handled) => handled,
            Err(e) => {
                tracing::error!(peer = ?peer, error = %e, "Handler task failed");
                write_abort(&mut stream, Abort::Internal, io_timeout).await;
                return;
            }
        };

        let response = match outcome {
            Ok(response) => response,
            Err(abort) => {
                tracing::debug!(
                    peer = ?peer,
                    method = %request.method,
                    path = %request.path,
                    status = abort.status(),
                    "Handler aborted request"
                );
                write_abort(&mut stream, abort, io_timeout).await;
                return;
            }
        };

        tracing::debug!(
            peer = ?peer,
            method = %request.method,
            path = %request.path,
            status = response.status,
            "Request served"
        );
        let wire = response.serialize(server_name);
        let written = tokio::time::timeout(io_timeout, async {
            stream.write_all(&wire).await?;
            stream.flush().await
        })
        .await;
        if !matches!(written, Ok(Ok(()))) {
            tracing::debug!(peer = ?peer, "Response write failed, dropping connection");
            return;
        }
    }
}

async fn write_abort<S>(stream: &mut S, abort: Abort, io_timeout: Duration)
where
    S: AsyncWrite + Unpin,
{
    let line = abort.status_line();
    let _ = tokio::time::timeout(io_timeout, async {
        stream.write_all(line.as_bytes()).await?;
        stream.flush().await?;
        stream.shutdown().await
    })
    .await;
}
