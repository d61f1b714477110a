//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a handler function.
//! Supports HTTP/1.1 persistent connections (keep-alive) out of the box.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The HTTP server.
///
/// Binds to a TCP address and dispatches incoming HTTP/1.1 requests to a
/// handler function, typically [`Pipeline::handle`](crate::middleware::Pipeline::handle).
///
/// # Examples
///
/// ```rust,no_run
/// use rttp_cache::server::Server;
/// use rttp_cache::http::{Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.run(|_req| async {
///         Response::new(StatusCode::Ok).body("Hello!")
///     }).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts accepting connections and dispatching requests to `handler`.
    ///
    /// Runs until the process is terminated. See [`run_with_shutdown`](Self::run_with_shutdown).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.run_with_shutdown(handler, std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// The handler is wrapped in an [`Arc`] and shared across all spawned Tokio
    /// tasks. Connections already in flight when `shutdown` fires are left to
    /// finish on their own tasks.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run_with_shutdown<H, F, S>(self, handler: H, shutdown: S) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
        S: Future<Output = ()> + Send,
    {
        let handler = Arc::new(handler);
        tokio::pin!(shutdown);
        info!(address = %self.local_addr, "listening");

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!(address = %self.local_addr, "shutdown signal received");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// What the read buffer holds after one more read.
enum Frame {
    /// A full request and the number of buffered bytes it spans.
    Ready(Request, usize),
    Partial,
    /// The connection is answered with this response and closed.
    Reject(Response),
}

fn next_frame(buf: &[u8]) -> Frame {
    if buf.len() > MAX_REQUEST_SIZE {
        return Frame::Reject(
            Response::new(StatusCode::PayloadTooLarge).body("Request entity too large"),
        );
    }
    match Request::parse(buf) {
        Ok((request, head_len)) => {
            let span = head_len + request.content_length().unwrap_or(0);
            if buf.len() < span {
                Frame::Partial
            } else {
                Frame::Ready(request, span)
            }
        }
        Err(RequestError::Incomplete) => Frame::Partial,
        Err(e) => Frame::Reject(
            Response::new(StatusCode::BadRequest).body(format!("Bad Request: {e}")),
        ),
    }
}

/// Serves requests from one connection until the peer closes it or a request
/// asks for `Connection: close`.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    'read: while stream.read_buf(&mut buf).await? > 0 {
        loop {
            let (request, span) = match next_frame(&buf) {
                Frame::Partial => continue 'read,
                Frame::Reject(response) => {
                    warn!(peer = %peer_addr, status = response.status().as_u16(), "rejecting request");
                    stream
                        .write_all(&response.keep_alive(false).into_bytes())
                        .await?;
                    return Ok(());
                }
                Frame::Ready(request, span) => (request, span),
            };

            let keep_alive = request.is_keep_alive();
            debug!(peer = %peer_addr, method = %request.method(), uri = %request.uri(), "dispatching");

            let response = handler(request).await.keep_alive(keep_alive);
            stream.write_all(&response.into_bytes()).await?;
            stream.flush().await?;
            let _ = buf.split_to(span);

            if !keep_alive {
                break 'read;
            }
        }
    }

    debug!(peer = %peer_addr, "connection closed");
    Ok(())
}
