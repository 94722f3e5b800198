//! Minimal tokio TCP host for a [`RequestHandler`].
//!
//! Reads HTTP/1.1 requests off each connection, answers them through
//! [`RequestHandler::respond`] and honours keep-alive. Routing never depends
//! on this module; it exists so an application is runnable end to end.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::handler::RequestHandler;
use crate::http::{Method, Request, Response, StatusCode, request::RequestError};

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

/// Largest request (head plus body) buffered before answering 413.
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

static CONNECTION_IDS: AtomicU64 = AtomicU64::new(1);

/// A bound TCP listener.
///
/// # Examples
///
/// ```rust,no_run
/// use switchyard::config::Settings;
/// use switchyard::handler::RequestHandler;
/// use switchyard::http::{Response, StatusCode};
/// use switchyard::router::{Router, handler};
/// use switchyard::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut router = Router::new();
///     router.middleware("logger");
///     router.get("/", handler(|_ctx| async { Ok(Response::new(StatusCode::Ok).body("Hello!")) }))?;
///
///     let app = RequestHandler::new(router, Settings::from_env()?)?;
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.serve_until(app, async { let _ = tokio::signal::ctrl_c().await; }).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind to `addr` (`"127.0.0.1:0"` picks a free port).
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] when the address cannot be bound.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve `app` until the process exits.
    pub async fn serve(self, app: RequestHandler) -> Result<(), ServerError> {
        self.serve_until(app, std::future::pending()).await
    }

    /// Serve `app` until `shutdown` resolves.
    ///
    /// Once `shutdown` fires no new connections are accepted; connections
    /// already open finish on their own tasks.
    pub async fn serve_until<S>(self, app: RequestHandler, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let app = Arc::new(app);
        info!(address = %self.local_addr, routes = app.table().len(), "switchyard listening");

        tokio::pin!(shutdown);
        loop {
            let accepted = tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            let id = CONNECTION_IDS.fetch_add(1, Ordering::Relaxed);
            debug!(connection = id, peer = %peer, "connection accepted");
            let app = Arc::clone(&app);
            tokio::spawn(async move {
                if let Err(e) = Connection::new(stream, id).run(&app).await {
                    warn!(connection = id, error = %e, "connection closed with error");
                }
            });
        }

        info!(address = %self.local_addr, "switchyard stopped accepting connections");
        Ok(())
    }
}

/// What one read cycle produced.
enum Incoming {
    Request(Request),
    /// The peer hung up between requests.
    Closed,
    /// The bytes cannot become a request; answer and hang up.
    Rejected(Response),
}

struct Connection {
    stream: TcpStream,
    buf: BytesMut,
    id: u64,
}

impl Connection {
    fn new(stream: TcpStream, id: u64) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(INITIAL_BUF_SIZE),
            id,
        }
    }

    async fn run(mut self, app: &RequestHandler) -> std::io::Result<()> {
        loop {
            let request = match self.read_request().await? {
                Incoming::Request(request) => request,
                Incoming::Closed => {
                    debug!(connection = self.id, "connection closed by peer");
                    return Ok(());
                }
                Incoming::Rejected(response) => {
                    self.stream.write_all(&response.keep_alive(false).into_bytes()).await?;
                    return Ok(());
                }
            };

            let keep_alive = request.is_keep_alive();
            let head = *request.method() == Method::Head;
            debug!(
                connection = self.id,
                method = %request.method(),
                path = %request.path(),
                "dispatching request"
            );

            let response = app.respond(request).await.keep_alive(keep_alive);
            self.write_response(response, head).await?;

            if !keep_alive {
                return Ok(());
            }
        }
    }

    // Buffer until one full request (head plus Content-Length body) is in,
    // then split it off so pipelined bytes stay for the next cycle.
    async fn read_request(&mut self) -> std::io::Result<Incoming> {
        loop {
            if !self.buf.is_empty() {
                match Request::parse(&self.buf) {
                    Ok((request, body_offset)) => {
                        let end = match body_offset.checked_add(request.content_length().unwrap_or(0)) {
                            Some(end) if end <= MAX_REQUEST_SIZE => end,
                            _ => return Ok(Incoming::Rejected(too_large())),
                        };
                        if self.buf.len() >= end {
                            let raw = self.buf.split_to(end);
                            let body = Bytes::copy_from_slice(&raw[body_offset..]);
                            return Ok(Incoming::Request(request.with_body(body)));
                        }
                    }
                    Err(RequestError::Incomplete) => {}
                    Err(e) => {
                        warn!(connection = self.id, error = %e, "malformed request");
                        return Ok(Incoming::Rejected(
                            Response::new(StatusCode::BadRequest).body(format!("Bad Request: {e}")),
                        ));
                    }
                }
                if self.buf.len() > MAX_REQUEST_SIZE {
                    return Ok(Incoming::Rejected(too_large()));
                }
            }

            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Ok(Incoming::Closed);
            }
        }
    }

    async fn write_response(&mut self, response: Response, head: bool) -> std::io::Result<()> {
        let mut bytes = response.into_bytes();
        // HEAD answers carry the headers a GET would, without the body.
        if head {
            if let Some(end) = header_end(&bytes) {
                bytes.truncate(end);
            }
        }
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await
    }
}

fn too_large() -> Response {
    Response::new(StatusCode::PayloadTooLarge).body("Request entity too large")
}

fn header_end(bytes: &[u8]) -> Option<usize> {
    bytes.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::router::Router;

    #[test]
    fn header_end_finds_blank_line() {
        assert_eq!(header_end(b"HTTP/1.1 200 OK\r\nA: b\r\n\r\nbody"), Some(25));
        assert_eq!(header_end(b"HTTP/1.1 200 OK\r\n"), None);
    }

    #[tokio::test]
    async fn bind_reports_local_address() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn bind_failure_names_the_address() {
        let err = Server::bind("not-an-address").await.err().unwrap();
        assert!(matches!(err, ServerError::Bind { ref addr, .. } if addr == "not-an-address"));
    }

    #[tokio::test]
    async fn serve_until_returns_after_shutdown() {
        let app = RequestHandler::new(Router::new(), Settings::default()).unwrap();
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let task = tokio::spawn(server.serve_until(app, async move {
            let _ = rx.await;
        }));
        tx.send(()).unwrap();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn malformed_request_gets_400_and_close() {
        let app = RequestHandler::new(Router::new(), Settings::default()).unwrap();
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        tokio::spawn(server.serve(app));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\nBad Header\r\n\r\n").await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{text}");
        assert!(text.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn oversized_content_length_gets_413() {
        let app = RequestHandler::new(Router::new(), Settings::default()).unwrap();
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        tokio::spawn(server.serve(app));

        for length in [u64::MAX.to_string(), (MAX_REQUEST_SIZE + 1).to_string()] {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let raw = format!("POST /x HTTP/1.1\r\nHost: localhost\r\nContent-Length: {length}\r\n\r\n");
            stream.write_all(raw.as_bytes()).await.unwrap();
            let mut out = Vec::new();
            stream.read_to_end(&mut out).await.unwrap();
            let text = String::from_utf8(out).unwrap();
            assert!(text.starts_with("HTTP/1.1 413 Payload Too Large\r\n"), "{length}: {text}");
        }
    }
}
