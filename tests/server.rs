//! End-to-end: a real TCP socket in front of a `RequestHandler`.

use std::net::SocketAddr;
use std::sync::Once;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use switchyard::config::{Environment, Settings};
use switchyard::handler::RequestHandler;
use switchyard::http::{Response, StatusCode};
use switchyard::middleware::{Next, middleware_fn};
use switchyard::router::{RouteAttributes, Router, handler};
use switchyard::server::Server;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

async fn start() -> SocketAddr {
    init_tracing();

    let mut router = Router::new();
    router.middleware("logger");
    router
        .middleware_alias(
            "auth",
            middleware_fn(|ctx, next: Next| async move {
                match ctx.request().headers().get("authorization") {
                    Some(_) => next.run(ctx).await,
                    None => Ok(Response::redirect("/login")),
                }
            }),
        )
        .unwrap();
    router
        .get(
            "/hello/{name}",
            handler(|ctx| async move {
                let name = ctx.param("name").unwrap_or_default().to_owned();
                Ok(Response::new(StatusCode::Ok).body(format!("hello {name}")))
            }),
        )
        .unwrap();
    router
        .post(
            "/echo",
            handler(|ctx| async move {
                let value: serde_json::Value = ctx.json()?;
                Ok(Response::json(StatusCode::Created, &value)?)
            }),
        )
        .unwrap();
    router
        .group("admin", RouteAttributes::new().middleware("auth"), |r| {
            r.get(
                "dashboard",
                handler(|_ctx| async { Ok(Response::new(StatusCode::Ok).body("secret")) }),
            )?;
            Ok(())
        })
        .unwrap();

    let app = RequestHandler::new(router, Settings::for_environment(Environment::Production)).unwrap();
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.serve(app));
    addr
}

async fn send(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn routes_parameters_over_tcp() {
    let addr = start().await;
    let response = send(
        addr,
        "GET /hello/world HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.ends_with("hello world"), "{response}");
}

#[tokio::test]
async fn json_body_round_trip() {
    let addr = start().await;
    let body = r#"{"name":"ada"}"#;
    let raw = format!(
        "POST /echo HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let response = send(addr, &raw).await;
    assert!(response.starts_with("HTTP/1.1 201 Created\r\n"), "{response}");
    assert!(response.ends_with(body), "{response}");
}

#[tokio::test]
async fn unauthenticated_group_request_is_redirected() {
    let addr = start().await;
    let response = send(
        addr,
        "GET /admin/dashboard HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 302 Found\r\n"), "{response}");
    assert!(response.contains("Location: /login\r\n"), "{response}");
    assert!(!response.contains("secret"));

    let response = send(
        addr,
        "GET /admin/dashboard HTTP/1.1\r\nHost: localhost\r\nAuthorization: Bearer t\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.ends_with("secret"), "{response}");
}

#[tokio::test]
async fn routing_failures_become_status_responses() {
    let addr = start().await;
    let response = send(
        addr,
        "GET /missing HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"), "{response}");

    let response = send(
        addr,
        "DELETE /echo HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"), "{response}");
    assert!(response.contains("Allow: POST\r\n"), "{response}");
}

#[tokio::test]
async fn head_omits_the_body() {
    let addr = start().await;
    let response = send(
        addr,
        "HEAD /hello/x HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.ends_with("\r\n\r\n"), "{response}");
}
