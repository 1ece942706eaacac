//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use dynamic_mock_server::{InMemoryReader, MockServer, ServerOptions};
use tokio::net::TcpListener;
use tower::ServiceExt;

/// A response collected from the router.
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// Build the router for `yaml` without binding a socket.
///
/// The server is returned so webhook tasks live as long as the test.
pub async fn setup(yaml: &str, prefix: &str) -> (MockServer, Router) {
    let mut server = MockServer::with_options(ServerOptions::default().with_host("127.0.0.1"));
    let router = server
        .setup_handler(&InMemoryReader::new(yaml), prefix)
        .await
        .unwrap();
    (server, router)
}

/// Send one request through the router.
pub async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> Reply {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    Reply {
        status,
        headers,
        body,
    }
}

/// Serve `router` on an ephemeral local port.
pub async fn spawn_upstream(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}
