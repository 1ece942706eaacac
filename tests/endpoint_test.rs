//! Simulated endpoints through the router.

mod common;

use axum::http::{Method, StatusCode};
use axum::routing::get;
use axum::Router;
use dynamic_mock_server::endpoint::{server_signature, SERVER_SIGNATURE_HEADER};

use common::{send, setup, spawn_upstream};

const CONFIG: &str = r#"
endpoints:
  - name: blue
    request:
      path: /tenant
      header:
        X-Tenant: blue
    response:
      body: '{"tenant": "blue"}'
  - name: red
    request:
      path: /tenant
      header:
        X-Tenant: red
    response:
      statusCode: 202
      body: '{"tenant": "red"}'
  - name: repo
    request:
      path: /repos/{owner}/{name}
      method: GET,PUT
    response:
      header:
        Content-Type: application/json
        X-Owner: '{{param.owner}}'
      body: '{"full": "{{param.owner}}/{{param.name}}", "host": "{{param.Host}}", "method": "{{request.method}}"}'
  - name: logo
    request:
      path: /logo
    response:
      encoder: base64
      body: aGVsbG8gd29ybGQ=
"#;

#[tokio::test]
async fn test_header_disambiguation() {
    let (_server, router) = setup(CONFIG, "/mock").await;

    let reply = send(&router, Method::GET, "/mock/tenant", &[("X-Tenant", "blue")], "").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.text(), r#"{"tenant": "blue"}"#);

    let reply = send(&router, Method::GET, "/mock/tenant", &[("x-tenant", "red")], "").await;
    assert_eq!(reply.status, StatusCode::ACCEPTED);
    assert_eq!(reply.text(), r#"{"tenant": "red"}"#);

    let reply = send(&router, Method::GET, "/mock/tenant", &[], "").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    let reply = send(&router, Method::GET, "/mock/tenant", &[("X-Tenant", "green")], "").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_templated_response() {
    let (_server, router) = setup(CONFIG, "/mock").await;

    let reply = send(
        &router,
        Method::PUT,
        "/mock/repos/acme/widgets",
        &[("Host", "localhost:6060")],
        "",
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.headers["x-owner"], "acme");
    assert_eq!(reply.headers["content-type"], "application/json");
    assert_eq!(
        reply.headers[SERVER_SIGNATURE_HEADER],
        server_signature().as_str()
    );
    let body = reply.json();
    assert_eq!(body["full"], "acme/widgets");
    assert_eq!(body["host"], "localhost:6060");
    assert_eq!(body["method"], "GET,PUT");
    assert_eq!(
        reply.headers["content-length"],
        reply.body.len().to_string().as_str()
    );

    let reply = send(&router, Method::DELETE, "/mock/repos/a/b", &[], "").await;
    assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_base64_body() {
    let (_server, router) = setup(CONFIG, "/mock").await;
    let reply = send(&router, Method::GET, "/mock/logo", &[], "").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.text(), "hello world");
}

#[tokio::test]
async fn test_fetch_url_body() {
    let upstream = spawn_upstream(Router::new().route("/hello", get(|| async { "from upstream" }))).await;
    let config = format!(
        r#"
endpoints:
  - name: fetched
    request:
      path: /fetched
    response:
      encoder: url
      body: http://{upstream}/hello
  - name: broken
    request:
      path: /broken
    response:
      encoder: fetch-url
      body: http://127.0.0.1:1/nothing
"#
    );
    let (_server, router) = setup(&config, "/mock").await;

    let reply = send(&router, Method::GET, "/mock/fetched", &[], "").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.text(), "from upstream");

    let reply = send(&router, Method::GET, "/mock/broken", &[], "").await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_concurrent_requests_render_their_own_params() {
    let (_server, router) = setup(CONFIG, "/mock").await;

    let requests = (0..20).map(|i| {
        let router = router.clone();
        tokio::spawn(async move {
            let uri = format!("/mock/repos/owner{i}/repo{i}");
            let reply = send(&router, Method::GET, &uri, &[], "").await;
            (i, reply.json())
        })
    });
    for handle in requests.collect::<Vec<_>>() {
        let (i, body) = handle.await.unwrap();
        assert_eq!(body["full"], format!("owner{i}/repo{i}"));
    }
}
