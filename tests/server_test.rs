//! Server lifecycle over a real socket.

use std::io::Write;
use std::time::Duration;

use dynamic_mock_server::{
    Configuration, InMemoryReader, LocalFileReader, MockServer, ObjectReader, Reader,
    ServerOptions, DEFAULT_PREFIX,
};
use reqwest::StatusCode;
use serde_json::{json, Value};

const CONFIG: &str = r#"
collections:
  - name: team
    sample: '{"name": "someone"}'
    fields:
      - name: name
        kind: string
endpoints:
  - name: hello
    request:
      path: /hello
    response:
      body: hello
"#;

fn server() -> MockServer {
    MockServer::with_options(
        ServerOptions::default()
            .with_host("127.0.0.1")
            .with_shutdown_grace(Duration::from_secs(2)),
    )
}

fn url(server: &MockServer, path: &str) -> String {
    format!("http://127.0.0.1:{}{}{}", server.port(), DEFAULT_PREFIX, path)
}

#[tokio::test]
async fn test_serves_from_local_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    let reader = LocalFileReader::new(file.path());

    let mut server = server();
    server.start(&reader, DEFAULT_PREFIX).await.unwrap();
    assert_eq!(reader.data(), CONFIG.as_bytes());

    let client = reqwest::Client::new();
    let records: Value = client
        .get(url(&server, "/team"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(records, json!([{"name": "someone"}]));

    let response = client.get(url(&server, "/hello")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("mock-server"));
    assert_eq!(response.text().await.unwrap(), "hello");

    let hello = url(&server, "/hello");
    tokio::time::timeout(Duration::from_secs(5), server.stop())
        .await
        .unwrap()
        .unwrap();

    // The listener is closed after stop.
    assert!(client.get(hello).send().await.is_err());
}

#[tokio::test]
async fn test_setup_error_does_not_listen() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server();
    let result = server
        .start(&LocalFileReader::new(dir.path().join("missing.yaml")), DEFAULT_PREFIX)
        .await;
    assert!(result.is_err());
    assert!(server.local_addr().is_none());

    let result = server
        .start(
            &InMemoryReader::new("collections:\n  - name: a\n  - name: a\n"),
            DEFAULT_PREFIX,
        )
        .await;
    assert!(result.is_err());

    let result = server
        .start(
            &InMemoryReader::new("collections:\n  - name: a\n    sample: 'not json'\n"),
            DEFAULT_PREFIX,
        )
        .await;
    assert!(result.is_err());
    assert!(!server.is_running());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let mut server = server();
    server.enable_metrics();
    server
        .start(&InMemoryReader::new(CONFIG), DEFAULT_PREFIX)
        .await
        .unwrap();

    let client = reqwest::Client::new();
    for _ in 0..3 {
        client.get(url(&server, "/hello")).send().await.unwrap();
    }
    client.get(url(&server, "/team")).send().await.unwrap();

    let metrics: Value = client
        .get(url(&server, "/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics["requests"]["/hello"], 3);
    assert_eq!(metrics["requests"]["/team"], 1);
    assert!(metrics["firstRequestTime"].is_string());
    assert_eq!(server.metrics().requests.get("/hello"), Some(&3));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_metrics_disabled_by_default() {
    let mut server = server();
    server
        .start(&InMemoryReader::new(CONFIG), DEFAULT_PREFIX)
        .await
        .unwrap();

    let response = reqwest::get(url(&server, "/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_schema_document() {
    let mut server = server();
    server
        .start(&InMemoryReader::new(CONFIG), DEFAULT_PREFIX)
        .await
        .unwrap();

    let response = reqwest::get(url(&server, "/api.json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let document: Value = response.json().await.unwrap();
    assert_eq!(document["info"]["title"], "Mock Server API");
    assert!(document["paths"]["/team"]["get"].is_object());
    assert!(document["paths"]["/team/{name}"]["delete"].is_object());
    assert!(document["paths"]["/hello"]["get"].is_object());
    assert_eq!(
        document["components"]["schemas"]["team"]["properties"]["name"]["type"],
        "string"
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_restart_after_stop() {
    let config = Configuration::from_yaml(CONFIG.as_bytes()).unwrap();
    let reader = ObjectReader::new(config);

    let mut server = server();
    server.start(&reader, "/v1").await.unwrap();
    server.stop().await.unwrap();

    server.start(&reader, "/v2").await.unwrap();
    let response = reqwest::get(format!(
        "http://127.0.0.1:{}/v2/hello",
        server.port()
    ))
    .await
    .unwrap();
    assert_eq!(response.text().await.unwrap(), "hello");
    server.stop().await.unwrap();
}
