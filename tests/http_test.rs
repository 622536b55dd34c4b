//! HTTP behavior of the hub server over real sockets.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

mod common;

use common::{read_response, send, TestHub};

#[tokio::test]
async fn test_json_status_and_not_found() {
    let hub = TestHub::start().await;

    let response = reqwest::get(hub.url("/json")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "application/json");
    let body: serde_json::Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
    assert_eq!(body["status"], "OK");
    assert!(body["connections"].as_u64().unwrap() >= 1);

    let response = reqwest::get(hub.url("/missing")).await.unwrap();
    assert_eq!(response.status(), 404);

    hub.stop().await;
}

#[tokio::test]
async fn test_keep_alive_serves_sequential_requests() {
    let hub = TestHub::start().await;
    let mut stream = TcpStream::connect(hub.addr).await.unwrap();

    for _ in 0..3 {
        send(&mut stream, "GET /json HTTP/1.1\r\nHost: hub\r\nConnection: keep-alive\r\n\r\n").await;
        let response = read_response(&mut stream).await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("connection: keep-alive\r\n"));
    }

    // Final request without keep-alive: answered, then closed.
    send(&mut stream, "GET /json HTTP/1.1\r\nHost: hub\r\n\r\n").await;
    let response = read_response(&mut stream).await;
    assert!(response.contains("connection: close\r\n"));
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty());

    hub.stop().await;
}

#[tokio::test]
async fn test_malformed_request_gets_400_then_close() {
    let hub = TestHub::start().await;
    let mut stream = TcpStream::connect(hub.addr).await.unwrap();

    send(&mut stream, "NOT A REQUEST\r\n\r\n").await;
    let mut all = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut all))
        .await
        .unwrap()
        .unwrap();
    assert!(all.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert_eq!(all.matches("HTTP/1.1").count(), 1);

    hub.stop().await;
}

#[tokio::test]
async fn test_idle_connection_closed_after_timeout() {
    let mut config = common::test_config();
    config.connection.idle_timeout_secs = 1;
    let hub = TestHub::with_config(config).await;

    let mut stream = TcpStream::connect(hub.addr).await.unwrap();
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty());

    tokio::time::timeout(Duration::from_secs(5), hub.manager.wait_idle())
        .await
        .unwrap();
    hub.stop().await;
}
