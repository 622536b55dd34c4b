//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use hub_webserver::config::{HubConfig, ListenerConfig};
use hub_webserver::{ConnectionManager, HubHandler, HubServer, Shutdown};

/// A hub server on an ephemeral 127.0.0.1 port.
pub struct TestHub {
    pub addr: SocketAddr,
    pub manager: ConnectionManager,
    shutdown: Shutdown,
    task: JoinHandle<()>,
}

impl TestHub {
    pub async fn start() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: HubConfig) -> Self {
        let manager = ConnectionManager::new();
        let handler = Arc::new(HubHandler::new(manager.clone()));
        let server = HubServer::new(config, handler, manager.clone());
        let listeners = server.bind().await.unwrap();
        let addr = listeners[0].local_addr().unwrap();

        let shutdown = Shutdown::new();
        let shutdown_rx = shutdown.subscribe();
        let task = tokio::spawn(server.run(listeners, shutdown_rx, None));

        Self {
            addr,
            manager,
            shutdown,
            task,
        }
    }

    #[allow(dead_code)]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    #[allow(dead_code)]
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Trigger shutdown and wait for the server to finish draining.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("server did not stop in time")
            .unwrap();
    }
}

pub fn test_config() -> HubConfig {
    let mut config = HubConfig::default();
    config.listeners = vec![ListenerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        tls: None,
        max_connections: 64,
    }];
    config.connection.close_grace_ms = 500;
    config
}

/// Read one response: head up to the blank line, then a Content-Length body.
#[allow(dead_code)]
pub async fn read_response(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        head.push(stream.read_u8().await.unwrap());
    }
    let head = String::from_utf8(head).unwrap();
    let length = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length: "))
        .map(|v| v.trim().parse::<usize>().unwrap())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await.unwrap();
    head + std::str::from_utf8(&body).unwrap()
}

#[allow(dead_code)]
pub async fn send(stream: &mut TcpStream, request: &str) {
    stream.write_all(request.as_bytes()).await.unwrap();
}
