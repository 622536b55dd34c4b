//! WebSocket event stream: upgrade, request/response, broadcast, shutdown.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

use hub_webserver::hub::device_event;

mod common;

use common::TestHub;

async fn next_message<S>(ws: &mut S) -> Message
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("no message in time")
        .expect("stream ended")
        .expect("websocket error")
}

#[tokio::test]
async fn test_request_event_gets_response() {
    let hub = TestHub::start().await;
    let (mut ws, response) = connect_async(hub.ws_url()).await.unwrap();
    assert_eq!(response.status(), 101);

    ws.send(Message::Text(r#"{"event":"request","requestid":7}"#.into()))
        .await
        .unwrap();
    let reply = next_message(&mut ws).await;
    let reply: serde_json::Value = serde_json::from_str(reply.to_text().unwrap()).unwrap();
    assert_eq!(reply["event"], "response");
    assert_eq!(reply["requestid"], 7);
    assert_eq!(reply["status"], "OK");

    ws.close(None).await.unwrap();
    hub.stop().await;
}

#[tokio::test]
async fn test_broadcast_reaches_every_upgraded_client() {
    let hub = TestHub::start().await;
    let (mut first, _) = connect_async(hub.ws_url()).await.unwrap();
    let (mut second, _) = connect_async(hub.ws_url()).await.unwrap();

    // A plain HTTP client is not a recipient.
    let _plain = tokio::net::TcpStream::connect(hub.addr).await.unwrap();

    let sent = hub.manager.broadcast(&device_event("porch-light", "on"));
    assert_eq!(sent, 2);

    for ws in [&mut first, &mut second] {
        let message = next_message(ws).await;
        assert_eq!(
            message.to_text().unwrap(),
            r#"{"event":"device","device":"porch-light","state":"on"}"#
        );
    }

    hub.stop().await;
}

#[tokio::test]
async fn test_shutdown_sends_going_away() {
    let hub = TestHub::start().await;
    let (mut ws, _) = connect_async(hub.ws_url()).await.unwrap();
    assert_eq!(hub.manager.len(), 1);

    let manager = hub.manager.clone();
    let stopping = tokio::spawn(hub.stop());

    match next_message(&mut ws).await {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Away),
        other => panic!("expected close frame, got {:?}", other),
    }
    stopping.await.unwrap();
    assert!(manager.is_empty());
    assert_eq!(manager.active_count(), 0);
}

#[tokio::test]
async fn test_invalid_upgrade_is_rejected() {
    let hub = TestHub::start().await;
    let response = reqwest::get(hub.url("/ws")).await.unwrap();
    assert_eq!(response.status(), 400);
    hub.stop().await;
}
