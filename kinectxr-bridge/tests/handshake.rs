/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Protocol-level tests against a live server backed by the mock source.

use kinectxr_bridge::protocol::{self, decode_frame};
use kinectxr_bridge::server::BridgeServer;
use kinectxr_bridge::source;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use std::time::Duration;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> (String, watch::Sender<bool>) {
    let source = source::start_source(true).unwrap();
    let server = BridgeServer::bind(0).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server.serve(source, shutdown_rx));
    (
        format!("ws://{}{}", addr, protocol::WS_PATH),
        shutdown_tx,
    )
}

async fn recv(client: &mut Client) -> Message {
    tokio::time::timeout(Duration::from_secs(3), client.next())
        .await
        .expect("timed out waiting for a message")
        .expect("connection closed")
        .expect("websocket error")
}

async fn recv_text(client: &mut Client) -> serde_json::Value {
    loop {
        if let Message::Text(text) = recv(client).await {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

// Scenario: connect, read hello, subscribe to depth, observe well-formed
// monotonic binary frames.
#[tokio::test]
async fn handshake_and_depth_subscription() {
    let (url, _shutdown) = start_server().await;
    let (mut client, _) = connect_async(&url).await.unwrap();

    let hello = recv_text(&mut client).await;
    assert_eq!(hello["type"], "hello");
    assert_eq!(hello["protocol_version"], "1.0");
    assert_eq!(
        hello["capabilities"]["streams"],
        serde_json::json!(["rgb", "depth"])
    );
    assert_eq!(hello["streams"]["rgb"]["bytes_per_frame"], 921_600);
    assert_eq!(hello["streams"]["depth"]["bytes_per_frame"], 614_400);

    client
        .send(Message::Text(
            r#"{"type":"subscribe","streams":["depth"]}"#.to_owned(),
        ))
        .await
        .unwrap();

    let mut ids = Vec::new();
    while ids.len() < 3 {
        if let Message::Binary(data) = recv(&mut client).await {
            assert_eq!(data.len(), 614_408);
            let (frame_id, stream_type, _) = decode_frame(&data).unwrap();
            assert_eq!(stream_type, 0x0002);
            ids.push(frame_id);
        }
    }
    assert!(ids.windows(2).all(|pair| pair[1] > pair[0]));

    // Unsubscribe pauses the stream without closing the connection.
    client
        .send(Message::Text(r#"{"type":"unsubscribe"}"#.to_owned()))
        .await
        .unwrap();
    client
        .send(Message::Text(r#"{"type":"motor.get_status"}"#.to_owned()))
        .await
        .unwrap();
    let status = loop {
        let value = recv_text(&mut client).await;
        if value["type"] == "motor.status" {
            break value;
        }
    };
    assert!(status["tilt_degrees"].is_number());
}

#[tokio::test]
async fn tilt_commands_are_rate_limited_per_connection() {
    let (url, _shutdown) = start_server().await;
    let (mut client, _) = connect_async(&url).await.unwrap();
    let hello = recv_text(&mut client).await;
    assert_eq!(hello["type"], "hello");

    client
        .send(Message::Text(
            r#"{"type":"motor.set_tilt","angle":50.0}"#.to_owned(),
        ))
        .await
        .unwrap();
    client
        .send(Message::Text(
            r#"{"type":"motor.set_tilt","angle":-10.0}"#.to_owned(),
        ))
        .await
        .unwrap();

    // The first command produces motor.status samples (clamped to +27°);
    // the immediate second one is refused with RATE_LIMITED.
    let mut saw_status = false;
    let mut saw_rate_limit = false;
    while !(saw_status && saw_rate_limit) {
        let value = recv_text(&mut client).await;
        match value["type"].as_str().unwrap() {
            "motor.status" => {
                let tilt = value["tilt_degrees"].as_f64().unwrap();
                assert!(tilt <= 27.0);
                saw_status = true;
            }
            "motor.error" => {
                assert_eq!(value["code"], "RATE_LIMITED");
                saw_rate_limit = true;
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn unknown_paths_are_refused() {
    let (url, _shutdown) = start_server().await;
    let wrong = url.replace(protocol::WS_PATH, "/other");
    assert!(connect_async(&wrong).await.is_err());
}

#[tokio::test]
async fn malformed_messages_get_a_protocol_error() {
    let (url, _shutdown) = start_server().await;
    let (mut client, _) = connect_async(&url).await.unwrap();
    recv_text(&mut client).await; // hello

    client
        .send(Message::Text("{not json".to_owned()))
        .await
        .unwrap();
    let error = recv_text(&mut client).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "PROTOCOL_ERROR");
    assert_eq!(error["recoverable"], true);
}

#[tokio::test]
async fn shutdown_says_goodbye() {
    let (url, shutdown) = start_server().await;
    let (mut client, _) = connect_async(&url).await.unwrap();
    recv_text(&mut client).await; // hello

    shutdown.send(true).unwrap();
    let goodbye = loop {
        match recv(&mut client).await {
            Message::Text(text) => break serde_json::from_str::<serde_json::Value>(&text).unwrap(),
            Message::Close(_) => panic!("closed before goodbye"),
            _ => {}
        }
    };
    assert_eq!(goodbye["type"], "goodbye");
}
