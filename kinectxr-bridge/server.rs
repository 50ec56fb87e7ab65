/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The WebSocket server: upgrade on `/kinect`, hello handshake,
//! subscription fan-out, motor command handling and cooperative
//! shutdown. Slow clients lag the broadcast channel and lose frames;
//! the sensor side never blocks on a socket.

use crate::motor::{self, MotorGate};
use crate::protocol::{self, ClientMessage, ErrorCode, ServerMessage, StreamName};
use crate::source::{Broadcast, Source};

use anyhow::Context as _;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::WebSocketStream;
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::Message;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

// Cadence of the periodic status message while subscribed.
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

#[derive(Default)]
struct ServerStats {
    connections: u64,
    dropped_frames: u64,
}

pub struct BridgeServer {
    listener: TcpListener,
    stats: Arc<Mutex<ServerStats>>,
}

impl BridgeServer {
    /// Bind the localhost listener. Port 0 picks an ephemeral port; read
    /// it back with [`local_addr`](Self::local_addr).
    pub async fn bind(port: u16) -> anyhow::Result<BridgeServer> {
        let bind_addr = format!("127.0.0.1:{}", port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("cannot listen on {:?}", bind_addr))?;
        info!("listening for websocket traffic on {}", bind_addr);
        Ok(BridgeServer {
            listener,
            stats: Arc::new(Mutex::new(ServerStats::default())),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` flips. Every live connection
    /// watches the same flag and says goodbye before closing.
    pub async fn serve(self, source: Source, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (tcp_stream, peer) = accepted.context("accept failed")?;
                    tokio::spawn(accept_connection(
                        tcp_stream,
                        peer,
                        source.clone(),
                        shutdown.clone(),
                        self.stats.clone(),
                    ));
                }
                _ = shutdown.changed() => break,
            }
        }
        let stats = self.stats.lock();
        info!(
            "bridge shutting down: {} connections served, {} frames dropped",
            stats.connections, stats.dropped_frames
        );
        Ok(())
    }
}

fn check_path(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    if request.uri().path() != protocol::WS_PATH {
        let mut refusal = ErrorResponse::new(Some("unknown endpoint".to_owned()));
        *refusal.status_mut() = StatusCode::NOT_FOUND;
        return Err(refusal);
    }
    Ok(response)
}

async fn accept_connection(
    tcp_stream: TcpStream,
    peer: SocketAddr,
    source: Source,
    shutdown: watch::Receiver<bool>,
    stats: Arc<Mutex<ServerStats>>,
) {
    let ws_stream = match tokio_tungstenite::accept_hdr_async(tcp_stream, check_path).await {
        Ok(ws_stream) => ws_stream,
        Err(err) => {
            warn!("handshake with {} failed: {}", peer, err);
            return;
        }
    };
    info!("client connected: {}", peer);
    stats.lock().connections += 1;

    if let Err(err) = handle_connection(ws_stream, source, shutdown, stats).await {
        match err {
            tungstenite::Error::ConnectionClosed
            | tungstenite::Error::Protocol(_)
            | tungstenite::Error::Utf8 => (),
            err => warn!("error on connection {}: {}", peer, err),
        }
    }
    info!("client disconnected: {}", peer);
}

struct Subscriptions {
    rgb: bool,
    depth: bool,
}

impl Subscriptions {
    fn none() -> Subscriptions {
        Subscriptions {
            rgb: false,
            depth: false,
        }
    }

    fn wants(&self, stream: StreamName) -> bool {
        match stream {
            StreamName::Rgb => self.rgb,
            StreamName::Depth => self.depth,
        }
    }

    fn any(&self) -> bool {
        self.rgb || self.depth
    }
}

async fn send_json(sender: &mut WsSink, message: &ServerMessage) -> tungstenite::Result<()> {
    let json = serde_json::to_string(message).expect("server message serialization");
    sender.send(Message::Text(json)).await
}

async fn handle_connection(
    ws_stream: WebSocketStream<TcpStream>,
    source: Source,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<Mutex<ServerStats>>,
) -> tungstenite::Result<()> {
    let (mut sender, mut receiver) = ws_stream.split();
    send_json(&mut sender, &protocol::hello()).await?;

    let mut frames = source.frames.subscribe();
    let mut subscriptions = Subscriptions::none();
    let mut dropped_frames: u64 = 0;
    let mut gate = MotorGate::new();
    // Motor tasks run on blocking threads and report back through here.
    let (motor_tx, mut motor_rx) = mpsc::channel::<ServerMessage>(16);
    let mut status_timer = tokio::time::interval(STATUS_INTERVAL);
    status_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => {
                                handle_client_message(
                                    message,
                                    &mut subscriptions,
                                    &mut gate,
                                    &source,
                                    &motor_tx,
                                    &mut sender,
                                )
                                .await?;
                            }
                            Err(err) => {
                                send_json(
                                    &mut sender,
                                    &ServerMessage::Error {
                                        code: ErrorCode::ProtocolError,
                                        message: format!("unparseable message: {}", err),
                                        recoverable: true,
                                    },
                                )
                                .await?;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(err),
                }
            }
            fanned_out = frames.recv() => {
                match fanned_out {
                    Ok(Broadcast::Frame(packet)) => {
                        if subscriptions.wants(packet.stream) {
                            sender.send(Message::Binary(packet.bytes.to_vec())).await?;
                        }
                    }
                    Ok(Broadcast::Error { code, message, recoverable }) => {
                        send_json(&mut sender, &ServerMessage::Error { code, message, recoverable }).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        dropped_frames += count;
                        stats.lock().dropped_frames += count;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            Some(message) = motor_rx.recv() => {
                send_json(&mut sender, &message).await?;
            }
            _ = status_timer.tick() => {
                if subscriptions.any() {
                    send_json(&mut sender, &ServerMessage::Status { dropped_frames }).await?;
                }
            }
            _ = shutdown.changed() => {
                send_json(&mut sender, &ServerMessage::Goodbye {
                    reason: "server shutting down".to_owned(),
                }).await?;
                sender.send(Message::Close(None)).await?;
                break;
            }
        }
    }
    Ok(())
}

async fn handle_client_message(
    message: ClientMessage,
    subscriptions: &mut Subscriptions,
    gate: &mut MotorGate,
    source: &Source,
    motor_tx: &mpsc::Sender<ServerMessage>,
    sender: &mut WsSink,
) -> tungstenite::Result<()> {
    match message {
        ClientMessage::Subscribe { streams } => {
            subscriptions.rgb = streams.contains(&StreamName::Rgb);
            subscriptions.depth = streams.contains(&StreamName::Depth);
        }
        ClientMessage::Unsubscribe => {
            *subscriptions = Subscriptions::none();
        }
        ClientMessage::SetTilt { angle } => {
            if !gate.try_pass() {
                send_json(sender, &motor::rate_limited()).await?;
            } else {
                motor::spawn_tilt(source.device.clone(), angle, motor_tx.clone());
            }
        }
        ClientMessage::MotorReset => {
            if !gate.try_pass() {
                send_json(sender, &motor::rate_limited()).await?;
            } else {
                motor::spawn_tilt(source.device.clone(), 0.0, motor_tx.clone());
            }
        }
        ClientMessage::SetLed { state } => {
            motor::spawn_led(source.device.clone(), state, motor_tx.clone());
        }
        ClientMessage::GetMotorStatus => {
            motor::spawn_status(source.device.clone(), motor_tx.clone());
        }
    }
    Ok(())
}
