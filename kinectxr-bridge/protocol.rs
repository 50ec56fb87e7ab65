/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The bridge wire protocol: JSON control messages on text frames, pixel
//! data on binary frames with a fixed 8-byte little-endian header.

use kinectxr_api::{LedState, TiltStatus, DEPTH_FRAME_BYTES, RGB_FRAME_BYTES, SENSOR_FRAME_RATE};

use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "1.0";
pub const DEFAULT_PORT: u16 = 8765;
pub const WS_PATH: &str = "/kinect";

/// frame_id (u32 LE) + stream_type (u16 LE) + reserved (u16).
pub const HEADER_BYTES: usize = 8;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Rgb,
    Depth,
}

impl StreamName {
    pub fn wire_code(self) -> u16 {
        match self {
            StreamName::Rgb => 0x0001,
            StreamName::Depth => 0x0002,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe { streams: Vec<StreamName> },
    /// Pauses streaming without closing the connection.
    #[serde(rename = "unsubscribe")]
    Unsubscribe,
    #[serde(rename = "motor.set_tilt")]
    SetTilt { angle: f64 },
    #[serde(rename = "motor.set_led")]
    SetLed { state: LedState },
    #[serde(rename = "motor.reset")]
    MotorReset,
    #[serde(rename = "motor.get_status")]
    GetMotorStatus,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    DeviceDisconnected,
    DeviceNotFound,
    StreamFailure,
    ProtocolError,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MotorErrorCode {
    RateLimited,
    MotorFailure,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Capabilities {
    pub streams: Vec<StreamName>,
    pub motor: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StreamDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub bytes_per_frame: usize,
    pub frame_rate: u32,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StreamCatalog {
    pub rgb: StreamDescriptor,
    pub depth: StreamDescriptor,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "hello")]
    Hello {
        protocol_version: String,
        capabilities: Capabilities,
        streams: StreamCatalog,
    },
    #[serde(rename = "status")]
    Status { dropped_frames: u64 },
    #[serde(rename = "error")]
    Error {
        code: ErrorCode,
        message: String,
        recoverable: bool,
    },
    #[serde(rename = "goodbye")]
    Goodbye { reason: String },
    #[serde(rename = "motor.status")]
    MotorStatus {
        tilt_degrees: f64,
        status: TiltStatus,
        accelerometer: [f64; 3],
    },
    #[serde(rename = "motor.error")]
    MotorError { code: MotorErrorCode, message: String },
}

pub fn hello() -> ServerMessage {
    ServerMessage::Hello {
        protocol_version: PROTOCOL_VERSION.to_owned(),
        capabilities: Capabilities {
            streams: vec![StreamName::Rgb, StreamName::Depth],
            motor: true,
        },
        streams: StreamCatalog {
            rgb: StreamDescriptor {
                width: 640,
                height: 480,
                format: "rgb8".to_owned(),
                bytes_per_frame: RGB_FRAME_BYTES,
                frame_rate: SENSOR_FRAME_RATE,
            },
            depth: StreamDescriptor {
                width: 640,
                height: 480,
                format: "u16le".to_owned(),
                bytes_per_frame: DEPTH_FRAME_BYTES,
                frame_rate: SENSOR_FRAME_RATE,
            },
        },
    }
}

/// Prefix `payload` with the binary frame header.
pub fn encode_frame(frame_id: u32, stream: StreamName, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_BYTES + payload.len());
    out.extend_from_slice(&frame_id.to_le_bytes());
    out.extend_from_slice(&stream.wire_code().to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Split a binary message into (frame_id, stream_type, payload).
pub fn decode_frame(data: &[u8]) -> Option<(u32, u16, &[u8])> {
    if data.len() < HEADER_BYTES {
        return None;
    }
    let frame_id = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let stream_type = u16::from_le_bytes([data[4], data[5]]);
    Some((frame_id, stream_type, &data[HEADER_BYTES..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_matches_the_handshake_contract() {
        let json = serde_json::to_value(hello()).unwrap();
        assert_eq!(json["type"], "hello");
        assert_eq!(json["protocol_version"], "1.0");
        assert_eq!(
            json["capabilities"]["streams"],
            serde_json::json!(["rgb", "depth"])
        );
        assert_eq!(json["streams"]["rgb"]["bytes_per_frame"], 921_600);
        assert_eq!(json["streams"]["depth"]["bytes_per_frame"], 614_400);
        assert_eq!(json["streams"]["depth"]["frame_rate"], 30);
    }

    #[test]
    fn client_messages_parse_by_type_tag() {
        let subscribe: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","streams":["depth"]}"#).unwrap();
        assert_eq!(
            subscribe,
            ClientMessage::Subscribe {
                streams: vec![StreamName::Depth]
            }
        );

        let tilt: ClientMessage =
            serde_json::from_str(r#"{"type":"motor.set_tilt","angle":-40.5}"#).unwrap();
        assert_eq!(tilt, ClientMessage::SetTilt { angle: -40.5 });

        let led: ClientMessage =
            serde_json::from_str(r#"{"type":"motor.set_led","state":"blink_green"}"#).unwrap();
        assert_eq!(
            led,
            ClientMessage::SetLed {
                state: LedState::BlinkGreen
            }
        );

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"warp"}"#).is_err());
    }

    #[test]
    fn rate_limit_error_uses_the_stable_code() {
        let json = serde_json::to_value(ServerMessage::MotorError {
            code: MotorErrorCode::RateLimited,
            message: "tilt commands are limited to one per 500 ms".to_owned(),
        })
        .unwrap();
        assert_eq!(json["type"], "motor.error");
        assert_eq!(json["code"], "RATE_LIMITED");
    }

    #[test]
    fn binary_header_round_trips() {
        let payload = vec![0xAB; 16];
        let frame = encode_frame(7, StreamName::Depth, &payload);
        assert_eq!(frame.len(), HEADER_BYTES + 16);
        assert_eq!(&frame[..4], &7u32.to_le_bytes());
        assert_eq!(&frame[4..6], &0x0002u16.to_le_bytes());
        assert_eq!(&frame[6..8], &[0, 0]);

        let (frame_id, stream_type, body) = decode_frame(&frame).unwrap();
        assert_eq!(frame_id, 7);
        assert_eq!(stream_type, 0x0002);
        assert_eq!(body, &payload[..]);
    }

    #[test]
    fn depth_frames_have_the_documented_size() {
        let payload = vec![0u8; DEPTH_FRAME_BYTES];
        let frame = encode_frame(0, StreamName::Depth, &payload);
        assert_eq!(frame.len(), 614_408);
    }
}
