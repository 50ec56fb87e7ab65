/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Frame sources. Device callbacks encode binary frames and hand them to
//! a forwarding task that publishes on a tokio broadcast channel; slow
//! subscribers lag the channel and count dropped frames instead of
//! blocking the sensor. `--mock` swaps the libfreenect backend for the
//! synthetic 30 Hz driver, everything downstream is identical.

use crate::protocol::{self, ErrorCode, StreamName};

use kinectxr_api::mock::MockDriver;
use kinectxr_api::{DeviceConfig, DeviceEvent, KinectDevice, DEPTH_FRAME_BYTES};
use log::info;
use tokio::sync::broadcast;

use std::sync::Arc;

// Enough for ~2 seconds of both streams before a slow client lags.
const BROADCAST_CAPACITY: usize = 128;

#[derive(Clone)]
pub struct FramePacket {
    pub stream: StreamName,
    /// The complete binary message, header included.
    pub bytes: Arc<Vec<u8>>,
}

#[derive(Clone)]
pub enum Broadcast {
    Frame(FramePacket),
    Error {
        code: ErrorCode,
        message: String,
        recoverable: bool,
    },
}

/// A running device plus the fan-out channel its frames arrive on.
#[derive(Clone)]
pub struct Source {
    pub device: Arc<KinectDevice>,
    pub frames: broadcast::Sender<Broadcast>,
}

/// Open the device (mock or hardware), wire its callbacks into a
/// broadcast channel, and start streaming.
pub fn start_source(mock: bool) -> anyhow::Result<Source> {
    let device = if mock {
        info!("using the synthetic frame source");
        KinectDevice::new(Arc::new(MockDriver::new()))
    } else {
        KinectDevice::open_default()?
    };
    device.initialize(&DeviceConfig::default())?;

    let (frame_tx, frame_rx) = kinectxr_api::channel::<FramePacket>();
    let depth_tx = frame_tx.clone();
    let mut rgb_id: u32 = 0;
    device.on_video(Box::new(move |data, _timestamp| {
        let bytes = protocol::encode_frame(rgb_id, StreamName::Rgb, data);
        rgb_id = rgb_id.wrapping_add(1);
        let _ = frame_tx.send(FramePacket {
            stream: StreamName::Rgb,
            bytes: Arc::new(bytes),
        });
    }));
    let mut depth_id: u32 = 0;
    device.on_depth(Box::new(move |data, _timestamp| {
        let mut payload = Vec::with_capacity(DEPTH_FRAME_BYTES);
        for sample in data {
            payload.extend_from_slice(&sample.to_le_bytes());
        }
        let bytes = protocol::encode_frame(depth_id, StreamName::Depth, &payload);
        depth_id = depth_id.wrapping_add(1);
        let _ = depth_tx.send(FramePacket {
            stream: StreamName::Depth,
            bytes: Arc::new(bytes),
        });
    }));

    let (event_tx, event_rx) = kinectxr_api::channel::<DeviceEvent>();
    device.set_event_sink(event_tx);

    device.start_streams()?;

    let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);

    let frame_fanout = broadcast_tx.clone();
    tokio::task::spawn_blocking(move || {
        while let Ok(packet) = frame_rx.recv() {
            // No receivers is fine; clients come and go.
            let _ = frame_fanout.send(Broadcast::Frame(packet));
        }
    });

    let event_fanout = broadcast_tx.clone();
    tokio::task::spawn_blocking(move || {
        while let Ok(event) = event_rx.recv() {
            let _ = event_fanout.send(map_device_event(event));
        }
    });

    Ok(Source {
        device: Arc::new(device),
        frames: broadcast_tx,
    })
}

fn map_device_event(event: DeviceEvent) -> Broadcast {
    match event {
        DeviceEvent::Disconnected => Broadcast::Error {
            code: ErrorCode::DeviceDisconnected,
            message: "the Kinect was disconnected".to_owned(),
            recoverable: true,
        },
        DeviceEvent::StreamFailure(err) => Broadcast::Error {
            code: ErrorCode::StreamFailure,
            message: err.to_string(),
            recoverable: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_frame;
    use kinectxr_api::RGB_FRAME_BYTES;

    use std::time::Duration;

    #[tokio::test]
    async fn mock_source_produces_well_formed_frames() {
        let source = start_source(true).unwrap();
        let mut rx = source.frames.subscribe();

        let mut rgb_ids = Vec::new();
        let mut depth_ids = Vec::new();
        while rgb_ids.len() < 3 || depth_ids.len() < 3 {
            let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("no frame within two seconds")
                .unwrap();
            let packet = match message {
                Broadcast::Frame(packet) => packet,
                Broadcast::Error { .. } => panic!("unexpected error from mock source"),
            };
            let (frame_id, stream_type, payload) = decode_frame(&packet.bytes).unwrap();
            match packet.stream {
                StreamName::Rgb => {
                    assert_eq!(stream_type, 0x0001);
                    assert_eq!(payload.len(), RGB_FRAME_BYTES);
                    rgb_ids.push(frame_id);
                }
                StreamName::Depth => {
                    assert_eq!(stream_type, 0x0002);
                    assert_eq!(payload.len(), DEPTH_FRAME_BYTES);
                    depth_ids.push(frame_id);
                }
            }
        }

        assert!(rgb_ids.windows(2).all(|pair| pair[1] > pair[0]));
        assert!(depth_ids.windows(2).all(|pair| pair[1] > pair[0]));

        source.device.stop_streams().unwrap();
    }
}
