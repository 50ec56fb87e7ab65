/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::sync::{Arc, Mutex};

/// The sensor streams both RGB and depth at 640×480.
pub const FRAME_WIDTH: usize = 640;
pub const FRAME_HEIGHT: usize = 480;

/// RGB frames are packed 24-bit R,G,B.
pub const RGB_FRAME_BYTES: usize = FRAME_WIDTH * FRAME_HEIGHT * 3;

/// Depth frames are 11-bit samples in 16-bit little-endian containers.
pub const DEPTH_FRAME_PIXELS: usize = FRAME_WIDTH * FRAME_HEIGHT;
pub const DEPTH_FRAME_BYTES: usize = DEPTH_FRAME_PIXELS * 2;

/// Nominal sensor cadence in frames per second.
pub const SENSOR_FRAME_RATE: u32 = 30;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StreamKind {
    Rgb,
    Depth,
}

/// The latest RGB and depth frames from the device, with per-stream
/// validity flags and timestamps. Buffers are pre-allocated once and never
/// reallocated; writers and readers swap whole frames in and out under the
/// owning mutex and never hold it across I/O.
pub struct FrameCache {
    rgb: Vec<u8>,
    depth: Vec<u16>,
    rgb_valid: bool,
    depth_valid: bool,
    rgb_timestamp: u64,
    depth_timestamp: u64,
    device_lost: bool,
}

pub type SharedFrameCache = Arc<Mutex<FrameCache>>;

impl FrameCache {
    pub fn new() -> FrameCache {
        FrameCache {
            rgb: vec![0; RGB_FRAME_BYTES],
            depth: vec![0; DEPTH_FRAME_PIXELS],
            rgb_valid: false,
            depth_valid: false,
            rgb_timestamp: 0,
            depth_timestamp: 0,
            device_lost: false,
        }
    }

    pub fn new_shared() -> SharedFrameCache {
        Arc::new(Mutex::new(FrameCache::new()))
    }

    /// Copy an incoming RGB frame into the cache. Short frames are
    /// rejected; oversized frames are truncated to the fixed size.
    pub fn store_rgb(&mut self, data: &[u8], timestamp: u64) {
        if data.len() < RGB_FRAME_BYTES {
            return;
        }
        self.rgb.copy_from_slice(&data[..RGB_FRAME_BYTES]);
        self.rgb_valid = true;
        // Timestamps are monotonic per stream even if the driver stutters.
        self.rgb_timestamp = timestamp.max(self.rgb_timestamp + 1);
    }

    pub fn store_depth(&mut self, data: &[u16], timestamp: u64) {
        if data.len() < DEPTH_FRAME_PIXELS {
            return;
        }
        self.depth.copy_from_slice(&data[..DEPTH_FRAME_PIXELS]);
        self.depth_valid = true;
        self.depth_timestamp = timestamp.max(self.depth_timestamp + 1);
    }

    /// Copy the latest RGB frame into `out`, returning its timestamp, or
    /// `None` while no frame has arrived. `out` is resized on first use and
    /// reused afterwards.
    pub fn snapshot_rgb(&self, out: &mut Vec<u8>) -> Option<u64> {
        if !self.rgb_valid {
            return None;
        }
        out.resize(RGB_FRAME_BYTES, 0);
        out.copy_from_slice(&self.rgb);
        Some(self.rgb_timestamp)
    }

    pub fn snapshot_depth(&self, out: &mut Vec<u16>) -> Option<u64> {
        if !self.depth_valid {
            return None;
        }
        out.resize(DEPTH_FRAME_PIXELS, 0);
        out.copy_from_slice(&self.depth);
        Some(self.depth_timestamp)
    }

    pub fn rgb_valid(&self) -> bool {
        self.rgb_valid
    }

    pub fn depth_valid(&self) -> bool {
        self.depth_valid
    }

    pub fn rgb_timestamp(&self) -> u64 {
        self.rgb_timestamp
    }

    pub fn depth_timestamp(&self) -> u64 {
        self.depth_timestamp
    }

    /// Marks the device as gone. Cached frames stay valid so readers keep
    /// repeating the last frame until the session ends.
    pub fn set_device_lost(&mut self) {
        self.device_lost = true;
    }

    pub fn device_lost(&self) -> bool {
        self.device_lost
    }
}

impl Default for FrameCache {
    fn default() -> FrameCache {
        FrameCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_requires_a_stored_frame() {
        let cache = FrameCache::new();
        let mut out = Vec::new();
        assert!(cache.snapshot_rgb(&mut out).is_none());
        let mut depth_out = Vec::new();
        assert!(cache.snapshot_depth(&mut depth_out).is_none());
    }

    #[test]
    fn stored_frames_round_trip() {
        let mut cache = FrameCache::new();
        let rgb = vec![7u8; RGB_FRAME_BYTES];
        cache.store_rgb(&rgb, 10);
        let mut out = Vec::new();
        assert_eq!(cache.snapshot_rgb(&mut out), Some(10));
        assert_eq!(out, rgb);

        let depth = vec![0x03FFu16; DEPTH_FRAME_PIXELS];
        cache.store_depth(&depth, 11);
        let mut depth_out = Vec::new();
        assert_eq!(cache.snapshot_depth(&mut depth_out), Some(11));
        assert_eq!(depth_out, depth);
    }

    #[test]
    fn short_frames_are_rejected() {
        let mut cache = FrameCache::new();
        cache.store_rgb(&[1, 2, 3], 1);
        assert!(!cache.rgb_valid());
    }

    #[test]
    fn timestamps_stay_monotonic() {
        let mut cache = FrameCache::new();
        let frame = vec![0u8; RGB_FRAME_BYTES];
        cache.store_rgb(&frame, 100);
        cache.store_rgb(&frame, 100);
        assert_eq!(cache.rgb_timestamp(), 101);
        cache.store_rgb(&frame, 90);
        assert_eq!(cache.rgb_timestamp(), 102);
    }
}
