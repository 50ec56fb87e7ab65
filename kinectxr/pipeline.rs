/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The frame pipeline: device callbacks fill the session's frame cache;
//! after every successful image acquire the latest cached frame is
//! uploaded into the acquired texture. The cache mutex is never held
//! across an upload, and a missing or failed frame leaves the texture's
//! previous contents in place so output stays stable when the 30 Hz
//! sensor runs behind the compositor.

use crate::graphics::{self, TextureFormat, TextureHandle};

use kinectxr_api::{KinectDevice, SharedFrameCache, FRAME_HEIGHT, FRAME_WIDTH};
use log::warn;

/// Wire the device's RGB and depth callbacks into `cache`. The callbacks
/// only copy into pre-allocated buffers under the cache mutex.
pub fn install_cache_callbacks(device: &KinectDevice, cache: SharedFrameCache) {
    let rgb_cache = cache.clone();
    device.on_video(Box::new(move |data, timestamp| {
        rgb_cache
            .lock()
            .expect("frame cache poisoned")
            .store_rgb(data, timestamp);
    }));
    device.on_depth(Box::new(move |data, timestamp| {
        cache
            .lock()
            .expect("frame cache poisoned")
            .store_depth(data, timestamp);
    }));
}

/// Per-pixel R,G,B → B,G,R,255.
pub fn rgb_to_bgra(rgb: &[u8], bgra: &mut Vec<u8>) {
    bgra.clear();
    bgra.reserve(rgb.len() / 3 * 4);
    for pixel in rgb.chunks_exact(3) {
        bgra.extend_from_slice(&[pixel[2], pixel[1], pixel[0], 255]);
    }
}

/// Inverse of [`rgb_to_bgra`]; the alpha byte is discarded.
pub fn bgra_to_rgb(bgra: &[u8], rgb: &mut Vec<u8>) {
    rgb.clear();
    rgb.reserve(bgra.len() / 4 * 3);
    for pixel in bgra.chunks_exact(4) {
        rgb.extend_from_slice(&[pixel[2], pixel[1], pixel[0]]);
    }
}

// Convert the top-left `width`×`height` region of a full sensor frame.
fn crop_rgb_to_bgra(rgb: &[u8], width: usize, height: usize, bgra: &mut Vec<u8>) {
    bgra.clear();
    bgra.reserve(width * height * 4);
    for y in 0..height {
        let row = y * FRAME_WIDTH * 3;
        for x in 0..width {
            let src = row + x * 3;
            bgra.extend_from_slice(&[rgb[src + 2], rgb[src + 1], rgb[src], 255]);
        }
    }
}

/// Upload the latest cached frame into an acquired swapchain texture.
///
/// Returns whether anything was uploaded. A cold cache (no frame yet) or
/// a failed upload is not an error: the texture simply repeats its
/// previous contents.
pub fn upload_latest_frame(
    cache: &SharedFrameCache,
    format: TextureFormat,
    texture: TextureHandle,
    width: u32,
    height: u32,
) -> bool {
    let width_px = width as usize;
    let height_px = height as usize;
    match format {
        TextureFormat::Color => {
            let mut rgb = Vec::new();
            {
                let cache = cache.lock().expect("frame cache poisoned");
                if cache.snapshot_rgb(&mut rgb).is_none() {
                    return false;
                }
            }
            let mut bgra = Vec::new();
            if width_px == FRAME_WIDTH && height_px == FRAME_HEIGHT {
                rgb_to_bgra(&rgb, &mut bgra);
            } else {
                crop_rgb_to_bgra(&rgb, width_px, height_px, &mut bgra);
            }
            match graphics::upload(texture, &bgra, width_px * 4, width, height) {
                Ok(()) => true,
                Err(err) => {
                    warn!("dropping color frame: {}", err);
                    false
                }
            }
        }
        TextureFormat::Depth => {
            let mut depth = Vec::new();
            {
                let cache = cache.lock().expect("frame cache poisoned");
                if cache.snapshot_depth(&mut depth).is_none() {
                    return false;
                }
            }
            // 11-bit samples pass through untouched, little-endian.
            let mut bytes = Vec::with_capacity(width_px * height_px * 2);
            for y in 0..height_px {
                let row = y * FRAME_WIDTH;
                for x in 0..width_px {
                    bytes.extend_from_slice(&depth[row + x].to_le_bytes());
                }
            }
            match graphics::upload(texture, &bytes, width_px * 2, width, height) {
                Ok(()) => true,
                Err(err) => {
                    warn!("dropping depth frame: {}", err);
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinectxr_api::mock::SyntheticFrames;
    use kinectxr_api::{FrameCache, DEPTH_FRAME_PIXELS, RGB_FRAME_BYTES};

    const FAKE_QUEUE: usize = 0x1234_5678;

    #[test]
    fn rgb_bgra_conversion_is_bijective() {
        let mut rgb = vec![0u8; RGB_FRAME_BYTES];
        SyntheticFrames::fill_rgb(7, &mut rgb);

        let mut bgra = Vec::new();
        rgb_to_bgra(&rgb, &mut bgra);
        assert_eq!(bgra.len(), RGB_FRAME_BYTES / 3 * 4);
        assert_eq!(&bgra[..4], &[rgb[2], rgb[1], rgb[0], 255]);

        let mut back = Vec::new();
        bgra_to_rgb(&bgra, &mut back);
        assert_eq!(back, rgb);
    }

    #[test]
    fn depth_upload_is_byte_identical() {
        let cache = FrameCache::new_shared();
        let mut depth = vec![0u16; DEPTH_FRAME_PIXELS];
        SyntheticFrames::fill_depth(3, &mut depth);
        cache
            .lock()
            .unwrap()
            .store_depth(&depth, 1);

        let texture =
            graphics::create_texture(FAKE_QUEUE, 640, 480, TextureFormat::Depth).unwrap();
        assert!(upload_latest_frame(&cache, TextureFormat::Depth, texture, 640, 480));

        let uploaded = graphics::fake_texture_contents(texture).unwrap();
        let expected: Vec<u8> = depth.iter().flat_map(|v| v.to_le_bytes().to_vec()).collect();
        assert_eq!(uploaded, expected);
        graphics::release(texture);
    }

    #[test]
    fn color_upload_converts_to_bgra() {
        let cache = FrameCache::new_shared();
        let mut rgb = vec![0u8; RGB_FRAME_BYTES];
        SyntheticFrames::fill_rgb(5, &mut rgb);
        cache.lock().unwrap().store_rgb(&rgb, 1);

        let texture =
            graphics::create_texture(FAKE_QUEUE, 640, 480, TextureFormat::Color).unwrap();
        assert!(upload_latest_frame(&cache, TextureFormat::Color, texture, 640, 480));

        let mut expected = Vec::new();
        rgb_to_bgra(&rgb, &mut expected);
        assert_eq!(graphics::fake_texture_contents(texture).unwrap(), expected);
        graphics::release(texture);
    }

    #[test]
    fn cold_cache_skips_the_upload() {
        let cache = FrameCache::new_shared();
        let texture =
            graphics::create_texture(FAKE_QUEUE, 640, 480, TextureFormat::Color).unwrap();
        assert!(!upload_latest_frame(&cache, TextureFormat::Color, texture, 640, 480));
        // The texture keeps its previous (zeroed) contents.
        let contents = graphics::fake_texture_contents(texture).unwrap();
        assert!(contents.iter().all(|&byte| byte == 0));
        graphics::release(texture);
    }

    #[test]
    fn smaller_swapchains_get_a_cropped_frame() {
        let cache = FrameCache::new_shared();
        let mut rgb = vec![0u8; RGB_FRAME_BYTES];
        SyntheticFrames::fill_rgb(2, &mut rgb);
        cache.lock().unwrap().store_rgb(&rgb, 1);

        let texture =
            graphics::create_texture(FAKE_QUEUE, 320, 240, TextureFormat::Color).unwrap();
        assert!(upload_latest_frame(&cache, TextureFormat::Color, texture, 320, 240));
        let contents = graphics::fake_texture_contents(texture).unwrap();
        assert_eq!(contents.len(), 320 * 240 * 4);
        // Top-left pixel survives the crop.
        assert_eq!(&contents[..4], &[rgb[2], rgb[1], rgb[0], 255]);
        graphics::release(texture);
    }
}
