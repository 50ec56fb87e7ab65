/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! A thin wrapper over Metal 2-D textures: create, upload, release.
//!
//! Pointers below [`FAKE_POINTER_CEILING`] denote fabricated devices and
//! textures. In that mode create/upload succeed without contacting the
//! GPU and fake textures retain their last uploaded bytes, so the frame
//! pipeline and swapchain code can be exercised on machines with no Metal
//! device at all. Real Metal object pointers always sit far above the
//! ceiling.

use once_cell::sync::Lazy;
use thiserror::Error;

use std::collections::HashMap;
use std::os::raw::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Pointers below this value are treated as test sentinels.
pub const FAKE_POINTER_CEILING: usize = 0x2000_0000;

// MTLPixelFormat raw values; these are also the swapchain format ids the
// runtime advertises over the OpenXR ABI.
pub const METAL_FORMAT_BGRA8_UNORM: i64 = 80;
pub const METAL_FORMAT_R16_UINT: i64 = 23;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TextureFormat {
    /// 4-byte BGRA unorm color.
    Color,
    /// 16-bit unsigned red; carries the sensor's 11-bit depth samples.
    Depth,
}

impl TextureFormat {
    pub fn from_metal(format: i64) -> Option<TextureFormat> {
        match format {
            METAL_FORMAT_BGRA8_UNORM => Some(TextureFormat::Color),
            METAL_FORMAT_R16_UINT => Some(TextureFormat::Depth),
            _ => None,
        }
    }

    pub fn to_metal(self) -> i64 {
        match self {
            TextureFormat::Color => METAL_FORMAT_BGRA8_UNORM,
            TextureFormat::Depth => METAL_FORMAT_R16_UINT,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::Color => 4,
            TextureFormat::Depth => 2,
        }
    }
}

/// An owned texture. Released exactly once, at swapchain destruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TextureHandle(usize);

impl TextureHandle {
    pub const NULL: TextureHandle = TextureHandle(0);

    pub fn from_raw(raw: usize) -> TextureHandle {
        TextureHandle(raw)
    }

    pub fn into_raw(self) -> usize {
        self.0
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GraphicsError {
    #[error("null or unknown texture handle")]
    InvalidHandle,
    #[error("upload does not match the texture dimensions")]
    SizeMismatch,
    #[error("no Metal device on this platform")]
    Unsupported,
}

fn is_fake_pointer(raw: usize) -> bool {
    raw != 0 && raw < FAKE_POINTER_CEILING
}

struct FakeTexture {
    width: u32,
    height: u32,
    format: TextureFormat,
    bytes: Vec<u8>,
}

static FAKE_TEXTURES: Lazy<Mutex<HashMap<usize, FakeTexture>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));
// Stays inside the sentinel range; fake handles are never reused.
static NEXT_FAKE_HANDLE: AtomicUsize = AtomicUsize::new(0x1000);

/// Create a 2-D texture on the device that owns `command_queue`.
pub fn create_texture(
    command_queue: usize,
    width: u32,
    height: u32,
    format: TextureFormat,
) -> Option<TextureHandle> {
    if command_queue == 0 || width == 0 || height == 0 {
        return None;
    }
    if is_fake_pointer(command_queue) {
        let raw = NEXT_FAKE_HANDLE.fetch_add(8, Ordering::Relaxed);
        let bytes = vec![0; width as usize * height as usize * format.bytes_per_pixel()];
        FAKE_TEXTURES
            .lock()
            .expect("fake texture registry poisoned")
            .insert(
                raw,
                FakeTexture {
                    width,
                    height,
                    format,
                    bytes,
                },
            );
        return Some(TextureHandle(raw));
    }
    platform::create_texture(command_queue, width, height, format)
}

/// Synchronous CPU-to-GPU copy covering the whole texture.
pub fn upload(
    handle: TextureHandle,
    data: &[u8],
    bytes_per_row: usize,
    width: u32,
    height: u32,
) -> Result<(), GraphicsError> {
    if handle.is_null() {
        return Err(GraphicsError::InvalidHandle);
    }
    if data.len() < bytes_per_row * height as usize {
        return Err(GraphicsError::SizeMismatch);
    }
    if is_fake_pointer(handle.0) {
        let mut textures = FAKE_TEXTURES
            .lock()
            .expect("fake texture registry poisoned");
        let texture = textures
            .get_mut(&handle.0)
            .ok_or(GraphicsError::InvalidHandle)?;
        if texture.width != width || texture.height != height {
            return Err(GraphicsError::SizeMismatch);
        }
        texture.bytes.clear();
        texture
            .bytes
            .extend_from_slice(&data[..bytes_per_row * height as usize]);
        return Ok(());
    }
    platform::upload(handle, data, bytes_per_row, width, height)
}

/// Drop ownership of `handle`. Idempotent on null.
pub fn release(handle: TextureHandle) {
    if handle.is_null() {
        return;
    }
    if is_fake_pointer(handle.0) {
        FAKE_TEXTURES
            .lock()
            .expect("fake texture registry poisoned")
            .remove(&handle.0);
        return;
    }
    platform::release(handle);
}

/// Last uploaded bytes of a fake texture, for tests.
pub fn fake_texture_contents(handle: TextureHandle) -> Option<Vec<u8>> {
    FAKE_TEXTURES
        .lock()
        .expect("fake texture registry poisoned")
        .get(&handle.0)
        .map(|texture| texture.bytes.clone())
}

#[cfg(target_os = "macos")]
mod platform {
    use super::{GraphicsError, TextureFormat, TextureHandle};

    use metal::foreign_types::{ForeignType, ForeignTypeRef};

    pub fn create_texture(
        command_queue: usize,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Option<TextureHandle> {
        let queue =
            unsafe { metal::CommandQueueRef::from_ptr(command_queue as *mut _) };
        let descriptor = metal::TextureDescriptor::new();
        descriptor.set_texture_type(metal::MTLTextureType::D2);
        descriptor.set_width(width as u64);
        descriptor.set_height(height as u64);
        descriptor.set_pixel_format(match format {
            TextureFormat::Color => metal::MTLPixelFormat::BGRA8Unorm,
            TextureFormat::Depth => metal::MTLPixelFormat::R16Uint,
        });
        descriptor.set_usage(
            metal::MTLTextureUsage::ShaderRead | metal::MTLTextureUsage::RenderTarget,
        );
        let texture = queue.device().new_texture(&descriptor);
        let raw = texture.as_ptr() as usize;
        // Ownership transfers to the handle; `release` drops it.
        std::mem::forget(texture);
        Some(TextureHandle::from_raw(raw))
    }

    pub fn upload(
        handle: TextureHandle,
        data: &[u8],
        bytes_per_row: usize,
        width: u32,
        height: u32,
    ) -> Result<(), GraphicsError> {
        let texture = unsafe { metal::TextureRef::from_ptr(handle.as_ptr() as *mut _) };
        let region = metal::MTLRegion {
            origin: metal::MTLOrigin { x: 0, y: 0, z: 0 },
            size: metal::MTLSize {
                width: width as u64,
                height: height as u64,
                depth: 1,
            },
        };
        texture.replace_region(
            region,
            0,
            data.as_ptr() as *const std::ffi::c_void,
            bytes_per_row as u64,
        );
        Ok(())
    }

    pub fn release(handle: TextureHandle) {
        unsafe {
            drop(metal::Texture::from_ptr(handle.as_ptr() as *mut _));
        }
    }
}

#[cfg(not(target_os = "macos"))]
mod platform {
    use super::{GraphicsError, TextureFormat, TextureHandle};

    pub fn create_texture(
        _command_queue: usize,
        _width: u32,
        _height: u32,
        _format: TextureFormat,
    ) -> Option<TextureHandle> {
        None
    }

    pub fn upload(
        _handle: TextureHandle,
        _data: &[u8],
        _bytes_per_row: usize,
        _width: u32,
        _height: u32,
    ) -> Result<(), GraphicsError> {
        Err(GraphicsError::Unsupported)
    }

    pub fn release(_handle: TextureHandle) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAKE_QUEUE: usize = 0x1234_5678;

    #[test]
    fn fake_textures_round_trip() {
        let handle = create_texture(FAKE_QUEUE, 4, 2, TextureFormat::Color).unwrap();
        let data: Vec<u8> = (0..32).collect();
        upload(handle, &data, 16, 4, 2).unwrap();
        assert_eq!(fake_texture_contents(handle).unwrap(), data);
        release(handle);
        assert!(fake_texture_contents(handle).is_none());
    }

    #[test]
    fn null_device_is_rejected() {
        assert!(create_texture(0, 4, 4, TextureFormat::Depth).is_none());
    }

    #[test]
    fn short_uploads_are_rejected() {
        let handle = create_texture(FAKE_QUEUE, 4, 4, TextureFormat::Depth).unwrap();
        assert_eq!(
            upload(handle, &[0u8; 8], 8, 4, 4),
            Err(GraphicsError::SizeMismatch)
        );
        release(handle);
    }

    #[test]
    fn release_is_idempotent_on_null() {
        release(TextureHandle::NULL);
    }
}
