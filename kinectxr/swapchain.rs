/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Triple-buffered texture swapchains. Indices cycle 0 → 1 → 2 → 0 and at
//! most one image is acquired at a time.

use crate::graphics::{self, TextureFormat, TextureHandle};
use crate::runtime::Runtime;
use crate::system;
use crate::OpResult;

use kinectxr_api::SharedFrameCache;
use openxr_sys::{Result, StructureType, SwapchainCreateInfo, SwapchainUsageFlags};

use std::sync::Mutex;

pub const SWAPCHAIN_IMAGE_COUNT: usize = 3;

/// Color first, depth second; enumeration order is part of the contract.
pub const SUPPORTED_FORMATS: &[i64] = &[
    graphics::METAL_FORMAT_BGRA8_UNORM,
    graphics::METAL_FORMAT_R16_UINT,
];

pub struct Swapchain {
    pub session: u64,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub textures: [TextureHandle; SWAPCHAIN_IMAGE_COUNT],
    /// The owning session's frame cache, so uploads need not re-lock the
    /// session.
    pub cache: SharedFrameCache,
    next_index: u32,
    acquired: Option<u32>,
}

impl Swapchain {
    pub fn new(
        session: u64,
        width: u32,
        height: u32,
        format: TextureFormat,
        textures: [TextureHandle; SWAPCHAIN_IMAGE_COUNT],
        cache: SharedFrameCache,
    ) -> Swapchain {
        Swapchain {
            session,
            width,
            height,
            format,
            textures,
            cache,
            next_index: 0,
            acquired: None,
        }
    }

    /// Hand out the next image index in strict rotation.
    pub fn acquire(&mut self) -> OpResult<u32> {
        if self.acquired.is_some() {
            return Err(Result::ERROR_CALL_ORDER_INVALID);
        }
        let index = self.next_index;
        self.acquired = Some(index);
        self.next_index = (index + 1) % SWAPCHAIN_IMAGE_COUNT as u32;
        Ok(index)
    }

    /// Single-producer model: the image is ready as soon as it is
    /// acquired, so waiting never blocks and the timeout is ignored.
    pub fn wait(&self) -> OpResult<()> {
        if self.acquired.is_none() {
            return Err(Result::ERROR_CALL_ORDER_INVALID);
        }
        Ok(())
    }

    pub fn release(&mut self) -> OpResult<()> {
        if self.acquired.take().is_none() {
            return Err(Result::ERROR_CALL_ORDER_INVALID);
        }
        Ok(())
    }

    pub fn acquired_index(&self) -> Option<u32> {
        self.acquired
    }
}

/// Validate an `XrSwapchainCreateInfo` and allocate the texture ring.
pub fn create_swapchain(
    rt: &Runtime,
    session_handle: u64,
    info: &SwapchainCreateInfo,
) -> OpResult<u64> {
    if info.ty != StructureType::SWAPCHAIN_CREATE_INFO {
        return Err(Result::ERROR_VALIDATION_FAILURE);
    }
    let format = TextureFormat::from_metal(info.format)
        .ok_or(Result::ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED)?;
    if info.width == 0 || info.height == 0 {
        return Err(Result::ERROR_VALIDATION_FAILURE);
    }
    if info.width > system::MAX_SWAPCHAIN_WIDTH || info.height > system::MAX_SWAPCHAIN_HEIGHT {
        return Err(Result::ERROR_SIZE_INSUFFICIENT);
    }
    if info.sample_count != 1 || info.array_size != 1 || info.face_count != 1 {
        return Err(Result::ERROR_FEATURE_UNSUPPORTED);
    }
    let required_usage = match format {
        TextureFormat::Color => SwapchainUsageFlags::COLOR_ATTACHMENT,
        TextureFormat::Depth => SwapchainUsageFlags::DEPTH_STENCIL_ATTACHMENT,
    };
    if !info.usage_flags.contains(required_usage) {
        return Err(Result::ERROR_VALIDATION_FAILURE);
    }

    let (command_queue, cache) = {
        let session = rt
            .sessions
            .get(session_handle)
            .ok_or(Result::ERROR_HANDLE_INVALID)?;
        let session = session.lock().expect("session poisoned");
        (session.command_queue, session.cache.clone())
    };

    let mut textures = [TextureHandle::NULL; SWAPCHAIN_IMAGE_COUNT];
    for slot in textures.iter_mut() {
        match graphics::create_texture(command_queue, info.width, info.height, format) {
            Some(texture) => *slot = texture,
            None => {
                for created in textures.iter() {
                    graphics::release(*created);
                }
                return Err(Result::ERROR_GRAPHICS_DEVICE_INVALID);
            }
        }
    }

    Ok(rt.swapchains.insert(Mutex::new(Swapchain::new(
        session_handle,
        info.width,
        info.height,
        format,
        textures,
        cache,
    ))))
}

pub fn destroy_swapchain(rt: &Runtime, handle: u64) -> OpResult<()> {
    let swapchain = rt
        .swapchains
        .remove(handle)
        .ok_or(Result::ERROR_HANDLE_INVALID)?;
    let swapchain = swapchain.lock().expect("swapchain poisoned");
    for texture in swapchain.textures.iter() {
        graphics::release(*texture);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinectxr_api::FrameCache;

    fn bare_swapchain() -> Swapchain {
        Swapchain::new(
            1,
            640,
            480,
            TextureFormat::Color,
            [TextureHandle::NULL; SWAPCHAIN_IMAGE_COUNT],
            FrameCache::new_shared(),
        )
    }

    #[test]
    fn indices_cycle_in_strict_order() {
        let mut swapchain = bare_swapchain();
        let mut seen = Vec::new();
        for _ in 0..5 {
            let index = swapchain.acquire().unwrap();
            swapchain.wait().unwrap();
            swapchain.release().unwrap();
            seen.push(index);
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn double_acquire_is_rejected() {
        let mut swapchain = bare_swapchain();
        swapchain.acquire().unwrap();
        assert_eq!(
            swapchain.acquire(),
            Err(Result::ERROR_CALL_ORDER_INVALID)
        );
    }

    #[test]
    fn wait_and_release_require_an_acquired_image() {
        let mut swapchain = bare_swapchain();
        assert_eq!(swapchain.wait(), Err(Result::ERROR_CALL_ORDER_INVALID));
        assert_eq!(swapchain.release(), Err(Result::ERROR_CALL_ORDER_INVALID));
        swapchain.acquire().unwrap();
        assert!(swapchain.wait().is_ok());
        assert!(swapchain.release().is_ok());
        assert_eq!(swapchain.release(), Err(Result::ERROR_CALL_ORDER_INVALID));
    }
}
