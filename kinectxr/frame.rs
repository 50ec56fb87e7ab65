/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The frame loop: 30 Hz pacing in `xrWaitFrame`, begin/end bracketing,
//! composition-layer validation (including `XR_KHR_composition_layer_depth`)
//! and the fixed mono view for `xrLocateViews`.

use crate::graphics::TextureFormat;
use crate::runtime::Runtime;
use crate::session::FRAME_PERIOD_NS;
use crate::space;
use crate::system;
use crate::util;
use crate::OpResult;

use openxr_sys::{
    BaseInStructure, CompositionLayerBaseHeader, CompositionLayerDepthInfoKHR,
    CompositionLayerProjection, EnvironmentBlendMode, Fovf, FrameBeginInfo, FrameEndInfo,
    FrameWaitInfo, Handle, Posef, Result, StructureType, SwapchainSubImage, ViewLocateInfo,
    ViewStateFlags,
};

use std::os::raw::c_void;
use std::thread;
use std::time::Duration;

/// FOV approximating the Kinect optics: 57° horizontal, 43° vertical.
pub fn kinect_fov() -> Fovf {
    let half_horizontal = 57.0f32.to_radians() / 2.0;
    let half_vertical = 43.0f32.to_radians() / 2.0;
    Fovf {
        angle_left: -half_horizontal,
        angle_right: half_horizontal,
        angle_up: half_vertical,
        angle_down: -half_vertical,
    }
}

pub fn all_view_flags() -> ViewStateFlags {
    ViewStateFlags::ORIENTATION_VALID
        | ViewStateFlags::POSITION_VALID
        | ViewStateFlags::ORIENTATION_TRACKED
        | ViewStateFlags::POSITION_TRACKED
}

/// Block until a full frame period has elapsed since the previous wait,
/// then record and return the new predicted display time.
///
/// The session mutex is released while sleeping; the running state is
/// re-validated afterwards in case the session ended underneath us.
pub fn wait_frame(
    rt: &Runtime,
    session_handle: u64,
    info: Option<&FrameWaitInfo>,
) -> OpResult<i64> {
    if let Some(info) = info {
        if info.ty != StructureType::FRAME_WAIT_INFO {
            return Err(Result::ERROR_VALIDATION_FAILURE);
        }
    }
    let session_arc = rt
        .sessions
        .get(session_handle)
        .ok_or(Result::ERROR_HANDLE_INVALID)?;

    let target = {
        let session = session_arc.lock().expect("session poisoned");
        if !session.is_running() {
            return Err(Result::ERROR_SESSION_NOT_RUNNING);
        }
        session.frame_loop.last_wait_ns + FRAME_PERIOD_NS
    };
    let now = util::now_monotonic_ns();
    if now < target {
        thread::sleep(Duration::from_nanos((target - now) as u64));
    }

    let mut session = session_arc.lock().expect("session poisoned");
    if !session.is_running() {
        return Err(Result::ERROR_SESSION_NOT_RUNNING);
    }
    let predicted = util::now_monotonic_ns();
    session.frame_loop.last_wait_ns = predicted;
    session.frame_loop.frame_count += 1;
    Ok(predicted)
}

pub fn begin_frame(
    rt: &Runtime,
    session_handle: u64,
    info: Option<&FrameBeginInfo>,
) -> OpResult<()> {
    if let Some(info) = info {
        if info.ty != StructureType::FRAME_BEGIN_INFO {
            return Err(Result::ERROR_VALIDATION_FAILURE);
        }
    }
    let session = rt
        .sessions
        .get(session_handle)
        .ok_or(Result::ERROR_HANDLE_INVALID)?;
    let mut session = session.lock().expect("session poisoned");
    if !session.is_running() {
        return Err(Result::ERROR_SESSION_NOT_RUNNING);
    }
    if session.frame_loop.frame_in_progress {
        return Err(Result::ERROR_CALL_ORDER_INVALID);
    }
    session.frame_loop.frame_in_progress = true;
    Ok(())
}

pub fn end_frame(rt: &Runtime, session_handle: u64, info: &FrameEndInfo) -> OpResult<()> {
    if info.ty != StructureType::FRAME_END_INFO {
        return Err(Result::ERROR_VALIDATION_FAILURE);
    }
    let session = rt
        .sessions
        .get(session_handle)
        .ok_or(Result::ERROR_HANDLE_INVALID)?;
    let mut session = session.lock().expect("session poisoned");
    if !session.is_running() {
        return Err(Result::ERROR_SESSION_NOT_RUNNING);
    }
    if !session.frame_loop.frame_in_progress {
        return Err(Result::ERROR_CALL_ORDER_INVALID);
    }
    if info.environment_blend_mode != EnvironmentBlendMode::OPAQUE {
        return Err(Result::ERROR_ENVIRONMENT_BLEND_MODE_UNSUPPORTED);
    }
    if info.layer_count > 0 && info.layers.is_null() {
        return Err(Result::ERROR_VALIDATION_FAILURE);
    }
    for i in 0..info.layer_count as usize {
        let layer = unsafe { *info.layers.add(i) };
        validate_layer(rt, layer)?;
    }
    session.frame_loop.frame_in_progress = false;
    Ok(())
}

fn validate_layer(rt: &Runtime, layer: *const CompositionLayerBaseHeader) -> OpResult<()> {
    if layer.is_null() {
        return Err(Result::ERROR_VALIDATION_FAILURE);
    }
    let header = unsafe { &*layer };
    match header.ty {
        StructureType::COMPOSITION_LAYER_PROJECTION => {
            validate_projection_layer(rt, layer as *const CompositionLayerProjection)
        }
        _ => Err(Result::ERROR_VALIDATION_FAILURE),
    }
}

fn validate_projection_layer(
    rt: &Runtime,
    layer: *const CompositionLayerProjection,
) -> OpResult<()> {
    let layer = unsafe { &*layer };
    if !rt.spaces.contains(layer.space.into_raw()) {
        return Err(Result::ERROR_HANDLE_INVALID);
    }
    // One mono view.
    if layer.view_count != 1 || layer.views.is_null() {
        return Err(Result::ERROR_VALIDATION_FAILURE);
    }
    let view = unsafe { &*layer.views };
    let (color_width, color_height) = swapchain_extent(rt, &view.sub_image)?;

    // The depth info may chain off the layer or off the projection view.
    let depth_info = unsafe {
        find_depth_info(layer.next as *const c_void)
            .or_else(|| find_depth_info(view.next as *const c_void))
    };
    if let Some(depth) = depth_info {
        let depth = unsafe { &*depth };
        let handle = depth.sub_image.swapchain.into_raw();
        let swapchain = rt
            .swapchains
            .get(handle)
            .ok_or(Result::ERROR_HANDLE_INVALID)?;
        let swapchain = swapchain.lock().expect("swapchain poisoned");
        if swapchain.format != TextureFormat::Depth {
            return Err(Result::ERROR_VALIDATION_FAILURE);
        }
        if swapchain.width != color_width || swapchain.height != color_height {
            return Err(Result::ERROR_VALIDATION_FAILURE);
        }
    }
    Ok(())
}

fn swapchain_extent(rt: &Runtime, sub_image: &SwapchainSubImage) -> OpResult<(u32, u32)> {
    let swapchain = rt
        .swapchains
        .get(sub_image.swapchain.into_raw())
        .ok_or(Result::ERROR_HANDLE_INVALID)?;
    let swapchain = swapchain.lock().expect("swapchain poisoned");
    Ok((swapchain.width, swapchain.height))
}

unsafe fn find_depth_info(mut next: *const c_void) -> Option<*const CompositionLayerDepthInfoKHR> {
    while !next.is_null() {
        let header = &*(next as *const BaseInStructure);
        if header.ty == StructureType::COMPOSITION_LAYER_DEPTH_INFO_KHR {
            return Some(next as *const CompositionLayerDepthInfoKHR);
        }
        next = header.next as *const c_void;
    }
    None
}

/// One identity-pose view with every valid/tracked bit set and the fixed
/// sensor FOV.
pub fn locate_views(
    rt: &Runtime,
    session_handle: u64,
    info: &ViewLocateInfo,
) -> OpResult<(ViewStateFlags, Posef, Fovf)> {
    if info.ty != StructureType::VIEW_LOCATE_INFO {
        return Err(Result::ERROR_VALIDATION_FAILURE);
    }
    if !rt.sessions.contains(session_handle) {
        return Err(Result::ERROR_HANDLE_INVALID);
    }
    if info.view_configuration_type != system::VIEW_CONFIGURATION {
        return Err(Result::ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED);
    }
    if !rt.spaces.contains(info.space.into_raw()) {
        return Err(Result::ERROR_HANDLE_INVALID);
    }
    Ok((all_view_flags(), space::identity_pose(), kinect_fov()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fov_matches_the_sensor_optics() {
        let fov = kinect_fov();
        assert!((fov.angle_right - 0.4974188).abs() < 1e-4);
        assert!((fov.angle_up - 0.3752458).abs() < 1e-4);
        assert_eq!(fov.angle_left, -fov.angle_right);
        assert_eq!(fov.angle_down, -fov.angle_up);
    }
}
