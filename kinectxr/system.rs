/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The Kinect presented as a single HMD-form-factor system: fixed
//! 640×480 output, no orientation or position tracking.

use crate::runtime::Runtime;
use crate::util;
use crate::OpResult;

use openxr_sys::{
    EnvironmentBlendMode, FormFactor, Result, StructureType, SystemGetInfo, SystemId,
    SystemProperties, ViewConfigurationProperties, ViewConfigurationType,
    ViewConfigurationView, FALSE,
};

pub const SYSTEM_NAME: &str = "Kinect XR System";
pub const VENDOR_ID: u32 = 0x045E;

pub const MAX_SWAPCHAIN_WIDTH: u32 = 640;
pub const MAX_SWAPCHAIN_HEIGHT: u32 = 480;
pub const MAX_LAYER_COUNT: u32 = 1;

/// The only supported view configuration: a single 640×480 mono view.
pub const VIEW_CONFIGURATION: ViewConfigurationType = ViewConfigurationType::PRIMARY_MONO;

pub const BLEND_MODES: &[EnvironmentBlendMode] = &[EnvironmentBlendMode::OPAQUE];

/// Resolve (lazily creating) the instance's system id.
pub fn get_system(rt: &Runtime, instance_handle: u64, info: &SystemGetInfo) -> OpResult<u64> {
    if info.ty != StructureType::SYSTEM_GET_INFO {
        return Err(Result::ERROR_VALIDATION_FAILURE);
    }
    if info.form_factor != FormFactor::HEAD_MOUNTED_DISPLAY {
        return Err(Result::ERROR_FORM_FACTOR_UNSUPPORTED);
    }
    let instance = rt
        .instances
        .get(instance_handle)
        .ok_or(Result::ERROR_HANDLE_INVALID)?;
    let mut instance = instance.lock().expect("instance poisoned");
    let id = *instance
        .system
        .get_or_insert_with(|| rt.allocate_system_id());
    Ok(id)
}

/// A system id is only meaningful for the instance that created it.
pub fn validate_system(rt: &Runtime, instance_handle: u64, system: SystemId) -> OpResult<()> {
    let instance = rt
        .instances
        .get(instance_handle)
        .ok_or(Result::ERROR_HANDLE_INVALID)?;
    let instance = instance.lock().expect("instance poisoned");
    if instance.system != Some(system.into_raw()) {
        return Err(Result::ERROR_SYSTEM_INVALID);
    }
    Ok(())
}

pub fn fill_system_properties(props: &mut SystemProperties, system: SystemId) {
    props.system_id = system;
    props.vendor_id = VENDOR_ID;
    util::write_cstr(&mut props.system_name, SYSTEM_NAME);
    props.graphics_properties.max_swapchain_image_width = MAX_SWAPCHAIN_WIDTH;
    props.graphics_properties.max_swapchain_image_height = MAX_SWAPCHAIN_HEIGHT;
    props.graphics_properties.max_layer_count = MAX_LAYER_COUNT;
    // The sensor is fixed-mount: no tracking of any kind.
    props.tracking_properties.orientation_tracking = FALSE;
    props.tracking_properties.position_tracking = FALSE;
}

pub fn fill_view_configuration_properties(
    props: &mut ViewConfigurationProperties,
    configuration: ViewConfigurationType,
) {
    props.view_configuration_type = configuration;
    props.fov_mutable = FALSE;
}

pub fn fill_view_configuration_view(view: &mut ViewConfigurationView) {
    view.recommended_image_rect_width = MAX_SWAPCHAIN_WIDTH;
    view.max_image_rect_width = MAX_SWAPCHAIN_WIDTH;
    view.recommended_image_rect_height = MAX_SWAPCHAIN_HEIGHT;
    view.max_image_rect_height = MAX_SWAPCHAIN_HEIGHT;
    view.recommended_swapchain_sample_count = 1;
    view.max_swapchain_sample_count = 1;
}
