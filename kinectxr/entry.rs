/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The C-ABI surface. The loader resolves one exported symbol,
//! [`xrNegotiateLoaderRuntimeInterface`]; everything else is reached
//! through [`xr_get_instance_proc_addr`]. No panic may unwind across
//! these functions; the guard converts panics into
//! `ERROR_RUNTIME_FAILURE`.

use crate::frame;
use crate::instance;
use crate::instance::QueuedEvent;
use crate::loader::{self, NegotiateLoaderInfo, NegotiateRuntimeRequest};
use crate::pipeline;
use crate::runtime::runtime;
use crate::session;
use crate::space;
use crate::swapchain;
use crate::system;
use crate::util;

use log::error;
use openxr_sys::{
    pfn, ApiLayerProperties, EnvironmentBlendMode, EventDataBuffer,
    EventDataInstanceLossPending, EventDataSessionStateChanged, ExtensionProperties,
    FrameBeginInfo, FrameEndInfo, FrameState, FrameWaitInfo, Handle, Instance,
    InstanceCreateInfo, InstanceProperties, ReferenceSpaceCreateInfo, ReferenceSpaceType,
    Result, Session, SessionBeginInfo, SessionCreateInfo, Space, SpaceLocation, StructureType,
    Swapchain, SwapchainCreateInfo, SwapchainImageAcquireInfo, SwapchainImageBaseHeader,
    SwapchainImageReleaseInfo, SwapchainImageWaitInfo, SystemGetInfo, SystemId,
    SystemProperties, Time, View, ViewConfigurationProperties, ViewConfigurationType,
    ViewConfigurationView, ViewLocateInfo, ViewState, TRUE,
};

// The Metal ABI surface (`*MetalKHR` types, `xrGetMetalGraphicsRequirementsKHR`) is only
// defined by `openxr-sys` for Apple targets, matching the `XR_KHR_metal_enable` extension's
// own platform restriction; see the non-Apple `graphics` module for the analogous split.
#[cfg(target_os = "macos")]
use openxr_sys::{GraphicsRequirementsMetalKHR, SwapchainImageMetalKHR};

use std::mem;
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

// Callable with XR_NULL_HANDLE before any instance exists.
const INSTANCE_AGNOSTIC: &[&str] = &[
    "xrEnumerateInstanceExtensionProperties",
    "xrEnumerateApiLayerProperties",
    "xrCreateInstance",
];

fn abi_guard<F: FnOnce() -> Result>(f: F) -> Result {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(_) => {
            error!("panic reached the OpenXR ABI boundary");
            Result::ERROR_RUNTIME_FAILURE
        }
    }
}

/// The loader negotiation entry point; the only exported symbol.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn xrNegotiateLoaderRuntimeInterface(
    loader_info: *const NegotiateLoaderInfo,
    runtime_request: *mut NegotiateRuntimeRequest,
) -> Result {
    abi_guard(|| unsafe {
        loader::negotiate(loader_info, runtime_request, xr_get_instance_proc_addr)
    })
}

macro_rules! entry_fn {
    ($pfn:ty, $f:expr) => {
        Some(mem::transmute::<$pfn, pfn::VoidFunction>($f as $pfn))
    };
}

/// Dispatch by function name. Instance-agnostic names resolve with a null
/// instance handle; everything else requires a live instance.
pub unsafe extern "system" fn xr_get_instance_proc_addr(
    instance_handle: Instance,
    name: *const c_char,
    function: *mut Option<pfn::VoidFunction>,
) -> Result {
    abi_guard(|| unsafe {
        if name.is_null() || function.is_null() {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        *function = None;
        let name = match util::read_cstr_ptr(name) {
            Some(name) => name,
            None => return Result::ERROR_VALIDATION_FAILURE,
        };

        if !INSTANCE_AGNOSTIC.contains(&name.as_str())
            && !runtime().instances.contains(instance_handle.into_raw())
        {
            return Result::ERROR_HANDLE_INVALID;
        }

        *function = match name.as_str() {
            "xrGetInstanceProcAddr" => {
                entry_fn!(pfn::GetInstanceProcAddr, xr_get_instance_proc_addr)
            }
            "xrEnumerateApiLayerProperties" => entry_fn!(
                pfn::EnumerateApiLayerProperties,
                xr_enumerate_api_layer_properties
            ),
            "xrEnumerateInstanceExtensionProperties" => entry_fn!(
                pfn::EnumerateInstanceExtensionProperties,
                xr_enumerate_instance_extension_properties
            ),
            "xrCreateInstance" => entry_fn!(pfn::CreateInstance, xr_create_instance),
            "xrDestroyInstance" => entry_fn!(pfn::DestroyInstance, xr_destroy_instance),
            "xrGetInstanceProperties" => {
                entry_fn!(pfn::GetInstanceProperties, xr_get_instance_properties)
            }
            "xrPollEvent" => entry_fn!(pfn::PollEvent, xr_poll_event),
            "xrResultToString" => entry_fn!(pfn::ResultToString, xr_result_to_string),
            "xrStructureTypeToString" => {
                entry_fn!(pfn::StructureTypeToString, xr_structure_type_to_string)
            }
            "xrGetSystem" => entry_fn!(pfn::GetSystem, xr_get_system),
            "xrGetSystemProperties" => {
                entry_fn!(pfn::GetSystemProperties, xr_get_system_properties)
            }
            "xrEnumerateEnvironmentBlendModes" => entry_fn!(
                pfn::EnumerateEnvironmentBlendModes,
                xr_enumerate_environment_blend_modes
            ),
            "xrCreateSession" => entry_fn!(pfn::CreateSession, xr_create_session),
            "xrDestroySession" => entry_fn!(pfn::DestroySession, xr_destroy_session),
            "xrBeginSession" => entry_fn!(pfn::BeginSession, xr_begin_session),
            "xrEndSession" => entry_fn!(pfn::EndSession, xr_end_session),
            "xrEnumerateViewConfigurations" => entry_fn!(
                pfn::EnumerateViewConfigurations,
                xr_enumerate_view_configurations
            ),
            "xrGetViewConfigurationProperties" => entry_fn!(
                pfn::GetViewConfigurationProperties,
                xr_get_view_configuration_properties
            ),
            "xrEnumerateViewConfigurationViews" => entry_fn!(
                pfn::EnumerateViewConfigurationViews,
                xr_enumerate_view_configuration_views
            ),
            "xrEnumerateReferenceSpaces" => entry_fn!(
                pfn::EnumerateReferenceSpaces,
                xr_enumerate_reference_spaces
            ),
            "xrCreateReferenceSpace" => {
                entry_fn!(pfn::CreateReferenceSpace, xr_create_reference_space)
            }
            "xrDestroySpace" => entry_fn!(pfn::DestroySpace, xr_destroy_space),
            "xrLocateSpace" => entry_fn!(pfn::LocateSpace, xr_locate_space),
            "xrEnumerateSwapchainFormats" => entry_fn!(
                pfn::EnumerateSwapchainFormats,
                xr_enumerate_swapchain_formats
            ),
            "xrCreateSwapchain" => entry_fn!(pfn::CreateSwapchain, xr_create_swapchain),
            "xrDestroySwapchain" => entry_fn!(pfn::DestroySwapchain, xr_destroy_swapchain),
            "xrEnumerateSwapchainImages" => entry_fn!(
                pfn::EnumerateSwapchainImages,
                xr_enumerate_swapchain_images
            ),
            "xrAcquireSwapchainImage" => {
                entry_fn!(pfn::AcquireSwapchainImage, xr_acquire_swapchain_image)
            }
            "xrWaitSwapchainImage" => {
                entry_fn!(pfn::WaitSwapchainImage, xr_wait_swapchain_image)
            }
            "xrReleaseSwapchainImage" => {
                entry_fn!(pfn::ReleaseSwapchainImage, xr_release_swapchain_image)
            }
            "xrWaitFrame" => entry_fn!(pfn::WaitFrame, xr_wait_frame),
            "xrBeginFrame" => entry_fn!(pfn::BeginFrame, xr_begin_frame),
            "xrEndFrame" => entry_fn!(pfn::EndFrame, xr_end_frame),
            "xrLocateViews" => entry_fn!(pfn::LocateViews, xr_locate_views),
            #[cfg(target_os = "macos")]
            "xrGetMetalGraphicsRequirementsKHR" => entry_fn!(
                pfn::GetMetalGraphicsRequirementsKHR,
                xr_get_metal_graphics_requirements
            ),
            _ => None,
        };
        if (*function).is_none() {
            return Result::ERROR_FUNCTION_UNSUPPORTED;
        }
        Result::SUCCESS
    })
}

pub unsafe extern "system" fn xr_enumerate_api_layer_properties(
    capacity: u32,
    count_output: *mut u32,
    _properties: *mut ApiLayerProperties,
) -> Result {
    abi_guard(|| unsafe {
        // No API layers are shipped with the runtime.
        util::enumerate_with(
            capacity,
            count_output,
            _properties,
            0,
            |_, _: &mut ApiLayerProperties| {},
        )
    })
}

pub unsafe extern "system" fn xr_enumerate_instance_extension_properties(
    layer_name: *const c_char,
    capacity: u32,
    count_output: *mut u32,
    properties: *mut ExtensionProperties,
) -> Result {
    abi_guard(|| unsafe {
        if !layer_name.is_null() {
            return Result::ERROR_API_LAYER_NOT_PRESENT;
        }
        util::enumerate_with(
            capacity,
            count_output,
            properties,
            instance::SUPPORTED_EXTENSIONS.len(),
            |i, prop: &mut ExtensionProperties| {
                let (name, version) = instance::SUPPORTED_EXTENSIONS[i];
                util::write_cstr(&mut prop.extension_name, name);
                prop.extension_version = version;
            },
        )
    })
}

pub unsafe extern "system" fn xr_create_instance(
    create_info: *const InstanceCreateInfo,
    instance_out: *mut Instance,
) -> Result {
    abi_guard(|| unsafe {
        if create_info.is_null() || instance_out.is_null() {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        match instance::create_instance(runtime(), &*create_info) {
            Ok(handle) => {
                *instance_out = Instance::from_raw(handle);
                Result::SUCCESS
            }
            Err(code) => code,
        }
    })
}

pub unsafe extern "system" fn xr_destroy_instance(instance_handle: Instance) -> Result {
    abi_guard(|| {
        match instance::destroy_instance(runtime(), instance_handle.into_raw()) {
            Ok(()) => Result::SUCCESS,
            Err(code) => code,
        }
    })
}

pub unsafe extern "system" fn xr_get_instance_properties(
    instance_handle: Instance,
    properties: *mut InstanceProperties,
) -> Result {
    abi_guard(|| unsafe {
        if properties.is_null() || (*properties).ty != StructureType::INSTANCE_PROPERTIES {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        if !runtime().instances.contains(instance_handle.into_raw()) {
            return Result::ERROR_HANDLE_INVALID;
        }
        let properties = &mut *properties;
        properties.runtime_version = instance::RUNTIME_VERSION;
        util::write_cstr(&mut properties.runtime_name, instance::RUNTIME_NAME);
        Result::SUCCESS
    })
}

pub unsafe extern "system" fn xr_poll_event(
    instance_handle: Instance,
    event_data: *mut EventDataBuffer,
) -> Result {
    abi_guard(|| unsafe {
        if event_data.is_null() || (*event_data).ty != StructureType::EVENT_DATA_BUFFER {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        let event = match instance::poll_event(runtime(), instance_handle.into_raw()) {
            Ok(event) => event,
            Err(code) => return code,
        };
        match event {
            None => Result::EVENT_UNAVAILABLE,
            Some(QueuedEvent::SessionStateChanged {
                session,
                state,
                time_ns,
            }) => {
                let out = event_data as *mut EventDataSessionStateChanged;
                (*out).ty = StructureType::EVENT_DATA_SESSION_STATE_CHANGED;
                (*out).next = ptr::null();
                (*out).session = Session::from_raw(session);
                (*out).state = state;
                (*out).time = Time::from_nanos(time_ns);
                Result::SUCCESS
            }
            Some(QueuedEvent::InstanceLossPending { time_ns }) => {
                let out = event_data as *mut EventDataInstanceLossPending;
                (*out).ty = StructureType::EVENT_DATA_INSTANCE_LOSS_PENDING;
                (*out).next = ptr::null();
                (*out).loss_time = Time::from_nanos(time_ns);
                Result::SUCCESS
            }
        }
    })
}

pub unsafe extern "system" fn xr_result_to_string(
    instance_handle: Instance,
    value: Result,
    buffer: *mut c_char,
) -> Result {
    abi_guard(|| unsafe {
        if buffer.is_null() {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        if !runtime().instances.contains(instance_handle.into_raw()) {
            return Result::ERROR_HANDLE_INVALID;
        }
        let out =
            std::slice::from_raw_parts_mut(buffer, openxr_sys::MAX_RESULT_STRING_SIZE);
        util::write_cstr(out, &format!("XR_{:?}", value));
        Result::SUCCESS
    })
}

pub unsafe extern "system" fn xr_structure_type_to_string(
    instance_handle: Instance,
    value: StructureType,
    buffer: *mut c_char,
) -> Result {
    abi_guard(|| unsafe {
        if buffer.is_null() {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        if !runtime().instances.contains(instance_handle.into_raw()) {
            return Result::ERROR_HANDLE_INVALID;
        }
        let out =
            std::slice::from_raw_parts_mut(buffer, openxr_sys::MAX_STRUCTURE_NAME_SIZE);
        util::write_cstr(out, &format!("XR_TYPE_{:?}", value));
        Result::SUCCESS
    })
}

pub unsafe extern "system" fn xr_get_system(
    instance_handle: Instance,
    get_info: *const SystemGetInfo,
    system_id: *mut SystemId,
) -> Result {
    abi_guard(|| unsafe {
        if get_info.is_null() || system_id.is_null() {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        match system::get_system(runtime(), instance_handle.into_raw(), &*get_info) {
            Ok(id) => {
                *system_id = SystemId::from_raw(id);
                Result::SUCCESS
            }
            Err(code) => code,
        }
    })
}

pub unsafe extern "system" fn xr_get_system_properties(
    instance_handle: Instance,
    system_id: SystemId,
    properties: *mut SystemProperties,
) -> Result {
    abi_guard(|| unsafe {
        if properties.is_null() || (*properties).ty != StructureType::SYSTEM_PROPERTIES {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        if let Err(code) = system::validate_system(runtime(), instance_handle.into_raw(), system_id)
        {
            return code;
        }
        system::fill_system_properties(&mut *properties, system_id);
        Result::SUCCESS
    })
}

pub unsafe extern "system" fn xr_enumerate_environment_blend_modes(
    instance_handle: Instance,
    system_id: SystemId,
    view_configuration_type: ViewConfigurationType,
    capacity: u32,
    count_output: *mut u32,
    blend_modes: *mut EnvironmentBlendMode,
) -> Result {
    abi_guard(|| unsafe {
        if let Err(code) = system::validate_system(runtime(), instance_handle.into_raw(), system_id)
        {
            return code;
        }
        if view_configuration_type != system::VIEW_CONFIGURATION {
            return Result::ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED;
        }
        util::enumerate(capacity, count_output, blend_modes, system::BLEND_MODES)
    })
}

pub unsafe extern "system" fn xr_create_session(
    instance_handle: Instance,
    create_info: *const SessionCreateInfo,
    session_out: *mut Session,
) -> Result {
    abi_guard(|| unsafe {
        if create_info.is_null() || session_out.is_null() {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        match session::create_session(runtime(), instance_handle.into_raw(), &*create_info) {
            Ok(handle) => {
                *session_out = Session::from_raw(handle);
                Result::SUCCESS
            }
            Err(code) => code,
        }
    })
}

pub unsafe extern "system" fn xr_destroy_session(session_handle: Session) -> Result {
    abi_guard(|| {
        match session::destroy_session(runtime(), session_handle.into_raw()) {
            Ok(()) => Result::SUCCESS,
            Err(code) => code,
        }
    })
}

pub unsafe extern "system" fn xr_begin_session(
    session_handle: Session,
    begin_info: *const SessionBeginInfo,
) -> Result {
    abi_guard(|| unsafe {
        if begin_info.is_null() {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        match session::begin_session(runtime(), session_handle.into_raw(), &*begin_info) {
            Ok(()) => Result::SUCCESS,
            Err(code) => code,
        }
    })
}

pub unsafe extern "system" fn xr_end_session(session_handle: Session) -> Result {
    abi_guard(|| {
        match session::end_session(runtime(), session_handle.into_raw()) {
            Ok(()) => Result::SUCCESS,
            Err(code) => code,
        }
    })
}

pub unsafe extern "system" fn xr_enumerate_view_configurations(
    instance_handle: Instance,
    system_id: SystemId,
    capacity: u32,
    count_output: *mut u32,
    view_configuration_types: *mut ViewConfigurationType,
) -> Result {
    abi_guard(|| unsafe {
        if let Err(code) = system::validate_system(runtime(), instance_handle.into_raw(), system_id)
        {
            return code;
        }
        util::enumerate(
            capacity,
            count_output,
            view_configuration_types,
            &[system::VIEW_CONFIGURATION],
        )
    })
}

pub unsafe extern "system" fn xr_get_view_configuration_properties(
    instance_handle: Instance,
    system_id: SystemId,
    view_configuration_type: ViewConfigurationType,
    properties: *mut ViewConfigurationProperties,
) -> Result {
    abi_guard(|| unsafe {
        if properties.is_null()
            || (*properties).ty != StructureType::VIEW_CONFIGURATION_PROPERTIES
        {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        if let Err(code) = system::validate_system(runtime(), instance_handle.into_raw(), system_id)
        {
            return code;
        }
        if view_configuration_type != system::VIEW_CONFIGURATION {
            return Result::ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED;
        }
        system::fill_view_configuration_properties(&mut *properties, view_configuration_type);
        Result::SUCCESS
    })
}

pub unsafe extern "system" fn xr_enumerate_view_configuration_views(
    instance_handle: Instance,
    system_id: SystemId,
    view_configuration_type: ViewConfigurationType,
    capacity: u32,
    count_output: *mut u32,
    views: *mut ViewConfigurationView,
) -> Result {
    abi_guard(|| unsafe {
        if let Err(code) = system::validate_system(runtime(), instance_handle.into_raw(), system_id)
        {
            return code;
        }
        if view_configuration_type != system::VIEW_CONFIGURATION {
            return Result::ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED;
        }
        util::enumerate_with(capacity, count_output, views, 1, |_, view| {
            system::fill_view_configuration_view(view);
        })
    })
}

pub unsafe extern "system" fn xr_enumerate_reference_spaces(
    session_handle: Session,
    capacity: u32,
    count_output: *mut u32,
    spaces: *mut ReferenceSpaceType,
) -> Result {
    abi_guard(|| unsafe {
        if !runtime().sessions.contains(session_handle.into_raw()) {
            return Result::ERROR_HANDLE_INVALID;
        }
        util::enumerate(capacity, count_output, spaces, space::REFERENCE_SPACE_TYPES)
    })
}

pub unsafe extern "system" fn xr_create_reference_space(
    session_handle: Session,
    create_info: *const ReferenceSpaceCreateInfo,
    space_out: *mut Space,
) -> Result {
    abi_guard(|| unsafe {
        if create_info.is_null() || space_out.is_null() {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        match space::create_reference_space(runtime(), session_handle.into_raw(), &*create_info)
        {
            Ok(handle) => {
                *space_out = Space::from_raw(handle);
                Result::SUCCESS
            }
            Err(code) => code,
        }
    })
}

pub unsafe extern "system" fn xr_destroy_space(space_handle: Space) -> Result {
    abi_guard(|| {
        match space::destroy_space(runtime(), space_handle.into_raw()) {
            Ok(()) => Result::SUCCESS,
            Err(code) => code,
        }
    })
}

pub unsafe extern "system" fn xr_locate_space(
    space_handle: Space,
    base_space: Space,
    _time: Time,
    location: *mut SpaceLocation,
) -> Result {
    abi_guard(|| unsafe {
        if location.is_null() || (*location).ty != StructureType::SPACE_LOCATION {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        match space::locate_space(
            runtime(),
            space_handle.into_raw(),
            base_space.into_raw(),
        ) {
            Ok(pose) => {
                let location = &mut *location;
                location.location_flags = space::all_location_flags();
                location.pose = pose;
                Result::SUCCESS
            }
            Err(code) => code,
        }
    })
}

pub unsafe extern "system" fn xr_enumerate_swapchain_formats(
    session_handle: Session,
    capacity: u32,
    count_output: *mut u32,
    formats: *mut i64,
) -> Result {
    abi_guard(|| unsafe {
        if !runtime().sessions.contains(session_handle.into_raw()) {
            return Result::ERROR_HANDLE_INVALID;
        }
        util::enumerate(capacity, count_output, formats, swapchain::SUPPORTED_FORMATS)
    })
}

pub unsafe extern "system" fn xr_create_swapchain(
    session_handle: Session,
    create_info: *const SwapchainCreateInfo,
    swapchain_out: *mut Swapchain,
) -> Result {
    abi_guard(|| unsafe {
        if create_info.is_null() || swapchain_out.is_null() {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        match swapchain::create_swapchain(runtime(), session_handle.into_raw(), &*create_info)
        {
            Ok(handle) => {
                *swapchain_out = Swapchain::from_raw(handle);
                Result::SUCCESS
            }
            Err(code) => code,
        }
    })
}

pub unsafe extern "system" fn xr_destroy_swapchain(swapchain_handle: Swapchain) -> Result {
    abi_guard(|| {
        match swapchain::destroy_swapchain(runtime(), swapchain_handle.into_raw()) {
            Ok(()) => Result::SUCCESS,
            Err(code) => code,
        }
    })
}

pub unsafe extern "system" fn xr_enumerate_swapchain_images(
    swapchain_handle: Swapchain,
    capacity: u32,
    count_output: *mut u32,
    images: *mut SwapchainImageBaseHeader,
) -> Result {
    abi_guard(|| unsafe {
        let swapchain = match runtime().swapchains.get(swapchain_handle.into_raw()) {
            Some(swapchain) => swapchain,
            None => return Result::ERROR_HANDLE_INVALID,
        };
        let textures = swapchain.lock().expect("swapchain poisoned").textures;
        let images = images as *mut SwapchainImageMetalKHR;
        util::enumerate_with(
            capacity,
            count_output,
            images,
            textures.len(),
            |i, image: &mut SwapchainImageMetalKHR| {
                image.ty = StructureType::SWAPCHAIN_IMAGE_METAL_KHR;
                image.texture = textures[i].as_ptr();
            },
        )
    })
}

pub unsafe extern "system" fn xr_acquire_swapchain_image(
    swapchain_handle: Swapchain,
    acquire_info: *const SwapchainImageAcquireInfo,
    index_output: *mut u32,
) -> Result {
    abi_guard(|| unsafe {
        if !acquire_info.is_null()
            && (*acquire_info).ty != StructureType::SWAPCHAIN_IMAGE_ACQUIRE_INFO
        {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        if index_output.is_null() {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        let swapchain_arc = match runtime().swapchains.get(swapchain_handle.into_raw()) {
            Some(swapchain) => swapchain,
            None => return Result::ERROR_HANDLE_INVALID,
        };
        let (index, cache, format, texture, width, height) = {
            let mut swapchain = swapchain_arc.lock().expect("swapchain poisoned");
            let index = match swapchain.acquire() {
                Ok(index) => index,
                Err(code) => return code,
            };
            (
                index,
                swapchain.cache.clone(),
                swapchain.format,
                swapchain.textures[index as usize],
                swapchain.width,
                swapchain.height,
            )
        };
        // Latest sensor frame lands in the texture before the app renders;
        // a cold cache leaves the previous contents (frame repetition).
        pipeline::upload_latest_frame(&cache, format, texture, width, height);
        *index_output = index;
        Result::SUCCESS
    })
}

pub unsafe extern "system" fn xr_wait_swapchain_image(
    swapchain_handle: Swapchain,
    wait_info: *const SwapchainImageWaitInfo,
) -> Result {
    abi_guard(|| unsafe {
        // The timeout is ignored by contract: acquired images are ready.
        if !wait_info.is_null()
            && (*wait_info).ty != StructureType::SWAPCHAIN_IMAGE_WAIT_INFO
        {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        let swapchain = match runtime().swapchains.get(swapchain_handle.into_raw()) {
            Some(swapchain) => swapchain,
            None => return Result::ERROR_HANDLE_INVALID,
        };
        let swapchain = swapchain.lock().expect("swapchain poisoned");
        match swapchain.wait() {
            Ok(()) => Result::SUCCESS,
            Err(code) => code,
        }
    })
}

pub unsafe extern "system" fn xr_release_swapchain_image(
    swapchain_handle: Swapchain,
    release_info: *const SwapchainImageReleaseInfo,
) -> Result {
    abi_guard(|| unsafe {
        if !release_info.is_null()
            && (*release_info).ty != StructureType::SWAPCHAIN_IMAGE_RELEASE_INFO
        {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        let swapchain = match runtime().swapchains.get(swapchain_handle.into_raw()) {
            Some(swapchain) => swapchain,
            None => return Result::ERROR_HANDLE_INVALID,
        };
        let mut swapchain = swapchain.lock().expect("swapchain poisoned");
        match swapchain.release() {
            Ok(()) => Result::SUCCESS,
            Err(code) => code,
        }
    })
}

pub unsafe extern "system" fn xr_wait_frame(
    session_handle: Session,
    frame_wait_info: *const FrameWaitInfo,
    frame_state: *mut FrameState,
) -> Result {
    abi_guard(|| unsafe {
        if frame_state.is_null() || (*frame_state).ty != StructureType::FRAME_STATE {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        let info = if frame_wait_info.is_null() {
            None
        } else {
            Some(&*frame_wait_info)
        };
        match frame::wait_frame(runtime(), session_handle.into_raw(), info) {
            Ok(predicted_ns) => {
                let state = &mut *frame_state;
                state.predicted_display_time = Time::from_nanos(predicted_ns);
                state.predicted_display_period =
                    openxr_sys::Duration::from_nanos(session::FRAME_PERIOD_NS);
                state.should_render = TRUE;
                Result::SUCCESS
            }
            Err(code) => code,
        }
    })
}

pub unsafe extern "system" fn xr_begin_frame(
    session_handle: Session,
    frame_begin_info: *const FrameBeginInfo,
) -> Result {
    abi_guard(|| unsafe {
        let info = if frame_begin_info.is_null() {
            None
        } else {
            Some(&*frame_begin_info)
        };
        match frame::begin_frame(runtime(), session_handle.into_raw(), info) {
            Ok(()) => Result::SUCCESS,
            Err(code) => code,
        }
    })
}

pub unsafe extern "system" fn xr_end_frame(
    session_handle: Session,
    frame_end_info: *const FrameEndInfo,
) -> Result {
    abi_guard(|| unsafe {
        if frame_end_info.is_null() {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        match frame::end_frame(runtime(), session_handle.into_raw(), &*frame_end_info) {
            Ok(()) => Result::SUCCESS,
            Err(code) => code,
        }
    })
}

pub unsafe extern "system" fn xr_locate_views(
    session_handle: Session,
    view_locate_info: *const ViewLocateInfo,
    view_state: *mut ViewState,
    capacity: u32,
    count_output: *mut u32,
    views: *mut View,
) -> Result {
    abi_guard(|| unsafe {
        if view_locate_info.is_null()
            || view_state.is_null()
            || (*view_state).ty != StructureType::VIEW_STATE
        {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        let (flags, pose, fov) = match frame::locate_views(
            runtime(),
            session_handle.into_raw(),
            &*view_locate_info,
        ) {
            Ok(view) => view,
            Err(code) => return code,
        };
        (*view_state).view_state_flags = flags;
        util::enumerate_with(capacity, count_output, views, 1, |_, view: &mut View| {
            view.ty = StructureType::VIEW;
            view.pose = pose;
            view.fov = fov;
        })
    })
}

pub unsafe extern "system" fn xr_get_metal_graphics_requirements(
    instance_handle: Instance,
    system_id: SystemId,
    requirements: *mut GraphicsRequirementsMetalKHR,
) -> Result {
    abi_guard(|| unsafe {
        if requirements.is_null()
            || (*requirements).ty != StructureType::GRAPHICS_REQUIREMENTS_METAL_KHR
        {
            return Result::ERROR_VALIDATION_FAILURE;
        }
        if let Err(code) = system::validate_system(runtime(), instance_handle.into_raw(), system_id)
        {
            return code;
        }
        // Any Metal device is acceptable.
        (*requirements).metal_device = ptr::null_mut();
        Result::SUCCESS
    })
}
