/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The loader negotiation handshake. These records mirror the loader's
//! `loader_interfaces.h`; they are not part of the OpenXR registry, so
//! `openxr-sys` does not carry them.

use openxr_sys::{pfn, Result, Version, CURRENT_API_VERSION};

use std::mem;

pub const LOADER_INFO_STRUCT_VERSION: u32 = 1;
pub const RUNTIME_INFO_STRUCT_VERSION: u32 = 1;

/// The loader-runtime interface version this runtime speaks.
pub const CURRENT_LOADER_RUNTIME_VERSION: u32 = 1;

#[repr(transparent)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LoaderInterfaceStructs(pub i32);

impl LoaderInterfaceStructs {
    pub const UNINITIALIZED: LoaderInterfaceStructs = LoaderInterfaceStructs(0);
    pub const LOADER_INFO: LoaderInterfaceStructs = LoaderInterfaceStructs(1);
    pub const API_LAYER_REQUEST: LoaderInterfaceStructs = LoaderInterfaceStructs(2);
    pub const RUNTIME_REQUEST: LoaderInterfaceStructs = LoaderInterfaceStructs(3);
}

/// What the loader supports, filled by the loader.
#[repr(C)]
pub struct NegotiateLoaderInfo {
    pub ty: LoaderInterfaceStructs,
    pub struct_version: u32,
    pub struct_size: usize,
    pub min_interface_version: u32,
    pub max_interface_version: u32,
    pub min_api_version: Version,
    pub max_api_version: Version,
}

/// What the runtime offers, filled by us.
#[repr(C)]
pub struct NegotiateRuntimeRequest {
    pub ty: LoaderInterfaceStructs,
    pub struct_version: u32,
    pub struct_size: usize,
    pub runtime_interface_version: u32,
    pub runtime_api_version: Version,
    pub get_instance_proc_addr: Option<pfn::GetInstanceProcAddr>,
}

/// Validate the loader's side of the handshake and fill our side.
///
/// # Safety
/// Pointers must be null or valid for the declared struct sizes.
pub unsafe fn negotiate(
    loader_info: *const NegotiateLoaderInfo,
    runtime_request: *mut NegotiateRuntimeRequest,
    get_instance_proc_addr: pfn::GetInstanceProcAddr,
) -> Result {
    if loader_info.is_null() || runtime_request.is_null() {
        return Result::ERROR_INITIALIZATION_FAILED;
    }
    let info = &*loader_info;
    if info.ty != LoaderInterfaceStructs::LOADER_INFO
        || info.struct_version != LOADER_INFO_STRUCT_VERSION
        || info.struct_size != mem::size_of::<NegotiateLoaderInfo>()
    {
        return Result::ERROR_INITIALIZATION_FAILED;
    }
    let request = &mut *runtime_request;
    if request.ty != LoaderInterfaceStructs::RUNTIME_REQUEST
        || request.struct_version != RUNTIME_INFO_STRUCT_VERSION
        || request.struct_size != mem::size_of::<NegotiateRuntimeRequest>()
    {
        return Result::ERROR_INITIALIZATION_FAILED;
    }
    if CURRENT_LOADER_RUNTIME_VERSION < info.min_interface_version
        || CURRENT_LOADER_RUNTIME_VERSION > info.max_interface_version
    {
        return Result::ERROR_INITIALIZATION_FAILED;
    }
    if !api_version_in_window(CURRENT_API_VERSION, info.min_api_version, info.max_api_version) {
        return Result::ERROR_INITIALIZATION_FAILED;
    }

    request.runtime_interface_version = CURRENT_LOADER_RUNTIME_VERSION;
    request.runtime_api_version = CURRENT_API_VERSION;
    request.get_instance_proc_addr = Some(get_instance_proc_addr);
    Result::SUCCESS
}

// Patch versions do not participate in the window check.
fn api_version_in_window(version: Version, min: Version, max: Version) -> bool {
    let key = (version.major(), version.minor());
    key >= (min.major(), min.minor()) && key <= (max.major(), max.minor())
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "system" fn stub_gipa(
        _instance: openxr_sys::Instance,
        _name: *const std::os::raw::c_char,
        _function: *mut Option<pfn::VoidFunction>,
    ) -> Result {
        Result::SUCCESS
    }

    fn loader_info() -> NegotiateLoaderInfo {
        NegotiateLoaderInfo {
            ty: LoaderInterfaceStructs::LOADER_INFO,
            struct_version: LOADER_INFO_STRUCT_VERSION,
            struct_size: mem::size_of::<NegotiateLoaderInfo>(),
            min_interface_version: 1,
            max_interface_version: 1,
            min_api_version: Version::new(1, 0, 0),
            max_api_version: Version::new(1, 0, u32::MAX),
        }
    }

    fn runtime_request() -> NegotiateRuntimeRequest {
        NegotiateRuntimeRequest {
            ty: LoaderInterfaceStructs::RUNTIME_REQUEST,
            struct_version: RUNTIME_INFO_STRUCT_VERSION,
            struct_size: mem::size_of::<NegotiateRuntimeRequest>(),
            runtime_interface_version: 0,
            runtime_api_version: Version::new(0, 0, 0),
            get_instance_proc_addr: None,
        }
    }

    #[test]
    fn handshake_fills_the_request() {
        let info = loader_info();
        let mut request = runtime_request();
        let result = unsafe { negotiate(&info, &mut request, stub_gipa) };
        assert_eq!(result, Result::SUCCESS);
        assert_eq!(request.runtime_interface_version, CURRENT_LOADER_RUNTIME_VERSION);
        assert!(request.get_instance_proc_addr.is_some());
    }

    #[test]
    fn bad_struct_tags_fail_the_handshake() {
        let mut info = loader_info();
        info.ty = LoaderInterfaceStructs::UNINITIALIZED;
        let mut request = runtime_request();
        assert_eq!(
            unsafe { negotiate(&info, &mut request, stub_gipa) },
            Result::ERROR_INITIALIZATION_FAILED
        );
    }

    #[test]
    fn interface_window_must_cover_ours() {
        let mut info = loader_info();
        info.min_interface_version = 2;
        info.max_interface_version = 3;
        let mut request = runtime_request();
        assert_eq!(
            unsafe { negotiate(&info, &mut request, stub_gipa) },
            Result::ERROR_INITIALIZATION_FAILED
        );
    }

    #[test]
    fn api_window_must_cover_ours() {
        let mut info = loader_info();
        info.min_api_version = Version::new(2, 0, 0);
        info.max_api_version = Version::new(2, 1, 0);
        let mut request = runtime_request();
        assert_eq!(
            unsafe { negotiate(&info, &mut request, stub_gipa) },
            Result::ERROR_INITIALIZATION_FAILED
        );
    }
}
