/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! An OpenXR runtime for the first-generation Kinect depth sensor.
//!
//! The crate builds as a `cdylib` consumed by the OpenXR loader through
//! [`entry::xrNegotiateLoaderRuntimeInterface`], and as an `rlib` so the
//! state machines can be exercised directly by tests and tools. The device
//! layer lives in the `kinectxr-api` crate.

pub mod entry;
pub mod frame;
pub mod graphics;
pub mod instance;
pub mod loader;
pub mod manifest;
pub mod pipeline;
pub mod runtime;
pub mod session;
pub mod space;
pub mod swapchain;
pub mod system;
pub mod util;

/// Internal ops return either a value or the OpenXR result code the entry
/// point should surface.
pub(crate) type OpResult<T> = Result<T, openxr_sys::Result>;
