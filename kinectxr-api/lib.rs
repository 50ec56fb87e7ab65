/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The device layer of the KinectXR runtime. This crate wraps the native
//! USB depth-camera driver behind the [`DriverApi`] seam, drives its event
//! loop on a dedicated thread, and surfaces RGB, depth and motor callbacks
//! to subscribers. It is consumed by the `kinectxr` runtime crate and by
//! the `kinectxr-bridge` server.

mod device;
mod driver;
mod error;
mod events;
mod frame;
pub mod mock;

#[cfg(all(target_os = "macos", feature = "libfreenect"))]
mod freenect;

pub use device::DeviceConfig;
pub use device::DeviceState;
pub use device::KinectDevice;
pub use device::MOCK_DEVICE_ENV;

pub use driver::Accelerometer;
pub use driver::DepthCallback;
pub use driver::DriverApi;
pub use driver::FrameSink;
pub use driver::LedState;
pub use driver::TiltStatus;
pub use driver::VideoCallback;
pub use driver::TILT_LIMIT_DEGREES;

pub use error::DeviceError;

pub use events::DeviceEvent;
pub use events::DeviceEventBuffer;

pub use frame::FrameCache;
pub use frame::SharedFrameCache;
pub use frame::StreamKind;
pub use frame::DEPTH_FRAME_BYTES;
pub use frame::DEPTH_FRAME_PIXELS;
pub use frame::FRAME_HEIGHT;
pub use frame::FRAME_WIDTH;
pub use frame::RGB_FRAME_BYTES;
pub use frame::SENSOR_FRAME_RATE;

#[cfg(all(target_os = "macos", feature = "libfreenect"))]
pub use freenect::FreenectDriver;

pub type Sender<T> = crossbeam_channel::Sender<T>;
pub type Receiver<T> = crossbeam_channel::Receiver<T>;

pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    crossbeam_channel::unbounded()
}
