/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The seam between the device state machine and the native USB driver.

use crate::DeviceError;

use euclid::default::Vector3D;
use serde::{Deserialize, Serialize};

use std::time::Duration;

/// The motor saturates at this angle, in degrees from horizontal.
pub const TILT_LIMIT_DEGREES: f64 = 27.0;

/// LED states understood by the motor subdevice.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedState {
    Off,
    Green,
    Red,
    Yellow,
    BlinkGreen,
    BlinkRedYellow,
}

/// Where the tilt motor currently is.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TiltStatus {
    Stopped,
    AtLimit,
    Moving,
}

/// An accelerometer sample in m/s².
pub type Accelerometer = Vector3D<f64>;

/// Called with a borrowed RGB buffer (`FRAME_WIDTH · FRAME_HEIGHT · 3`
/// bytes) and the driver's monotonic timestamp. The buffer must not be
/// retained past the call.
pub type VideoCallback = Box<dyn FnMut(&[u8], u64) + Send>;

/// Called with a borrowed depth buffer (`FRAME_WIDTH · FRAME_HEIGHT` 11-bit
/// samples in u16 containers) and the driver's monotonic timestamp.
pub type DepthCallback = Box<dyn FnMut(&[u16], u64) + Send>;

/// Receives frames and stream errors from the driver's event pump.
///
/// All three callbacks run on the event-loop thread. They must not
/// allocate, block, or retain the borrowed buffers.
pub struct FrameSink {
    pub on_video: VideoCallback,
    pub on_depth: DepthCallback,
    pub on_error: Box<dyn FnMut(DeviceError) + Send>,
}

/// The operations the device layer needs from a driver backend.
///
/// Implemented by `FreenectDriver` (libfreenect FFI, macOS only) and by
/// [`mock::MockDriver`](crate::mock::MockDriver). A backend represents an
/// acquired driver context; opening a device, streaming and motor control
/// are layered on top by [`KinectDevice`](crate::KinectDevice).
///
/// Methods take `&self`: the underlying driver serializes its own event
/// poll against control transfers, so motor calls may be issued from any
/// thread while the event loop runs. The device layer still serializes
/// motor calls behind its own mutex.
pub trait DriverApi: Send + Sync {
    /// Number of connected devices. Side-effect free; valid before `open`.
    fn enumerate(&self) -> Result<usize, DeviceError>;

    /// Open the device at `index`, claiming the camera and/or motor
    /// subdevices.
    fn open(&self, index: u32, camera: bool, motor: bool) -> Result<(), DeviceError>;

    /// Release the device. Idempotent.
    fn close(&self);

    fn start_depth(&self) -> Result<(), DeviceError>;
    fn start_video(&self) -> Result<(), DeviceError>;
    fn stop_depth(&self) -> Result<(), DeviceError>;
    fn stop_video(&self) -> Result<(), DeviceError>;

    /// Pump USB events for at most `timeout`, invoking the installed
    /// [`FrameSink`] for every frame that arrived.
    fn process_events(&self, timeout: Duration) -> Result<(), DeviceError>;

    /// Install the frame sink. The previous sink, if any, is dropped.
    fn set_frame_sink(&self, sink: FrameSink);

    /// Command the tilt motor. The caller clamps to
    /// [`TILT_LIMIT_DEGREES`]; backends may block while the motor moves.
    fn set_tilt(&self, degrees: f64) -> Result<(), DeviceError>;

    fn tilt_degrees(&self) -> Result<f64, DeviceError>;
    fn tilt_status(&self) -> Result<TiltStatus, DeviceError>;
    fn accelerometer(&self) -> Result<Accelerometer, DeviceError>;
    fn set_led(&self, state: LedState) -> Result<(), DeviceError>;
}
