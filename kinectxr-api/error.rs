/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use thiserror::Error;

/// Errors surfaced by the device layer.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DeviceError {
    /// No Kinect is connected, or the requested device index is out of range.
    #[error("no Kinect device found")]
    DeviceNotFound,
    /// The driver context or device could not be acquired, or `initialize`
    /// was called twice without tear-down.
    #[error("driver initialization failed: {0}")]
    InitializationFailed(String),
    /// The operation requires an initialized device.
    #[error("device not initialized")]
    NotInitialized,
    /// `start_streams` was called while streams were running.
    #[error("streams already running")]
    AlreadyStreaming,
    /// `stop_streams` was called while no streams were running.
    #[error("streams not running")]
    NotStreaming,
    /// A tilt, LED or status transfer failed.
    #[error("motor control failed: {0}")]
    MotorControlFailed(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}
