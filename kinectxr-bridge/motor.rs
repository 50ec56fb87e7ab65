/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Motor control over the bridge: per-connection rate limiting, clamping
//! before submission, and `motor.status` sampling while the motor moves.

use crate::protocol::{MotorErrorCode, ServerMessage};

use kinectxr_api::{DeviceError, KinectDevice, TiltStatus, TILT_LIMIT_DEGREES};
use log::warn;
use tokio::sync::mpsc;

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tilt and reset commands are limited to one per connection per this
/// interval; violations are refused, not queued.
pub const MIN_COMMAND_INTERVAL: Duration = Duration::from_millis(500);

// Sampling cadence while the motor reports Moving, and a cap so a stuck
// status can never pin the task.
const STATUS_SAMPLE_INTERVAL: Duration = Duration::from_millis(150);
const MAX_STATUS_SAMPLES: u32 = 40;

/// The per-connection rate limiter for tilt/reset commands.
pub struct MotorGate {
    last: Option<Instant>,
}

impl MotorGate {
    pub fn new() -> MotorGate {
        MotorGate { last: None }
    }

    pub fn try_pass(&mut self) -> bool {
        self.try_pass_at(Instant::now())
    }

    fn try_pass_at(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.duration_since(last) < MIN_COMMAND_INTERVAL {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}

impl Default for MotorGate {
    fn default() -> MotorGate {
        MotorGate::new()
    }
}

pub fn rate_limited() -> ServerMessage {
    ServerMessage::MotorError {
        code: MotorErrorCode::RateLimited,
        message: "tilt commands are limited to one per 500 ms".to_owned(),
    }
}

fn motor_failure(err: DeviceError) -> ServerMessage {
    ServerMessage::MotorError {
        code: MotorErrorCode::MotorFailure,
        message: err.to_string(),
    }
}

/// One `motor.status` sample off the hardware.
pub fn sample_status(device: &KinectDevice) -> Result<ServerMessage, DeviceError> {
    let tilt_degrees = device.read_tilt()?;
    let status = device.read_tilt_status()?;
    let accel = device.read_accelerometer()?;
    Ok(ServerMessage::MotorStatus {
        tilt_degrees,
        status,
        accelerometer: [accel.x, accel.y, accel.z],
    })
}

/// Submit a tilt command off the async loop (the driver call can block
/// for as long as the motor physically moves) and stream status samples
/// back while it does.
pub fn spawn_tilt(device: Arc<KinectDevice>, angle: f64, out: mpsc::Sender<ServerMessage>) {
    tokio::task::spawn_blocking(move || {
        let clamped = angle.max(-TILT_LIMIT_DEGREES).min(TILT_LIMIT_DEGREES);
        if let Err(err) = device.set_tilt(clamped) {
            warn!("tilt command failed: {}", err);
            let _ = out.blocking_send(motor_failure(err));
            return;
        }
        watch_motion(&device, &out);
    });
}

pub fn spawn_led(
    device: Arc<KinectDevice>,
    state: kinectxr_api::LedState,
    out: mpsc::Sender<ServerMessage>,
) {
    tokio::task::spawn_blocking(move || {
        if let Err(err) = device.set_led(state) {
            warn!("led command failed: {}", err);
            let _ = out.blocking_send(motor_failure(err));
        }
    });
}

pub fn spawn_status(device: Arc<KinectDevice>, out: mpsc::Sender<ServerMessage>) {
    tokio::task::spawn_blocking(move || match sample_status(&device) {
        Ok(status) => {
            let _ = out.blocking_send(status);
        }
        Err(err) => {
            let _ = out.blocking_send(motor_failure(err));
        }
    });
}

// Push motor.status every 100-200 ms while the motor reports Moving,
// finishing with one settled sample.
fn watch_motion(device: &KinectDevice, out: &mpsc::Sender<ServerMessage>) {
    for _ in 0..MAX_STATUS_SAMPLES {
        match sample_status(device) {
            Ok(status) => {
                let moving = matches!(
                    status,
                    ServerMessage::MotorStatus {
                        status: TiltStatus::Moving,
                        ..
                    }
                );
                if out.blocking_send(status).is_err() {
                    return;
                }
                if !moving {
                    return;
                }
            }
            Err(err) => {
                let _ = out.blocking_send(motor_failure(err));
                return;
            }
        }
        std::thread::sleep(STATUS_SAMPLE_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_enforces_the_minimum_interval() {
        let mut gate = MotorGate::new();
        let start = Instant::now();
        assert!(gate.try_pass_at(start));
        assert!(!gate.try_pass_at(start + Duration::from_millis(100)));
        assert!(!gate.try_pass_at(start + Duration::from_millis(499)));
        assert!(gate.try_pass_at(start + Duration::from_millis(500)));
        // The successful pass restarted the window.
        assert!(!gate.try_pass_at(start + Duration::from_millis(600)));
    }

    #[test]
    fn first_command_always_passes() {
        let mut gate = MotorGate::new();
        assert!(gate.try_pass());
    }
}
