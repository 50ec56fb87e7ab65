/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! A mock driver backend. Used by unit tests, by sessions started with
//! `KINECTXR_MOCK_DEVICE`, and by the bridge server's `--mock` source.

use crate::Accelerometer;
use crate::DeviceError;
use crate::DriverApi;
use crate::FrameSink;
use crate::LedState;
use crate::TiltStatus;
use crate::DEPTH_FRAME_PIXELS;
use crate::FRAME_HEIGHT;
use crate::FRAME_WIDTH;
use crate::RGB_FRAME_BYTES;
use crate::TILT_LIMIT_DEGREES;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

// 30 Hz cadence.
const FRAME_INTERVAL: Duration = Duration::from_nanos(33_333_333);

// How long a simulated tilt move takes.
const MOTOR_TRAVEL_TIME: Duration = Duration::from_millis(300);

/// Deterministic animated test pattern, shared with the bridge's mock
/// source. Depth values stay inside the sensor's 11-bit range.
pub struct SyntheticFrames {
    frame: u64,
}

impl SyntheticFrames {
    pub fn new() -> SyntheticFrames {
        SyntheticFrames { frame: 0 }
    }

    /// Returns the current frame index and advances the animation.
    pub fn advance(&mut self) -> u64 {
        let frame = self.frame;
        self.frame += 1;
        frame
    }

    /// Horizontally scrolling gradient.
    pub fn fill_rgb(frame: u64, out: &mut [u8]) {
        debug_assert!(out.len() >= RGB_FRAME_BYTES);
        let phase = (frame as usize) * 4;
        for y in 0..FRAME_HEIGHT {
            let row = y * FRAME_WIDTH * 3;
            let green = ((y * 255) / FRAME_HEIGHT) as u8;
            for x in 0..FRAME_WIDTH {
                let i = row + x * 3;
                out[i] = ((((x + phase) % FRAME_WIDTH) * 255) / FRAME_WIDTH) as u8;
                out[i + 1] = green;
                out[i + 2] = 128;
            }
        }
    }

    /// Diagonal ramp sweeping through the 11-bit depth range.
    pub fn fill_depth(frame: u64, out: &mut [u16]) {
        debug_assert!(out.len() >= DEPTH_FRAME_PIXELS);
        let phase = (frame as usize) * 8;
        for y in 0..FRAME_HEIGHT {
            let row = y * FRAME_WIDTH;
            for x in 0..FRAME_WIDTH {
                out[row + x] = ((x + y + phase) % 2048) as u16;
            }
        }
    }
}

impl Default for SyntheticFrames {
    fn default() -> SyntheticFrames {
        SyntheticFrames::new()
    }
}

struct MotorModel {
    commanded: Option<f64>,
    angle: f64,
    led: LedState,
    move_until: Option<Instant>,
}

struct Pacer {
    generator: SyntheticFrames,
    next_due: Option<Instant>,
    timestamp: u64,
    rgb: Vec<u8>,
    depth: Vec<u16>,
}

/// Synthesizes frames at the sensor cadence and models the motor.
pub struct MockDriver {
    device_count: usize,
    opened: AtomicBool,
    depth_streaming: AtomicBool,
    video_streaming: AtomicBool,
    fail_next_poll: AtomicBool,
    sink: Mutex<Option<FrameSink>>,
    motor: Mutex<MotorModel>,
    pacer: Mutex<Pacer>,
}

impl MockDriver {
    pub fn new() -> MockDriver {
        MockDriver::with_devices(1)
    }

    /// A driver context with no devices attached, for exercising the
    /// missing-hardware paths.
    pub fn disconnected() -> MockDriver {
        MockDriver::with_devices(0)
    }

    pub fn with_devices(device_count: usize) -> MockDriver {
        MockDriver {
            device_count,
            opened: AtomicBool::new(false),
            depth_streaming: AtomicBool::new(false),
            video_streaming: AtomicBool::new(false),
            fail_next_poll: AtomicBool::new(false),
            sink: Mutex::new(None),
            motor: Mutex::new(MotorModel {
                commanded: None,
                angle: 0.0,
                led: LedState::Off,
                move_until: None,
            }),
            pacer: Mutex::new(Pacer {
                generator: SyntheticFrames::new(),
                next_due: None,
                timestamp: 0,
                rgb: vec![0; RGB_FRAME_BYTES],
                depth: vec![0; DEPTH_FRAME_PIXELS],
            }),
        }
    }

    /// The next `process_events` call fails as if the USB transfer died.
    pub fn inject_poll_failure(&self) {
        self.fail_next_poll.store(true, Ordering::Release);
    }

    /// The last angle the driver was asked to move to, post-clamping.
    pub fn last_commanded_tilt(&self) -> Option<f64> {
        self.motor.lock().expect("motor model poisoned").commanded
    }

    pub fn led(&self) -> LedState {
        self.motor.lock().expect("motor model poisoned").led
    }

    fn require_open(&self) -> Result<(), DeviceError> {
        if !self.opened.load(Ordering::Acquire) {
            return Err(DeviceError::NotInitialized);
        }
        Ok(())
    }
}

impl Default for MockDriver {
    fn default() -> MockDriver {
        MockDriver::new()
    }
}

impl DriverApi for MockDriver {
    fn enumerate(&self) -> Result<usize, DeviceError> {
        Ok(self.device_count)
    }

    fn open(&self, index: u32, _camera: bool, _motor: bool) -> Result<(), DeviceError> {
        if index as usize >= self.device_count {
            return Err(DeviceError::DeviceNotFound);
        }
        self.opened.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&self) {
        self.opened.store(false, Ordering::Release);
        self.depth_streaming.store(false, Ordering::Release);
        self.video_streaming.store(false, Ordering::Release);
    }

    fn start_depth(&self) -> Result<(), DeviceError> {
        self.require_open()?;
        self.depth_streaming.store(true, Ordering::Release);
        Ok(())
    }

    fn start_video(&self) -> Result<(), DeviceError> {
        self.require_open()?;
        self.video_streaming.store(true, Ordering::Release);
        Ok(())
    }

    fn stop_depth(&self) -> Result<(), DeviceError> {
        self.depth_streaming.store(false, Ordering::Release);
        Ok(())
    }

    fn stop_video(&self) -> Result<(), DeviceError> {
        self.video_streaming.store(false, Ordering::Release);
        Ok(())
    }

    fn process_events(&self, timeout: Duration) -> Result<(), DeviceError> {
        self.require_open()?;
        if self.fail_next_poll.swap(false, Ordering::AcqRel) {
            return Err(DeviceError::InitializationFailed(
                "simulated USB transfer failure".into(),
            ));
        }

        let depth_on = self.depth_streaming.load(Ordering::Acquire);
        let video_on = self.video_streaming.load(Ordering::Acquire);
        if !depth_on && !video_on {
            thread::sleep(timeout);
            return Ok(());
        }

        let now = Instant::now();
        let mut pacer = self.pacer.lock().expect("pacer poisoned");
        let due = *pacer.next_due.get_or_insert(now);
        if now < due {
            let wait = (due - now).min(timeout);
            drop(pacer);
            thread::sleep(wait);
            return Ok(());
        }
        pacer.next_due = Some(due + FRAME_INTERVAL);
        pacer.timestamp += 1;

        let Pacer {
            ref mut generator,
            ref mut rgb,
            ref mut depth,
            timestamp,
            ..
        } = *pacer;
        let frame = generator.advance();
        if video_on {
            SyntheticFrames::fill_rgb(frame, rgb);
        }
        if depth_on {
            SyntheticFrames::fill_depth(frame, depth);
        }

        if let Some(sink) = self.sink.lock().expect("sink poisoned").as_mut() {
            if video_on {
                (sink.on_video)(rgb, timestamp);
            }
            if depth_on {
                (sink.on_depth)(depth, timestamp);
            }
        }
        Ok(())
    }

    fn set_frame_sink(&self, sink: FrameSink) {
        *self.sink.lock().expect("sink poisoned") = Some(sink);
    }

    fn set_tilt(&self, degrees: f64) -> Result<(), DeviceError> {
        self.require_open()?;
        let mut motor = self.motor.lock().expect("motor model poisoned");
        motor.commanded = Some(degrees);
        motor.angle = degrees;
        motor.move_until = Some(Instant::now() + MOTOR_TRAVEL_TIME);
        Ok(())
    }

    fn tilt_degrees(&self) -> Result<f64, DeviceError> {
        self.require_open()?;
        Ok(self.motor.lock().expect("motor model poisoned").angle)
    }

    fn tilt_status(&self) -> Result<TiltStatus, DeviceError> {
        self.require_open()?;
        let motor = self.motor.lock().expect("motor model poisoned");
        if let Some(until) = motor.move_until {
            if Instant::now() < until {
                return Ok(TiltStatus::Moving);
            }
        }
        if motor.angle.abs() >= TILT_LIMIT_DEGREES {
            Ok(TiltStatus::AtLimit)
        } else {
            Ok(TiltStatus::Stopped)
        }
    }

    fn accelerometer(&self) -> Result<Accelerometer, DeviceError> {
        self.require_open()?;
        let angle = self
            .motor
            .lock()
            .expect("motor model poisoned")
            .angle
            .to_radians();
        Ok(Accelerometer::new(
            0.0,
            -9.80665 * angle.cos(),
            9.80665 * angle.sin(),
        ))
    }

    fn set_led(&self, state: LedState) -> Result<(), DeviceError> {
        self.require_open()?;
        self.motor.lock().expect("motor model poisoned").led = state;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_is_deterministic() {
        let mut a = vec![0u8; RGB_FRAME_BYTES];
        let mut b = vec![0u8; RGB_FRAME_BYTES];
        SyntheticFrames::fill_rgb(3, &mut a);
        SyntheticFrames::fill_rgb(3, &mut b);
        assert_eq!(a, b);
        SyntheticFrames::fill_rgb(4, &mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn depth_pattern_stays_in_sensor_range() {
        let mut depth = vec![0u16; DEPTH_FRAME_PIXELS];
        SyntheticFrames::fill_depth(1000, &mut depth);
        assert!(depth.iter().all(|&sample| sample < 2048));
    }

    #[test]
    fn tilt_status_settles() {
        let driver = MockDriver::new();
        driver.open(0, true, true).unwrap();
        driver.set_tilt(10.0).unwrap();
        assert_eq!(driver.tilt_status().unwrap(), TiltStatus::Moving);
        thread::sleep(MOTOR_TRAVEL_TIME + Duration::from_millis(50));
        assert_eq!(driver.tilt_status().unwrap(), TiltStatus::Stopped);

        driver.set_tilt(TILT_LIMIT_DEGREES).unwrap();
        thread::sleep(MOTOR_TRAVEL_TIME + Duration::from_millis(50));
        assert_eq!(driver.tilt_status().unwrap(), TiltStatus::AtLimit);
    }

    #[test]
    fn injected_poll_failure_surfaces_once() {
        let driver = MockDriver::new();
        driver.open(0, true, true).unwrap();
        driver.inject_poll_failure();
        assert!(driver.process_events(Duration::from_millis(1)).is_err());
        assert!(driver.process_events(Duration::from_millis(1)).is_ok());
    }
}
