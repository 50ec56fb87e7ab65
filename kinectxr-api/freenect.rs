/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! libfreenect-backed driver. Compiled only on macOS with the
//! `libfreenect` feature; everything else in the crate runs against
//! [`MockDriver`](crate::mock::MockDriver).

use crate::Accelerometer;
use crate::DeviceError;
use crate::DriverApi;
use crate::FrameSink;
use crate::LedState;
use crate::TiltStatus;
use crate::DEPTH_FRAME_PIXELS;
use crate::RGB_FRAME_BYTES;

use std::os::raw::{c_int, c_void};
use std::ptr;
use std::sync::Mutex;
use std::time::Duration;

mod sys {
    use std::os::raw::{c_int, c_void};

    pub enum FreenectContext {}
    pub enum FreenectDevice {}

    pub const FREENECT_DEVICE_MOTOR: c_int = 0x01;
    pub const FREENECT_DEVICE_CAMERA: c_int = 0x02;

    pub const FREENECT_RESOLUTION_MEDIUM: c_int = 1;
    pub const FREENECT_VIDEO_RGB: c_int = 0;
    pub const FREENECT_DEPTH_11BIT: c_int = 0;

    pub const TILT_STATUS_LIMIT: c_int = 0x01;
    pub const TILT_STATUS_MOVING: c_int = 0x04;

    #[repr(C)]
    pub struct RawTiltState {
        pub accelerometer_x: i16,
        pub accelerometer_y: i16,
        pub accelerometer_z: i16,
        pub tilt_angle: i8,
        pub tilt_status: c_int,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct FrameMode {
        pub reserved: u32,
        pub resolution: c_int,
        pub format: i32,
        pub bytes: i32,
        pub width: i16,
        pub height: i16,
        pub data_bits_per_pixel: i8,
        pub padding_bits_per_pixel: i8,
        pub framerate: i8,
        pub is_valid: i8,
    }

    #[repr(C)]
    pub struct Timeval {
        pub tv_sec: i64,
        pub tv_usec: i32,
    }

    pub type DepthCb =
        unsafe extern "C" fn(dev: *mut FreenectDevice, depth: *mut c_void, timestamp: u32);
    pub type VideoCb =
        unsafe extern "C" fn(dev: *mut FreenectDevice, video: *mut c_void, timestamp: u32);

    #[link(name = "freenect")]
    extern "C" {
        pub fn freenect_init(ctx: *mut *mut FreenectContext, usb_ctx: *mut c_void) -> c_int;
        pub fn freenect_shutdown(ctx: *mut FreenectContext) -> c_int;
        pub fn freenect_num_devices(ctx: *mut FreenectContext) -> c_int;
        pub fn freenect_select_subdevices(ctx: *mut FreenectContext, subdevs: c_int);
        pub fn freenect_open_device(
            ctx: *mut FreenectContext,
            dev: *mut *mut FreenectDevice,
            index: c_int,
        ) -> c_int;
        pub fn freenect_close_device(dev: *mut FreenectDevice) -> c_int;
        pub fn freenect_set_user(dev: *mut FreenectDevice, user: *mut c_void);
        pub fn freenect_get_user(dev: *mut FreenectDevice) -> *mut c_void;
        pub fn freenect_set_depth_callback(dev: *mut FreenectDevice, cb: DepthCb);
        pub fn freenect_set_video_callback(dev: *mut FreenectDevice, cb: VideoCb);
        pub fn freenect_find_video_mode(resolution: c_int, format: c_int) -> FrameMode;
        pub fn freenect_find_depth_mode(resolution: c_int, format: c_int) -> FrameMode;
        pub fn freenect_set_video_mode(dev: *mut FreenectDevice, mode: FrameMode) -> c_int;
        pub fn freenect_set_depth_mode(dev: *mut FreenectDevice, mode: FrameMode) -> c_int;
        pub fn freenect_start_depth(dev: *mut FreenectDevice) -> c_int;
        pub fn freenect_start_video(dev: *mut FreenectDevice) -> c_int;
        pub fn freenect_stop_depth(dev: *mut FreenectDevice) -> c_int;
        pub fn freenect_stop_video(dev: *mut FreenectDevice) -> c_int;
        pub fn freenect_process_events_timeout(
            ctx: *mut FreenectContext,
            timeout: *mut Timeval,
        ) -> c_int;
        pub fn freenect_set_tilt_degs(dev: *mut FreenectDevice, angle: f64) -> c_int;
        pub fn freenect_update_tilt_state(dev: *mut FreenectDevice) -> c_int;
        pub fn freenect_get_tilt_state(dev: *mut FreenectDevice) -> *mut RawTiltState;
        pub fn freenect_get_tilt_degs(state: *mut RawTiltState) -> f64;
        pub fn freenect_get_tilt_status(state: *mut RawTiltState) -> c_int;
        pub fn freenect_get_mks_accel(
            state: *mut RawTiltState,
            x: *mut f64,
            y: *mut f64,
            z: *mut f64,
        );
        pub fn freenect_set_led(dev: *mut FreenectDevice, option: c_int) -> c_int;
    }
}

fn led_option(state: LedState) -> c_int {
    match state {
        LedState::Off => 0,
        LedState::Green => 1,
        LedState::Red => 2,
        LedState::Yellow => 3,
        LedState::BlinkGreen => 4,
        LedState::BlinkRedYellow => 6,
    }
}

/// The real driver context. The sink lives behind a stable heap address
/// handed to libfreenect as user data; the C trampolines recover it from
/// the device on every frame.
pub struct FreenectDriver {
    ctx: *mut sys::FreenectContext,
    dev: Mutex<*mut sys::FreenectDevice>,
    sink: Box<Mutex<Option<FrameSink>>>,
}

// libfreenect serializes its event poll against control transfers, and the
// device layer adds its own motor mutex on top.
unsafe impl Send for FreenectDriver {}
unsafe impl Sync for FreenectDriver {}

impl FreenectDriver {
    pub fn new() -> Result<FreenectDriver, DeviceError> {
        let mut ctx = ptr::null_mut();
        let rc = unsafe { sys::freenect_init(&mut ctx, ptr::null_mut()) };
        if rc < 0 || ctx.is_null() {
            return Err(DeviceError::InitializationFailed(format!(
                "freenect_init returned {}",
                rc
            )));
        }
        Ok(FreenectDriver {
            ctx,
            dev: Mutex::new(ptr::null_mut()),
            sink: Box::new(Mutex::new(None)),
        })
    }

    fn device(&self) -> Result<*mut sys::FreenectDevice, DeviceError> {
        let dev = *self.dev.lock().expect("device handle poisoned");
        if dev.is_null() {
            return Err(DeviceError::NotInitialized);
        }
        Ok(dev)
    }

    fn tilt_state(&self) -> Result<*mut sys::RawTiltState, DeviceError> {
        let dev = self.device()?;
        let rc = unsafe { sys::freenect_update_tilt_state(dev) };
        if rc < 0 {
            return Err(DeviceError::MotorControlFailed(format!(
                "freenect_update_tilt_state returned {}",
                rc
            )));
        }
        let state = unsafe { sys::freenect_get_tilt_state(dev) };
        if state.is_null() {
            return Err(DeviceError::MotorControlFailed(
                "no tilt state available".into(),
            ));
        }
        Ok(state)
    }
}

unsafe extern "C" fn depth_trampoline(
    dev: *mut sys::FreenectDevice,
    depth: *mut c_void,
    timestamp: u32,
) {
    let user = sys::freenect_get_user(dev);
    if user.is_null() || depth.is_null() {
        return;
    }
    let sink = &*(user as *const Mutex<Option<FrameSink>>);
    if let Some(sink) = sink.lock().expect("sink poisoned").as_mut() {
        let data = std::slice::from_raw_parts(depth as *const u16, DEPTH_FRAME_PIXELS);
        (sink.on_depth)(data, u64::from(timestamp));
    }
}

unsafe extern "C" fn video_trampoline(
    dev: *mut sys::FreenectDevice,
    video: *mut c_void,
    timestamp: u32,
) {
    let user = sys::freenect_get_user(dev);
    if user.is_null() || video.is_null() {
        return;
    }
    let sink = &*(user as *const Mutex<Option<FrameSink>>);
    if let Some(sink) = sink.lock().expect("sink poisoned").as_mut() {
        let data = std::slice::from_raw_parts(video as *const u8, RGB_FRAME_BYTES);
        (sink.on_video)(data, u64::from(timestamp));
    }
}

impl DriverApi for FreenectDriver {
    fn enumerate(&self) -> Result<usize, DeviceError> {
        let count = unsafe { sys::freenect_num_devices(self.ctx) };
        if count < 0 {
            return Err(DeviceError::InitializationFailed(format!(
                "freenect_num_devices returned {}",
                count
            )));
        }
        Ok(count as usize)
    }

    fn open(&self, index: u32, camera: bool, motor: bool) -> Result<(), DeviceError> {
        let mut subdevices = 0;
        if camera {
            subdevices |= sys::FREENECT_DEVICE_CAMERA;
        }
        if motor {
            subdevices |= sys::FREENECT_DEVICE_MOTOR;
        }
        unsafe { sys::freenect_select_subdevices(self.ctx, subdevices) };

        let mut dev = ptr::null_mut();
        let rc = unsafe { sys::freenect_open_device(self.ctx, &mut dev, index as c_int) };
        if rc < 0 || dev.is_null() {
            return Err(DeviceError::DeviceNotFound);
        }

        unsafe {
            sys::freenect_set_user(dev, &*self.sink as *const _ as *mut c_void);
            sys::freenect_set_depth_callback(dev, depth_trampoline);
            sys::freenect_set_video_callback(dev, video_trampoline);
            let video_mode =
                sys::freenect_find_video_mode(sys::FREENECT_RESOLUTION_MEDIUM, sys::FREENECT_VIDEO_RGB);
            let depth_mode =
                sys::freenect_find_depth_mode(sys::FREENECT_RESOLUTION_MEDIUM, sys::FREENECT_DEPTH_11BIT);
            sys::freenect_set_video_mode(dev, video_mode);
            sys::freenect_set_depth_mode(dev, depth_mode);
        }

        *self.dev.lock().expect("device handle poisoned") = dev;
        Ok(())
    }

    fn close(&self) {
        let mut dev = self.dev.lock().expect("device handle poisoned");
        if !dev.is_null() {
            unsafe {
                sys::freenect_close_device(*dev);
            }
            *dev = ptr::null_mut();
        }
    }

    fn start_depth(&self) -> Result<(), DeviceError> {
        let rc = unsafe { sys::freenect_start_depth(self.device()?) };
        if rc < 0 {
            return Err(DeviceError::InitializationFailed(format!(
                "freenect_start_depth returned {}",
                rc
            )));
        }
        Ok(())
    }

    fn start_video(&self) -> Result<(), DeviceError> {
        let rc = unsafe { sys::freenect_start_video(self.device()?) };
        if rc < 0 {
            return Err(DeviceError::InitializationFailed(format!(
                "freenect_start_video returned {}",
                rc
            )));
        }
        Ok(())
    }

    fn stop_depth(&self) -> Result<(), DeviceError> {
        let rc = unsafe { sys::freenect_stop_depth(self.device()?) };
        if rc < 0 {
            return Err(DeviceError::NotStreaming);
        }
        Ok(())
    }

    fn stop_video(&self) -> Result<(), DeviceError> {
        let rc = unsafe { sys::freenect_stop_video(self.device()?) };
        if rc < 0 {
            return Err(DeviceError::NotStreaming);
        }
        Ok(())
    }

    fn process_events(&self, timeout: Duration) -> Result<(), DeviceError> {
        let mut tv = sys::Timeval {
            tv_sec: timeout.as_secs() as i64,
            tv_usec: timeout.subsec_micros() as i32,
        };
        let rc = unsafe { sys::freenect_process_events_timeout(self.ctx, &mut tv) };
        if rc < 0 {
            return Err(DeviceError::InitializationFailed(format!(
                "freenect_process_events returned {}",
                rc
            )));
        }
        Ok(())
    }

    fn set_frame_sink(&self, sink: FrameSink) {
        *self.sink.lock().expect("sink poisoned") = Some(sink);
    }

    fn set_tilt(&self, degrees: f64) -> Result<(), DeviceError> {
        let rc = unsafe { sys::freenect_set_tilt_degs(self.device()?, degrees) };
        if rc < 0 {
            return Err(DeviceError::MotorControlFailed(format!(
                "freenect_set_tilt_degs returned {}",
                rc
            )));
        }
        Ok(())
    }

    fn tilt_degrees(&self) -> Result<f64, DeviceError> {
        let state = self.tilt_state()?;
        Ok(unsafe { sys::freenect_get_tilt_degs(state) })
    }

    fn tilt_status(&self) -> Result<TiltStatus, DeviceError> {
        let state = self.tilt_state()?;
        Ok(match unsafe { sys::freenect_get_tilt_status(state) } {
            sys::TILT_STATUS_MOVING => TiltStatus::Moving,
            sys::TILT_STATUS_LIMIT => TiltStatus::AtLimit,
            _ => TiltStatus::Stopped,
        })
    }

    fn accelerometer(&self) -> Result<Accelerometer, DeviceError> {
        let state = self.tilt_state()?;
        let (mut x, mut y, mut z) = (0.0, 0.0, 0.0);
        unsafe { sys::freenect_get_mks_accel(state, &mut x, &mut y, &mut z) };
        Ok(Accelerometer::new(x, y, z))
    }

    fn set_led(&self, state: LedState) -> Result<(), DeviceError> {
        let rc = unsafe { sys::freenect_set_led(self.device()?, led_option(state)) };
        if rc < 0 {
            return Err(DeviceError::MotorControlFailed(format!(
                "freenect_set_led returned {}",
                rc
            )));
        }
        Ok(())
    }
}

impl Drop for FreenectDriver {
    fn drop(&mut self) {
        self.close();
        unsafe {
            sys::freenect_shutdown(self.ctx);
        }
    }
}
