/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use crate::Accelerometer;
use crate::DepthCallback;
use crate::DeviceError;
use crate::DeviceEvent;
use crate::DeviceEventBuffer;
use crate::DriverApi;
use crate::FrameSink;
use crate::LedState;
use crate::Sender;
use crate::TiltStatus;
use crate::VideoCallback;
use crate::TILT_LIMIT_DEGREES;

use log::warn;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

/// When set (to anything but "0"), `KinectDevice::open_default` uses the
/// mock driver instead of probing for hardware.
pub const MOCK_DEVICE_ENV: &str = "KINECTXR_MOCK_DEVICE";

// The event thread re-checks the shutdown flag at least this often.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Which device and subdevices `initialize` should claim.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub device_index: u32,
    pub camera: bool,
    pub motor: bool,
}

impl Default for DeviceConfig {
    fn default() -> DeviceConfig {
        DeviceConfig {
            device_index: 0,
            camera: true,
            motor: true,
        }
    }
}

/// Lifecycle of the device layer:
/// `Uninitialized → Initialized → Streaming → Initialized → …`
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeviceState {
    Uninitialized,
    Initialized,
    Streaming,
}

struct CallbackSlots {
    video: Mutex<Option<VideoCallback>>,
    depth: Mutex<Option<DepthCallback>>,
}

/// A thread-safe wrapper around the USB depth-camera driver.
///
/// Owns the driver context and device handle, runs the USB event loop on a
/// dedicated thread while streaming, and forwards RGB/depth frames to the
/// registered callbacks. Motor, LED and status calls are serialized behind
/// an internal mutex which the event thread never takes.
pub struct KinectDevice {
    driver: Arc<dyn DriverApi>,
    state: Arc<Mutex<DeviceState>>,
    // Serializes all driver motor calls; the event loop polls without it.
    motor: Mutex<()>,
    callbacks: Arc<CallbackSlots>,
    streaming: Arc<AtomicBool>,
    event_thread_running: Arc<AtomicBool>,
    event_thread: Mutex<Option<JoinHandle<()>>>,
    events: Arc<Mutex<DeviceEventBuffer>>,
}

impl KinectDevice {
    pub fn new(driver: Arc<dyn DriverApi>) -> KinectDevice {
        KinectDevice {
            driver,
            state: Arc::new(Mutex::new(DeviceState::Uninitialized)),
            motor: Mutex::new(()),
            callbacks: Arc::new(CallbackSlots {
                video: Mutex::new(None),
                depth: Mutex::new(None),
            }),
            streaming: Arc::new(AtomicBool::new(false)),
            event_thread_running: Arc::new(AtomicBool::new(false)),
            event_thread: Mutex::new(None),
            events: Arc::new(Mutex::new(DeviceEventBuffer::default())),
        }
    }

    /// Open a device over the platform driver. Honours
    /// [`MOCK_DEVICE_ENV`] so sessions can run without hardware.
    pub fn open_default() -> Result<KinectDevice, DeviceError> {
        let mock = std::env::var(MOCK_DEVICE_ENV)
            .map(|value| !value.is_empty() && value != "0")
            .unwrap_or(false);
        if mock {
            return Ok(KinectDevice::new(Arc::new(crate::mock::MockDriver::new())));
        }
        #[cfg(all(target_os = "macos", feature = "libfreenect"))]
        {
            return Ok(KinectDevice::new(Arc::new(
                crate::freenect::FreenectDriver::new()?,
            )));
        }
        #[cfg(not(all(target_os = "macos", feature = "libfreenect")))]
        Err(DeviceError::DeviceNotFound)
    }

    /// Number of connected devices. May be called before `initialize`.
    pub fn enumerate(&self) -> usize {
        self.driver.enumerate().unwrap_or(0)
    }

    pub fn state(&self) -> DeviceState {
        *self.state.lock().expect("device state poisoned")
    }

    /// Acquire the device named by `config`. Calling this twice without
    /// tear-down fails rather than re-acquiring.
    pub fn initialize(&self, config: &DeviceConfig) -> Result<(), DeviceError> {
        let mut state = self.state.lock().expect("device state poisoned");
        if *state != DeviceState::Uninitialized {
            return Err(DeviceError::InitializationFailed(
                "device already initialized".into(),
            ));
        }
        if !config.camera && !config.motor {
            return Err(DeviceError::InvalidParameter(
                "no subdevices selected".into(),
            ));
        }
        let count = self.driver.enumerate()?;
        if count == 0 || config.device_index as usize >= count {
            return Err(DeviceError::DeviceNotFound);
        }
        self.driver
            .open(config.device_index, config.camera, config.motor)?;
        *state = DeviceState::Initialized;
        Ok(())
    }

    /// Start the depth + video streams and spawn the event-loop thread.
    pub fn start_streams(&self) -> Result<(), DeviceError> {
        // The state lock is held across the whole bring-up so a
        // concurrent stop_streams cannot interleave with the spawn.
        let mut state = self.state.lock().expect("device state poisoned");
        match *state {
            DeviceState::Uninitialized => return Err(DeviceError::NotInitialized),
            DeviceState::Streaming => return Err(DeviceError::AlreadyStreaming),
            DeviceState::Initialized => {}
        }

        self.install_sink();
        self.driver.start_depth()?;
        if let Err(err) = self.driver.start_video() {
            let _ = self.driver.stop_depth();
            return Err(err);
        }

        // A previous run that died on a USB failure may have left a
        // finished thread behind; reap it before spawning a new one.
        if let Some(stale) = self.event_thread.lock().expect("event thread poisoned").take() {
            let _ = stale.join();
        }

        self.streaming.store(true, Ordering::Release);
        self.event_thread_running.store(true, Ordering::Release);

        let driver = self.driver.clone();
        let thread_state = self.state.clone();
        let streaming = self.streaming.clone();
        let running = self.event_thread_running.clone();
        let events = self.events.clone();
        let handle = thread::spawn(move || {
            run_event_loop(driver, thread_state, streaming, running, events);
        });
        *self.event_thread.lock().expect("event thread poisoned") = Some(handle);
        *state = DeviceState::Streaming;
        Ok(())
    }

    /// Stop both streams. Returns with the event thread joined.
    pub fn stop_streams(&self) -> Result<(), DeviceError> {
        {
            let mut state = self.state.lock().expect("device state poisoned");
            match *state {
                DeviceState::Uninitialized => return Err(DeviceError::NotInitialized),
                DeviceState::Initialized => return Err(DeviceError::NotStreaming),
                DeviceState::Streaming => *state = DeviceState::Initialized,
            }
        }

        self.event_thread_running.store(false, Ordering::Release);
        if let Some(handle) = self.event_thread.lock().expect("event thread poisoned").take() {
            let _ = handle.join();
        }
        let _ = self.driver.stop_video();
        let _ = self.driver.stop_depth();
        self.streaming.store(false, Ordering::Release);
        Ok(())
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// Register the RGB callback. Last registration wins.
    pub fn on_video(&self, callback: VideoCallback) {
        *self.callbacks.video.lock().expect("video slot poisoned") = Some(callback);
    }

    /// Register the depth callback. Last registration wins.
    pub fn on_depth(&self, callback: DepthCallback) {
        *self.callbacks.depth.lock().expect("depth slot poisoned") = Some(callback);
    }

    /// Route device events (disconnects, stream failures) to `dest`,
    /// flushing anything buffered so far.
    pub fn set_event_sink(&self, dest: Sender<DeviceEvent>) {
        self.events
            .lock()
            .expect("device events poisoned")
            .upgrade(dest);
    }

    /// Command the tilt motor. Angles saturate at ±27°; the driver call
    /// may block while the motor is physically moving.
    pub fn set_tilt(&self, degrees: f64) -> Result<(), DeviceError> {
        self.require_open()?;
        let clamped = degrees.max(-TILT_LIMIT_DEGREES).min(TILT_LIMIT_DEGREES);
        let _motor = self.motor.lock().expect("motor mutex poisoned");
        self.driver.set_tilt(clamped)
    }

    pub fn read_tilt(&self) -> Result<f64, DeviceError> {
        self.require_open()?;
        let _motor = self.motor.lock().expect("motor mutex poisoned");
        self.driver.tilt_degrees()
    }

    pub fn read_tilt_status(&self) -> Result<TiltStatus, DeviceError> {
        self.require_open()?;
        let _motor = self.motor.lock().expect("motor mutex poisoned");
        self.driver.tilt_status()
    }

    /// Latest accelerometer sample in m/s².
    pub fn read_accelerometer(&self) -> Result<Accelerometer, DeviceError> {
        self.require_open()?;
        let _motor = self.motor.lock().expect("motor mutex poisoned");
        self.driver.accelerometer()
    }

    pub fn set_led(&self, state: LedState) -> Result<(), DeviceError> {
        self.require_open()?;
        let _motor = self.motor.lock().expect("motor mutex poisoned");
        self.driver.set_led(state)
    }

    fn require_open(&self) -> Result<(), DeviceError> {
        if self.state() == DeviceState::Uninitialized {
            return Err(DeviceError::NotInitialized);
        }
        Ok(())
    }

    fn install_sink(&self) {
        let video_slots = self.callbacks.clone();
        let depth_slots = self.callbacks.clone();
        let events = self.events.clone();
        self.driver.set_frame_sink(FrameSink {
            on_video: Box::new(move |data, timestamp| {
                if let Some(cb) = video_slots
                    .video
                    .lock()
                    .expect("video slot poisoned")
                    .as_mut()
                {
                    cb(data, timestamp);
                }
            }),
            on_depth: Box::new(move |data, timestamp| {
                if let Some(cb) = depth_slots
                    .depth
                    .lock()
                    .expect("depth slot poisoned")
                    .as_mut()
                {
                    cb(data, timestamp);
                }
            }),
            on_error: Box::new(move |err| {
                warn!("stream error: {}", err);
                events
                    .lock()
                    .expect("device events poisoned")
                    .callback(DeviceEvent::StreamFailure(err));
            }),
        });
    }
}

fn run_event_loop(
    driver: Arc<dyn DriverApi>,
    state: Arc<Mutex<DeviceState>>,
    streaming: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    events: Arc<Mutex<DeviceEventBuffer>>,
) {
    while running.load(Ordering::Acquire) {
        if let Err(err) = driver.process_events(EVENT_POLL_INTERVAL) {
            // USB failure mid-stream: fall back to Initialized and let the
            // owner observe the event. No automatic reconnect.
            warn!("USB event loop failed: {}", err);
            let _ = driver.stop_video();
            let _ = driver.stop_depth();
            streaming.store(false, Ordering::Release);
            *state.lock().expect("device state poisoned") = DeviceState::Initialized;
            events
                .lock()
                .expect("device events poisoned")
                .callback(DeviceEvent::Disconnected);
            break;
        }
    }
}

impl Drop for KinectDevice {
    fn drop(&mut self) {
        if self.state() == DeviceState::Streaming {
            let _ = self.stop_streams();
        }
        self.driver.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDriver;
    use crate::{FRAME_HEIGHT, FRAME_WIDTH};

    use std::time::Instant;

    fn mock_device() -> (Arc<MockDriver>, KinectDevice) {
        let driver = Arc::new(MockDriver::new());
        let device = KinectDevice::new(driver.clone());
        (driver, device)
    }

    #[test]
    fn lifecycle_transitions() {
        let (_, device) = mock_device();
        assert_eq!(device.state(), DeviceState::Uninitialized);
        assert_eq!(device.start_streams(), Err(DeviceError::NotInitialized));
        assert_eq!(device.stop_streams(), Err(DeviceError::NotInitialized));

        device.initialize(&DeviceConfig::default()).unwrap();
        assert_eq!(device.state(), DeviceState::Initialized);
        assert!(matches!(
            device.initialize(&DeviceConfig::default()),
            Err(DeviceError::InitializationFailed(_))
        ));
        assert_eq!(device.stop_streams(), Err(DeviceError::NotStreaming));

        device.start_streams().unwrap();
        assert_eq!(device.state(), DeviceState::Streaming);
        assert_eq!(device.start_streams(), Err(DeviceError::AlreadyStreaming));

        device.stop_streams().unwrap();
        assert_eq!(device.state(), DeviceState::Initialized);
        device.start_streams().unwrap();
        device.stop_streams().unwrap();
    }

    #[test]
    fn missing_device_is_reported() {
        let device = KinectDevice::new(Arc::new(MockDriver::disconnected()));
        assert_eq!(device.enumerate(), 0);
        assert_eq!(
            device.initialize(&DeviceConfig::default()),
            Err(DeviceError::DeviceNotFound)
        );
    }

    #[test]
    fn callbacks_deliver_frames() {
        let (_, device) = mock_device();
        device.initialize(&DeviceConfig::default()).unwrap();

        let (video_tx, video_rx) = crate::channel();
        let (depth_tx, depth_rx) = crate::channel();
        device.on_video(Box::new(move |data, timestamp| {
            let _ = video_tx.send((data.len(), timestamp));
        }));
        device.on_depth(Box::new(move |data, timestamp| {
            let _ = depth_tx.send((data.len(), timestamp));
        }));

        device.start_streams().unwrap();
        let (video_len, _) = video_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let (depth_len, _) = depth_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        device.stop_streams().unwrap();

        assert_eq!(video_len, FRAME_WIDTH * FRAME_HEIGHT * 3);
        assert_eq!(depth_len, FRAME_WIDTH * FRAME_HEIGHT);
    }

    #[test]
    fn stop_streams_joins_the_event_thread() {
        let (_, device) = mock_device();
        device.initialize(&DeviceConfig::default()).unwrap();
        device.start_streams().unwrap();
        let start = Instant::now();
        device.stop_streams().unwrap();
        assert!(!device.is_streaming());
        // The join must not hang on the poll cycle.
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn tilt_commands_saturate() {
        let (driver, device) = mock_device();
        device.initialize(&DeviceConfig::default()).unwrap();

        device.set_tilt(90.0).unwrap();
        assert_eq!(device.read_tilt().unwrap(), TILT_LIMIT_DEGREES);
        assert_eq!(driver.last_commanded_tilt(), Some(TILT_LIMIT_DEGREES));

        device.set_tilt(-90.0).unwrap();
        assert_eq!(driver.last_commanded_tilt(), Some(-TILT_LIMIT_DEGREES));

        device.set_tilt(10.0).unwrap();
        assert_eq!(driver.last_commanded_tilt(), Some(10.0));
    }

    #[test]
    fn motor_calls_require_initialization() {
        let (_, device) = mock_device();
        assert_eq!(device.set_tilt(0.0), Err(DeviceError::NotInitialized));
        assert_eq!(device.set_led(LedState::Green), Err(DeviceError::NotInitialized));
    }
}
