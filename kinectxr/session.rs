/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Session lifecycle: IDLE ↔ READY ↔ SYNCHRONIZED ↔ VISIBLE ↔ FOCUSED ↔
//! STOPPING, with the owned device layer brought up on `xrBeginSession`
//! and torn down on `xrEndSession`.

use crate::graphics;
use crate::instance::QueuedEvent;
use crate::pipeline;
use crate::runtime::Runtime;
use crate::system;
use crate::util;
use crate::OpResult;

use kinectxr_api::{DeviceConfig, FrameCache, KinectDevice, SharedFrameCache};
use log::warn;
use openxr_sys::{
    BaseInStructure, GraphicsBindingMetalKHR, Result, SessionBeginInfo, SessionCreateInfo,
    SessionState, StructureType, ViewConfigurationType,
};

use std::os::raw::c_void;
use std::sync::Mutex;

/// The compositor period: the sensor's 30 Hz expressed in nanoseconds.
pub const FRAME_PERIOD_NS: i64 = 33_333_333;

/// Frame-loop bookkeeping, guarded by the session's coarse mutex.
#[derive(Default)]
pub struct FrameLoopState {
    /// Clock reading taken by the most recent `xrWaitFrame`.
    pub last_wait_ns: i64,
    pub frame_count: u64,
    pub frame_in_progress: bool,
}

pub struct Session {
    pub instance: u64,
    pub system: u64,
    pub state: SessionState,
    pub view_configuration: Option<ViewConfigurationType>,
    /// Borrowed from the application's Metal graphics binding.
    pub command_queue: usize,
    /// Owned while the session is running.
    pub device: Option<KinectDevice>,
    pub cache: SharedFrameCache,
    pub frame_loop: FrameLoopState,
}

impl Session {
    fn new(instance: u64, system: u64, command_queue: usize) -> Session {
        Session {
            instance,
            system,
            state: SessionState::READY,
            view_configuration: None,
            command_queue,
            device: None,
            cache: FrameCache::new_shared(),
            frame_loop: FrameLoopState::default(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::SYNCHRONIZED
            || self.state == SessionState::VISIBLE
            || self.state == SessionState::FOCUSED
    }
}

unsafe fn find_metal_binding(mut next: *const c_void) -> Option<*const GraphicsBindingMetalKHR> {
    while !next.is_null() {
        let header = &*(next as *const BaseInStructure);
        if header.ty == StructureType::GRAPHICS_BINDING_METAL_KHR {
            return Some(next as *const GraphicsBindingMetalKHR);
        }
        next = header.next as *const c_void;
    }
    None
}

/// Queue a `SessionStateChanged` event on the owning instance. Callers may
/// hold the session lock; sessions lock before instances, never the other
/// way around.
fn queue_state_event(rt: &Runtime, instance_handle: u64, session_handle: u64, state: SessionState) {
    if let Some(instance) = rt.instances.get(instance_handle) {
        instance
            .lock()
            .expect("instance poisoned")
            .queue_event(QueuedEvent::SessionStateChanged {
                session: session_handle,
                state,
                time_ns: util::now_monotonic_ns(),
            });
    }
}

/// Validate the Metal graphics binding and register the session. The new
/// session enters READY immediately and a READY event is queued.
pub fn create_session(
    rt: &Runtime,
    instance_handle: u64,
    info: &SessionCreateInfo,
) -> OpResult<u64> {
    if info.ty != StructureType::SESSION_CREATE_INFO {
        return Err(Result::ERROR_VALIDATION_FAILURE);
    }
    system::validate_system(rt, instance_handle, info.system_id)?;

    let binding = unsafe { find_metal_binding(info.next) }
        .ok_or(Result::ERROR_GRAPHICS_DEVICE_INVALID)?;
    let command_queue = unsafe { (*binding).command_queue } as usize;
    if command_queue == 0 {
        return Err(Result::ERROR_GRAPHICS_DEVICE_INVALID);
    }

    let instance = rt
        .instances
        .get(instance_handle)
        .ok_or(Result::ERROR_HANDLE_INVALID)?;
    let mut instance = instance.lock().expect("instance poisoned");
    if instance.session.is_some() {
        return Err(Result::ERROR_LIMIT_REACHED);
    }
    let system = instance.system.ok_or(Result::ERROR_SYSTEM_INVALID)?;

    let handle = rt
        .sessions
        .insert(Mutex::new(Session::new(instance_handle, system, command_queue)));
    instance.session = Some(handle);
    instance.queue_event(QueuedEvent::SessionStateChanged {
        session: handle,
        state: SessionState::READY,
        time_ns: util::now_monotonic_ns(),
    });
    Ok(handle)
}

/// Start the session: bring up the device layer, wire its callbacks into
/// the frame cache, and run READY → SYNCHRONIZED → VISIBLE → FOCUSED.
pub fn begin_session(rt: &Runtime, session_handle: u64, info: &SessionBeginInfo) -> OpResult<()> {
    if info.ty != StructureType::SESSION_BEGIN_INFO {
        return Err(Result::ERROR_VALIDATION_FAILURE);
    }
    let session = rt
        .sessions
        .get(session_handle)
        .ok_or(Result::ERROR_HANDLE_INVALID)?;
    let mut session = session.lock().expect("session poisoned");

    if info.primary_view_configuration_type != system::VIEW_CONFIGURATION {
        return Err(Result::ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED);
    }
    if session.state != SessionState::READY {
        return Err(Result::ERROR_SESSION_NOT_READY);
    }

    let device = start_device(&session.cache).map_err(|err| {
        warn!("no usable Kinect: {}", err);
        Result::ERROR_FORM_FACTOR_UNAVAILABLE
    })?;
    session.device = Some(device);
    session.view_configuration = Some(info.primary_view_configuration_type);
    session.state = SessionState::FOCUSED;

    let instance_handle = session.instance;
    for state in [
        SessionState::SYNCHRONIZED,
        SessionState::VISIBLE,
        SessionState::FOCUSED,
    ]
    .iter()
    {
        queue_state_event(rt, instance_handle, session_handle, *state);
    }
    Ok(())
}

fn start_device(cache: &SharedFrameCache) -> std::result::Result<KinectDevice, kinectxr_api::DeviceError> {
    let device = KinectDevice::open_default()?;
    device.initialize(&DeviceConfig::default())?;
    pipeline::install_cache_callbacks(&device, cache.clone());
    device.start_streams()?;
    Ok(device)
}

/// Stop the session: STOPPING then IDLE, with the device released.
pub fn end_session(rt: &Runtime, session_handle: u64) -> OpResult<()> {
    let session = rt
        .sessions
        .get(session_handle)
        .ok_or(Result::ERROR_HANDLE_INVALID)?;
    let mut session = session.lock().expect("session poisoned");
    if !session.is_running() {
        return Err(Result::ERROR_SESSION_NOT_RUNNING);
    }
    if let Some(device) = session.device.take() {
        if let Err(err) = device.stop_streams() {
            warn!("stopping streams failed: {}", err);
        }
    }
    session.state = SessionState::IDLE;
    session.frame_loop = FrameLoopState::default();

    let instance_handle = session.instance;
    queue_state_event(rt, instance_handle, session_handle, SessionState::STOPPING);
    queue_state_event(rt, instance_handle, session_handle, SessionState::IDLE);
    Ok(())
}

/// `xrDestroySession`: disallowed while the session is running.
pub fn destroy_session(rt: &Runtime, session_handle: u64) -> OpResult<()> {
    {
        let session = rt
            .sessions
            .get(session_handle)
            .ok_or(Result::ERROR_HANDLE_INVALID)?;
        let session = session.lock().expect("session poisoned");
        if session.is_running() {
            return Err(Result::ERROR_SESSION_RUNNING);
        }
    }
    teardown_session(rt, session_handle);
    Ok(())
}

/// Remove the session and its descendants unconditionally, stopping the
/// device if it is still up. Also used by `xrDestroyInstance`.
pub fn teardown_session(rt: &Runtime, session_handle: u64) {
    let session = match rt.sessions.remove(session_handle) {
        Some(session) => session,
        None => return,
    };
    let instance_handle = {
        let mut session = session.lock().expect("session poisoned");
        if let Some(device) = session.device.take() {
            let _ = device.stop_streams();
        }
        session.instance
    };

    rt.spaces.remove_where(|space| space.session == session_handle);
    let swapchains = rt.swapchains.remove_where(|swapchain| {
        swapchain.lock().expect("swapchain poisoned").session == session_handle
    });
    for swapchain in swapchains {
        let swapchain = swapchain.lock().expect("swapchain poisoned");
        for texture in swapchain.textures.iter() {
            graphics::release(*texture);
        }
    }

    if let Some(instance) = rt.instances.get(instance_handle) {
        let mut instance = instance.lock().expect("instance poisoned");
        if instance.session == Some(session_handle) {
            instance.session = None;
        }
    }
}
