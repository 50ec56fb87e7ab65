/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use crate::runtime::Runtime;
use crate::session;
use crate::util;
use crate::OpResult;

use log::warn;
use openxr_sys::{InstanceCreateInfo, Result, SessionState, StructureType, Version};

use std::collections::VecDeque;

pub const RUNTIME_NAME: &str = "Kinect XR Runtime";
pub const RUNTIME_VERSION: Version = Version::new(0, 1, 0);

pub const EXT_COMPOSITION_LAYER_DEPTH: &str = "XR_KHR_composition_layer_depth";
pub const EXT_METAL_ENABLE: &str = "XR_KHR_metal_enable";

/// The advertised extension set, in enumeration order.
pub const SUPPORTED_EXTENSIONS: &[(&str, u32)] = &[
    (EXT_COMPOSITION_LAYER_DEPTH, 1),
    (EXT_METAL_ENABLE, 1),
];

// Events queued past this depth drop the oldest entry.
const EVENT_QUEUE_CAP: usize = 32;

pub fn is_supported_extension(name: &str) -> bool {
    SUPPORTED_EXTENSIONS.iter().any(|&(ext, _)| ext == name)
}

/// An event waiting for `xrPollEvent`, in transition order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum QueuedEvent {
    SessionStateChanged {
        session: u64,
        state: SessionState,
        time_ns: i64,
    },
    InstanceLossPending {
        time_ns: i64,
    },
}

pub struct Instance {
    pub application_name: String,
    pub application_version: u32,
    pub engine_name: String,
    pub engine_version: u32,
    pub api_version: Version,
    pub enabled_extensions: Vec<String>,
    /// Lazily created on the first `xrGetSystem`.
    pub system: Option<u64>,
    /// At most one session per instance.
    pub session: Option<u64>,
    events: VecDeque<QueuedEvent>,
}

impl Instance {
    pub fn extension_enabled(&self, name: &str) -> bool {
        self.enabled_extensions.iter().any(|ext| ext == name)
    }

    pub fn queue_event(&mut self, event: QueuedEvent) {
        if self.events.len() >= EVENT_QUEUE_CAP {
            warn!("event queue full; dropping oldest event");
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn poll_event(&mut self) -> Option<QueuedEvent> {
        self.events.pop_front()
    }
}

/// Validate an `XrInstanceCreateInfo` and register the instance.
pub fn create_instance(rt: &Runtime, info: &InstanceCreateInfo) -> OpResult<u64> {
    if info.ty != StructureType::INSTANCE_CREATE_INFO {
        return Err(Result::ERROR_VALIDATION_FAILURE);
    }
    let api_version = info.application_info.api_version;
    if api_version.major() != 1 {
        return Err(Result::ERROR_API_VERSION_UNSUPPORTED);
    }

    let mut enabled_extensions = Vec::new();
    for i in 0..info.enabled_extension_count as usize {
        let name = unsafe { util::read_cstr_ptr(*info.enabled_extension_names.add(i)) }
            .ok_or(Result::ERROR_VALIDATION_FAILURE)?;
        if !is_supported_extension(&name) {
            warn!("unsupported extension requested: {}", name);
            return Err(Result::ERROR_EXTENSION_NOT_PRESENT);
        }
        enabled_extensions.push(name);
    }

    // Layers are not implemented; requesting one cannot succeed.
    if info.enabled_api_layer_count != 0 {
        return Err(Result::ERROR_API_LAYER_NOT_PRESENT);
    }

    let instance = Instance {
        application_name: util::read_cstr(&info.application_info.application_name),
        application_version: info.application_info.application_version,
        engine_name: util::read_cstr(&info.application_info.engine_name),
        engine_version: info.application_info.engine_version,
        api_version,
        enabled_extensions,
        system: None,
        session: None,
        events: VecDeque::new(),
    };
    Ok(rt.instances.insert(std::sync::Mutex::new(instance)))
}

/// Remove the instance and every descendant entity.
pub fn destroy_instance(rt: &Runtime, handle: u64) -> OpResult<()> {
    let instance = rt
        .instances
        .remove(handle)
        .ok_or(Result::ERROR_HANDLE_INVALID)?;
    let session = instance.lock().expect("instance poisoned").session;
    if let Some(session_handle) = session {
        session::teardown_session(rt, session_handle);
    }
    Ok(())
}

/// Dequeue the head of the instance's event FIFO.
pub fn poll_event(rt: &Runtime, handle: u64) -> OpResult<Option<QueuedEvent>> {
    let instance = rt
        .instances
        .get(handle)
        .ok_or(Result::ERROR_HANDLE_INVALID)?;
    let event = instance.lock().expect("instance poisoned").poll_event();
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_instance() -> Instance {
        Instance {
            application_name: "test".into(),
            application_version: 1,
            engine_name: String::new(),
            engine_version: 0,
            api_version: Version::new(1, 0, 0),
            enabled_extensions: vec![EXT_METAL_ENABLE.to_owned()],
            system: None,
            session: None,
            events: VecDeque::new(),
        }
    }

    #[test]
    fn extension_lookup_is_exact() {
        assert!(is_supported_extension(EXT_COMPOSITION_LAYER_DEPTH));
        assert!(is_supported_extension(EXT_METAL_ENABLE));
        assert!(!is_supported_extension("XR_KHR_vulkan_enable"));

        let instance = empty_instance();
        assert!(instance.extension_enabled(EXT_METAL_ENABLE));
        assert!(!instance.extension_enabled(EXT_COMPOSITION_LAYER_DEPTH));
    }

    #[test]
    fn event_queue_is_fifo_and_bounded() {
        let mut instance = empty_instance();
        for i in 0..(EVENT_QUEUE_CAP + 4) {
            instance.queue_event(QueuedEvent::SessionStateChanged {
                session: 1,
                state: SessionState::READY,
                time_ns: i as i64,
            });
        }
        // The oldest events were dropped; order is preserved.
        let first = instance.poll_event().unwrap();
        match first {
            QueuedEvent::SessionStateChanged { time_ns, .. } => assert_eq!(time_ns, 4),
            _ => panic!("unexpected event"),
        }
        let mut remaining = 0;
        while instance.poll_event().is_some() {
            remaining += 1;
        }
        assert_eq!(remaining, EVENT_QUEUE_CAP - 1);
    }
}
