/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use crate::DeviceError;
use crate::Sender;

/// Out-of-band notifications from the device layer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeviceEvent {
    /// The USB device disappeared while streaming. The device layer has
    /// already returned to the `Initialized` state; no reconnect is
    /// attempted.
    Disconnected,
    /// A stream failed. Best-effort; the error carries the driver detail.
    StreamFailure(DeviceError),
}

/// Buffers device events until a consumer attaches a channel.
pub enum DeviceEventBuffer {
    Buffered(Vec<DeviceEvent>),
    Sink(Sender<DeviceEvent>),
}

impl Default for DeviceEventBuffer {
    fn default() -> Self {
        DeviceEventBuffer::Buffered(vec![])
    }
}

impl DeviceEventBuffer {
    pub fn callback(&mut self, event: DeviceEvent) {
        match *self {
            DeviceEventBuffer::Buffered(ref mut events) => events.push(event),
            DeviceEventBuffer::Sink(ref dest) => {
                let _ = dest.send(event);
            }
        }
    }

    pub fn upgrade(&mut self, dest: Sender<DeviceEvent>) {
        if let DeviceEventBuffer::Buffered(ref mut events) = *self {
            for event in events.drain(..) {
                let _ = dest.send(event);
            }
        }
        *self = DeviceEventBuffer::Sink(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_events_flush_on_upgrade() {
        let mut buffer = DeviceEventBuffer::default();
        buffer.callback(DeviceEvent::Disconnected);
        let (sender, receiver) = crate::channel();
        buffer.upgrade(sender);
        assert_eq!(receiver.try_recv(), Ok(DeviceEvent::Disconnected));
        buffer.callback(DeviceEvent::StreamFailure(DeviceError::NotStreaming));
        assert_eq!(
            receiver.try_recv(),
            Ok(DeviceEvent::StreamFailure(DeviceError::NotStreaming))
        );
    }
}
