/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The WebSocket bridge: republishes the Kinect's RGB and depth streams
//! to browser clients on `ws://localhost:8765/kinect` and relays motor
//! commands back to the device. The binary in `main.rs` is a thin CLI
//! over these modules.

pub mod motor;
pub mod protocol;
pub mod server;
pub mod source;
