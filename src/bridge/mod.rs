// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! TCP command bridge.
//!
//! Exposes a connected device to one TCP client: inbound bytes are framed
//! into terminator-delimited commands, device data is written back out.

mod framer;
mod server;

pub use framer::CommandFramer;
pub use server::{local_address, BridgeError, BridgeEvent, TcpBridge};
pub(crate) use server::printable;
