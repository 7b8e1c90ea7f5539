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

//! TxRx Bridge
//!
//! Fans Device Manager callbacks out to any number of listeners and
//! exposes a connected instrument's command stream over TCP.

pub mod adapter;
pub mod bridge;
pub mod config;
pub mod device;
pub mod events;
pub mod session;
pub mod sim;

pub use adapter::CallbackAdapter;
pub use bridge::{BridgeError, BridgeEvent, CommandFramer, TcpBridge};
pub use config::{BridgeConfig, BridgeLayout, Config, DeviceTimeouts};
pub use device::{
    ConnectionState, Device, DeviceDelegate, DeviceError, DeviceErrorCode, DeviceId,
    DeviceManager, DeviceProfile, OperationalMode, ScanDelegate, TimeoutKind,
};
pub use events::{Event, EventHub, EventPayload, SubscriptionId};
pub use session::DeviceSession;
pub use sim::SimulatedManager;
