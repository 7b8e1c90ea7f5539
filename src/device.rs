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

//! Device handles and the Device Manager interfaces.
//!
//! The Device Manager owns the radio and the device state machine. This
//! module only describes what the rest of the crate needs from it: a set
//! of commands, and two callback traits it invokes as things happen.

use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Connection state of a device, as reported by the Device Manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Discovered,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Operational mode of devices that support switching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationalMode {
    Stream,
    Command,
}

impl OperationalMode {
    /// Numeric mode code used on the device side.
    pub fn code(&self) -> u32 {
        match self {
            OperationalMode::Stream => 1,
            OperationalMode::Command => 3,
        }
    }

    /// The mode a switch request would move to.
    pub fn toggled(&self) -> Self {
        match self {
            OperationalMode::Stream => OperationalMode::Command,
            OperationalMode::Command => OperationalMode::Stream,
        }
    }
}

/// Static per-device metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Byte sequence terminating one command.
    pub command_end: Vec<u8>,
    /// Largest fragment the manager sends in one write.
    pub max_send_packet_size: usize,
}

impl DeviceProfile {
    pub fn new(command_end: impl Into<Vec<u8>>, max_send_packet_size: usize) -> Self {
        Self {
            command_end: command_end.into(),
            max_send_packet_size,
        }
    }
}

/// Device identifier assigned by the Device Manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A device known to the Device Manager.
///
/// Connection state and mode are written only by the manager; everything
/// else in the crate reads them.
pub struct Device {
    id: DeviceId,
    name: String,
    profile: DeviceProfile,
    state: RwLock<ConnectionState>,
    mode: RwLock<OperationalMode>,
    delegate: RwLock<Option<Weak<dyn DeviceDelegate>>>,
}

impl Device {
    pub fn new(id: DeviceId, name: impl Into<String>, profile: DeviceProfile) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.into(),
            profile,
            state: RwLock::new(ConnectionState::Discovered),
            mode: RwLock::new(OperationalMode::Stream),
            delegate: RwLock::new(None),
        })
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn mode(&self) -> OperationalMode {
        *self.mode.read()
    }

    /// Record a state transition. Device Manager implementations only.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    /// Record a mode transition. Device Manager implementations only.
    pub fn set_mode(&self, mode: OperationalMode) {
        *self.mode.write() = mode;
    }

    /// Install the receiver of this device's data and error callbacks.
    ///
    /// The device does not keep its delegate alive.
    pub fn set_delegate(&self, delegate: Weak<dyn DeviceDelegate>) {
        *self.delegate.write() = Some(delegate);
    }

    /// The delegate, if one was installed and is still alive.
    pub fn delegate(&self) -> Option<Arc<dyn DeviceDelegate>> {
        self.delegate.read().as_ref().and_then(Weak::upgrade)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("mode", &self.mode())
            .finish()
    }
}

/// Error codes reported by the Device Manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorCode {
    ScanFailed,
    ConnectFailed,
    ConnectTimedOut,
    DisconnectTimedOut,
    ServiceDiscoveryFailed,
    ReadFailed,
    WriteFailed,
    WriteTimedOut,
    ModeChangeFailed,
    NotConnected,
    Internal,
}

/// An error reported by the Device Manager through a callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({code:?})")]
pub struct DeviceError {
    pub code: DeviceErrorCode,
    pub message: String,
}

impl DeviceError {
    pub fn new(code: DeviceErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// True for the connect error the manager raises when a disconnect
    /// did not complete in time.
    pub fn is_disconnect_timeout(&self) -> bool {
        self.code == DeviceErrorCode::DisconnectTimedOut
    }
}

/// Timeouts the Device Manager exposes for tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Connect,
    SendPacket,
    ReceiveFirstPacket,
    ReceivePackets,
}

/// Commands offered by the Device Manager.
pub trait DeviceManager: Send + Sync {
    /// Install the receiver of scan lifecycle callbacks.
    fn set_scan_delegate(&self, delegate: Weak<dyn ScanDelegate>);

    fn is_scanning(&self) -> bool;

    fn start_scan(&self);

    fn stop_scan(&self);

    fn connect_device(&self, device: &Arc<Device>);

    fn disconnect_device(&self, device: &Arc<Device>);

    fn send_data(&self, device: &Arc<Device>, data: &[u8]);

    /// Request an operational mode switch. Returns false when the request
    /// could not even be issued.
    fn set_mode(&self, device: &Arc<Device>, mode: OperationalMode) -> bool;

    fn set_timeout(&self, kind: TimeoutKind, millis: u32);

    fn timeout(&self, kind: TimeoutKind) -> u32;
}

/// Scan lifecycle callbacks.
pub trait ScanDelegate: Send + Sync {
    fn device_scan_began(&self);

    fn device_scan_ended(&self);

    fn device_scan_error(&self, error: DeviceError);

    fn device_found(&self, device: Arc<Device>);

    fn device_internal_error(&self, error: DeviceError);
}

/// Per-device connection and data callbacks.
pub trait DeviceDelegate: Send + Sync {
    fn device_connected(&self, device: &Arc<Device>);

    fn device_connect_error(&self, device: &Arc<Device>, error: DeviceError);

    fn device_ready(&self, device: &Arc<Device>);

    fn device_disconnected(&self, device: &Arc<Device>);

    fn device_error(&self, device: &Arc<Device>, error: DeviceError);

    fn received_data(&self, device: &Arc<Device>, data: &[u8]);

    fn received_event_data(&self, device: &Arc<Device>, data: &[u8]);

    fn device_read_error(&self, device: &Arc<Device>, error: DeviceError);

    fn sent_data(&self, device: &Arc<Device>);

    fn device_write_error(&self, device: &Arc<Device>, error: DeviceError);

    fn mode_change_available(&self, device: &Arc<Device>);

    fn mode_changed(&self, device: &Arc<Device>, mode: OperationalMode);

    fn mode_change_error(&self, device: &Arc<Device>, error: DeviceError);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_codes() {
        assert_eq!(OperationalMode::Stream.code(), 1);
        assert_eq!(OperationalMode::Command.code(), 3);
        assert_eq!(OperationalMode::Stream.toggled(), OperationalMode::Command);
    }

    #[test]
    fn test_device_state_defaults() {
        let device = Device::new(
            DeviceId("dev-1".to_string()),
            "Reader",
            DeviceProfile::new("\r\n", 20),
        );
        assert_eq!(device.state(), ConnectionState::Discovered);
        assert!(!device.is_connected());
        assert_eq!(device.mode(), OperationalMode::Stream);
        assert!(device.delegate().is_none());

        device.set_state(ConnectionState::Connected);
        assert!(device.is_connected());
    }

    #[test]
    fn test_disconnect_timeout_detection() {
        let err = DeviceError::new(DeviceErrorCode::DisconnectTimedOut, "disconnect timed out");
        assert!(err.is_disconnect_timeout());

        let err = DeviceError::new(DeviceErrorCode::ConnectTimedOut, "connect timed out");
        assert!(!err.is_disconnect_timeout());
    }
}
