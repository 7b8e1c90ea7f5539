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

//! In-process Device Manager that simulates one echoing instrument.
//!
//! Lets the whole stack run without a radio: every scan discovers a fresh
//! virtual device, connections succeed immediately, and each command sent
//! to the device comes straight back as received data.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};
use uuid::Uuid;

use crate::device::{
    ConnectionState, Device, DeviceError, DeviceErrorCode, DeviceId, DeviceManager,
    DeviceProfile, OperationalMode, ScanDelegate, TimeoutKind,
};

/// Simulated Device Manager.
pub struct SimulatedManager {
    scan_delegate: RwLock<Option<Weak<dyn ScanDelegate>>>,
    scanning: AtomicBool,
    discovered: AtomicU32,
    profile: DeviceProfile,
    timeouts: Mutex<[u32; 4]>,
    connect_failure: Mutex<Option<DeviceError>>,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl SimulatedManager {
    /// Simulated devices terminate commands with CR LF.
    pub fn new() -> Arc<Self> {
        Self::with_profile(DeviceProfile::new("\r\n", 20))
    }

    pub fn with_profile(profile: DeviceProfile) -> Arc<Self> {
        Arc::new(Self {
            scan_delegate: RwLock::new(None),
            scanning: AtomicBool::new(false),
            discovered: AtomicU32::new(0),
            profile,
            timeouts: Mutex::new([0; 4]),
            connect_failure: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Make the next connect attempt report `error` instead of connecting.
    pub fn fail_next_connect(&self, error: DeviceError) {
        *self.connect_failure.lock() = Some(error);
    }

    /// Everything written to simulated devices so far.
    pub fn sent_payloads(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    fn scan_delegate(&self) -> Option<Arc<dyn ScanDelegate>> {
        self.scan_delegate.read().as_ref().and_then(Weak::upgrade)
    }

    fn timeout_slot(kind: TimeoutKind) -> usize {
        match kind {
            TimeoutKind::Connect => 0,
            TimeoutKind::SendPacket => 1,
            TimeoutKind::ReceiveFirstPacket => 2,
            TimeoutKind::ReceivePackets => 3,
        }
    }
}

impl DeviceManager for SimulatedManager {
    fn set_scan_delegate(&self, delegate: Weak<dyn ScanDelegate>) {
        *self.scan_delegate.write() = Some(delegate);
    }

    fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    fn start_scan(&self) {
        if self.scanning.swap(true, Ordering::SeqCst) {
            debug!("Scan already running");
            return;
        }

        let Some(delegate) = self.scan_delegate() else {
            return;
        };
        delegate.device_scan_began();

        let n = self.discovered.fetch_add(1, Ordering::SeqCst) + 1;
        let device = Device::new(
            DeviceId(Uuid::new_v4().to_string()),
            format!("TxRx Sim {}", n),
            self.profile.clone(),
        );
        info!("Simulated device discovered: {}", device.name());
        delegate.device_found(device);
    }

    fn stop_scan(&self) {
        if !self.scanning.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(delegate) = self.scan_delegate() {
            delegate.device_scan_ended();
        }
    }

    fn connect_device(&self, device: &Arc<Device>) {
        let Some(delegate) = device.delegate() else {
            return;
        };

        let failure = self.connect_failure.lock().take();
        if let Some(error) = failure {
            device.set_state(ConnectionState::Disconnected);
            delegate.device_connect_error(device, error);
            return;
        }

        device.set_state(ConnectionState::Connecting);
        device.set_state(ConnectionState::Connected);
        delegate.device_connected(device);
        delegate.device_ready(device);
        delegate.mode_change_available(device);
    }

    fn disconnect_device(&self, device: &Arc<Device>) {
        device.set_state(ConnectionState::Disconnecting);
        device.set_state(ConnectionState::Disconnected);
        device.set_mode(OperationalMode::Stream);
        if let Some(delegate) = device.delegate() {
            delegate.device_disconnected(device);
        }
    }

    fn send_data(&self, device: &Arc<Device>, data: &[u8]) {
        let Some(delegate) = device.delegate() else {
            return;
        };

        if !device.is_connected() {
            delegate.device_write_error(
                device,
                DeviceError::new(DeviceErrorCode::NotConnected, "device not connected"),
            );
            return;
        }

        self.sent.lock().push(data.to_vec());
        delegate.sent_data(device);
        delegate.received_data(device, data);
        if device.mode() == OperationalMode::Command {
            let mut event = b"EVT ".to_vec();
            event.extend_from_slice(data);
            delegate.received_event_data(device, &event);
        }
    }

    fn set_mode(&self, device: &Arc<Device>, mode: OperationalMode) -> bool {
        let Some(delegate) = device.delegate() else {
            return false;
        };
        if !device.is_connected() {
            return false;
        }

        device.set_mode(mode);
        delegate.mode_changed(device, mode);
        true
    }

    fn set_timeout(&self, kind: TimeoutKind, millis: u32) {
        self.timeouts.lock()[Self::timeout_slot(kind)] = millis;
    }

    fn timeout(&self, kind: TimeoutKind) -> u32 {
        self.timeouts.lock()[Self::timeout_slot(kind)]
    }
}
