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

//! Device Manager callback adapter.
//!
//! Receives every scan and device callback from the Device Manager and
//! republishes it on the [`EventHub`]. Also fronts the manager's commands
//! so the rest of the application talks to a single object.

use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::config::DeviceTimeouts;
use crate::device::{
    Device, DeviceDelegate, DeviceError, DeviceManager, OperationalMode, ScanDelegate,
    TimeoutKind,
};
use crate::events::{Event, EventHub};

/// Translates Device Manager callbacks into hub events.
///
/// The manager and every found device only hold weak references back to
/// the adapter, so dropping the last `Arc` silences the callbacks.
pub struct CallbackAdapter {
    hub: Arc<EventHub>,
    manager: Arc<dyn DeviceManager>,
    this: Weak<CallbackAdapter>,
}

impl CallbackAdapter {
    /// Create an adapter and register it as the manager's scan delegate.
    pub fn attach(hub: Arc<EventHub>, manager: Arc<dyn DeviceManager>) -> Arc<Self> {
        let adapter = Arc::new_cyclic(|this| Self {
            hub,
            manager,
            this: this.clone(),
        });
        let delegate: Weak<dyn ScanDelegate> = adapter.this.clone();
        adapter.manager.set_scan_delegate(delegate);
        adapter
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn is_scanning(&self) -> bool {
        self.manager.is_scanning()
    }

    pub fn start_scan(&self) {
        self.manager.start_scan();
    }

    pub fn stop_scan(&self) {
        self.manager.stop_scan();
    }

    /// Devices found by the current or most recent scan.
    pub fn scanned_devices(&self) -> Vec<Arc<Device>> {
        self.hub.scanned_devices()
    }

    /// Connection is asynchronous; the outcome arrives as an event.
    pub fn connect_device(&self, device: &Arc<Device>) {
        self.manager.connect_device(device);
    }

    pub fn disconnect_device(&self, device: &Arc<Device>) {
        self.manager.disconnect_device(device);
    }

    pub fn send_data(&self, device: &Arc<Device>, data: &[u8]) {
        self.manager.send_data(device, data);
    }

    pub fn set_mode(&self, device: &Arc<Device>, mode: OperationalMode) -> bool {
        self.manager.set_mode(device, mode)
    }

    /// Hand the configured timeouts to the manager unchanged.
    pub fn apply_timeouts(&self, timeouts: &DeviceTimeouts) {
        self.manager
            .set_timeout(TimeoutKind::Connect, timeouts.connect_ms);
        self.manager
            .set_timeout(TimeoutKind::SendPacket, timeouts.write_ms);
        self.manager
            .set_timeout(TimeoutKind::ReceiveFirstPacket, timeouts.first_read_ms);
        self.manager
            .set_timeout(TimeoutKind::ReceivePackets, timeouts.later_read_ms);
        debug!("Device timeouts applied: {:?}", timeouts);
    }

    fn publish(&self, event: Event) {
        self.hub.publish(event);
    }
}

impl ScanDelegate for CallbackAdapter {
    fn device_scan_began(&self) {
        info!("Device scan began");
        self.publish(Event::ScanBegan);
    }

    fn device_scan_ended(&self) {
        info!("Device scan ended");
        self.publish(Event::ScanEnded);
    }

    fn device_scan_error(&self, error: DeviceError) {
        warn!("Device scan error: {}", error);
        self.publish(Event::ScanError(error));
    }

    fn device_found(&self, device: Arc<Device>) {
        info!("Device found: {} ({})", device.name(), device.id());
        self.hub.remember_device(device.clone());
        let delegate: Weak<dyn DeviceDelegate> = self.this.clone();
        device.set_delegate(delegate);
        self.publish(Event::DeviceFound(device));
    }

    fn device_internal_error(&self, error: DeviceError) {
        warn!("Device manager internal error: {}", error);
        self.publish(Event::InternalError(error));
    }
}

impl DeviceDelegate for CallbackAdapter {
    fn device_connected(&self, device: &Arc<Device>) {
        info!("Device connected: {}", device.name());
        self.publish(Event::DeviceConnected(device.clone()));
    }

    fn device_connect_error(&self, device: &Arc<Device>, error: DeviceError) {
        if error.is_disconnect_timeout() {
            debug!("Disconnect timeout on {} reported as disconnect", device.name());
            self.device_disconnected(device);
            return;
        }

        warn!("Connect error on {}: {}", device.name(), error);
        self.publish(Event::DeviceConnectError(device.clone(), error));
    }

    fn device_ready(&self, device: &Arc<Device>) {
        info!("Device ready: {}", device.name());
        self.publish(Event::DeviceReady(device.clone()));
    }

    fn device_disconnected(&self, device: &Arc<Device>) {
        info!("Device disconnected: {}", device.name());
        self.publish(Event::DeviceDisconnected(device.clone()));
    }

    fn device_error(&self, device: &Arc<Device>, error: DeviceError) {
        warn!("Device error on {}: {}", device.name(), error);
        self.publish(Event::DeviceError(device.clone(), error));
    }

    fn received_data(&self, device: &Arc<Device>, data: &[u8]) {
        debug!("{} bytes received from {}", data.len(), device.name());
        self.publish(Event::DataReceived(device.clone(), data.to_vec()));
    }

    fn received_event_data(&self, device: &Arc<Device>, data: &[u8]) {
        debug!("{} event bytes received from {}", data.len(), device.name());
        self.publish(Event::EventDataReceived(device.clone(), data.to_vec()));
    }

    fn device_read_error(&self, device: &Arc<Device>, error: DeviceError) {
        warn!("Read error on {}: {}", device.name(), error);
        self.publish(Event::DataReceiveError(device.clone(), error));
    }

    fn sent_data(&self, device: &Arc<Device>) {
        debug!("Data sent to {}", device.name());
        self.publish(Event::DataSent(device.clone()));
    }

    fn device_write_error(&self, device: &Arc<Device>, error: DeviceError) {
        warn!("Write error on {}: {}", device.name(), error);
        self.publish(Event::DataSendError(device.clone(), error));
    }

    fn mode_change_available(&self, device: &Arc<Device>) {
        self.publish(Event::ModeChangeAvailable(device.clone()));
    }

    fn mode_changed(&self, device: &Arc<Device>, mode: OperationalMode) {
        info!(
            "{} switched to {:?} mode (code {})",
            device.name(),
            mode,
            mode.code()
        );
        self.publish(Event::ModeChanged(device.clone(), mode));
    }

    fn mode_change_error(&self, device: &Arc<Device>, error: DeviceError) {
        warn!("Mode change error on {}: {}", device.name(), error);
        self.publish(Event::ModeChangeError(device.clone(), error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceErrorCode, DeviceId, DeviceProfile};
    use crate::sim::SimulatedManager;
    use parking_lot::Mutex;

    fn setup() -> (Arc<CallbackAdapter>, Arc<Mutex<Vec<&'static str>>>) {
        let hub = EventHub::new();
        let manager = SimulatedManager::new();
        let adapter = CallbackAdapter::attach(hub.clone(), manager);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        hub.subscribe(move |event| {
            sink.lock().push(event.kind());
            Ok(())
        });
        (adapter, seen)
    }

    fn test_device() -> Arc<Device> {
        Device::new(
            DeviceId("dev-1".to_string()),
            "Reader",
            DeviceProfile::new("\r\n", 20),
        )
    }

    #[test]
    fn test_disconnect_timeout_reclassified() {
        let (adapter, seen) = setup();
        let device = test_device();

        adapter.device_connect_error(
            &device,
            DeviceError::new(DeviceErrorCode::DisconnectTimedOut, "disconnect timed out"),
        );

        assert_eq!(*seen.lock(), vec!["TxRxDeviceDisconnected"]);
    }

    #[test]
    fn test_other_connect_errors_pass_through() {
        let (adapter, seen) = setup();
        let device = test_device();

        adapter.device_connect_error(
            &device,
            DeviceError::new(DeviceErrorCode::ConnectTimedOut, "connect timed out"),
        );

        assert_eq!(*seen.lock(), vec!["TxRxDeviceConnectError"]);
    }

    #[test]
    fn test_device_found_arms_delegate_and_cache() {
        let (adapter, seen) = setup();
        let device = test_device();

        adapter.device_scan_began();
        adapter.device_found(device.clone());

        assert!(device.delegate().is_some());
        assert_eq!(adapter.scanned_devices().len(), 1);
        assert_eq!(*seen.lock(), vec!["TxRxScanBegan", "TxRxDeviceFound"]);

        adapter.device_scan_began();
        assert!(adapter.scanned_devices().is_empty());
    }

    #[test]
    fn test_callbacks_map_one_to_one() {
        let (adapter, seen) = setup();
        let device = test_device();
        let err = || DeviceError::new(DeviceErrorCode::Internal, "boom");

        adapter.device_connected(&device);
        adapter.device_ready(&device);
        adapter.received_data(&device, b"A");
        adapter.received_event_data(&device, b"B");
        adapter.sent_data(&device);
        adapter.device_write_error(&device, err());
        adapter.device_read_error(&device, err());
        adapter.device_error(&device, err());
        adapter.mode_changed(&device, OperationalMode::Command);
        adapter.mode_change_error(&device, err());
        adapter.device_internal_error(err());
        adapter.device_scan_error(err());

        assert_eq!(
            *seen.lock(),
            vec![
                "TxRxDeviceConnected",
                "TxRxDeviceReady",
                "TxRxDeviceDataReceived",
                "TxRxDeviceEventDataReceived",
                "TxRxDeviceDataSent",
                "TxRxDeviceDataSendError",
                "TxRxDeviceDataReceiveError",
                "TxRxDeviceError",
                "TxRxDeviceModeChanged",
                "TxRxDeviceModeChangeError",
                "TxRxDeviceInternalError",
                "TxRxScanError",
            ]
        );
    }

    #[test]
    fn test_apply_timeouts_passes_values_through() {
        let hub = EventHub::new();
        let manager = SimulatedManager::new();
        let adapter = CallbackAdapter::attach(hub, manager.clone());

        let timeouts = DeviceTimeouts {
            connect_ms: 4000,
            write_ms: 150,
            first_read_ms: 2500,
            later_read_ms: 80,
        };
        adapter.apply_timeouts(&timeouts);

        assert_eq!(manager.timeout(TimeoutKind::Connect), 4000);
        assert_eq!(manager.timeout(TimeoutKind::SendPacket), 150);
        assert_eq!(manager.timeout(TimeoutKind::ReceiveFirstPacket), 2500);
        assert_eq!(manager.timeout(TimeoutKind::ReceivePackets), 80);
    }

    #[test]
    fn test_delegates_do_not_keep_adapter_alive() {
        let hub = EventHub::new();
        let manager = SimulatedManager::new();
        let adapter = CallbackAdapter::attach(hub.clone(), manager.clone());

        adapter.start_scan();
        let device = adapter.scanned_devices().remove(0);
        assert!(device.delegate().is_some());

        let weak = Arc::downgrade(&adapter);
        drop(adapter);
        assert!(weak.upgrade().is_none());
        assert!(device.delegate().is_none());

        // Callbacks after the adapter is gone are dropped quietly.
        manager.stop_scan();
        assert_eq!(hub.scanned_devices().len(), 1);
    }
}
