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

//! Device events and the hub that fans them out to subscribers.

use anyhow::Result;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

use crate::device::{Device, DeviceError, OperationalMode};

/// Events published by the hub.
#[derive(Debug, Clone)]
pub enum Event {
    ScanBegan,
    ScanEnded,
    ScanError(DeviceError),
    DeviceFound(Arc<Device>),
    DeviceConnected(Arc<Device>),
    DeviceConnectError(Arc<Device>, DeviceError),
    DeviceReady(Arc<Device>),
    DeviceDisconnected(Arc<Device>),
    DeviceError(Arc<Device>, DeviceError),
    DataSent(Arc<Device>),
    DataSendError(Arc<Device>, DeviceError),
    DataReceived(Arc<Device>, Vec<u8>),
    /// Data from the device's secondary event stream.
    EventDataReceived(Arc<Device>, Vec<u8>),
    DataReceiveError(Arc<Device>, DeviceError),
    InternalError(DeviceError),
    ModeChangeAvailable(Arc<Device>),
    ModeChanged(Arc<Device>, OperationalMode),
    ModeChangeError(Arc<Device>, DeviceError),
}

/// Borrowed view of the object an event carries.
#[derive(Debug, Clone, Copy)]
pub enum EventPayload<'a> {
    Device(&'a Arc<Device>),
    Error(&'a DeviceError),
    Data(&'a [u8]),
    Mode(OperationalMode),
}

impl Event {
    /// Stable tag identifying the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ScanBegan => "TxRxScanBegan",
            Event::ScanEnded => "TxRxScanEnded",
            Event::ScanError(_) => "TxRxScanError",
            Event::DeviceFound(_) => "TxRxDeviceFound",
            Event::DeviceConnected(_) => "TxRxDeviceConnected",
            Event::DeviceConnectError(..) => "TxRxDeviceConnectError",
            Event::DeviceReady(_) => "TxRxDeviceReady",
            Event::DeviceDisconnected(_) => "TxRxDeviceDisconnected",
            Event::DeviceError(..) => "TxRxDeviceError",
            Event::DataSent(_) => "TxRxDeviceDataSent",
            Event::DataSendError(..) => "TxRxDeviceDataSendError",
            Event::DataReceived(..) => "TxRxDeviceDataReceived",
            Event::EventDataReceived(..) => "TxRxDeviceEventDataReceived",
            Event::DataReceiveError(..) => "TxRxDeviceDataReceiveError",
            Event::InternalError(_) => "TxRxDeviceInternalError",
            Event::ModeChangeAvailable(_) => "TxRxDeviceCanChangeOperationalMode",
            Event::ModeChanged(..) => "TxRxDeviceModeChanged",
            Event::ModeChangeError(..) => "TxRxDeviceModeChangeError",
        }
    }

    /// The object carried with the event, if any.
    ///
    /// Error events carry the error; data events carry the bytes.
    pub fn payload(&self) -> Option<EventPayload<'_>> {
        match self {
            Event::ScanBegan | Event::ScanEnded => None,
            Event::ScanError(e) | Event::InternalError(e) => Some(EventPayload::Error(e)),
            Event::DeviceFound(d)
            | Event::DeviceConnected(d)
            | Event::DeviceReady(d)
            | Event::DeviceDisconnected(d)
            | Event::DataSent(d)
            | Event::ModeChangeAvailable(d) => Some(EventPayload::Device(d)),
            Event::DeviceConnectError(_, e)
            | Event::DeviceError(_, e)
            | Event::DataSendError(_, e)
            | Event::DataReceiveError(_, e)
            | Event::ModeChangeError(_, e) => Some(EventPayload::Error(e)),
            Event::DataReceived(_, data) | Event::EventDataReceived(_, data) => {
                Some(EventPayload::Data(data))
            }
            Event::ModeChanged(_, mode) => Some(EventPayload::Mode(*mode)),
        }
    }

    /// The device the event concerns, if it concerns one.
    pub fn device(&self) -> Option<&Arc<Device>> {
        match self {
            Event::ScanBegan | Event::ScanEnded | Event::ScanError(_) | Event::InternalError(_) => {
                None
            }
            Event::DeviceFound(d)
            | Event::DeviceConnected(d)
            | Event::DeviceConnectError(d, _)
            | Event::DeviceReady(d)
            | Event::DeviceDisconnected(d)
            | Event::DeviceError(d, _)
            | Event::DataSent(d)
            | Event::DataSendError(d, _)
            | Event::DataReceived(d, _)
            | Event::EventDataReceived(d, _)
            | Event::DataReceiveError(d, _)
            | Event::ModeChangeAvailable(d)
            | Event::ModeChanged(d, _)
            | Event::ModeChangeError(d, _) => Some(d),
        }
    }
}

/// Handle returned by [`EventHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

/// Publish/subscribe hub for device events.
///
/// Delivery is synchronous and in registration order. A handler that fails
/// or panics is logged and skipped; the remaining handlers still run.
/// Events published while nobody is subscribed are dropped.
pub struct EventHub {
    subscribers: Mutex<Vec<(SubscriptionId, Handler)>>,
    next_id: AtomicU64,
    scanned: Mutex<Vec<Arc<Device>>>,
}

impl EventHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a handler for every subsequently published event.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push((id, Arc::new(handler)));
        debug!("Subscriber {:?} registered", id);
        id
    }

    /// Remove a handler. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().retain(|(sid, _)| *sid != id);
        debug!("Subscriber {:?} removed", id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Deliver `event` to every registered handler.
    ///
    /// The delivery list is fixed when the call starts, so handlers may
    /// subscribe or unsubscribe without affecting the event in flight.
    /// Returns the number of handlers that accepted the event.
    pub fn publish(&self, event: Event) -> usize {
        if matches!(event, Event::ScanBegan) {
            self.scanned.lock().clear();
        }

        let handlers: Vec<(SubscriptionId, Handler)> = self.subscribers.lock().clone();
        debug!("Publishing {} to {} subscribers", event.kind(), handlers.len());

        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    error!("Subscriber {:?} failed on {}: {}", id, event.kind(), e);
                }
                Err(_) => {
                    error!("Subscriber {:?} panicked on {}", id, event.kind());
                }
            }
        }
        delivered
    }

    /// Devices found since the last scan began.
    pub fn scanned_devices(&self) -> Vec<Arc<Device>> {
        self.scanned.lock().clone()
    }

    pub(crate) fn remember_device(&self, device: Arc<Device>) {
        self.scanned.lock().push(device);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            scanned: Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceErrorCode, DeviceId, DeviceProfile};
    use anyhow::anyhow;

    fn recorder(hub: &EventHub) -> (SubscriptionId, Arc<Mutex<Vec<&'static str>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = hub.subscribe(move |event| {
            sink.lock().push(event.kind());
            Ok(())
        });
        (id, seen)
    }

    fn test_device() -> Arc<Device> {
        Device::new(
            DeviceId("dev-1".to_string()),
            "Reader",
            DeviceProfile::new("\r\n", 20),
        )
    }

    #[test]
    fn test_delivery_order() {
        let hub = EventHub::new();
        let (_, seen) = recorder(&hub);

        hub.publish(Event::ScanBegan);
        hub.publish(Event::DeviceFound(test_device()));
        hub.publish(Event::ScanEnded);

        assert_eq!(
            *seen.lock(),
            vec!["TxRxScanBegan", "TxRxDeviceFound", "TxRxScanEnded"]
        );
    }

    #[test]
    fn test_registration_order() {
        let hub = EventHub::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            hub.subscribe(move |_| {
                order.lock().push(n);
                Ok(())
            });
        }

        hub.publish(Event::ScanEnded);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_late_subscriber_misses_earlier_events() {
        let hub = EventHub::new();
        assert_eq!(hub.publish(Event::ScanBegan), 0);

        let (_, seen) = recorder(&hub);
        hub.publish(Event::ScanEnded);
        assert_eq!(*seen.lock(), vec!["TxRxScanEnded"]);
    }

    #[test]
    fn test_failing_subscriber_is_isolated() {
        let hub = EventHub::new();
        hub.subscribe(|_| Err(anyhow!("broken handler")));
        hub.subscribe(|_| panic!("handler panic"));
        let (_, seen) = recorder(&hub);

        let delivered = hub.publish(Event::ScanEnded);
        assert_eq!(delivered, 1);
        assert_eq!(*seen.lock(), vec!["TxRxScanEnded"]);
    }

    #[test]
    fn test_unsubscribe_during_dispatch() {
        let hub = EventHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let own_id = Arc::new(Mutex::new(None));

        let handler_hub = hub.clone();
        let handler_seen = seen.clone();
        let handler_id = own_id.clone();
        let id = hub.subscribe(move |event| {
            handler_seen.lock().push(event.kind());
            if let Some(id) = *handler_id.lock() {
                handler_hub.unsubscribe(id);
            }
            Ok(())
        });
        *own_id.lock() = Some(id);

        hub.publish(Event::ScanBegan);
        hub.publish(Event::ScanEnded);

        assert_eq!(*seen.lock(), vec!["TxRxScanBegan"]);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_subscribe_during_dispatch() {
        let hub = EventHub::new();
        let added = Arc::new(Mutex::new(Vec::new()));

        let handler_hub = hub.clone();
        let handler_added = added.clone();
        hub.subscribe(move |event| {
            if matches!(event, Event::ScanBegan) {
                let sink = handler_added.clone();
                handler_hub.subscribe(move |event| {
                    sink.lock().push(event.kind());
                    Ok(())
                });
            }
            Ok(())
        });

        hub.publish(Event::ScanBegan);
        assert!(added.lock().is_empty());

        hub.publish(Event::ScanEnded);
        assert_eq!(*added.lock(), vec!["TxRxScanEnded"]);
    }

    #[test]
    fn test_scan_began_clears_cache() {
        let hub = EventHub::new();
        hub.remember_device(test_device());
        assert_eq!(hub.scanned_devices().len(), 1);

        hub.publish(Event::ScanBegan);
        assert!(hub.scanned_devices().is_empty());
    }

    #[test]
    fn test_payloads() {
        let device = test_device();
        let err = DeviceError::new(DeviceErrorCode::ReadFailed, "read failed");

        let event = Event::DataReceived(device.clone(), b"OK\r\n".to_vec());
        assert!(matches!(event.payload(), Some(EventPayload::Data(data)) if data == b"OK\r\n"));
        assert_eq!(event.device().map(|d| d.id().clone()), Some(device.id().clone()));

        let event = Event::DataReceiveError(device.clone(), err.clone());
        assert!(matches!(event.payload(), Some(EventPayload::Error(e)) if *e == err));

        assert!(Event::ScanBegan.payload().is_none());
        assert!(Event::InternalError(err).device().is_none());
    }
}
