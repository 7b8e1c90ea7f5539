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

//! Device session: binds one device to its TCP bridges.

use anyhow::{anyhow, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::adapter::CallbackAdapter;
use crate::bridge::{printable, BridgeEvent, TcpBridge};
use crate::config::{BridgeConfig, BridgeLayout};
use crate::device::{Device, OperationalMode};
use crate::events::{Event, SubscriptionId};

/// Keeps a device and its bridges in step for the life of a connection.
///
/// Bridges open when the device becomes ready and close when it
/// disconnects. Commands from the command bridge go to the device; device
/// data goes back out to the bridge clients.
pub struct DeviceSession {
    adapter: Arc<CallbackAdapter>,
    device: Arc<Device>,
    config: BridgeConfig,
    command_bridge: TcpBridge,
    event_bridge: Option<TcpBridge>,
    hub_rx: mpsc::UnboundedReceiver<Event>,
    bridge_rx: mpsc::UnboundedReceiver<BridgeEvent>,
    subscription: SubscriptionId,
    mode: OperationalMode,
    mode_change_available: bool,
    changing_mode: bool,
}

impl DeviceSession {
    /// Create a session for `device` and start listening for its events.
    pub fn new(adapter: Arc<CallbackAdapter>, device: Arc<Device>, config: BridgeConfig) -> Self {
        let (hub_tx, hub_rx) = mpsc::unbounded_channel();
        let (bridge_tx, bridge_rx) = mpsc::unbounded_channel();

        let device_id = device.id().clone();
        let subscription = adapter.hub().subscribe(move |event| {
            if event.device().map(|d| d.id()) == Some(&device_id) {
                hub_tx
                    .send(event.clone())
                    .map_err(|_| anyhow!("session for {} has ended", device_id))?;
            }
            Ok(())
        });

        let (command_bridge, event_bridge) = match config.layout {
            BridgeLayout::Single => (TcpBridge::new("command", &config, bridge_tx), None),
            BridgeLayout::Dual => (
                TcpBridge::new("command", &config, bridge_tx.clone()),
                Some(TcpBridge::new("event", &config, bridge_tx)),
            ),
        };

        Self {
            adapter,
            mode: device.mode(),
            device,
            config,
            command_bridge,
            event_bridge,
            hub_rx,
            bridge_rx,
            subscription,
            mode_change_available: false,
            changing_mode: false,
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn command_bridge(&self) -> &TcpBridge {
        &self.command_bridge
    }

    pub fn event_bridge(&self) -> Option<&TcpBridge> {
        self.event_bridge.as_ref()
    }

    pub fn mode(&self) -> OperationalMode {
        self.mode
    }

    /// Open the bridges right away if the device is already connected.
    pub async fn start(&mut self) {
        if self.device.is_connected() {
            info!("{} already connected", self.device.name());
            self.open_bridges().await;
        }
    }

    /// Process device and bridge events until `shutdown` completes.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                Some(event) = self.hub_rx.recv() => self.handle_device_event(event).await,
                Some(event) = self.bridge_rx.recv() => self.handle_bridge_event(event),
                _ = &mut shutdown => {
                    info!("Session for {} shutting down", self.device.name());
                    break;
                }
            }
        }

        self.close_bridges();
        Ok(())
    }

    /// Ask the device to switch between stream and command mode.
    ///
    /// Returns false when the device cannot switch, a switch is already
    /// pending, or the request was refused.
    pub fn toggle_mode(&mut self) -> bool {
        if !self.mode_change_available {
            warn!("{} does not support mode switching", self.device.name());
            return false;
        }
        if self.changing_mode {
            warn!("Mode change already in progress");
            return false;
        }

        let target = self.mode.toggled();
        if self.adapter.set_mode(&self.device, target) {
            self.changing_mode = true;
            true
        } else {
            warn!("Change to {:?} mode failed", target);
            false
        }
    }

    async fn open_bridges(&mut self) {
        let terminator = self.device.profile().command_end.clone();

        let command_port = match self.config.layout {
            BridgeLayout::Single => self.config.legacy_port,
            BridgeLayout::Dual => self.config.command_port,
        };
        if let Err(e) = self
            .command_bridge
            .open(command_port, &terminator, false)
            .await
        {
            warn!("Unable to open command bridge: {}", e);
        }

        if let Some(event_bridge) = &self.event_bridge {
            if let Err(e) = event_bridge
                .open(self.config.event_port, &terminator, true)
                .await
            {
                warn!("Unable to open event bridge: {}", e);
            }
        }
    }

    fn close_bridges(&self) {
        self.command_bridge.close();
        if let Some(event_bridge) = &self.event_bridge {
            event_bridge.close();
        }
    }

    async fn handle_device_event(&mut self, event: Event) {
        match event {
            Event::DeviceConnected(_) => {
                info!("Connected!");
            }
            Event::DeviceReady(_) => {
                info!("{} is ready", self.device.name());
                self.open_bridges().await;
            }
            Event::DataReceived(_, data) => {
                self.command_bridge.send(&data);
            }
            Event::EventDataReceived(_, data) => {
                self.event_bridge
                    .as_ref()
                    .unwrap_or(&self.command_bridge)
                    .send(&data);
            }
            Event::DeviceDisconnected(_) => {
                info!("Disconnected!");
                self.close_bridges();
                self.mode = OperationalMode::Stream;
                self.mode_change_available = false;
                self.changing_mode = false;
            }
            Event::ModeChangeAvailable(_) => {
                self.mode_change_available = true;
            }
            Event::ModeChanged(_, mode) => {
                self.mode = mode;
                self.changing_mode = false;
            }
            Event::ModeChangeError(_, e) => {
                warn!("Mode change failed: {}", e);
                self.changing_mode = false;
            }
            Event::DeviceConnectError(_, e)
            | Event::DeviceError(_, e)
            | Event::DataSendError(_, e)
            | Event::DataReceiveError(_, e) => {
                warn!("{}", e);
            }
            other => debug!("Session ignoring {}", other.kind()),
        }
    }

    fn handle_bridge_event(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::Command { command, .. } => {
                if !self.device.is_connected() {
                    warn!("Dropping command, {} is not connected", self.device.name());
                    return;
                }
                debug!("Forwarding {}", printable(&command));
                self.adapter.send_data(&self.device, &command);
            }
            BridgeEvent::Listening { bridge, addr } => {
                info!("{} TCP/IP server open at {}", bridge, addr);
            }
            BridgeEvent::ClientConnected { bridge, peer } => {
                info!("{} client {} connected", bridge, peer);
            }
            BridgeEvent::ClientDisconnected { bridge, peer } => {
                info!("{} client {} disconnected", bridge, peer);
            }
            BridgeEvent::Error { bridge, message } => {
                warn!("{} bridge error: {}", bridge, message);
            }
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.adapter.hub().unsubscribe(self.subscription);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventHub;
    use crate::sim::SimulatedManager;
    use std::net::{IpAddr, Ipv4Addr};

    fn loopback_config(layout: BridgeLayout) -> BridgeConfig {
        BridgeConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            layout,
            command_port: 0,
            event_port: 0,
            legacy_port: 0,
            read_timeout_ms: 50,
            write_timeout_ms: 200,
        }
    }

    fn setup(layout: BridgeLayout) -> (Arc<EventHub>, DeviceSession) {
        let hub = EventHub::new();
        let manager = SimulatedManager::new();
        let adapter = CallbackAdapter::attach(hub.clone(), manager);
        adapter.start_scan();
        let device = adapter.scanned_devices().remove(0);
        let session = DeviceSession::new(adapter, device, loopback_config(layout));
        (hub, session)
    }

    async fn drain(session: &mut DeviceSession) {
        while let Ok(event) = session.hub_rx.try_recv() {
            session.handle_device_event(event).await;
        }
    }

    #[tokio::test]
    async fn test_ready_opens_and_disconnect_closes() {
        let (_hub, mut session) = setup(BridgeLayout::Dual);
        assert!(!session.command_bridge().is_open());

        session.adapter.connect_device(&session.device.clone());
        drain(&mut session).await;

        assert!(session.command_bridge().is_open());
        assert!(session.event_bridge().map(|b| b.is_open()).unwrap_or(false));

        session.adapter.disconnect_device(&session.device.clone());
        drain(&mut session).await;

        assert!(!session.command_bridge().is_open());
        assert!(!session.event_bridge().map(|b| b.is_open()).unwrap_or(true));
    }

    #[tokio::test]
    async fn test_single_layout_has_one_bridge() {
        let (_hub, mut session) = setup(BridgeLayout::Single);
        assert!(session.event_bridge().is_none());

        session.adapter.connect_device(&session.device.clone());
        drain(&mut session).await;
        assert!(session.command_bridge().is_open());
    }

    #[tokio::test]
    async fn test_start_opens_for_connected_device() {
        let (_hub, mut session) = setup(BridgeLayout::Single);
        session.adapter.connect_device(&session.device.clone());
        while session.hub_rx.try_recv().is_ok() {}

        session.start().await;
        assert!(session.command_bridge().is_open());
    }

    #[tokio::test]
    async fn test_toggle_mode() {
        let (_hub, mut session) = setup(BridgeLayout::Single);
        assert!(!session.toggle_mode());

        session.adapter.connect_device(&session.device.clone());
        drain(&mut session).await;

        assert!(session.toggle_mode());
        assert!(!session.toggle_mode());

        drain(&mut session).await;
        assert_eq!(session.mode(), OperationalMode::Command);
        assert!(session.toggle_mode());
        drain(&mut session).await;
        assert_eq!(session.mode(), OperationalMode::Stream);
    }

    #[tokio::test]
    async fn test_reconnect_reopens_on_same_port() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let hub = EventHub::new();
        let adapter = CallbackAdapter::attach(hub, SimulatedManager::new());
        adapter.start_scan();
        let device = adapter.scanned_devices().remove(0);
        let mut config = loopback_config(BridgeLayout::Single);
        config.legacy_port = port;
        let mut session = DeviceSession::new(adapter, device.clone(), config);

        session.adapter.connect_device(&device);
        drain(&mut session).await;
        assert_eq!(session.command_bridge().local_addr().map(|a| a.port()), Some(port));

        session.adapter.disconnect_device(&device);
        drain(&mut session).await;
        session.adapter.connect_device(&device);
        drain(&mut session).await;

        assert!(session.command_bridge().is_open());
        assert_eq!(session.command_bridge().local_addr().map(|a| a.port()), Some(port));
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let (hub, session) = setup(BridgeLayout::Single);
        assert_eq!(hub.subscriber_count(), 1);
        drop(session);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
