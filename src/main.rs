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

//! TxRx Bridge demo application

use anyhow::{anyhow, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use txrx_bridge::{
    CallbackAdapter, Config, DeviceSession, EventHub, EventPayload, SimulatedManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("txrx_bridge=info".parse()?),
        )
        .init();

    info!("Starting TxRx Bridge v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    let hub = EventHub::new();
    let manager = SimulatedManager::new();
    let adapter = CallbackAdapter::attach(hub.clone(), manager);
    adapter.apply_timeouts(&config.device);

    // Console listener standing in for a UI
    hub.subscribe(|event| {
        match event.payload() {
            Some(EventPayload::Error(e)) => error!("[{}] {}", event.kind(), e),
            Some(EventPayload::Device(d)) => info!("[{}] {}", event.kind(), d.name()),
            Some(EventPayload::Mode(mode)) => info!("[{}] {:?}", event.kind(), mode),
            Some(EventPayload::Data(data)) => info!("[{}] {} bytes", event.kind(), data.len()),
            None => info!("[{}]", event.kind()),
        }
        Ok(())
    });

    adapter.start_scan();
    let device = adapter
        .scanned_devices()
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no device found"))?;
    adapter.stop_scan();

    let session = DeviceSession::new(adapter.clone(), device.clone(), config.bridge.clone());
    info!("Trying to connect to {}...", device.name());
    adapter.connect_device(&device);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };
    session.run(shutdown).await?;

    if device.is_connected() {
        adapter.disconnect_device(&device);
    }

    info!("TxRx Bridge stopped");
    Ok(())
}
