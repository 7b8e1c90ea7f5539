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

//! TCP listener exposing a device byte stream to one network client.

use parking_lot::Mutex;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::framer::CommandFramer;
use crate::config::BridgeConfig;

/// Errors reported by [`TcpBridge::open`].
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("unable to listen on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("no usable local network address, interface down?")]
    NoLocalAddress,
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Status and data notifications emitted by a bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// Listener bound; `addr` is the address clients should use.
    Listening { bridge: String, addr: SocketAddr },
    /// A client connected, replacing any previous one.
    ClientConnected { bridge: String, peer: SocketAddr },
    /// The client went away.
    ClientDisconnected { bridge: String, peer: SocketAddr },
    /// A complete terminated command arrived from the client.
    Command { bridge: String, command: Vec<u8> },
    /// A socket failed; the bridge is closed.
    Error { bridge: String, message: String },
}

struct Listening {
    addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

struct Client {
    id: u64,
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<(u64, Vec<u8>)>,
    task: JoinHandle<()>,
}

struct Shared {
    /// Bumped by every close; tasks from an older generation stay silent.
    generation: u64,
    listening: Option<Listening>,
    client: Option<Client>,
    next_client_id: u64,
    framer: CommandFramer,
    readonly: bool,
    write_tag: u64,
    /// Aborted tasks that may still own their sockets.
    stale: Vec<JoinHandle<()>>,
}

impl Shared {
    /// Tear everything down. Aborted tasks are parked in `stale` until the
    /// next `open` waits for them to release the port.
    fn shutdown(&mut self) {
        self.generation += 1;
        self.framer.reset();

        if let Some(listening) = self.listening.take() {
            listening.accept_task.abort();
            self.stale.push(listening.accept_task);
        }
        if let Some(client) = self.client.take() {
            client.task.abort();
            self.stale.push(client.task);
        }
    }
}

#[derive(Clone)]
struct Context {
    name: String,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<BridgeEvent>,
    generation: u64,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl Context {
    /// Emit `event` unless the bridge was closed since this task started.
    fn emit_current(&self, shared: &Shared, event: BridgeEvent) -> bool {
        if shared.generation != self.generation {
            return false;
        }
        let _ = self.events.send(event);
        true
    }
}

/// One TCP listener with at most one connected client.
///
/// Bytes from the client are framed on the device terminator and emitted
/// as [`BridgeEvent::Command`]s, unless the bridge is read-only. Device
/// data is written back with [`TcpBridge::send`].
pub struct TcpBridge {
    name: String,
    bind_address: IpAddr,
    read_timeout: Duration,
    write_timeout: Duration,
    events: mpsc::UnboundedSender<BridgeEvent>,
    shared: Arc<Mutex<Shared>>,
}

impl TcpBridge {
    /// Create a closed bridge.
    pub fn new(
        name: impl Into<String>,
        config: &BridgeConfig,
        events: mpsc::UnboundedSender<BridgeEvent>,
    ) -> Self {
        Self {
            name: name.into(),
            bind_address: config.bind_address,
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            events,
            shared: Arc::new(Mutex::new(Shared {
                generation: 0,
                listening: None,
                client: None,
                next_client_id: 0,
                framer: CommandFramer::new(Vec::<u8>::new()),
                readonly: false,
                write_tag: 0,
                stale: Vec::new(),
            })),
        }
    }

    /// Start listening on `port`, closing whatever this bridge had open.
    ///
    /// On failure the bridge stays closed and a [`BridgeEvent::Error`] is
    /// emitted as well as returned.
    pub async fn open(
        &self,
        port: u16,
        terminator: &[u8],
        readonly: bool,
    ) -> Result<SocketAddr, BridgeError> {
        let stale = {
            let mut shared = self.shared.lock();
            shared.shutdown();
            std::mem::take(&mut shared.stale)
        };
        for task in stale {
            let _ = task.await;
        }

        let result = self.bind(port, terminator, readonly).await;
        if let Err(e) = &result {
            error!("Bridge {} failed to open: {}", self.name, e);
            let _ = self.events.send(BridgeEvent::Error {
                bridge: self.name.clone(),
                message: e.to_string(),
            });
        }
        result
    }

    async fn bind(
        &self,
        port: u16,
        terminator: &[u8],
        readonly: bool,
    ) -> Result<SocketAddr, BridgeError> {
        let advertised = local_address(self.bind_address).ok_or(BridgeError::NoLocalAddress)?;

        let listener = TcpListener::bind(SocketAddr::new(self.bind_address, port))
            .await
            .map_err(|source| BridgeError::Bind { port, source })?;
        let bound = listener
            .local_addr()
            .map_err(|source| BridgeError::Bind { port, source })?;
        let addr = SocketAddr::new(advertised, bound.port());

        let mut shared = self.shared.lock();
        shared.framer = CommandFramer::new(terminator);
        shared.readonly = readonly;

        let ctx = Context {
            name: self.name.clone(),
            shared: self.shared.clone(),
            events: self.events.clone(),
            generation: shared.generation,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        };
        let accept_task = tokio::spawn(accept_loop(listener, ctx));
        shared.listening = Some(Listening { addr, accept_task });

        info!(
            "Bridge {} listening at {}{}",
            self.name,
            addr,
            if readonly { " (read-only)" } else { "" }
        );
        let _ = self.events.send(BridgeEvent::Listening {
            bridge: self.name.clone(),
            addr,
        });

        Ok(addr)
    }

    /// Disconnect the client and listener and drop buffered bytes.
    ///
    /// Safe to call repeatedly and on a bridge that never opened.
    pub fn close(&self) {
        let mut shared = self.shared.lock();
        let was_open = shared.listening.is_some();
        shared.shutdown();
        if was_open {
            info!("Bridge {} closed", self.name);
        }
    }

    /// Write `data` to the connected client.
    ///
    /// Without a client the data is dropped. Delivery is best effort: a
    /// write that does not finish within the write timeout is abandoned.
    pub fn send(&self, data: &[u8]) {
        let mut shared = self.shared.lock();
        let Shared {
            client, write_tag, ..
        } = &mut *shared;

        match client {
            Some(client) => {
                let tag = *write_tag;
                *write_tag += 1;
                if client.outbound.send((tag, data.to_vec())).is_err() {
                    debug!("Bridge {} client gone, write {} dropped", self.name, tag);
                }
            }
            None => {
                debug!(
                    "Bridge {} has no client, {} bytes dropped",
                    self.name,
                    data.len()
                );
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().listening.is_some()
    }

    /// Address advertised to clients while open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.lock().listening.as_ref().map(|l| l.addr)
    }

    pub fn has_client(&self) -> bool {
        self.shared.lock().client.is_some()
    }

    /// Number of buffered bytes not yet forming a command.
    pub fn pending_len(&self) -> usize {
        self.shared.lock().framer.pending().len()
    }
}

impl Drop for TcpBridge {
    fn drop(&mut self) {
        self.shared.lock().shutdown();
    }
}

async fn accept_loop(listener: TcpListener, ctx: Context) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let mut shared = ctx.shared.lock();
                if shared.generation != ctx.generation {
                    return;
                }

                if let Some(previous) = shared.client.take() {
                    info!(
                        "Bridge {}: {} replaces client {}",
                        ctx.name, peer, previous.peer
                    );
                    previous.task.abort();
                }
                shared.framer.reset();

                let id = shared.next_client_id;
                shared.next_client_id += 1;
                let readonly = shared.readonly;
                let (outbound, outbound_rx) = mpsc::unbounded_channel();
                let task = tokio::spawn(serve_client(
                    stream,
                    peer,
                    id,
                    readonly,
                    outbound_rx,
                    ctx.clone(),
                ));
                shared.client = Some(Client {
                    id,
                    peer,
                    outbound,
                    task,
                });

                info!("Bridge {}: client connected from {}", ctx.name, peer);
                ctx.emit_current(
                    &shared,
                    BridgeEvent::ClientConnected {
                        bridge: ctx.name.clone(),
                        peer,
                    },
                );
            }
            Err(e) => {
                error!("Bridge {}: accept error: {}", ctx.name, e);
                fail(&ctx, BridgeError::Io(e));
                return;
            }
        }
    }
}

async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    id: u64,
    readonly: bool,
    mut outbound: mpsc::UnboundedReceiver<(u64, Vec<u8>)>,
    ctx: Context,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; 4096];

    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some((tag, data)) = next else {
                    break;
                };
                match timeout(ctx.write_timeout, writer.write_all(&data)).await {
                    Ok(Ok(())) => {
                        debug!("Bridge {}: write {} done ({} bytes)", ctx.name, tag, data.len())
                    }
                    Ok(Err(e)) => {
                        warn!("Bridge {}: write {} failed: {}", ctx.name, tag, e);
                        fail(&ctx, BridgeError::Io(e));
                        return;
                    }
                    Err(_) => {
                        // Part of the data may already be on the wire.
                        warn!(
                            "Bridge {}: write {} timed out, dropping client {}",
                            ctx.name, tag, peer
                        );
                        break;
                    }
                }
            }
            read = timeout(ctx.read_timeout, reader.read(&mut buf)) => {
                match read {
                    // Timeouts only keep the loop responsive.
                    Err(_) => continue,
                    Ok(Ok(0)) => {
                        info!("Bridge {}: client {} closed the connection", ctx.name, peer);
                        break;
                    }
                    Ok(Ok(n)) => {
                        if readonly {
                            debug!("Bridge {}: ignoring {} bytes on read-only bridge", ctx.name, n);
                            continue;
                        }

                        let mut shared = ctx.shared.lock();
                        if shared.generation != ctx.generation {
                            return;
                        }
                        for command in shared.framer.push(&buf[..n]) {
                            debug!("Bridge {}: command {}", ctx.name, printable(&command));
                            let _ = ctx.events.send(BridgeEvent::Command {
                                bridge: ctx.name.clone(),
                                command,
                            });
                        }
                    }
                    Ok(Err(e)) => {
                        warn!("Bridge {}: read error from {}: {}", ctx.name, peer, e);
                        fail(&ctx, BridgeError::Io(e));
                        return;
                    }
                }
            }
        }
    }

    let mut shared = ctx.shared.lock();
    if shared.client.as_ref().map(|c| c.id) == Some(id) {
        shared.client = None;
        ctx.emit_current(
            &shared,
            BridgeEvent::ClientDisconnected {
                bridge: ctx.name.clone(),
                peer,
            },
        );
    }
}

/// Report a socket failure upward and leave the bridge closed.
fn fail(ctx: &Context, error: BridgeError) {
    let mut shared = ctx.shared.lock();
    if ctx.emit_current(
        &shared,
        BridgeEvent::Error {
            bridge: ctx.name.clone(),
            message: error.to_string(),
        },
    ) {
        shared.shutdown();
        info!("Bridge {} closed after {}", ctx.name, error);
    }
}

/// Resolve the address clients should connect to.
///
/// A specific bind address is used as is. For a wildcard bind, the first
/// routable address of the same family found on a local interface is used.
/// `None` means no interface is up.
pub fn local_address(bind_address: IpAddr) -> Option<IpAddr> {
    if !bind_address.is_unspecified() {
        return Some(bind_address);
    }

    let interfaces = match NetworkInterface::show() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!("Unable to list network interfaces: {}", e);
            return None;
        }
    };
    pick_interface_address(
        bind_address,
        interfaces.iter().flat_map(|iface| {
            iface.addr.iter().map(|addr| match addr {
                Addr::V4(v4) => IpAddr::V4(v4.ip),
                Addr::V6(v6) => IpAddr::V6(v6.ip),
            })
        }),
    )
}

fn pick_interface_address(
    bind_address: IpAddr,
    candidates: impl IntoIterator<Item = IpAddr>,
) -> Option<IpAddr> {
    candidates.into_iter().find(|ip| {
        ip.is_ipv4() == bind_address.is_ipv4()
            && !ip.is_loopback()
            && !ip.is_unspecified()
            && !is_link_local(ip)
    })
}

fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

/// Render bytes for logs: text when printable ASCII, hex otherwise.
pub(crate) fn printable(data: &[u8]) -> String {
    if data
        .iter()
        .all(|b| b.is_ascii_graphic() || b.is_ascii_whitespace())
    {
        String::from_utf8_lossy(data).escape_debug().to_string()
    } else {
        hex::encode(data)
    }
}
