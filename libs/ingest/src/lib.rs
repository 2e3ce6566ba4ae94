pub mod connection;
pub mod error;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use framing::{LengthPrefixedFraming, MAX_FRAME_BYTES};
use stream_api::{EventFactory, EventPublisher};

use crate::connection::{ConnContext, handle_connection};

pub use connection::{CLIENT_ADDRESS, IngestStats};
pub use error::IngestError;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub host: String,
    pub port: u16,
    /// 0 = unlimited.
    pub max_connections: usize,
    pub max_frame_bytes: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 0,
            max_connections: 0,
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }
}

struct Client {
    peer: SocketAddr,
    stream: TcpStream,
    handle: JoinHandle<()>,
}

struct Shared {
    running: AtomicBool,
    clients: Mutex<Vec<Client>>,
    max_connections: usize,
    ctx: Arc<ConnContext>,
}

impl Shared {
    fn lock_clients(&self) -> MutexGuard<'_, Vec<Client>> {
        match self.clients.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("client list lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  TcpIngestServer
// ═══════════════════════════════════════════════════════════════

/// Thread-per-connection TCP server that turns length-prefixed frames into
/// events and hands them to an [`EventPublisher`].
pub struct TcpIngestServer {
    config: IngestConfig,
    shared: Arc<Shared>,
    local_addr: Option<SocketAddr>,
    acceptor: Option<JoinHandle<()>>,
}

impl TcpIngestServer {
    pub fn new(config: IngestConfig, publisher: Arc<dyn EventPublisher>, factory: EventFactory) -> Self {
        let ctx = Arc::new(ConnContext {
            publisher,
            factory,
            framing: LengthPrefixedFraming::new(config.max_frame_bytes),
            stats: Arc::new(IngestStats::default()),
        });
        let shared = Arc::new(Shared {
            running: AtomicBool::new(false),
            clients: Mutex::new(Vec::new()),
            max_connections: config.max_connections,
            ctx,
        });
        Self { config, shared, local_addr: None, acceptor: None }
    }

    /// Bind, listen and spawn the accept thread.
    pub fn start(&mut self) -> Result<(), IngestError> {
        if self.acceptor.is_some() {
            return Err(IngestError::AlreadyRunning);
        }

        let addr = resolve(&self.config.host, self.config.port)?;
        let listener = TcpListener::bind(addr).map_err(|source| IngestError::Bind { addr, source })?;
        let local = listener
            .local_addr()
            .map_err(|source| IngestError::Bind { addr, source })?;

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name("ingest-accept".into())
            .spawn(move || accept_loop(listener, shared))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                IngestError::Spawn(e)
            })?;

        self.local_addr = Some(local);
        self.acceptor = Some(handle);
        tracing::info!(addr = %local, max_frame = self.shared.ctx.framing.max_frame(), "ingest server listening");
        Ok(())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &IngestStats {
        &self.shared.ctx.stats
    }

    /// Stop accepting, close every client socket and join all threads.
    pub fn stop(&mut self) {
        let Some(acceptor) = self.acceptor.take() else {
            return;
        };
        self.shared.running.store(false, Ordering::SeqCst);

        // accept() has no timeout; a throwaway connection unblocks it
        if let Some(addr) = self.local_addr {
            if let Err(e) = TcpStream::connect(wake_addr(addr)) {
                tracing::warn!(error = %e, "wake-up connect failed");
            }
        }
        if acceptor.join().is_err() {
            tracing::error!("accept thread panicked");
        }

        let clients = std::mem::take(&mut *self.shared.lock_clients());
        for client in &clients {
            // клиент мог уже закрыть сокет сам
            if let Err(e) = client.stream.shutdown(Shutdown::Both) {
                tracing::debug!(peer = %client.peer, error = %e, "client socket shutdown failed");
            }
        }
        for client in clients {
            if client.handle.join().is_err() {
                tracing::error!(peer = %client.peer, "connection handler panicked");
            }
        }
        tracing::info!("ingest server stopped");
    }
}

impl Drop for TcpIngestServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(conn) => conn,
            Err(e) => {
                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }

        let mut clients = shared.lock_clients();
        reap_finished(&mut clients);

        if shared.max_connections > 0 && clients.len() >= shared.max_connections {
            tracing::warn!(peer = %peer, limit = shared.max_connections, "connection limit reached, closing");
            continue;
        }

        let tracked = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "cannot track client socket, closing");
                continue;
            }
        };

        let ctx = shared.ctx.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("ingest-{peer}"))
            .spawn(move || handle_connection(stream, peer, &ctx));
        match spawned {
            Ok(handle) => {
                shared.ctx.stats.on_accept();
                tracing::info!(peer = %peer, active = clients.len() + 1, "client connected");
                clients.push(Client { peer, stream: tracked, handle });
            }
            Err(e) => tracing::error!(peer = %peer, error = %e, "spawn connection handler failed"),
        }
    }
    tracing::debug!("accept loop exited");
}

fn reap_finished(clients: &mut Vec<Client>) {
    let mut i = 0;
    while i < clients.len() {
        if clients[i].handle.is_finished() {
            let client = clients.swap_remove(i);
            if client.handle.join().is_err() {
                tracing::error!(peer = %client.peer, "connection handler panicked");
            }
        } else {
            i += 1;
        }
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, IngestError> {
    let display = format!("{host}:{port}");
    (host, port)
        .to_socket_addrs()
        .and_then(|mut addrs| {
            addrs
                .next()
                .ok_or_else(|| std::io::Error::other("no addresses resolved"))
        })
        .map_err(|source| IngestError::Resolve { addr: display, source })
}

/// A wildcard bind address is not connectable everywhere; use loopback.
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port()),
        _ => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wake_addr_maps_wildcard_to_loopback() {
        let addr: SocketAddr = "0.0.0.0:9000".parse().unwrap();
        assert_eq!(wake_addr(addr), "127.0.0.1:9000".parse().unwrap());
        let addr: SocketAddr = "10.1.2.3:9000".parse().unwrap();
        assert_eq!(wake_addr(addr), addr);
    }

    #[test]
    fn test_resolve_rejects_garbage_host() {
        assert!(matches!(
            resolve("definitely not a host", 1),
            Err(IngestError::Resolve { .. })
        ));
    }
}
