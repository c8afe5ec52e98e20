//! TCP acceptor for WebSocket connections.
//!
//! Accepts sockets, runs the upgrade handshake on a task per connection and
//! hands successful upgrades to a [`Session`].

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::{Config, WebSocketConfig};
use crate::error::{Error, HandshakeError, Result};
use crate::listener::Listener;
use crate::protocol::{close, handshake};
use crate::registry::SessionRegistry;
use crate::session::Session;

const SHUTDOWN_REASON: &str = "Server shutting down";

/// State shared by the accept loop and every connection task.
struct Context {
    listener: Arc<dyn Listener>,
    websocket: WebSocketConfig,
    registry: Mutex<SessionRegistry>,
    connection_limit: Arc<Semaphore>,
    next_id: Arc<AtomicU64>,
    shutdown_timeout: Duration,
}

impl Context {
    fn registry(&self) -> MutexGuard<'_, SessionRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    context: Arc<Context>,
}

/// Server instance
pub struct Server {
    config: Config,
    listener: Arc<dyn Listener>,
    running: Mutex<Option<Running>>,
    /// Session ids keep increasing across restarts.
    next_id: Arc<AtomicU64>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config, listener: Arc<dyn Listener>) -> Self {
        Server {
            config,
            listener,
            running: Mutex::new(None),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind the listening socket and start accepting connections.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 was requested.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running();
        if running.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let addr: SocketAddr = self.config.listen.parse().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid listen address '{}': {}", self.config.listen, e),
            )
        })?;
        let tcp = TcpListener::from_std(create_listener(addr)?)?;
        let local_addr = tcp.local_addr()?;

        let context = Arc::new(Context {
            listener: Arc::clone(&self.listener),
            websocket: self.config.websocket,
            registry: Mutex::new(SessionRegistry::with_capacity(
                self.config.max_connections.min(1024),
            )),
            connection_limit: Arc::new(Semaphore::new(self.config.max_connections)),
            next_id: Arc::clone(&self.next_id),
            shutdown_timeout: self.config.shutdown_timeout,
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(tcp, shutdown_rx, Arc::clone(&context)));

        info!(
            address = %local_addr,
            max_connections = self.config.max_connections,
            "Server listening"
        );

        *running = Some(Running {
            local_addr,
            shutdown,
            accept_task,
            context,
        });
        Ok(local_addr)
    }

    /// Stop accepting, ask every session to close with 1001 and wait a
    /// bounded time for them to finish.
    pub async fn stop(&self) -> Result<()> {
        let running = self.running().take().ok_or(Error::NotRunning)?;
        info!(address = %running.local_addr, "Stopping server");

        let _ = running.shutdown.send(true);
        match running.accept_task.await {
            Ok(()) => {
                info!("Server stopped");
                Ok(())
            }
            Err(e) if e.is_panic() => Err(Error::Internal(format!("accept loop failed: {e}"))),
            Err(_) => Ok(()),
        }
    }

    /// Address the server is bound to, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running().as_ref().map(|r| r.local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Number of upgraded sessions currently registered.
    pub fn session_count(&self) -> usize {
        self.running()
            .as_ref()
            .map_or(0, |r| r.context.registry().len())
    }

    /// Start, serve until Ctrl-C, then stop.
    pub async fn run_until_ctrl_c(&self) -> Result<()> {
        self.start().await?;
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl-C");
        self.stop().await
    }
}

async fn accept_loop(tcp: TcpListener, mut shutdown: watch::Receiver<bool>, ctx: Arc<Context>) {
    let mut sessions = JoinSet::new();

    loop {
        // Wait for a connection slot
        let permit = tokio::select! {
            _ = shutdown.changed() => break,
            permit = Arc::clone(&ctx.connection_limit).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let (stream, peer) = tokio::select! {
            _ = shutdown.changed() => break,
            res = tcp.accept() => match res {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    ctx.listener.on_error(None, &Error::Transport(e));
                    continue;
                }
            },
        };
        debug!(peer = %peer, "New connection");

        // Reap finished connection tasks.
        while sessions.try_join_next().is_some() {}

        let ctx = Arc::clone(&ctx);
        let shutdown = shutdown.clone();
        sessions.spawn(async move {
            serve(stream, peer, &ctx, &shutdown).await;
            drop(permit);
        });
    }

    drop(tcp);

    let live = ctx.registry().snapshot();
    debug!(sessions = live.len(), "Closing live sessions");
    for conn in live {
        conn.close(close::GOING_AWAY, SHUTDOWN_REASON);
    }

    let drained = timeout(ctx.shutdown_timeout, async {
        while sessions.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(remaining = sessions.len(), "Sessions did not finish in time, aborting");
        sessions.abort_all();
        while sessions.join_next().await.is_some() {}
    }
}

/// Handshake one socket and, on success, run its session to completion.
async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: &Context,
    shutdown: &watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
    }

    let ws = ctx.websocket;
    let upgraded = match timeout(
        ws.handshake_timeout,
        handshake::accept(stream, ws.max_handshake_bytes),
    )
    .await
    {
        Ok(Ok(upgraded)) => upgraded,
        Ok(Err(e)) => {
            debug!(peer = %peer, error = %e, "Handshake failed");
            return;
        }
        Err(_) => {
            debug!(peer = %peer, error = %HandshakeError::Timeout, "Handshake failed");
            return;
        }
    };

    let id = ctx.next_id.fetch_add(1, Ordering::Relaxed);
    let session = Session::new(id, upgraded.stream, peer, Arc::clone(&ctx.listener), ws)
        .with_buffered(upgraded.buffered);
    let conn = session.connection().clone();
    let key = ctx.registry().insert(conn.clone());

    // stop() may have taken its snapshot before this session registered.
    if *shutdown.borrow() {
        conn.close(close::GOING_AWAY, SHUTDOWN_REASON);
    }

    session.run().await;
    ctx.registry().remove(key);
}

/// Create a TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
