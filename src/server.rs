//! Server Lifecycle
//!
//! [`EventServer`] runs the WebSocket listener on a dedicated thread that owns
//! a single-threaded tokio runtime. All connection I/O and broadcast work
//! happens there; producer threads reach it only through the
//! [`CrossContextDispatcher`].
//!
//! # Example
//!
//! ```rust,no_run
//! use pulsecast::{EventServer, ServerConfig, Topic};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = EventServer::new(ServerConfig::default());
//!     let addr = server.start()?;
//!     println!("listening on {}", addr);
//!
//!     let dispatcher = server.dispatcher();
//!     dispatcher.broadcast_raw(Topic::NewsUpdate, serde_json::json!({"headline": "hello"}));
//!
//!     server.stop();
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};

use crate::config::ServerConfig;
use crate::dispatch::{CrossContextDispatcher, RuntimeLink};
use crate::websocket::{router, BroadcasterConfig, EventBroadcaster, TransportContext};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

type StartupResult = Result<SocketAddr, ServerError>;

/// Owns the connection-handling thread and its shared state
pub struct EventServer {
    config: ServerConfig,
    broadcaster: Arc<EventBroadcaster>,
    link: Arc<RuntimeLink>,
    shutdown: Option<watch::Sender<bool>>,
    thread: Option<thread::JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl EventServer {
    pub fn new(config: ServerConfig) -> Self {
        let broadcaster = Arc::new(EventBroadcaster::new(BroadcasterConfig {
            max_connections: config.max_connections,
        }));

        Self {
            config,
            broadcaster,
            link: Arc::new(RuntimeLink::new()),
            shutdown: None,
            thread: None,
            local_addr: None,
        }
    }

    /// Start the server thread and wait until it accepts connections
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port `0` was requested.
    pub fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if self.thread.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let (ready_tx, mut ready_rx) = oneshot::channel::<StartupResult>();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ctx = TransportContext {
            broadcaster: Arc::clone(&self.broadcaster),
            keepalive: self.config.keepalive(),
            shutdown: shutdown_rx,
        };
        let addr = self.config.addr();
        let link = Arc::clone(&self.link);
        // Half the budget for draining tasks, the rest for the join in stop()
        let drain = self.config.shutdown_timeout() / 2;

        let thread = thread::Builder::new()
            .name("pulsecast-ws".to_string())
            .spawn(move || run_server(addr, ctx, link, ready_tx, drain))
            .map_err(ServerError::ThreadSpawn)?;

        let timeout = self.config.startup_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            // Checked first so a zero timeout never races the server thread
            if Instant::now() >= deadline {
                // The thread exits on its own once it sees nobody is waiting
                drop(ready_rx);
                let _ = shutdown_tx.send(true);
                self.link.detach();
                tracing::error!(?timeout, "Event server did not start in time");
                return Err(ServerError::StartupTimeout(timeout));
            }

            match ready_rx.try_recv() {
                Ok(Ok(local_addr)) => {
                    self.shutdown = Some(shutdown_tx);
                    self.thread = Some(thread);
                    self.local_addr = Some(local_addr);
                    tracing::info!(addr = %local_addr, "Event server started");
                    return Ok(local_addr);
                }
                Ok(Err(e)) => {
                    let _ = thread.join();
                    return Err(e);
                }
                Err(oneshot::error::TryRecvError::Closed) => {
                    let _ = thread.join();
                    return Err(ServerError::ThreadExited);
                }
                Err(oneshot::error::TryRecvError::Empty) => thread::sleep(POLL_INTERVAL),
            }
        }
    }

    /// Stop accepting, close all connections and join the server thread
    ///
    /// Best-effort: if the thread does not exit within the shutdown timeout it
    /// is left to finish on its own.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        self.link.mark_stopping();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }

        let deadline = Instant::now() + self.config.shutdown_timeout();
        while !thread.is_finished() && Instant::now() < deadline {
            thread::sleep(POLL_INTERVAL);
        }

        if thread.is_finished() {
            if thread.join().is_err() {
                tracing::error!("Event server thread panicked");
            }
            tracing::info!("Event server stopped");
        } else {
            tracing::warn!(
                timeout = ?self.config.shutdown_timeout(),
                "Event server thread did not exit in time, detaching"
            );
        }

        self.link.detach();
        self.local_addr = None;
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some() && self.link.is_running()
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Handle for producer threads
    pub fn dispatcher(&self) -> CrossContextDispatcher {
        CrossContextDispatcher::new(Arc::clone(&self.broadcaster), Arc::clone(&self.link))
    }

    pub fn broadcaster(&self) -> Arc<EventBroadcaster> {
        Arc::clone(&self.broadcaster)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl Drop for EventServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the server thread
fn run_server(
    addr: String,
    ctx: TransportContext,
    link: Arc<RuntimeLink>,
    ready: oneshot::Sender<StartupResult>,
    drain: Duration,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(ServerError::Runtime(e)));
            return;
        }
    };

    runtime.block_on(async move {
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => {
                let _ = ready.send(Err(ServerError::Bind { addr, source }));
                return;
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(local_addr) => local_addr,
            Err(source) => {
                let _ = ready.send(Err(ServerError::Bind { addr, source }));
                return;
            }
        };

        if !link.attach_unless(Handle::current(), || ready.is_closed()) {
            return;
        }
        if ready.send(Ok(local_addr)).is_err() {
            // start() gave up waiting
            link.detach();
            return;
        }
        tracing::info!("Pulsecast listening on ws://{}", local_addr);

        let broadcaster = Arc::clone(&ctx.broadcaster);
        let mut shutdown = ctx.shutdown.clone();
        let app = router(ctx);

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stopping| *stopping).await;
                broadcaster.close_all().await;
            })
            .await;

        if let Err(e) = result {
            tracing::error!(error = %e, "WebSocket server error");
        }
        link.detach();
    });

    runtime.shutdown_timeout(drain);
}

/// Errors starting the server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Failed to build runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Failed to spawn server thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server did not start within {0:?}")]
    StartupTimeout(Duration),

    #[error("Server thread exited during startup")]
    ThreadExited,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use crate::websocket::Topic;
    use serde_json::json;

    fn local_config() -> ServerConfig {
        ServerConfig::new("127.0.0.1", 0)
    }

    #[test]
    fn test_start_stop() {
        let mut server = EventServer::new(local_config());
        assert!(!server.is_running());

        let addr = server.start().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(server.is_running());
        assert_eq!(server.local_addr(), Some(addr));
        assert!(server.dispatcher().is_running());

        server.stop();
        assert!(!server.is_running());
        assert_eq!(server.local_addr(), None);

        let dropped = server.dispatcher().dispatch(Event::Raw {
            topic: Topic::NewsUpdate,
            data: json!({}),
        });
        assert!(!dropped);
    }

    #[test]
    fn test_double_start() {
        let mut server = EventServer::new(local_config());
        server.start().unwrap();
        assert!(matches!(server.start(), Err(ServerError::AlreadyRunning)));
    }

    #[test]
    fn test_restart_after_stop() {
        let mut server = EventServer::new(local_config());
        server.start().unwrap();
        server.stop();
        server.start().unwrap();
        assert!(server.is_running());
    }

    #[test]
    fn test_bind_conflict_is_fatal() {
        let mut first = EventServer::new(local_config());
        let addr = first.start().unwrap();

        let mut second = EventServer::new(ServerConfig::new("127.0.0.1", addr.port()));
        match second.start() {
            Err(ServerError::Bind { addr: failed, .. }) => {
                assert_eq!(failed, format!("127.0.0.1:{}", addr.port()));
            }
            other => panic!("Expected Bind error, got {:?}", other),
        }
        assert!(!second.is_running());
    }

    #[test]
    fn test_startup_timeout_leaves_server_stopped() {
        let mut config = local_config();
        config.startup_timeout_ms = 0;
        let mut server = EventServer::new(config);

        assert!(matches!(
            server.start(),
            Err(ServerError::StartupTimeout(timeout)) if timeout.is_zero()
        ));
        assert!(!server.is_running());
        assert!(!server.dispatcher().is_running());
        assert_eq!(server.local_addr(), None);

        // The abandoned thread must not come up behind our back
        thread::sleep(Duration::from_millis(200));
        assert!(!server.dispatcher().is_running());
    }

    #[test]
    fn test_stop_without_start() {
        let mut server = EventServer::new(local_config());
        server.stop();
        assert!(!server.is_running());
    }
}
