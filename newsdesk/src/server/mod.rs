use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use common::ServerConfig;
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::router::CommandRouter;

pub mod connection;
pub mod registry;

pub use connection::{ClientSession, ConnectionHandler};
pub use registry::{ConnectionRegistry, Registration};

/// Accept loop plus the bookkeeping needed to shut every connection down.
pub struct Server {
    listener: TcpListener,
    router: Arc<CommandRouter>,
    registry: Arc<ConnectionRegistry>,
    settings: ServerConfig,
    shutdown: CancellationToken,
}

impl Server {
    /// Bind the listening socket. Cancelling `shutdown` later stops `run`.
    pub async fn bind(settings: ServerConfig, router: Arc<CommandRouter>, shutdown: CancellationToken) -> Result<Self> {
        let addr = tokio::net::lookup_host(settings.bind_addr())
            .await
            .with_context(|| format!("failed to resolve {}", settings.bind_addr()))?
            .next()
            .with_context(|| format!("no address for {}", settings.bind_addr()))?;

        let listener = listen(addr, settings.backlog).with_context(|| format!("failed to bind {}", addr))?;

        Ok(Self {
            listener,
            router,
            registry: Arc::new(ConnectionRegistry::new()),
            settings,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Serve until the shutdown token is cancelled, then close every
    /// connection and release the port.
    pub async fn run(self) -> Result<()> {
        info!(addr = %self.local_addr()?, "newsdesk listening");
        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_handler(&mut handlers, stream, peer),
                    Err(e) => {
                        warn!(%e, "accept failed; retrying after backoff");
                        tokio::select! {
                            _ = tokio::time::sleep(self.settings.accept_backoff()) => {}
                            _ = self.shutdown.cancelled() => break,
                        }
                    }
                },
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => report(joined),
            }
        }

        self.close(handlers).await;
        Ok(())
    }

    fn spawn_handler(&self, handlers: &mut JoinSet<()>, stream: tokio::net::TcpStream, peer: SocketAddr) {
        let registration = self.registry.register(peer, &self.shutdown);
        let conn = registration.id();
        debug!(conn, %peer, active = self.registry.len(), "accepted connection");

        let handler = ConnectionHandler::new(stream, peer, Arc::clone(&self.router), registration, &self.settings);
        handlers.spawn(async move {
            if let Err(e) = handler.run().await {
                warn!(conn, %peer, %e, "connection terminated");
            }
        });
    }

    async fn close(self, mut handlers: JoinSet<()>) {
        info!("initiating server shutdown");
        let closed = self.registry.close_all();
        debug!(closed, "signalled active connections");

        let drain = async {
            while let Some(joined) = handlers.join_next().await {
                report(joined);
            }
        };
        if tokio::time::timeout(self.settings.shutdown_timeout(), drain).await.is_err() {
            warn!(remaining = handlers.len(), "connections did not finish in time; aborting them");
            handlers.shutdown().await;
        }

        drop(self.listener);
        info!("server shutdown complete");
    }
}

fn listen(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

fn report(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(%e, "connection handler panicked");
        }
    }
}
