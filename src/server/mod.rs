pub mod dispatch;
pub mod session;
pub mod store;

pub use session::{Session, SessionState};
pub use store::FileStore;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::network::Connection;
use crate::transfer::TransferEngine;
use crate::Result;

/// Read-only state every session shares.
pub struct ServerContext {
    pub store: FileStore,
    pub config: Config,
    pub engine: TransferEngine,
}

/// Bound listener that spawns one [`Session`] per accepted connection.
pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    slots: Arc<Semaphore>,
}

impl Server {
    /// Open the served directory and bind the configured address.
    pub async fn bind(config: Config) -> Result<Self> {
        let store = FileStore::open(&config.server_directory)?;
        let listener = TcpListener::bind(config.bind_endpoint()).await?;
        let slots = Arc::new(Semaphore::new(config.max_sessions));
        let engine = TransferEngine::new(config.chunk_size);
        Ok(Self {
            listener,
            ctx: Arc::new(ServerContext {
                store,
                config,
                engine,
            }),
            slots,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn store(&self) -> &FileStore {
        &self.ctx.store
    }

    /// Accept until `shutdown` fires, then give running sessions `shutdown_grace` to finish.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let sessions_token = CancellationToken::new();
        let mut sessions = JoinSet::new();

        self.log_inventory().await;
        info!(addr = %self.local_addr()?, "server ready and waiting for connections");

        loop {
            while let Some(done) = sessions.try_join_next() {
                reap(done);
            }

            // Hold a slot before accepting so the ceiling bounds open sockets too
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer_addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer_addr, error = %e, "set_nodelay failed");
            }

            let conn = Connection::new(stream, peer_addr, self.ctx.config.io_timeout);
            let session = Session::new(conn, self.ctx.clone());
            let token = sessions_token.child_token();
            sessions.spawn(async move {
                let _permit = permit;
                tokio::select! {
                    result = session.run() => {
                        if let Err(e) = result {
                            warn!(peer = %peer_addr, error = %e, "session failed");
                        }
                    }
                    _ = token.cancelled() => {
                        info!(peer = %peer_addr, "session cancelled by shutdown");
                    }
                }
            });
        }

        info!(active = sessions.len(), "stopped accepting connections");
        drop(self.listener);

        let grace = self.ctx.config.shutdown_grace;
        let drained = tokio::time::timeout(grace, async {
            while let Some(done) = sessions.join_next().await {
                reap(done);
            }
        })
        .await;

        if drained.is_err() {
            warn!(remaining = sessions.len(), "forcing shutdown of unfinished sessions");
            sessions_token.cancel();
            while let Some(done) = sessions.join_next().await {
                reap(done);
            }
        }

        info!("server shutdown complete");
        Ok(())
    }

    async fn log_inventory(&self) {
        let root = self.ctx.store.root().display().to_string();
        match self.ctx.store.list().await {
            Ok(entries) => {
                let total: u64 = entries.iter().map(|e| e.size).sum();
                info!(directory = %root, files = entries.len(), bytes = total, "serving directory");
                for entry in &entries {
                    debug!(file = %entry.name, size = entry.size, "existing file");
                }
            }
            Err(e) => warn!(directory = %root, error = %e, "cannot list served directory"),
        }
    }
}

fn reap(done: std::result::Result<(), JoinError>) {
    if let Err(e) = done {
        if e.is_panic() {
            error!(error = %e, "session task panicked");
        }
    }
}

/// Bind and run a server until `shutdown` is cancelled.
pub async fn serve(config: Config, shutdown: CancellationToken) -> Result<()> {
    Server::bind(config).await?.run(shutdown).await
}
