use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

use super::dispatch::{self, Command, UNKNOWN_COMMAND};
use super::ServerContext;
use crate::network::Connection;
use crate::protocol::ControlMessage;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingCommand,
    Executing,
    Closing,
}

/// Serves exactly one command on one accepted connection, then closes it.
pub struct Session {
    conn: Connection,
    peer_addr: SocketAddr,
    state: SessionState,
    ctx: Arc<ServerContext>,
}

impl Session {
    pub fn new(conn: Connection, ctx: Arc<ServerContext>) -> Self {
        let peer_addr = conn.peer_addr();
        Self {
            conn,
            peer_addr,
            state: SessionState::AwaitingCommand,
            ctx,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to `Closing`. The connection is closed on return either way.
    pub async fn run(mut self) -> Result<()> {
        info!(peer = %self.peer_addr, "client connected");
        let result = self.serve().await;
        self.close().await;
        info!(peer = %self.peer_addr, "client disconnected");
        result
    }

    async fn serve(&mut self) -> Result<()> {
        let deadline = self.ctx.config.command_deadline();
        let msg = match self.conn.recv_control(deadline).await {
            Ok(msg) => msg,
            Err(Error::UnknownOpcode(op)) => {
                self.reject(UNKNOWN_COMMAND.to_string()).await;
                return Err(Error::UnknownOpcode(op));
            }
            Err(Error::Malformed(reason)) => {
                self.reject(format!("malformed command: {reason}")).await;
                return Err(Error::Malformed(reason));
            }
            Err(e) => return Err(e),
        };

        let cmd = match Command::try_from(msg) {
            Ok(cmd) => cmd,
            Err(msg) => {
                self.reject(UNKNOWN_COMMAND.to_string()).await;
                return Err(Error::Malformed(format!(
                    "client sent response message {}",
                    msg.kind()
                )));
            }
        };

        debug!(peer = %self.peer_addr, command = cmd.name(), "dispatching");
        self.state = SessionState::Executing;
        dispatch::execute(cmd, &mut self.conn, &self.ctx).await
    }

    /// Answer a bad request with ERROR; the session then closes.
    async fn reject(&mut self, reason: String) {
        let deadline = self.ctx.config.command_deadline();
        if let Err(e) = self
            .conn
            .send_control(&ControlMessage::Error { reason }, deadline)
            .await
        {
            debug!(peer = %self.peer_addr, error = %e, "rejection not delivered");
        }
    }

    async fn close(&mut self) {
        self.state = SessionState::Closing;
        if let Err(e) = self.conn.shutdown().await {
            debug!(peer = %self.peer_addr, error = %e, "shutdown after session failed");
        }
    }
}
