//! Typed commands and their handlers. Each connection runs exactly one.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::ServerContext;
use crate::network::Connection;
use crate::protocol::{ControlMessage, FileEntry};
use crate::transfer::{Direction, Progress, Source};
use crate::{Error, Result};

pub const NOT_FOUND: &str = "not found";
pub const UNKNOWN_COMMAND: &str = "unknown command";
pub const INVALID_NAME: &str = "invalid file name";
pub const CANNOT_CREATE: &str = "cannot create file";
pub const TOO_MANY_FILES: &str = "too many files to list";

/// The closed set of requests a session can serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    GetInfo { name: String },
    Get { name: String },
    Put { name: String, size: u64 },
    Ping,
    Quit,
}

impl TryFrom<ControlMessage> for Command {
    /// Responses are not commands; they come back unchanged.
    type Error = ControlMessage;

    fn try_from(msg: ControlMessage) -> std::result::Result<Self, Self::Error> {
        match msg {
            ControlMessage::List => Ok(Command::List),
            ControlMessage::GetInfo { name } => Ok(Command::GetInfo { name }),
            ControlMessage::Get { name } => Ok(Command::Get { name }),
            ControlMessage::Put { name, size } => Ok(Command::Put { name, size }),
            ControlMessage::Ping => Ok(Command::Ping),
            ControlMessage::Quit => Ok(Command::Quit),
            other => Err(other),
        }
    }
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::List => "LIST",
            Command::GetInfo { .. } => "INFO",
            Command::Get { .. } => "GET",
            Command::Put { .. } => "PUT",
            Command::Ping => "PING",
            Command::Quit => "QUIT",
        }
    }
}

/// Run the handler for `cmd` to completion.
pub async fn execute(cmd: Command, conn: &mut Connection, ctx: &ServerContext) -> Result<()> {
    match cmd {
        Command::List => handle_list(conn, ctx).await,
        Command::GetInfo { name } => handle_info(conn, ctx, &name).await,
        Command::Get { name } => handle_get(conn, ctx, &name).await,
        Command::Put { name, size } => handle_put(conn, ctx, &name, size).await,
        Command::Ping => reply(conn, ctx, ControlMessage::Pong).await,
        Command::Quit => {
            debug!(peer = %conn.peer_addr(), "client requested disconnect");
            reply(conn, ctx, ControlMessage::Bye).await
        }
    }
}

async fn reply(conn: &mut Connection, ctx: &ServerContext, msg: ControlMessage) -> Result<()> {
    conn.send_control(&msg, ctx.config.command_deadline()).await
}

async fn handle_list(conn: &mut Connection, ctx: &ServerContext) -> Result<()> {
    let entries = match ctx.store.list().await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "directory listing failed");
            return reply(conn, ctx, ControlMessage::error("cannot list directory")).await;
        }
    };

    let count = entries.len();
    let Some(bytes) = encode_listing(entries) else {
        warn!(files = count, "listing does not fit one control message");
        return reply(conn, ctx, ControlMessage::error(TOO_MANY_FILES)).await;
    };
    conn.send_exact(&bytes, ctx.config.command_deadline()).await?;
    info!(peer = %conn.peer_addr(), files = count, "file list sent");
    Ok(())
}

/// Wire form of a LIST reply; `None` past the entry cap or the control message size cap.
fn encode_listing(entries: Vec<FileEntry>) -> Option<Vec<u8>> {
    ControlMessage::FileList { entries }.to_bytes().ok()
}

async fn handle_info(conn: &mut Connection, ctx: &ServerContext, name: &str) -> Result<()> {
    match ctx.store.entry(name).await {
        Ok(entry) => {
            info!(peer = %conn.peer_addr(), file = name, size = entry.size, "file info sent");
            reply(
                conn,
                ctx,
                ControlMessage::FileInfo {
                    size: entry.size,
                    modified: entry.modified,
                },
            )
            .await
        }
        Err(Error::InvalidName(_)) => reply(conn, ctx, ControlMessage::error(INVALID_NAME)).await,
        Err(_) => reply(conn, ctx, ControlMessage::error(NOT_FOUND)).await,
    }
}

async fn handle_get(conn: &mut Connection, ctx: &ServerContext, name: &str) -> Result<()> {
    let path = match ctx.store.resolve(name) {
        Ok(path) => path,
        Err(_) => return reply(conn, ctx, ControlMessage::error(INVALID_NAME)).await,
    };
    // Once a source is open, only payload follows the header: no error can be injected later.
    let source = match Source::open(&path).await {
        Ok(source) => source,
        Err(_) => return reply(conn, ctx, ControlMessage::error(NOT_FOUND)).await,
    };

    let size = source.size();
    reply(
        conn,
        ctx,
        ControlMessage::FileInfo {
            size,
            modified: source.modified(),
        },
    )
    .await?;

    info!(peer = %conn.peer_addr(), file = name, size, "sending file");
    let started = Instant::now();
    let progress = Progress::new();
    progress.trace(name);
    let sent = ctx
        .engine
        .send_source(
            conn,
            source,
            Direction::Download,
            ctx.config.transfer_deadline(size),
            Some(&progress),
        )
        .await?;

    if sent != size {
        warn!(file = name, size, sent, "file changed while sending; client will see a short transfer");
    }
    info!(
        peer = %conn.peer_addr(),
        file = name,
        bytes = sent,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "file sent"
    );
    Ok(())
}

async fn handle_put(
    conn: &mut Connection,
    ctx: &ServerContext,
    name: &str,
    size: u64,
) -> Result<()> {
    let path = match ctx.store.resolve(name) {
        Ok(path) => path,
        Err(_) => return reply(conn, ctx, ControlMessage::error(INVALID_NAME)).await,
    };
    let file = match tokio::fs::File::create(&path).await {
        Ok(file) => file,
        Err(e) => {
            warn!(file = name, error = %e, "cannot create upload target");
            return reply(conn, ctx, ControlMessage::error(CANNOT_CREATE)).await;
        }
    };

    reply(conn, ctx, ControlMessage::Ready).await?;
    info!(peer = %conn.peer_addr(), file = name, size, "receiving file");

    let started = Instant::now();
    let progress = Progress::new();
    progress.trace(name);
    let result = ctx
        .engine
        .receive_into(
            conn,
            file,
            Direction::Upload,
            Some(size),
            ctx.config.transfer_deadline(size),
            Some(&progress),
        )
        .await;

    match result {
        Ok(received) => {
            reply(conn, ctx, ControlMessage::Ack { received }).await?;
            info!(
                peer = %conn.peer_addr(),
                file = name,
                bytes = received,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "file received"
            );
            Ok(())
        }
        Err(e) => {
            let received = progress.transferred();
            // Partial uploads stay on disk; there is no atomic rename.
            warn!(
                file = name,
                expected = size,
                received,
                error = %e,
                "upload incomplete, partial file retained"
            );
            // The peer may still be listening after a half-close
            if let Err(ack_err) = reply(conn, ctx, ControlMessage::Ack { received }).await {
                debug!(file = name, error = %ack_err, "partial ACK not delivered");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_become_commands() {
        assert_eq!(Command::try_from(ControlMessage::List), Ok(Command::List));
        assert_eq!(
            Command::try_from(ControlMessage::Put {
                name: "a".into(),
                size: 3
            }),
            Ok(Command::Put {
                name: "a".into(),
                size: 3
            })
        );
    }

    fn entries(count: usize, name_len: usize) -> Vec<FileEntry> {
        (0..count)
            .map(|i| FileEntry {
                name: format!("{i:06}{}", "n".repeat(name_len - 6)),
                size: 1,
                modified: 0,
            })
            .collect()
    }

    #[test]
    fn test_listing_within_caps_is_encoded() {
        let bytes = encode_listing(entries(1_000, 40)).unwrap();
        assert_eq!(bytes[0], crate::protocol::opcode::LIST_RESULT);
    }

    #[test]
    fn test_listing_over_byte_cap_is_refused() {
        // 90 000 entries are under the entry cap but about 20 MB on the wire
        assert!(encode_listing(entries(90_000, 200)).is_none());
    }

    #[test]
    fn test_listing_over_entry_cap_is_refused() {
        assert!(encode_listing(entries(crate::protocol::MAX_LIST_ENTRIES + 1, 8)).is_none());
    }

    #[test]
    fn test_responses_are_not_commands() {
        for msg in [
            ControlMessage::Pong,
            ControlMessage::Ready,
            ControlMessage::Ack { received: 1 },
            ControlMessage::error("x"),
        ] {
            assert_eq!(Command::try_from(msg.clone()), Err(msg));
        }
    }
}
