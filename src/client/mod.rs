use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::Config;
use crate::network::{connect, Connection, Deadline};
use crate::protocol::{ControlMessage, FileEntry};
use crate::transfer::{Direction, Progress, Source, TransferEngine};
use crate::{Error, Result};

/// Sequential client: every operation opens its own connection and sends one command.
pub struct Client {
    config: Config,
    engine: TransferEngine,
}

fn unexpected(got: &ControlMessage, wanted: &str) -> Error {
    Error::Malformed(format!("expected {}, got {}", wanted, got.kind()))
}

impl Client {
    pub fn new(config: Config) -> Self {
        let engine = TransferEngine::new(config.chunk_size);
        Self { config, engine }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn connect(&self) -> Result<Connection> {
        connect(
            &self.config.server_endpoint(),
            self.config.connect_timeout,
            self.config.io_timeout,
        )
        .await
    }

    /// Open a connection, send `request` and read the first reply.
    /// An ERROR reply becomes [`Error::Remote`].
    async fn request(&self, request: &ControlMessage) -> Result<(Connection, ControlMessage)> {
        let mut conn = self.connect().await?;
        let deadline = self.config.command_deadline();
        conn.send_control(request, deadline).await?;
        match conn.recv_control(deadline).await? {
            ControlMessage::Error { reason } => Err(Error::Remote(reason)),
            reply => Ok((conn, reply)),
        }
    }

    pub async fn list(&self) -> Result<Vec<FileEntry>> {
        match self.request(&ControlMessage::List).await? {
            (_, ControlMessage::FileList { entries }) => Ok(entries),
            (_, other) => Err(unexpected(&other, "LIST_RESULT")),
        }
    }

    pub async fn info(&self, name: &str) -> Result<FileEntry> {
        let request = ControlMessage::GetInfo {
            name: name.to_string(),
        };
        match self.request(&request).await? {
            (_, ControlMessage::FileInfo { size, modified }) => Ok(FileEntry {
                name: name.to_string(),
                size,
                modified,
            }),
            (_, other) => Err(unexpected(&other, "INFO_RESULT")),
        }
    }

    /// Round-trip time of a PING/PONG exchange, connect included.
    pub async fn ping(&self) -> Result<Duration> {
        let started = Instant::now();
        match self.request(&ControlMessage::Ping).await? {
            (_, ControlMessage::Pong) => Ok(started.elapsed()),
            (_, other) => Err(unexpected(&other, "PONG")),
        }
    }

    pub async fn quit(&self) -> Result<()> {
        match self.request(&ControlMessage::Quit).await? {
            (_, ControlMessage::Bye) => Ok(()),
            (_, other) => Err(unexpected(&other, "BYE")),
        }
    }

    /// Fetch `name` into `dest`. Returns the bytes written.
    ///
    /// Phase one asks for the size on its own connection so progress can show a total; if that
    /// fails, progress just counts bytes. Phase two opens a fresh connection for the payload.
    /// No local file is created unless the server accepts the request.
    pub async fn download(&self, name: &str, dest: &Path, progress: &Progress) -> Result<u64> {
        match self.info(name).await {
            Ok(entry) => progress.set_expected(Some(entry.size)),
            Err(e) => debug!(file = name, error = %e, "size lookup failed, byte count only"),
        }

        let request = ControlMessage::Get {
            name: name.to_string(),
        };
        let (mut conn, header) = self.request(&request).await?;
        let size = match header {
            ControlMessage::FileInfo { size, .. } => size,
            other => return Err(unexpected(&other, "INFO_RESULT")),
        };

        let file = tokio::fs::File::create(dest).await?;
        let received = self
            .engine
            .receive_into(
                &mut conn,
                file,
                Direction::Download,
                Some(size),
                self.config.transfer_deadline(size),
                Some(progress),
            )
            .await?;
        conn.expect_eof(self.config.command_deadline()).await?;
        Ok(received)
    }

    /// Store the local file `src` on the server as `name`. Returns the bytes sent.
    ///
    /// A missing or mismatched ACK is [`Error::UploadUnconfirmed`]: the bytes already left.
    pub async fn upload(&self, src: &Path, name: &str, progress: &Progress) -> Result<u64> {
        let source = Source::open(src).await?;
        let size = source.size();

        let request = ControlMessage::Put {
            name: name.to_string(),
            size,
        };
        let (mut conn, reply) = self.request(&request).await?;
        if reply != ControlMessage::Ready {
            return Err(unexpected(&reply, "READY"));
        }

        let sent = self
            .engine
            .send_source(
                &mut conn,
                source,
                Direction::Upload,
                self.config.transfer_deadline(size),
                Some(progress),
            )
            .await?;
        if sent < size {
            // Let the server see end-of-stream instead of waiting out its idle timer
            conn.shutdown().await?;
        }

        // The server syncs the file to disk before it answers
        match conn.recv_control(Deadline::after(self.config.io_timeout)).await {
            Ok(ControlMessage::Ack { received }) if received == sent && sent == size => Ok(sent),
            Ok(ControlMessage::Ack { received }) => Err(Error::UploadUnconfirmed {
                sent,
                acknowledged: Some(received),
            }),
            Ok(other) => {
                debug!(reply = other.kind(), "upload answered without ACK");
                Err(Error::UploadUnconfirmed {
                    sent,
                    acknowledged: None,
                })
            }
            Err(e) => {
                debug!(error = %e, "no ACK after upload");
                Err(Error::UploadUnconfirmed {
                    sent,
                    acknowledged: None,
                })
            }
        }
    }
}
