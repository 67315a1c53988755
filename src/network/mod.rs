use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{timeout, Instant};

use crate::protocol::{ControlDecoder, ControlMessage, Decoded, MAX_CONTROL_LEN};
use crate::{Error, Result};

/// Point in time after which an operation gives up. `never()` leaves only the idle threshold.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn after(duration: Duration) -> Self {
        Self(Instant::now().checked_add(duration))
    }

    pub fn never() -> Self {
        Self(None)
    }

    /// Time left, `None` when unbounded. Zero once expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }
}

/// Run one partial I/O step, bounded by both the idle threshold and the overall deadline.
async fn step<T, F>(idle: Duration, deadline: Deadline, fut: F) -> Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    let wait = match deadline.remaining() {
        Some(left) if left.is_zero() => return Err(Error::Timeout),
        Some(left) => left.min(idle),
        None => idle,
    };
    match timeout(wait, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(classify(e)),
        Err(_) => Err(Error::Timeout),
    }
}

fn classify(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => Error::ConnectionClosed,
        io::ErrorKind::TimedOut => Error::Timeout,
        _ => Error::Io(e),
    }
}

/// One TCP stream with exact-length send/receive primitives.
pub struct Connection {
    stream: BufReader<TcpStream>,
    peer_addr: SocketAddr,
    idle_timeout: Duration,
    bytes_sent: u64,
    bytes_received: u64,
}

impl Connection {
    /// Create a new connection from a TCP stream
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, idle_timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            peer_addr,
            idle_timeout,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    /// Get the peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Total bytes written to the peer so far
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Total bytes read from the peer so far
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Write all of `data`, looping over partial writes.
    pub async fn send_exact(&mut self, data: &[u8], deadline: Deadline) -> Result<()> {
        let mut written = 0;
        while written < data.len() {
            let n = step(
                self.idle_timeout,
                deadline,
                self.stream.write(&data[written..]),
            )
            .await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            written += n;
            self.bytes_sent += n as u64;
        }
        step(self.idle_timeout, deadline, self.stream.flush()).await
    }

    /// Fill `buf` completely, looping over partial reads.
    pub async fn recv_into(&mut self, buf: &mut [u8], deadline: Deadline) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.recv_some(&mut buf[filled..], deadline).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            filled += n;
        }
        Ok(())
    }

    /// Read exactly `n` bytes.
    pub async fn recv_exact(&mut self, n: usize, deadline: Deadline) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.recv_into(&mut buf, deadline).await?;
        Ok(buf)
    }

    /// Single read of up to `buf.len()` bytes. `Ok(0)` means the peer closed its side.
    pub async fn recv_some(&mut self, buf: &mut [u8], deadline: Deadline) -> Result<usize> {
        let n = step(self.idle_timeout, deadline, self.stream.read(buf)).await?;
        self.bytes_received += n as u64;
        Ok(n)
    }

    pub async fn send_control(&mut self, msg: &ControlMessage, deadline: Deadline) -> Result<()> {
        let bytes = msg.to_bytes()?;
        self.send_exact(&bytes, deadline).await
    }

    /// Read one control message, consuming exactly its bytes and nothing after it.
    pub async fn recv_control(&mut self, deadline: Deadline) -> Result<ControlMessage> {
        let mut decoder = ControlDecoder::new();
        loop {
            match decoder.decode()? {
                Decoded::Message { message, .. } => return Ok(message),
                Decoded::NeedMoreData { at_least } => {
                    if decoder.buffered() + at_least > MAX_CONTROL_LEN {
                        return Err(Error::Malformed(format!(
                            "control message exceeds {} bytes",
                            MAX_CONTROL_LEN
                        )));
                    }
                    let tail = decoder.reserve(at_least);
                    self.recv_into(tail, deadline).await?;
                }
            }
        }
    }

    /// Confirm the peer has closed and sent nothing further.
    pub async fn expect_eof(&mut self, deadline: Deadline) -> Result<()> {
        let mut probe = [0u8; 1];
        match self.recv_some(&mut probe, deadline).await? {
            0 => Ok(()),
            _ => Err(Error::Malformed("unexpected bytes after payload".into())),
        }
    }

    /// Close our write side so the peer sees end-of-stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        step(self.idle_timeout, Deadline::never(), self.stream.shutdown()).await
    }
}

/// Connect to a remote host
pub async fn connect(
    addr: &str,
    connect_timeout: Duration,
    idle_timeout: Duration,
) -> Result<Connection> {
    let candidates: Vec<SocketAddr> = match timeout(connect_timeout, lookup_host(addr)).await {
        Ok(Ok(addrs)) => addrs.collect(),
        Ok(Err(_)) => return Err(Error::Unresolved(addr.to_string())),
        Err(_) => return Err(Error::Timeout),
    };
    if candidates.is_empty() {
        return Err(Error::Unresolved(addr.to_string()));
    }

    let mut last_err = Error::Unresolved(addr.to_string());
    for candidate in candidates {
        match timeout(connect_timeout, TcpStream::connect(candidate)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                let peer_addr = stream.peer_addr()?;
                return Ok(Connection::new(stream, peer_addr, idle_timeout));
            }
            Ok(Err(e)) => last_err = Error::Io(e),
            Err(_) => last_err = Error::Timeout,
        }
    }
    Err(last_err)
}
