#![allow(dead_code)]

use ferry::{Client, Config, Server};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A live server on an ephemeral loopback port, serving a temporary directory.
pub struct TestServer {
    pub addr: SocketAddr,
    pub dir: TempDir,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<ferry::Result<()>>,
}

pub fn test_config(dir: &Path) -> Config {
    Config {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        server_directory: dir.to_path_buf(),
        command_timeout: Duration::from_secs(2),
        io_timeout: Duration::from_secs(2),
        shutdown_grace: Duration::from_millis(500),
        ..Config::default()
    }
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        tweak(&mut config);
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.run(shutdown.clone()));
        Self {
            addr,
            dir,
            shutdown,
            handle,
        }
    }

    pub fn client(&self) -> Client {
        let config = Config {
            server_address: "127.0.0.1".to_string(),
            port: self.addr.port(),
            command_timeout: Duration::from_secs(2),
            io_timeout: Duration::from_secs(2),
            ..Config::default()
        };
        Client::new(config)
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

/// Deterministic non-trivial content.
pub fn pattern(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x1234_5678;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// Write raw bytes to the server and collect everything it sends until close.
pub async fn raw_exchange(addr: SocketAddr, bytes: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(bytes).await.unwrap();
    let mut reply = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut reply))
        .await
        .unwrap()
        .unwrap();
    reply
}
