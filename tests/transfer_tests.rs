mod common;

use common::{pattern, raw_exchange, TestServer};
use ferry::protocol::{decode_control, opcode, ControlMessage, Decoded};
use ferry::transfer::Progress;
use ferry::{Client, Config, Error};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const KIB: usize = 1024;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn round_trip_across_chunk_boundaries() {
    let server = TestServer::start().await;
    let client = server.client();
    let local = tempfile::tempdir().unwrap();

    for size in [0, 1, 64 * KIB - 1, 64 * KIB, 64 * KIB + 1, 3 * 1024 * KIB + 17] {
        let name = format!("file-{size}.bin");
        let data = pattern(size);
        let src = local.path().join(&name);
        std::fs::write(&src, &data).unwrap();

        let sent = client.upload(&src, &name, &Progress::new()).await.unwrap();
        assert_eq!(sent, size as u64);
        assert_eq!(std::fs::read(server.path(&name)).unwrap(), data);

        let dest = local.path().join(format!("back-{size}.bin"));
        let progress = Progress::new();
        let received = client.download(&name, &dest, &progress).await.unwrap();
        assert_eq!(received, size as u64);
        assert_eq!(progress.expected(), Some(size as u64));
        assert_eq!(std::fs::read(&dest).unwrap(), data, "size {size}");
    }

    server.stop().await;
}

#[tokio::test]
async fn payload_that_looks_like_protocol_is_copied_verbatim() {
    let server = TestServer::start().await;
    let client = server.client();

    // Content built from control message encodings and length headers
    let mut data = Vec::new();
    for msg in [
        ControlMessage::error("not found"),
        ControlMessage::FileInfo {
            size: 5,
            modified: 0,
        },
        ControlMessage::Ack { received: 0 },
        ControlMessage::Bye,
    ] {
        data.extend_from_slice(&msg.to_bytes().unwrap());
    }
    data.extend_from_slice(b"SIZE: 12345\nREADY\n");
    data.extend_from_slice(&[opcode::ERROR, 0xff, 0xff, 0x00, 0x00]);
    std::fs::write(server.path("tricky.bin"), &data).unwrap();

    let local = tempfile::tempdir().unwrap();
    let dest = local.path().join("tricky.bin");
    let received = client
        .download("tricky.bin", &dest, &Progress::new())
        .await
        .unwrap();

    assert_eq!(received, data.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), data);
    server.stop().await;
}

#[tokio::test]
async fn missing_file_yields_not_found_and_no_local_file() {
    let server = TestServer::start().await;
    let client = server.client();
    let local = tempfile::tempdir().unwrap();
    let dest = local.path().join("ghost.bin");

    match client.info("ghost.bin").await {
        Err(Error::Remote(reason)) => assert_eq!(reason, "not found"),
        other => panic!("expected not found, got {:?}", other),
    }
    match client.download("ghost.bin", &dest, &Progress::new()).await {
        Err(Error::Remote(reason)) => assert_eq!(reason, "not found"),
        other => panic!("expected not found, got {:?}", other),
    }
    assert!(!dest.exists());

    // On the wire: exactly one ERROR message and nothing else
    let request = ControlMessage::Get {
        name: "ghost.bin".to_string(),
    };
    let reply = raw_exchange(server.addr, &request.to_bytes().unwrap()).await;
    assert_eq!(reply, ControlMessage::error("not found").to_bytes().unwrap());

    server.stop().await;
}

#[tokio::test]
async fn put_of_zero_bytes_creates_empty_file() {
    let server = TestServer::start().await;

    let request = ControlMessage::Put {
        name: "empty.bin".to_string(),
        size: 0,
    };
    let reply = raw_exchange(server.addr, &request.to_bytes().unwrap()).await;

    let mut expected = ControlMessage::Ready.to_bytes().unwrap();
    expected.extend_from_slice(&ControlMessage::Ack { received: 0 }.to_bytes().unwrap());
    assert_eq!(reply, expected);
    assert_eq!(std::fs::read(server.path("empty.bin")).unwrap(), Vec::<u8>::new());

    server.stop().await;
}

#[tokio::test]
async fn raw_put_report_bin() {
    let server = TestServer::start().await;

    let mut wire = vec![0x04, 0x00, 0x0a];
    wire.extend_from_slice(b"report.bin");
    wire.extend_from_slice(&5u64.to_be_bytes());
    wire.extend_from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05]);

    let reply = raw_exchange(server.addr, &wire).await;

    let mut expected = vec![0x83, 0x84];
    expected.extend_from_slice(&5u64.to_be_bytes());
    assert_eq!(reply, expected);
    assert_eq!(
        std::fs::read(server.path("report.bin")).unwrap(),
        [0x01, 0x02, 0x03, 0x04, 0x05]
    );

    server.stop().await;
}

#[tokio::test]
async fn list_and_info_report_served_files() {
    let server = TestServer::start().await;
    std::fs::write(server.path("b.txt"), b"bravo").unwrap();
    std::fs::write(server.path("a.txt"), b"alpha!").unwrap();
    std::fs::create_dir(server.path("nested")).unwrap();
    let client = server.client();

    let entries = client.list().await.unwrap();
    let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["a.txt", "b.txt"]);
    assert_eq!(entries[0].size, 6);

    let info = client.info("b.txt").await.unwrap();
    assert_eq!(info.size, 5);
    assert_eq!(info.modified, entries[1].modified);

    server.stop().await;
}

#[tokio::test]
async fn upload_rejects_path_escapes() {
    let server = TestServer::start().await;
    let client = server.client();
    let local = tempfile::tempdir().unwrap();
    let src = local.path().join("x.bin");
    std::fs::write(&src, b"x").unwrap();

    match client.upload(&src, "../escape.bin", &Progress::new()).await {
        Err(Error::Remote(reason)) => assert_eq!(reason, "invalid file name"),
        other => panic!("expected invalid name, got {:?}", other),
    }
    assert!(!server.dir.path().join("../escape.bin").exists());

    server.stop().await;
}

#[tokio::test]
async fn ping_and_quit() {
    let server = TestServer::start().await;
    let client = server.client();

    let rtt = client.ping().await.unwrap();
    assert!(rtt < Duration::from_secs(2));
    client.quit().await.unwrap();

    server.stop().await;
}

/// Fake peer that answers one request with scripted bytes, then closes.
async fn scripted_server(script: Vec<u8>, read_payload: usize) -> Config {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            let script = script.clone();
            tokio::spawn(async move {
                // Read the request header byte-by-byte until it decodes
                let mut request = Vec::new();
                loop {
                    if let Ok(Decoded::Message { .. }) = decode_control(&request) {
                        break;
                    }
                    let mut byte = [0u8; 1];
                    if stream.read_exact(&mut byte).await.is_err() {
                        return;
                    }
                    request.push(byte[0]);
                }
                stream.write_all(&script).await.unwrap();
                let mut payload = vec![0u8; read_payload];
                let _ = stream.read_exact(&mut payload).await;
            });
        }
    });
    Config {
        server_address: "127.0.0.1".to_string(),
        port,
        command_timeout: Duration::from_secs(2),
        io_timeout: Duration::from_secs(2),
        ..Config::default()
    }
}

#[tokio::test]
async fn short_download_is_truncation_not_success() {
    let mut script = ControlMessage::FileInfo {
        size: 100,
        modified: 0,
    }
    .to_bytes()
    .unwrap();
    script.extend_from_slice(&[9u8; 10]);
    let client = Client::new(scripted_server(script, 0).await);

    let local = tempfile::tempdir().unwrap();
    let dest = local.path().join("short.bin");
    let err = client
        .download("short.bin", &dest, &Progress::new())
        .await
        .unwrap_err();

    assert!(err.is_io(), "got {:?}", err);
    assert!(matches!(
        err,
        Error::Truncated {
            expected: 100,
            received: 10
        }
    ));
}

#[tokio::test]
async fn mismatched_ack_is_unconfirmed_upload() {
    let mut script = ControlMessage::Ready.to_bytes().unwrap();
    script.extend_from_slice(&ControlMessage::Ack { received: 2 }.to_bytes().unwrap());
    let client = Client::new(scripted_server(script, 4).await);

    let local = tempfile::tempdir().unwrap();
    let src = local.path().join("four.bin");
    std::fs::write(&src, b"abcd").unwrap();

    match client.upload(&src, "four.bin", &Progress::new()).await {
        Err(Error::UploadUnconfirmed { sent, acknowledged }) => {
            assert_eq!(sent, 4);
            assert_eq!(acknowledged, Some(2));
        }
        other => panic!("expected unconfirmed upload, got {:?}", other),
    }
}

#[tokio::test]
async fn missing_ack_is_unconfirmed_upload() {
    let script = ControlMessage::Ready.to_bytes().unwrap();
    let client = Client::new(scripted_server(script, 3).await);

    let local = tempfile::tempdir().unwrap();
    let src = local.path().join("three.bin");
    std::fs::write(&src, b"abc").unwrap();

    match client.upload(&src, "three.bin", &Progress::new()).await {
        Err(Error::UploadUnconfirmed { sent, acknowledged }) => {
            assert_eq!(sent, 3);
            assert_eq!(acknowledged, None);
        }
        other => panic!("expected unconfirmed upload, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listing_ten_thousand_files_within_default_timeouts() {
    let server = TestServer::start_with(|config| {
        config.command_timeout = Config::default().command_timeout;
        config.io_timeout = Config::default().io_timeout;
    })
    .await;
    for i in 0..10_000 {
        std::fs::write(server.path(&format!("f{i:05}.txt")), b"x").unwrap();
    }
    let client = Client::new(Config {
        server_address: "127.0.0.1".to_string(),
        port: server.addr.port(),
        ..Config::default()
    });

    let started = std::time::Instant::now();
    let entries = client.list().await.unwrap();
    assert_eq!(entries.len(), 10_000);
    assert_eq!(entries[9_999].name, "f09999.txt");
    assert!(started.elapsed() < Config::default().command_timeout);

    server.stop().await;
}

#[tokio::test]
async fn slow_ack_after_upload_is_still_confirmed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        while !matches!(decode_control(&request), Ok(Decoded::Message { .. })) {
            let mut byte = [0u8; 1];
            stream.read_exact(&mut byte).await.unwrap();
            request.push(byte[0]);
        }
        stream
            .write_all(&ControlMessage::Ready.to_bytes().unwrap())
            .await
            .unwrap();
        let mut payload = [0u8; 4];
        stream.read_exact(&mut payload).await.unwrap();
        // Longer than the command timeout, like a sync of a large file
        tokio::time::sleep(Duration::from_millis(400)).await;
        stream
            .write_all(&ControlMessage::Ack { received: 4 }.to_bytes().unwrap())
            .await
            .unwrap();
    });

    let client = Client::new(Config {
        server_address: "127.0.0.1".to_string(),
        port,
        command_timeout: Duration::from_millis(150),
        io_timeout: Duration::from_secs(3),
        ..Config::default()
    });
    let local = tempfile::tempdir().unwrap();
    let src = local.path().join("four.bin");
    std::fs::write(&src, b"abcd").unwrap();

    let sent = client
        .upload(&src, "four.bin", &Progress::new())
        .await
        .unwrap();
    assert_eq!(sent, 4);
}
