//! Transport-level scenarios driven over a raw socket.

use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use cairn_core::channel::{ScOutput, SecureChannel, TransportLimits};
use cairn_core::codec::BinaryDecodable;
use cairn_core::crypto::{NullAsymmetric, PermissivePki, SecurityMode, SecurityPolicy};
use cairn_core::status::StatusCode;
use cairn_core::types::Variant;
use cairn_core::wire::{ErrorBody, Frame, FrameAccumulator, FrameKind};
use libcairn::Client;

use crate::{start_server, DEMO_BLOB};

/// Read frames until the predicate says stop, driving nothing.
async fn next_frame(stream: &mut TcpStream, acc: &mut FrameAccumulator) -> Option<Frame> {
    let mut buf = [0u8; 65_536];
    loop {
        if let Some(frame) = acc.next_frame().expect("well-formed server frame") {
            return Some(frame);
        }
        match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
            Ok(Ok(0)) | Err(_) => return None,
            Ok(Ok(n)) => acc.feed(&buf[..n]),
            Ok(Err(_)) => return None,
        }
    }
}

#[tokio::test]
async fn oversize_frame_is_rejected_before_the_body() {
    let (server, _config) = start_server().await;
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

    // Announce a frame one byte past the server's receive buffer and stop.
    // The error must come back before any body arrives.
    let oversize: u32 = 65_535 + 1;
    let mut header = Vec::new();
    header.extend_from_slice(b"MSGF");
    header.extend_from_slice(&oversize.to_le_bytes());
    stream.write_all(&header).await.unwrap();

    let mut acc = FrameAccumulator::new(u32::MAX);
    let frame = next_frame(&mut stream, &mut acc).await.expect("ERR frame");
    assert_eq!(frame.kind, FrameKind::Error);
    let body = ErrorBody::decode(&mut frame.body.clone()).unwrap();
    assert_eq!(body.error, StatusCode::BAD_TCP_MESSAGE_TOO_LARGE);

    // The server hangs up afterwards
    assert!(next_frame(&mut stream, &mut acc).await.is_none());
}

#[tokio::test]
async fn replayed_opn_response_closes_the_channel() {
    let (server, config) = start_server().await;
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

    let mut channel = SecureChannel::client(
        1,
        SecurityPolicy::None,
        SecurityMode::None,
        config.endpoint_url.clone(),
        TransportLimits::default(),
        600_000,
    );
    stream.write_all(&channel.start().unwrap()).await.unwrap();

    // Drive the handshake by hand, keeping the raw OPN response bytes
    let mut acc = FrameAccumulator::new(u32::MAX);
    let mut opn_response_raw = None;
    while !channel.is_open() {
        let frame = next_frame(&mut stream, &mut acc).await.expect("handshake frame");
        if frame.kind == FrameKind::OpenSecureChannel {
            opn_response_raw = Some(frame.raw.to_vec());
        }
        let outputs = channel
            .handle_frame(frame, Instant::now(), &PermissivePki, &NullAsymmetric)
            .expect("handshake");
        for output in outputs {
            if let ScOutput::Send(bytes) = output {
                stream.write_all(&bytes).await.unwrap();
            }
        }
    }

    // Replay the recorded OPN response verbatim on the live socket
    stream
        .write_all(&opn_response_raw.expect("captured OPN"))
        .await
        .unwrap();

    let frame = next_frame(&mut stream, &mut acc).await.expect("ERR frame");
    assert_eq!(frame.kind, FrameKind::Error);
    let body = ErrorBody::decode(&mut frame.body.clone()).unwrap();
    assert_eq!(body.error, StatusCode::BAD_SECURITY_CHECKS_FAILED);
}

#[tokio::test]
async fn large_message_chunks_across_the_wire() {
    let (_server, config) = start_server().await;
    let client = Client::connect(config).await.expect("connect");
    client.create_session().await.expect("create session");
    client
        .activate_session(cairn_core::messages::UserIdentityToken::Anonymous {
            policy_id: Some("anonymous".into()),
        })
        .await
        .expect("activate");

    // Well past the 64 KiB negotiated buffer: must travel as C…CF chunks
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let node: cairn_core::types::NodeId = DEMO_BLOB.parse().unwrap();
    let status = client
        .write_value(node.clone(), Variant::ByteString(Some(payload.clone())))
        .await
        .expect("chunked write");
    assert_eq!(status, StatusCode::GOOD);

    let value = client.read_value(node).await.expect("chunked read");
    assert_eq!(value.value, Some(Variant::ByteString(Some(payload))));

    client.disconnect().await;
}

#[tokio::test]
async fn garbage_message_type_is_fatal() {
    let (server, _config) = start_server().await;
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

    stream.write_all(b"XYZF\x0c\x00\x00\x00wxyz").await.unwrap();

    let mut acc = FrameAccumulator::new(u32::MAX);
    let frame = next_frame(&mut stream, &mut acc).await.expect("ERR frame");
    assert_eq!(frame.kind, FrameKind::Error);
    let body = ErrorBody::decode(&mut frame.body.clone()).unwrap();
    assert_eq!(body.error, StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID);
}
