//! Tracewire integration harness.
//!
//! Boots the daemon's front-ends in-process on ephemeral loopback ports and
//! drives them over real sockets: control frames over TCP, datagrams over
//! UDP, gateway calls over HTTP. Each test starts its own stack, so tests
//! are independent and can run concurrently.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use prost::Message as _;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use tracewire_core::destination::Destination;
use tracewire_core::stream_id::{StreamId, StreamIdGenerator};
use tracewire_core::wire::{decode_frame, encode_frame, ControlRequest, ControlResponse, ResponseStatus};
use tracewire_services::decoder::{DecodedRecord, DecoderService, InboundDatagram};
use tracewired::control::ControlListener;
use tracewired::data::DataListener;
use tracewired::pipeline::DecodePipeline;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const SILENCE_WINDOW: Duration = Duration::from_millis(300);

// ── Harness ───────────────────────────────────────────────────────────────────

struct Stack {
    decoder: Arc<DecoderService>,
    control_addr: SocketAddr,
    data_addr: SocketAddr,
    records: mpsc::Receiver<DecodedRecord>,
    shutdown: broadcast::Sender<()>,
}

impl Drop for Stack {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

/// Bind control + data listeners and the decode pipeline on ephemeral
/// ports, sharing one decoder.
async fn start_stack() -> Result<Stack> {
    let decoder = Arc::new(DecoderService::new(None));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let control =
        ControlListener::bind("127.0.0.1:0", decoder.clone(), shutdown_tx.subscribe()).await?;
    let control_addr = control.local_addr()?;

    let (datagram_tx, datagram_rx) = mpsc::channel::<InboundDatagram>(64);
    let (record_tx, records) = mpsc::channel::<DecodedRecord>(64);

    let data =
        DataListener::bind("127.0.0.1:0", 65536, datagram_tx, shutdown_tx.subscribe()).await?;
    let data_addr = data.local_addr()?;

    tokio::spawn(control.run());
    tokio::spawn(data.run());
    tokio::spawn(
        DecodePipeline::new(
            decoder.clone(),
            datagram_rx,
            record_tx,
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    Ok(Stack {
        decoder,
        control_addr,
        data_addr,
        records,
        shutdown: shutdown_tx,
    })
}

/// Send one control request and read the response frame.
async fn call_control(socket: &mut TcpStream, request: &ControlRequest) -> Result<ControlResponse> {
    socket.write_all(&encode_frame(request)?).await?;

    let mut header = [0u8; 4];
    socket
        .read_exact(&mut header)
        .await
        .context("reading response header")?;
    let len = u32::from_be_bytes(header) as usize;
    let mut body = vec![0u8; len];
    socket
        .read_exact(&mut body)
        .await
        .context("reading response body")?;
    Ok(decode_frame(&body)?)
}

/// Send a raw data datagram (stream id prefix + payload) at the stack.
async fn send_datagram(data_addr: SocketAddr, stream_id: StreamId, payload: &[u8]) -> Result<()> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    let mut datagram = stream_id.to_bytes().to_vec();
    datagram.extend_from_slice(payload);
    socket.send_to(&datagram, data_addr).await?;
    Ok(())
}

async fn expect_record(stack: &mut Stack) -> Result<DecodedRecord> {
    timeout(RECV_TIMEOUT, stack.records.recv())
        .await
        .context("timed out waiting for a decoded record")?
        .context("record channel closed")
}

async fn expect_silence(stack: &mut Stack) {
    let outcome = timeout(SILENCE_WINDOW, stack.records.recv()).await;
    assert!(outcome.is_err(), "expected no decoded record, got one");
}

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// Serialized one-file descriptor set declaring
/// `package {package}; message Sample { uint64 seq = 1; string site = 2; }`.
fn sample_descriptor(file_name: &str, package: &str) -> Vec<u8> {
    let field = |name: &str, number: i32, ty: Type| FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        json_name: Some(name.to_string()),
        ..Default::default()
    };

    let set = FileDescriptorSet {
        file: vec![FileDescriptorProto {
            name: Some(file_name.to_string()),
            package: Some(package.to_string()),
            message_type: vec![DescriptorProto {
                name: Some("Sample".to_string()),
                field: vec![
                    field("seq", 1, Type::Uint64),
                    field("site", 2, Type::String),
                ],
                ..Default::default()
            }],
            syntax: Some("proto3".to_string()),
            ..Default::default()
        }],
    };
    set.encode_to_vec()
}

/// Wire bytes of `Sample { seq: 42, site: "lab" }`.
fn sample_payload() -> Vec<u8> {
    vec![0x08, 0x2A, 0x12, 0x03, b'l', b'a', b'b']
}

fn stream_id(device: u8) -> StreamId {
    StreamIdGenerator::new()
        .generate(
            Destination::Udp,
            device,
            Some("ran/du1/cell_load"),
            Some("load_report"),
        )
        .unwrap()
}

// ── Control plane + data plane ────────────────────────────────────────────────

#[tokio::test]
async fn register_bind_and_decode_over_sockets() -> Result<()> {
    let mut stack = start_stack().await?;
    let mut control = TcpStream::connect(stack.control_addr).await?;
    let id = stream_id(1);

    let response = call_control(
        &mut control,
        &ControlRequest::UpsertSchema {
            descriptor: sample_descriptor("telemetry.proto", "telemetry"),
        },
    )
    .await?;
    assert_eq!(response.status, ResponseStatus::Ok);

    let response = call_control(
        &mut control,
        &ControlRequest::BindStream {
            stream_id: id,
            package: "telemetry".to_string(),
            message: "telemetry.Sample".to_string(),
        },
    )
    .await?;
    assert_eq!(response.status, ResponseStatus::Ok);

    send_datagram(stack.data_addr, id, &sample_payload()).await?;

    let record = expect_record(&mut stack).await?;
    assert_eq!(record.stream_id, id);
    let value: serde_json::Value = serde_json::from_str(&record.json)?;
    assert_eq!(value["seq"], "42");
    assert_eq!(value["site"], "lab");
    Ok(())
}

#[tokio::test]
async fn reregistration_reports_already_exists() -> Result<()> {
    let stack = start_stack().await?;
    let mut control = TcpStream::connect(stack.control_addr).await?;
    let request = ControlRequest::UpsertSchema {
        descriptor: sample_descriptor("telemetry.proto", "telemetry"),
    };

    let first = call_control(&mut control, &request).await?;
    assert_eq!(first.status, ResponseStatus::Ok);

    let second = call_control(&mut control, &request).await?;
    assert_eq!(second.status, ResponseStatus::AlreadyExists);
    Ok(())
}

#[tokio::test]
async fn conflicting_bind_requires_unbind() -> Result<()> {
    let stack = start_stack().await?;
    let mut control = TcpStream::connect(stack.control_addr).await?;
    let id = stream_id(1);

    for (file, package) in [("telemetry.proto", "telemetry"), ("metrics.proto", "metrics")] {
        let response = call_control(
            &mut control,
            &ControlRequest::UpsertSchema {
                descriptor: sample_descriptor(file, package),
            },
        )
        .await?;
        assert_eq!(response.status, ResponseStatus::Ok);
    }

    let bind = |package: &str| ControlRequest::BindStream {
        stream_id: id,
        package: package.to_string(),
        message: format!("{package}.Sample"),
    };

    assert_eq!(
        call_control(&mut control, &bind("telemetry")).await?.status,
        ResponseStatus::Ok
    );

    // Identical rebind is idempotent.
    assert_eq!(
        call_control(&mut control, &bind("telemetry")).await?.status,
        ResponseStatus::Ok
    );

    // Conflicting rebind is refused.
    assert_eq!(
        call_control(&mut control, &bind("metrics")).await?.status,
        ResponseStatus::AlreadyExists
    );

    // Unbinding clears the way.
    assert_eq!(
        call_control(&mut control, &ControlRequest::UnbindStream { stream_id: id })
            .await?
            .status,
        ResponseStatus::Ok
    );
    assert_eq!(
        call_control(&mut control, &bind("metrics")).await?.status,
        ResponseStatus::Ok
    );
    Ok(())
}

#[tokio::test]
async fn unbound_stream_is_dropped_and_ingestion_continues() -> Result<()> {
    let mut stack = start_stack().await?;
    let mut control = TcpStream::connect(stack.control_addr).await?;
    let id = stream_id(1);

    // No binding yet: the datagram is discarded.
    send_datagram(stack.data_addr, id, &sample_payload()).await?;
    expect_silence(&mut stack).await;

    // Bind and retry: the next datagram decodes.
    call_control(
        &mut control,
        &ControlRequest::UpsertSchema {
            descriptor: sample_descriptor("telemetry.proto", "telemetry"),
        },
    )
    .await?;
    call_control(
        &mut control,
        &ControlRequest::BindStream {
            stream_id: id,
            package: "telemetry".to_string(),
            message: "telemetry.Sample".to_string(),
        },
    )
    .await?;

    send_datagram(stack.data_addr, id, &sample_payload()).await?;
    let record = expect_record(&mut stack).await?;
    assert!(record.json.contains("lab"));
    Ok(())
}

#[tokio::test]
async fn short_datagram_is_skipped() -> Result<()> {
    let mut stack = start_stack().await?;
    let mut control = TcpStream::connect(stack.control_addr).await?;
    let id = stream_id(1);

    call_control(
        &mut control,
        &ControlRequest::UpsertSchema {
            descriptor: sample_descriptor("telemetry.proto", "telemetry"),
        },
    )
    .await?;
    call_control(
        &mut control,
        &ControlRequest::BindStream {
            stream_id: id,
            package: "telemetry".to_string(),
            message: "telemetry.Sample".to_string(),
        },
    )
    .await?;

    // Below the 16-byte stream id prefix: dropped before decode.
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    socket.send_to(&[0u8; 10], stack.data_addr).await?;

    // The listener keeps going.
    send_datagram(stack.data_addr, id, &sample_payload()).await?;
    let record = expect_record(&mut stack).await?;
    assert_eq!(record.stream_id, id);
    Ok(())
}

#[tokio::test]
async fn malformed_control_frame_is_rejected() -> Result<()> {
    let stack = start_stack().await?;
    let mut control = TcpStream::connect(stack.control_addr).await?;

    let body = b"this is not json";
    let mut frame = (body.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(body);
    control.write_all(&frame).await?;

    let mut header = [0u8; 4];
    control.read_exact(&mut header).await?;
    let len = u32::from_be_bytes(header) as usize;
    let mut response = vec![0u8; len];
    control.read_exact(&mut response).await?;

    let response: ControlResponse = decode_frame(&response)?;
    assert_eq!(response.status, ResponseStatus::InvalidArgument);

    // The listener drops the connection after a framing error, and a fresh
    // connection still works.
    let mut next = TcpStream::connect(stack.control_addr).await?;
    let ok = call_control(
        &mut next,
        &ControlRequest::UnbindStream {
            stream_id: StreamId::from_bytes([0u8; 16]),
        },
    )
    .await?;
    assert_eq!(ok.status, ResponseStatus::Ok);
    Ok(())
}

// ── Gateway ───────────────────────────────────────────────────────────────────

/// Serve the gateway over the stack's decoder on an ephemeral port.
async fn start_gateway(stack: &Stack) -> Result<String> {
    let state = tracewire_api::ApiState {
        decoder: stack.decoder.clone(),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let shutdown = stack.shutdown.subscribe();
    tokio::spawn(async move {
        let _ = tracewire_api::serve_on(listener, state, shutdown).await;
    });
    Ok(format!("http://{addr}"))
}

#[tokio::test]
async fn gateway_and_rpc_are_views_over_one_service() -> Result<()> {
    use base64::engine::general_purpose::{STANDARD, URL_SAFE};
    use base64::Engine as _;

    let mut stack = start_stack().await?;
    let base = start_gateway(&stack).await?;
    let client = reqwest::Client::new();
    let id = stream_id(1);

    // Register through the gateway.
    let response = client
        .put(format!("{base}/v1/schema"))
        .json(&serde_json::json!({
            "descriptor": STANDARD.encode(sample_descriptor("telemetry.proto", "telemetry")),
        }))
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["status"], "OK");

    // Re-register: idempotent, reported as already existing.
    let response = client
        .put(format!("{base}/v1/schema"))
        .json(&serde_json::json!({
            "descriptor": STANDARD.encode(sample_descriptor("telemetry.proto", "telemetry")),
        }))
        .send()
        .await?;
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["status"], "ALREADY_EXISTS");

    // Bind through the gateway.
    let response = client
        .put(format!("{base}/v1/stream"))
        .json(&serde_json::json!({
            "streamId": STANDARD.encode(id.to_bytes()),
            "package": "telemetry",
            "message": "telemetry.Sample",
        }))
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    // The native RPC sees the same state.
    let mut control = TcpStream::connect(stack.control_addr).await?;
    let response = call_control(
        &mut control,
        &ControlRequest::BindStream {
            stream_id: id,
            package: "telemetry".to_string(),
            message: "telemetry.Sample".to_string(),
        },
    )
    .await?;
    assert_eq!(response.status, ResponseStatus::Ok);

    // And the data plane decodes against it.
    send_datagram(stack.data_addr, id, &sample_payload()).await?;
    let record = expect_record(&mut stack).await?;
    assert!(record.json.contains("lab"));

    // Status reflects both stores.
    let status: serde_json::Value = client
        .get(format!("{base}/v1/status"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(status["schemas"], 1);
    assert_eq!(status["bindings"], 1);

    // Unbind via DELETE with a url-safe stream id.
    let response = client
        .delete(format!(
            "{base}/v1/stream?streamId={}",
            URL_SAFE.encode(id.to_bytes())
        ))
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    let status: serde_json::Value = client
        .get(format!("{base}/v1/status"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(status["bindings"], 0);
    Ok(())
}

#[tokio::test]
async fn gateway_maps_conflict_to_409() -> Result<()> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    let stack = start_stack().await?;
    let base = start_gateway(&stack).await?;
    let client = reqwest::Client::new();
    let id = stream_id(1);

    for (file, package) in [("telemetry.proto", "telemetry"), ("metrics.proto", "metrics")] {
        client
            .put(format!("{base}/v1/schema"))
            .json(&serde_json::json!({
                "descriptor": STANDARD.encode(sample_descriptor(file, package)),
            }))
            .send()
            .await?;
    }

    let bind = |package: &str| {
        serde_json::json!({
            "streamId": STANDARD.encode(id.to_bytes()),
            "package": package,
            "message": format!("{package}.Sample"),
        })
    };

    let response = client
        .put(format!("{base}/v1/stream"))
        .json(&bind("telemetry"))
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    let response = client
        .put(format!("{base}/v1/stream"))
        .json(&bind("metrics"))
        .send()
        .await?;
    assert_eq!(response.status(), 409);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["status"], "ALREADY_EXISTS");
    Ok(())
}
