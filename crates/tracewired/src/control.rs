//! Native control RPC listener.
//!
//! Accepts TCP connections and serves length-prefixed JSON frames: one
//! request per frame, one response frame back, connections held open for
//! further requests. Binding happens in `bind()` so the daemon can treat
//! "control listener up" as its readiness barrier — a bind failure there is
//! the one startup error that kills the process.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use tracewire_core::wire::{
    decode_frame, encode_frame, ControlRequest, ControlResponse, ResponseStatus, FRAME_HEADER_LEN,
    MAX_FRAME_LEN,
};
use tracewire_services::decoder::{BindOutcome, DecoderService, RegisterOutcome};

pub struct ControlListener {
    listener: TcpListener,
    decoder: Arc<DecoderService>,
    shutdown: broadcast::Receiver<()>,
}

impl ControlListener {
    /// Bind the control socket. The listener is accepting once this
    /// returns.
    pub async fn bind(
        addr: &str,
        decoder: Arc<DecoderService>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind control listener on {addr}"))?;
        tracing::info!(addr = %listener.local_addr()?, "control listener bound");
        Ok(Self {
            listener,
            decoder,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("control listener shutting down");
                    return Ok(());
                }

                result = self.listener.accept() => {
                    let (socket, peer) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };

                    let decoder = self.decoder.clone();
                    let shutdown = self.shutdown.resubscribe();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(socket, decoder, shutdown).await {
                            tracing::warn!(peer = %peer, error = %e, "control connection closed with error");
                        }
                    });
                }
            }
        }
    }
}

async fn serve_connection(
    mut socket: TcpStream,
    decoder: Arc<DecoderService>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            done = serve_one(&mut socket, &decoder) => {
                if done? {
                    return Ok(());
                }
            }
        }
    }
}

/// Read one frame, dispatch it, write the response. Returns `true` on a
/// clean peer close.
async fn serve_one(socket: &mut TcpStream, decoder: &DecoderService) -> Result<bool> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    match socket.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(true),
        Err(e) => return Err(e).context("failed to read frame header"),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        bail!("oversized control frame of {len} bytes");
    }

    let mut body = vec![0u8; len];
    socket
        .read_exact(&mut body)
        .await
        .context("failed to read frame body")?;

    let request: ControlRequest = match decode_frame(&body) {
        Ok(request) => request,
        Err(e) => {
            // Malformed frame: answer, then drop the connection — framing
            // may be out of sync.
            let response = ControlResponse::invalid_argument(e.to_string());
            socket.write_all(&encode_frame(&response)?).await?;
            bail!("malformed control frame: {e}");
        }
    };

    let response = dispatch(decoder, request).await;
    socket
        .write_all(&encode_frame(&response)?)
        .await
        .context("failed to write response frame")?;
    Ok(false)
}

/// Translate one request into a service call and its wire response.
pub async fn dispatch(decoder: &DecoderService, request: ControlRequest) -> ControlResponse {
    match request {
        ControlRequest::UpsertSchema { descriptor } => {
            match decoder.register_schema(&descriptor).await {
                Ok(RegisterOutcome::Stored { .. }) => ControlResponse::ok(),
                Ok(RegisterOutcome::Unchanged { package }) => ControlResponse::with_status(
                    ResponseStatus::AlreadyExists,
                    format!("package {package} already registered, checksum matches"),
                ),
                Err(err) => err.to_response(),
            }
        }

        ControlRequest::BindStream {
            stream_id,
            package,
            message,
        } => match decoder.bind_stream(stream_id, &package, &message).await {
            Ok(BindOutcome::Bound) => ControlResponse::ok(),
            Ok(BindOutcome::Unchanged) => ControlResponse::with_status(
                ResponseStatus::Ok,
                "stream already bound to this schema",
            ),
            Err(err) => err.to_response(),
        },

        ControlRequest::UnbindStream { stream_id } => {
            match decoder.unbind_stream(stream_id).await {
                Ok(()) => ControlResponse::ok(),
                Err(err) => err.to_response(),
            }
        }
    }
}
