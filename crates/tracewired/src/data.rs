//! Data-plane datagram listener.
//!
//! Datagram layout: 16 bytes of stream id, then payload. Short datagrams
//! are dropped with a warning. Well-formed ones go onto the bounded decode
//! queue; when the queue is full the datagram is dropped with a warning —
//! load shedding, since UDP offers no backpressure to apply.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use tracewire_core::wire::split_datagram;
use tracewire_services::decoder::InboundDatagram;

pub struct DataListener {
    socket: UdpSocket,
    buffer_bytes: usize,
    queue: mpsc::Sender<InboundDatagram>,
    shutdown: broadcast::Receiver<()>,
}

impl DataListener {
    pub async fn bind(
        addr: &str,
        buffer_bytes: usize,
        queue: mpsc::Sender<InboundDatagram>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind data listener on {addr}"))?;
        tracing::info!(addr = %socket.local_addr()?, "data listener bound");
        Ok(Self {
            socket,
            buffer_bytes,
            queue,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; self.buffer_bytes];

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("data listener shutting down");
                    return Ok(());
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, _peer) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };

                    let Some((stream_id, payload)) = split_datagram(&buf[..len]) else {
                        tracing::warn!(len, "datagram shorter than the stream id prefix, dropping");
                        continue;
                    };

                    let datagram = InboundDatagram {
                        stream_id,
                        payload: Bytes::copy_from_slice(payload),
                    };

                    match self.queue.try_send(datagram) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(dropped)) => {
                            tracing::warn!(stream = %dropped.stream_id, "decode queue full, dropping datagram");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            tracing::info!("decode queue closed, stopping data listener");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
