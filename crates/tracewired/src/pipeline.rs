//! Decode worker — drains the datagram queue through the decoder service.
//!
//! Decode failures are per-datagram: logged, the datagram discarded, the
//! loop keeps going. Decoded JSON is logged and handed to the record
//! channel best-effort; a missing or saturated consumer never stalls
//! ingestion.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};

use tracewire_services::decoder::{DecodedRecord, DecoderService, InboundDatagram};

pub struct DecodePipeline {
    decoder: Arc<DecoderService>,
    queue: mpsc::Receiver<InboundDatagram>,
    records: mpsc::Sender<DecodedRecord>,
    shutdown: broadcast::Receiver<()>,
}

impl DecodePipeline {
    pub fn new(
        decoder: Arc<DecoderService>,
        queue: mpsc::Receiver<InboundDatagram>,
        records: mpsc::Sender<DecodedRecord>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            decoder,
            queue,
            records,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("decode pipeline shutting down");
                    return Ok(());
                }

                item = self.queue.recv() => {
                    let Some(datagram) = item else {
                        tracing::info!("datagram queue closed, stopping pipeline");
                        return Ok(());
                    };
                    self.handle(datagram).await;
                }
            }
        }
    }

    async fn handle(&self, datagram: InboundDatagram) {
        match self
            .decoder
            .decode(datagram.stream_id, &datagram.payload)
            .await
        {
            Ok(json) => {
                tracing::info!(stream = %datagram.stream_id, "REC: {json}");
                let record = DecodedRecord {
                    stream_id: datagram.stream_id,
                    json,
                };
                if self.records.try_send(record).is_err() {
                    tracing::trace!("no record consumer, decoded output dropped");
                }
            }
            Err(e) => {
                tracing::warn!(stream = %datagram.stream_id, error = %e, "decode failed, datagram discarded");
            }
        }
    }
}
