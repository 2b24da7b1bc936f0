//! Schema registry and stream association table.
//!
//! Both are tiered stores with fixed key transforms. Schemas key on the
//! protobuf package name. Associations key on the stream id with its
//! identity bits (version, destination class, device id) cleared, so the
//! same logical stream resolves to one binding no matter which device
//! emitted it or where it was routed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tracewire_core::stream_id::{FieldMask, StreamId};

use crate::remote::RemoteKv;
use crate::store::TieredStore;

/// Content checksum of a registered descriptor set (BLAKE3).
pub type Checksum = [u8; 32];

/// A registered descriptor set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledSchema {
    /// BLAKE3 of `descriptor`. Re-registration with an equal checksum is a
    /// no-op.
    #[serde(with = "hex::serde")]
    pub checksum: Checksum,
    /// Raw serialized `FileDescriptorSet` bytes, exactly as uploaded.
    #[serde(with = "tracewire_core::wire::base64_bytes")]
    pub descriptor: Vec<u8>,
}

/// An association between a stream and the message type that decodes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamBinding {
    pub package: String,
    pub message: String,
}

pub type SchemaRegistry = TieredStore<str, CompiledSchema>;
pub type AssociationTable = TieredStore<StreamId, StreamBinding>;

pub fn schema_registry(remote: Option<Arc<dyn RemoteKv>>) -> SchemaRegistry {
    TieredStore::new(remote, Arc::new(|package: &str| format!("schema/{package}")))
}

/// Cache key for a binding: identity bits cleared, canonical text form.
pub fn association_key(id: &StreamId) -> String {
    format!("stream/{}", id.cleared(FieldMask::IDENTITY))
}

pub fn association_table(remote: Option<Arc<dyn RemoteKv>>) -> AssociationTable {
    TieredStore::new(remote, Arc::new(|id: &StreamId| association_key(id)))
}
