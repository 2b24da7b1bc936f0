//! Dynamic decode service — control operations and the decode pipeline.
//!
//! Producers register a descriptor set once, bind stream ids to a message
//! type, and the data plane then decodes opaque payloads against the cached
//! descriptors reflectively. No compiled message type is ever present on
//! the decoding side.

use bytes::Bytes;
use prost::Message as _;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor};
use prost_types::FileDescriptorSet;
use std::sync::Arc;

use tracewire_core::stream_id::StreamId;
use tracewire_core::wire::{ControlResponse, ResponseStatus};

use crate::registry::{
    association_table, schema_registry, AssociationTable, CompiledSchema, SchemaRegistry,
    StreamBinding,
};
use crate::remote::RemoteKv;
use crate::store::StoreError;

/// One datagram lifted off the data socket. Lives for one decode attempt.
#[derive(Debug, Clone)]
pub struct InboundDatagram {
    pub stream_id: StreamId,
    pub payload: Bytes,
}

/// One successfully decoded record.
#[derive(Debug, Clone)]
pub struct DecodedRecord {
    pub stream_id: StreamId,
    pub json: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid descriptor set: {0}")]
    InvalidDescriptor(String),
    #[error("package {0} is not registered")]
    SchemaNotFound(String),
    #[error("stream {0} already bound to a different schema")]
    AlreadyBound(StreamId),
    #[error("no schema bound for stream {0}")]
    NoSchemaBound(StreamId),
    #[error("message {message} not found in package {package}")]
    DescriptorNotFound { package: String, message: String },
    #[error("payload did not decode as {message}: {reason}")]
    MalformedPayload { message: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("decoded value did not serialize to JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServiceError {
    /// Wire status for this error.
    pub fn status(&self) -> ResponseStatus {
        match self {
            ServiceError::InvalidDescriptor(_) | ServiceError::MalformedPayload { .. } => {
                ResponseStatus::InvalidArgument
            }
            ServiceError::SchemaNotFound(_)
            | ServiceError::NoSchemaBound(_)
            | ServiceError::DescriptorNotFound { .. } => ResponseStatus::NotFound,
            ServiceError::AlreadyBound(_) => ResponseStatus::AlreadyExists,
            ServiceError::Store(_) | ServiceError::Json(_) => ResponseStatus::Unavailable,
        }
    }

    pub fn to_response(&self) -> ControlResponse {
        ControlResponse::with_status(self.status(), self.to_string())
    }
}

/// Outcome of a schema upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Stored for the first time, or overwrote a different revision.
    Stored { package: String },
    /// Identical checksum already present; nothing was written.
    Unchanged { package: String },
}

/// Outcome of a bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    Bound,
    /// The identical binding already existed.
    Unchanged,
}

/// The decode service. Owns the schema registry and association table;
/// shared across the front-ends behind an `Arc`.
pub struct DecoderService {
    schemas: SchemaRegistry,
    bindings: AssociationTable,
}

impl DecoderService {
    pub fn new(remote: Option<Arc<dyn RemoteKv>>) -> Self {
        Self {
            schemas: schema_registry(remote.clone()),
            bindings: association_table(remote),
        }
    }

    /// Register the descriptor set for one package.
    ///
    /// The set must contain exactly one file; the package name is derived
    /// from that file's declared name. Re-registration with an identical
    /// checksum is a no-op; a differing checksum overwrites with a warning
    /// (last writer wins).
    pub async fn register_schema(&self, descriptor: &[u8]) -> Result<RegisterOutcome, ServiceError> {
        let fds = FileDescriptorSet::decode(descriptor)
            .map_err(|e| ServiceError::InvalidDescriptor(e.to_string()))?;
        if fds.file.len() != 1 {
            return Err(ServiceError::InvalidDescriptor(format!(
                "expected exactly one file descriptor in the set, got {}",
                fds.file.len()
            )));
        }

        let file_name = fds.file[0].name();
        let package = file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(file_name)
            .to_string();
        if package.is_empty() {
            return Err(ServiceError::InvalidDescriptor(
                "descriptor file has no name".to_string(),
            ));
        }

        let checksum = *blake3::hash(descriptor).as_bytes();

        if let Some(current) = self.schemas.get(&package).await? {
            if current.checksum == checksum {
                tracing::info!(package = %package, "descriptor unchanged, skipping");
                return Ok(RegisterOutcome::Unchanged { package });
            }
            tracing::warn!(package = %package, "overwriting descriptor with a new revision");
        }

        self.schemas
            .set(
                &package,
                CompiledSchema {
                    checksum,
                    descriptor: descriptor.to_vec(),
                },
            )
            .await?;
        tracing::info!(
            package = %package,
            checksum = %hex::encode(&checksum[..8]),
            "descriptor stored"
        );
        Ok(RegisterOutcome::Stored { package })
    }

    /// Bind a stream id to a message type.
    ///
    /// Re-binding identical content is idempotent; differing content is
    /// rejected until the stream is explicitly unbound. The package must
    /// already be registered.
    pub async fn bind_stream(
        &self,
        stream_id: StreamId,
        package: &str,
        message: &str,
    ) -> Result<BindOutcome, ServiceError> {
        if let Some(current) = self.bindings.get(&stream_id).await? {
            if current.package == package && current.message == message {
                return Ok(BindOutcome::Unchanged);
            }
            return Err(ServiceError::AlreadyBound(stream_id));
        }

        if self.schemas.get(package).await?.is_none() {
            return Err(ServiceError::SchemaNotFound(package.to_string()));
        }

        self.bindings
            .set(
                &stream_id,
                StreamBinding {
                    package: package.to_string(),
                    message: message.to_string(),
                },
            )
            .await?;
        tracing::info!(stream = %stream_id, package, message, "stream bound");
        Ok(BindOutcome::Bound)
    }

    /// Remove a stream's binding. Removing an absent binding is a no-op.
    pub async fn unbind_stream(&self, stream_id: StreamId) -> Result<(), ServiceError> {
        match self.bindings.get(&stream_id).await? {
            None => {
                tracing::debug!(stream = %stream_id, "no binding to remove");
            }
            Some(current) => {
                self.bindings.delete(&stream_id).await?;
                tracing::info!(
                    stream = %stream_id,
                    package = %current.package,
                    message = %current.message,
                    "binding removed"
                );
            }
        }
        Ok(())
    }

    /// Decode one payload into protobuf-JSON text.
    ///
    /// Failures are per-datagram: callers log and move on, no service state
    /// changes.
    pub async fn decode(&self, stream_id: StreamId, payload: &[u8]) -> Result<String, ServiceError> {
        let binding = self
            .bindings
            .get(&stream_id)
            .await?
            .ok_or(ServiceError::NoSchemaBound(stream_id))?;

        // The bind-time referential check makes a missing package an
        // inconsistency, but a remote tier shared with other writers can
        // still produce one.
        let schema = self
            .schemas
            .get(&binding.package)
            .await?
            .ok_or_else(|| ServiceError::SchemaNotFound(binding.package.clone()))?;

        let fds = FileDescriptorSet::decode(schema.descriptor.as_slice())
            .map_err(|e| ServiceError::InvalidDescriptor(e.to_string()))?;
        let pool = DescriptorPool::from_file_descriptor_set(fds)
            .map_err(|e| ServiceError::InvalidDescriptor(e.to_string()))?;

        let descriptor = resolve_message(&pool, &binding.message).ok_or_else(|| {
            ServiceError::DescriptorNotFound {
                package: binding.package.clone(),
                message: binding.message.clone(),
            }
        })?;

        let decoded = DynamicMessage::decode(descriptor, payload).map_err(|e| {
            ServiceError::MalformedPayload {
                message: binding.message.clone(),
                reason: e.to_string(),
            }
        })?;

        Ok(serde_json::to_string(&decoded)?)
    }

    /// In-process overlay sizes, for status reporting.
    pub async fn counts(&self) -> (usize, usize) {
        (self.schemas.len().await, self.bindings.len().await)
    }
}

/// Resolve a bound message name against the pool. The name is expected
/// fully qualified; a bare name is retried qualified with the descriptor's
/// declared package.
fn resolve_message(pool: &DescriptorPool, name: &str) -> Option<MessageDescriptor> {
    if let Some(descriptor) = pool.get_message_by_name(name) {
        return Some(descriptor);
    }
    if name.contains('.') {
        return None;
    }
    let package = pool.files().next()?.package_name().to_string();
    if package.is_empty() {
        return None;
    }
    pool.get_message_by_name(&format!("{package}.{name}"))
}
