//! tracewire-services — stores, registries, and the dynamic decode service.

pub mod decoder;
pub mod registry;
pub mod remote;
pub mod store;

pub use decoder::{
    BindOutcome, DecodedRecord, DecoderService, InboundDatagram, RegisterOutcome, ServiceError,
};
pub use registry::{
    association_table, schema_registry, AssociationTable, CompiledSchema, SchemaRegistry,
    StreamBinding,
};
pub use remote::{HttpKv, RemoteKv, RemoteKvError};
pub use store::{StoreError, TieredStore};
