//! Storage client for an observability backend persisting telemetry into
//! an Elasticsearch-compatible document store.
//!
//! The crate hides multi-tenant index namespacing, the asynchronous bulk
//! write pipeline, index/template lifecycle management and time-bucket
//! retention deletion behind a small set of handles: [`EsClient`] for the
//! connection and synchronous operations, [`bulk::BulkProcessor`] for
//! high-throughput writes, [`ttl::RetentionTask`] for data expiry.

pub mod bulk;
pub mod conf;
pub mod error;
pub mod es_client;
pub mod models;
pub mod naming;
pub mod ttl;

pub use bulk::{BulkProcessor, BulkReport, BulkSink};
pub use error::{Result, StorageError};
pub use es_client::EsClient;
pub use models::bulk::BulkOperation;
pub use naming::{IndexNameResolver, PhysicalIndex};
