use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Failure taxonomy of the storage client. Administrative and synchronous
/// write errors surface through these variants; batched writes report their
/// outcome on the bulk observer channel instead.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid cluster node entry {entry:?}: {reason}")]
    Configuration { entry: String, reason: String },

    #[error("cluster is unreachable: {0}")]
    Connectivity(String),

    #[error("{context} failed with status {status}: {detail}")]
    IndexAdmin {
        context: String,
        status: u16,
        detail: String,
    },

    #[error("template existence check returned unexpected status {0}")]
    TemplateStateAmbiguous(u16),

    #[error("version conflict writing {index}/{id}")]
    VersionConflict { index: String, id: String },

    #[error("write to {index}/{id} failed with status {status}: {detail}")]
    Write {
        index: String,
        id: String,
        status: u16,
        detail: String,
    },

    #[error("bulk submission failed: {0}")]
    BulkTransport(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}
