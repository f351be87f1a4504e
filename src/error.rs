// Error types for the fireactions control plane.
//
// Boundary-facing code returns `Error`; internal plumbing uses `anyhow::Result`
// and converts at the edge (config loading, HTTP handlers, reconciliation loop).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("pool not found")]
    PoolNotFound,

    #[error("image unavailable: {image_ref}: {source}")]
    ImageUnavailable {
        image_ref: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("snapshot failed: {snapshot_id}: {source}")]
    SnapshotFailed {
        snapshot_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("credential unavailable for organization {organization}")]
    CredentialUnavailable { organization: String },

    #[error("credential issue failed: {0}")]
    CredentialIssueFailed(#[source] anyhow::Error),

    #[error("vm start failed: {0}")]
    VmStartFailed(#[source] anyhow::Error),

    #[error("vm stop failed: {0}")]
    VmStopFailed(#[source] anyhow::Error),

    #[error("webhook signature verification failed")]
    WebhookVerifyFailed,

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[source] anyhow::Error),

    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl Error {
    /// Maps this error onto the HTTP status the control interface returns for it.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::PoolNotFound => 404,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
