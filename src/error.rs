use std::time::Duration;

use thiserror::Error;

pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("request timeout for code: {code} (waited {waited:?})")]
    ReplyTimeout { code: String, waited: Duration },

    #[error("reply channel for code {code} closed before a result arrived")]
    ReplyDropped { code: String },

    #[error("no loaded file with unique id {unique_id}")]
    UnknownRecord { unique_id: String },
}

impl SyncError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::ReplyTimeout { .. })
    }
}
