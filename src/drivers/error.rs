use std::time::Duration;
use thiserror::Error;
#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("{instrument}: no reply to `{request}` within {after:?}")]
    Timeout {
        instrument: String,
        request: String,
        after: Duration,
    },
    #[error("{instrument}: I/O failure: {source}")]
    Io {
        instrument: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{instrument}: could not parse reply `{reply}` to `{request}`")]
    BadReply {
        instrument: String,
        request: String,
        reply: String,
    },
    #[error("{instrument}: worker thread is gone")]
    WorkerGone { instrument: String },
    #[error("{instrument}: connection already closed")]
    Closed { instrument: String },
    #[error("{instrument}: failed to open port: {reason}")]
    Open { instrument: String, reason: String },
}
