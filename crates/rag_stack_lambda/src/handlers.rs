pub mod delay;
pub mod index_manager;
pub mod invocation_logging;
pub mod vector_index;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("failed to encode index request: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("index function invocation failed: {0}")]
    Invoke(String),
    #[error("index function returned an unreadable response: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("index operation on '{index_name}' failed: {message}")]
    IndexOperation { index_name: String, message: String },
    #[error("invocation logging call failed: {0}")]
    ModelLogging(String),
}
