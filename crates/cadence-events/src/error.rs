use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    /// The event payload could not be decoded into the subscriber's entity type.
    #[error("Invalid event payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// The subscriber accepted the event but failed while reacting to it.
    #[error("Subscriber failed: {0}")]
    HandlerFailed(String),
}

pub type Result<T> = std::result::Result<T, EventError>;
