#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("event bus transport error: {0}")]
    Transport(String),
    #[error("failed to decode event payload")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode event payload")]
    Encode(#[source] serde_json::Error),
    #[error("event bus shut down")]
    ShutDown,
}
