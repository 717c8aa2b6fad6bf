#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry transport error: {0}")]
    Transport(String),
    #[error("failed to (de)serialize registry payload")]
    Codec(#[source] serde_json::Error),
}
