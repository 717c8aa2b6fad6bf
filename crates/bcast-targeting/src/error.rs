use bcast_protocol::TargetKind;

#[derive(Debug, thiserror::Error)]
pub enum TargetingError {
    #[error("directory request failed: {0}")]
    Directory(String),
    #[error("target kind {0:?} has no directory-backed implementation")]
    Unsupported(TargetKind),
    #[error("circuit open and no cached snapshot is available")]
    NoCacheAvailable,
}
