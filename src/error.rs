use crate::types::{CameraInfo, StreamProfile};

/// Errors that can occur when configuring or streaming an endpoint.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("No registered format or sensor satisfies request {0}")]
    UnsupportedRequest(StreamProfile),

    #[error("Endpoint is already opened")]
    AlreadyOpened,

    #[error("Endpoint was not opened")]
    NotOpened,

    #[error("Endpoint is already streaming")]
    AlreadyStreaming,

    #[error("Endpoint is not streaming")]
    NotStreaming,

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Frame archive exhausted")]
    OutOfFrameMemory,

    #[error("Camera info {0:?} already registered with a different value")]
    DuplicateInfo(CameraInfo),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Endpoint released")]
    EndpointReleased,
}

impl EndpointError {
    /// Shorthand used by device collaborators to report a failure.
    pub fn device(msg: impl Into<String>) -> Self {
        EndpointError::Device(msg.into())
    }
}
