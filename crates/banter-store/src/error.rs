use thiserror::Error;

/// Images above this size are rejected before any bytes leave the client.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("constraint violated: {0}")]
    Constraint(String),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("image exceeds {MAX_IMAGE_BYTES} bytes")]
    TooLarge,
    #[error("unsupported image type: {0:?}")]
    NotAnImage(String),
    #[error("blob storage unavailable: {0}")]
    Unavailable(String),
}
