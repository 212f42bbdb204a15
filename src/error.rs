use thiserror::Error;

/// Errors surfaced by the ESFS driver.
///
/// `BadFs` covers structural violations of the on-disk format (the volume is
/// not mountable, or the operation is aborted). `BadFileType` covers semantic
/// mismatches such as listing a regular file. I/O errors from the body are
/// propagated as `Io`, except during mount where they are rewritten to
/// `BadFs("not an esfs filesystem")` so that probing the wrong partition
/// yields a uniform answer.
#[derive(Debug, Error)]
pub enum EsfsError {
    #[error("bad filesystem: {0}")]
    BadFs(&'static str),

    #[error("bad file type: {0}")]
    BadFileType(&'static str),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias using `EsfsError`.
pub type Result<T> = std::result::Result<T, EsfsError>;
