/// Convenient result alias for publishing operations.
pub type Result<T> = std::result::Result<T, PublishError>;

/// Errors that can occur while publishing a signed release.
#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    /// The release host has no release for the requested tag.
    #[error("release not found for tag {0}")]
    NotFound(String),
    /// The release exists but does not carry the raw artifact.
    #[error("release asset not found: {0}")]
    AssetMissing(String),
    /// The release already carries a signed self-hosted artifact.
    #[error("signed self-hosted artifact already published: {0}")]
    AlreadyPublished(String),
    /// A download returned a non-success status.
    #[error("download failed -- server error {status}")]
    DownloadFailed {
        /// HTTP status reported by the server.
        status: u16,
    },
    /// The downloaded archive is missing or carries an unparsable manifest.
    #[error("malformed archive: {0}")]
    MalformedArchive(String),
    /// The signing service refused the submission.
    #[error("signing submission rejected -- server error {status}")]
    SigningRejected {
        /// HTTP status reported by the signing service.
        status: u16,
    },
    /// The signing service processed the artifact and found it invalid.
    #[error("signing service validation failed")]
    ValidationFailed,
    /// The signing service reported a file it could not sign.
    #[error("signing service failed to sign the artifact")]
    SigningFailed,
    /// A status poll returned a non-success status.
    #[error("signing status check failed -- server error {status}")]
    SigningServiceError {
        /// HTTP status reported by the signing service.
        status: u16,
    },
    /// The polling budget ran out before the artifact was signed.
    #[error("signing service timed out")]
    SigningTimeout,
    /// Uploading the signed artifact back to the release host failed.
    #[error("upload of signed artifact failed -- server error {status}")]
    UploadFailed {
        /// HTTP status reported by the server.
        status: u16,
    },
    /// The supplied version string does not match the channel's dialect.
    #[error("invalid version string for this channel: {0}")]
    InvalidVersion(String),
    /// The update descriptor file could not be interpreted.
    #[error("malformed update descriptor: {0}")]
    MalformedDescriptor(String),
    /// The descriptor template names a placeholder with no value.
    #[error("template placeholder has no value: ${0}")]
    MissingTemplateVar(String),
    /// An HTTP request could not be performed at all.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// A JSON document could not be decoded or encoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Failed to perform an I/O operation.
    #[error("filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to read or write a zip archive.
    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    /// Failed to mint a signing credential.
    #[error("credential error: {0}")]
    Credential(#[from] jsonwebtoken::errors::Error),
    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl PublishError {
    /// Helper for wrapping validation failures.
    pub fn other(msg: impl Into<String>) -> Self {
        PublishError::Other(msg.into())
    }
}
