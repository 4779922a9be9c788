/// Result alias that carries the custom [`LyricSyncError`] type.
pub type Result<T> = std::result::Result<T, LyricSyncError>;

/// Common error type for the core crate.
///
/// Every variant renders as a single readable sentence so the front end can
/// surface it to the user unchanged.
#[derive(Debug, thiserror::Error)]
pub enum LyricSyncError {
    /// Free-form failure that does not fit one of the more specific variants.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Caller supplied data the engine cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Every block of a lyric source was malformed.
    #[error("no usable lyric lines found in {0}")]
    NoUsableLines(String),
    /// An image or audio asset could not be loaded.
    #[error("asset `{url}` is unavailable: {reason}")]
    AssetUnavailable { url: String, reason: String },
    /// The encoder backend failed to initialise or to run.
    #[error("encoder failure: {0}")]
    Encoder(String),
    /// Another export currently owns the encoder backend.
    #[error("the encoder is busy with another export")]
    EncoderBusy,
    /// The background generation collaborator failed.
    #[error("background generation failed: {0}")]
    Generation(String),
    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("json processing failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl LyricSyncError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn asset<U: Into<String>, R: ToString>(url: U, reason: R) -> Self {
        Self::AssetUnavailable {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<&str> for LyricSyncError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for LyricSyncError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_errors_name_the_url() {
        let err = LyricSyncError::asset("covers/a.png", "not found");
        assert_eq!(
            err.to_string(),
            "asset `covers/a.png` is unavailable: not found"
        );
    }
}
