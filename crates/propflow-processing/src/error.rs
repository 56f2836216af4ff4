/// Errors returned by the transcoder.
///
/// `InvalidFormat` and `TooLarge` are properties of the input and will fail
/// the same way on every retry.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("File too large: {size} bytes (max: {max} bytes)")]
    TooLarge { size: usize, max: usize },

    #[error("Failed to encode output image: {0}")]
    Encode(String),
}

impl TranscodeError {
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            TranscodeError::InvalidFormat(_) | TranscodeError::TooLarge { .. }
        )
    }
}
