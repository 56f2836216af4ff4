use crate::error::TranscodeError;

/// Cheap pre-decode checks on a source buffer.
///
/// Both checks run before any pixel data is touched so hostile or
/// oversized input never reaches the decoder.
#[derive(Debug, Clone)]
pub struct InputValidator {
    max_file_size: usize,
    allowed_content_types: Vec<String>,
}

impl InputValidator {
    pub fn new(max_file_size: usize, allowed_content_types: Vec<String>) -> Self {
        Self {
            max_file_size,
            allowed_content_types: allowed_content_types
                .into_iter()
                .map(|ct| normalize_content_type(&ct))
                .collect(),
        }
    }

    pub fn validate_size(&self, size: usize) -> Result<(), TranscodeError> {
        if size == 0 {
            return Err(TranscodeError::InvalidFormat("empty input".to_string()));
        }

        if size > self.max_file_size {
            return Err(TranscodeError::TooLarge {
                size,
                max: self.max_file_size,
            });
        }

        Ok(())
    }

    /// Returns the normalized content type when it is on the allow-list.
    pub fn validate_content_type(&self, content_type: &str) -> Result<String, TranscodeError> {
        let normalized = normalize_content_type(content_type);

        if !self.allowed_content_types.iter().any(|ct| ct == &normalized) {
            return Err(TranscodeError::InvalidFormat(format!(
                "content type {} is not allowed (allowed: {})",
                content_type,
                self.allowed_content_types.join(", ")
            )));
        }

        Ok(normalized)
    }

    pub fn validate(&self, content_type: &str, size: usize) -> Result<String, TranscodeError> {
        let normalized = self.validate_content_type(content_type)?;
        self.validate_size(size)?;
        Ok(normalized)
    }
}

/// Lowercase, drop parameters (`; charset=...`) and fold common aliases.
pub fn normalize_content_type(content_type: &str) -> String {
    let base = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    match base.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        "image/x-png" => "image/png".to_string(),
        "image/x-ms-bmp" => "image/bmp".to_string(),
        _ => base,
    }
}

/// Map a normalized content type to the decoder format it names.
pub fn format_for_content_type(content_type: &str) -> Option<image::ImageFormat> {
    match content_type {
        "image/jpeg" => Some(image::ImageFormat::Jpeg),
        "image/png" => Some(image::ImageFormat::Png),
        "image/webp" => Some(image::ImageFormat::WebP),
        "image/gif" => Some(image::ImageFormat::Gif),
        "image/bmp" => Some(image::ImageFormat::Bmp),
        "image/tiff" => Some(image::ImageFormat::Tiff),
        _ => None,
    }
}
