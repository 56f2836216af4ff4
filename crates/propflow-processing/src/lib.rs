//! Propflow image processing
//!
//! The transcoder turns an arbitrary source photo into the canonical stored
//! form: validated, orientation-corrected, bounded in size and re-encoded as
//! JPEG.

pub mod error;
pub mod orientation;
pub mod resize;
pub mod transcoder;
pub mod validator;

pub use error::TranscodeError;
pub use transcoder::{ProcessedImage, TranscodeOptions, Transcoder};
pub use validator::{normalize_content_type, InputValidator};
