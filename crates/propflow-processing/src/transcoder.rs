use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader, Limits};
use propflow_core::PipelineConfig;
use std::io::Cursor;

use crate::error::TranscodeError;
use crate::orientation::Orientation;
use crate::resize::BoundedResize;
use crate::validator::{format_for_content_type, normalize_content_type, InputValidator};

/// Decoder hard limits, independent of the output bound. Anything above
/// this is treated as a decompression bomb.
const MAX_DECODE_DIMENSION: u32 = 20_000;
const MAX_DECODE_ALLOC: u64 = 512 * 1024 * 1024;

/// Byte ceiling for [`Transcoder::normalize`]. Stage output such as an
/// upscaled enhancement is legitimately larger than any source photo.
pub const MAX_NORMALIZE_INPUT_BYTES: usize = 256 * 1024 * 1024;

pub const OUTPUT_CONTENT_TYPE: &str = "image/jpeg";
pub const OUTPUT_EXTENSION: &str = "jpg";

#[derive(Debug, Clone)]
pub struct TranscodeOptions {
    pub max_file_size_bytes: usize,
    pub allowed_content_types: Vec<String>,
    pub max_dimension_px: u32,
    pub output_quality: u8,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 10 * 1024 * 1024,
            allowed_content_types: [
                "image/jpeg",
                "image/png",
                "image/webp",
                "image/gif",
                "image/bmp",
                "image/tiff",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_dimension_px: 2000,
            output_quality: 85,
        }
    }
}

impl TranscodeOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_file_size_bytes: config.max_file_size_bytes,
            allowed_content_types: config.allowed_content_types.clone(),
            max_dimension_px: config.max_dimension_px,
            output_quality: config.output_quality,
        }
    }
}

/// Normalized output of a transcode, with audit data about the input.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub data: Bytes,
    pub content_type: &'static str,
    pub extension: &'static str,
    pub width: u32,
    pub height: u32,
    pub original_width: u32,
    pub original_height: u32,
    pub original_size_bytes: usize,
    pub processed_size_bytes: usize,
    pub source_format: ImageFormat,
    pub exif_orientation: u32,
}

/// Decode, normalize and re-encode images into the canonical output format.
pub struct Transcoder;

impl Transcoder {
    /// Run the full transcode. CPU bound; call from a blocking context.
    pub fn process(
        data: &[u8],
        declared_content_type: &str,
        options: &TranscodeOptions,
    ) -> Result<ProcessedImage, TranscodeError> {
        let validator = InputValidator::new(
            options.max_file_size_bytes,
            options.allowed_content_types.clone(),
        );
        let content_type = validator.validate(declared_content_type, data.len())?;
        Self::transcode(data, format_for_content_type(&content_type), options)
    }

    /// Normalize output of an earlier pipeline stage.
    ///
    /// Skips the source size ceiling and the content-type allow-list; only
    /// [`MAX_NORMALIZE_INPUT_BYTES`] and the decoder limits apply. Output
    /// bounds are the same as [`Transcoder::process`].
    pub fn normalize(
        data: &[u8],
        declared_content_type: &str,
        options: &TranscodeOptions,
    ) -> Result<ProcessedImage, TranscodeError> {
        InputValidator::new(MAX_NORMALIZE_INPUT_BYTES, Vec::new()).validate_size(data.len())?;
        let declared = format_for_content_type(&normalize_content_type(declared_content_type));
        Self::transcode(data, declared, options)
    }

    fn transcode(
        data: &[u8],
        declared: Option<ImageFormat>,
        options: &TranscodeOptions,
    ) -> Result<ProcessedImage, TranscodeError> {
        let (img, source_format) = Self::decode(data, declared)?;
        let (original_width, original_height) = img.dimensions();

        // Orientation must be fixed before the resize so the bound applies to
        // the displayed long edge.
        let (img, exif_orientation) = Orientation::apply_exif(img, data);
        let img = BoundedResize::apply(img, options.max_dimension_px);
        let (width, height) = img.dimensions();

        let encoded = Self::encode_jpeg(&img, options.output_quality)?;
        let processed_size_bytes = encoded.len();

        tracing::debug!(
            source_format = ?source_format,
            original_width = original_width,
            original_height = original_height,
            width = width,
            height = height,
            original_size_bytes = data.len(),
            processed_size_bytes = processed_size_bytes,
            "Image transcoded"
        );

        Ok(ProcessedImage {
            data: Bytes::from(encoded),
            content_type: OUTPUT_CONTENT_TYPE,
            extension: OUTPUT_EXTENSION,
            width,
            height,
            original_width,
            original_height,
            original_size_bytes: data.len(),
            processed_size_bytes,
            source_format,
            exif_orientation,
        })
    }

    /// Decode trying the sniffed format first and the declared one second, so
    /// a mislabelled file still decodes.
    fn decode(
        data: &[u8],
        declared: Option<ImageFormat>,
    ) -> Result<(DynamicImage, ImageFormat), TranscodeError> {
        let mut candidates: Vec<ImageFormat> = Vec::with_capacity(2);
        if let Ok(guessed) = image::guess_format(data) {
            candidates.push(guessed);
        }
        if let Some(declared) = declared {
            if !candidates.contains(&declared) {
                candidates.push(declared);
            }
        }
        if candidates.is_empty() {
            return Err(TranscodeError::InvalidFormat(
                "unrecognized image data".to_string(),
            ));
        }

        let mut last_error = None;
        for format in candidates {
            let mut reader = ImageReader::with_format(Cursor::new(data), format);
            reader.limits(decode_limits());
            match reader.decode() {
                Ok(img) => return Ok((img, format)),
                Err(e) => {
                    tracing::debug!(format = ?format, error = %e, "Decode attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(TranscodeError::InvalidFormat(match last_error {
            Some(e) => format!("failed to decode image: {}", e),
            None => "failed to decode image".to_string(),
        }))
    }

    fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, TranscodeError> {
        // JPEG has no alpha channel
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        let mut buffer = Vec::with_capacity((width * height / 4) as usize);
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
        encoder
            .encode_image(&rgb)
            .map_err(|e| TranscodeError::Encode(e.to_string()))?;
        Ok(buffer)
    }
}

fn decode_limits() -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DECODE_DIMENSION);
    limits.max_image_height = Some(MAX_DECODE_DIMENSION);
    limits.max_alloc = Some(MAX_DECODE_ALLOC);
    limits
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use img_parts::jpeg::Jpeg;
    use img_parts::ImageEXIF;

    /// Minimal little-endian TIFF block holding a single Orientation = 6 entry.
    const EXIF_ROTATE_90: [u8; 26] = [
        0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00, // header, IFD at 8
        0x01, 0x00, // one entry
        0x12, 0x01, 0x03, 0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, // 0x0112 SHORT 6
        0x00, 0x00, 0x00, 0x00, // no next IFD
    ];

    fn split_image(width: u32, height: u32) -> DynamicImage {
        // left half red, right half blue
        let img = RgbImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        });
        DynamicImage::ImageRgb8(img)
    }

    fn encode(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), format).unwrap();
        buffer
    }

    fn with_exif(jpeg: Vec<u8>, exif: &[u8]) -> Vec<u8> {
        let mut jpeg = Jpeg::from_bytes(Bytes::from(jpeg)).unwrap();
        jpeg.set_exif(Some(Bytes::copy_from_slice(exif)));
        let mut out = Vec::new();
        jpeg.encoder().write_to(&mut out).unwrap();
        out
    }

    fn is_reddish(p: &Rgb<u8>) -> bool {
        p[0] > 180 && p[2] < 80
    }

    fn is_bluish(p: &Rgb<u8>) -> bool {
        p[2] > 180 && p[0] < 80
    }

    #[test]
    fn rotated_4000x3000_jpeg_is_corrected_and_bounded() {
        let jpeg = encode(&split_image(4000, 3000), ImageFormat::Jpeg);
        let input = with_exif(jpeg, &EXIF_ROTATE_90);

        let out = Transcoder::process(&input, "image/jpeg", &TranscodeOptions::default()).unwrap();

        assert_eq!(out.exif_orientation, 6);
        assert_eq!((out.original_width, out.original_height), (4000, 3000));
        assert_eq!((out.width, out.height), (1500, 2000));
        assert!(out.width.max(out.height) <= 2000);
        assert_eq!(out.content_type, "image/jpeg");
        assert_eq!(image::guess_format(&out.data).unwrap(), ImageFormat::Jpeg);

        // The old left (red) half is now on top.
        let decoded = image::load_from_memory(&out.data).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (1500, 2000));
        assert!(is_reddish(decoded.get_pixel(750, 200)));
        assert!(is_bluish(decoded.get_pixel(750, 1800)));
    }

    #[test]
    fn png_and_webp_normalize_to_jpeg() {
        let img = split_image(300, 200);
        for (format, mime) in [
            (ImageFormat::Png, "image/png"),
            (ImageFormat::WebP, "image/webp"),
            (ImageFormat::Jpeg, "image/jpeg"),
        ] {
            let out =
                Transcoder::process(&encode(&img, format), mime, &TranscodeOptions::default())
                    .unwrap();
            assert_eq!(out.content_type, OUTPUT_CONTENT_TYPE);
            assert_eq!(out.source_format, format);
            assert_eq!((out.width, out.height), (300, 200));
            assert_eq!(image::guess_format(&out.data).unwrap(), ImageFormat::Jpeg);
        }
    }

    #[test]
    fn never_upsamples() {
        let out = Transcoder::process(
            &encode(&split_image(64, 32), ImageFormat::Png),
            "image/png",
            &TranscodeOptions::default(),
        )
        .unwrap();
        assert_eq!((out.width, out.height), (64, 32));
    }

    #[test]
    fn alpha_is_flattened() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([0, 255, 0, 128])));
        let out = Transcoder::process(
            &encode(&img, ImageFormat::Png),
            "image/png",
            &TranscodeOptions::default(),
        )
        .unwrap();
        assert_eq!(image::guess_format(&out.data).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn mislabelled_input_still_decodes() {
        let png = encode(&split_image(40, 40), ImageFormat::Png);
        let out = Transcoder::process(&png, "image/jpeg", &TranscodeOptions::default()).unwrap();
        assert_eq!(out.source_format, ImageFormat::Png);
    }

    #[test]
    fn corrupt_bytes_are_invalid_format() {
        let err = Transcoder::process(
            b"definitely not a photo",
            "image/jpeg",
            &TranscodeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TranscodeError::InvalidFormat(_)));
        assert!(err.is_input_error());
    }

    #[test]
    fn oversized_input_rejected_before_decode() {
        let options = TranscodeOptions {
            max_file_size_bytes: 16,
            ..TranscodeOptions::default()
        };
        // Garbage would fail decode; TooLarge proves the size check ran first.
        let err = Transcoder::process(&[0u8; 64], "image/png", &options).unwrap_err();
        assert!(matches!(err, TranscodeError::TooLarge { size: 64, max: 16 }));
    }

    #[test]
    fn stage_output_above_source_ceiling_is_normalized() {
        let options = TranscodeOptions {
            max_file_size_bytes: 1024,
            ..TranscodeOptions::default()
        };
        let png = encode(&split_image(2400, 1600), ImageFormat::Png);
        assert!(png.len() > options.max_file_size_bytes);
        assert!(matches!(
            Transcoder::process(&png, "image/png", &options).unwrap_err(),
            TranscodeError::TooLarge { .. }
        ));

        let out = Transcoder::normalize(&png, "image/png", &options).unwrap();
        assert_eq!((out.width, out.height), (2000, 1333));
        assert_eq!(out.content_type, OUTPUT_CONTENT_TYPE);
    }

    #[test]
    fn normalize_ignores_allow_list_but_not_garbage() {
        let options = TranscodeOptions {
            allowed_content_types: vec!["image/jpeg".to_string()],
            ..TranscodeOptions::default()
        };
        let png = encode(&split_image(40, 40), ImageFormat::Png);
        let out = Transcoder::normalize(&png, "image/png", &options).unwrap();
        assert_eq!(out.source_format, ImageFormat::Png);

        let err = Transcoder::normalize(b"nope", "image/png", &options).unwrap_err();
        assert!(matches!(err, TranscodeError::InvalidFormat(_)));
    }

    #[test]
    fn disallowed_type_rejected() {
        let err = Transcoder::process(&[1, 2, 3], "image/svg+xml", &TranscodeOptions::default())
            .unwrap_err();
        assert!(matches!(err, TranscodeError::InvalidFormat(_)));
    }

    #[test]
    fn same_input_same_structure() {
        let input = encode(&split_image(2500, 1000), ImageFormat::Png);
        let a = Transcoder::process(&input, "image/png", &TranscodeOptions::default()).unwrap();
        let b = Transcoder::process(&input, "image/png", &TranscodeOptions::default()).unwrap();
        assert_eq!((a.width, a.height), (b.width, b.height));
        assert_eq!((a.width, a.height), (2000, 800));
        assert_eq!(a.content_type, b.content_type);
    }
}
