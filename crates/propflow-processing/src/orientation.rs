use image::DynamicImage;
use std::io::{BufReader, Cursor};

/// EXIF orientation handling (rotation and mirroring).
pub struct Orientation;

impl Orientation {
    /// Read the EXIF orientation tag. Missing or unreadable EXIF is `1` (normal).
    pub fn read_exif_orientation(data: &[u8]) -> u32 {
        let mut reader = BufReader::new(Cursor::new(data));
        let exif = match exif::Reader::new().read_from_container(&mut reader) {
            Ok(exif) => exif,
            Err(_) => return 1,
        };

        exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .filter(|v| (1..=8).contains(v))
            .unwrap_or(1)
    }

    /// Rotation and flip operations needed for a given EXIF orientation.
    /// Returns (rotate_angle_cw, flip_horizontal, flip_vertical)
    pub fn transforms(orientation: u32) -> (Option<u16>, bool, bool) {
        match orientation {
            1 => (None, false, false),      // Normal
            2 => (None, true, false),       // Mirror horizontal
            3 => (Some(180), false, false), // Rotate 180
            4 => (None, false, true),       // Mirror vertical
            5 => (Some(270), true, false),  // Mirror horizontal + Rotate 270 CW
            6 => (Some(90), false, false),  // Rotate 90 CW
            7 => (Some(90), true, false),   // Mirror horizontal + Rotate 90 CW
            8 => (Some(270), false, false), // Rotate 270 CW
            _ => (None, false, false),
        }
    }

    /// Apply EXIF orientation correction read from the original encoded bytes.
    pub fn apply_exif(img: DynamicImage, data: &[u8]) -> (DynamicImage, u32) {
        let orientation = Self::read_exif_orientation(data);
        (Self::apply(img, orientation), orientation)
    }

    pub fn apply(mut img: DynamicImage, orientation: u32) -> DynamicImage {
        let (rotate, flip_h, flip_v) = Self::transforms(orientation);
        if orientation != 1 {
            tracing::debug!(
                orientation = orientation,
                rotate = ?rotate,
                flip_horizontal = flip_h,
                flip_vertical = flip_v,
                "Applying EXIF orientation"
            );
        }

        img = match rotate {
            Some(90) => img.rotate90(),
            Some(180) => img.rotate180(),
            Some(270) => img.rotate270(),
            _ => img,
        };
        if flip_h {
            img = img.fliph();
        }
        if flip_v {
            img = img.flipv();
        }

        img
    }
}
