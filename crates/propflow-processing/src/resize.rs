use image::{DynamicImage, GenericImageView};

/// Bounded downscaling.
pub struct BoundedResize;

impl BoundedResize {
    /// Target dimensions that fit within `max_dimension` on both axes while
    /// keeping aspect ratio. Never larger than the input.
    pub fn fit_within(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
        if width <= max_dimension && height <= max_dimension {
            return (width, height);
        }

        let scale = max_dimension as f64 / width.max(height) as f64;
        let new_width = ((width as f64 * scale).round() as u32).clamp(1, max_dimension);
        let new_height = ((height as f64 * scale).round() as u32).clamp(1, max_dimension);
        (new_width, new_height)
    }

    /// Pick a resampling filter based on how aggressive the downscale is.
    pub fn select_filter(
        orig_width: u32,
        orig_height: u32,
        new_width: u32,
        new_height: u32,
    ) -> image::imageops::FilterType {
        let width_ratio = orig_width as f32 / new_width as f32;
        let height_ratio = orig_height as f32 / new_height as f32;
        let max_ratio = width_ratio.max(height_ratio);

        if max_ratio > 2.0 {
            image::imageops::FilterType::Triangle
        } else if max_ratio > 1.5 {
            image::imageops::FilterType::CatmullRom
        } else {
            image::imageops::FilterType::Lanczos3
        }
    }

    pub fn apply(img: DynamicImage, max_dimension: u32) -> DynamicImage {
        let (width, height) = img.dimensions();
        let (new_width, new_height) = Self::fit_within(width, height, max_dimension);
        if (new_width, new_height) == (width, height) {
            return img;
        }

        let filter = Self::select_filter(width, height, new_width, new_height);
        img.resize_exact(new_width, new_height, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_images_are_untouched() {
        assert_eq!(BoundedResize::fit_within(800, 600, 2000), (800, 600));
        assert_eq!(BoundedResize::fit_within(2000, 2000, 2000), (2000, 2000));
    }

    #[test]
    fn long_edge_is_capped() {
        assert_eq!(BoundedResize::fit_within(4000, 3000, 2000), (2000, 1500));
        assert_eq!(BoundedResize::fit_within(3000, 4000, 2000), (1500, 2000));
    }

    #[test]
    fn extreme_aspect_keeps_one_pixel() {
        assert_eq!(BoundedResize::fit_within(10_000, 1, 2000), (2000, 1));
    }

    #[test]
    fn filter_tracks_ratio() {
        assert_eq!(
            BoundedResize::select_filter(4000, 3000, 1000, 750),
            image::imageops::FilterType::Triangle
        );
        assert_eq!(
            BoundedResize::select_filter(2100, 2100, 2000, 2000),
            image::imageops::FilterType::Lanczos3
        );
    }
}
