//! Image decoding

use std::path::Path;

use cd_core::error::AssetError;

/// Decoded 8-bit pixels, RGB or RGBA, rows top to bottom
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub has_alpha: bool,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Bytes per pixel
    pub fn channels(&self) -> usize {
        if self.has_alpha {
            4
        } else {
            3
        }
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.width as usize * self.channels()
    }
}

/// Decode an image file. Grey images are promoted to RGB and any image with
/// an alpha channel to RGBA.
pub fn decode_image(path: &Path) -> Result<PixelBuffer, AssetError> {
    let img = ::image::open(path).map_err(|e| AssetError::Image {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let has_alpha = img.color().has_alpha();
    let (width, height) = (img.width(), img.height());
    let data = if has_alpha {
        img.to_rgba8().into_raw()
    } else {
        img.to_rgb8().into_raw()
    };
    tracing::debug!(
        "Decoded '{}' ({}x{}, alpha: {})",
        path.display(),
        width,
        height,
        has_alpha
    );

    Ok(PixelBuffer {
        width,
        height,
        has_alpha,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::image::{GrayAlphaImage, GrayImage, LumaA};

    #[test]
    fn test_grey_promoted_to_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grey.png");
        GrayImage::from_fn(4, 2, |x, _| ::image::Luma([x as u8 * 10]))
            .save(&path)
            .unwrap();

        let pixels = decode_image(&path).unwrap();
        assert_eq!((pixels.width, pixels.height), (4, 2));
        assert!(!pixels.has_alpha);
        assert_eq!(pixels.stride(), 12);
        assert_eq!(pixels.data.len(), 24);
        assert_eq!(&pixels.data[3..6], &[10, 10, 10]);
    }

    #[test]
    fn test_alpha_kept_as_rgba() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.png");
        GrayAlphaImage::from_pixel(3, 3, LumaA([200, 128])).save(&path).unwrap();

        let pixels = decode_image(&path).unwrap();
        assert!(pixels.has_alpha);
        assert_eq!(pixels.channels(), 4);
        assert_eq!(&pixels.data[..4], &[200, 200, 200, 128]);
    }

    #[test]
    fn test_missing_image() {
        let err = decode_image(Path::new("/nonexistent/cadence.png"));
        assert!(matches!(err, Err(AssetError::Image { .. })));
    }
}
