//! ALFA Media Vault - Thumbnail Engine
//!
//! Square JPEG thumbnails for the album grid and the preview sidecar.

use std::io::Cursor;

use image::{imageops::FilterType, DynamicImage, GenericImageView};

use crate::error::VaultResult;

/// Default edge length of thumbnails
pub const DEFAULT_THUMB_SIZE: u32 = 256;

/// Thumbnail Engine
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailEngine {
    /// Edge length (square)
    size: u32,
}

impl Default for ThumbnailEngine {
    fn default() -> Self {
        Self::new(DEFAULT_THUMB_SIZE)
    }
}

impl ThumbnailEngine {
    pub fn new(size: u32) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// JPEG thumbnail from encoded image bytes; `InvalidMedia` if they do not decode
    pub fn generate(&self, image_data: &[u8]) -> VaultResult<Vec<u8>> {
        let img = image::load_from_memory(image_data)?;
        let thumb = self.crop_and_resize(&img);

        let mut output = Vec::new();
        DynamicImage::ImageRgb8(thumb.to_rgb8()).write_to(&mut Cursor::new(&mut output), image::ImageFormat::Jpeg)?;
        Ok(output)
    }

    /// Center-crop to a square, then scale
    fn crop_and_resize(&self, img: &DynamicImage) -> DynamicImage {
        let (width, height) = img.dimensions();

        let (crop_x, crop_y, crop_size) = if width > height {
            ((width - height) / 2, 0, height)
        } else {
            (0, (height - width) / 2, width)
        };

        img.crop_imm(crop_x, crop_y, crop_size, crop_size)
            .resize_exact(self.size, self.size, FilterType::Lanczos3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VaultError;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgba8(width, height);
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png).unwrap();
        buffer
    }

    #[test]
    fn test_thumbnail_is_square_jpeg() {
        let engine = ThumbnailEngine::new(64);
        let thumb = engine.generate(&png(800, 600)).unwrap();

        assert_eq!(image::guess_format(&thumb).unwrap(), image::ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!(decoded.dimensions(), (64, 64));
    }

    #[test]
    fn test_undecodable_input() {
        let engine = ThumbnailEngine::default();
        assert!(matches!(engine.generate(b"definitely not an image"), Err(VaultError::InvalidMedia(_))));
    }
}
