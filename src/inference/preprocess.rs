use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageReader, Luma};
use thiserror::Error;

/// Width and height of the model input
pub const IMAGE_SIDE: u32 = 28;

/// Number of values in a [`PixelVector`]
pub const PIXEL_COUNT: usize = (IMAGE_SIDE * IMAGE_SIDE) as usize;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unable to decode image: {0}")]
    Format(#[from] image::ImageError),
    #[error("unable to decode image: {width}x{height} has no pixels")]
    Empty { width: u32, height: u32 },
}

/// Row-major 28x28 grayscale image with every value in `[0, 1]`.
///
/// The only way to build one is [`format_image`] or [`PixelVector::from_gray`],
/// so the length is always [`PIXEL_COUNT`].
#[derive(Debug, Clone, PartialEq)]
pub struct PixelVector(Vec<f32>);

impl PixelVector {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resizes and normalizes an already grayscale image.
    pub fn from_gray(gray: &GrayImage) -> Self {
        let resized = imageops::resize(gray, IMAGE_SIDE, IMAGE_SIDE, FilterType::CatmullRom);
        let values = resized
            .pixels()
            .map(|Luma([value])| f32::from(*value) / 255.0)
            .collect();
        PixelVector(values)
    }
}

/// Decodes arbitrary image bytes into the fixed model input.
///
/// The format is guessed from the content. Color images are reduced with the
/// ITU-R 601-2 luma transform, alpha is dropped, and the result is resized to
/// 28x28 without keeping the aspect ratio.
#[tracing::instrument(level = "debug", skip(bytes), fields(len = bytes.len()))]
pub fn format_image(bytes: &[u8]) -> Result<PixelVector, DecodeError> {
    let decoded = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?
        .decode()?;
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(DecodeError::Empty {
            width: decoded.width(),
            height: decoded.height(),
        });
    }

    let rgb = decoded.to_rgb8();
    let gray = GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        Luma([luma(r, g, b)])
    });

    Ok(PixelVector::from_gray(&gray))
}

// 601-2 weights in 16.16 fixed point, rounded; they sum to 1 << 16 so gray input is unchanged
fn luma(r: u8, g: u8, b: u8) -> u8 {
    let l = u32::from(r) * 19595 + u32::from(g) * 38470 + u32::from(b) * 7471 + 0x8000;
    (l >> 16) as u8
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage, RgbaImage};

    use super::*;

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, format).unwrap();
        bytes.into_inner()
    }

    fn assert_normalized(pixels: &PixelVector) {
        assert_eq!(pixels.len(), PIXEL_COUNT);
        assert!(pixels.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn any_size_and_format_yields_784_normalized_values() {
        let sizes = [(1, 1), (8, 8), (28, 28), (13, 57), (100, 40)];
        let formats = [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Bmp];
        for (w, h) in sizes {
            let image = RgbImage::from_fn(w, h, |x, y| {
                Rgb([(x * 37 % 256) as u8, (y * 91 % 256) as u8, ((x + y) * 13 % 256) as u8])
            });
            for format in formats {
                let bytes = encode(DynamicImage::ImageRgb8(image.clone()), format);
                let pixels = format_image(&bytes).unwrap();
                assert_normalized(&pixels);
            }
        }
    }

    #[test]
    fn preprocessing_is_deterministic() {
        let image = GrayImage::from_fn(40, 30, |x, y| Luma([((x * y) % 256) as u8]));
        let bytes = encode(DynamicImage::ImageLuma8(image), ImageFormat::Png);
        assert_eq!(format_image(&bytes).unwrap(), format_image(&bytes).unwrap());
    }

    #[test]
    fn native_size_grayscale_round_trips() {
        let image = GrayImage::from_fn(IMAGE_SIDE, IMAGE_SIDE, |x, y| {
            Luma([((x * 9 + y * 3) % 256) as u8])
        });
        let bytes = encode(DynamicImage::ImageLuma8(image.clone()), ImageFormat::Png);
        let pixels = format_image(&bytes).unwrap();

        for (value, original) in pixels.as_slice().iter().zip(image.pixels()) {
            let expected = f32::from(original.0[0]) / 255.0;
            assert!((value - expected).abs() < 1e-6, "{value} != {expected}");
        }
    }

    #[test]
    fn small_black_png_becomes_all_zeros() {
        let image = GrayImage::from_pixel(8, 8, Luma([0]));
        let bytes = encode(DynamicImage::ImageLuma8(image), ImageFormat::Png);
        let pixels = format_image(&bytes).unwrap();
        assert_normalized(&pixels);
        assert!(pixels.as_slice().iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn white_image_becomes_all_ones() {
        let image = RgbImage::from_pixel(50, 50, Rgb([255, 255, 255]));
        let bytes = encode(DynamicImage::ImageRgb8(image), ImageFormat::Png);
        let pixels = format_image(&bytes).unwrap();
        assert!(pixels.as_slice().iter().all(|v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn alpha_channel_is_ignored() {
        let image = RgbaImage::from_pixel(28, 28, image::Rgba([200, 200, 200, 0]));
        let bytes = encode(DynamicImage::ImageRgba8(image), ImageFormat::Png);
        let pixels = format_image(&bytes).unwrap();
        assert!(pixels
            .as_slice()
            .iter()
            .all(|v| (v - 200.0 / 255.0).abs() < 1e-6));
    }

    #[test]
    fn luma_uses_601_weights() {
        assert_eq!(luma(0, 0, 0), 0);
        assert_eq!(luma(255, 255, 255), 255);
        assert_eq!(luma(128, 128, 128), 128);
        assert_eq!(luma(255, 0, 0), 76);
        assert_eq!(luma(0, 255, 0), 150);
        assert_eq!(luma(0, 0, 255), 29);
    }

    #[test]
    fn text_is_rejected() {
        let err = format_image(b"this is definitely not a picture").unwrap_err();
        assert!(err.to_string().starts_with("unable to decode image"));
    }

    #[test]
    fn empty_upload_is_rejected() {
        assert!(format_image(&[]).is_err());
    }

    #[test]
    fn image_without_pixels_is_rejected() {
        let err = format_image(b"P5\n0 3\n255\n").unwrap_err();
        assert!(matches!(err, DecodeError::Empty { width: 0, height: 3 }), "{err}");
        assert!(err.to_string().starts_with("unable to decode image"));
    }

    #[test]
    fn truncated_png_is_rejected() {
        let image = GrayImage::from_pixel(16, 16, Luma([90]));
        let bytes = encode(DynamicImage::ImageLuma8(image), ImageFormat::Png);
        assert!(format_image(&bytes[..bytes.len() / 2]).is_err());
    }
}
