//! Signature image preprocessing.
//!
//! Every image entering the model is single-channel, resized to the canonical
//! resolution and normalized with mean 0.5 / std 0.5 so that pixel values lie
//! in `[-1, 1]`.

use std::path::Path;

use candle_core::{Device, Tensor};
use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::SigError;
use crate::{NORMALIZE_MEAN, NORMALIZE_STD};

/// A preprocessed grayscale signature, row-major, normalized to `[-1, 1]`.
///
/// # Example
///
/// ```
/// use sigver_core::SignatureImage;
///
/// let img = SignatureImage::filled(8, 16, 0.0);
/// assert_eq!(img.pixels().len(), 8 * 16);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureImage {
    height: usize,
    width: usize,
    pixels: Vec<f32>,
}

impl SignatureImage {
    /// Wraps already-normalized pixel data.
    ///
    /// # Errors
    ///
    /// Returns [`SigError::ShapeMismatch`] if `pixels.len() != height * width`.
    pub fn from_normalized(
        height: usize,
        width: usize,
        pixels: Vec<f32>,
    ) -> Result<Self, SigError> {
        if pixels.len() != height * width {
            return Err(SigError::ShapeMismatch {
                expected: format!("{} pixels ({height}x{width})", height * width),
                actual: format!("{} pixels", pixels.len()),
            });
        }
        Ok(Self {
            height,
            width,
            pixels,
        })
    }

    /// An image where every pixel has the same normalized value.
    pub fn filled(height: usize, width: usize, value: f32) -> Self {
        Self {
            height,
            width,
            pixels: vec![value; height * width],
        }
    }

    /// Converts a decoded image: grayscale, bilinear resize, normalize.
    pub fn from_dynamic_image(img: &DynamicImage, height: usize, width: usize) -> Self {
        let gray = img.to_luma8();
        let resized = image::imageops::resize(&gray, width as u32, height as u32, FilterType::Triangle);
        let pixels = resized
            .as_raw()
            .iter()
            .map(|&p| (p as f32 / 255.0 - NORMALIZE_MEAN) / NORMALIZE_STD)
            .collect();
        Self {
            height,
            width,
            pixels,
        }
    }

    /// Opens and preprocesses an image file.
    ///
    /// # Errors
    ///
    /// Returns [`SigError::Dataset`] if the file cannot be opened or decoded.
    pub fn from_path<P: AsRef<Path>>(path: P, height: usize, width: usize) -> Result<Self, SigError> {
        let path = path.as_ref();
        let img = image::open(path)
            .map_err(|e| SigError::dataset(format!("failed to read image {}: {e}", path.display())))?;
        Ok(Self::from_dynamic_image(&img, height, width))
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    /// Returns the image as a `[1, 1, H, W]` tensor.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor, SigError> {
        Ok(Tensor::from_slice(
            &self.pixels,
            (1, 1, self.height, self.width),
            device,
        )?)
    }

    /// Stacks images into a `[B, 1, H, W]` batch tensor.
    ///
    /// # Errors
    ///
    /// Returns [`SigError::ShapeMismatch`] if the images differ in size, and
    /// [`SigError::Dataset`] if `images` is empty.
    pub fn stack(images: &[&SignatureImage], device: &Device) -> Result<Tensor, SigError> {
        let first = images
            .first()
            .ok_or_else(|| SigError::dataset("cannot stack an empty image batch"))?;
        let (h, w) = (first.height, first.width);
        let mut data = Vec::with_capacity(images.len() * h * w);
        for img in images {
            if img.height != h || img.width != w {
                return Err(SigError::ShapeMismatch {
                    expected: format!("{h}x{w}"),
                    actual: format!("{}x{}", img.height, img.width),
                });
            }
            data.extend_from_slice(&img.pixels);
        }
        Ok(Tensor::from_vec(data, (images.len(), 1, h, w), device)?)
    }
}
