use std::io::Cursor;

use image::imageops::FilterType;
use image::{ImageFormat, RgbaImage};

use crate::services::errors::GradingError;

pub(crate) const DEFAULT_MAX_SIZE: u32 = 2048;
pub(crate) const DEFAULT_CONTRAST: f32 = 1.2;
pub(crate) const DEFAULT_BRIGHTNESS: f32 = 10.0;

const SHARPEN_KERNEL: [[i32; 3]; 3] = [[0, -1, 0], [-1, 5, -1], [0, -1, 0]];

/// RGBA raster, four bytes per pixel, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RasterImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RasterImage {
    pub(crate) fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, GradingError> {
        if width == 0 || height == 0 {
            return Err(GradingError::InvalidImage(format!(
                "image dimensions must be positive, got {width}x{height}"
            )));
        }
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(GradingError::InvalidImage(format!(
                "pixel buffer has {} bytes, expected {expected} for {width}x{height} RGBA",
                pixels.len()
            )));
        }
        Ok(Self { width, height, pixels })
    }

    /// Decode jpeg/png/gif/webp bytes into RGBA.
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, GradingError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|err| GradingError::InvalidImage(format!("failed to decode image: {err}")))?;
        let rgba = decoded.to_rgba8();
        Self::new(rgba.width(), rgba.height(), rgba.into_raw())
    }

    pub(crate) fn width(&self) -> u32 {
        self.width
    }

    pub(crate) fn height(&self) -> u32 {
        self.height
    }

    pub(crate) fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub(crate) fn encode_png(&self) -> Result<Vec<u8>, GradingError> {
        let buffer = self.to_rgba_image()?;
        let mut out = Cursor::new(Vec::new());
        buffer
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|err| GradingError::InvalidImage(format!("failed to encode PNG: {err}")))?;
        Ok(out.into_inner())
    }

    fn to_rgba_image(&self) -> Result<RgbaImage, GradingError> {
        RgbaImage::from_raw(self.width, self.height, self.pixels.clone()).ok_or_else(|| {
            GradingError::InvalidImage("pixel buffer does not match dimensions".to_string())
        })
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }
}

/// What the preprocess stage receives. Encoded bytes are decoded inside
/// the stage so a corrupt upload fails only its own item.
#[derive(Debug, Clone)]
pub(crate) enum ImageSource {
    Raster(RasterImage),
    Encoded(Vec<u8>),
}

impl ImageSource {
    pub(crate) fn into_raster(self) -> Result<RasterImage, GradingError> {
        match self {
            ImageSource::Raster(image) => Ok(image),
            ImageSource::Encoded(bytes) => RasterImage::decode(&bytes),
        }
    }
}

impl From<RasterImage> for ImageSource {
    fn from(image: RasterImage) -> Self {
        ImageSource::Raster(image)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PreprocessOptions {
    pub(crate) max_size: u32,
    pub(crate) max_width: Option<u32>,
    pub(crate) enhance: bool,
    pub(crate) contrast: f32,
    pub(crate) brightness: f32,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            max_width: None,
            enhance: false,
            contrast: DEFAULT_CONTRAST,
            brightness: DEFAULT_BRIGHTNESS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ImagePreprocessor;

impl ImagePreprocessor {
    pub(crate) fn preprocess(
        &self,
        image: &RasterImage,
        options: &PreprocessOptions,
    ) -> Result<RasterImage, GradingError> {
        if options.max_size == 0 {
            return Err(GradingError::Validation("max_size must be positive".to_string()));
        }

        let (target_width, target_height) =
            target_dimensions(image.width, image.height, options.max_size, options.max_width);
        let mut output = resize(image, target_width, target_height)?;

        if options.enhance {
            output = sharpen(&output);
            output = adjust_contrast(&output, options.contrast, options.brightness);
        }

        tracing::debug!(
            from = %format!("{}x{}", image.width, image.height),
            to = %format!("{}x{}", output.width, output.height),
            enhance = options.enhance,
            "Preprocessed image"
        );

        Ok(output)
    }
}

pub(crate) fn target_dimensions(
    width: u32,
    height: u32,
    max_size: u32,
    max_width: Option<u32>,
) -> (u32, u32) {
    let mut w = width as f64;
    let mut h = height as f64;
    let cap = max_size as f64;

    if w > cap || h > cap {
        if w >= h {
            h = h * cap / w;
            w = cap;
        } else {
            w = w * cap / h;
            h = cap;
        }
    }

    if let Some(limit) = max_width.filter(|limit| *limit > 0) {
        let limit = limit as f64;
        if limit < w {
            h = h * limit / w;
            w = limit;
        }
    }

    ((w.round() as u32).max(1), (h.round() as u32).max(1))
}

fn resize(image: &RasterImage, width: u32, height: u32) -> Result<RasterImage, GradingError> {
    if width == image.width && height == image.height {
        return Ok(image.clone());
    }
    let source = image.to_rgba_image()?;
    let resized = image::imageops::resize(&source, width, height, FilterType::CatmullRom);
    RasterImage::new(width, height, resized.into_raw())
}

/// 3x3 sharpen over RGB. Border pixels and alpha are left as-is.
pub(crate) fn sharpen(image: &RasterImage) -> RasterImage {
    let mut pixels = image.pixels.clone();
    if image.width < 3 || image.height < 3 {
        return RasterImage { width: image.width, height: image.height, pixels };
    }

    for y in 1..image.height - 1 {
        for x in 1..image.width - 1 {
            let target = image.offset(x, y);
            for channel in 0..3 {
                let mut acc = 0i32;
                for (ky, row) in SHARPEN_KERNEL.iter().enumerate() {
                    for (kx, weight) in row.iter().enumerate() {
                        if *weight == 0 {
                            continue;
                        }
                        let source = image.offset(x + kx as u32 - 1, y + ky as u32 - 1);
                        acc += *weight * image.pixels[source + channel] as i32;
                    }
                }
                pixels[target + channel] = acc.clamp(0, 255) as u8;
            }
        }
    }

    RasterImage { width: image.width, height: image.height, pixels }
}

pub(crate) fn adjust_contrast(image: &RasterImage, contrast: f32, brightness: f32) -> RasterImage {
    let mut pixels = image.pixels.clone();
    for pixel in pixels.chunks_exact_mut(4) {
        for value in pixel.iter_mut().take(3) {
            let adjusted = (*value as f32 - 128.0) * contrast + 128.0 + brightness;
            *value = adjusted.round().clamp(0.0, 255.0) as u8;
        }
    }
    RasterImage { width: image.width, height: image.height, pixels }
}
