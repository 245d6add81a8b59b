//! Target artwork loading
//!
//! The artwork is the raster the robot is asked to reproduce. It is decoded
//! once at startup with the `image` crate and kept as RGBA together with a
//! flag recording whether the source actually carried an alpha channel,
//! since transparent and opaque sources are classified differently by the
//! draw mask.

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, RgbaImage};
use std::path::Path;
use tracing::info;

use crate::error::{Result, ServoError};

/// Decoded target artwork
#[derive(Debug, Clone)]
pub struct Artwork {
    pixels: RgbaImage,
    has_alpha: bool,
}

impl Artwork {
    /// Wrap already-decoded pixels
    ///
    /// When `has_alpha` is false the alpha channel of `pixels` is ignored.
    pub fn new(pixels: RgbaImage, has_alpha: bool) -> Self {
        Self { pixels, has_alpha }
    }

    /// Convert a decoded image, keeping track of its alpha channel
    pub fn from_dynamic(image: DynamicImage) -> Self {
        let has_alpha = image.color().has_alpha();
        Self {
            pixels: image.to_rgba8(),
            has_alpha,
        }
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn has_alpha(&self) -> bool {
        self.has_alpha
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Bilinear resample to `width`×`height`
    pub fn resampled(&self, width: u32, height: u32) -> RgbaImage {
        if width == 0 || height == 0 {
            return RgbaImage::new(width, height);
        }
        if self.pixels.dimensions() == (width, height) {
            return self.pixels.clone();
        }
        imageops::resize(&self.pixels, width, height, FilterType::Triangle)
    }
}

/// Load the artwork from disk
///
/// # Errors
///
/// Returns `ServoError::ArtworkLoad` if the file cannot be opened or decoded,
/// or if it decodes to an empty image.
pub fn load_artwork(path: &Path) -> Result<Artwork> {
    let reader = ImageReader::open(path).map_err(|e| {
        ServoError::artwork_load(format!("failed to open {}", path.display()), e)
    })?;

    let reader = reader.with_guessed_format().map_err(|e| {
        ServoError::artwork_load(format!("failed to sniff format of {}", path.display()), e)
    })?;

    let image = reader.decode().map_err(|e| {
        ServoError::artwork_load(format!("failed to decode {}", path.display()), e)
    })?;

    if image.width() == 0 || image.height() == 0 {
        return Err(ServoError::ArtworkLoad {
            message: format!("{} has no pixels", path.display()),
            source: None,
        });
    }

    let artwork = Artwork::from_dynamic(image);
    let (width, height) = artwork.dimensions();
    info!(
        path = %path.display(),
        width,
        height,
        alpha = artwork.has_alpha(),
        "loaded artwork"
    );
    Ok(artwork)
}
