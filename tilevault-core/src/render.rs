//! The boundary to the external rendering pipeline.
//!
//! The engine never rasterizes anything itself: it asks a [`MapRenderer`]
//! for a region and slices the result. Encoding sliced tiles goes through a
//! [`TileEncoder`] instance owned by the engine context and passed by
//! reference, not a process-wide cache.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io::Cursor;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbaImage};
use tilevault_tile_utils::{BoundingBox, Srs, TileFormat};

use crate::catalog::Published;

/// Errors raised by the rendering collaborator or while slicing/encoding
/// its output.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    /// The backend pipeline failed to produce a rendering.
    #[error("render backend failed: {0}")]
    Backend(String),

    /// The rendering's pixel dimensions do not match the requested region.
    #[error("backend returned a {actual_w}x{actual_h} rendering for a {expected_w}x{expected_h} request")]
    WrongDimensions {
        /// Requested width.
        expected_w: u32,
        /// Requested height.
        expected_h: u32,
        /// Returned width.
        actual_w: u32,
        /// Returned height.
        actual_h: u32,
    },

    /// The rendering cannot be sliced into tiles (pre-encoded payload for a
    /// multi-tile metatile).
    #[error("rendering is not sliceable into tiles")]
    NotSliceable,

    /// No encoder is available for the format.
    #[error("cannot encode tiles as {0}")]
    UnsupportedEncoding(TileFormat),

    /// The underlying image codec failed.
    #[error("tile encoding failed")]
    Codec(#[from] image::ImageError),
}

/// A request for one rendered region, usually a whole metatile.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    /// Tile-layer name to render.
    pub layer: String,
    /// Style to render with; `None` uses the layer's default style.
    pub style: Option<String>,
    /// Reference system of `bbox`.
    pub srs: Srs,
    /// Region to render, in `srs` units.
    pub bbox: BoundingBox,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Additional validated request parameters, lower-cased keys.
    pub parameters: BTreeMap<String, String>,
}

/// A feature-info probe at one pixel of a tile-sized rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureInfoRequest {
    /// Tile-layer name to query.
    pub layer: String,
    /// Style the map was requested with; `None` is the default style.
    pub style: Option<String>,
    /// Reference system of `bbox`.
    pub srs: Srs,
    /// Bounds of the queried tile.
    pub bbox: BoundingBox,
    /// Tile width in pixels.
    pub width: u32,
    /// Tile height in pixels.
    pub height: u32,
    /// Pixel column of the probe, from the west edge.
    pub i: u32,
    /// Pixel row of the probe, from the north edge.
    pub j: u32,
    /// Format of the feature-info payload.
    pub info_format: TileFormat,
}

/// What a render produced.
#[derive(Debug, Clone)]
pub enum RenderedMap {
    /// Raw pixels; sliceable into any raster tile format.
    Raster(RgbaImage),
    /// An already encoded payload. Only usable for single-tile metatiles,
    /// e.g. vector tiles the backend encodes itself.
    Encoded {
        /// Format of `payload`.
        format: TileFormat,
        /// The encoded bytes.
        payload: Vec<u8>,
    },
}

/// The external rendering pipeline.
#[async_trait]
pub trait MapRenderer: Send + Sync + Debug {
    /// Renders one region of one layer.
    async fn render(&self, request: &RenderRequest) -> Result<RenderedMap, RenderError>;

    /// Answers a feature-info probe.
    async fn feature_info(&self, request: &FeatureInfoRequest) -> Result<Vec<u8>, RenderError>;

    /// Whether the rendering facility can answer feature-info probes for
    /// this entity. This is a property of the backend, not of the cache.
    fn is_queryable(&self, published: &Published) -> bool;
}

/// Encodes a cropped tile image into an output format.
pub trait TileEncoder: Send + Sync + Debug {
    /// Encodes `image` as `format`.
    fn encode(&self, image: &RgbaImage, format: TileFormat) -> Result<Vec<u8>, RenderError>;
}

/// [`TileEncoder`] backed by the `image` crate codecs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageTileEncoder;

impl TileEncoder for ImageTileEncoder {
    fn encode(&self, image: &RgbaImage, format: TileFormat) -> Result<Vec<u8>, RenderError> {
        let mut buffer = Cursor::new(Vec::new());
        match format {
            TileFormat::Png => {
                DynamicImage::ImageRgba8(image.clone()).write_to(&mut buffer, ImageFormat::Png)?;
            }
            // the jpeg codec has no alpha channel
            TileFormat::Jpeg => {
                DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(image.clone()).to_rgb8())
                    .write_to(&mut buffer, ImageFormat::Jpeg)?;
            }
            TileFormat::Webp => {
                DynamicImage::ImageRgba8(image.clone()).write_to(&mut buffer, ImageFormat::WebP)?;
            }
            TileFormat::Mvt | TileFormat::Json => {
                return Err(RenderError::UnsupportedEncoding(format));
            }
        }
        Ok(buffer.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(size: u32) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            if (x / 8 + y / 8) % 2 == 0 {
                image::Rgba([0, 0, 0, 255])
            } else {
                image::Rgba([255, 255, 255, 255])
            }
        })
    }

    #[test]
    fn encodes_rasters() {
        let encoder = ImageTileEncoder;
        let tile = checkerboard(64);
        let png = encoder.encode(&tile, TileFormat::Png).unwrap();
        assert_eq!(&png[1..4], b"PNG");
        let jpeg = encoder.encode(&tile, TileFormat::Jpeg).unwrap();
        assert_eq!(&jpeg[..3], b"\xFF\xD8\xFF");
        let webp = encoder.encode(&tile, TileFormat::Webp).unwrap();
        assert_eq!(&webp[..4], b"RIFF");
    }

    #[test]
    fn vector_formats_are_not_encodable() {
        let encoder = ImageTileEncoder;
        let tile = checkerboard(8);
        assert!(matches!(
            encoder.encode(&tile, TileFormat::Mvt),
            Err(RenderError::UnsupportedEncoding(TileFormat::Mvt))
        ));
    }
}
