use image::imageops;
use tilevault_tile_utils::{MetaTileGeometry, TileCoord, TileFormat};

use crate::render::{RenderError, RenderedMap, TileEncoder};

/// A rendered metatile, ready to be carved into per-tile payloads.
///
/// Owns the rendering for its whole lifetime; the pixel buffer is released
/// when the value drops, on every exit path.
#[derive(Debug)]
pub struct MetaTile {
    geometry: MetaTileGeometry,
    map: RenderedMap,
}

impl MetaTile {
    /// Wraps a rendering. The pixel dimensions are checked against the
    /// geometry so a misbehaving backend is caught before slicing.
    pub fn new(geometry: MetaTileGeometry, map: RenderedMap) -> Result<Self, RenderError> {
        if let RenderedMap::Raster(image) = &map {
            let (expected_w, expected_h) = geometry.pixel_size();
            if image.width() != expected_w || image.height() != expected_h {
                return Err(RenderError::WrongDimensions {
                    expected_w,
                    expected_h,
                    actual_w: image.width(),
                    actual_h: image.height(),
                });
            }
        }
        Ok(Self { geometry, map })
    }

    /// The metatile geometry this rendering covers.
    #[must_use]
    pub fn geometry(&self) -> &MetaTileGeometry {
        &self.geometry
    }

    /// Carves the pixel sub-rectangle of one covered tile and encodes it as
    /// `format`.
    ///
    /// A pre-encoded rendering is only passed through for single-tile
    /// metatiles in its own format; anything else is a backend contract
    /// violation.
    pub fn encode_tile(
        &self,
        coord: TileCoord,
        format: TileFormat,
        encoder: &dyn TileEncoder,
    ) -> Result<Vec<u8>, RenderError> {
        match &self.map {
            RenderedMap::Raster(image) => {
                let (x, y, w, h) = self
                    .geometry
                    .pixel_rect(coord)
                    .ok_or(RenderError::NotSliceable)?;
                let tile = imageops::crop_imm(image, x, y, w, h).to_image();
                encoder.encode(&tile, format)
            }
            RenderedMap::Encoded {
                format: encoded_format,
                payload,
            } => {
                if self.geometry.tile_count() == 1
                    && *encoded_format == format
                    && self.geometry.pixel_rect(coord).is_some()
                {
                    Ok(payload.clone())
                } else {
                    Err(RenderError::NotSliceable)
                }
            }
        }
    }
}
