use std::fmt;

use serde::{Deserialize, Serialize};

/// Output formats a tile layer can be cached in.
///
/// Parsing accepts both mime strings (`image/png`) and bare extensions
/// (`png`), since descriptors written by older releases stored either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileFormat {
    /// Lossless raster, the default cache format.
    Png,
    /// Lossy raster.
    Jpeg,
    /// Lossy/lossless raster.
    Webp,
    /// Mapbox vector tile.
    Mvt,
    /// GeoJSON payload; used for feature-info style responses.
    Json,
}

impl TileFormat {
    /// Parses a mime string or file extension.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.to_ascii_lowercase().as_str() {
            "png" | "image/png" => Self::Png,
            "jpg" | "jpeg" | "image/jpeg" => Self::Jpeg,
            "webp" | "image/webp" => Self::Webp,
            "pbf" | "mvt" | "application/vnd.mapbox-vector-tile" | "application/x-protobuf" => {
                Self::Mvt
            }
            "json" | "geojson" | "application/json" => Self::Json,
            _ => None?,
        })
    }

    /// HTTP content type for this format.
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
            Self::Mvt => "application/vnd.mapbox-vector-tile",
            Self::Json => "application/json",
        }
    }

    /// File extension without the dot.
    #[must_use]
    pub fn file_extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Webp => "webp",
            Self::Mvt => "mvt",
            Self::Json => "json",
        }
    }

    /// Whether a larger rendering of this format can be sliced into tiles.
    ///
    /// Only raster renderings can be carved up; vector and feature-info
    /// payloads arrive pre-encoded and always run with a 1x1 metatile.
    #[must_use]
    pub fn supports_tiling(self) -> bool {
        matches!(self, Self::Png | Self::Jpeg | Self::Webp)
    }

    /// Vector formats take no gutter: there are no edge artifacts to hide.
    #[must_use]
    pub fn is_vector(self) -> bool {
        matches!(self, Self::Mvt | Self::Json)
    }
}

impl fmt::Display for TileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.content_type())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("image/png", TileFormat::Png)]
    #[case("png", TileFormat::Png)]
    #[case("JPEG", TileFormat::Jpeg)]
    #[case("image/jpeg", TileFormat::Jpeg)]
    #[case("application/vnd.mapbox-vector-tile", TileFormat::Mvt)]
    #[case("application/json", TileFormat::Json)]
    fn parses_mime_and_extension(#[case] input: &str, #[case] expected: TileFormat) {
        assert_eq!(TileFormat::parse(input), Some(expected));
    }

    #[test]
    fn rejects_unknown_formats() {
        assert_eq!(TileFormat::parse("image/tiff"), None);
    }

    #[test]
    fn only_rasters_tile() {
        assert!(!TileFormat::Json.supports_tiling());
        assert!(!TileFormat::Mvt.supports_tiling());
        assert!(TileFormat::Png.supports_tiling());
        assert!(TileFormat::Webp.supports_tiling());
    }

    #[test]
    fn vector_formats_have_no_gutter() {
        assert!(TileFormat::Mvt.is_vector());
        assert!(!TileFormat::Webp.is_vector());
    }
}
