use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tilevault_tile_utils::TileFormat;

use crate::catalog::{Published, meta_keys};
use crate::config::CacheConfig;
use crate::layer::TileError;

/// Name of the style request parameter, lower-cased.
pub const STYLES_PARAMETER: &str = "styles";

/// A `(min_zoom, expiration)` cache-expiry rule. Rules are kept ascending by
/// zoom; the last rule whose `min_zoom` is at or below the requested level
/// wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationRule {
    /// Lowest zoom level the rule applies to.
    pub min_zoom: u8,
    /// Tile max-age in seconds; `0` never expires, `-1` disables caching.
    pub expiration: i64,
}

/// The persisted descriptor of one cacheable tile layer.
///
/// This is a value object: it is replaced wholesale on save, never mutated
/// in place in the store. The `id` is the backing catalog entity's id and is
/// immutable once assigned; the `name` follows the entity through renames.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileLayerInfo {
    /// Stable catalog-assigned identifier.
    pub id: String,
    /// Tile-layer name (`namespace:local` for simple layers).
    pub name: String,
    /// Whether the layer serves and caches tiles.
    pub enabled: bool,
    /// Pixel gutter rendered around metatiles.
    pub gutter: u32,
    /// Metatiling factor along x.
    pub meta_tiling_x: u32,
    /// Metatiling factor along y.
    pub meta_tiling_y: u32,
    /// Output formats the layer is cached in.
    pub mime_formats: BTreeSet<TileFormat>,
    /// Grid sets the layer is cached for.
    pub gridset_ids: BTreeSet<String>,
    /// Zoom range `(min, max)` tiles are stored for; `None` caches the
    /// full pyramid. Tiles outside are still served, never stored.
    #[serde(default)]
    pub cached_zooms: Option<(u8, u8)>,
    /// Alternate styles cacheable besides the default style.
    pub cached_styles: BTreeSet<String>,
    /// Automatically cache newly observed alternate styles.
    pub auto_cache_styles: bool,
    /// Client cache-expiry seconds; `0` derives from catalog metadata.
    pub expire_clients: u32,
    /// Default tile max-age seconds; `0` never expires, `-1` disables the
    /// cache read path.
    pub expire_cache: i64,
    /// Per-zoom overrides of `expire_cache`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expire_cache_rules: Vec<ExpirationRule>,
}

impl TileLayerInfo {
    /// Builds the descriptor for a newly observed catalog entity by merging
    /// the global defaults.
    #[must_use]
    pub fn from_defaults(published: &Published, config: &CacheConfig) -> Self {
        let enabled = published
            .metadata()
            .get(meta_keys::ENABLED)
            .map_or(config.cache_layers_by_default, |value| value == "true");
        let mut info = Self {
            id: published.id().to_string(),
            name: published.tile_layer_name(),
            enabled,
            gutter: config.gutter,
            meta_tiling_x: config.meta_tiling_x,
            meta_tiling_y: config.meta_tiling_y,
            mime_formats: config.default_formats.clone(),
            gridset_ids: config.default_gridset_ids.clone(),
            cached_zooms: config.default_cached_zooms,
            cached_styles: BTreeSet::new(),
            auto_cache_styles: config.auto_cache_styles,
            expire_clients: config.expire_clients,
            expire_cache: config.expire_cache,
            expire_cache_rules: Vec::new(),
        };
        info.update_auto_styles(published);
        info
    }

    /// Reconciles the cached-styles set against the entity's current styles:
    /// with `auto_cache_styles` every live alternate style is cached,
    /// otherwise styles no longer attached are pruned. The default style is
    /// always cached implicitly and never listed. Returns whether the set
    /// changed.
    pub fn update_auto_styles(&mut self, published: &Published) -> bool {
        let live = published.alternate_styles();
        let before = self.cached_styles.clone();
        if self.auto_cache_styles {
            self.cached_styles = live;
        } else {
            self.cached_styles.retain(|style| live.contains(style));
        }
        if let Some(default) = published.default_style() {
            self.cached_styles.remove(default);
        }
        self.cached_styles != before
    }

    /// The tile max-age for one zoom level, in seconds.
    #[must_use]
    pub fn expire_cache_at(&self, z: u8) -> i64 {
        let mut matched = None;
        for rule in &self.expire_cache_rules {
            if z >= rule.min_zoom {
                matched = Some(rule.expiration);
            } else {
                // rules are zoom-ascending
                break;
            }
        }
        matched.unwrap_or(self.expire_cache)
    }

    /// Checks the model invariants the store refuses to persist without.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("id must not be empty".to_string());
        }
        if self.name.is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.meta_tiling_x < 1 || self.meta_tiling_y < 1 {
            return Err(format!(
                "metatiling factors must be >= 1, got {}x{}",
                self.meta_tiling_x, self.meta_tiling_y
            ));
        }
        if self.mime_formats.is_empty() {
            return Err("at least one cache format is required".to_string());
        }
        if self.gridset_ids.is_empty() {
            return Err("at least one grid set is required".to_string());
        }
        if let Some((min, max)) = self.cached_zooms
            && min > max
        {
            return Err(format!("cached zoom range is inverted: {min} > {max}"));
        }
        Ok(())
    }
}

/// The STYLES parameter filter: legal values are the default style plus the
/// configured cached styles; anything else is rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleFilter {
    default_style: Option<String>,
    legal: BTreeSet<String>,
}

impl StyleFilter {
    /// Builds the filter for a layer's default style and cached styles.
    /// Groups pass `None`: their members' styles are fixed by the group
    /// definition, so only the unstyled rendering is legal.
    #[must_use]
    pub fn new(default_style: Option<String>, cached_styles: &BTreeSet<String>) -> Self {
        let mut legal = cached_styles.clone();
        if let Some(default) = &default_style {
            legal.insert(default.clone());
        }
        Self {
            default_style,
            legal,
        }
    }

    /// The always-cached default style.
    #[must_use]
    pub fn default_style(&self) -> Option<&str> {
        self.default_style.as_deref()
    }

    /// All values a request may name.
    #[must_use]
    pub fn legal_values(&self) -> &BTreeSet<String> {
        &self.legal
    }

    /// Validates a requested style. `Ok(None)` means "the default style":
    /// an absent or empty value, or the default named explicitly, all
    /// normalize to it so cache keys stay canonical.
    pub fn resolve(&self, requested: Option<&str>) -> Result<Option<String>, TileError> {
        match requested {
            None | Some("") => Ok(None),
            Some(style) if self.default_style.as_deref() == Some(style) => Ok(None),
            Some(style) if self.legal.contains(style) => Ok(Some(style.to_string())),
            Some(style) => Err(TileError::InvalidParameter {
                parameter: STYLES_PARAMETER.to_string(),
                value: style.to_string(),
                allowed: self.legal.iter().cloned().collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tilevault_tile_utils::BoundingBox;

    use super::*;
    use crate::catalog::{LayerEntry, QualifiedName};

    fn entry_with_styles(default: &str, alternates: &[&str]) -> Published {
        Published::Layer(LayerEntry {
            id: "layer-1".to_string(),
            name: QualifiedName::qualified("topp", "states"),
            enabled: true,
            default_style: Some(default.to_string()),
            styles: alternates.iter().map(ToString::to_string).collect(),
            wgs84_bounds: BoundingBox::new(-10.0, -10.0, 10.0, 10.0),
            metadata: BTreeMap::new(),
        })
    }

    #[test]
    fn defaults_merge_from_config() {
        let published = entry_with_styles("default", &["night"]);
        let config = CacheConfig::default();
        let info = TileLayerInfo::from_defaults(&published, &config);
        assert_eq!(info.id, "layer-1");
        assert_eq!(info.name, "topp:states");
        assert!(info.enabled);
        assert_eq!(info.meta_tiling_x, config.meta_tiling_x);
        assert_eq!(info.mime_formats, config.default_formats);
        // auto_cache_styles picks up the live alternates
        assert!(info.cached_styles.contains("night"));
    }

    #[test]
    fn entity_metadata_overrides_default_enablement() {
        let Published::Layer(mut entry) = entry_with_styles("default", &[]) else {
            unreachable!()
        };
        entry
            .metadata
            .insert(meta_keys::ENABLED.to_string(), "false".to_string());
        let info = TileLayerInfo::from_defaults(&Published::Layer(entry), &CacheConfig::default());
        assert!(!info.enabled);
    }

    #[test]
    fn auto_styles_never_list_the_default() {
        let published = entry_with_styles("default", &["default", "night"]);
        let info = TileLayerInfo::from_defaults(&published, &CacheConfig::default());
        assert!(!info.cached_styles.contains("default"));
        assert!(info.cached_styles.contains("night"));
    }

    #[test]
    fn manual_styles_are_pruned_to_live_ones() {
        let published = entry_with_styles("default", &["summer"]);
        let mut info = TileLayerInfo::from_defaults(&published, &CacheConfig::default());
        info.auto_cache_styles = false;
        info.cached_styles.insert("winter".to_string());
        assert!(info.update_auto_styles(&published));
        assert_eq!(info.cached_styles, BTreeSet::from(["summer".to_string()]));
    }

    #[test]
    fn expiry_rules_pick_the_highest_matching_min_zoom() {
        let mut info =
            TileLayerInfo::from_defaults(&entry_with_styles("d", &[]), &CacheConfig::default());
        info.expire_cache = 100;
        info.expire_cache_rules = vec![
            ExpirationRule {
                min_zoom: 5,
                expiration: 50,
            },
            ExpirationRule {
                min_zoom: 10,
                expiration: 10,
            },
        ];
        assert_eq!(info.expire_cache_at(0), 100);
        assert_eq!(info.expire_cache_at(5), 50);
        assert_eq!(info.expire_cache_at(9), 50);
        assert_eq!(info.expire_cache_at(15), 10);
    }

    #[test]
    fn json_round_trip() {
        let info =
            TileLayerInfo::from_defaults(&entry_with_styles("d", &["n"]), &CacheConfig::default());
        let encoded = serde_json::to_string_pretty(&info).unwrap();
        let decoded: TileLayerInfo = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn style_filter_admits_default_and_cached() {
        let cached = BTreeSet::from(["night".to_string()]);
        let filter = StyleFilter::new(Some("default".to_string()), &cached);

        assert_eq!(filter.resolve(None).unwrap(), None);
        assert_eq!(filter.resolve(Some("")).unwrap(), None);
        // naming the default style normalizes to it
        assert_eq!(filter.resolve(Some("default")).unwrap(), None);
        assert_eq!(
            filter.resolve(Some("night")).unwrap(),
            Some("night".to_string())
        );
        assert!(matches!(
            filter.resolve(Some("neon")),
            Err(TileError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn invalid_metatiling_fails_validation() {
        let mut info =
            TileLayerInfo::from_defaults(&entry_with_styles("d", &[]), &CacheConfig::default());
        info.meta_tiling_y = 0;
        assert!(info.validate().is_err());
    }
}
