//! Global cache defaults: the settings merged into every newly created tile
//! layer descriptor, plus subsystem-wide knobs like the configuration-lock
//! timeout.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tilevault_tile_utils::{TileFormat, WEB_MERCATOR_QUAD, WORLD_CRS84_QUAD};

/// Errors loading or validating the cache configuration file.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read or written.
    #[error("unable to access configuration file {}", .1.display())]
    Io(#[source] std::io::Error, PathBuf),

    /// The configuration file is not valid YAML for [`CacheConfig`].
    #[error("unable to parse configuration file {}", .1.display())]
    Parse(#[source] serde_yaml::Error, PathBuf),

    /// A setting holds a value outside its legal range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Global defaults for tile layers created from catalog entities, in the
/// spirit of a small YAML settings file.
///
/// Individual descriptors override everything here; the config is only
/// consulted when a layer is first observed and for subsystem-wide knobs.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Automatically create a tile layer for every new catalog layer/group.
    pub cache_layers_by_default: bool,
    /// Newly observed alternate styles are added to the cached-styles set.
    pub auto_cache_styles: bool,
    /// Default metatiling factor along x.
    pub meta_tiling_x: u32,
    /// Default metatiling factor along y.
    pub meta_tiling_y: u32,
    /// Default pixel gutter around metatiles.
    pub gutter: u32,
    /// Output formats new layers are cached in.
    pub default_formats: BTreeSet<TileFormat>,
    /// Grid sets new layers are cached for.
    pub default_gridset_ids: BTreeSet<String>,
    /// Zoom range `(min, max)` new layers store tiles for; `None` caches
    /// the full pyramid.
    pub default_cached_zooms: Option<(u8, u8)>,
    /// Default tile max-age in seconds (`0` = never expires, `-1` disables
    /// the cache read path).
    pub expire_cache: i64,
    /// Default client cache-expiry in seconds (`0` = derive from catalog
    /// metadata).
    pub expire_clients: u32,
    /// Seconds an administrative operation may wait for the configuration
    /// lock before failing loudly.
    pub lock_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_layers_by_default: true,
            auto_cache_styles: true,
            meta_tiling_x: 4,
            meta_tiling_y: 4,
            gutter: 10,
            default_formats: BTreeSet::from([TileFormat::Png]),
            default_gridset_ids: BTreeSet::from([
                WEB_MERCATOR_QUAD.to_string(),
                WORLD_CRS84_QUAD.to_string(),
            ]),
            default_cached_zooms: None,
            expire_cache: 0,
            expire_clients: 0,
            lock_timeout_secs: 60,
        }
    }
}

impl CacheConfig {
    /// Reads and validates a YAML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e, path.to_path_buf()))?;
        let config: Self = serde_yaml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(e, path.to_path_buf()))?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as YAML.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(e, path.to_path_buf()))?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(e, path.to_path_buf()))
    }

    /// Checks every setting is inside its legal range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.meta_tiling_x < 1 || self.meta_tiling_y < 1 {
            return Err(ConfigError::Invalid(format!(
                "metatiling factors must be >= 1, got {}x{}",
                self.meta_tiling_x, self.meta_tiling_y
            )));
        }
        if self.gutter < 1 {
            return Err(ConfigError::Invalid("gutter must be >= 1".to_string()));
        }
        if self.default_formats.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one default cache format is required".to_string(),
            ));
        }
        if self.default_gridset_ids.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one default grid set is required".to_string(),
            ));
        }
        if let Some((min, max)) = self.default_cached_zooms
            && min > max
        {
            return Err(ConfigError::Invalid(format!(
                "cached zoom range is inverted: {min} > {max}"
            )));
        }
        if self.expire_cache < -1 {
            return Err(ConfigError::Invalid(format!(
                "expire_cache must be >= -1, got {}",
                self.expire_cache
            )));
        }
        Ok(())
    }

    /// Whether new layers can be auto-created from these settings.
    #[must_use]
    pub fn is_sane(&self) -> bool {
        self.validate().is_ok()
    }

    /// The configuration-lock timeout as a [`Duration`].
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}
