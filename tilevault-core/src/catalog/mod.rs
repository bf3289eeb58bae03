//! The boundary to the external resource catalog.
//!
//! The catalog owns and mutates named layers and layer groups; this
//! subsystem only reads them and writes its own side-table of tile-layer
//! descriptors. Everything here is therefore a *view*: entity snapshots are
//! value objects, and code that needs current state must re-fetch by id
//! instead of holding on to a snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use tilevault_tile_utils::BoundingBox;

mod events;
pub use events::{CatalogEvent, PublishedChange};

mod memory;
pub use memory::MemoryCatalog;

/// Metadata keys this subsystem reads from or writes to catalog entities.
pub mod meta_keys {
    /// Per-entity caching toggle, overrides the global default.
    pub const ENABLED: &str = "tilevault.enabled";
    /// Marker that the entity has persisted cache settings.
    pub const CONFIGURED: &str = "tilevault.configured";
    /// Whether client-side caching headers should be emitted.
    pub const CACHING_ENABLED: &str = "caching.enabled";
    /// Client cache max-age in seconds.
    pub const CACHING_MAX_AGE: &str = "caching.max_age";
}

/// A possibly namespace-qualified entity name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    /// Owning namespace prefix, if any.
    pub namespace: Option<String>,
    /// Local, namespace-unique part.
    pub local: String,
}

impl QualifiedName {
    /// A name without a namespace.
    #[must_use]
    pub fn simple(local: impl Into<String>) -> Self {
        Self {
            namespace: None,
            local: local.into(),
        }
    }

    /// A namespace-qualified name.
    #[must_use]
    pub fn qualified(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            local: local.into(),
        }
    }

    /// The `namespace:local` display form, which doubles as the tile-layer
    /// name for the entity.
    #[must_use]
    pub fn prefixed(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:{}", self.local),
            None => self.local.clone(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefixed())
    }
}

/// Snapshot of a simple catalog layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerEntry {
    /// Stable catalog-assigned identifier, never reused.
    pub id: String,
    /// Namespace-qualified layer name.
    pub name: QualifiedName,
    /// Whether the catalog considers the layer publishable at all.
    pub enabled: bool,
    /// Default style name; rendering without an explicit style uses this.
    pub default_style: Option<String>,
    /// Alternate style names attached to the layer.
    pub styles: BTreeSet<String>,
    /// Authoritative geographic bounds, lon/lat degrees.
    pub wgs84_bounds: BoundingBox,
    /// Free-form per-entity metadata.
    pub metadata: BTreeMap<String, String>,
}

/// Snapshot of a catalog layer group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEntry {
    /// Stable catalog-assigned identifier, never reused.
    pub id: String,
    /// Group name (groups may also be workspace-qualified).
    pub name: QualifiedName,
    /// Member layer names, in drawing order.
    pub layers: Vec<String>,
    /// Per-member style override; `None` means the member's default style.
    pub styles: Vec<Option<String>>,
    /// Authoritative geographic bounds, lon/lat degrees.
    pub wgs84_bounds: BoundingBox,
    /// Free-form per-entity metadata.
    pub metadata: BTreeMap<String, String>,
}

/// A cacheable catalog entity: either a simple layer or a layer group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Published {
    /// A simple layer backed by one resource.
    Layer(LayerEntry),
    /// A layer group composed of member layers.
    Group(GroupEntry),
}

impl Published {
    /// The catalog-assigned id.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Layer(layer) => &layer.id,
            Self::Group(group) => &group.id,
        }
    }

    /// The tile-layer name for this entity: the prefixed resource name for a
    /// layer, the (possibly prefixed) group name for a group.
    #[must_use]
    pub fn tile_layer_name(&self) -> String {
        match self {
            Self::Layer(layer) => layer.name.prefixed(),
            Self::Group(group) => group.name.prefixed(),
        }
    }

    /// Geographic bounds of the entity.
    #[must_use]
    pub fn wgs84_bounds(&self) -> &BoundingBox {
        match self {
            Self::Layer(layer) => &layer.wgs84_bounds,
            Self::Group(group) => &group.wgs84_bounds,
        }
    }

    /// Entity metadata map.
    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        match self {
            Self::Layer(layer) => &layer.metadata,
            Self::Group(group) => &group.metadata,
        }
    }

    /// The default style: a layer's configured default; groups have none.
    #[must_use]
    pub fn default_style(&self) -> Option<&str> {
        match self {
            Self::Layer(layer) => layer.default_style.as_deref(),
            Self::Group(_) => None,
        }
    }

    /// Alternate styles: a layer's style set; groups have none (their
    /// members' styles are fixed by the group definition).
    #[must_use]
    pub fn alternate_styles(&self) -> BTreeSet<String> {
        match self {
            Self::Layer(layer) => layer.styles.clone(),
            Self::Group(_) => BTreeSet::new(),
        }
    }

    /// Whether the catalog itself considers the entity enabled.
    #[must_use]
    pub fn catalog_enabled(&self) -> bool {
        match self {
            Self::Layer(layer) => layer.enabled,
            // groups carry no enabled flag
            Self::Group(_) => true,
        }
    }
}

/// Read access to the external catalog.
///
/// Event delivery is the host's concern: whoever mutates the catalog builds
/// the corresponding [`CatalogEvent`] and feeds it to the listeners in
/// [`crate::layer`].
pub trait Catalog: Send + Sync + Debug {
    /// All simple layers.
    fn layers(&self) -> Vec<LayerEntry>;

    /// All layer groups.
    fn groups(&self) -> Vec<GroupEntry>;

    /// Entity lookup by catalog id.
    fn published_by_id(&self, id: &str) -> Option<Published>;

    /// Entity lookup by tile-layer name (prefixed for layers).
    fn published_by_name(&self, name: &str) -> Option<Published>;

    /// Layer lookup by prefixed name.
    fn layer_by_name(&self, name: &str) -> Option<LayerEntry> {
        match self.published_by_name(name) {
            Some(Published::Layer(layer)) => Some(layer),
            _ => None,
        }
    }

    /// Group lookup by name.
    fn group_by_name(&self, name: &str) -> Option<GroupEntry> {
        match self.published_by_name(name) {
            Some(Published::Group(group)) => Some(group),
            _ => None,
        }
    }

    /// Sets (`Some`) or clears (`None`) one metadata key on an entity.
    /// Returns `false` when no entity with that id exists.
    fn update_metadata(&self, id: &str, key: &str, value: Option<String>) -> bool;
}
