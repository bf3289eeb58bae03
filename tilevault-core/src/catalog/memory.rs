use std::collections::BTreeSet;

use dashmap::DashMap;

use super::{Catalog, CatalogEvent, GroupEntry, LayerEntry, Published, PublishedChange,
            QualifiedName};

/// In-memory, thread-safe [`Catalog`] implementation.
///
/// Each mutator applies the change and returns the matching
/// [`CatalogEvent`], ready to be fed to the listeners; this keeps event
/// construction next to the mutation the way an embedding host would do it.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entries: DashMap<String, Published>,
}

impl MemoryCatalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a layer or group.
    pub fn add(&self, published: Published) -> CatalogEvent {
        self.entries
            .insert(published.id().to_string(), published.clone());
        CatalogEvent::Added(published)
    }

    /// Removes an entity by id.
    pub fn remove(&self, id: &str) -> Option<CatalogEvent> {
        let (_, removed) = self.entries.remove(id)?;
        Some(CatalogEvent::Removed(removed))
    }

    /// Renames an entity, preserving its id.
    pub fn rename(&self, id: &str, new_name: QualifiedName) -> Option<CatalogEvent> {
        let mut entry = self.entries.get_mut(id)?;
        let old = match entry.value_mut() {
            Published::Layer(layer) => std::mem::replace(&mut layer.name, new_name),
            Published::Group(group) => std::mem::replace(&mut group.name, new_name),
        };
        Some(CatalogEvent::Modified {
            current: entry.value().clone(),
            changes: vec![PublishedChange::Renamed { old }],
        })
    }

    /// Replaces a layer's default style.
    pub fn set_default_style(&self, id: &str, style: Option<String>) -> Option<CatalogEvent> {
        let mut entry = self.entries.get_mut(id)?;
        let Published::Layer(layer) = entry.value_mut() else {
            return None;
        };
        let old = std::mem::replace(&mut layer.default_style, style.clone());
        Some(CatalogEvent::Modified {
            current: entry.value().clone(),
            changes: vec![PublishedChange::DefaultStyleChanged { old, new: style }],
        })
    }

    /// Replaces a layer's alternate-style set.
    pub fn set_styles(&self, id: &str, styles: BTreeSet<String>) -> Option<CatalogEvent> {
        let mut entry = self.entries.get_mut(id)?;
        let Published::Layer(layer) = entry.value_mut() else {
            return None;
        };
        let old = std::mem::replace(&mut layer.styles, styles);
        Some(CatalogEvent::Modified {
            current: entry.value().clone(),
            changes: vec![PublishedChange::StylesChanged { old }],
        })
    }

    /// Replaces a group's member layers and style overrides.
    pub fn set_group_members(
        &self,
        id: &str,
        layers: Vec<String>,
        styles: Vec<Option<String>>,
    ) -> Option<CatalogEvent> {
        let mut entry = self.entries.get_mut(id)?;
        let Published::Group(group) = entry.value_mut() else {
            return None;
        };
        let mut changes = Vec::new();
        if group.layers != layers {
            changes.push(PublishedChange::GroupLayersChanged);
        }
        if group.styles != styles {
            changes.push(PublishedChange::GroupStylesChanged);
        }
        group.layers = layers;
        group.styles = styles;
        Some(CatalogEvent::Modified {
            current: entry.value().clone(),
            changes,
        })
    }

    /// Renames a namespace, re-prefixing every resource in it.
    pub fn rename_namespace(&self, old: &str, new: &str) -> CatalogEvent {
        for mut entry in self.entries.iter_mut() {
            let name = match entry.value_mut() {
                Published::Layer(layer) => &mut layer.name,
                Published::Group(group) => &mut group.name,
            };
            if name.namespace.as_deref() == Some(old) {
                name.namespace = Some(new.to_string());
            }
        }
        CatalogEvent::NamespaceRenamed {
            old: old.to_string(),
            new: new.to_string(),
        }
    }

    /// Renames a style everywhere it is referenced.
    pub fn rename_style(&self, old: &str, new: &str) -> CatalogEvent {
        for mut entry in self.entries.iter_mut() {
            match entry.value_mut() {
                Published::Layer(layer) => {
                    if layer.default_style.as_deref() == Some(old) {
                        layer.default_style = Some(new.to_string());
                    }
                    if layer.styles.remove(old) {
                        layer.styles.insert(new.to_string());
                    }
                }
                Published::Group(group) => {
                    for style in group.styles.iter_mut().flatten() {
                        if style == old {
                            *style = new.to_string();
                        }
                    }
                }
            }
        }
        CatalogEvent::StyleRenamed {
            old: old.to_string(),
            new: new.to_string(),
        }
    }

    /// Marks a style's content as modified.
    #[must_use]
    pub fn touch_style(&self, name: &str) -> CatalogEvent {
        CatalogEvent::StyleModified {
            name: name.to_string(),
        }
    }
}

impl Catalog for MemoryCatalog {
    fn layers(&self) -> Vec<LayerEntry> {
        self.entries
            .iter()
            .filter_map(|entry| match entry.value() {
                Published::Layer(layer) => Some(layer.clone()),
                Published::Group(_) => None,
            })
            .collect()
    }

    fn groups(&self) -> Vec<GroupEntry> {
        self.entries
            .iter()
            .filter_map(|entry| match entry.value() {
                Published::Group(group) => Some(group.clone()),
                Published::Layer(_) => None,
            })
            .collect()
    }

    fn published_by_id(&self, id: &str) -> Option<Published> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    fn published_by_name(&self, name: &str) -> Option<Published> {
        self.entries
            .iter()
            .find(|entry| entry.value().tile_layer_name() == name)
            .map(|entry| entry.value().clone())
    }

    fn update_metadata(&self, id: &str, key: &str, value: Option<String>) -> bool {
        let Some(mut entry) = self.entries.get_mut(id) else {
            return false;
        };
        let metadata = match entry.value_mut() {
            Published::Layer(layer) => &mut layer.metadata,
            Published::Group(group) => &mut group.metadata,
        };
        match value {
            Some(value) => {
                metadata.insert(key.to_string(), value);
            }
            None => {
                metadata.remove(key);
            }
        }
        true
    }
}
