use std::sync::Arc;

use tracing::{debug, info};

use crate::CoreResult;
use crate::catalog::{CatalogEvent, LayerEntry, Published, PublishedChange};
use crate::layer::{TileLayer, TileLayerInfo};
use crate::mediator::TileCacheMediator;

/// Translates layer and layer-group catalog events into projection updates
/// and cache truncations.
///
/// Every event arrives as one [`CatalogEvent`] carrying the applied
/// snapshot plus property diffs with old values, so the listener needs no
/// before/after pairing of its own.
#[derive(Debug)]
pub struct CatalogLayerListener {
    mediator: Arc<TileCacheMediator>,
}

impl CatalogLayerListener {
    /// Creates the listener over the mediator.
    #[must_use]
    pub fn new(mediator: Arc<TileCacheMediator>) -> Self {
        Self { mediator }
    }

    /// Handles one catalog event. Style events are left to
    /// [`CatalogStyleListener`].
    pub async fn handle_event(&self, event: &CatalogEvent) -> CoreResult<()> {
        match event {
            CatalogEvent::Added(published) => self.on_added(published).await,
            CatalogEvent::Removed(published) => self.on_removed(published).await,
            CatalogEvent::Modified { current, changes } => {
                self.on_modified(current, changes).await
            }
            CatalogEvent::NamespaceRenamed { old, new } => {
                self.on_namespace_renamed(old, new).await
            }
            CatalogEvent::StyleRenamed { .. } | CatalogEvent::StyleModified { .. } => Ok(()),
        }
    }

    async fn on_added(&self, published: &Published) -> CoreResult<()> {
        let config = self.mediator.config();
        if !config.cache_layers_by_default {
            return Ok(());
        }
        if !config.is_sane() {
            info!(
                "Ignoring auto-creation of a tile layer for '{}': global cache settings are not sane",
                published.tile_layer_name()
            );
            return Ok(());
        }
        debug!("Handling catalog add event for '{}'", published.tile_layer_name());
        self.mediator.create_default_layer(published).await
    }

    async fn on_removed(&self, published: &Published) -> CoreResult<()> {
        let name = published.tile_layer_name();
        if self.mediator.has_tile_layer(&name).await {
            self.mediator.remove_layer(&name).await?;
        }
        Ok(())
    }

    async fn on_modified(
        &self,
        current: &Published,
        changes: &[PublishedChange],
    ) -> CoreResult<()> {
        // renames first, so every later action addresses the new name
        if let Some(PublishedChange::Renamed { old }) = changes
            .iter()
            .find(|change| matches!(change, PublishedChange::Renamed { .. }))
        {
            let old_name = old.prefixed();
            let new_name = current.tile_layer_name();
            if old_name != new_name && self.mediator.has_tile_layer(&old_name).await {
                self.mediator.rename_layer(&old_name, &new_name).await?;
            }
        }

        let name = current.tile_layer_name();
        let Some(layer) = self.mediator.tile_layer(&name).await? else {
            // no tile layer configured for this entity
            return Ok(());
        };

        match current {
            Published::Layer(entry) => self.on_layer_modified(entry, &layer, changes).await,
            Published::Group(_) => {
                let structural = changes.iter().any(|change| {
                    matches!(
                        change,
                        PublishedChange::GroupLayersChanged | PublishedChange::GroupStylesChanged
                    )
                });
                if structural {
                    info!(
                        "Truncating tile layer of group '{name}' due to a change in its layers or styles"
                    );
                    self.mediator.truncate_layer(&name).await?;
                }
                Ok(())
            }
        }
    }

    async fn on_layer_modified(
        &self,
        entry: &LayerEntry,
        layer: &Arc<TileLayer>,
        changes: &[PublishedChange],
    ) -> CoreResult<()> {
        let name = layer.name().to_string();
        let mut info = layer.info().clone();
        let mut save = false;
        let mut default_style_changed = false;

        for change in changes {
            match change {
                PublishedChange::DefaultStyleChanged { old, new } if old != new => {
                    info!(
                        "Truncating default-style tiles of '{name}': default style changed from {old:?} to {new:?}"
                    );
                    self.mediator.truncate_style(&name, None).await?;
                    default_style_changed = true;
                }
                PublishedChange::StylesChanged { old: _ } => {
                    save |= self.reconcile_styles(entry, &name, &mut info);
                }
                PublishedChange::CachingMetadataChanged => {
                    // no tiles to evict, but the descriptor drives the
                    // client expiry headers and must be re-persisted
                    save = true;
                }
                _ => {}
            }
        }

        if save {
            self.mediator.save_info(info).await?;
            layer.reset_style_filter();
        }

        if default_style_changed {
            // groups rendering this layer with its default style show the
            // change too
            for group in self.mediator.groups_using_default_style_of(&name) {
                if self.mediator.has_tile_layer(&group).await {
                    self.mediator.truncate_layer(&group).await?;
                }
            }
        }
        Ok(())
    }

    /// Reconciles the cached-styles set against the layer's live styles:
    /// dropped styles leave the set, newly observed styles join when
    /// `auto_cache_styles` is on, and the result is intersected with the
    /// live style set. Persisting the updated descriptor truncates every
    /// dropped style exactly once, through the save-notification diff.
    /// Returns whether the descriptor changed.
    fn reconcile_styles(
        &self,
        entry: &LayerEntry,
        name: &str,
        info: &mut TileLayerInfo,
    ) -> bool {
        let before = info.cached_styles.clone();
        info.update_auto_styles(&Published::Layer(entry.clone()));
        for dropped in before.difference(&info.cached_styles) {
            info!(
                "Cached style '{dropped}' of '{name}' is no longer one of the layer's styles, its tiles will be truncated"
            );
        }
        info.cached_styles != before
    }

    async fn on_namespace_renamed(&self, old: &str, new: &str) -> CoreResult<()> {
        let prefix = format!("{old}:");
        for name in self.mediator.layer_names().await? {
            if let Some(local) = name.strip_prefix(&prefix) {
                let new_name = format!("{new}:{local}");
                self.mediator.rename_layer(&name, &new_name).await?;
            }
        }
        Ok(())
    }
}

/// Translates style catalog events into truncations and cached-style
/// substitutions.
#[derive(Debug)]
pub struct CatalogStyleListener {
    mediator: Arc<TileCacheMediator>,
}

impl CatalogStyleListener {
    /// Creates the listener over the mediator.
    #[must_use]
    pub fn new(mediator: Arc<TileCacheMediator>) -> Self {
        Self { mediator }
    }

    /// Handles one catalog event. Layer and group events are left to
    /// [`CatalogLayerListener`].
    pub async fn handle_event(&self, event: &CatalogEvent) -> CoreResult<()> {
        match event {
            CatalogEvent::StyleRenamed { old, new } => self.on_style_renamed(old, new).await,
            CatalogEvent::StyleModified { name } => self.on_style_modified(name).await,
            _ => Ok(()),
        }
    }

    /// The rename keeps the tiles of every *other* style: substituting new
    /// for old in the descriptor and persisting it truncates the tiles
    /// addressed by the old name, through the save-notification diff.
    async fn on_style_renamed(&self, old: &str, new: &str) -> CoreResult<()> {
        for name in self.mediator.layer_names().await? {
            let Some(layer) = self.mediator.tile_layer(&name).await? else {
                continue;
            };
            let mut info = layer.info().clone();
            if info.cached_styles.remove(old) {
                info!(
                    "Style '{old}' renamed to '{new}': updating the cached styles of '{name}'"
                );
                info.cached_styles.insert(new.to_string());
                self.mediator.save_info(info).await?;
                layer.reset_style_filter();
            }
        }
        Ok(())
    }

    /// A content change invalidates every rendering the style contributed
    /// to: default-style tiles where it is the default, style-scoped tiles
    /// where it is cached as an alternate, and whole groups that render any
    /// member with it.
    async fn on_style_modified(&self, style: &str) -> CoreResult<()> {
        let catalog = Arc::clone(self.mediator.catalog());

        for entry in catalog.layers() {
            let name = entry.name.prefixed();
            if !self.mediator.has_tile_layer(&name).await {
                continue;
            }
            if entry.default_style.as_deref() == Some(style) {
                info!("Truncating default-style tiles of '{name}': style '{style}' was modified");
                self.mediator.truncate_style(&name, None).await?;
            } else if entry.styles.contains(style) {
                let caches_style = self
                    .mediator
                    .tile_layer(&name)
                    .await?
                    .is_some_and(|layer| layer.info().cached_styles.contains(style));
                if caches_style {
                    info!("Truncating style '{style}' tiles of '{name}': the style was modified");
                    self.mediator.truncate_style(&name, Some(style)).await?;
                }
            }
        }

        for group in catalog.groups() {
            let name = group.name.prefixed();
            if !self.mediator.has_tile_layer(&name).await {
                continue;
            }
            let uses_style = group
                .layers
                .iter()
                .zip(&group.styles)
                .any(|(member, override_style)| match override_style {
                    Some(assigned) => assigned == style,
                    None => catalog
                        .layer_by_name(member)
                        .is_some_and(|layer| layer.default_style.as_deref() == Some(style)),
                });
            if uses_style {
                info!("Truncating group '{name}': a style it renders with was modified");
                self.mediator.truncate_layer(&name).await?;
            }
        }
        Ok(())
    }
}
