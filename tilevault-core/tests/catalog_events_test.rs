//! Catalog mutation events: projection updates and cache truncations.

mod support;

use std::collections::BTreeSet;
use std::time::Duration;

use support::{StoreCall, TestStack};
use tilevault_tile_utils::{TileCoord, TileFormat, WEB_MERCATOR_QUAD};
use tilevault_core::catalog::{Catalog as _, Published, QualifiedName};
use tilevault_core::layer::{CacheResult, TileRequest};

fn png_request(x: u32, y: u32, z: u8) -> TileRequest {
    TileRequest::new(WEB_MERCATOR_QUAD, TileCoord { x, y, z }, TileFormat::Png)
}

#[tokio::test]
async fn add_event_creates_a_default_tile_layer() {
    let stack = TestStack::new();
    stack
        .seed(Published::Layer(support::layer_entry("l1", "topp", "states")))
        .await;

    let layer = stack
        .mediator
        .tile_layer("topp:states")
        .await
        .unwrap()
        .expect("tile layer auto-created on add");
    assert_eq!(layer.id(), "l1");
    let info = layer.info();
    assert!(info.enabled);
    assert_eq!(info.meta_tiling_x, 4);
    assert!(info.mime_formats.contains(&TileFormat::Png));
    // auto_cache_styles picked up the live alternate
    assert_eq!(info.cached_styles, BTreeSet::from(["night".to_string()]));

    // the entity now carries the configured marker
    let published = stack.catalog.published_by_id("l1").unwrap();
    assert_eq!(
        published.metadata().get("tilevault.configured").map(String::as_str),
        Some("true")
    );
}

#[tokio::test]
async fn rename_preserves_identity_and_cache_contents() {
    let stack = TestStack::new();
    stack
        .seed(Published::Layer(support::layer_entry("l1", "topp", "states")))
        .await;

    // warm some tiles under the old name
    let layer = stack.mediator.tile_layer("topp:states").await.unwrap().unwrap();
    layer.get_tile(&png_request(10, 20, 5)).await.unwrap();
    assert_eq!(stack.renderer.render_count(), 1);

    let event = stack
        .catalog
        .rename("l1", QualifiedName::qualified("topp", "provinces"))
        .unwrap();
    stack.dispatch(&event).await;

    assert!(stack.mediator.tile_layer("topp:states").await.unwrap().is_none());
    let renamed = stack
        .mediator
        .tile_layer("topp:provinces")
        .await
        .unwrap()
        .expect("renamed layer resolves");
    assert_eq!(renamed.id(), "l1", "rename must preserve the id");

    // the cache contents moved with the name: same metatile is still a hit
    assert_eq!(
        stack
            .tile_store
            .count_matching(|c| matches!(c, StoreCall::Rename(old, new)
                if old == "topp:states" && new == "topp:provinces")),
        1
    );
    let response = renamed.get_tile(&png_request(11, 20, 5)).await.unwrap();
    assert_eq!(response.cache_result, CacheResult::Hit);
    assert_eq!(stack.renderer.render_count(), 1);
}

#[tokio::test]
async fn removing_an_alternate_style_truncates_exactly_once() {
    let stack = TestStack::new();
    stack
        .seed(Published::Layer(support::layer_entry("l1", "topp", "states")))
        .await;

    // drop the "night" alternate from the catalog layer
    let event = stack.catalog.set_styles("l1", BTreeSet::new()).unwrap();
    stack.dispatch(&event).await;

    assert_eq!(
        stack
            .tile_store
            .count_matching(|c| matches!(c, StoreCall::TruncateStyle(layer, Some(style))
                if layer == "topp:states" && style == "night")),
        1,
        "exactly one style-scoped truncate"
    );
    let layer = stack.mediator.tile_layer("topp:states").await.unwrap().unwrap();
    assert!(layer.info().cached_styles.is_empty());

    // the STYLES filter was recomputed: "night" is no longer legal
    let night = png_request(10, 20, 5).with_style("night");
    assert!(layer.get_tile(&night).await.is_err());
}

#[tokio::test]
async fn default_style_change_truncates_default_tiles_and_groups() {
    let stack = TestStack::new();
    stack
        .seed(Published::Layer(support::layer_entry("l1", "topp", "states")))
        .await;
    stack
        .seed(Published::Group(support::group_entry(
            "g1",
            "basemap",
            &[("topp:states", None)],
        )))
        .await;

    let event = stack
        .catalog
        .set_default_style("l1", Some("modern".to_string()))
        .unwrap();
    stack.dispatch(&event).await;

    assert_eq!(
        stack
            .tile_store
            .count_matching(|c| matches!(c, StoreCall::TruncateStyle(layer, None)
                if layer == "topp:states")),
        1,
        "default-style tiles truncated once"
    );
    // the group renders the layer with its default style, so it goes too
    assert_eq!(
        stack
            .tile_store
            .count_matching(|c| matches!(c, StoreCall::TruncateLayer(layer) if layer == "basemap")),
        1
    );
}

#[tokio::test]
async fn group_membership_change_truncates_the_whole_group_once() {
    let stack = TestStack::new();
    stack
        .seed(Published::Layer(support::layer_entry("l1", "topp", "states")))
        .await;
    stack
        .seed(Published::Layer(support::layer_entry("l2", "topp", "rivers")))
        .await;
    stack
        .seed(Published::Group(support::group_entry(
            "g1",
            "basemap",
            &[("topp:states", None)],
        )))
        .await;

    let event = stack
        .catalog
        .set_group_members(
            "g1",
            vec!["topp:states".to_string(), "topp:rivers".to_string()],
            vec![None, Some("night".to_string())],
        )
        .unwrap();
    stack.dispatch(&event).await;

    assert_eq!(
        stack
            .tile_store
            .count_matching(|c| matches!(c, StoreCall::TruncateLayer(layer) if layer == "basemap")),
        1,
        "one whole-group truncate regardless of how many members changed"
    );
}

#[tokio::test]
async fn style_rename_substitutes_and_truncates_the_old_name() {
    let stack = TestStack::new();
    stack
        .seed(Published::Layer(support::layer_entry("l1", "topp", "states")))
        .await;

    let event = stack.catalog.rename_style("night", "dark");
    stack.dispatch(&event).await;

    let layer = stack.mediator.tile_layer("topp:states").await.unwrap().unwrap();
    assert_eq!(
        layer.info().cached_styles,
        BTreeSet::from(["dark".to_string()])
    );
    assert_eq!(
        stack
            .tile_store
            .count_matching(|c| matches!(c, StoreCall::TruncateStyle(layer, Some(style))
                if layer == "topp:states" && style == "night")),
        1
    );
}

#[tokio::test]
async fn style_content_change_truncates_every_referencing_layer_and_group() {
    let stack = TestStack::new();
    stack
        .seed(Published::Layer(support::layer_entry("l1", "topp", "states")))
        .await;
    // second layer with "night" as its default style
    let mut night_layer = support::layer_entry("l2", "topp", "lights");
    night_layer.default_style = Some("night".to_string());
    night_layer.styles = BTreeSet::new();
    stack.seed(Published::Layer(night_layer)).await;
    // group rendering states explicitly with "night"
    stack
        .seed(Published::Group(support::group_entry(
            "g1",
            "nightmap",
            &[("topp:states", Some("night"))],
        )))
        .await;

    let event = stack.catalog.touch_style("night");
    stack.dispatch(&event).await;

    // states caches "night" as an alternate: style-scoped truncate
    assert_eq!(
        stack
            .tile_store
            .count_matching(|c| matches!(c, StoreCall::TruncateStyle(layer, Some(style))
                if layer == "topp:states" && style == "night")),
        1
    );
    // lights uses it as the default: default-scoped truncate
    assert_eq!(
        stack
            .tile_store
            .count_matching(|c| matches!(c, StoreCall::TruncateStyle(layer, None)
                if layer == "topp:lights")),
        1
    );
    // the group renders a member with it: whole-group truncate
    assert_eq!(
        stack
            .tile_store
            .count_matching(|c| matches!(c, StoreCall::TruncateLayer(layer) if layer == "nightmap")),
        1
    );
}

#[tokio::test]
async fn remove_event_deletes_registry_entry_and_cache() {
    let stack = TestStack::new();
    stack
        .seed(Published::Layer(support::layer_entry("l1", "topp", "states")))
        .await;
    assert!(stack.mediator.has_tile_layer("topp:states").await);

    let event = stack.catalog.remove("l1").unwrap();
    stack.dispatch(&event).await;

    assert!(!stack.mediator.has_tile_layer("topp:states").await);
    assert!(stack.mediator.tile_layer("topp:states").await.unwrap().is_none());
    assert_eq!(
        stack
            .tile_store
            .count_matching(|c| matches!(c, StoreCall::Delete(layer) if layer == "topp:states")),
        1
    );
}

#[tokio::test]
async fn namespace_rename_moves_every_prefixed_layer() {
    let stack = TestStack::new();
    stack
        .seed(Published::Layer(support::layer_entry("l1", "topp", "states")))
        .await;
    stack
        .seed(Published::Layer(support::layer_entry("l2", "topp", "rivers")))
        .await;
    stack
        .seed(Published::Layer(support::layer_entry("l3", "geo", "roads")))
        .await;

    let event = stack.catalog.rename_namespace("topp", "osm");
    stack.dispatch(&event).await;

    let mut names = stack.mediator.layer_names().await.unwrap();
    names.sort();
    assert_eq!(
        names,
        vec![
            "geo:roads".to_string(),
            "osm:rivers".to_string(),
            "osm:states".to_string()
        ]
    );
    // ids survived the bulk rename
    let layer = stack.mediator.tile_layer("osm:states").await.unwrap().unwrap();
    assert_eq!(layer.id(), "l1");
}

#[tokio::test]
async fn listener_ignores_entities_without_tile_layers() {
    let stack = TestStack::new();
    // added directly to the catalog, no add event dispatched
    stack
        .catalog
        .add(Published::Layer(support::layer_entry("l9", "topp", "hidden")));

    let event = stack.catalog.set_styles("l9", BTreeSet::new()).unwrap();
    stack.dispatch(&event).await;
    assert!(stack.tile_store.calls().is_empty());
}

#[tokio::test]
async fn layers_for_style_lists_default_and_cached_users() {
    let stack = TestStack::new();
    stack
        .seed(Published::Layer(support::layer_entry("l1", "topp", "states")))
        .await;
    let mut night_layer = support::layer_entry("l2", "topp", "lights");
    night_layer.default_style = Some("night".to_string());
    night_layer.styles = BTreeSet::new();
    stack.seed(Published::Layer(night_layer)).await;

    let mut names = stack.mediator.layer_names_for_style("night").await.unwrap();
    names.sort();
    assert_eq!(
        names,
        vec!["topp:lights".to_string(), "topp:states".to_string()]
    );
}

#[tokio::test]
async fn group_client_expiry_is_the_minimum_over_members() {
    let stack = TestStack::new();
    let mut states = support::layer_entry("l1", "topp", "states");
    states
        .metadata
        .insert("caching.enabled".to_string(), "true".to_string());
    states
        .metadata
        .insert("caching.max_age".to_string(), "600".to_string());
    let mut rivers = support::layer_entry("l2", "topp", "rivers");
    rivers
        .metadata
        .insert("caching.enabled".to_string(), "true".to_string());
    rivers
        .metadata
        .insert("caching.max_age".to_string(), "300".to_string());
    stack.seed(Published::Layer(states)).await;
    stack.seed(Published::Layer(rivers)).await;
    stack
        .seed(Published::Group(support::group_entry(
            "g1",
            "basemap",
            &[("topp:states", None), ("topp:rivers", None)],
        )))
        .await;

    let states_layer = stack.mediator.tile_layer("topp:states").await.unwrap().unwrap();
    assert_eq!(
        states_layer.expire_clients(),
        Some(Duration::from_secs(600))
    );
    let group_layer = stack.mediator.tile_layer("basemap").await.unwrap().unwrap();
    assert_eq!(group_layer.expire_clients(), Some(Duration::from_secs(300)));
}

#[tokio::test]
async fn configuration_lock_timeout_fails_loudly() {
    // a held write lock must make reads fail with a timeout, not hang
    let stack = TestStack::new();
    stack
        .seed(Published::Layer(support::layer_entry("l1", "topp", "states")))
        .await;
    // the projection lock is internal; exercise the timeout through the
    // admin lock directly
    let lock = tilevault_core::admin_lock::TimedRwLock::new(Duration::from_millis(30));
    let _writer = lock.write().await.unwrap();
    let err = lock.read().await.unwrap_err();
    assert_eq!(err.mode, "read");
}
