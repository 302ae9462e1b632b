use std::collections::BTreeSet;
use std::sync::Arc;

use openusd_pcp::pcp::{CacheOptions, CompositionCache, LayerRegistry};
use openusd_pcp::sdf::{path, FieldKey, Layer, LayerHandle, ListOp, Path, Reference, Schema, Specifier, Value};
use pretty_assertions::assert_eq;

/// `/Shot` references `/Asset` in `asset.usda`; `/Other` stands alone.
fn setup() -> (Arc<LayerRegistry>, LayerHandle, LayerHandle, CompositionCache) {
    let registry = Arc::new(LayerRegistry::new());
    let root = registry.insert(Layer::create("shot.usda"));
    let asset = registry.insert(Layer::create("asset.usda"));

    asset.define_prim(&path("/Asset/Geom").unwrap(), Specifier::Def);
    root.set_field(
        &path("/Shot").unwrap(),
        FieldKey::References,
        ListOp::prepend(vec![Reference::new("asset.usda", path("/Asset").unwrap())]),
    );
    root.define_prim(&path("/Other").unwrap(), Specifier::Def);

    let cache = CompositionCache::new(Arc::new(Schema::new()), registry.clone(), root.clone(), CacheOptions::default());
    for prim in ["/Shot", "/Shot/Geom", "/Other"] {
        cache.compute_prim_index(&path(prim).unwrap());
    }
    (registry, root, asset, cache)
}

fn paths(items: &[&str]) -> BTreeSet<Path> {
    items.iter().map(|p| path(p).unwrap()).collect()
}

#[test]
fn dependents_are_found_through_arcs() {
    let (_, _, _, cache) = setup();
    assert_eq!(
        cache.dependent_prim_index_paths("asset.usda", &path("/Asset").unwrap()),
        paths(&["/Shot", "/Shot/Geom"])
    );
    assert_eq!(
        cache.dependent_prim_index_paths("asset.usda", &path("/Asset/Geom").unwrap()),
        paths(&["/Shot/Geom"])
    );
    assert_eq!(
        cache.dependent_prim_index_paths("shot.usda", &path("/Other").unwrap()),
        paths(&["/Other"])
    );
    assert!(cache.dependent_prim_index_paths("unknown.usda", &Path::abs_root()).is_empty());
}

#[test]
fn change_evicts_dependents_and_their_descendants() {
    let (_, _, asset, cache) = setup();
    let before = cache.compute_prim_index(&path("/Shot").unwrap());

    asset.set_field(&path("/Asset").unwrap(), FieldKey::Kind, Value::Token("component".into()));
    let evicted: BTreeSet<Path> = cache
        .notify_layer_changed("asset.usda", &[path("/Asset").unwrap()])
        .into_iter()
        .collect();
    assert_eq!(evicted, paths(&["/Shot", "/Shot/Geom"]));

    assert!(cache.find_prim_index(&path("/Shot").unwrap()).is_none());
    assert!(cache.find_prim_index(&path("/Shot/Geom").unwrap()).is_none());
    assert!(cache.find_prim_index(&path("/Other").unwrap()).is_some());

    let after = cache.compute_prim_index(&path("/Shot").unwrap());
    assert!(!Arc::ptr_eq(&before, &after));
}

#[test]
fn changes_to_unrelated_paths_evict_nothing() {
    let (_, _, asset, cache) = setup();
    asset.define_prim(&path("/Unused").unwrap(), Specifier::Def);
    assert!(cache.notify_layer_changed("asset.usda", &[path("/Unused").unwrap()]).is_empty());
    assert!(cache.find_prim_index(&path("/Shot").unwrap()).is_some());
}

#[test]
fn root_change_rebuilds_layer_stacks() {
    let (registry, root, _, cache) = setup();
    let extra = registry.insert(Layer::create("extra.usda"));
    extra.set_field(&path("/Other").unwrap(), FieldKey::Kind, Value::Token("group".into()));
    let stack = cache.root_layer_stack();
    assert_eq!(stack.layers().len(), 1);

    root.set_field(&Path::abs_root(), FieldKey::SubLayers, Value::StringVec(vec!["extra.usda".into()]));
    let evicted = cache.notify_layer_changed("shot.usda", &[Path::abs_root()]);
    // The pseudo-root index was cached as an ancestor of the others.
    assert_eq!(evicted.len(), 4);
    assert!(cache.find_prim_index(&path("/Other").unwrap()).is_none());

    let rebuilt = cache.root_layer_stack();
    assert!(!Arc::ptr_eq(&stack, &rebuilt));
    assert_eq!(rebuilt.layers().len(), 2);
    let index = cache.compute_prim_index(&path("/Other").unwrap());
    assert_eq!(index.root_node().layer_stack().layers().len(), 2);
}

#[test]
fn new_arcs_appear_after_invalidation() {
    let (_, root, _, cache) = setup();
    let other = path("/Other").unwrap();
    assert!(cache.compute_prim_index(&other).root_node().children().is_empty());

    root.set_field(&other, FieldKey::InheritPaths, ListOp::prepend(vec![path("/Class").unwrap()]));
    // Not yet notified: the stale index is still served.
    assert!(cache.compute_prim_index(&other).root_node().children().is_empty());

    cache.notify_layer_changed("shot.usda", &[other.clone()]);
    assert_eq!(cache.compute_prim_index(&other).root_node().children().len(), 1);
}
