use std::collections::BTreeSet;
use std::sync::Arc;

use openusd_pcp::pcp::{CacheOptions, CompositionCache, LayerRegistry, PayloadState};
use openusd_pcp::sdf::{path, FieldKey, Layer, ListOp, Path, Payload, Reference, Schema, Specifier};
use pretty_assertions::assert_eq;

/// `/Root` references `/Ref/Child`, which has a payload to `/Payload` in an
/// anonymous layer.
fn bug_160419_cache(options: CacheOptions) -> CompositionCache {
    let registry = Arc::new(LayerRegistry::new());

    let payload_layer = registry.insert(Layer::anonymous("payload.usda"));
    payload_layer.define_prim(&path("/Payload/Cube").unwrap(), Specifier::Over);

    let root_layer = registry.insert(Layer::anonymous("root.usda"));
    root_layer.define_prim(&path("/Ref").unwrap(), Specifier::Def);
    root_layer.define_prim(&path("/Ref/Child").unwrap(), Specifier::Def);
    root_layer.set_field(
        &path("/Ref/Child").unwrap(),
        FieldKey::Payload,
        ListOp::prepend(vec![Payload::new(payload_layer.identifier(), path("/Payload").unwrap())]),
    );
    root_layer.define_prim(&path("/Root").unwrap(), Specifier::Def);
    root_layer.set_field(
        &path("/Root").unwrap(),
        FieldKey::References,
        ListOp::prepend(vec![Reference::internal(path("/Ref/Child").unwrap())]),
    );

    CompositionCache::new(Arc::new(Schema::new()), registry, root_layer, options)
}

fn paths(items: &[&str]) -> BTreeSet<Path> {
    items.iter().map(|p| path(p).unwrap()).collect()
}

#[test]
fn included_payloads_after_parallel_computation() {
    let cache = bug_160419_cache(CacheOptions::default());
    let mut errors = Vec::new();
    cache.compute_prim_indexes_in_parallel(&Path::abs_root(), &mut errors, |_| true, |_| true);

    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(cache.get_included_payloads(), paths(&["/Ref/Child", "/Root"]));

    let root = cache.find_prim_index(&path("/Root").unwrap()).unwrap();
    assert_eq!(root.payload_state(), PayloadState::IncludedByPredicate);
    assert!(!root.has_deferred_payload());

    // Namespace below the payload is populated but does not introduce payloads.
    let cube = cache.find_prim_index(&path("/Root/Cube").unwrap()).unwrap();
    assert_eq!(cube.payload_state(), PayloadState::IncludedByAncestor);
    assert!(cache.find_prim_index(&path("/Ref/Child/Cube").unwrap()).is_some());
}

#[test]
fn sequential_traversal_includes_the_same_payloads() {
    let cache = bug_160419_cache(CacheOptions::default().with_parallel(false));
    let mut errors = Vec::new();
    cache.compute_prim_indexes_in_parallel(&Path::abs_root(), &mut errors, |_| true, |_| true);
    assert_eq!(cache.get_included_payloads(), paths(&["/Ref/Child", "/Root"]));
}

#[test]
fn rejecting_predicate_defers_every_payload() {
    let cache = bug_160419_cache(CacheOptions::default());
    let mut errors = Vec::new();
    cache.compute_prim_indexes_in_parallel(&Path::abs_root(), &mut errors, |_| true, |_| false);

    assert!(cache.get_included_payloads().is_empty());
    let root = cache.find_prim_index(&path("/Root").unwrap()).unwrap();
    assert_eq!(root.payload_state(), PayloadState::ExcludedByPredicate);
    assert!(root.has_deferred_payload());
    assert!(cache.find_prim_index(&path("/Root/Cube").unwrap()).is_none());
}

#[test]
fn payload_predicate_sees_each_prim_once() {
    let cache = bug_160419_cache(CacheOptions::default());
    let asked = parking_lot::Mutex::new(Vec::new());
    let mut errors = Vec::new();
    cache.compute_prim_indexes_in_parallel(
        &Path::abs_root(),
        &mut errors,
        |_| true,
        |p: &Path| {
            asked.lock().push(p.to_string());
            p.as_str() == "/Root"
        },
    );

    let mut asked = asked.into_inner();
    asked.sort();
    assert_eq!(asked, vec!["/Ref/Child", "/Root"]);
    assert_eq!(cache.get_included_payloads(), paths(&["/Root"]));
}

#[test]
fn excluding_a_payload_unloads_it() {
    let cache = bug_160419_cache(CacheOptions::default());
    let mut errors = Vec::new();
    cache.compute_prim_indexes_in_parallel(&Path::abs_root(), &mut errors, |_| true, |_| true);

    cache.request_payloads([], [path("/Root").unwrap()]);
    assert_eq!(cache.get_included_payloads(), paths(&["/Ref/Child"]));
    assert!(cache.find_prim_index(&path("/Root/Cube").unwrap()).is_none());

    let root = cache.compute_prim_index(&path("/Root").unwrap());
    assert_eq!(root.payload_state(), PayloadState::ExcludedByIncludeSet);
}
