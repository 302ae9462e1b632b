use std::collections::HashMap;
use std::sync::Arc;

use openusd_pcp::pcp::{
    ArcType, CacheOptions, CompositionCache, ErrorKind, LayerRegistry, LayerStackSite, SiteComposer,
};
use openusd_pcp::sdf::{
    path, FieldKey, Layer, LayerHandle, LayerOffset, ListOp, Path, Payload, Reference, Schema, SpecType, Specifier,
    Value,
};
use pretty_assertions::assert_eq;

struct Scene {
    registry: Arc<LayerRegistry>,
    root: LayerHandle,
    weak: LayerHandle,
}

impl Scene {
    /// `root.usda` with a single sublayer `weak.usda`.
    fn new() -> Self {
        let registry = Arc::new(LayerRegistry::new());
        let root = registry.insert(Layer::create("root.usda"));
        let weak = registry.insert(Layer::create("weak.usda"));
        root.set_field(&Path::abs_root(), FieldKey::SubLayers, Value::StringVec(vec!["weak.usda".into()]));
        Self { registry, root, weak }
    }

    fn cache(&self, options: CacheOptions) -> CompositionCache {
        CompositionCache::new(Arc::new(Schema::new()), self.registry.clone(), self.root.clone(), options)
    }
}

fn reference(prim: &str) -> Reference {
    Reference::internal(path(prim).unwrap())
}

fn arc_types(cache: &CompositionCache, prim: &str) -> Vec<ArcType> {
    cache
        .compute_prim_index(&path(prim).unwrap())
        .root_node()
        .children()
        .iter()
        .map(|n| n.arc_type())
        .collect()
}

#[test]
fn children_follow_strength_order() {
    let scene = Scene::new();
    let asset = scene.registry.insert(Layer::create("asset.usda"));
    asset.define_prim(&path("/Asset").unwrap(), Specifier::Def);
    asset.set_field(&Path::abs_root(), FieldKey::DefaultPrim, Value::Token("Asset".into()));

    let model = path("/Model").unwrap();
    // Authored weakest arc first so authoring order cannot explain the result.
    scene.root.set_field(&model, FieldKey::Payload, ListOp::prepend(vec![Payload::new("asset.usda", Path::default())]));
    scene.root.set_field(&model, FieldKey::References, ListOp::prepend(vec![reference("/Ref")]));
    scene.weak.set_field(&model, FieldKey::Specializes, ListOp::prepend(vec![path("/Spec").unwrap()]));
    scene.weak.set_field(&model, FieldKey::VariantSetNames, Value::TokenListOp(ListOp::prepend(vec!["lod".into()])));
    scene.root.set_field(
        &model,
        FieldKey::VariantSelection,
        Value::VariantSelectionMap(HashMap::from([("lod".to_owned(), "high".to_owned())])),
    );
    scene.weak.create_spec(&path("/Model{lod=high}").unwrap(), SpecType::Variant);
    scene.root.set_field(&model, FieldKey::InheritPaths, ListOp::prepend(vec![path("/Class").unwrap()]));

    let cache = scene.cache(CacheOptions::default());
    cache.request_payloads([model.clone()], []);
    assert_eq!(
        arc_types(&cache, "/Model"),
        vec![
            ArcType::Inherit,
            ArcType::Variant,
            ArcType::Specialize,
            ArcType::Reference,
            ArcType::Payload,
        ]
    );

    let index = cache.compute_prim_index(&model);
    let variant = &index.root_node().children()[1];
    assert_eq!(variant.path(), &path("/Model{lod=high}").unwrap());
    assert!(variant.has_specs());
    let payload = &index.root_node().children()[4];
    assert_eq!(payload.site().to_string(), "@asset.usda@</Asset>");
}

#[test]
fn direct_arcs_are_stronger_than_ancestral_arcs() {
    let scene = Scene::new();
    scene.root.set_field(&path("/A").unwrap(), FieldKey::References, ListOp::prepend(vec![reference("/R1")]));
    scene.root.set_field(&path("/A/B").unwrap(), FieldKey::References, ListOp::prepend(vec![reference("/R2")]));

    let cache = scene.cache(CacheOptions::default());
    let index = cache.compute_prim_index(&path("/A/B").unwrap());
    let children: Vec<(String, bool)> = index
        .root_node()
        .children()
        .iter()
        .map(|n| (n.path().to_string(), n.is_ancestral()))
        .collect();
    assert_eq!(children, vec![("/R2".to_owned(), false), ("/R1/B".to_owned(), true)]);
}

#[test]
fn self_inherit_reports_a_cycle() {
    let scene = Scene::new();
    scene.root.set_field(&path("/A").unwrap(), FieldKey::InheritPaths, ListOp::prepend(vec![path("/A").unwrap()]));

    let cache = scene.cache(CacheOptions::default());
    let index = cache.compute_prim_index(&path("/A").unwrap());
    assert!(index.root_node().children().is_empty());
    assert_eq!(index.errors().len(), 1);
    assert_eq!(index.errors()[0].kind(), ErrorKind::ArcCycle);
}

#[test]
fn mutual_references_across_layers_terminate() {
    let scene = Scene::new();
    let other = scene.registry.insert(Layer::create("other.usda"));
    scene.root.set_field(
        &path("/A").unwrap(),
        FieldKey::References,
        ListOp::prepend(vec![Reference::new("other.usda", path("/B").unwrap())]),
    );
    other.set_field(
        &path("/B").unwrap(),
        FieldKey::References,
        ListOp::prepend(vec![Reference::new("root.usda", path("/A").unwrap())]),
    );

    let cache = scene.cache(CacheOptions::default());
    let index = cache.compute_prim_index(&path("/A").unwrap());
    assert_eq!(index.nodes().count(), 2);
    assert_eq!(index.errors()[0].kind(), ErrorKind::ArcCycle);
}

#[test]
fn explicit_list_terminates_composition() {
    let scene = Scene::new();
    let prim = path("/A").unwrap();
    scene.root.set_field(&prim, FieldKey::References, ListOp::explicit(vec![reference("/a"), reference("/b")]));
    scene.weak.set_field(&prim, FieldKey::References, ListOp::prepend(vec![reference("/c")]));

    let cache = scene.cache(CacheOptions::default());
    let site = LayerStackSite::new(cache.root_layer_stack(), &prim);
    let schema = Schema::new();
    let composed: Vec<String> = SiteComposer::new(&schema)
        .compose_references(&site, &mut Vec::new())
        .into_iter()
        .map(|r| r.item.prim_path.to_string())
        .collect();
    assert_eq!(composed, vec!["/a", "/b"]);
}

#[test]
fn stronger_delete_applies_after_weaker_explicit() {
    let scene = Scene::new();
    let prim = path("/A").unwrap();
    scene.root.set_field(&prim, FieldKey::References, ListOp::delete(vec![reference("/a")]));
    scene.weak.set_field(
        &prim,
        FieldKey::References,
        ListOp::explicit(vec![reference("/a"), reference("/b"), reference("/c")]),
    );

    let cache = scene.cache(CacheOptions::default());
    let site = LayerStackSite::new(cache.root_layer_stack(), &prim);
    let schema = Schema::new();
    let composed = SiteComposer::new(&schema).compose_field(&site, FieldKey::References, &mut Vec::new());
    let expected = ListOp::explicit(vec![reference("/b"), reference("/c")]);
    assert_eq!(composed, Some(Value::ReferenceListOp(expected.clone())));

    // Re-expressing the composed list as an explicit op is a fixed point.
    let Some(Value::ReferenceListOp(flattened)) = composed else {
        panic!("expected a reference list op");
    };
    assert_eq!(flattened.flatten(), expected);
    assert_eq!(flattened.apply_to(&[reference("/z")]), expected.apply_to(&[]));
}

#[test]
fn relocated_site_composes_like_its_target() {
    let scene = Scene::new();
    scene.root.set_field(
        &Path::abs_root(),
        FieldKey::LayerRelocates,
        Value::Relocates(vec![(path("/A/B").unwrap(), path("/A/C").unwrap())]),
    );
    let target = path("/A/C").unwrap();
    scene.root.set_field(&target, FieldKey::Kind, Value::Token("component".into()));
    scene.weak.set_field(&target, FieldKey::Kind, Value::Token("group".into()));
    scene.weak.set_field(&target, FieldKey::Hidden, true);

    let cache = scene.cache(CacheOptions::default());
    let stack = cache.root_layer_stack();
    let schema = Schema::new();
    let composer = SiteComposer::new(&schema);
    let relocated = LayerStackSite::new(stack.clone(), &path("/A/B").unwrap());
    let direct = LayerStackSite::unrelocated(stack, target);

    for field in [FieldKey::Kind, FieldKey::Hidden, FieldKey::Specifier] {
        assert_eq!(
            composer.compose_field(&relocated, field, &mut Vec::new()),
            composer.compose_field(&direct, field, &mut Vec::new()),
            "{}",
            field.as_str()
        );
    }

    let index = cache.compute_prim_index(&path("/A/B").unwrap());
    assert_eq!(index.root_node().path(), &path("/A/C").unwrap());
    assert_eq!(arc_types(&cache, "/A/B"), vec![ArcType::Relocate]);
    assert_eq!(cache.compute_prim_child_names(&path("/A").unwrap()), vec!["B"]);
}

#[test]
fn composing_twice_is_identical() {
    let scene = Scene::new();
    scene.root.set_field(&path("/A").unwrap(), FieldKey::References, ListOp::prepend(vec![reference("/R")]));
    scene.weak.set_field(&path("/R").unwrap(), FieldKey::InheritPaths, ListOp::prepend(vec![path("/Class").unwrap()]));
    scene.weak.define_prim(&path("/R/Child").unwrap(), Specifier::Def);

    let first = scene.cache(CacheOptions::default());
    let second = scene.cache(CacheOptions::default());
    for prim in ["/A", "/A/Child"] {
        let p = path(prim).unwrap();
        assert_eq!(*first.compute_prim_index(&p), *second.compute_prim_index(&p));
    }

    let before = first.compute_prim_index(&path("/A/Child").unwrap());
    first.notify_layer_changed("weak.usda", &[path("/R").unwrap()]);
    let after = first.compute_prim_index(&path("/A/Child").unwrap());
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(*before, *after);
}

#[test]
fn variant_fallbacks_apply_without_selection() {
    let scene = Scene::new();
    let model = path("/Model").unwrap();
    scene.root.set_field(&model, FieldKey::VariantSetNames, Value::TokenListOp(ListOp::prepend(vec!["lod".into()])));
    scene.root.create_spec(&path("/Model{lod=low}").unwrap(), SpecType::Variant);

    let options = CacheOptions::default().with_variant_fallback("lod", vec!["medium".into(), "low".into()]);
    let cache = scene.cache(options);
    let index = cache.compute_prim_index(&model);
    let variant = &index.root_node().children()[0];
    assert_eq!(variant.arc_type(), ArcType::Variant);
    assert_eq!(variant.path(), &path("/Model{lod=low}").unwrap());

    let plain = scene.cache(CacheOptions::default());
    assert!(arc_types(&plain, "/Model").is_empty());
}

#[test]
fn stronger_node_selections_win() {
    let scene = Scene::new();
    let asset = path("/Asset").unwrap();
    scene.root.set_field(&asset, FieldKey::VariantSetNames, Value::TokenListOp(ListOp::prepend(vec!["lod".into()])));
    scene.root.set_field(
        &asset,
        FieldKey::VariantSelection,
        Value::VariantSelectionMap(HashMap::from([("lod".to_owned(), "low".to_owned())])),
    );
    let shot = path("/Shot").unwrap();
    scene.root.set_field(&shot, FieldKey::References, ListOp::prepend(vec![reference("/Asset")]));
    scene.root.set_field(
        &shot,
        FieldKey::VariantSelection,
        Value::VariantSelectionMap(HashMap::from([("lod".to_owned(), "high".to_owned())])),
    );

    let cache = scene.cache(CacheOptions::default());
    let index = cache.compute_prim_index(&shot);
    let sites: Vec<String> = index.nodes().map(|n| n.path().to_string()).collect();
    assert_eq!(sites, vec!["/Shot", "/Asset", "/Asset{lod=high}"]);
}

fn selection(set: &str, name: &str) -> Value {
    Value::VariantSelectionMap(HashMap::from([(set.to_owned(), name.to_owned())]))
}

fn node_paths(cache: &CompositionCache, prim: &str) -> Vec<String> {
    cache
        .compute_prim_index(&path(prim).unwrap())
        .nodes()
        .map(|n| format!("{}:{}", n.arc_type(), n.path()))
        .collect()
}

#[test]
fn inherited_selection_beats_ancestral_reference_selection() {
    let scene = Scene::new();
    scene.root.set_field(&path("/World").unwrap(), FieldKey::References, ListOp::prepend(vec![reference("/Ref")]));
    let model = path("/Ref/Model").unwrap();
    scene.weak.set_field(&model, FieldKey::VariantSetNames, Value::TokenListOp(ListOp::prepend(vec!["lod".into()])));
    scene.weak.set_field(&model, FieldKey::VariantSelection, selection("lod", "low"));
    scene.root.set_field(
        &path("/World/Model").unwrap(),
        FieldKey::InheritPaths,
        ListOp::prepend(vec![path("/Class").unwrap()]),
    );
    scene.weak.set_field(&path("/Class").unwrap(), FieldKey::VariantSelection, selection("lod", "high"));

    let cache = scene.cache(CacheOptions::default());
    assert_eq!(
        node_paths(&cache, "/World/Model"),
        vec![
            "root:/World/Model",
            "inherit:/Class",
            "reference:/Ref/Model",
            "variant:/Ref/Model{lod=high}",
        ]
    );
}

#[test]
fn inherited_selection_beats_referenced_selection() {
    let scene = Scene::new();
    let model = path("/Model").unwrap();
    scene.root.set_field(&model, FieldKey::References, ListOp::prepend(vec![reference("/Asset")]));
    scene.root.set_field(&model, FieldKey::InheritPaths, ListOp::prepend(vec![path("/Class").unwrap()]));
    let asset = path("/Asset").unwrap();
    scene.root.set_field(&asset, FieldKey::VariantSetNames, Value::TokenListOp(ListOp::prepend(vec!["lod".into()])));
    scene.root.set_field(&asset, FieldKey::VariantSelection, selection("lod", "low"));
    scene.weak.set_field(&path("/Class").unwrap(), FieldKey::VariantSelection, selection("lod", "high"));

    let cache = scene.cache(CacheOptions::default());
    assert_eq!(
        node_paths(&cache, "/Model"),
        vec!["root:/Model", "inherit:/Class", "reference:/Asset", "variant:/Asset{lod=high}"]
    );
}

#[test]
fn selection_inside_a_variant_defers_to_stronger_nodes() {
    let scene = Scene::new();
    let model = path("/Model").unwrap();
    scene.root.set_field(&model, FieldKey::References, ListOp::prepend(vec![reference("/Asset")]));
    let asset = path("/Asset").unwrap();
    scene.root.set_field(
        &asset,
        FieldKey::VariantSetNames,
        Value::TokenListOp(ListOp::prepend(vec!["lod".into(), "shading".into()])),
    );
    scene.root.set_field(&asset, FieldKey::VariantSelection, selection("lod", "high"));
    // The lod variant picks a shading look, but the referencing prim is
    // stronger and picks another.
    scene.root.set_field(&path("/Asset{lod=high}").unwrap(), FieldKey::VariantSelection, selection("shading", "matte"));
    scene.root.set_field(&model, FieldKey::VariantSelection, selection("shading", "gloss"));

    let cache = scene.cache(CacheOptions::default());
    assert_eq!(
        node_paths(&cache, "/Model"),
        vec![
            "root:/Model",
            "reference:/Asset",
            "variant:/Asset{lod=high}",
            "variant:/Asset{shading=gloss}",
        ]
    );
}

#[test]
fn muted_sublayers_do_not_contribute() {
    let scene = Scene::new();
    let prim = path("/A").unwrap();
    scene.weak.set_field(&prim, FieldKey::Kind, Value::Token("group".into()));

    let cache = scene.cache(CacheOptions::default().with_muted_layers(["weak.usda"]));
    assert_eq!(cache.root_layer_stack().layers().len(), 1);
    let index = cache.compute_prim_index(&prim);
    assert!(!index.has_specs());
}

#[test]
fn sublayer_offsets_reach_referenced_nodes() {
    let scene = Scene::new();
    scene.root.set_field(
        &Path::abs_root(),
        FieldKey::SubLayerOffsets,
        Value::LayerOffsetVec(vec![LayerOffset::new(10.0, 1.0)]),
    );
    let asset = scene.registry.insert(Layer::create("asset.usda"));
    asset.define_prim(&path("/Asset").unwrap(), Specifier::Def);
    scene.weak.set_field(
        &path("/A").unwrap(),
        FieldKey::References,
        ListOp::prepend(vec![Reference::new("asset.usda", path("/Asset").unwrap())]),
    );

    let cache = scene.cache(CacheOptions::default());
    let index = cache.compute_prim_index(&path("/A").unwrap());
    let offsets: Vec<LayerOffset> = index.nodes().map(|n| n.layer_offset()).collect();
    assert_eq!(offsets, vec![LayerOffset::IDENTITY, LayerOffset::new(10.0, 1.0)]);
    assert!(index.to_string().contains("(offset=10, scale=1)"));
}
