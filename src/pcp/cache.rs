//! Caching prim indexes and layer stacks for one root layer.
//!
//! The cache owns the layer stack registry, the computed prim indexes, the
//! payload include set and a dependency index from layer sites to the prim
//! indexes they contribute to. Maps are guarded by `parking_lot` locks held
//! only while a map is read or mutated; prim index computation itself runs
//! without holding any lock.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;

use super::arcs::{ArcDiscoverer, ArcType};
use super::compose_site::SiteComposer;
use super::error::CompositionError;
use super::layer_stack::{LayerStack, LayerStackRegistry};
use super::prim_index::{PayloadInclusion, PayloadState, PrimIndex, PrimIndexer};
use super::resolver::LayerResolver;
use crate::sdf::{LayerHandle, Path, Schema};

type PayloadPredicate<'p> = dyn Fn(&Path) -> bool + Sync + 'p;

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Ordered fallback selections per variant set, used when no selection
    /// is authored.
    pub variant_fallbacks: HashMap<String, Vec<String>>,
    /// Layer identifiers left out of every layer stack.
    pub muted_layers: HashSet<String>,
    /// Compute prim indexes on the rayon pool.
    pub parallel: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            variant_fallbacks: HashMap::new(),
            muted_layers: HashSet::new(),
            parallel: true,
        }
    }
}

impl CacheOptions {
    pub fn with_variant_fallbacks(mut self, fallbacks: HashMap<String, Vec<String>>) -> Self {
        self.variant_fallbacks = fallbacks;
        self
    }

    pub fn with_variant_fallback(mut self, variant_set: impl Into<String>, selections: Vec<String>) -> Self {
        self.variant_fallbacks.insert(variant_set.into(), selections);
        self
    }

    pub fn with_muted_layers<I, S>(mut self, layers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.muted_layers.extend(layers.into_iter().map(Into::into));
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Which cached prim indexes read which layer sites.
#[derive(Debug, Default)]
struct Dependencies {
    /// layer identifier -> site path -> prim index paths
    by_site: HashMap<String, HashMap<Path, HashSet<Path>>>,
    /// prim index path -> its `(layer, site)` entries in `by_site`
    by_index: HashMap<Path, Vec<(String, Path)>>,
}

impl Dependencies {
    fn add(&mut self, index: &PrimIndex) {
        let path = index.path();
        self.remove(path);

        let mut entries = Vec::new();
        for node in index.nodes() {
            for layer in node.layer_stack().layers() {
                let indexes = self
                    .by_site
                    .entry(layer.identifier().to_owned())
                    .or_default()
                    .entry(node.path().clone())
                    .or_default();
                if indexes.insert(path.clone()) {
                    entries.push((layer.identifier().to_owned(), node.path().clone()));
                }
            }
        }
        self.by_index.insert(path.clone(), entries);
    }

    fn remove(&mut self, path: &Path) {
        let Some(entries) = self.by_index.remove(path) else {
            return;
        };
        for (layer, site) in entries {
            let Some(sites) = self.by_site.get_mut(&layer) else {
                continue;
            };
            if let Some(indexes) = sites.get_mut(&site) {
                indexes.remove(path);
                if indexes.is_empty() {
                    sites.remove(&site);
                }
            }
            if sites.is_empty() {
                self.by_site.remove(&layer);
            }
        }
    }

    fn dependents(&self, layer: &str, path: &Path) -> BTreeSet<Path> {
        let Some(sites) = self.by_site.get(layer) else {
            return BTreeSet::new();
        };
        sites
            .iter()
            .filter(|(site, _)| site.has_prefix(path))
            .flat_map(|(_, indexes)| indexes.iter().cloned())
            .collect()
    }
}

/// Memoized composition of a root layer's namespace.
pub struct CompositionCache {
    schema: Arc<Schema>,
    resolver: Arc<dyn LayerResolver>,
    root_layer: LayerHandle,
    options: CacheOptions,
    layer_stacks: LayerStackRegistry,
    prim_indexes: RwLock<HashMap<Path, Arc<PrimIndex>>>,
    included_payloads: RwLock<BTreeSet<Path>>,
    payload_requests: RwLock<BTreeSet<Path>>,
    dependencies: RwLock<Dependencies>,
}

impl CompositionCache {
    pub fn new(
        schema: Arc<Schema>,
        resolver: Arc<dyn LayerResolver>,
        root_layer: LayerHandle,
        options: CacheOptions,
    ) -> Self {
        Self {
            schema,
            resolver,
            root_layer,
            options,
            layer_stacks: LayerStackRegistry::new(),
            prim_indexes: RwLock::new(HashMap::new()),
            included_payloads: RwLock::new(BTreeSet::new()),
            payload_requests: RwLock::new(BTreeSet::new()),
            dependencies: RwLock::new(Dependencies::default()),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn root_layer(&self) -> &LayerHandle {
        &self.root_layer
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// The layer stack rooted at the cache's root layer.
    pub fn root_layer_stack(&self) -> Arc<LayerStack> {
        self.layer_stacks
            .find_or_build(&self.root_layer, self.resolver.as_ref(), &self.options.muted_layers)
    }

    pub fn layer_stacks(&self) -> &LayerStackRegistry {
        &self.layer_stacks
    }

    /// Return the index for `path`, computing (and caching) it and its
    /// ancestors' indexes if needed.
    ///
    /// Payloads are included only for paths in the include set.
    pub fn compute_prim_index(&self, path: &Path) -> Arc<PrimIndex> {
        self.compute(path, None)
    }

    /// The cached index for `path`, if any.
    pub fn find_prim_index(&self, path: &Path) -> Option<Arc<PrimIndex>> {
        self.prim_indexes.read().get(path).cloned()
    }

    /// Compute the indexes of `root` and its namespace descendants.
    ///
    /// Descendants of a prim are visited only if `predicate` accepts the
    /// prim's index. `payload_predicate` decides whether payloads found on
    /// prims outside the include set are loaded; accepted prims join the
    /// include set. Errors of every visited index are appended to `errors`.
    pub fn compute_prim_indexes_in_parallel<P, Q>(
        &self,
        root: &Path,
        errors: &mut Vec<CompositionError>,
        predicate: P,
        payload_predicate: Q,
    ) where
        P: Fn(&PrimIndex) -> bool + Sync,
        Q: Fn(&Path) -> bool + Sync,
    {
        let collected = Mutex::new(Vec::new());
        self.traverse(root.clone(), &collected, &predicate, &payload_predicate);
        errors.extend(collected.into_inner());
    }

    /// Paths whose cached prim index traversed a payload introduced at that
    /// prim.
    pub fn get_included_payloads(&self) -> BTreeSet<Path> {
        self.included_payloads.read().clone()
    }

    /// Edit the payload include set and evict the affected indexes.
    pub fn request_payloads<I, E>(&self, include: I, exclude: E)
    where
        I: IntoIterator<Item = Path>,
        E: IntoIterator<Item = Path>,
    {
        let mut affected = Vec::new();
        {
            let mut requests = self.payload_requests.write();
            for path in include {
                requests.insert(path.clone());
                affected.push(path);
            }
            for path in exclude {
                requests.remove(&path);
                affected.push(path);
            }
        }
        let evicted = self.evict_subtrees(&affected);
        log::debug!("Payload request change evicted {} prim indexes", evicted.len());
    }

    /// The payload include set.
    pub fn payload_requests(&self) -> BTreeSet<Path> {
        self.payload_requests.read().clone()
    }

    /// Cached prim indexes with a node at `path` (or below it) in a layer
    /// stack containing `layer`.
    pub fn dependent_prim_index_paths(&self, layer: &str, path: &Path) -> BTreeSet<Path> {
        self.dependencies.read().dependents(layer, path)
    }

    /// Evict every cached index that depends on `changed_paths` in `layer`,
    /// along with cached namespace descendants of those indexes. Returns the
    /// evicted paths.
    ///
    /// A change at `/` may alter sublayers or relocations: every layer stack
    /// containing `layer` is dropped and every prim index evicted.
    pub fn notify_layer_changed(&self, layer: &str, changed_paths: &[Path]) -> Vec<Path> {
        if changed_paths.iter().any(Path::is_absolute_root_path) {
            let dropped = self.layer_stacks.invalidate_layer(layer);
            log::debug!("Layer @{layer}@ changed at </>, dropped {} layer stacks", dropped.len());
            return self.evict_subtrees(&[Path::abs_root()]);
        }

        let roots: BTreeSet<Path> = changed_paths
            .iter()
            .flat_map(|path| self.dependent_prim_index_paths(layer, path))
            .collect();
        let roots: Vec<Path> = roots.into_iter().collect();
        let evicted = self.evict_subtrees(&roots);
        log::debug!("Layer @{layer}@ changed, evicted {} prim indexes", evicted.len());
        evicted
    }

    /// Composed child prim names of `path`, strongest opinion first.
    ///
    /// Names are gathered from every node of the prim index. Children moved
    /// away by a relocation are hidden and relocated children appear under
    /// their source name.
    pub fn compute_prim_child_names(&self, path: &Path) -> Vec<String> {
        let index = self.compute_prim_index(path);
        let mut errors = Vec::new();
        let names = self.child_names(&index, &mut errors);
        for err in errors {
            log::warn!("{err}");
        }
        names
    }

    fn compute(&self, path: &Path, payload_predicate: Option<&PayloadPredicate<'_>>) -> Arc<PrimIndex> {
        if let Some(index) = self.find_prim_index(path) {
            log::trace!("Prim index cache hit for <{path}>");
            return index;
        }

        let indexable = path.is_absolute_root_path() || (path.is_absolute_path() && path.is_prim_path());
        let parent = if indexable && !path.is_absolute_root_path() {
            Some(self.compute(&path.parent_path(), payload_predicate))
        } else {
            None
        };

        let payloads = PayloadInclusion {
            requested: self.payload_requests.read().contains(path),
            predicate: payload_predicate.map(|p| p as &dyn Fn(&Path) -> bool),
        };
        let root_stack = self.root_layer_stack();
        let computed = |stack: &LayerStack, prim: &Path| {
            if stack.identifier() == root_stack.identifier() {
                self.find_prim_index(prim)
            } else {
                None
            }
        };
        let discoverer = ArcDiscoverer::new(&self.schema, self.resolver.as_ref(), &self.layer_stacks, &self.options);
        let index = PrimIndexer::new(discoverer)
            .with_computed_indexes(&computed)
            .compute(path, root_stack.clone(), parent.as_deref(), payloads);
        let index = Arc::new(index);
        if !indexable {
            return index;
        }

        log::debug!("Computed prim index for <{path}> with {} nodes", index.nodes().count());
        let mut indexes = self.prim_indexes.write();
        if let Some(cached) = indexes.get(path) {
            return cached.clone();
        }
        // Recorded under the map's write lock so an eviction cannot run
        // between the insert and the bookkeeping.
        self.record(&index);
        indexes.insert(path.clone(), index.clone());
        index
    }

    /// Lock order: `prim_indexes`, then the payload sets, then
    /// `dependencies`. Callers hold the `prim_indexes` write lock.
    fn record(&self, index: &PrimIndex) {
        let path = index.path();
        if index.included_payload() {
            self.included_payloads.write().insert(path.clone());
        }
        if index.payload_state() == PayloadState::IncludedByPredicate {
            self.payload_requests.write().insert(path.clone());
        }
        self.dependencies.write().add(index);
    }

    /// Evict cached indexes at or below any of `roots`.
    fn evict_subtrees(&self, roots: &[Path]) -> Vec<Path> {
        if roots.is_empty() {
            return Vec::new();
        }

        let mut indexes = self.prim_indexes.write();
        let evicted: Vec<Path> = indexes
            .keys()
            .filter(|path| roots.iter().any(|root| path.has_prefix(root)))
            .cloned()
            .collect();
        if evicted.is_empty() {
            return evicted;
        }

        let mut included = self.included_payloads.write();
        let mut dependencies = self.dependencies.write();
        for path in &evicted {
            indexes.remove(path);
            included.remove(path);
            dependencies.remove(path);
        }
        evicted
    }

    fn child_names(&self, index: &PrimIndex, errors: &mut Vec<CompositionError>) -> Vec<String> {
        let composer = SiteComposer::new(&self.schema);
        let mut seen = HashSet::new();
        let mut names = Vec::new();

        for node in index.nodes().filter(|n| n.arc_type() != ArcType::Relocate) {
            let relocations = node.layer_stack().relocations();
            for name in composer.compose_prim_child_names(node.site(), errors) {
                let moved = node
                    .path()
                    .append_child(&name)
                    .is_ok_and(|child| relocations.source_of(&child).is_some());
                if !moved && seen.insert(name.clone()) {
                    names.push(name);
                }
            }
            for (source, _) in relocations.iter() {
                if &source.parent_path() == node.authored_path() && seen.insert(source.name().to_owned()) {
                    names.push(source.name().to_owned());
                }
            }
        }
        names
    }

    fn traverse(
        &self,
        path: Path,
        errors: &Mutex<Vec<CompositionError>>,
        predicate: &(dyn Fn(&PrimIndex) -> bool + Sync),
        payload_predicate: &PayloadPredicate<'_>,
    ) {
        let index = self.compute(&path, Some(payload_predicate));
        let mut found = index.errors().to_vec();
        if !predicate(&index) {
            errors.lock().extend(found);
            return;
        }

        let children: Vec<Path> = self
            .child_names(&index, &mut found)
            .into_iter()
            .filter_map(|name| path.append_child(&name).ok())
            .collect();
        errors.lock().extend(found);

        if self.options.parallel {
            children
                .into_par_iter()
                .for_each(|child| self.traverse(child, errors, predicate, payload_predicate));
        } else {
            for child in children {
                self.traverse(child, errors, predicate, payload_predicate);
            }
        }
    }
}
