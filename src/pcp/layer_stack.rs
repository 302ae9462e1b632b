//! Layer stacks.
//!
//! A layer stack is the flattened, strongest-first list of layers reachable
//! from a root layer through `subLayers`, each paired with the cumulative
//! time offset that maps it into the root layer's time. The stack also
//! composes the relocations authored in any of its layers.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::error::CompositionError;
use super::resolver::LayerResolver;
use crate::sdf::{FieldKey, LayerHandle, LayerOffset, Path, Value};

const DEFAULT_TIME_CODES_PER_SECOND: f64 = 24.0;

/// Identifies a layer stack by its root layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerStackIdentifier(String);

impl LayerStackIdentifier {
    pub fn new(root_layer: impl Into<String>) -> Self {
        Self(root_layer.into())
    }

    pub fn root_layer(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerStackIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}@", self.0)
    }
}

/// Sublayer nesting of a layer stack, with cumulative offsets.
#[derive(Debug, Clone)]
pub struct LayerTree {
    pub layer: LayerHandle,
    pub offset: LayerOffset,
    pub children: Vec<LayerTree>,
}

impl LayerTree {
    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}@{}@", "", self.layer.identifier(), indent = depth * 4)?;
        if !self.offset.is_identity() {
            write!(f, " {}", self.offset)?;
        }
        writeln!(f)?;
        for child in &self.children {
            child.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for LayerTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

/// Relocations composed over a layer stack.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelocationMap {
    source_to_target: BTreeMap<Path, Path>,
    target_to_source: BTreeMap<Path, Path>,
}

impl RelocationMap {
    pub fn is_empty(&self) -> bool {
        self.source_to_target.is_empty()
    }

    pub fn len(&self) -> usize {
        self.source_to_target.len()
    }

    /// `(source, target)` pairs ordered by source.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.source_to_target.iter()
    }

    pub fn target_of(&self, source: &Path) -> Option<&Path> {
        self.source_to_target.get(source)
    }

    pub fn source_of(&self, target: &Path) -> Option<&Path> {
        self.target_to_source.get(target)
    }

    /// Map `path` to its relocated location, using the nearest relocated
    /// ancestor (or the path itself).
    pub fn resolve(&self, path: &Path) -> Path {
        map_through(&self.source_to_target, path)
    }

    /// Inverse of [`RelocationMap::resolve`].
    pub fn unresolve(&self, path: &Path) -> Path {
        map_through(&self.target_to_source, path)
    }

    fn insert(&mut self, source: Path, target: Path) {
        self.target_to_source.insert(target.clone(), source.clone());
        self.source_to_target.insert(source, target);
    }
}

fn map_through(map: &BTreeMap<Path, Path>, path: &Path) -> Path {
    if map.is_empty() {
        return path.clone();
    }
    for ancestor in path.ancestors() {
        if let Some(mapped) = map.get(&ancestor) {
            return path.replace_prefix(&ancestor, mapped);
        }
    }
    path.clone()
}

/// A flattened stack of layers.
#[derive(Debug)]
pub struct LayerStack {
    identifier: LayerStackIdentifier,
    layers: Vec<LayerHandle>,
    offsets: Vec<LayerOffset>,
    tree: LayerTree,
    relocations: RelocationMap,
    errors: Vec<CompositionError>,
}

impl LayerStack {
    /// Build the layer stack rooted at `root`.
    ///
    /// Layers whose identifier (or authored asset path) is in `muted` are
    /// skipped along with their sublayers. The root layer is never muted.
    pub fn build(root: LayerHandle, resolver: &dyn LayerResolver, muted: &HashSet<String>) -> LayerStack {
        let mut builder = Builder {
            resolver,
            muted,
            layers: Vec::new(),
            offsets: Vec::new(),
            errors: Vec::new(),
            visiting: Vec::new(),
        };
        let tree = builder.add_layer(root.clone(), LayerOffset::IDENTITY);

        let mut stack = LayerStack {
            identifier: LayerStackIdentifier::new(root.identifier()),
            layers: builder.layers,
            offsets: builder.offsets,
            tree,
            relocations: RelocationMap::default(),
            errors: builder.errors,
        };
        stack.compose_relocations();

        log::debug!(
            "Built layer stack {} with {} layers and {} relocations",
            stack.identifier,
            stack.layers.len(),
            stack.relocations.len()
        );
        stack
    }

    pub fn identifier(&self) -> &LayerStackIdentifier {
        &self.identifier
    }

    pub fn root_layer(&self) -> &LayerHandle {
        &self.tree.layer
    }

    /// Layers, strongest first.
    pub fn layers(&self) -> &[LayerHandle] {
        &self.layers
    }

    /// Cumulative offsets, parallel to [`LayerStack::layers`].
    pub fn layer_offsets(&self) -> &[LayerOffset] {
        &self.offsets
    }

    /// Layers paired with their cumulative offsets, strongest first.
    pub fn iter(&self) -> impl Iterator<Item = (&LayerHandle, &LayerOffset)> {
        self.layers.iter().zip(&self.offsets)
    }

    pub fn layer_index(&self, identifier: &str) -> Option<usize> {
        self.layers.iter().position(|layer| layer.identifier() == identifier)
    }

    pub fn has_layer(&self, identifier: &str) -> bool {
        self.layer_index(identifier).is_some()
    }

    pub fn layer_offset(&self, identifier: &str) -> Option<LayerOffset> {
        self.layer_index(identifier).map(|i| self.offsets[i])
    }

    pub fn layer_tree(&self) -> &LayerTree {
        &self.tree
    }

    pub fn relocations(&self) -> &RelocationMap {
        &self.relocations
    }

    /// Errors found while building the stack.
    pub fn errors(&self) -> &[CompositionError] {
        &self.errors
    }

    /// Relocates from every layer, strongest first. The first opinion for a
    /// source wins.
    fn compose_relocations(&mut self) {
        let mut relocations = RelocationMap::default();
        let root = Path::abs_root();

        for layer in &self.layers {
            let mut authored: Vec<(Path, Path, Path)> = Vec::new();
            if let Some(Value::Relocates(entries)) = layer.get_field(&root, FieldKey::LayerRelocates) {
                authored.extend(entries.into_iter().map(|(s, t)| (root.clone(), s, t)));
            }
            for prim in layer.spec_paths() {
                if !prim.is_prim_path() {
                    continue;
                }
                if let Some(Value::Relocates(entries)) = layer.get_field(&prim, FieldKey::Relocates) {
                    authored.extend(entries.into_iter().map(|(s, t)| (prim.clone(), s, t)));
                }
            }

            for (anchor, source, target) in authored {
                let mut reject = |from: Path, to: Path, reason: String| {
                    log::warn!("Ignoring relocate <{from}> -> <{to}> in @{}@: {reason}", layer.identifier());
                    self.errors.push(CompositionError::InvalidRelocate {
                        layer: layer.identifier().to_owned(),
                        from,
                        to,
                        reason,
                    });
                };

                let (source, target) = match (source.make_absolute(&anchor), target.make_absolute(&anchor)) {
                    (Ok(s), Ok(t)) => (s, t),
                    (Err(e), _) | (_, Err(e)) => {
                        reject(source, target, format!("{e:#}"));
                        continue;
                    }
                };

                let reason = if !is_relocatable(&source) {
                    Some("source is not a prim path".to_owned())
                } else if !is_relocatable(&target) {
                    Some("target is not a prim path".to_owned())
                } else if source == target {
                    Some("source and target are the same".to_owned())
                } else if source.has_prefix(&target) {
                    Some("cannot relocate a prim to one of its ancestors".to_owned())
                } else if target.has_prefix(&source) {
                    Some("cannot relocate a prim beneath itself".to_owned())
                } else if relocations.source_of(&target).is_some_and(|other| *other != source) {
                    Some("target is already the target of another relocate".to_owned())
                } else {
                    None
                };

                if let Some(reason) = reason {
                    reject(source, target, reason);
                } else if relocations.target_of(&source).is_none() {
                    relocations.insert(source, target);
                }
            }
        }

        self.relocations = relocations;
    }
}

fn is_relocatable(path: &Path) -> bool {
    path.is_absolute_path() && path.is_prim_path() && !path.contains_prim_variant_selection()
}

struct Builder<'a> {
    resolver: &'a dyn LayerResolver,
    muted: &'a HashSet<String>,
    layers: Vec<LayerHandle>,
    offsets: Vec<LayerOffset>,
    errors: Vec<CompositionError>,
    visiting: Vec<String>,
}

impl Builder<'_> {
    fn add_layer(&mut self, layer: LayerHandle, offset: LayerOffset) -> LayerTree {
        self.visiting.push(layer.identifier().to_owned());
        self.layers.push(layer.clone());
        self.offsets.push(offset);

        let root = Path::abs_root();
        let sublayers = match layer.get_field(&root, FieldKey::SubLayers) {
            Some(Value::StringVec(paths)) | Some(Value::AssetPathVec(paths)) => paths,
            _ => Vec::new(),
        };
        let sublayer_offsets = match layer.get_field(&root, FieldKey::SubLayerOffsets) {
            Some(Value::LayerOffsetVec(offsets)) => offsets,
            _ => Vec::new(),
        };
        let tcps = time_codes_per_second(&layer);

        let mut children = Vec::new();
        for (i, asset_path) in sublayers.iter().enumerate() {
            if self.muted.contains(asset_path) {
                log::debug!("Skipping muted sublayer @{asset_path}@");
                continue;
            }

            let sublayer = match self.resolver.open_layer(asset_path, Some(&layer)) {
                Ok(sublayer) => sublayer,
                Err(err) => {
                    log::warn!("Could not open sublayer @{asset_path}@ of @{}@: {err:#}", layer.identifier());
                    self.errors.push(CompositionError::InvalidSublayerPath {
                        layer: layer.identifier().to_owned(),
                        sublayer: asset_path.clone(),
                        reason: format!("{err:#}"),
                    });
                    continue;
                }
            };
            let sublayer_id = sublayer.identifier().to_owned();

            if self.muted.contains(&sublayer_id) {
                log::debug!("Skipping muted sublayer @{sublayer_id}@");
                continue;
            }
            if self.visiting.contains(&sublayer_id) {
                log::warn!("Sublayer cycle through @{sublayer_id}@");
                self.errors.push(CompositionError::SublayerCycle {
                    layer: layer.identifier().to_owned(),
                    sublayer: sublayer_id,
                });
                continue;
            }
            if self.layers.iter().any(|l| l.identifier() == sublayer_id) {
                log::warn!("Sublayer @{sublayer_id}@ appears more than once; keeping the strongest");
                continue;
            }

            let mut sublayer_offset = sublayer_offsets.get(i).copied().unwrap_or_default();
            if !sublayer_offset.is_valid() {
                self.errors.push(CompositionError::InvalidSublayerOffset {
                    layer: layer.identifier().to_owned(),
                    sublayer: asset_path.clone(),
                    offset: sublayer_offset,
                });
                sublayer_offset = LayerOffset::IDENTITY;
            }

            let sublayer_tcps = time_codes_per_second(&sublayer);
            if sublayer_tcps != tcps {
                sublayer_offset.scale *= tcps / sublayer_tcps;
            }

            children.push(self.add_layer(sublayer, offset.compose(&sublayer_offset)));
        }

        self.visiting.pop();
        LayerTree {
            layer,
            offset,
            children,
        }
    }
}

/// `timeCodesPerSecond`, falling back to `framesPerSecond` and then 24.
fn time_codes_per_second(layer: &LayerHandle) -> f64 {
    let root = Path::abs_root();
    [FieldKey::TimeCodesPerSecond, FieldKey::FramesPerSecond]
        .into_iter()
        .filter_map(|key| layer.get_field(&root, key)?.try_as_double())
        .find(|tcps| tcps.is_finite() && *tcps > 0.0)
        .unwrap_or(DEFAULT_TIME_CODES_PER_SECOND)
}

/// Caches layer stacks by root layer identifier.
#[derive(Debug, Default)]
pub struct LayerStackRegistry {
    stacks: RwLock<HashMap<LayerStackIdentifier, Arc<LayerStack>>>,
}

impl LayerStackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached stack rooted at `root`, building it if needed.
    pub fn find_or_build(
        &self,
        root: &LayerHandle,
        resolver: &dyn LayerResolver,
        muted: &HashSet<String>,
    ) -> Arc<LayerStack> {
        let identifier = LayerStackIdentifier::new(root.identifier());
        if let Some(stack) = self.stacks.read().get(&identifier) {
            return stack.clone();
        }

        let stack = Arc::new(LayerStack::build(root.clone(), resolver, muted));
        self.stacks.write().entry(identifier).or_insert(stack).clone()
    }

    pub fn find(&self, identifier: &LayerStackIdentifier) -> Option<Arc<LayerStack>> {
        self.stacks.read().get(identifier).cloned()
    }

    /// Drop every cached stack that contains `layer`. Returns the dropped
    /// identifiers.
    pub fn invalidate_layer(&self, layer: &str) -> Vec<LayerStackIdentifier> {
        let mut stacks = self.stacks.write();
        let dropped: Vec<LayerStackIdentifier> = stacks
            .iter()
            .filter(|(_, stack)| stack.has_layer(layer))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &dropped {
            stacks.remove(id);
        }
        dropped
    }

    pub fn clear(&self) {
        self.stacks.write().clear();
    }

    pub fn len(&self) -> usize {
        self.stacks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.read().is_empty()
    }
}
