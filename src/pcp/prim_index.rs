//! Prim indexes: the strength-ordered tree of sites contributing to a prim.
//!
//! A prim index is built top-down from the prim's site in the root layer
//! stack. Every node discovers the arcs authored at its site and recurses into
//! their targets. Nodes of the parent prim's index are carried down to the
//! child as *ancestral* nodes (`/Ref` becomes `/Ref/Child`), so arcs authored
//! on ancestors keep contributing to descendants.
//!
//! Children of a node are ordered by arc type, then direct before ancestral,
//! then authored order. A preorder walk of the tree therefore visits sites
//! strongest first.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::arcs::{ArcDiscoverer, ArcType, DiscoveredArc};
use super::error::CompositionError;
use super::layer_stack::{LayerStack, LayerStackIdentifier};
use super::site::LayerStackSite;
use crate::sdf::{LayerOffset, Path};

/// Progress of a prim index computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexingState {
    Uncomposed,
    LocalOpinionsComposed,
    ArcsDiscovered,
    ChildrenRecursed,
    Complete { deferred_payload: bool },
    /// The path cannot be indexed at all.
    Error,
}

/// Why a prim index does or does not include its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadState {
    NoPayload,
    IncludedByIncludeSet,
    IncludedByPredicate,
    ExcludedByIncludeSet,
    ExcludedByPredicate,
    /// The payload was introduced and included by an ancestor prim.
    IncludedByAncestor,
}

impl PayloadState {
    pub fn is_included(self) -> bool {
        matches!(
            self,
            PayloadState::IncludedByIncludeSet | PayloadState::IncludedByPredicate | PayloadState::IncludedByAncestor
        )
    }
}

/// Decides whether payloads discovered for a prim are traversed.
#[derive(Clone, Copy, Default)]
pub struct PayloadInclusion<'p> {
    /// The prim's path is in the include set.
    pub requested: bool,
    /// Consulted when the prim is not in the include set.
    pub predicate: Option<&'p dyn Fn(&Path) -> bool>,
}

impl PayloadInclusion<'_> {
    fn decide(&self, path: &Path) -> PayloadState {
        if self.requested {
            return PayloadState::IncludedByIncludeSet;
        }
        match self.predicate {
            Some(predicate) if predicate(path) => PayloadState::IncludedByPredicate,
            Some(_) => PayloadState::ExcludedByPredicate,
            None => PayloadState::ExcludedByIncludeSet,
        }
    }
}

impl fmt::Debug for PayloadInclusion<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadInclusion")
            .field("requested", &self.requested)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// A site contributing to a prim index.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimIndexNode {
    arc_type: ArcType,
    site: LayerStackSite,
    authored_path: Path,
    arc_offset: LayerOffset,
    layer_offset: LayerOffset,
    sibling_index: usize,
    is_ancestral: bool,
    has_specs: bool,
    has_deferred_payload: bool,
    children: Vec<PrimIndexNode>,
    errors: Vec<CompositionError>,
}

impl PrimIndexNode {
    pub fn arc_type(&self) -> ArcType {
        self.arc_type
    }

    /// The site whose opinions this node contributes.
    pub fn site(&self) -> &LayerStackSite {
        &self.site
    }

    pub fn layer_stack(&self) -> &Arc<LayerStack> {
        self.site.layer_stack()
    }

    pub fn path(&self) -> &Path {
        self.site.path()
    }

    /// The target path before relocation.
    pub fn authored_path(&self) -> &Path {
        &self.authored_path
    }

    /// Offset mapping this node's times into the root layer stack.
    pub fn layer_offset(&self) -> LayerOffset {
        self.layer_offset
    }

    pub fn sibling_index(&self) -> usize {
        self.sibling_index
    }

    /// True if the arc to this node was authored on an ancestor prim.
    pub fn is_ancestral(&self) -> bool {
        self.is_ancestral
    }

    /// True if any layer of the node's stack has a spec at its path.
    pub fn has_specs(&self) -> bool {
        self.has_specs
    }

    /// True if a payload authored here was not traversed.
    pub fn has_deferred_payload(&self) -> bool {
        self.has_deferred_payload
    }

    /// Child nodes, strongest first.
    pub fn children(&self) -> &[PrimIndexNode] {
        &self.children
    }

    /// Errors found while expanding this node.
    pub fn errors(&self) -> &[CompositionError] {
        &self.errors
    }

    /// This node and its descendants, strongest first.
    pub fn iter(&self) -> impl Iterator<Item = &PrimIndexNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    fn write_tree(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{} {}", "", self.arc_type, self.site, indent = depth * 2)?;
        if !self.layer_offset.is_identity() {
            write!(f, " {}", self.layer_offset)?;
        }
        if self.is_ancestral {
            f.write_str(" [ancestral]")?;
        }
        if !self.has_specs {
            f.write_str(" [no specs]")?;
        }
        if self.has_deferred_payload {
            f.write_str(" [deferred payload]")?;
        }
        writeln!(f)?;
        for child in &self.children {
            child.write_tree(f, depth + 1)?;
        }
        Ok(())
    }
}

/// The composed index of one prim path.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimIndex {
    path: Path,
    root: PrimIndexNode,
    state: IndexingState,
    payload_state: PayloadState,
    errors: Vec<CompositionError>,
}

impl PrimIndex {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The node holding the prim's local opinions.
    pub fn root_node(&self) -> &PrimIndexNode {
        &self.root
    }

    pub fn state(&self) -> IndexingState {
        self.state
    }

    pub fn payload_state(&self) -> PayloadState {
        self.payload_state
    }

    /// True if a payload introduced at this prim was traversed.
    pub fn included_payload(&self) -> bool {
        matches!(
            self.payload_state,
            PayloadState::IncludedByIncludeSet | PayloadState::IncludedByPredicate
        )
    }

    pub fn has_deferred_payload(&self) -> bool {
        matches!(self.state, IndexingState::Complete { deferred_payload: true })
    }

    /// Every error found while computing this index.
    pub fn errors(&self) -> &[CompositionError] {
        &self.errors
    }

    /// All nodes, strongest first.
    pub fn nodes(&self) -> impl Iterator<Item = &PrimIndexNode> {
        self.root.iter()
    }

    /// True if any contributing site has a spec.
    pub fn has_specs(&self) -> bool {
        self.nodes().any(PrimIndexNode::has_specs)
    }
}

impl fmt::Display for PrimIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Prim index for <{}> ({:?}, {:?})", self.path, self.state, self.payload_state)?;
        self.root.write_tree(f, 1)?;
        for err in &self.errors {
            writeln!(f, "  error: {err}")?;
        }
        Ok(())
    }
}

/// Where a node comes from before it is expanded.
struct NodeSeed {
    arc_type: ArcType,
    site: LayerStackSite,
    authored_path: Path,
    arc_offset: LayerOffset,
    sibling_index: usize,
    is_ancestral: bool,
}

impl From<DiscoveredArc> for NodeSeed {
    fn from(arc: DiscoveredArc) -> Self {
        NodeSeed {
            arc_type: arc.arc_type,
            site: arc.target,
            authored_path: arc.authored_path,
            arc_offset: arc.layer_offset,
            sibling_index: arc.sibling_index,
            is_ancestral: false,
        }
    }
}

/// Upper bound on indexing passes spent settling variant selections.
const MAX_SELECTION_PASSES: usize = 8;

/// Per-computation state. Never shared between threads.
struct Indexing<'p> {
    path: Path,
    payloads: PayloadInclusion<'p>,
    payload_decision: Option<PayloadState>,
    /// Sites on the current recursion path.
    visiting: Vec<LayerStackSite>,
    /// Variant selections from stronger nodes.
    selections: HashMap<String, String>,
    in_template: bool,
    /// Namespace templates built so far, by layer stack and prim path.
    templates: HashMap<(LayerStackIdentifier, Path), Arc<PrimIndexNode>>,
}

impl Indexing<'_> {
    fn include_payload(&mut self) -> bool {
        if self.in_template {
            return self.payloads.decide(&self.path).is_included();
        }
        let (payloads, path) = (self.payloads, &self.path);
        self.payload_decision
            .get_or_insert_with(|| payloads.decide(path))
            .is_included()
    }

    /// True if traversing `arc` would revisit a site on the recursion path,
    /// or a namespace ancestor or descendant of one in the same stack.
    fn is_cycle(&self, arc: &DiscoveredArc) -> bool {
        let target = &arc.target;
        self.visiting.iter().any(|site| {
            if site == target {
                return true;
            }
            if arc.arc_type == ArcType::Variant || !site.same_layer_stack(target) {
                return false;
            }
            let visiting = site.path().strip_all_variant_selections();
            let target = target.path().strip_all_variant_selections();
            visiting.has_prefix(&target) || target.has_prefix(&visiting)
        })
    }
}

/// Finds an already computed index for a prim path in a layer stack.
pub type IndexLookup<'a> = dyn Fn(&LayerStack, &Path) -> Option<Arc<PrimIndex>> + 'a;

/// Builds [`PrimIndex`]es.
pub struct PrimIndexer<'a> {
    discoverer: ArcDiscoverer<'a>,
    computed: Option<&'a IndexLookup<'a>>,
}

impl<'a> PrimIndexer<'a> {
    pub fn new(discoverer: ArcDiscoverer<'a>) -> Self {
        Self {
            discoverer,
            computed: None,
        }
    }

    /// Reuse indexes found by `lookup` as the namespace ancestors of arc
    /// targets instead of rebuilding them.
    pub fn with_computed_indexes(mut self, lookup: &'a IndexLookup<'a>) -> Self {
        self.computed = Some(lookup);
        self
    }

    /// Compute the index of `path` in `layer_stack`.
    ///
    /// `parent` must be the index of `path`'s parent prim; its nodes supply
    /// the ancestral arcs.
    pub fn compute(
        &self,
        path: &Path,
        layer_stack: Arc<LayerStack>,
        parent: Option<&PrimIndex>,
        payloads: PayloadInclusion<'_>,
    ) -> PrimIndex {
        let mut state = IndexingState::Uncomposed;
        let site = LayerStackSite::new(layer_stack.clone(), path);

        if !path.is_absolute_root_path() && !(path.is_absolute_path() && path.is_prim_path()) {
            let err = CompositionError::InvalidPrimPath {
                arc_type: ArcType::Root,
                site: site.to_string(),
                path: path.clone(),
                reason: "prim indexes are computed for absolute prim paths".to_owned(),
            };
            let mut root = self.leaf(ArcType::Root, site, LayerOffset::IDENTITY, false);
            root.errors.push(err.clone());
            return PrimIndex {
                path: path.clone(),
                root,
                state: IndexingState::Error,
                payload_state: PayloadState::NoPayload,
                errors: vec![err],
            };
        }

        if path.is_absolute_root_path() {
            let root = self.leaf(ArcType::Root, site, LayerOffset::IDENTITY, false);
            return PrimIndex {
                path: path.clone(),
                root,
                state: IndexingState::Complete { deferred_payload: false },
                payload_state: PayloadState::NoPayload,
                errors: layer_stack.errors().to_vec(),
            };
        }

        let template = parent.map(|p| &p.root);
        let mut selections = HashMap::new();
        let mut payload_decision = None;
        let mut templates = HashMap::new();
        let mut pass = 1;
        let (root, cx) = loop {
            let mut cx = Indexing {
                path: path.clone(),
                payloads,
                payload_decision,
                visiting: Vec::new(),
                selections,
                in_template: false,
                templates,
            };
            let seed = NodeSeed {
                arc_type: ArcType::Root,
                site: site.clone(),
                authored_path: path.clone(),
                arc_offset: LayerOffset::IDENTITY,
                sibling_index: 0,
                is_ancestral: false,
            };

            let mut root = self.open_node(&mut cx, seed, LayerOffset::IDENTITY, template);
            advance(path, &mut state, IndexingState::LocalOpinionsComposed);

            let arcs = self.discoverer.discover(&root.site, &cx.selections, &mut root.errors);
            advance(path, &mut state, IndexingState::ArcsDiscovered);

            self.expand(&mut cx, &mut root, arcs);
            cx.visiting.pop();
            advance(path, &mut state, IndexingState::ChildrenRecursed);

            // Selections are taken in the order nodes were opened. Redo the
            // pass until they match the strongest authored selections.
            let strongest = self.strongest_selections(&root);
            if strongest == cx.selections {
                break (root, cx);
            }
            if pass == MAX_SELECTION_PASSES {
                log::warn!("Variant selections for <{path}> did not settle after {pass} passes");
                break (root, cx);
            }
            log::trace!("<{path}>: recomposing with variant selections {strongest:?}");
            selections = strongest;
            payload_decision = cx.payload_decision;
            templates = cx.templates;
            state = IndexingState::Uncomposed;
            pass += 1;
        };

        let deferred_payload = root.iter().any(PrimIndexNode::has_deferred_payload);
        advance(path, &mut state, IndexingState::Complete { deferred_payload });

        let payload_state = cx.payload_decision.unwrap_or_else(|| {
            if root.iter().any(|n| n.arc_type == ArcType::Payload && n.is_ancestral) {
                PayloadState::IncludedByAncestor
            } else {
                PayloadState::NoPayload
            }
        });
        let errors = root.iter().flat_map(|n| n.errors.iter().cloned()).collect();

        PrimIndex {
            path: path.clone(),
            root,
            state,
            payload_state,
            errors,
        }
    }

    /// The strongest authored selection per variant set over the nodes of
    /// `root`, visited in strength order.
    fn strongest_selections(&self, root: &PrimIndexNode) -> HashMap<String, String> {
        let composer = self.discoverer.composer();
        let mut selections = HashMap::new();
        for node in root.iter().filter(|n| n.arc_type != ArcType::Relocate) {
            for (set, selection) in composer.compose_variant_selections(&node.site, &mut Vec::new()) {
                selections.entry(set).or_insert(selection);
            }
        }
        selections
    }

    fn build_node(
        &self,
        cx: &mut Indexing<'_>,
        seed: NodeSeed,
        parent_offset: LayerOffset,
        template: Option<&PrimIndexNode>,
    ) -> PrimIndexNode {
        let mut node = self.open_node(cx, seed, parent_offset, template);
        let arcs = self.discoverer.discover(&node.site, &cx.selections, &mut node.errors);
        self.expand(cx, &mut node, arcs);
        cx.visiting.pop();
        node
    }

    /// Create a node, record its variant selections and map the ancestral
    /// nodes of `template` below it. Leaves the node on the recursion path.
    fn open_node(
        &self,
        cx: &mut Indexing<'_>,
        seed: NodeSeed,
        parent_offset: LayerOffset,
        template: Option<&PrimIndexNode>,
    ) -> PrimIndexNode {
        let composer = self.discoverer.composer();
        let mut node = PrimIndexNode {
            arc_type: seed.arc_type,
            has_specs: composer.has_prim_spec(&seed.site),
            site: seed.site,
            authored_path: seed.authored_path,
            arc_offset: seed.arc_offset,
            layer_offset: parent_offset.compose(&seed.arc_offset),
            sibling_index: seed.sibling_index,
            is_ancestral: seed.is_ancestral,
            has_deferred_payload: template.is_some_and(PrimIndexNode::has_deferred_payload),
            children: Vec::new(),
            errors: Vec::new(),
        };
        cx.visiting.push(node.site.clone());

        for (set, selection) in composer.compose_variant_selections(&node.site, &mut node.errors) {
            cx.selections.entry(set).or_insert(selection);
        }

        let Some(template) = template else {
            return node;
        };
        let name = node.authored_path.name().to_owned();
        for ancestral in template.children.iter().filter(|t| t.arc_type != ArcType::Relocate) {
            let authored_path = match ancestral.site.path().append_child(&name) {
                Ok(path) => path,
                Err(err) => {
                    log::trace!("Skipping ancestral node {}: {err:#}", ancestral.site);
                    continue;
                }
            };
            let seed = NodeSeed {
                arc_type: ancestral.arc_type,
                site: ancestral.site.with_path(&authored_path),
                authored_path,
                arc_offset: ancestral.arc_offset,
                sibling_index: ancestral.sibling_index,
                is_ancestral: true,
            };
            let child = self.build_node(cx, seed, node.layer_offset, Some(ancestral));
            node.children.push(child);
        }
        node
    }

    /// Traverse the arcs discovered at `node`, then order its children.
    fn expand(&self, cx: &mut Indexing<'_>, node: &mut PrimIndexNode, arcs: Vec<DiscoveredArc>) {
        for arc in arcs {
            if node.children.iter().any(|c| c.site == arc.target) {
                log::trace!("{} already contributes to {}", arc.target, node.site);
                continue;
            }
            if cx.is_cycle(&arc) {
                let err = CompositionError::ArcCycle {
                    arc_type: arc.arc_type,
                    site: node.site.to_string(),
                    target: arc.target.to_string(),
                };
                log::warn!("{err}");
                node.errors.push(err);
                continue;
            }
            if arc.arc_type == ArcType::Payload && !cx.include_payload() {
                log::debug!("Deferring payload {} at {}", arc.target, node.site);
                node.has_deferred_payload = true;
                continue;
            }

            let template = self.namespace_template(cx, &arc);
            let crosses_stacks = !arc.target.same_layer_stack(&node.site);
            let mut child = self.build_node(cx, NodeSeed::from(arc), node.layer_offset, template.as_deref());
            if crosses_stacks {
                let mut errors = child.site.layer_stack().errors().to_vec();
                errors.append(&mut child.errors);
                child.errors = errors;
            }
            node.children.push(child);
        }

        node.children
            .sort_by_key(|c| (c.arc_type.rank(), c.is_ancestral, c.sibling_index));

        if !node.authored_path.is_empty() && &node.authored_path != node.site.path() {
            let source = LayerStackSite::unrelocated(node.site.layer_stack().clone(), node.authored_path.clone());
            let leaf = self.leaf(ArcType::Relocate, source, node.layer_offset, node.is_ancestral);
            node.children.push(leaf);
        }
    }

    /// The nodes contributing to the namespace parent of an arc's target, so
    /// that arcs authored on the target's ancestors reach the target.
    fn namespace_template(&self, cx: &mut Indexing<'_>, arc: &DiscoveredArc) -> Option<Arc<PrimIndexNode>> {
        if arc.arc_type == ArcType::Variant {
            return None;
        }
        let parent = arc.authored_path.parent_path();
        if parent.is_empty() || parent.is_absolute_root_path() {
            return None;
        }
        Some(self.build_template(cx, arc.target.layer_stack().clone(), parent))
    }

    fn build_template(&self, cx: &mut Indexing<'_>, layer_stack: Arc<LayerStack>, path: Path) -> Arc<PrimIndexNode> {
        let key = (layer_stack.identifier().clone(), path.clone());
        if let Some(template) = cx.templates.get(&key) {
            return template.clone();
        }
        if let Some(index) = self.computed.and_then(|lookup| lookup(&layer_stack, &path)) {
            log::trace!("Reusing the computed index of <{path}> as a namespace template");
            let template = Arc::new(index.root_node().clone());
            cx.templates.insert(key, template.clone());
            return template;
        }

        let parent = path.parent_path();
        let template = if parent.is_empty() || parent.is_absolute_root_path() {
            None
        } else {
            Some(self.build_template(cx, layer_stack.clone(), parent))
        };

        let in_template = std::mem::replace(&mut cx.in_template, true);
        let selections = std::mem::take(&mut cx.selections);
        let seed = NodeSeed {
            arc_type: ArcType::Root,
            site: LayerStackSite::new(layer_stack, &path),
            authored_path: path,
            arc_offset: LayerOffset::IDENTITY,
            sibling_index: 0,
            is_ancestral: false,
        };
        let node = Arc::new(self.build_node(cx, seed, LayerOffset::IDENTITY, template.as_deref()));
        cx.selections = selections;
        cx.in_template = in_template;
        cx.templates.insert(key, node.clone());
        node
    }

    fn leaf(&self, arc_type: ArcType, site: LayerStackSite, layer_offset: LayerOffset, is_ancestral: bool) -> PrimIndexNode {
        PrimIndexNode {
            arc_type,
            has_specs: self.discoverer.composer().has_prim_spec(&site),
            authored_path: site.path().clone(),
            site,
            arc_offset: LayerOffset::IDENTITY,
            layer_offset,
            sibling_index: 0,
            is_ancestral,
            has_deferred_payload: false,
            children: Vec::new(),
            errors: Vec::new(),
        }
    }
}

fn advance(path: &Path, state: &mut IndexingState, next: IndexingState) {
    log::trace!("<{path}>: {state:?} -> {next:?}");
    *state = next;
}
