//! Discovering the composition arcs authored at a site.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::cache::CacheOptions;
use super::compose_site::SiteComposer;
use super::error::CompositionError;
use super::layer_stack::{LayerStack, LayerStackRegistry};
use super::resolver::LayerResolver;
use super::site::LayerStackSite;
use crate::sdf::{FieldKey, LayerHandle, LayerOffset, Path, Schema};

/// Kind of a composition arc, ordered by strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArcType {
    /// The node holding a prim index's local opinions.
    Root,
    Inherit,
    Variant,
    Specialize,
    Reference,
    Payload,
    Relocate,
}

impl ArcType {
    /// Strength rank among sibling arcs, lower is stronger.
    pub const fn rank(self) -> u8 {
        self as u8
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ArcType::Root => "root",
            ArcType::Inherit => "inherit",
            ArcType::Variant => "variant",
            ArcType::Specialize => "specialize",
            ArcType::Reference => "reference",
            ArcType::Payload => "payload",
            ArcType::Relocate => "relocate",
        }
    }
}

impl fmt::Display for ArcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An arc found at a site, not yet traversed.
#[derive(Debug, Clone)]
pub struct DiscoveredArc {
    pub arc_type: ArcType,
    /// Target site, after the target stack's relocations.
    pub target: LayerStackSite,
    /// Target path as authored (or defaulted), before relocation.
    pub authored_path: Path,
    /// Layer that authored a reference or payload.
    pub source_layer: Option<LayerHandle>,
    /// Offset mapping the target's times into the source site's stack.
    pub layer_offset: LayerOffset,
    /// Position among arcs of the same type at the source site.
    pub sibling_index: usize,
}

/// Produces the arcs authored at a site in strength order:
/// inherits, variants, specializes, references, payloads.
pub struct ArcDiscoverer<'a> {
    composer: SiteComposer<'a>,
    resolver: &'a dyn LayerResolver,
    layer_stacks: &'a LayerStackRegistry,
    options: &'a CacheOptions,
}

impl<'a> ArcDiscoverer<'a> {
    pub fn new(
        schema: &'a Schema,
        resolver: &'a dyn LayerResolver,
        layer_stacks: &'a LayerStackRegistry,
        options: &'a CacheOptions,
    ) -> Self {
        Self {
            composer: SiteComposer::new(schema),
            resolver,
            layer_stacks,
            options,
        }
    }

    pub fn composer(&self) -> &SiteComposer<'a> {
        &self.composer
    }

    /// Discover the arcs at `site`.
    ///
    /// `selections` holds variant selections from stronger sites; they win
    /// over the selections authored at `site`. Arcs with invalid targets are
    /// dropped and reported in `errors`.
    pub fn discover(
        &self,
        site: &LayerStackSite,
        selections: &HashMap<String, String>,
        errors: &mut Vec<CompositionError>,
    ) -> Vec<DiscoveredArc> {
        let mut arcs = Vec::new();

        let inherits = self.composer.compose_inherits(site, errors);
        self.add_class_arcs(ArcType::Inherit, site, inherits, &mut arcs, errors);
        self.add_variant_arcs(site, selections, &mut arcs, errors);
        let specializes = self.composer.compose_specializes(site, errors);
        self.add_class_arcs(ArcType::Specialize, site, specializes, &mut arcs, errors);

        for (i, reference) in self.composer.compose_references(site, errors).into_iter().enumerate() {
            let arc = self.resolve_external(
                ArcType::Reference,
                site,
                &reference.item.asset_path,
                &reference.item.prim_path,
                &reference.layer,
                reference.layer_offset,
                i,
                errors,
            );
            arcs.extend(arc);
        }
        for (i, payload) in self.composer.compose_payloads(site, errors).into_iter().enumerate() {
            let arc = self.resolve_external(
                ArcType::Payload,
                site,
                &payload.item.asset_path,
                &payload.item.prim_path,
                &payload.layer,
                payload.layer_offset,
                i,
                errors,
            );
            arcs.extend(arc);
        }

        if !arcs.is_empty() {
            log::debug!("Discovered {} arcs at {site}", arcs.len());
        }
        arcs
    }

    /// Inherit and specialize arcs target prims in the site's own stack.
    fn add_class_arcs(
        &self,
        arc_type: ArcType,
        site: &LayerStackSite,
        paths: Vec<Path>,
        arcs: &mut Vec<DiscoveredArc>,
        errors: &mut Vec<CompositionError>,
    ) {
        for (i, authored) in paths.into_iter().enumerate() {
            if !authored.is_absolute_path() || !authored.is_prim_path() || authored.contains_prim_variant_selection() {
                let reason = "must be an absolute prim path without variant selections";
                drop_arc(errors, invalid_prim_path(arc_type, site, authored, reason));
                continue;
            }
            arcs.push(DiscoveredArc {
                arc_type,
                target: site.with_path(&authored),
                authored_path: authored,
                source_layer: None,
                layer_offset: LayerOffset::IDENTITY,
                sibling_index: i,
            });
        }
    }

    fn add_variant_arcs(
        &self,
        site: &LayerStackSite,
        selections: &HashMap<String, String>,
        arcs: &mut Vec<DiscoveredArc>,
        errors: &mut Vec<CompositionError>,
    ) {
        let set_names = self.composer.compose_variant_set_names(site, errors);
        if set_names.is_empty() {
            return;
        }
        let authored = self.composer.compose_variant_selections(site, errors);

        for (i, set) in set_names.iter().enumerate() {
            let selection = selections
                .get(set)
                .or_else(|| authored.get(set))
                .cloned()
                .or_else(|| self.fallback_selection(site, set));
            let Some(selection) = selection.filter(|s| !s.is_empty()) else {
                log::trace!("No selection for variant set '{set}' at {site}");
                continue;
            };

            match site.path().append_variant_selection(set, &selection) {
                Ok(target_path) => arcs.push(DiscoveredArc {
                    arc_type: ArcType::Variant,
                    target: LayerStackSite::unrelocated(site.layer_stack().clone(), target_path.clone()),
                    authored_path: target_path,
                    source_layer: None,
                    layer_offset: LayerOffset::IDENTITY,
                    sibling_index: i,
                }),
                Err(err) => drop_arc(
                    errors,
                    CompositionError::InvalidFieldValue {
                        field: FieldKey::VariantSelection.as_str().to_owned(),
                        site: site.to_string(),
                        reason: format!("{err:#}"),
                    },
                ),
            }
        }
    }

    /// The first configured fallback naming a variant that exists at `site`.
    fn fallback_selection(&self, site: &LayerStackSite, set: &str) -> Option<String> {
        let fallbacks = self.options.variant_fallbacks.get(set)?;
        let variants = self.composer.compose_variant_names(site, set);
        fallbacks.iter().find(|f| variants.contains(f)).cloned()
    }

    /// Resolve a reference or payload to its target site.
    #[allow(clippy::too_many_arguments)]
    fn resolve_external(
        &self,
        arc_type: ArcType,
        site: &LayerStackSite,
        asset_path: &str,
        prim_path: &Path,
        source_layer: &LayerHandle,
        layer_offset: LayerOffset,
        sibling_index: usize,
        errors: &mut Vec<CompositionError>,
    ) -> Option<DiscoveredArc> {
        let layer_stack: Arc<LayerStack> = if asset_path.is_empty() {
            site.layer_stack().clone()
        } else {
            match self.resolver.open_layer(asset_path, Some(source_layer)) {
                Ok(layer) => self
                    .layer_stacks
                    .find_or_build(&layer, self.resolver, &self.options.muted_layers),
                Err(err) => {
                    drop_arc(
                        errors,
                        CompositionError::InvalidAssetPath {
                            arc_type,
                            site: site.to_string(),
                            asset_path: asset_path.to_owned(),
                            reason: format!("{err:#}"),
                        },
                    );
                    return None;
                }
            }
        };

        let target_path = if prim_path.is_empty() {
            let default_prim = layer_stack.root_layer().default_prim();
            match default_prim.map(|name| Path::abs_root().append_child(&name)) {
                Some(Ok(path)) => path,
                Some(Err(err)) => {
                    drop_arc(errors, unresolved(arc_type, site, asset_path, &format!("{err:#}")));
                    return None;
                }
                None => {
                    let reason = format!("@{}@ has no defaultPrim", layer_stack.root_layer().identifier());
                    drop_arc(errors, unresolved(arc_type, site, asset_path, &reason));
                    return None;
                }
            }
        } else if prim_path.is_absolute_path() && prim_path.is_prim_path() && !prim_path.contains_prim_variant_selection()
        {
            prim_path.clone()
        } else {
            let reason = "must be an absolute prim path without variant selections";
            drop_arc(errors, invalid_prim_path(arc_type, site, prim_path.clone(), reason));
            return None;
        };

        Some(DiscoveredArc {
            arc_type,
            target: LayerStackSite::new(layer_stack, &target_path),
            authored_path: target_path,
            source_layer: Some(source_layer.clone()),
            layer_offset,
            sibling_index,
        })
    }
}

fn drop_arc(errors: &mut Vec<CompositionError>, err: CompositionError) {
    log::warn!("Dropping arc: {err}");
    errors.push(err);
}

fn invalid_prim_path(arc_type: ArcType, site: &LayerStackSite, path: Path, reason: &str) -> CompositionError {
    CompositionError::InvalidPrimPath {
        arc_type,
        site: site.to_string(),
        path,
        reason: reason.to_owned(),
    }
}

fn unresolved(arc_type: ArcType, site: &LayerStackSite, asset_path: &str, reason: &str) -> CompositionError {
    CompositionError::UnresolvedPrimPath {
        arc_type,
        site: site.to_string(),
        asset_path: asset_path.to_owned(),
        reason: reason.to_owned(),
    }
}
