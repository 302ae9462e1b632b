//! Composing field values at a single layer stack site.
//!
//! Opinions are read from every layer of the site's stack that has a spec at
//! the site's path, strongest layer first:
//!
//! - list ops are composed with [`apply_list_ops`]: an explicit opinion hides
//!   everything weaker, incremental opinions accumulate;
//! - dictionaries (and variant selection maps) merge key by key, the strongest
//!   opinion winning per key;
//! - every other value is taken from the strongest opinion, falling back to
//!   the schema's fallback value.

use std::borrow::Cow;
use std::collections::HashMap;

use super::error::CompositionError;
use super::site::LayerStackSite;
use crate::sdf::{
    apply_list_ops, ChildrenKey, Dictionary, FieldKey, LayerHandle, LayerOffset, ListOp, ListOpItem, Path,
    Payload, Reference, Schema, Value,
};

/// One layer's opinion for a field.
#[derive(Debug, Clone)]
pub struct Opinion {
    pub layer: LayerHandle,
    /// Offset of the layer within its stack.
    pub layer_offset: LayerOffset,
    pub value: Value,
}

/// A composed list item with the layer that introduced it.
#[derive(Debug, Clone)]
pub struct Provenance<T> {
    pub item: T,
    pub layer: LayerHandle,
    /// The layer's offset within its stack, composed with any offset
    /// authored on the item itself.
    pub layer_offset: LayerOffset,
}

/// Composes fields at [`LayerStackSite`]s.
#[derive(Debug, Clone, Copy)]
pub struct SiteComposer<'a> {
    schema: &'a Schema,
}

impl<'a> SiteComposer<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    /// True if any layer in the site's stack has a spec at the site's path.
    pub fn has_prim_spec(&self, site: &LayerStackSite) -> bool {
        site.layer_stack()
            .layers()
            .iter()
            .any(|layer| layer.has_spec(site.path()))
    }

    /// Authored opinions for `field`, strongest first.
    ///
    /// Opinions on specs whose type does not allow `field` are skipped and
    /// reported.
    pub fn opinions(&self, site: &LayerStackSite, field: &str, errors: &mut Vec<CompositionError>) -> Vec<Opinion> {
        let mut opinions = Vec::new();
        for (layer, offset) in site.layer_stack().iter() {
            let Some(spec_type) = layer.spec_type(site.path()) else {
                continue;
            };
            let Some(value) = layer.get_field(site.path(), field) else {
                continue;
            };
            if self.schema.is_registered(field) && !self.schema.is_valid_field_for_spec(field, spec_type) {
                log::warn!("Ignoring '{field}' on {spec_type:?} spec in @{}@", layer.identifier());
                errors.push(CompositionError::InvalidFieldValue {
                    field: field.to_owned(),
                    site: format!("@{}@<{}>", layer.identifier(), site.path()),
                    reason: format!("field is not valid for {spec_type:?} specs"),
                });
                continue;
            }
            opinions.push(Opinion {
                layer: layer.clone(),
                layer_offset: *offset,
                value,
            });
        }
        opinions
    }

    /// Compose `field` at `site`.
    ///
    /// Returns the schema fallback when nothing is authored, and `None` when
    /// there is no fallback either. A composed value that fails validation is
    /// reported and still returned.
    pub fn compose_field(
        &self,
        site: &LayerStackSite,
        field: impl AsRef<str>,
        errors: &mut Vec<CompositionError>,
    ) -> Option<Value> {
        let field = field.as_ref();
        let opinions = self.opinions(site, field, errors);
        let Some(strongest) = opinions.first() else {
            return self.schema.fallback(field).cloned();
        };

        let mut owned: Vec<Cow<'_, Value>> = Vec::with_capacity(opinions.len());
        for opinion in &opinions {
            if opinion.value.same_type(&strongest.value) {
                owned.push(Cow::Borrowed(&opinion.value));
                continue;
            }
            match convert_like(&opinion.value, &strongest.value) {
                Some(value) => owned.push(Cow::Owned(value)),
                None => errors.push(CompositionError::InvalidFieldValue {
                    field: field.to_owned(),
                    site: format!("@{}@<{}>", opinion.layer.identifier(), site.path()),
                    reason: format!(
                        "{} opinion is hidden by a stronger {} opinion",
                        opinion.value.type_name(),
                        strongest.value.type_name()
                    ),
                }),
            }
        }
        let values: Vec<&Value> = owned.iter().map(Cow::as_ref).collect();

        let composed = match &strongest.value {
            value if value.is_list_op() => compose_list_op_values(&values),
            Value::Dictionary(_) => Value::Dictionary(merge_dictionaries(
                values.iter().filter_map(|v| v.try_as_dictionary_ref()),
            )),
            Value::VariantSelectionMap(_) => {
                let mut merged = HashMap::new();
                for map in values.iter().filter_map(|v| v.try_as_variant_selection_map_ref()) {
                    for (key, selection) in map {
                        merged.entry(key.clone()).or_insert_with(|| selection.clone());
                    }
                }
                Value::VariantSelectionMap(merged)
            }
            value => value.clone(),
        };

        if self.schema.is_registered(field) {
            if let Err(err) = self.schema.validate(field, &composed) {
                errors.push(CompositionError::InvalidFieldValue {
                    field: field.to_owned(),
                    site: site.to_string(),
                    reason: format!("{err:#}"),
                });
            }
        }
        Some(composed)
    }

    /// Merge a dictionary-valued field across the stack, recursively.
    pub fn compose_dictionary_field(
        &self,
        site: &LayerStackSite,
        field: impl AsRef<str>,
        errors: &mut Vec<CompositionError>,
    ) -> Dictionary {
        let opinions = self.opinions(site, field.as_ref(), errors);
        merge_dictionaries(opinions.iter().filter_map(|o| o.value.try_as_dictionary_ref()))
    }

    pub fn compose_inherits(&self, site: &LayerStackSite, errors: &mut Vec<CompositionError>) -> Vec<Path> {
        self.compose_list(site, FieldKey::InheritPaths.as_str(), errors, Value::try_as_path_list_op_ref)
            .into_iter()
            .map(|p| p.item)
            .collect()
    }

    pub fn compose_specializes(&self, site: &LayerStackSite, errors: &mut Vec<CompositionError>) -> Vec<Path> {
        self.compose_list(site, FieldKey::Specializes.as_str(), errors, Value::try_as_path_list_op_ref)
            .into_iter()
            .map(|p| p.item)
            .collect()
    }

    /// Composed references with the layer that authored each one.
    pub fn compose_references(
        &self,
        site: &LayerStackSite,
        errors: &mut Vec<CompositionError>,
    ) -> Vec<Provenance<Reference>> {
        self.compose_list(site, FieldKey::References.as_str(), errors, Value::try_as_reference_list_op_ref)
            .into_iter()
            .map(|mut p| {
                p.layer_offset = p.layer_offset.compose(&p.item.layer_offset);
                p
            })
            .collect()
    }

    /// Composed payloads with the layer that authored each one.
    pub fn compose_payloads(&self, site: &LayerStackSite, errors: &mut Vec<CompositionError>) -> Vec<Provenance<Payload>> {
        self.compose_list(site, FieldKey::Payload.as_str(), errors, Value::try_as_payload_list_op_ref)
            .into_iter()
            .map(|mut p| {
                if let Some(offset) = &p.item.layer_offset {
                    p.layer_offset = p.layer_offset.compose(offset);
                }
                p
            })
            .collect()
    }

    pub fn compose_variant_set_names(&self, site: &LayerStackSite, errors: &mut Vec<CompositionError>) -> Vec<String> {
        let field = FieldKey::VariantSetNames.as_str();
        let ops: Vec<ListOp<String>> = self
            .opinions(site, field, errors)
            .into_iter()
            .filter_map(|o| match o.value {
                Value::StringListOp(op) | Value::TokenListOp(op) => Some(op),
                _ => None,
            })
            .collect();
        apply_list_ops(ops.iter())
    }

    /// Variant selections, strongest opinion per variant set.
    pub fn compose_variant_selections(
        &self,
        site: &LayerStackSite,
        errors: &mut Vec<CompositionError>,
    ) -> HashMap<String, String> {
        match self.compose_field(site, FieldKey::VariantSelection, errors) {
            Some(Value::VariantSelectionMap(map)) => map,
            _ => HashMap::new(),
        }
    }

    /// Names of the variants authored for `variant_set` at the site's prim.
    pub fn compose_variant_names(&self, site: &LayerStackSite, variant_set: &str) -> Vec<String> {
        let Ok(set_path) = site.path().append_variant_selection(variant_set, "") else {
            return Vec::new();
        };
        let mut names: Vec<String> = Vec::new();
        for layer in site.layer_stack().layers() {
            if let Some(Value::TokenVec(variants)) = layer.get_field(&set_path, ChildrenKey::VariantChildren) {
                for name in variants {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
        }
        names
    }

    /// Child prim names, strongest layer first, ordered by `primOrder`.
    pub fn compose_prim_child_names(&self, site: &LayerStackSite, errors: &mut Vec<CompositionError>) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for layer in site.layer_stack().layers() {
            if let Some(Value::TokenVec(children)) = layer.get_field(site.path(), ChildrenKey::PrimChildren) {
                for name in children {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
        }

        let order = self
            .opinions(site, FieldKey::PrimOrder.as_str(), errors)
            .into_iter()
            .find_map(|o| match o.value {
                Value::TokenVec(order) | Value::StringVec(order) => Some(order),
                _ => None,
            });
        match order {
            Some(order) if !order.is_empty() => ListOp::reorder(order).apply_to(&names),
            _ => names,
        }
    }

    /// Compose a typed list op and attribute each resulting item to the
    /// strongest layer whose opinion inserts it.
    fn compose_list<T, F>(
        &self,
        site: &LayerStackSite,
        field: &str,
        errors: &mut Vec<CompositionError>,
        extract: F,
    ) -> Vec<Provenance<T>>
    where
        T: ListOpItem,
        F: Fn(&Value) -> Option<&ListOp<T>>,
    {
        let opinions = self.opinions(site, field, errors);
        let mut typed: Vec<(&Opinion, &ListOp<T>)> = Vec::new();
        for opinion in &opinions {
            match extract(&opinion.value) {
                Some(op) => typed.push((opinion, op)),
                None => errors.push(CompositionError::InvalidFieldValue {
                    field: field.to_owned(),
                    site: format!("@{}@<{}>", opinion.layer.identifier(), site.path()),
                    reason: format!("unexpected value of type {}", opinion.value.type_name()),
                }),
            }
        }

        let items = apply_list_ops(typed.iter().map(|(_, op)| *op));
        let mut result = Vec::with_capacity(items.len());
        for item in items {
            let key = item.key();
            let source = typed
                .iter()
                .find(|(_, op)| op.iter_inserted().any(|i| i.key() == key))
                .or_else(|| typed.first())
                .map(|(opinion, _)| *opinion);
            if let Some(opinion) = source {
                result.push(Provenance {
                    item,
                    layer: opinion.layer.clone(),
                    layer_offset: opinion.layer_offset,
                });
            }
        }
        result
    }
}

/// Merge dictionaries given strongest first. Nested dictionaries merge
/// recursively; any other value is taken from the strongest dictionary.
pub fn merge_dictionaries<'d>(dictionaries: impl IntoIterator<Item = &'d Dictionary>) -> Dictionary {
    let mut merged = Dictionary::new();
    for dictionary in dictionaries {
        merge_weaker(&mut merged, dictionary);
    }
    merged
}

fn merge_weaker(stronger: &mut Dictionary, weaker: &Dictionary) {
    for (key, value) in weaker {
        match (stronger.get_mut(key), value) {
            (None, value) => {
                stronger.insert(key.clone(), value.clone());
            }
            (Some(Value::Dictionary(strong)), Value::Dictionary(weak)) => merge_weaker(strong, weak),
            (Some(_), _) => {}
        }
    }
}

/// `value` re-expressed with the type of `like`, for the string and token list
/// ops that hold the same items.
fn convert_like(value: &Value, like: &Value) -> Option<Value> {
    match (value, like) {
        (Value::StringListOp(op) | Value::TokenListOp(op), Value::TokenListOp(_)) => Some(Value::TokenListOp(op.clone())),
        (Value::StringListOp(op) | Value::TokenListOp(op), Value::StringListOp(_)) => {
            Some(Value::StringListOp(op.clone()))
        }
        _ => None,
    }
}

fn compose_list_op_values(values: &[&Value]) -> Value {
    macro_rules! compose {
        ($variant:ident) => {{
            let ops = values.iter().filter_map(|v| match v {
                Value::$variant(op) => Some(op),
                _ => None,
            });
            Value::$variant(ListOp::Explicit(apply_list_ops(ops)))
        }};
    }

    match values.first() {
        Some(Value::IntListOp(_)) => compose!(IntListOp),
        Some(Value::Int64ListOp(_)) => compose!(Int64ListOp),
        Some(Value::UIntListOp(_)) => compose!(UIntListOp),
        Some(Value::UInt64ListOp(_)) => compose!(UInt64ListOp),
        Some(Value::StringListOp(_)) => compose!(StringListOp),
        Some(Value::TokenListOp(_)) => compose!(TokenListOp),
        Some(Value::PathListOp(_)) => compose!(PathListOp),
        Some(Value::ReferenceListOp(_)) => compose!(ReferenceListOp),
        Some(Value::PayloadListOp(_)) => compose!(PayloadListOp),
        Some(other) => (*other).clone(),
        None => Value::PathListOp(ListOp::default()),
    }
}
