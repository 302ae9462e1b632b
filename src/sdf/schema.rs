//! Field and spec definitions.
//!
//! A [`Schema`] declares which fields exist, their fallback values and
//! validators, and which fields each [`SpecType`] may hold. It is plain data:
//! built once with [`Schema::new`], optionally extended with plugin metadata,
//! and then shared (usually as an `Arc<Schema>`) by everything that composes
//! scene description.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};

use super::path::{is_identifier, is_namespaced_identifier, is_variant_identifier, Path};
use super::value::{LayerOffset, Payload, Reference, Specifier, Value};
use super::ListOp;

/// The kind of a spec stored in a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpecType {
    PseudoRoot,
    Prim,
    Attribute,
    Relationship,
    Variant,
    VariantSet,
}

impl SpecType {
    pub const ALL: [SpecType; 6] = [
        SpecType::PseudoRoot,
        SpecType::Prim,
        SpecType::Attribute,
        SpecType::Relationship,
        SpecType::Variant,
        SpecType::VariantSet,
    ];

    /// Infer the spec type for a path that has no explicit type.
    pub fn for_path(path: &Path) -> SpecType {
        if path.is_absolute_root_path() {
            SpecType::PseudoRoot
        } else if path.is_property_path() {
            SpecType::Attribute
        } else if let Some((_, selection)) = path.variant_selection() {
            if selection.is_empty() {
                SpecType::VariantSet
            } else {
                SpecType::Variant
            }
        } else {
            SpecType::Prim
        }
    }
}

/// Standard field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKey {
    Active,
    AssetInfo,
    Comment,
    ConnectionPaths,
    Custom,
    CustomData,
    CustomLayerData,
    Default,
    DefaultPrim,
    DisplayGroup,
    DisplayName,
    Documentation,
    EndTimeCode,
    FramesPerSecond,
    Hidden,
    InheritPaths,
    Instanceable,
    Kind,
    LayerRelocates,
    Owner,
    Payload,
    PrimOrder,
    PropertyOrder,
    References,
    Relocates,
    SessionOwner,
    Specializes,
    Specifier,
    StartTimeCode,
    SubLayers,
    SubLayerOffsets,
    TargetPaths,
    TimeCodesPerSecond,
    TimeSamples,
    TypeName,
    Variability,
    VariantSelection,
    VariantSetNames,
}

impl FieldKey {
    pub const fn as_str(self) -> &'static str {
        match self {
            FieldKey::Active => "active",
            FieldKey::AssetInfo => "assetInfo",
            FieldKey::Comment => "comment",
            FieldKey::ConnectionPaths => "connectionPaths",
            FieldKey::Custom => "custom",
            FieldKey::CustomData => "customData",
            FieldKey::CustomLayerData => "customLayerData",
            FieldKey::Default => "default",
            FieldKey::DefaultPrim => "defaultPrim",
            FieldKey::DisplayGroup => "displayGroup",
            FieldKey::DisplayName => "displayName",
            FieldKey::Documentation => "documentation",
            FieldKey::EndTimeCode => "endTimeCode",
            FieldKey::FramesPerSecond => "framesPerSecond",
            FieldKey::Hidden => "hidden",
            FieldKey::InheritPaths => "inheritPaths",
            FieldKey::Instanceable => "instanceable",
            FieldKey::Kind => "kind",
            FieldKey::LayerRelocates => "layerRelocates",
            FieldKey::Owner => "owner",
            FieldKey::Payload => "payload",
            FieldKey::PrimOrder => "primOrder",
            FieldKey::PropertyOrder => "propertyOrder",
            FieldKey::References => "references",
            FieldKey::Relocates => "relocates",
            FieldKey::SessionOwner => "sessionOwner",
            FieldKey::Specializes => "specializes",
            FieldKey::Specifier => "specifier",
            FieldKey::StartTimeCode => "startTimeCode",
            FieldKey::SubLayers => "subLayers",
            FieldKey::SubLayerOffsets => "subLayerOffsets",
            FieldKey::TargetPaths => "targetPaths",
            FieldKey::TimeCodesPerSecond => "timeCodesPerSecond",
            FieldKey::TimeSamples => "timeSamples",
            FieldKey::TypeName => "typeName",
            FieldKey::Variability => "variability",
            FieldKey::VariantSelection => "variantSelection",
            FieldKey::VariantSetNames => "variantSetNames",
        }
    }
}

impl AsRef<str> for FieldKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Fields that list the names of child specs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildrenKey {
    PrimChildren,
    PropertyChildren,
    VariantChildren,
    VariantSetChildren,
}

impl ChildrenKey {
    pub const fn as_str(self) -> &'static str {
        match self {
            ChildrenKey::PrimChildren => "primChildren",
            ChildrenKey::PropertyChildren => "properties",
            ChildrenKey::VariantChildren => "variantChildren",
            ChildrenKey::VariantSetChildren => "variantSetChildren",
        }
    }
}

impl AsRef<str> for ChildrenKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

type ValidatorFn = dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync;

/// Checks a value (or one element of a list or map value).
#[derive(Clone)]
pub enum FieldValidator {
    /// A string or token that is a valid identifier.
    Identifier,
    /// A string or token made of `:`-separated identifiers.
    NamespacedIdentifier,
    /// A variant name. The empty string is allowed and means "no selection".
    VariantIdentifier,
    /// An absolute prim path without variant selections.
    AbsolutePrimPath,
    /// A prim path (absolute or relative) without variant selections.
    PrimPath,
    /// A reference or payload: prim path empty or a prim path, valid layer offset.
    Reference,
    /// A non-empty asset path.
    AssetPath,
    /// A finite, strictly positive number.
    PositiveFinite,
    /// A list of valid layer offsets.
    LayerOffsets,
    Custom(Arc<ValidatorFn>),
}

impl fmt::Debug for FieldValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValidator::Identifier => f.write_str("Identifier"),
            FieldValidator::NamespacedIdentifier => f.write_str("NamespacedIdentifier"),
            FieldValidator::VariantIdentifier => f.write_str("VariantIdentifier"),
            FieldValidator::AbsolutePrimPath => f.write_str("AbsolutePrimPath"),
            FieldValidator::PrimPath => f.write_str("PrimPath"),
            FieldValidator::Reference => f.write_str("Reference"),
            FieldValidator::AssetPath => f.write_str("AssetPath"),
            FieldValidator::PositiveFinite => f.write_str("PositiveFinite"),
            FieldValidator::LayerOffsets => f.write_str("LayerOffsets"),
            FieldValidator::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl FieldValidator {
    pub fn custom(f: impl Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static) -> Self {
        FieldValidator::Custom(Arc::new(f))
    }

    pub fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        match self {
            FieldValidator::Identifier => {
                let name = text(value)?;
                check(is_identifier(name), || format!("'{name}' is not a valid identifier"))
            }
            FieldValidator::NamespacedIdentifier => {
                let name = text(value)?;
                check(is_namespaced_identifier(name), || {
                    format!("'{name}' is not a valid namespaced identifier")
                })
            }
            FieldValidator::VariantIdentifier => {
                let name = text(value)?;
                check(name.is_empty() || is_variant_identifier(name), || {
                    format!("'{name}' is not a valid variant name")
                })
            }
            FieldValidator::AbsolutePrimPath => {
                let path = path_value(value)?;
                check(
                    path.is_absolute_path() && path.is_prim_path() && !path.contains_prim_variant_selection(),
                    || format!("<{path}> is not an absolute prim path"),
                )
            }
            FieldValidator::PrimPath => {
                let path = path_value(value)?;
                check(path.is_prim_path() && !path.contains_prim_variant_selection(), || {
                    format!("<{path}> is not a prim path")
                })
            }
            FieldValidator::Reference => match value {
                Value::Reference(Reference {
                    prim_path,
                    layer_offset,
                    ..
                }) => validate_arc(prim_path, Some(layer_offset)),
                Value::Payload(Payload {
                    prim_path,
                    layer_offset,
                    ..
                }) => validate_arc(prim_path, layer_offset.as_ref()),
                other => Err(format!("expected reference or payload, got {}", other.type_name())),
            },
            FieldValidator::AssetPath => {
                let asset = text(value)?;
                check(!asset.is_empty(), || "asset path is empty".to_owned())
            }
            FieldValidator::PositiveFinite => {
                let number = value
                    .try_as_double()
                    .ok_or_else(|| format!("expected a number, got {}", value.type_name()))?;
                check(number.is_finite() && number > 0.0, || {
                    format!("{number} is not a positive number")
                })
            }
            FieldValidator::LayerOffsets => {
                let offsets = value
                    .try_as_layer_offset_vec_ref()
                    .ok_or_else(|| format!("expected layer offsets, got {}", value.type_name()))?;
                match offsets.iter().find(|o| !o.is_valid()) {
                    Some(bad) => Err(format!("invalid layer offset {bad}")),
                    None => Ok(()),
                }
            }
            FieldValidator::Custom(f) => f(value),
        }
    }
}

fn check(ok: bool, message: impl FnOnce() -> String) -> std::result::Result<(), String> {
    if ok {
        Ok(())
    } else {
        Err(message())
    }
}

fn text(value: &Value) -> std::result::Result<&str, String> {
    match value {
        Value::String(s) | Value::Token(s) | Value::AssetPath(s) => Ok(s),
        other => Err(format!("expected a string, got {}", other.type_name())),
    }
}

fn path_value(value: &Value) -> std::result::Result<&Path, String> {
    match value {
        Value::Path(p) => Ok(p),
        other => Err(format!("expected a path, got {}", other.type_name())),
    }
}

fn validate_arc(prim_path: &Path, offset: Option<&LayerOffset>) -> std::result::Result<(), String> {
    if !prim_path.is_empty() && (!prim_path.is_prim_path() || prim_path.contains_prim_variant_selection()) {
        return Err(format!("<{prim_path}> is not a valid prim path for a reference"));
    }
    match offset {
        Some(offset) if !offset.is_valid() => Err(format!("invalid layer offset {offset}")),
        _ => Ok(()),
    }
}

/// Definition of a single field.
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    name: String,
    fallback: Option<Value>,
    read_only: bool,
    holds_children: bool,
    plugin: Option<String>,
    value_validator: Option<FieldValidator>,
    list_value_validator: Option<FieldValidator>,
    map_key_validator: Option<FieldValidator>,
    map_value_validator: Option<FieldValidator>,
    info: BTreeMap<String, serde_json::Value>,
}

impl FieldDefinition {
    fn new(name: &str, fallback: Option<Value>) -> Self {
        Self {
            name: name.to_owned(),
            fallback,
            read_only: false,
            holds_children: false,
            plugin: None,
            value_validator: None,
            list_value_validator: None,
            map_key_validator: None,
            map_value_validator: None,
            info: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fallback(&self) -> Option<&Value> {
        self.fallback.as_ref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn holds_children(&self) -> bool {
        self.holds_children
    }

    /// Path of the plugin that declared this field, if any.
    pub fn plugin(&self) -> Option<&str> {
        self.plugin.as_deref()
    }

    /// Extra keys carried by a plugin declaration.
    pub fn info(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.info
    }

    pub fn read_only(&mut self) -> &mut Self {
        self.read_only = true;
        self
    }

    pub fn children(&mut self) -> &mut Self {
        self.holds_children = true;
        self.read_only = true;
        self
    }

    pub fn value_validator(&mut self, validator: FieldValidator) -> &mut Self {
        self.value_validator = Some(validator);
        self
    }

    pub fn list_value_validator(&mut self, validator: FieldValidator) -> &mut Self {
        self.list_value_validator = Some(validator);
        self
    }

    pub fn map_key_validator(&mut self, validator: FieldValidator) -> &mut Self {
        self.map_key_validator = Some(validator);
        self
    }

    pub fn map_value_validator(&mut self, validator: FieldValidator) -> &mut Self {
        self.map_value_validator = Some(validator);
        self
    }

    pub(crate) fn set_plugin(&mut self, plugin: &str, info: BTreeMap<String, serde_json::Value>) -> &mut Self {
        self.plugin = Some(plugin.to_owned());
        self.info = info;
        self
    }

    /// Run every validator that applies to `value`.
    pub fn validate(&self, value: &Value) -> Result<()> {
        if let Some(fallback) = &self.fallback {
            if !compatible(fallback, value) {
                bail!(
                    "field '{}' expects {}, got {}",
                    self.name,
                    fallback.type_name(),
                    value.type_name()
                );
            }
        }

        let prefix = |e: String| anyhow!("field '{}': {e}", self.name);

        if let Some(validator) = &self.value_validator {
            validator.validate(value).map_err(prefix)?;
        }
        if let Some(validator) = &self.list_value_validator {
            for element in value.list_elements().unwrap_or_default() {
                validator.validate(&element).map_err(prefix)?;
            }
        }
        if self.map_key_validator.is_some() || self.map_value_validator.is_some() {
            for (key, item) in value.map_entries().unwrap_or_default() {
                if let Some(validator) = &self.map_key_validator {
                    validator.validate(&key).map_err(prefix)?;
                }
                if let Some(validator) = &self.map_value_validator {
                    validator.validate(&item).map_err(prefix)?;
                }
            }
        }
        Ok(())
    }
}

// Strings and tokens are interchangeable on input.
fn compatible(fallback: &Value, value: &Value) -> bool {
    if fallback.same_type(value) {
        return true;
    }
    matches!(
        (fallback, value),
        (Value::Token(_), Value::String(_))
            | (Value::String(_), Value::Token(_))
            | (Value::TokenVec(_), Value::StringVec(_))
            | (Value::StringVec(_), Value::TokenVec(_))
            | (Value::TokenListOp(_), Value::StringListOp(_))
            | (Value::StringListOp(_), Value::TokenListOp(_))
    )
}

/// How a field participates in a spec type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldInfo {
    pub required: bool,
    pub metadata: bool,
    pub children: bool,
    pub display_group: Option<String>,
}

/// The fields a spec type may hold.
#[derive(Debug, Clone, Default)]
pub struct SpecDefinition {
    fields: BTreeMap<String, FieldInfo>,
}

impl SpecDefinition {
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn field_info(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.get(name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.filter(|info| info.required)
    }

    pub fn metadata_fields(&self) -> impl Iterator<Item = &str> {
        self.filter(|info| info.metadata)
    }

    pub fn children_fields(&self) -> impl Iterator<Item = &str> {
        self.filter(|info| info.children)
    }

    pub fn is_valid_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn is_metadata_field(&self, name: &str) -> bool {
        self.fields.get(name).is_some_and(|info| info.metadata)
    }

    pub fn is_required_field(&self, name: &str) -> bool {
        self.fields.get(name).is_some_and(|info| info.required)
    }

    pub fn metadata_field_display_group(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|info| info.display_group.as_deref())
    }

    fn filter<'a>(&'a self, pred: impl Fn(&FieldInfo) -> bool + 'a) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(_, info)| pred(info))
            .map(|(name, _)| name.as_str())
    }
}

/// Adds fields to one [`SpecDefinition`], checking that each is registered.
pub struct SpecDefiner<'a> {
    spec_type: SpecType,
    fields: &'a HashMap<String, FieldDefinition>,
    definition: &'a mut SpecDefinition,
}

impl SpecDefiner<'_> {
    fn insert(&mut self, name: &str, info: FieldInfo) -> &mut Self {
        let Some(field) = self.fields.get(name) else {
            panic!("Field '{name}' must be registered before it is added to {:?} specs", self.spec_type);
        };
        let info = FieldInfo {
            children: field.holds_children,
            ..info
        };
        self.definition.fields.insert(name.to_owned(), info);
        self
    }

    pub fn field(&mut self, name: impl AsRef<str>) -> &mut Self {
        self.insert(name.as_ref(), FieldInfo::default())
    }

    pub fn required_field(&mut self, name: impl AsRef<str>) -> &mut Self {
        self.insert(
            name.as_ref(),
            FieldInfo {
                required: true,
                ..Default::default()
            },
        )
    }

    pub fn metadata_field(&mut self, name: impl AsRef<str>) -> &mut Self {
        self.insert(
            name.as_ref(),
            FieldInfo {
                metadata: true,
                ..Default::default()
            },
        )
    }

    pub fn metadata_field_in_group(&mut self, name: impl AsRef<str>, group: Option<&str>) -> &mut Self {
        self.insert(
            name.as_ref(),
            FieldInfo {
                metadata: true,
                display_group: group.map(str::to_owned),
                ..Default::default()
            },
        )
    }
}

/// Registry of field and spec definitions.
#[derive(Debug, Clone)]
pub struct Schema {
    fields: HashMap<String, FieldDefinition>,
    specs: HashMap<SpecType, SpecDefinition>,
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

impl Schema {
    /// A schema with no fields and empty spec definitions.
    pub fn empty() -> Self {
        Self {
            fields: HashMap::new(),
            specs: SpecType::ALL
                .iter()
                .map(|ty| (*ty, SpecDefinition::default()))
                .collect(),
        }
    }

    /// A schema holding the standard scene description fields.
    pub fn new() -> Self {
        let mut schema = Self::empty();
        schema.register_standard_fields();
        schema.define_standard_specs();
        schema
    }

    /// Register a field.
    ///
    /// # Panics
    ///
    /// Panics if a field with the same name is already registered.
    pub fn register_field(&mut self, name: impl AsRef<str>, fallback: Option<Value>) -> &mut FieldDefinition {
        let name = name.as_ref();
        match self.try_register_field(name, fallback) {
            Some(field) => field,
            None => panic!("Duplicate registration of field '{name}'"),
        }
    }

    /// Register a field unless the name is taken.
    pub(crate) fn try_register_field(&mut self, name: &str, fallback: Option<Value>) -> Option<&mut FieldDefinition> {
        use std::collections::hash_map::Entry;

        match self.fields.entry(name.to_owned()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => Some(entry.insert(FieldDefinition::new(name, fallback))),
        }
    }

    /// Add fields to the definition of `spec_type`.
    pub fn define(&mut self, spec_type: SpecType) -> SpecDefiner<'_> {
        SpecDefiner {
            spec_type,
            fields: &self.fields,
            definition: self.specs.entry(spec_type).or_default(),
        }
    }

    pub fn field_definition(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.get(name)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn fallback(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).and_then(FieldDefinition::fallback)
    }

    pub fn holds_children(&self, name: &str) -> bool {
        self.fields.get(name).is_some_and(FieldDefinition::holds_children)
    }

    pub fn spec_definition(&self, spec_type: SpecType) -> Option<&SpecDefinition> {
        self.specs.get(&spec_type)
    }

    pub fn is_valid_field_for_spec(&self, name: &str, spec_type: SpecType) -> bool {
        self.specs
            .get(&spec_type)
            .is_some_and(|definition| definition.is_valid_field(name))
    }

    /// Validate `value` against the definition of `field`.
    pub fn validate(&self, field: &str, value: &Value) -> Result<()> {
        match self.fields.get(field) {
            Some(definition) => definition.validate(value),
            None => bail!("field '{field}' is not registered"),
        }
    }

    fn register_standard_fields(&mut self) {
        use FieldValidator as V;

        let empty_dict = || Some(Value::Dictionary(Default::default()));
        let string = || Some(Value::String(String::new()));
        let token = |s: &str| Some(Value::Token(s.to_owned()));

        self.register_field(FieldKey::Active, Some(Value::Bool(true)));
        self.register_field(FieldKey::AssetInfo, empty_dict());
        self.register_field(FieldKey::Comment, string());
        self.register_field(FieldKey::ConnectionPaths, Some(Value::PathListOp(ListOp::default())))
            .list_value_validator(V::PrimPath.or_property());
        self.register_field(FieldKey::Custom, Some(Value::Bool(false)));
        self.register_field(FieldKey::CustomData, empty_dict());
        self.register_field(FieldKey::CustomLayerData, empty_dict());
        self.register_field(FieldKey::Default, None);
        self.register_field(FieldKey::DefaultPrim, token(""))
            .value_validator(V::Identifier);
        self.register_field(FieldKey::DisplayGroup, string());
        self.register_field(FieldKey::DisplayName, string());
        self.register_field(FieldKey::Documentation, string());
        self.register_field(FieldKey::EndTimeCode, Some(Value::Double(0.0)));
        self.register_field(FieldKey::FramesPerSecond, Some(Value::Double(24.0)))
            .value_validator(V::PositiveFinite);
        self.register_field(FieldKey::Hidden, Some(Value::Bool(false)));
        self.register_field(FieldKey::InheritPaths, Some(Value::PathListOp(ListOp::default())))
            .list_value_validator(V::AbsolutePrimPath);
        self.register_field(FieldKey::Instanceable, Some(Value::Bool(false)));
        self.register_field(FieldKey::Kind, token(""));
        self.register_field(FieldKey::LayerRelocates, Some(Value::Relocates(Vec::new())))
            .map_key_validator(V::PrimPath)
            .map_value_validator(V::PrimPath);
        self.register_field(FieldKey::Owner, string());
        self.register_field(FieldKey::Payload, Some(Value::PayloadListOp(ListOp::default())))
            .list_value_validator(V::Reference);
        self.register_field(FieldKey::PrimOrder, Some(Value::TokenVec(Vec::new())))
            .list_value_validator(V::Identifier);
        self.register_field(FieldKey::PropertyOrder, Some(Value::TokenVec(Vec::new())))
            .list_value_validator(V::NamespacedIdentifier);
        self.register_field(FieldKey::References, Some(Value::ReferenceListOp(ListOp::default())))
            .list_value_validator(V::Reference);
        self.register_field(FieldKey::Relocates, Some(Value::Relocates(Vec::new())))
            .map_key_validator(V::PrimPath)
            .map_value_validator(V::PrimPath);
        self.register_field(FieldKey::SessionOwner, string());
        self.register_field(FieldKey::Specializes, Some(Value::PathListOp(ListOp::default())))
            .list_value_validator(V::AbsolutePrimPath);
        self.register_field(FieldKey::Specifier, Some(Value::Specifier(Specifier::Over)));
        self.register_field(FieldKey::StartTimeCode, Some(Value::Double(0.0)));
        self.register_field(FieldKey::SubLayers, Some(Value::StringVec(Vec::new())))
            .list_value_validator(V::AssetPath);
        self.register_field(FieldKey::SubLayerOffsets, Some(Value::LayerOffsetVec(Vec::new())))
            .value_validator(V::LayerOffsets);
        self.register_field(FieldKey::TargetPaths, Some(Value::PathListOp(ListOp::default())))
            .list_value_validator(V::PrimPath.or_property());
        self.register_field(FieldKey::TimeCodesPerSecond, Some(Value::Double(24.0)))
            .value_validator(V::PositiveFinite);
        self.register_field(FieldKey::TimeSamples, None);
        self.register_field(FieldKey::TypeName, token(""));
        self.register_field(FieldKey::Variability, token("varying"));
        self.register_field(FieldKey::VariantSelection, Some(Value::VariantSelectionMap(Default::default())))
            .map_key_validator(V::Identifier)
            .map_value_validator(V::VariantIdentifier);
        self.register_field(FieldKey::VariantSetNames, Some(Value::StringListOp(ListOp::default())))
            .list_value_validator(V::Identifier);

        for key in [
            ChildrenKey::PrimChildren,
            ChildrenKey::PropertyChildren,
            ChildrenKey::VariantChildren,
            ChildrenKey::VariantSetChildren,
        ] {
            self.register_field(key, Some(Value::TokenVec(Vec::new()))).children();
        }
    }

    fn define_standard_specs(&mut self) {
        self.define(SpecType::PseudoRoot)
            .metadata_field(FieldKey::Comment)
            .metadata_field(FieldKey::CustomLayerData)
            .metadata_field(FieldKey::DefaultPrim)
            .metadata_field(FieldKey::Documentation)
            .metadata_field(FieldKey::EndTimeCode)
            .metadata_field(FieldKey::FramesPerSecond)
            .metadata_field(FieldKey::LayerRelocates)
            .metadata_field(FieldKey::Owner)
            .metadata_field(FieldKey::PrimOrder)
            .metadata_field(FieldKey::SessionOwner)
            .metadata_field(FieldKey::StartTimeCode)
            .metadata_field(FieldKey::TimeCodesPerSecond)
            .field(FieldKey::SubLayers)
            .field(FieldKey::SubLayerOffsets)
            .field(ChildrenKey::PrimChildren);

        // Variants hold everything a prim can hold.
        for spec_type in [SpecType::Prim, SpecType::Variant] {
            self.define(spec_type)
                .required_field(FieldKey::Specifier)
                .field(FieldKey::TypeName)
                .field(ChildrenKey::PrimChildren)
                .field(ChildrenKey::PropertyChildren)
                .field(ChildrenKey::VariantSetChildren)
                .metadata_field(FieldKey::Active)
                .metadata_field(FieldKey::AssetInfo)
                .metadata_field(FieldKey::Comment)
                .metadata_field(FieldKey::CustomData)
                .metadata_field(FieldKey::DisplayName)
                .metadata_field(FieldKey::Documentation)
                .metadata_field(FieldKey::Hidden)
                .metadata_field(FieldKey::InheritPaths)
                .metadata_field(FieldKey::Instanceable)
                .metadata_field(FieldKey::Kind)
                .metadata_field(FieldKey::Payload)
                .metadata_field(FieldKey::PrimOrder)
                .metadata_field(FieldKey::PropertyOrder)
                .metadata_field(FieldKey::References)
                .metadata_field(FieldKey::Relocates)
                .metadata_field(FieldKey::Specializes)
                .metadata_field(FieldKey::VariantSelection)
                .metadata_field(FieldKey::VariantSetNames);
        }

        for spec_type in [SpecType::Attribute, SpecType::Relationship] {
            self.define(spec_type)
                .required_field(FieldKey::Custom)
                .required_field(FieldKey::Variability)
                .metadata_field(FieldKey::AssetInfo)
                .metadata_field(FieldKey::Comment)
                .metadata_field(FieldKey::CustomData)
                .metadata_field(FieldKey::DisplayGroup)
                .metadata_field(FieldKey::DisplayName)
                .metadata_field(FieldKey::Documentation)
                .metadata_field(FieldKey::Hidden);
        }

        self.define(SpecType::Attribute)
            .required_field(FieldKey::TypeName)
            .field(FieldKey::Default)
            .field(FieldKey::TimeSamples)
            .field(FieldKey::ConnectionPaths);

        self.define(SpecType::Relationship).field(FieldKey::TargetPaths);

        self.define(SpecType::VariantSet).field(ChildrenKey::VariantChildren);
    }
}

impl FieldValidator {
    /// Accept a prim path or a property path below one.
    fn or_property(self) -> FieldValidator {
        FieldValidator::custom(move |value| match value {
            Value::Path(path) if path.is_property_path() => self.validate(&Value::Path(path.parent_path())),
            other => self.validate(other),
        })
    }
}
