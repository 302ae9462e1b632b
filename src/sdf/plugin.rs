//! Plugin-contributed metadata fields.
//!
//! Plugins declare extra metadata in a JSON object under the `SdfMetadata`
//! key:
//!
//! ```json
//! {
//!     "SdfMetadata": {
//!         "hue": { "type": "double3", "default": [1, 0, 0], "appliesTo": "prims" },
//!         "tags": { "type": "token[]", "displayGroup": "Pipeline" }
//!     }
//! }
//! ```
//!
//! Each well-formed declaration registers a new field and adds it as a
//! metadata field to the spec types named by `appliesTo`. Malformed
//! declarations are reported and skipped without affecting the others.

use std::collections::BTreeMap;

use anyhow::{bail, ensure, Result};
use serde_json::Value as Json;
use thiserror::Error;

use super::list_op::ListOp;
use super::schema::{Schema, SpecType};
use super::value::Value;

const METADATA_KEY: &str = "SdfMetadata";

/// A plugin's metadata declaration.
#[derive(Debug, Clone)]
pub struct PluginMetadata {
    /// Where the declaration came from, used in diagnostics.
    pub path: String,
    pub metadata: Json,
}

impl PluginMetadata {
    pub fn new(path: impl Into<String>, metadata: Json) -> Self {
        Self {
            path: path.into(),
            metadata,
        }
    }

    /// Parse a plugin declaration from JSON text.
    pub fn from_json(path: impl Into<String>, text: &str) -> Result<Self> {
        let metadata = serde_json::from_str(text)?;
        Ok(Self::new(path, metadata))
    }
}

/// A rejected field declaration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PluginMetadataError {
    #[error("{plugin}: 'SdfMetadata' must be a dictionary")]
    NotADictionary { plugin: String },
    #[error("{plugin}: declaration of '{field}' must be a dictionary")]
    FieldNotADictionary { plugin: String, field: String },
    #[error("{plugin}: '{field}' has no 'type'")]
    MissingType { plugin: String, field: String },
    #[error("{plugin}: '{field}' has unsupported type '{type_name}'")]
    UnknownType {
        plugin: String,
        field: String,
        type_name: String,
    },
    #[error("{plugin}: '{field}' is already registered")]
    DuplicateField { plugin: String, field: String },
    #[error("{plugin}: '{field}' has an invalid default: {reason}")]
    InvalidDefault {
        plugin: String,
        field: String,
        reason: String,
    },
    #[error("{plugin}: '{field}' has an invalid 'appliesTo': {reason}")]
    InvalidAppliesTo {
        plugin: String,
        field: String,
        reason: String,
    },
}

impl Schema {
    /// Register the metadata fields declared by `plugins`.
    ///
    /// Returns one error per skipped declaration.
    pub fn register_plugin_metadata(&mut self, plugins: &[PluginMetadata]) -> Vec<PluginMetadataError> {
        let mut errors = Vec::new();

        for plugin in plugins {
            let Some(declarations) = plugin.metadata.get(METADATA_KEY) else {
                continue;
            };
            let Some(declarations) = declarations.as_object() else {
                errors.push(PluginMetadataError::NotADictionary {
                    plugin: plugin.path.clone(),
                });
                continue;
            };

            for (name, declaration) in declarations {
                if let Err(err) = self.register_plugin_field(&plugin.path, name, declaration) {
                    log::warn!("Skipping plugin metadata field: {err}");
                    errors.push(err);
                }
            }
        }

        errors
    }

    fn register_plugin_field(
        &mut self,
        plugin: &str,
        name: &str,
        declaration: &Json,
    ) -> std::result::Result<(), PluginMetadataError> {
        let plugin_owned = || plugin.to_owned();
        let field = || name.to_owned();

        let Some(entries) = declaration.as_object() else {
            return Err(PluginMetadataError::FieldNotADictionary {
                plugin: plugin_owned(),
                field: field(),
            });
        };

        let Some(type_name) = entries.get("type").and_then(Json::as_str) else {
            return Err(PluginMetadataError::MissingType {
                plugin: plugin_owned(),
                field: field(),
            });
        };

        if self.is_registered(name) {
            return Err(PluginMetadataError::DuplicateField {
                plugin: plugin_owned(),
                field: field(),
            });
        }

        let fallback = match ValueType::parse(type_name) {
            None => {
                return Err(PluginMetadataError::UnknownType {
                    plugin: plugin_owned(),
                    field: field(),
                    type_name: type_name.to_owned(),
                })
            }
            Some(ty) => match entries.get("default") {
                Some(_) if !ty.allows_default() => {
                    return Err(PluginMetadataError::InvalidDefault {
                        plugin: plugin_owned(),
                        field: field(),
                        reason: format!("'{type_name}' fields cannot declare a default"),
                    })
                }
                Some(json) => parse_default(ty, json).map_err(|e| PluginMetadataError::InvalidDefault {
                    plugin: plugin_owned(),
                    field: field(),
                    reason: format!("{e:#}"),
                })?,
                None => ty.empty_value(),
            },
        };

        let applies_to = parse_applies_to(entries.get("appliesTo")).map_err(|reason| {
            PluginMetadataError::InvalidAppliesTo {
                plugin: plugin_owned(),
                field: field(),
                reason,
            }
        })?;

        let display_group = entries.get("displayGroup").and_then(Json::as_str);
        let info: BTreeMap<String, Json> = entries
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "type" | "default" | "appliesTo" | "displayGroup"))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        if let Some(definition) = self.try_register_field(name, Some(fallback)) {
            definition.set_plugin(plugin, info);
        }
        for spec_type in applies_to {
            self.define(spec_type).metadata_field_in_group(name, display_group);
        }

        log::debug!("Registered plugin metadata field '{name}' ({type_name}) from {plugin}");
        Ok(())
    }
}

fn parse_applies_to(json: Option<&Json>) -> std::result::Result<Vec<SpecType>, String> {
    let names: Vec<&str> = match json {
        None => Vec::new(),
        Some(Json::String(s)) => vec![s.as_str()],
        Some(Json::Array(items)) => items
            .iter()
            .map(|item| item.as_str().ok_or_else(|| format!("expected a string, got {item}")))
            .collect::<std::result::Result<_, _>>()?,
        Some(other) => return Err(format!("expected a string or a list of strings, got {other}")),
    };

    if names.is_empty() {
        return Ok(vec![
            SpecType::PseudoRoot,
            SpecType::Prim,
            SpecType::Variant,
            SpecType::Attribute,
            SpecType::Relationship,
        ]);
    }

    let mut spec_types = Vec::new();
    for name in names {
        let types: &[SpecType] = match name {
            "layers" => &[SpecType::PseudoRoot],
            // Variants stay structurally identical to prims.
            "prims" => &[SpecType::Prim, SpecType::Variant],
            "properties" => &[SpecType::Attribute, SpecType::Relationship],
            "attributes" => &[SpecType::Attribute],
            "relationships" => &[SpecType::Relationship],
            "variants" => &[SpecType::Variant],
            other => return Err(format!("unknown spec kind '{other}'")),
        };
        for ty in types {
            if !spec_types.contains(ty) {
                spec_types.push(*ty);
            }
        }
    }
    Ok(spec_types)
}

/// Scalar element type of a metadata value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarKind {
    Bool,
    Int,
    Int64,
    UInt,
    UInt64,
    Float,
    Double,
    String,
    Token,
    Asset,
}

/// The shape of a declared metadata type, e.g. `double3[]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueType {
    kind: TypeKind,
    is_array: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeKind {
    Scalar(ScalarKind),
    Tuple(ScalarKind, usize),
    Matrix(usize),
    Dictionary,
    ListOp(ListOpKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListOpKind {
    Int,
    Int64,
    UInt,
    UInt64,
    String,
    Token,
}

impl ValueType {
    /// Parse a type name such as `token`, `float3` or `int[]`.
    pub fn parse(name: &str) -> Option<ValueType> {
        let (base, is_array) = match name.strip_suffix("[]") {
            Some(base) => (base, true),
            None => (name, false),
        };

        let scalar = |s: &str| -> Option<ScalarKind> {
            Some(match s {
                "bool" => ScalarKind::Bool,
                "int" => ScalarKind::Int,
                "int64" => ScalarKind::Int64,
                "uint" => ScalarKind::UInt,
                "uint64" => ScalarKind::UInt64,
                "float" => ScalarKind::Float,
                "double" => ScalarKind::Double,
                "string" => ScalarKind::String,
                "token" => ScalarKind::Token,
                "asset" => ScalarKind::Asset,
                _ => return None,
            })
        };

        let kind = match base {
            "dictionary" => TypeKind::Dictionary,
            "intlistop" => TypeKind::ListOp(ListOpKind::Int),
            "int64listop" => TypeKind::ListOp(ListOpKind::Int64),
            "uintlistop" => TypeKind::ListOp(ListOpKind::UInt),
            "uint64listop" => TypeKind::ListOp(ListOpKind::UInt64),
            "stringlistop" => TypeKind::ListOp(ListOpKind::String),
            "tokenlistop" => TypeKind::ListOp(ListOpKind::Token),
            "matrix2d" => TypeKind::Matrix(2),
            "matrix3d" => TypeKind::Matrix(3),
            "matrix4d" => TypeKind::Matrix(4),
            _ => match base.char_indices().last() {
                Some((i, c @ '2'..='4')) if matches!(&base[..i], "int" | "float" | "double") => {
                    TypeKind::Tuple(scalar(&base[..i])?, c as usize - '0' as usize)
                }
                _ => TypeKind::Scalar(scalar(base)?),
            },
        };

        let ty = ValueType { kind, is_array };
        match (kind, is_array) {
            (TypeKind::Dictionary | TypeKind::ListOp(_), true) => None,
            (TypeKind::Scalar(ScalarKind::UInt | ScalarKind::UInt64), true) => None,
            (TypeKind::Matrix(_), true) => None,
            _ => Some(ty),
        }
    }

    pub fn is_array(&self) -> bool {
        self.is_array
    }

    /// Number of scalars per element.
    pub fn tuple_size(&self) -> usize {
        match self.kind {
            TypeKind::Tuple(_, n) => n,
            TypeKind::Matrix(n) => n * n,
            _ => 1,
        }
    }

    fn allows_default(&self) -> bool {
        !matches!(self.kind, TypeKind::Dictionary | TypeKind::ListOp(_))
    }

    fn scalar_kind(&self) -> Option<ScalarKind> {
        match self.kind {
            TypeKind::Scalar(k) | TypeKind::Tuple(k, _) => Some(k),
            TypeKind::Matrix(_) => Some(ScalarKind::Double),
            _ => None,
        }
    }

    /// The value used when a declaration has no default.
    fn empty_value(&self) -> Value {
        match self.kind {
            TypeKind::Dictionary => Value::Dictionary(Default::default()),
            TypeKind::ListOp(kind) => match kind {
                ListOpKind::Int => Value::IntListOp(ListOp::default()),
                ListOpKind::Int64 => Value::Int64ListOp(ListOp::default()),
                ListOpKind::UInt => Value::UIntListOp(ListOp::default()),
                ListOpKind::UInt64 => Value::UInt64ListOp(ListOp::default()),
                ListOpKind::String => Value::StringListOp(ListOp::default()),
                ListOpKind::Token => Value::TokenListOp(ListOp::default()),
            },
            _ => {
                let count = if self.is_array { 0 } else { self.tuple_size() };
                let zero = match self.scalar_kind() {
                    Some(ScalarKind::Bool) => Scalar::Bool(false),
                    Some(ScalarKind::String | ScalarKind::Token | ScalarKind::Asset) => Scalar::String(String::new()),
                    _ => Scalar::Int(0),
                };
                // Zero values of a known type always build.
                build_value(*self, vec![zero; count]).unwrap_or(Value::Bool(false))
            }
        }
    }
}

/// An untyped scalar read from a generic representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

/// Builds a typed [`Value`] from a stream of list/tuple brackets and scalars.
///
/// ```text
/// double3[]  <-  begin_list  begin_tuple 1 2 3 end_tuple  begin_tuple 4 5 6 end_tuple  end_list
/// ```
#[derive(Debug)]
pub struct ValueContext {
    ty: ValueType,
    scalars: Vec<Scalar>,
    list_open: bool,
    list_done: bool,
    tuple_depth: usize,
    tuple_start: usize,
}

impl ValueContext {
    pub fn new(ty: ValueType) -> Self {
        Self {
            ty,
            scalars: Vec::new(),
            list_open: false,
            list_done: false,
            tuple_depth: 0,
            tuple_start: 0,
        }
    }

    pub fn for_type_name(name: &str) -> Result<Self> {
        match ValueType::parse(name) {
            Some(ty) => Ok(Self::new(ty)),
            None => bail!("unsupported type '{name}'"),
        }
    }

    /// True if the next `[` starts the outer list rather than a tuple.
    pub fn expects_list(&self) -> bool {
        self.ty.is_array && !self.list_open && !self.list_done && self.tuple_depth == 0
    }

    pub fn begin_list(&mut self) -> Result<()> {
        ensure!(self.expects_list(), "unexpected list");
        self.list_open = true;
        Ok(())
    }

    pub fn end_list(&mut self) -> Result<()> {
        ensure!(self.list_open && self.tuple_depth == 0, "unbalanced list");
        self.list_open = false;
        self.list_done = true;
        Ok(())
    }

    pub fn begin_tuple(&mut self) -> Result<()> {
        ensure!(self.ty.tuple_size() > 1, "unexpected tuple");
        ensure!(!self.ty.is_array || self.list_open, "tuple outside of list");
        let max_depth = if matches!(self.ty.kind, TypeKind::Matrix(_)) { 2 } else { 1 };
        ensure!(self.tuple_depth < max_depth, "tuple nested too deeply");
        if self.tuple_depth == 0 {
            self.tuple_start = self.scalars.len();
        }
        self.tuple_depth += 1;
        Ok(())
    }

    pub fn end_tuple(&mut self) -> Result<()> {
        ensure!(self.tuple_depth > 0, "unbalanced tuple");
        self.tuple_depth -= 1;
        if self.tuple_depth == 0 {
            let count = self.scalars.len() - self.tuple_start;
            ensure!(
                count == self.ty.tuple_size(),
                "expected {} values in tuple, got {count}",
                self.ty.tuple_size()
            );
        }
        Ok(())
    }

    pub fn append_value(&mut self, scalar: Scalar) -> Result<()> {
        ensure!(
            self.ty.tuple_size() == 1 || self.tuple_depth > 0,
            "expected a tuple of {} values",
            self.ty.tuple_size()
        );
        ensure!(!self.ty.is_array || self.list_open, "expected a list");
        ensure!(
            self.ty.is_array || self.tuple_depth > 0 || self.scalars.is_empty(),
            "expected a single value"
        );
        self.scalars.push(scalar);
        Ok(())
    }

    pub fn produce_value(self) -> Result<Value> {
        ensure!(!self.list_open && self.tuple_depth == 0, "unterminated value");
        if self.ty.is_array {
            ensure!(self.list_done, "expected a list");
        } else {
            ensure!(
                self.scalars.len() == self.ty.tuple_size(),
                "expected {} values, got {}",
                self.ty.tuple_size(),
                self.scalars.len()
            );
        }
        build_value(self.ty, self.scalars)
    }
}

/// Parse a JSON default value of type `ty`.
pub fn parse_default(ty: ValueType, json: &Json) -> Result<Value> {
    let mut context = ValueContext::new(ty);
    feed(&mut context, json)?;
    context.produce_value()
}

fn feed(context: &mut ValueContext, json: &Json) -> Result<()> {
    match json {
        Json::Array(items) => {
            let list = context.expects_list();
            if list {
                context.begin_list()?;
            } else {
                context.begin_tuple()?;
            }
            for item in items {
                feed(context, item)?;
            }
            if list {
                context.end_list()
            } else {
                context.end_tuple()
            }
        }
        Json::Bool(b) => context.append_value(Scalar::Bool(*b)),
        Json::Number(n) => match n.as_i64() {
            Some(i) => context.append_value(Scalar::Int(i)),
            None => match n.as_f64() {
                Some(f) => context.append_value(Scalar::Double(f)),
                None => bail!("number {n} is out of range"),
            },
        },
        Json::String(s) => context.append_value(Scalar::String(s.clone())),
        Json::Null => bail!("null is not a value"),
        Json::Object(_) => bail!("dictionaries are not supported here"),
    }
}

fn build_value(ty: ValueType, scalars: Vec<Scalar>) -> Result<Value> {
    fn ints<T: TryFrom<i64>>(scalars: Vec<Scalar>) -> Result<Vec<T>> {
        scalars
            .into_iter()
            .map(|s| match s {
                Scalar::Int(i) => T::try_from(i).map_err(|_| anyhow::anyhow!("{i} is out of range")),
                other => bail!("expected an integer, got {other:?}"),
            })
            .collect()
    }
    fn doubles(scalars: Vec<Scalar>) -> Result<Vec<f64>> {
        scalars
            .into_iter()
            .map(|s| match s {
                Scalar::Int(i) => Ok(i as f64),
                Scalar::Double(d) => Ok(d),
                other => bail!("expected a number, got {other:?}"),
            })
            .collect()
    }
    fn floats(scalars: Vec<Scalar>) -> Result<Vec<f32>> {
        Ok(doubles(scalars)?.into_iter().map(|d| d as f32).collect())
    }
    fn bools(scalars: Vec<Scalar>) -> Result<Vec<bool>> {
        scalars
            .into_iter()
            .map(|s| match s {
                Scalar::Bool(b) => Ok(b),
                Scalar::Int(i @ (0 | 1)) => Ok(i == 1),
                other => bail!("expected a bool, got {other:?}"),
            })
            .collect()
    }
    fn strings(scalars: Vec<Scalar>) -> Result<Vec<String>> {
        scalars
            .into_iter()
            .map(|s| match s {
                Scalar::String(s) => Ok(s),
                other => bail!("expected a string, got {other:?}"),
            })
            .collect()
    }
    fn single<T>(mut values: Vec<T>) -> Result<T> {
        ensure!(values.len() == 1, "expected a single value");
        values.pop().ok_or_else(|| anyhow::anyhow!("expected a single value"))
    }

    let array = ty.is_array;
    Ok(match ty.kind {
        TypeKind::Scalar(kind) => match (kind, array) {
            (ScalarKind::Bool, false) => Value::Bool(single(bools(scalars)?)?),
            (ScalarKind::Bool, true) => Value::BoolVec(bools(scalars)?),
            (ScalarKind::Int, false) => Value::Int(single(ints(scalars)?)?),
            (ScalarKind::Int, true) => Value::IntVec(ints(scalars)?),
            (ScalarKind::Int64, false) => Value::Int64(single(ints(scalars)?)?),
            (ScalarKind::Int64, true) => Value::Int64Vec(ints(scalars)?),
            (ScalarKind::UInt, _) => Value::UInt(single(ints(scalars)?)?),
            (ScalarKind::UInt64, _) => Value::UInt64(single(ints(scalars)?)?),
            (ScalarKind::Float, false) => Value::Float(single(floats(scalars)?)?),
            (ScalarKind::Float, true) => Value::FloatVec(floats(scalars)?),
            (ScalarKind::Double, false) => Value::Double(single(doubles(scalars)?)?),
            (ScalarKind::Double, true) => Value::DoubleVec(doubles(scalars)?),
            (ScalarKind::String, false) => Value::String(single(strings(scalars)?)?),
            (ScalarKind::String, true) => Value::StringVec(strings(scalars)?),
            (ScalarKind::Token, false) => Value::Token(single(strings(scalars)?)?),
            (ScalarKind::Token, true) => Value::TokenVec(strings(scalars)?),
            (ScalarKind::Asset, false) => Value::AssetPath(single(strings(scalars)?)?),
            (ScalarKind::Asset, true) => Value::AssetPathVec(strings(scalars)?),
        },
        TypeKind::Tuple(kind, n) => match (kind, n) {
            (ScalarKind::Int, 2) => Value::Vec2i(ints(scalars)?),
            (ScalarKind::Int, 3) => Value::Vec3i(ints(scalars)?),
            (ScalarKind::Int, _) => Value::Vec4i(ints(scalars)?),
            (ScalarKind::Float, 2) => Value::Vec2f(floats(scalars)?),
            (ScalarKind::Float, 3) => Value::Vec3f(floats(scalars)?),
            (ScalarKind::Float, _) => Value::Vec4f(floats(scalars)?),
            (_, 2) => Value::Vec2d(doubles(scalars)?),
            (_, 3) => Value::Vec3d(doubles(scalars)?),
            _ => Value::Vec4d(doubles(scalars)?),
        },
        TypeKind::Matrix(2) => Value::Matrix2d(doubles(scalars)?),
        TypeKind::Matrix(3) => Value::Matrix3d(doubles(scalars)?),
        TypeKind::Matrix(_) => Value::Matrix4d(doubles(scalars)?),
        TypeKind::Dictionary | TypeKind::ListOp(_) => bail!("type has no scalar representation"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plugin(metadata: Json) -> PluginMetadata {
        PluginMetadata::new("test/plugInfo.json", json!({ "SdfMetadata": metadata }))
    }

    #[test]
    fn parse_type_names() {
        assert_eq!(ValueType::parse("double3").map(|t| t.tuple_size()), Some(3));
        assert_eq!(ValueType::parse("matrix4d").map(|t| t.tuple_size()), Some(16));
        assert!(ValueType::parse("token[]").is_some_and(|t| t.is_array()));
        assert!(ValueType::parse("dictionary[]").is_none());
        assert!(ValueType::parse("quath").is_none());
    }

    #[test]
    fn value_context_builds_tuple_arrays() {
        let mut context = ValueContext::for_type_name("double3[]").unwrap();
        context.begin_list().unwrap();
        for row in [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]] {
            context.begin_tuple().unwrap();
            for v in row {
                context.append_value(Scalar::Double(v)).unwrap();
            }
            context.end_tuple().unwrap();
        }
        context.end_list().unwrap();
        assert_eq!(
            context.produce_value().unwrap(),
            Value::Vec3d(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
        );
    }

    #[test]
    fn value_context_rejects_wrong_tuple_size() {
        let mut context = ValueContext::for_type_name("float2").unwrap();
        context.begin_tuple().unwrap();
        context.append_value(Scalar::Int(1)).unwrap();
        assert!(context.end_tuple().is_err());
    }

    #[test]
    fn defaults_from_json() {
        let ty = |name| ValueType::parse(name).unwrap();
        assert_eq!(parse_default(ty("double"), &json!(2)).unwrap(), Value::Double(2.0));
        assert_eq!(
            parse_default(ty("token[]"), &json!(["a", "b"])).unwrap(),
            Value::TokenVec(vec!["a".into(), "b".into()])
        );
        assert_eq!(
            parse_default(ty("matrix2d"), &json!([[1, 0], [0, 1]])).unwrap(),
            Value::Matrix2d(vec![1.0, 0.0, 0.0, 1.0])
        );
        assert!(parse_default(ty("int"), &json!("x")).is_err());
        assert!(parse_default(ty("int"), &json!([1, 2])).is_err());
    }

    #[test]
    fn register_fields_from_plugins() {
        let mut schema = Schema::new();
        let errors = schema.register_plugin_metadata(&[plugin(json!({
            "hue": { "type": "double3", "default": [1, 0, 0], "appliesTo": "prims" },
            "tags": { "type": "token[]", "displayGroup": "Pipeline", "appliesTo": ["attributes", "layers"] },
            "note": { "type": "string", "documentation": "free text" },
        }))]);
        assert!(errors.is_empty(), "{errors:?}");

        assert_eq!(schema.fallback("hue"), Some(&Value::Vec3d(vec![1.0, 0.0, 0.0])));
        assert!(schema.is_valid_field_for_spec("hue", SpecType::Prim));
        assert!(schema.is_valid_field_for_spec("hue", SpecType::Variant));
        assert!(!schema.is_valid_field_for_spec("hue", SpecType::Attribute));

        let attribute = schema.spec_definition(SpecType::Attribute).unwrap();
        assert_eq!(attribute.metadata_field_display_group("tags"), Some("Pipeline"));
        assert!(schema.is_valid_field_for_spec("tags", SpecType::PseudoRoot));
        assert!(!schema.is_valid_field_for_spec("tags", SpecType::Prim));

        for spec_type in [SpecType::PseudoRoot, SpecType::Prim, SpecType::Relationship] {
            assert!(schema.is_valid_field_for_spec("note", spec_type));
        }
        let note = schema.field_definition("note").unwrap();
        assert_eq!(note.plugin(), Some("test/plugInfo.json"));
        assert_eq!(note.info().get("documentation"), Some(&json!("free text")));
    }

    #[test]
    fn malformed_declarations_are_skipped() {
        let mut schema = Schema::new();
        let errors = schema.register_plugin_metadata(&[
            plugin(json!({
                "noType": { "default": 1 },
                "kind": { "type": "token" },
                "badDefault": { "type": "int", "default": "one" },
                "dictDefault": { "type": "dictionary", "default": {} },
                "badTarget": { "type": "int", "appliesTo": "cameras" },
                "good": { "type": "int", "default": 3 },
            })),
            plugin(json!({ "other": { "type": "bool" } })),
        ]);

        let mut kinds: Vec<_> = errors
            .iter()
            .map(|e| match e {
                PluginMetadataError::MissingType { .. } => "missing",
                PluginMetadataError::DuplicateField { .. } => "duplicate",
                PluginMetadataError::InvalidDefault { .. } => "default",
                PluginMetadataError::InvalidAppliesTo { .. } => "appliesTo",
                _ => "other",
            })
            .collect();
        kinds.sort_unstable();
        assert_eq!(kinds, vec!["appliesTo", "default", "default", "duplicate", "missing"]);

        assert_eq!(schema.fallback("good"), Some(&Value::Int(3)));
        assert_eq!(schema.fallback("other"), Some(&Value::Bool(false)));
        assert!(!schema.is_registered("noType"));
        assert!(!schema.is_registered("badTarget"));
    }
}
