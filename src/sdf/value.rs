//! Scene description values.

use std::collections::HashMap;
use std::fmt;

use super::list_op::ListOp;
use super::path::Path;

/// Describes how a prim spec should be composed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Specifier {
    Def,
    #[default]
    Over,
    Class,
}

/// An affine time mapping `t' = offset + scale * t` applied to a layer's time samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerOffset {
    pub offset: f64,
    pub scale: f64,
}

impl Default for LayerOffset {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl LayerOffset {
    pub const IDENTITY: LayerOffset = LayerOffset {
        offset: 0.0,
        scale: 1.0,
    };

    pub fn new(offset: f64, scale: f64) -> Self {
        Self { offset, scale }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Offsets are valid when finite with a strictly positive scale.
    pub fn is_valid(&self) -> bool {
        self.offset.is_finite() && self.scale.is_finite() && self.scale > 0.0
    }

    /// Compose two offsets so that `(a.compose(b)).apply(t) == a.apply(b.apply(t))`.
    pub fn compose(&self, inner: &LayerOffset) -> LayerOffset {
        LayerOffset {
            offset: self.offset + self.scale * inner.offset,
            scale: self.scale * inner.scale,
        }
    }

    pub fn apply(&self, time: f64) -> f64 {
        self.offset + self.scale * time
    }
}

impl fmt::Display for LayerOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(offset={}, scale={})", self.offset, self.scale)
    }
}

/// A reference composition arc authored on a prim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reference {
    /// Asset path of the referenced layer. Empty for internal references.
    pub asset_path: String,
    /// Target prim. Empty to use the referenced layer's default prim.
    pub prim_path: Path,
    pub layer_offset: LayerOffset,
    pub custom_data: HashMap<String, Value>,
}

impl Reference {
    pub fn new(asset_path: impl Into<String>, prim_path: Path) -> Self {
        Self {
            asset_path: asset_path.into(),
            prim_path,
            ..Default::default()
        }
    }

    /// A reference to a prim in the same layer stack.
    pub fn internal(prim_path: Path) -> Self {
        Self::new(String::new(), prim_path)
    }

    pub fn with_layer_offset(mut self, layer_offset: LayerOffset) -> Self {
        self.layer_offset = layer_offset;
        self
    }
}

/// A payload composition arc authored on a prim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub asset_path: String,
    pub prim_path: Path,
    pub layer_offset: Option<LayerOffset>,
}

impl Payload {
    pub fn new(asset_path: impl Into<String>, prim_path: Path) -> Self {
        Self {
            asset_path: asset_path.into(),
            prim_path,
            layer_offset: None,
        }
    }
}

/// A relocation table: `(source, target)` pairs in authored order.
pub type Relocates = Vec<(Path, Path)>;

/// Dictionary value, keyed by name.
pub type Dictionary = HashMap<String, Value>;

/// A field value stored in a layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Int64(i64),
    UInt(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Token(String),
    AssetPath(String),
    Path(Path),
    Specifier(Specifier),
    Reference(Reference),
    Payload(Payload),

    BoolVec(Vec<bool>),
    IntVec(Vec<i32>),
    Int64Vec(Vec<i64>),
    FloatVec(Vec<f32>),
    DoubleVec(Vec<f64>),
    StringVec(Vec<String>),
    TokenVec(Vec<String>),
    AssetPathVec(Vec<String>),
    PathVec(Vec<Path>),
    LayerOffsetVec(Vec<LayerOffset>),

    // Tuple values are stored flattened; arrays of tuples use the same variant.
    Vec2i(Vec<i32>),
    Vec3i(Vec<i32>),
    Vec4i(Vec<i32>),
    Vec2f(Vec<f32>),
    Vec3f(Vec<f32>),
    Vec4f(Vec<f32>),
    Vec2d(Vec<f64>),
    Vec3d(Vec<f64>),
    Vec4d(Vec<f64>),
    Matrix2d(Vec<f64>),
    Matrix3d(Vec<f64>),
    Matrix4d(Vec<f64>),

    Dictionary(Dictionary),
    VariantSelectionMap(HashMap<String, String>),
    Relocates(Relocates),

    IntListOp(ListOp<i32>),
    Int64ListOp(ListOp<i64>),
    UIntListOp(ListOp<u32>),
    UInt64ListOp(ListOp<u64>),
    StringListOp(ListOp<String>),
    TokenListOp(ListOp<String>),
    PathListOp(ListOp<Path>),
    ReferenceListOp(ListOp<Reference>),
    PayloadListOp(ListOp<Payload>),
}

impl Value {
    /// Short type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Int64(_) => "int64",
            Value::UInt(_) => "uint",
            Value::UInt64(_) => "uint64",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Token(_) => "token",
            Value::AssetPath(_) => "asset",
            Value::Path(_) => "path",
            Value::Specifier(_) => "specifier",
            Value::Reference(_) => "reference",
            Value::Payload(_) => "payload",
            Value::BoolVec(_) => "bool[]",
            Value::IntVec(_) => "int[]",
            Value::Int64Vec(_) => "int64[]",
            Value::FloatVec(_) => "float[]",
            Value::DoubleVec(_) => "double[]",
            Value::StringVec(_) => "string[]",
            Value::TokenVec(_) => "token[]",
            Value::AssetPathVec(_) => "asset[]",
            Value::PathVec(_) => "path[]",
            Value::LayerOffsetVec(_) => "layerOffset[]",
            Value::Vec2i(_) => "int2",
            Value::Vec3i(_) => "int3",
            Value::Vec4i(_) => "int4",
            Value::Vec2f(_) => "float2",
            Value::Vec3f(_) => "float3",
            Value::Vec4f(_) => "float4",
            Value::Vec2d(_) => "double2",
            Value::Vec3d(_) => "double3",
            Value::Vec4d(_) => "double4",
            Value::Matrix2d(_) => "matrix2d",
            Value::Matrix3d(_) => "matrix3d",
            Value::Matrix4d(_) => "matrix4d",
            Value::Dictionary(_) => "dictionary",
            Value::VariantSelectionMap(_) => "variantSelectionMap",
            Value::Relocates(_) => "relocates",
            Value::IntListOp(_) => "intlistop",
            Value::Int64ListOp(_) => "int64listop",
            Value::UIntListOp(_) => "uintlistop",
            Value::UInt64ListOp(_) => "uint64listop",
            Value::StringListOp(_) => "stringlistop",
            Value::TokenListOp(_) => "tokenlistop",
            Value::PathListOp(_) => "pathlistop",
            Value::ReferenceListOp(_) => "referencelistop",
            Value::PayloadListOp(_) => "payloadlistop",
        }
    }

    /// True for the list-op valued variants.
    pub fn is_list_op(&self) -> bool {
        matches!(
            self,
            Value::IntListOp(_)
                | Value::Int64ListOp(_)
                | Value::UIntListOp(_)
                | Value::UInt64ListOp(_)
                | Value::StringListOp(_)
                | Value::TokenListOp(_)
                | Value::PathListOp(_)
                | Value::ReferenceListOp(_)
                | Value::PayloadListOp(_)
        )
    }

    /// True if both values hold the same variant.
    pub fn same_type(&self, other: &Value) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn try_as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn try_as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Float(v) => Some(f64::from(*v)),
            Value::Int(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    pub fn try_as_string_ref(&self) -> Option<&String> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn try_as_token_ref(&self) -> Option<&String> {
        match self {
            Value::Token(v) => Some(v),
            _ => None,
        }
    }

    pub fn try_as_string_vec_ref(&self) -> Option<&Vec<String>> {
        match self {
            Value::StringVec(v) => Some(v),
            _ => None,
        }
    }

    pub fn try_as_token_vec_ref(&self) -> Option<&Vec<String>> {
        match self {
            Value::TokenVec(v) => Some(v),
            _ => None,
        }
    }

    pub fn try_as_dictionary_ref(&self) -> Option<&Dictionary> {
        match self {
            Value::Dictionary(v) => Some(v),
            _ => None,
        }
    }

    pub fn try_as_variant_selection_map_ref(&self) -> Option<&HashMap<String, String>> {
        match self {
            Value::VariantSelectionMap(v) => Some(v),
            _ => None,
        }
    }

    pub fn try_as_relocates_ref(&self) -> Option<&Relocates> {
        match self {
            Value::Relocates(v) => Some(v),
            _ => None,
        }
    }

    pub fn try_as_layer_offset_vec_ref(&self) -> Option<&Vec<LayerOffset>> {
        match self {
            Value::LayerOffsetVec(v) => Some(v),
            _ => None,
        }
    }

    pub fn try_as_path_list_op_ref(&self) -> Option<&ListOp<Path>> {
        match self {
            Value::PathListOp(v) => Some(v),
            _ => None,
        }
    }

    pub fn try_as_string_list_op_ref(&self) -> Option<&ListOp<String>> {
        match self {
            Value::StringListOp(v) => Some(v),
            _ => None,
        }
    }

    pub fn try_as_reference_list_op_ref(&self) -> Option<&ListOp<Reference>> {
        match self {
            Value::ReferenceListOp(v) => Some(v),
            _ => None,
        }
    }

    pub fn try_as_payload_list_op_ref(&self) -> Option<&ListOp<Payload>> {
        match self {
            Value::PayloadListOp(v) => Some(v),
            _ => None,
        }
    }

    /// Split a value into its list elements for per-element validation.
    ///
    /// Returns `None` for values that are not list-like.
    pub fn list_elements(&self) -> Option<Vec<Value>> {
        fn wrap<T: Clone>(items: impl IntoIterator<Item = T>, f: fn(T) -> Value) -> Option<Vec<Value>> {
            Some(items.into_iter().map(f).collect())
        }

        match self {
            Value::StringVec(v) => wrap(v.iter().cloned(), Value::String),
            Value::TokenVec(v) => wrap(v.iter().cloned(), Value::Token),
            Value::AssetPathVec(v) => wrap(v.iter().cloned(), Value::AssetPath),
            Value::PathVec(v) => wrap(v.iter().cloned(), Value::Path),
            Value::StringListOp(op) => wrap(op.iter_items().cloned(), Value::String),
            Value::TokenListOp(op) => wrap(op.iter_items().cloned(), Value::Token),
            Value::PathListOp(op) => wrap(op.iter_items().cloned(), Value::Path),
            Value::ReferenceListOp(op) => wrap(op.iter_items().cloned(), Value::Reference),
            Value::PayloadListOp(op) => wrap(op.iter_items().cloned(), Value::Payload),
            Value::IntListOp(op) => wrap(op.iter_items().copied(), Value::Int),
            Value::Int64ListOp(op) => wrap(op.iter_items().copied(), Value::Int64),
            Value::UIntListOp(op) => wrap(op.iter_items().copied(), Value::UInt),
            Value::UInt64ListOp(op) => wrap(op.iter_items().copied(), Value::UInt64),
            _ => None,
        }
    }

    /// Split a map-like value into `(key, value)` pairs for key/value validation.
    pub fn map_entries(&self) -> Option<Vec<(Value, Value)>> {
        match self {
            Value::Dictionary(dict) => Some(
                dict.iter()
                    .map(|(k, v)| (Value::String(k.clone()), v.clone()))
                    .collect(),
            ),
            Value::VariantSelectionMap(map) => Some(
                map.iter()
                    .map(|(k, v)| (Value::String(k.clone()), Value::String(v.clone())))
                    .collect(),
            ),
            Value::Relocates(entries) => Some(
                entries
                    .iter()
                    .map(|(s, t)| (Value::Path(s.clone()), Value::Path(t.clone())))
                    .collect(),
            ),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<Specifier> for Value {
    fn from(value: Specifier) -> Self {
        Value::Specifier(value)
    }
}

impl From<ListOp<Reference>> for Value {
    fn from(value: ListOp<Reference>) -> Self {
        Value::ReferenceListOp(value)
    }
}

impl From<ListOp<Payload>> for Value {
    fn from(value: ListOp<Payload>) -> Self {
        Value::PayloadListOp(value)
    }
}

impl From<ListOp<Path>> for Value {
    fn from(value: ListOp<Path>) -> Self {
        Value::PathListOp(value)
    }
}
