//! Scene Description Foundations: paths, values, list ops, the field schema
//! and layers.

pub mod layer;
pub mod list_op;
pub mod path;
pub mod plugin;
pub mod schema;
pub mod value;

pub use layer::{AbstractData, Data, Layer, LayerHandle, Spec};
pub use list_op::{apply_list_ops, ListEdits, ListOp, ListOpItem};
pub use path::{path, Path};
pub use plugin::{PluginMetadata, PluginMetadataError, Scalar, ValueContext, ValueType};
pub use schema::{ChildrenKey, FieldDefinition, FieldKey, FieldValidator, Schema, SpecDefinition, SpecType};
pub use value::{Dictionary, LayerOffset, Payload, Reference, Relocates, Specifier, Value};
