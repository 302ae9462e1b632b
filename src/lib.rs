//! `openusd-pcp` is a native Rust implementation of USD path composition.
//!
//! # Modules
//!
//! - `sdf` - Scene Description Foundations: paths, values, list ops, the field
//!   schema and in-memory layers
//! - `pcp` - Path composition: layer stacks, composed fields, arcs and prim
//!   indexes
//!
//! ```
//! use std::sync::Arc;
//! use openusd_pcp::pcp::{CacheOptions, CompositionCache, LayerRegistry};
//! use openusd_pcp::sdf::{path, FieldKey, Layer, ListOp, Reference, Schema, Specifier};
//!
//! let registry = Arc::new(LayerRegistry::new());
//! let root = registry.insert(Layer::create("shot.usda"));
//! root.define_prim(&path("/Asset").unwrap(), Specifier::Def);
//! root.set_field(
//!     &path("/Shot").unwrap(),
//!     FieldKey::References,
//!     ListOp::prepend(vec![Reference::internal(path("/Asset").unwrap())]),
//! );
//!
//! let cache = CompositionCache::new(Arc::new(Schema::new()), registry, root, CacheOptions::default());
//! let index = cache.compute_prim_index(&path("/Shot").unwrap());
//! assert_eq!(index.nodes().count(), 2);
//! ```

pub mod pcp;
pub mod sdf;
