//! Path composition: layer stacks, site composition, arc discovery and prim
//! indexing.
//!
//! [`CompositionCache`] is the entry point. It owns the layer stacks built
//! from a root layer and memoizes the [`PrimIndex`] of every prim it is asked
//! about.

pub mod arcs;
pub mod cache;
pub mod compose_site;
pub mod error;
pub mod layer_stack;
pub mod prim_index;
pub mod resolver;
pub mod site;

pub use arcs::{ArcDiscoverer, ArcType, DiscoveredArc};
pub use cache::{CacheOptions, CompositionCache};
pub use compose_site::{merge_dictionaries, Opinion, Provenance, SiteComposer};
pub use error::{CompositionError, ErrorKind};
pub use layer_stack::{LayerStack, LayerStackIdentifier, LayerStackRegistry, LayerTree, RelocationMap};
pub use prim_index::{IndexLookup, IndexingState, PayloadInclusion, PayloadState, PrimIndex, PrimIndexNode, PrimIndexer};
pub use resolver::{anchor_path, LayerRegistry, LayerResolver};
pub use site::LayerStackSite;
