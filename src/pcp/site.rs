//! Layer stack sites.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::layer_stack::LayerStack;
use crate::sdf::Path;

/// A path in a layer stack: the unit of field composition.
///
/// Sites compare equal when their layer stack identifiers and paths are
/// equal.
#[derive(Clone)]
pub struct LayerStackSite {
    layer_stack: Arc<LayerStack>,
    path: Path,
}

impl LayerStackSite {
    /// A site at `path`, after applying the stack's relocations.
    pub fn new(layer_stack: Arc<LayerStack>, path: &Path) -> Self {
        let path = layer_stack.relocations().resolve(path);
        Self { layer_stack, path }
    }

    /// A site at exactly `path`, ignoring relocations.
    pub fn unrelocated(layer_stack: Arc<LayerStack>, path: Path) -> Self {
        Self { layer_stack, path }
    }

    pub fn layer_stack(&self) -> &Arc<LayerStack> {
        &self.layer_stack
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The same layer stack at another path.
    pub fn with_path(&self, path: &Path) -> Self {
        Self::new(self.layer_stack.clone(), path)
    }

    /// True if both sites are in the same layer stack.
    pub fn same_layer_stack(&self, other: &LayerStackSite) -> bool {
        self.layer_stack.identifier() == other.layer_stack.identifier()
    }
}

impl PartialEq for LayerStackSite {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.same_layer_stack(other)
    }
}

impl Eq for LayerStackSite {}

impl Hash for LayerStackSite {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.layer_stack.identifier().hash(state);
        self.path.hash(state);
    }
}

impl fmt::Display for LayerStackSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.layer_stack.identifier(), self.path)
    }
}

impl fmt::Debug for LayerStackSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LayerStackSite({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcp::resolver::LayerRegistry;
    use crate::sdf::{path, FieldKey, Layer, Value};
    use std::collections::HashSet;

    #[test]
    fn sites_resolve_relocations_and_compare_by_identity() {
        let registry = LayerRegistry::new();
        let root = registry.insert(Layer::create("root.usda"));
        root.set_field(
            &Path::abs_root(),
            FieldKey::LayerRelocates,
            Value::Relocates(vec![(path("/A/B").unwrap(), path("/A/C").unwrap())]),
        );

        let stack = Arc::new(LayerStack::build(root.clone(), &registry, &HashSet::new()));
        let site = LayerStackSite::new(stack.clone(), &path("/A/B").unwrap());
        assert_eq!(site.path(), &path("/A/C").unwrap());
        assert_eq!(site.to_string(), "@root.usda@</A/C>");

        // A separately built stack over the same root is the same stack.
        let rebuilt = Arc::new(LayerStack::build(root, &registry, &HashSet::new()));
        assert_eq!(site, LayerStackSite::new(rebuilt, &path("/A/C").unwrap()));
        assert_ne!(site, LayerStackSite::unrelocated(stack, path("/A/B").unwrap()));
    }
}
