//! Opening layers by asset path.

use std::collections::HashMap;

use anyhow::{bail, Result};
use parking_lot::RwLock;

use crate::sdf::LayerHandle;

/// Turns an asset path into an open layer.
pub trait LayerResolver: Send + Sync {
    /// Open `asset_path`. Relative paths are anchored to `anchor`, the layer
    /// that authored the asset path.
    fn open_layer(&self, asset_path: &str, anchor: Option<&LayerHandle>) -> Result<LayerHandle>;
}

/// A resolver over a fixed set of in-memory layers, keyed by identifier.
#[derive(Debug, Default)]
pub struct LayerRegistry {
    layers: RwLock<HashMap<String, LayerHandle>>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a layer under its identifier, replacing any previous one.
    pub fn insert(&self, layer: LayerHandle) -> LayerHandle {
        self.layers
            .write()
            .insert(layer.identifier().to_owned(), layer.clone());
        layer
    }

    pub fn get(&self, identifier: &str) -> Option<LayerHandle> {
        self.layers.read().get(identifier).cloned()
    }

    pub fn remove(&self, identifier: &str) -> Option<LayerHandle> {
        self.layers.write().remove(identifier)
    }

    pub fn len(&self) -> usize {
        self.layers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.read().is_empty()
    }
}

impl LayerResolver for LayerRegistry {
    fn open_layer(&self, asset_path: &str, anchor: Option<&LayerHandle>) -> Result<LayerHandle> {
        if asset_path.is_empty() {
            bail!("Empty asset path");
        }
        if let Some(layer) = self.get(asset_path) {
            return Ok(layer);
        }
        if let Some(anchored) = anchor.and_then(|layer| anchor_path(layer.identifier(), asset_path)) {
            if let Some(layer) = self.get(&anchored) {
                return Ok(layer);
            }
        }
        bail!("No layer registered for @{asset_path}@")
    }
}

/// Join a relative asset path to the directory of `anchor`.
///
/// Returns `None` for absolute asset paths, anonymous anchors and paths that
/// escape the anchor's root.
pub fn anchor_path(anchor: &str, asset_path: &str) -> Option<String> {
    if asset_path.starts_with('/') || anchor.starts_with("anon:") {
        return None;
    }

    let mut parts: Vec<&str> = anchor.split('/').collect();
    parts.pop();
    for element in asset_path.split('/') {
        match element {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            name => parts.push(name),
        }
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdf::Layer;

    #[test]
    fn anchoring_relative_paths() {
        assert_eq!(anchor_path("assets/set.usda", "./props/chair.usda").as_deref(), Some("assets/props/chair.usda"));
        assert_eq!(anchor_path("assets/set/set.usda", "../chair.usda").as_deref(), Some("assets/chair.usda"));
        assert_eq!(anchor_path("set.usda", "chair.usda").as_deref(), Some("chair.usda"));
        assert_eq!(anchor_path("set.usda", "/abs/chair.usda"), None);
        assert_eq!(anchor_path("set.usda", "../chair.usda"), None);
    }

    #[test]
    fn open_registered_layers() {
        let registry = LayerRegistry::new();
        let chair = registry.insert(Layer::create("assets/chair.usda"));
        let set = registry.insert(Layer::create("assets/set.usda"));

        let opened = registry.open_layer("assets/chair.usda", None).unwrap();
        assert_eq!(opened.identifier(), chair.identifier());

        let anchored = registry.open_layer("./chair.usda", Some(&set)).unwrap();
        assert_eq!(anchored.identifier(), chair.identifier());

        assert!(registry.open_layer("missing.usda", Some(&set)).is_err());
        assert!(registry.open_layer("", None).is_err());
        assert_eq!(registry.len(), 2);
    }
}
