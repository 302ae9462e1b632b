//! Layers: identified stores of scene description fields.
//!
//! Storage is abstracted behind [`AbstractData`] so that composition can run
//! over any backing store. [`Data`] is the in-memory implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::path::Path;
use super::schema::{ChildrenKey, FieldKey, SpecType};
use super::value::{Specifier, Value};

/// A spec and its authored fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Spec {
    pub ty: SpecType,
    pub fields: HashMap<String, Value>,
}

impl Spec {
    pub fn new(ty: SpecType) -> Self {
        Self {
            ty,
            fields: HashMap::new(),
        }
    }

    pub fn add(&mut self, key: impl AsRef<str>, value: impl Into<Value>) {
        self.fields.insert(key.as_ref().to_owned(), value.into());
    }

    pub fn get(&self, key: impl AsRef<str>) -> Option<&Value> {
        self.fields.get(key.as_ref())
    }
}

/// Read/write access to the specs of a layer.
pub trait AbstractData: Send + Sync {
    fn has_spec(&self, path: &Path) -> bool;

    fn spec_type(&self, path: &Path) -> Option<SpecType>;

    fn get(&self, path: &Path, field: &str) -> Option<Value>;

    /// Names of the fields authored at `path`.
    fn list(&self, path: &Path) -> Vec<String>;

    /// Paths of every spec in the store.
    fn spec_paths(&self) -> Vec<Path>;

    fn create_spec(&mut self, path: &Path, ty: SpecType);

    fn erase_spec(&mut self, path: &Path);

    /// Set a field. The spec must exist.
    fn set(&mut self, path: &Path, field: &str, value: Value);

    fn erase(&mut self, path: &Path, field: &str);
}

/// In-memory spec storage.
#[derive(Debug, Default, Clone)]
pub struct Data {
    specs: HashMap<Path, Spec>,
}

impl Data {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: HashMap<Path, Spec>) -> Self {
        Self { specs }
    }
}

impl AbstractData for Data {
    fn has_spec(&self, path: &Path) -> bool {
        self.specs.contains_key(path)
    }

    fn spec_type(&self, path: &Path) -> Option<SpecType> {
        self.specs.get(path).map(|spec| spec.ty)
    }

    fn get(&self, path: &Path, field: &str) -> Option<Value> {
        self.specs.get(path)?.fields.get(field).cloned()
    }

    fn list(&self, path: &Path) -> Vec<String> {
        let mut keys: Vec<String> = self
            .specs
            .get(path)
            .map(|spec| spec.fields.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort_unstable();
        keys
    }

    fn spec_paths(&self) -> Vec<Path> {
        let mut paths: Vec<Path> = self.specs.keys().cloned().collect();
        paths.sort_unstable();
        paths
    }

    fn create_spec(&mut self, path: &Path, ty: SpecType) {
        self.specs.entry(path.clone()).or_insert_with(|| Spec::new(ty));
    }

    fn erase_spec(&mut self, path: &Path) {
        self.specs.remove(path);
    }

    fn set(&mut self, path: &Path, field: &str, value: Value) {
        if let Some(spec) = self.specs.get_mut(path) {
            spec.fields.insert(field.to_owned(), value);
        }
    }

    fn erase(&mut self, path: &Path, field: &str) {
        if let Some(spec) = self.specs.get_mut(path) {
            spec.fields.remove(field);
        }
    }
}

/// A shared handle to a layer.
pub type LayerHandle = Arc<Layer>;

static ANONYMOUS_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A layer: an identifier plus its spec storage.
///
/// Layers are compared and hashed by identifier. Content may be edited
/// through the handle; callers that cache composition results must report
/// edits to the cache.
pub struct Layer {
    identifier: String,
    data: RwLock<Box<dyn AbstractData>>,
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer").field("identifier", &self.identifier).finish()
    }
}

impl PartialEq for Layer {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for Layer {}

impl std::hash::Hash for Layer {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
    }
}

impl Layer {
    /// Create a layer over `data`. The pseudo-root spec is created if missing.
    pub fn new(identifier: impl Into<String>, data: impl AbstractData + 'static) -> LayerHandle {
        let mut data: Box<dyn AbstractData> = Box::new(data);
        let root = Path::abs_root();
        if !data.has_spec(&root) {
            data.create_spec(&root, SpecType::PseudoRoot);
        }
        Arc::new(Layer {
            identifier: identifier.into(),
            data: RwLock::new(data),
        })
    }

    /// Create an empty in-memory layer.
    pub fn create(identifier: impl Into<String>) -> LayerHandle {
        Self::new(identifier, Data::new())
    }

    /// Create an empty layer with a unique `anon:` identifier.
    pub fn anonymous(tag: &str) -> LayerHandle {
        let id = ANONYMOUS_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self::create(format!("anon:{id:04}:{tag}"))
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn is_anonymous(&self) -> bool {
        self.identifier.starts_with("anon:")
    }

    pub fn has_spec(&self, path: &Path) -> bool {
        self.data.read().has_spec(path)
    }

    pub fn spec_type(&self, path: &Path) -> Option<SpecType> {
        self.data.read().spec_type(path)
    }

    pub fn get_field(&self, path: &Path, field: impl AsRef<str>) -> Option<Value> {
        self.data.read().get(path, field.as_ref())
    }

    pub fn field_keys(&self, path: &Path) -> Vec<String> {
        self.data.read().list(path)
    }

    pub fn spec_paths(&self) -> Vec<Path> {
        self.data.read().spec_paths()
    }

    /// The `defaultPrim` metadata, if authored and non-empty.
    pub fn default_prim(&self) -> Option<String> {
        match self.get_field(&Path::abs_root(), FieldKey::DefaultPrim)? {
            Value::Token(name) | Value::String(name) if !name.is_empty() => Some(name),
            _ => None,
        }
    }

    /// Create a spec and any missing ancestors, registering each new spec in
    /// its parent's children list.
    pub fn create_spec(&self, path: &Path, ty: SpecType) {
        let mut data = self.data.write();
        create_spec_recursive(&mut **data, path, ty);
    }

    /// Create a prim spec with a specifier.
    pub fn define_prim(&self, path: &Path, specifier: Specifier) {
        self.create_spec(path, SpecType::for_path(path));
        self.data
            .write()
            .set(path, FieldKey::Specifier.as_str(), Value::Specifier(specifier));
    }

    /// Author a field, creating the spec if needed.
    pub fn set_field(&self, path: &Path, field: impl AsRef<str>, value: impl Into<Value>) {
        let mut data = self.data.write();
        if !data.has_spec(path) {
            create_spec_recursive(&mut **data, path, SpecType::for_path(path));
        }
        data.set(path, field.as_ref(), value.into());
    }

    pub fn erase_field(&self, path: &Path, field: impl AsRef<str>) {
        self.data.write().erase(path, field.as_ref());
    }
}

fn create_spec_recursive(data: &mut dyn AbstractData, path: &Path, ty: SpecType) {
    if path.is_empty() || data.has_spec(path) {
        return;
    }

    let (parent, children_key, name) = if let Some((set, selection)) = path.variant_selection() {
        let prim = path.parent_path();
        if selection.is_empty() {
            (prim, ChildrenKey::VariantSetChildren, set.to_owned())
        } else {
            let set_path = match prim.append_variant_selection(set, "") {
                Ok(p) => p,
                Err(_) => return,
            };
            (set_path, ChildrenKey::VariantChildren, selection.to_owned())
        }
    } else if path.is_property_path() {
        (path.parent_path(), ChildrenKey::PropertyChildren, path.name().to_owned())
    } else {
        (path.parent_path(), ChildrenKey::PrimChildren, path.name().to_owned())
    };

    if !parent.is_empty() && !data.has_spec(&parent) {
        create_spec_recursive(data, &parent, SpecType::for_path(&parent));
    }

    data.create_spec(path, ty);
    if matches!(ty, SpecType::Prim | SpecType::Variant) {
        data.set(path, FieldKey::Specifier.as_str(), Value::Specifier(Specifier::Over));
    }

    if parent.is_empty() {
        return;
    }
    let key = children_key.as_str();
    let mut names = match data.get(&parent, key) {
        Some(Value::TokenVec(names)) => names,
        _ => Vec::new(),
    };
    if !names.contains(&name) {
        names.push(name);
        data.set(&parent, key, Value::TokenVec(names));
    }
}
