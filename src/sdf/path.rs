//! Scene description paths.
//!
//! A [`Path`] addresses a spec inside a layer. Three kinds of elements are
//! supported:
//!
//! - prim elements: `/World/Geom`
//! - variant selections: `/World{lod=high}` (and prims below them: `/World{lod=high}Mesh`)
//! - a trailing property: `/World/Geom.points`

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, ensure, Context, Result};

/// Parse a path from a string.
///
/// Shorthand for [`Path::new`].
pub fn path(s: &str) -> Result<Path> {
    Path::new(s)
}

/// A scene description path stored in its canonical text form.
///
/// The empty path is the default value and is used where an arc leaves its
/// prim path unspecified (e.g. a reference to a layer's default prim).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(String);

impl Path {
    /// Parse and validate a path.
    pub fn new(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Path::default());
        }
        validate(s).with_context(|| format!("Invalid path <{s}>"))?;
        Ok(Path(s.to_owned()))
    }

    /// The absolute root path `/`.
    pub fn abs_root() -> Self {
        Path("/".to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_absolute_path(&self) -> bool {
        self.0.starts_with('/')
    }

    pub fn is_absolute_root_path(&self) -> bool {
        self.0 == "/"
    }

    pub fn is_property_path(&self) -> bool {
        self.property_start().is_some()
    }

    /// True for prim paths without a trailing variant selection or property.
    pub fn is_prim_path(&self) -> bool {
        !self.is_empty()
            && !self.is_absolute_root_path()
            && !self.is_property_path()
            && !self.0.ends_with('}')
    }

    /// True for paths ending in a variant selection, e.g. `/A{v=x}`.
    pub fn is_prim_variant_selection_path(&self) -> bool {
        !self.is_property_path() && self.0.ends_with('}')
    }

    pub fn is_prim_or_prim_variant_selection_path(&self) -> bool {
        self.is_prim_path() || self.is_prim_variant_selection_path()
    }

    /// True if any element of the path is a variant selection.
    pub fn contains_prim_variant_selection(&self) -> bool {
        self.0.contains('{')
    }

    /// The name of the last element.
    ///
    /// For a variant selection path this is the `set=selection` text.
    pub fn name(&self) -> &str {
        if let Some(dot) = self.property_start() {
            return &self.0[dot + 1..];
        }
        if self.0.ends_with('}') {
            let open = self.0.rfind('{').unwrap_or(0);
            return &self.0[open + 1..self.0.len() - 1];
        }
        match self.0.rfind(|c| c == '/' || c == '}') {
            Some(i) => &self.0[i + 1..],
            None => &self.0,
        }
    }

    /// Returns the `(set, selection)` pair of a variant selection path.
    pub fn variant_selection(&self) -> Option<(&str, &str)> {
        if !self.is_prim_variant_selection_path() {
            return None;
        }
        self.name().split_once('=')
    }

    /// The parent path. The parent of `/` (and of the empty path) is empty.
    pub fn parent_path(&self) -> Path {
        if self.is_empty() || self.is_absolute_root_path() {
            return Path::default();
        }
        if let Some(dot) = self.property_start() {
            return Path(self.0[..dot].to_owned());
        }
        if self.0.ends_with('}') {
            let open = self.0.rfind('{').unwrap_or(0);
            return Path(self.0[..open].to_owned());
        }
        match self.0.rfind(|c| c == '/' || c == '}') {
            Some(0) => Path::abs_root(),
            Some(i) if self.0.as_bytes()[i] == b'}' => Path(self.0[..=i].to_owned()),
            Some(i) => Path(self.0[..i].to_owned()),
            None => Path::default(),
        }
    }

    /// Iterate over this path and all of its ancestors, nearest first.
    pub fn ancestors(&self) -> impl Iterator<Item = Path> {
        let mut next = if self.is_empty() { None } else { Some(self.clone()) };
        std::iter::from_fn(move || {
            let current = next.take()?;
            let parent = current.parent_path();
            if !parent.is_empty() {
                next = Some(parent);
            }
            Some(current)
        })
    }

    /// Append a prim child element.
    pub fn append_child(&self, name: &str) -> Result<Path> {
        ensure!(is_identifier(name), "Invalid prim name '{name}'");
        ensure!(
            !self.is_property_path(),
            "Cannot append child '{name}' to property path <{self}>"
        );
        let joined = if self.is_empty() {
            name.to_owned()
        } else if self.is_absolute_root_path() {
            format!("/{name}")
        } else if self.0.ends_with('}') {
            format!("{}{name}", self.0)
        } else {
            format!("{}/{name}", self.0)
        };
        Ok(Path(joined))
    }

    /// Append a variant selection element `{set=selection}`.
    ///
    /// An empty selection addresses the variant set itself.
    pub fn append_variant_selection(&self, set: &str, selection: &str) -> Result<Path> {
        ensure!(
            self.is_prim_or_prim_variant_selection_path(),
            "Cannot append variant selection to <{self}>"
        );
        ensure!(is_identifier(set), "Invalid variant set name '{set}'");
        ensure!(
            selection.is_empty() || is_variant_identifier(selection),
            "Invalid variant name '{selection}'"
        );
        Ok(Path(format!("{}{{{set}={selection}}}", self.0)))
    }

    /// Append a property element.
    pub fn append_property(&self, name: &str) -> Result<Path> {
        ensure!(is_namespaced_identifier(name), "Invalid property name '{name}'");
        ensure!(
            self.is_prim_or_prim_variant_selection_path(),
            "Cannot append property '{name}' to <{self}>"
        );
        Ok(Path(format!("{}.{name}", self.0)))
    }

    /// True if `prefix` is this path or one of its ancestors.
    pub fn has_prefix(&self, prefix: &Path) -> bool {
        if prefix.is_empty() {
            return false;
        }
        if prefix.is_absolute_root_path() {
            return self.is_absolute_path();
        }
        let Some(rest) = self.0.strip_prefix(prefix.as_str()) else {
            return false;
        };
        rest.is_empty() || prefix.0.ends_with('}') || rest.starts_with(['/', '{', '.'])
    }

    /// Replace the prefix `old` with `new`. Returns a copy of `self` when
    /// `old` is not a prefix.
    pub fn replace_prefix(&self, old: &Path, new: &Path) -> Path {
        if !self.has_prefix(old) {
            return self.clone();
        }

        let rest = if old.is_absolute_root_path() {
            &self.0[1..]
        } else {
            &self.0[old.0.len()..]
        };
        if rest.is_empty() {
            return new.clone();
        }

        let rest_is_element = !rest.starts_with(['/', '{', '.']);
        let joined = if new.is_absolute_root_path() {
            format!("/{}", rest.trim_start_matches('/'))
        } else if new.0.ends_with('}') {
            format!("{}{}", new.0, rest.trim_start_matches('/'))
        } else if rest_is_element {
            format!("{}/{rest}", new.0)
        } else {
            format!("{}{rest}", new.0)
        };
        Path(joined)
    }

    /// Remove every variant selection, e.g. `/A{v=x}B` becomes `/A/B`.
    pub fn strip_all_variant_selections(&self) -> Path {
        if !self.contains_prim_variant_selection() {
            return self.clone();
        }
        let mut out = String::with_capacity(self.0.len());
        let mut chars = self.0.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '{' {
                out.push(c);
                continue;
            }
            for inner in chars.by_ref() {
                if inner == '}' {
                    break;
                }
            }
            match chars.peek() {
                Some('{') | Some('.') | None => {}
                Some(_) => out.push('/'),
            }
        }
        Path(out)
    }

    /// Number of prim elements, ignoring variant selections and properties.
    ///
    /// `/` has depth 0, `/A` depth 1 and `/A{v=x}B` depth 2.
    pub fn element_count(&self) -> usize {
        let stripped = self.strip_all_variant_selections();
        let prim = match stripped.property_start() {
            Some(dot) => &stripped.0[..dot],
            None => stripped.as_str(),
        };
        prim.split('/').filter(|e| !e.is_empty()).count()
    }

    /// Resolve a relative path against `anchor`. Absolute paths are returned unchanged.
    pub fn make_absolute(&self, anchor: &Path) -> Result<Path> {
        if self.is_absolute_path() || self.is_empty() {
            return Ok(self.clone());
        }
        let (prim, property) = match self.property_start() {
            Some(dot) => (&self.0[..dot], Some(&self.0[dot + 1..])),
            None => (self.as_str(), None),
        };

        let mut result = anchor.clone();
        for element in prim.split('/').filter(|e| !e.is_empty()) {
            match element {
                "." => {}
                ".." => {
                    result = result.parent_path();
                    ensure!(!result.is_empty(), "Path <{self}> escapes the root of <{anchor}>");
                }
                name => result = result.append_child(name)?,
            }
        }
        match property {
            Some(name) => result.append_property(name),
            None => Ok(result),
        }
    }

    /// Byte index of the `.` that starts the property element, if any.
    fn property_start(&self) -> Option<usize> {
        let boundary = self
            .0
            .rfind(|c| c == '/' || c == '}')
            .map(|i| i + 1)
            .unwrap_or(0);
        let element = &self.0[boundary..];
        if element.is_empty() || element == "." || element == ".." {
            return None;
        }
        element.find('.').map(|i| i + boundary)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Path {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Path::new(s)
    }
}

impl AsRef<str> for Path {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Identifiers joined by `:`, e.g. `xformOp:translate`.
pub fn is_namespaced_identifier(name: &str) -> bool {
    !name.is_empty() && name.split(':').all(is_identifier)
}

/// Variant names may start with a digit and contain `|` and `-`.
pub fn is_variant_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '|' | '-'))
}

fn validate(s: &str) -> Result<()> {
    if s == "/" {
        return Ok(());
    }

    let boundary = s.rfind(|c| c == '/' || c == '}').map(|i| i + 1).unwrap_or(0);
    let last = &s[boundary..];
    let (prim, property) = match last.find('.') {
        Some(i) if last != "." && last != ".." => (&s[..boundary + i], Some(&last[i + 1..])),
        _ => (s, None),
    };

    if let Some(property) = property {
        ensure!(
            !property.is_empty()
                && property
                    .split(['.', ':'])
                    .all(|e| is_identifier(e)),
            "Invalid property name '{property}'"
        );
    }

    let mut rest = prim.strip_prefix('/').unwrap_or(prim);
    ensure!(!rest.is_empty(), "Missing prim element");

    loop {
        let end = rest.find(['/', '{']).unwrap_or(rest.len());
        let name = &rest[..end];
        ensure!(
            is_identifier(name) || name == "." || name == "..",
            "Invalid prim name '{name}'"
        );
        rest = &rest[end..];

        let mut after_variant = false;
        while let Some(inner) = rest.strip_prefix('{') {
            let close = inner.find('}').context("Unterminated variant selection")?;
            let (set, selection) = inner[..close]
                .split_once('=')
                .context("Variant selection must have the form {set=selection}")?;
            ensure!(is_identifier(set), "Invalid variant set name '{set}'");
            ensure!(
                selection.is_empty() || is_variant_identifier(selection),
                "Invalid variant name '{selection}'"
            );
            rest = &inner[close + 1..];
            after_variant = true;
        }

        if rest.is_empty() {
            return Ok(());
        }
        match rest.strip_prefix('/') {
            Some(_) if after_variant => bail!("Unexpected '/' after variant selection"),
            Some(next) => {
                ensure!(!next.is_empty(), "Trailing '/'");
                rest = next;
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_paths() {
        for s in [
            "/",
            "/World",
            "/World/Geom",
            "/World{lod=high}",
            "/World{lod=high}Mesh",
            "/World{lod=}",
            "/World.points",
            "/World/Geom.xformOp:translate",
            "Child",
            "../Sibling",
        ] {
            assert!(Path::new(s).is_ok(), "{s} should parse");
        }
    }

    #[test]
    fn reject_invalid_paths() {
        for s in ["//", "/World/", "/1abc", "/A{lod}", "/A{lod=x}/B", "/A.", "/A{v=x"] {
            assert!(Path::new(s).is_err(), "{s} should not parse");
        }
    }

    #[test]
    fn parent_paths() {
        assert_eq!(path("/A/B").unwrap().parent_path(), path("/A").unwrap());
        assert_eq!(path("/A").unwrap().parent_path(), Path::abs_root());
        assert_eq!(Path::abs_root().parent_path(), Path::default());
        assert_eq!(path("/A{v=x}").unwrap().parent_path(), path("/A").unwrap());
        assert_eq!(path("/A{v=x}B").unwrap().parent_path(), path("/A{v=x}").unwrap());
        assert_eq!(path("/A/B.attr").unwrap().parent_path(), path("/A/B").unwrap());
    }

    #[test]
    fn append_elements() {
        let root = Path::abs_root();
        let a = root.append_child("A").unwrap();
        assert_eq!(a.as_str(), "/A");
        let v = a.append_variant_selection("lod", "high").unwrap();
        assert_eq!(v.as_str(), "/A{lod=high}");
        assert_eq!(v.variant_selection(), Some(("lod", "high")));
        assert_eq!(v.append_child("Mesh").unwrap().as_str(), "/A{lod=high}Mesh");
        assert_eq!(a.append_property("points").unwrap().as_str(), "/A.points");
        assert!(a.append_child("bad name").is_err());
    }

    #[test]
    fn prefixes() {
        let p = path("/A/B/C").unwrap();
        assert!(p.has_prefix(&path("/A").unwrap()));
        assert!(p.has_prefix(&Path::abs_root()));
        assert!(p.has_prefix(&p));
        assert!(!p.has_prefix(&path("/A/BC").unwrap()));
        assert!(!path("/AB").unwrap().has_prefix(&path("/A").unwrap()));
        assert!(path("/A{v=x}B").unwrap().has_prefix(&path("/A{v=x}").unwrap()));
        assert!(path("/A{v=x}B").unwrap().has_prefix(&path("/A").unwrap()));
    }

    #[test]
    fn replace_prefixes() {
        let p = path("/A/B/C").unwrap();
        assert_eq!(
            p.replace_prefix(&path("/A/B").unwrap(), &path("/X").unwrap()),
            path("/X/C").unwrap()
        );
        assert_eq!(
            p.replace_prefix(&path("/A").unwrap(), &Path::abs_root()),
            path("/B/C").unwrap()
        );
        assert_eq!(
            path("/B").unwrap().replace_prefix(&Path::abs_root(), &path("/R").unwrap()),
            path("/R/B").unwrap()
        );
        assert_eq!(
            p.replace_prefix(&path("/Q").unwrap(), &path("/X").unwrap()),
            p
        );
        assert_eq!(
            path("/A/B").unwrap().replace_prefix(&path("/A").unwrap(), &path("/V{s=x}").unwrap()),
            path("/V{s=x}B").unwrap()
        );
    }

    #[test]
    fn strip_variants_and_depth() {
        let p = path("/A{v=x}B{w=y}.attr").unwrap();
        assert_eq!(p.strip_all_variant_selections().as_str(), "/A/B.attr");
        assert_eq!(p.element_count(), 2);
        assert_eq!(Path::abs_root().element_count(), 0);
        assert_eq!(path("/A{v=x}").unwrap().element_count(), 1);
    }

    #[test]
    fn ancestors_nearest_first() {
        let chain: Vec<_> = path("/A/B").unwrap().ancestors().map(|p| p.to_string()).collect();
        assert_eq!(chain, vec!["/A/B", "/A", "/"]);
    }

    #[test]
    fn make_absolute_resolves_relative_elements() {
        let anchor = path("/World/Set").unwrap();
        assert_eq!(
            path("Child").unwrap().make_absolute(&anchor).unwrap(),
            path("/World/Set/Child").unwrap()
        );
        assert_eq!(
            path("../Other").unwrap().make_absolute(&anchor).unwrap(),
            path("/World/Other").unwrap()
        );
    }
}
