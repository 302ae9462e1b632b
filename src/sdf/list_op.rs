//! List editing operations.
//!
//! A [`ListOp`] is either an explicit list that replaces whatever it is applied
//! to, or a set of incremental edits (prepend, append, delete, legacy add and
//! reorder). Every list-valued composition field (references, payloads,
//! inherits, specializes, variant set names) is authored as a list op.
//!
//! Applying a stack of list ops works from the weakest opinion to the strongest,
//! starting with an empty list. An explicit opinion discards everything weaker
//! than it; incremental edits accumulate.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use super::path::Path;
use super::value::{Payload, Reference};

/// An item that can be edited by a [`ListOp`].
///
/// Items are de-duplicated by [`ListOpItem::Key`]; two items with the same key
/// are considered the same list entry.
pub trait ListOpItem: Clone {
    type Key: Clone + Eq + Hash;

    fn key(&self) -> Self::Key;
}

macro_rules! impl_list_op_item {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ListOpItem for $ty {
                type Key = $ty;

                fn key(&self) -> Self::Key {
                    self.clone()
                }
            }
        )*
    };
}

impl_list_op_item!(i32, i64, u32, u64, String, Path);

// References and payloads are identified by what they point at. Layer offsets
// and custom data do not make two arcs distinct.
impl ListOpItem for Reference {
    type Key = (String, Path);

    fn key(&self) -> Self::Key {
        (self.asset_path.clone(), self.prim_path.clone())
    }
}

impl ListOpItem for Payload {
    type Key = (String, Path);

    fn key(&self) -> Self::Key {
        (self.asset_path.clone(), self.prim_path.clone())
    }
}

/// Incremental edits of a list.
#[derive(Debug, Clone, PartialEq)]
pub struct ListEdits<T> {
    pub prepended: Vec<T>,
    pub appended: Vec<T>,
    pub deleted: Vec<T>,
    /// Legacy `add`: appended only when not already present.
    pub added: Vec<T>,
    /// Legacy `reorder`.
    pub ordered: Vec<T>,
}

impl<T> Default for ListEdits<T> {
    fn default() -> Self {
        Self {
            prepended: Vec::new(),
            appended: Vec::new(),
            deleted: Vec::new(),
            added: Vec::new(),
            ordered: Vec::new(),
        }
    }
}

impl<T> ListEdits<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepend(mut self, items: Vec<T>) -> Self {
        self.prepended = items;
        self
    }

    pub fn append(mut self, items: Vec<T>) -> Self {
        self.appended = items;
        self
    }

    pub fn delete(mut self, items: Vec<T>) -> Self {
        self.deleted = items;
        self
    }

    pub fn add(mut self, items: Vec<T>) -> Self {
        self.added = items;
        self
    }

    pub fn reorder(mut self, items: Vec<T>) -> Self {
        self.ordered = items;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.prepended.is_empty()
            && self.appended.is_empty()
            && self.deleted.is_empty()
            && self.added.is_empty()
            && self.ordered.is_empty()
    }
}

/// An explicit list or a set of incremental edits. Never both.
#[derive(Debug, Clone, PartialEq)]
pub enum ListOp<T> {
    Explicit(Vec<T>),
    Edits(ListEdits<T>),
}

impl<T> Default for ListOp<T> {
    fn default() -> Self {
        ListOp::Edits(ListEdits::default())
    }
}

impl<T> ListOp<T> {
    pub fn explicit(items: Vec<T>) -> Self {
        ListOp::Explicit(items)
    }

    pub fn prepend(items: Vec<T>) -> Self {
        ListOp::Edits(ListEdits::new().prepend(items))
    }

    pub fn append(items: Vec<T>) -> Self {
        ListOp::Edits(ListEdits::new().append(items))
    }

    pub fn delete(items: Vec<T>) -> Self {
        ListOp::Edits(ListEdits::new().delete(items))
    }

    pub fn add(items: Vec<T>) -> Self {
        ListOp::Edits(ListEdits::new().add(items))
    }

    pub fn reorder(items: Vec<T>) -> Self {
        ListOp::Edits(ListEdits::new().reorder(items))
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self, ListOp::Explicit(_))
    }

    /// True if applying this op to any list leaves it unchanged.
    ///
    /// An explicit empty list is not a no-op: it clears weaker opinions.
    pub fn is_noop(&self) -> bool {
        match self {
            ListOp::Explicit(_) => false,
            ListOp::Edits(edits) => edits.is_empty(),
        }
    }

    /// Every item mentioned by this op, in any of its lists.
    pub fn iter_items(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        match self {
            ListOp::Explicit(items) => Box::new(items.iter()),
            ListOp::Edits(edits) => Box::new(
                edits
                    .prepended
                    .iter()
                    .chain(&edits.appended)
                    .chain(&edits.deleted)
                    .chain(&edits.added)
                    .chain(&edits.ordered),
            ),
        }
    }

    /// Items this op may insert into the result.
    pub fn iter_inserted(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        match self {
            ListOp::Explicit(items) => Box::new(items.iter()),
            ListOp::Edits(edits) => Box::new(
                edits
                    .added
                    .iter()
                    .chain(&edits.prepended)
                    .chain(&edits.appended),
            ),
        }
    }
}

impl<T: ListOpItem> ListOp<T> {
    /// Apply this op to `base` and return the edited list.
    ///
    /// Explicit ops return their items (de-duplicated, first occurrence wins).
    /// Incremental ops compute `(base ∪ added ∪ prepended ∪ appended) − deleted`
    /// and then apply the reorder list.
    pub fn apply_to(&self, base: &[T]) -> Vec<T> {
        match self {
            ListOp::Explicit(items) => dedup(items.iter().cloned()),
            ListOp::Edits(edits) => {
                let mut result = dedup(base.iter().cloned());

                if !edits.added.is_empty() {
                    let mut present: HashSet<T::Key> = result.iter().map(ListOpItem::key).collect();
                    for item in &edits.added {
                        if present.insert(item.key()) {
                            result.push(item.clone());
                        }
                    }
                }

                if !edits.prepended.is_empty() {
                    let front = dedup(edits.prepended.iter().cloned());
                    let keys: HashSet<T::Key> = front.iter().map(ListOpItem::key).collect();
                    result.retain(|item| !keys.contains(&item.key()));
                    result.splice(0..0, front);
                }

                if !edits.appended.is_empty() {
                    let back = dedup(edits.appended.iter().cloned());
                    let keys: HashSet<T::Key> = back.iter().map(ListOpItem::key).collect();
                    result.retain(|item| !keys.contains(&item.key()));
                    result.extend(back);
                }

                if !edits.deleted.is_empty() {
                    let keys: HashSet<T::Key> = edits.deleted.iter().map(ListOpItem::key).collect();
                    result.retain(|item| !keys.contains(&item.key()));
                }

                if !edits.ordered.is_empty() {
                    reorder(&mut result, &edits.ordered);
                }

                result
            }
        }
    }

    /// Collapse this op into an explicit op holding the result of applying it
    /// to an empty list.
    pub fn flatten(&self) -> ListOp<T> {
        ListOp::Explicit(self.apply_to(&[]))
    }
}

/// Apply a stack of list ops ordered strongest first.
///
/// Opinions weaker than the strongest explicit op are ignored; the remaining
/// ops are applied weakest first, starting from an empty list.
pub fn apply_list_ops<'a, T, I>(ops_strongest_first: I) -> Vec<T>
where
    T: ListOpItem + 'a,
    I: IntoIterator<Item = &'a ListOp<T>>,
{
    let mut relevant = Vec::new();
    for op in ops_strongest_first {
        relevant.push(op);
        if op.is_explicit() {
            break;
        }
    }

    relevant
        .into_iter()
        .rev()
        .fold(Vec::new(), |acc, op| op.apply_to(&acc))
}

fn dedup<T: ListOpItem>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(item.key())).collect()
}

/// Items listed in `order` are arranged in that order. Items not listed stay
/// attached to the nearest preceding listed item (or at the front when no
/// listed item precedes them).
fn reorder<T: ListOpItem>(result: &mut Vec<T>, order: &[T]) {
    let order_keys: Vec<T::Key> = dedup(order.iter().cloned()).iter().map(ListOpItem::key).collect();
    let ordered: HashSet<&T::Key> = order_keys.iter().collect();

    let mut leading = Vec::new();
    let mut chunks: HashMap<T::Key, Vec<T>> = HashMap::new();
    let mut current: Option<T::Key> = None;

    for item in result.drain(..) {
        let key = item.key();
        if ordered.contains(&key) {
            chunks.entry(key.clone()).or_default().push(item);
            current = Some(key);
        } else {
            match &current {
                Some(anchor) => chunks.entry(anchor.clone()).or_default().push(item),
                None => leading.push(item),
            }
        }
    }

    result.extend(leading);
    for key in &order_keys {
        if let Some(chunk) = chunks.remove(key) {
            result.extend(chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdf::value::LayerOffset;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn explicit_ignores_base() {
        let op = ListOp::explicit(strings(&["a", "b", "a"]));
        assert_eq!(op.apply_to(&strings(&["x"])), strings(&["a", "b"]));
        assert!(op.is_explicit());
    }

    #[test]
    fn prepend_moves_existing_items_to_front() {
        let op = ListOp::prepend(strings(&["c", "a"]));
        assert_eq!(op.apply_to(&strings(&["a", "b"])), strings(&["c", "a", "b"]));
    }

    #[test]
    fn append_moves_existing_items_to_back() {
        let op = ListOp::append(strings(&["a"]));
        assert_eq!(op.apply_to(&strings(&["a", "b"])), strings(&["b", "a"]));
    }

    #[test]
    fn delete_is_applied_after_additions() {
        let op = ListOp::Edits(ListEdits::new().prepend(strings(&["a"])).delete(strings(&["a", "b"])));
        assert_eq!(op.apply_to(&strings(&["b", "c"])), strings(&["c"]));
    }

    #[test]
    fn legacy_add_keeps_existing_position() {
        let op = ListOp::add(strings(&["a", "d"]));
        assert_eq!(op.apply_to(&strings(&["a", "b"])), strings(&["a", "b", "d"]));
    }

    #[test]
    fn reorder_keeps_unlisted_items_attached() {
        let op = ListOp::reorder(strings(&["c", "a"]));
        assert_eq!(
            op.apply_to(&strings(&["x", "a", "b", "c", "d"])),
            strings(&["x", "c", "d", "a", "b"])
        );
    }

    #[test]
    fn reorder_never_adds_items() {
        let op = ListOp::reorder(strings(&["z", "a"]));
        assert_eq!(op.apply_to(&strings(&["b", "a"])), strings(&["b", "a"]));
    }

    #[test]
    fn stronger_explicit_terminates_composition() {
        let strong = ListOp::explicit(strings(&["a", "b"]));
        let weak = ListOp::prepend(strings(&["c"]));
        assert_eq!(apply_list_ops([&strong, &weak]), strings(&["a", "b"]));
    }

    #[test]
    fn stronger_delete_applies_to_weaker_explicit() {
        let strong = ListOp::delete(strings(&["a"]));
        let weak = ListOp::explicit(strings(&["a", "b", "c"]));
        assert_eq!(apply_list_ops([&strong, &weak]), strings(&["b", "c"]));
    }

    #[test]
    fn incremental_ops_accumulate_weakest_first() {
        let strong = ListOp::prepend(strings(&["a"]));
        let middle = ListOp::delete(strings(&["a"]));
        let weak = ListOp::append(strings(&["a", "b"]));
        // weak: [a, b], middle removes a, strong prepends it again.
        assert_eq!(apply_list_ops([&strong, &middle, &weak]), strings(&["a", "b"]));
        // Without the strong re-add the deletion wins.
        assert_eq!(apply_list_ops([&middle, &weak]), strings(&["b"]));
    }

    #[test]
    fn references_deduplicate_by_target() {
        let a = Reference::new("a.usda", Path::new("/A").unwrap());
        let shifted = a.clone().with_layer_offset(LayerOffset::new(5.0, 1.0));
        let op = ListOp::append(vec![a.clone(), shifted]);
        assert_eq!(op.apply_to(&[]), vec![a]);
    }

    fn arb_items() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "d", "e"]), 0..5)
            .prop_map(|v| v.into_iter().map(str::to_owned).collect())
    }

    fn arb_list_op() -> impl Strategy<Value = ListOp<String>> {
        prop_oneof![
            arb_items().prop_map(ListOp::Explicit),
            (arb_items(), arb_items(), arb_items(), arb_items()).prop_map(|(p, a, d, o)| {
                ListOp::Edits(ListEdits::new().prepend(p).append(a).delete(d).reorder(o))
            }),
        ]
    }

    proptest! {
        #[test]
        fn flattening_a_stack_is_idempotent(ops in prop::collection::vec(arb_list_op(), 0..6)) {
            let flattened = apply_list_ops(ops.iter());
            let explicit = ListOp::explicit(flattened.clone());
            prop_assert_eq!(explicit.apply_to(&[]), flattened.clone());
            prop_assert_eq!(apply_list_ops([&explicit]), flattened);
        }

        #[test]
        fn results_never_contain_duplicates(ops in prop::collection::vec(arb_list_op(), 0..6)) {
            let result = apply_list_ops(ops.iter());
            let unique: HashSet<_> = result.iter().collect();
            prop_assert_eq!(unique.len(), result.len());
        }

        #[test]
        fn explicit_opinion_hides_weaker_ones(
            strong in arb_items(),
            weaker in prop::collection::vec(arb_list_op(), 0..4),
        ) {
            let explicit = ListOp::Explicit(strong.clone());
            let stack: Vec<&ListOp<String>> = std::iter::once(&explicit).chain(weaker.iter()).collect();
            prop_assert_eq!(apply_list_ops(stack), dedup(strong));
        }
    }
}
