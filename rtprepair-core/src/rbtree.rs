//! Generic red-black tree over externally stored nodes
//!
//! The tree never owns or allocates its elements. Each element embeds its
//! own [`Links`] and lives in a [`NodeStore`] (normally a
//! [`NodePool`](crate::pool::NodePool)); the tree only keeps the handle of
//! its root. Keys are unique: inserting a node whose key is already present
//! is rejected rather than overwritten.
//!
//! ## Operations
//!
//! - `insert` / `remove` with rotation and recolouring fix-ups
//! - `find` (exact), `find_le` (greatest key <= k), `find_ge` (smallest key >= k)
//! - `min` / `max` / `next` / `prev` and an ascending iterator
//!
//! All operations are O(log n) in the number of stored nodes.

use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;

/// Handle of a node inside a [`NodeStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red,
    Black,
}

/// Tree linkage embedded in every element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Links {
    pub left: Option<NodeId>,
    pub right: Option<NodeId>,
    pub parent: Option<NodeId>,
    pub color: Color,
}

impl Links {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            left: None,
            right: None,
            parent: None,
            color: Color::Red,
        }
    }
}

impl Default for Links {
    fn default() -> Self {
        Self::new()
    }
}

/// An element that can be linked into an [`RbTree`]
pub trait TreeNode {
    type Key: Copy;

    fn key(&self) -> Self::Key;
    fn links(&self) -> &Links;
    fn links_mut(&mut self) -> &mut Links;
}

/// Total order over tree keys
pub trait Compare<K> {
    fn compare(a: &K, b: &K) -> Ordering;
}

/// Key order taken from the key's own `Ord` implementation, for trees over
/// plainly ordered keys
#[derive(Debug, Clone, Copy, Default)]
pub struct NaturalOrder;

impl<K: Ord> Compare<K> for NaturalOrder {
    fn compare(a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Storage that resolves node handles
///
/// Handles passed to the tree must be valid for the store; an invalid handle
/// is a caller bug and panics on index.
pub trait NodeStore<N> {
    fn node(&self, id: NodeId) -> &N;
    fn node_mut(&mut self, id: NodeId) -> &mut N;
}

/// Structural problems found by [`RbTree::validate`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("root {0} is red")]
    RedRoot(NodeId),

    #[error("red node {0} has a red child")]
    RedRed(NodeId),

    #[error("black height differs below {0}")]
    BlackHeight(NodeId),

    #[error("node {0} is out of key order")]
    OutOfOrder(NodeId),

    #[error("node {0} has a wrong parent link")]
    BadParent(NodeId),
}

/// Red-black tree holding handles into a [`NodeStore`]
pub struct RbTree<N, C> {
    root: Option<NodeId>,
    _marker: PhantomData<fn() -> (N, C)>,
}

impl<N, C> fmt::Debug for RbTree<N, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RbTree").field("root", &self.root).finish()
    }
}

impl<N, C> Default for RbTree<N, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N, C> RbTree<N, C> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            root: None,
            _marker: PhantomData,
        }
    }

    /// Root handle, for callers that walk the links themselves
    #[must_use]
    pub const fn root(&self) -> Option<NodeId> {
        self.root
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.root.is_none()
    }
}

impl<N, C> RbTree<N, C>
where
    N: TreeNode,
    C: Compare<N::Key>,
{
    /// Link `id` into the tree.
    ///
    /// Returns `None` on success, or the handle of the node that already
    /// holds the same key. On rejection the tree is left untouched.
    pub fn insert<S: NodeStore<N>>(&mut self, store: &mut S, id: NodeId) -> Option<NodeId> {
        let key = store.node(id).key();
        let mut parent = None;
        let mut went_left = false;
        let mut cur = self.root;

        while let Some(c) = cur {
            parent = Some(c);
            match C::compare(&key, &store.node(c).key()) {
                Ordering::Less => {
                    went_left = true;
                    cur = Self::left(store, c);
                }
                Ordering::Greater => {
                    went_left = false;
                    cur = Self::right(store, c);
                }
                Ordering::Equal => return Some(c),
            }
        }

        *store.node_mut(id).links_mut() = Links {
            left: None,
            right: None,
            parent,
            color: Color::Red,
        };
        match parent {
            None => self.root = Some(id),
            Some(p) if went_left => Self::links_mut(store, p).left = Some(id),
            Some(p) => Self::links_mut(store, p).right = Some(id),
        }

        self.insert_fixup(store, id);
        None
    }

    /// Unlink `id` from the tree.
    ///
    /// Returns `None` if `id` is not a member of this tree.
    pub fn remove<S: NodeStore<N>>(&mut self, store: &mut S, id: NodeId) -> Option<NodeId> {
        let key = store.node(id).key();
        if self.find(store, &key) != Some(id) {
            return None;
        }

        let z = id;
        let mut removed_color = Self::color(store, z);
        let x;
        let x_parent;

        match (Self::left(store, z), Self::right(store, z)) {
            (None, right) => {
                x = right;
                x_parent = Self::parent(store, z);
                self.transplant(store, z, right);
            }
            (left, None) => {
                x = left;
                x_parent = Self::parent(store, z);
                self.transplant(store, z, left);
            }
            (Some(z_left), Some(z_right)) => {
                let y = Self::subtree_min(store, z_right);
                removed_color = Self::color(store, y);
                x = Self::right(store, y);

                if Self::parent(store, y) == Some(z) {
                    x_parent = Some(y);
                } else {
                    x_parent = Self::parent(store, y);
                    self.transplant(store, y, x);
                    Self::links_mut(store, y).right = Some(z_right);
                    Self::links_mut(store, z_right).parent = Some(y);
                }

                self.transplant(store, z, Some(y));
                Self::links_mut(store, y).left = Some(z_left);
                Self::links_mut(store, z_left).parent = Some(y);
                let z_color = Self::color(store, z);
                Self::links_mut(store, y).color = z_color;
            }
        }

        if removed_color == Color::Black {
            self.remove_fixup(store, x, x_parent);
        }

        *store.node_mut(z).links_mut() = Links::new();
        Some(z)
    }

    /// Node holding exactly `key`
    pub fn find<S: NodeStore<N>>(&self, store: &S, key: &N::Key) -> Option<NodeId> {
        let mut cur = self.root;
        while let Some(c) = cur {
            cur = match C::compare(key, &store.node(c).key()) {
                Ordering::Less => Self::left(store, c),
                Ordering::Greater => Self::right(store, c),
                Ordering::Equal => return Some(c),
            };
        }
        None
    }

    /// Node with the greatest key that is less than or equal to `key`
    pub fn find_le<S: NodeStore<N>>(&self, store: &S, key: &N::Key) -> Option<NodeId> {
        let mut best = None;
        let mut cur = self.root;
        while let Some(c) = cur {
            cur = match C::compare(key, &store.node(c).key()) {
                Ordering::Less => Self::left(store, c),
                Ordering::Greater => {
                    best = Some(c);
                    Self::right(store, c)
                }
                Ordering::Equal => return Some(c),
            };
        }
        best
    }

    /// Node with the smallest key that is greater than or equal to `key`
    pub fn find_ge<S: NodeStore<N>>(&self, store: &S, key: &N::Key) -> Option<NodeId> {
        let mut best = None;
        let mut cur = self.root;
        while let Some(c) = cur {
            cur = match C::compare(key, &store.node(c).key()) {
                Ordering::Less => {
                    best = Some(c);
                    Self::left(store, c)
                }
                Ordering::Greater => Self::right(store, c),
                Ordering::Equal => return Some(c),
            };
        }
        best
    }

    pub fn min<S: NodeStore<N>>(&self, store: &S) -> Option<NodeId> {
        self.root.map(|r| Self::subtree_min(store, r))
    }

    /// Largest node. Part of the general tree API; the gap set only walks upward.
    pub fn max<S: NodeStore<N>>(&self, store: &S) -> Option<NodeId> {
        self.root.map(|r| Self::subtree_max(store, r))
    }

    /// In-order successor of `id`
    pub fn next<S: NodeStore<N>>(&self, store: &S, id: NodeId) -> Option<NodeId> {
        Self::successor(store, id)
    }

    /// In-order predecessor of `id`, for callers walking downward
    pub fn prev<S: NodeStore<N>>(&self, store: &S, id: NodeId) -> Option<NodeId> {
        if let Some(l) = Self::left(store, id) {
            return Some(Self::subtree_max(store, l));
        }
        let mut child = id;
        let mut parent = Self::parent(store, id);
        while let Some(p) = parent {
            if Self::left(store, p) != Some(child) {
                return Some(p);
            }
            child = p;
            parent = Self::parent(store, p);
        }
        None
    }

    /// Ascending iteration over node handles
    pub fn iter<'a, S: NodeStore<N>>(&self, store: &'a S) -> Iter<'a, N, C, S> {
        Iter {
            store,
            next: self.min(store),
            _tree: PhantomData,
        }
    }

    /// Number of linked nodes. O(n).
    pub fn len<S: NodeStore<N>>(&self, store: &S) -> usize {
        self.iter(store).count()
    }

    /// Check ordering, parent links and the red-black rules.
    ///
    /// Returns the black height of the tree.
    pub fn validate<S: NodeStore<N>>(&self, store: &S) -> Result<usize, TreeError> {
        let Some(root) = self.root else {
            return Ok(0);
        };
        if Self::color(store, root) == Color::Red {
            return Err(TreeError::RedRoot(root));
        }
        if Self::parent(store, root).is_some() {
            return Err(TreeError::BadParent(root));
        }
        let height = Self::validate_subtree(store, root)?;

        let mut prev: Option<NodeId> = None;
        for id in self.iter(store) {
            if let Some(p) = prev {
                let ord = C::compare(&store.node(p).key(), &store.node(id).key());
                if ord != Ordering::Less {
                    return Err(TreeError::OutOfOrder(id));
                }
            }
            prev = Some(id);
        }
        Ok(height)
    }

    fn validate_subtree<S: NodeStore<N>>(store: &S, id: NodeId) -> Result<usize, TreeError> {
        let links = *Self::links(store, id);
        for child in [links.left, links.right].into_iter().flatten() {
            if Self::parent(store, child) != Some(id) {
                return Err(TreeError::BadParent(child));
            }
            if links.color == Color::Red && Self::color(store, child) == Color::Red {
                return Err(TreeError::RedRed(id));
            }
        }
        let lh = match links.left {
            Some(l) => Self::validate_subtree(store, l)?,
            None => 1,
        };
        let rh = match links.right {
            Some(r) => Self::validate_subtree(store, r)?,
            None => 1,
        };
        if lh != rh {
            return Err(TreeError::BlackHeight(id));
        }
        Ok(lh + usize::from(links.color == Color::Black))
    }

    fn insert_fixup<S: NodeStore<N>>(&mut self, store: &mut S, id: NodeId) {
        let mut z = id;
        loop {
            let Some(p) = Self::parent(store, z) else {
                break;
            };
            if Self::color(store, p) == Color::Black {
                break;
            }
            // A red parent is never the root, so the grandparent exists.
            let Some(g) = Self::parent(store, p) else {
                break;
            };

            if Self::left(store, g) == Some(p) {
                let uncle = Self::right(store, g);
                if Self::is_red(store, uncle) {
                    Self::set_color(store, p, Color::Black);
                    Self::set_color_opt(store, uncle, Color::Black);
                    Self::set_color(store, g, Color::Red);
                    z = g;
                    continue;
                }
                if Self::right(store, p) == Some(z) {
                    z = p;
                    self.rotate_left(store, z);
                }
                let Some(p) = Self::parent(store, z) else {
                    break;
                };
                let Some(g) = Self::parent(store, p) else {
                    break;
                };
                Self::set_color(store, p, Color::Black);
                Self::set_color(store, g, Color::Red);
                self.rotate_right(store, g);
            } else {
                let uncle = Self::left(store, g);
                if Self::is_red(store, uncle) {
                    Self::set_color(store, p, Color::Black);
                    Self::set_color_opt(store, uncle, Color::Black);
                    Self::set_color(store, g, Color::Red);
                    z = g;
                    continue;
                }
                if Self::left(store, p) == Some(z) {
                    z = p;
                    self.rotate_right(store, z);
                }
                let Some(p) = Self::parent(store, z) else {
                    break;
                };
                let Some(g) = Self::parent(store, p) else {
                    break;
                };
                Self::set_color(store, p, Color::Black);
                Self::set_color(store, g, Color::Red);
                self.rotate_left(store, g);
            }
        }
        Self::set_color_opt(store, self.root, Color::Black);
    }

    fn remove_fixup<S: NodeStore<N>>(
        &mut self,
        store: &mut S,
        mut x: Option<NodeId>,
        mut parent: Option<NodeId>,
    ) {
        while x != self.root && !Self::is_red(store, x) {
            let Some(p) = parent else {
                break;
            };

            if Self::left(store, p) == x {
                // The removed black node guarantees x has a non-empty sibling.
                let Some(mut w) = Self::right(store, p) else {
                    break;
                };
                if Self::color(store, w) == Color::Red {
                    Self::set_color(store, w, Color::Black);
                    Self::set_color(store, p, Color::Red);
                    self.rotate_left(store, p);
                    let Some(nw) = Self::right(store, p) else {
                        break;
                    };
                    w = nw;
                }
                let w_left = Self::left(store, w);
                let w_right = Self::right(store, w);
                if !Self::is_red(store, w_left) && !Self::is_red(store, w_right) {
                    Self::set_color(store, w, Color::Red);
                    x = Some(p);
                    parent = Self::parent(store, p);
                } else {
                    if !Self::is_red(store, w_right) {
                        Self::set_color_opt(store, w_left, Color::Black);
                        Self::set_color(store, w, Color::Red);
                        self.rotate_right(store, w);
                        let Some(nw) = Self::right(store, p) else {
                            break;
                        };
                        w = nw;
                    }
                    let p_color = Self::color(store, p);
                    Self::set_color(store, w, p_color);
                    Self::set_color(store, p, Color::Black);
                    let w_right = Self::right(store, w);
                    Self::set_color_opt(store, w_right, Color::Black);
                    self.rotate_left(store, p);
                    x = self.root;
                    parent = None;
                }
            } else {
                let Some(mut w) = Self::left(store, p) else {
                    break;
                };
                if Self::color(store, w) == Color::Red {
                    Self::set_color(store, w, Color::Black);
                    Self::set_color(store, p, Color::Red);
                    self.rotate_right(store, p);
                    let Some(nw) = Self::left(store, p) else {
                        break;
                    };
                    w = nw;
                }
                let w_left = Self::left(store, w);
                let w_right = Self::right(store, w);
                if !Self::is_red(store, w_left) && !Self::is_red(store, w_right) {
                    Self::set_color(store, w, Color::Red);
                    x = Some(p);
                    parent = Self::parent(store, p);
                } else {
                    if !Self::is_red(store, w_left) {
                        Self::set_color_opt(store, w_right, Color::Black);
                        Self::set_color(store, w, Color::Red);
                        self.rotate_left(store, w);
                        let Some(nw) = Self::left(store, p) else {
                            break;
                        };
                        w = nw;
                    }
                    let p_color = Self::color(store, p);
                    Self::set_color(store, w, p_color);
                    Self::set_color(store, p, Color::Black);
                    let w_left = Self::left(store, w);
                    Self::set_color_opt(store, w_left, Color::Black);
                    self.rotate_right(store, p);
                    x = self.root;
                    parent = None;
                }
            }
        }
        Self::set_color_opt(store, x, Color::Black);
    }

    fn rotate_left<S: NodeStore<N>>(&mut self, store: &mut S, x: NodeId) {
        let Some(y) = Self::right(store, x) else {
            return;
        };
        let y_left = Self::left(store, y);
        Self::links_mut(store, x).right = y_left;
        if let Some(b) = y_left {
            Self::links_mut(store, b).parent = Some(x);
        }
        let x_parent = Self::parent(store, x);
        Self::links_mut(store, y).parent = x_parent;
        self.replace_child(store, x_parent, x, Some(y));
        Self::links_mut(store, y).left = Some(x);
        Self::links_mut(store, x).parent = Some(y);
    }

    fn rotate_right<S: NodeStore<N>>(&mut self, store: &mut S, x: NodeId) {
        let Some(y) = Self::left(store, x) else {
            return;
        };
        let y_right = Self::right(store, y);
        Self::links_mut(store, x).left = y_right;
        if let Some(b) = y_right {
            Self::links_mut(store, b).parent = Some(x);
        }
        let x_parent = Self::parent(store, x);
        Self::links_mut(store, y).parent = x_parent;
        self.replace_child(store, x_parent, x, Some(y));
        Self::links_mut(store, y).right = Some(x);
        Self::links_mut(store, x).parent = Some(y);
    }

    /// Put subtree `v` where `u` hangs. `u`'s own links are left as-is.
    fn transplant<S: NodeStore<N>>(&mut self, store: &mut S, u: NodeId, v: Option<NodeId>) {
        let u_parent = Self::parent(store, u);
        self.replace_child(store, u_parent, u, v);
        if let Some(v) = v {
            Self::links_mut(store, v).parent = u_parent;
        }
    }

    fn replace_child<S: NodeStore<N>>(
        &mut self,
        store: &mut S,
        parent: Option<NodeId>,
        old: NodeId,
        new: Option<NodeId>,
    ) {
        match parent {
            None => self.root = new,
            Some(p) => {
                let links = Self::links_mut(store, p);
                if links.left == Some(old) {
                    links.left = new;
                } else {
                    links.right = new;
                }
            }
        }
    }

    fn successor<S: NodeStore<N>>(store: &S, id: NodeId) -> Option<NodeId> {
        if let Some(r) = Self::right(store, id) {
            return Some(Self::subtree_min(store, r));
        }
        let mut child = id;
        let mut parent = Self::parent(store, id);
        while let Some(p) = parent {
            if Self::right(store, p) != Some(child) {
                return Some(p);
            }
            child = p;
            parent = Self::parent(store, p);
        }
        None
    }

    fn subtree_min<S: NodeStore<N>>(store: &S, mut id: NodeId) -> NodeId {
        while let Some(l) = Self::left(store, id) {
            id = l;
        }
        id
    }

    fn subtree_max<S: NodeStore<N>>(store: &S, mut id: NodeId) -> NodeId {
        while let Some(r) = Self::right(store, id) {
            id = r;
        }
        id
    }

    fn links<'s, S: NodeStore<N>>(store: &'s S, id: NodeId) -> &'s Links
    where
        N: 's,
    {
        store.node(id).links()
    }

    fn links_mut<'s, S: NodeStore<N>>(store: &'s mut S, id: NodeId) -> &'s mut Links
    where
        N: 's,
    {
        store.node_mut(id).links_mut()
    }

    fn left<S: NodeStore<N>>(store: &S, id: NodeId) -> Option<NodeId> {
        Self::links(store, id).left
    }

    fn right<S: NodeStore<N>>(store: &S, id: NodeId) -> Option<NodeId> {
        Self::links(store, id).right
    }

    fn parent<S: NodeStore<N>>(store: &S, id: NodeId) -> Option<NodeId> {
        Self::links(store, id).parent
    }

    fn color<S: NodeStore<N>>(store: &S, id: NodeId) -> Color {
        Self::links(store, id).color
    }

    /// Empty subtrees count as black.
    fn is_red<S: NodeStore<N>>(store: &S, id: Option<NodeId>) -> bool {
        id.is_some_and(|id| Self::color(store, id) == Color::Red)
    }

    fn set_color<S: NodeStore<N>>(store: &mut S, id: NodeId, color: Color) {
        Self::links_mut(store, id).color = color;
    }

    fn set_color_opt<S: NodeStore<N>>(store: &mut S, id: Option<NodeId>, color: Color) {
        if let Some(id) = id {
            Self::set_color(store, id, color);
        }
    }
}

/// Ascending iterator returned by [`RbTree::iter`]
pub struct Iter<'a, N, C, S> {
    store: &'a S,
    next: Option<NodeId>,
    _tree: PhantomData<fn() -> (N, C)>,
}

impl<N, C, S> Iterator for Iter<'_, N, C, S>
where
    N: TreeNode,
    C: Compare<N::Key>,
    S: NodeStore<N>,
{
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let cur = self.next?;
        self.next = RbTree::<N, C>::successor(self.store, cur);
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeSet;

    #[derive(Debug)]
    struct TestNode {
        key: u32,
        links: Links,
    }

    impl TreeNode for TestNode {
        type Key = u32;

        fn key(&self) -> u32 {
            self.key
        }

        fn links(&self) -> &Links {
            &self.links
        }

        fn links_mut(&mut self) -> &mut Links {
            &mut self.links
        }
    }

    impl NodeStore<TestNode> for Vec<TestNode> {
        fn node(&self, id: NodeId) -> &TestNode {
            &self[id.index()]
        }

        fn node_mut(&mut self, id: NodeId) -> &mut TestNode {
            &mut self[id.index()]
        }
    }

    type TestTree = RbTree<TestNode, NaturalOrder>;

    fn store_with(keys: &[u32]) -> Vec<TestNode> {
        keys.iter()
            .map(|&key| TestNode {
                key,
                links: Links::new(),
            })
            .collect()
    }

    fn id(i: usize) -> NodeId {
        NodeId::new(i as u32)
    }

    fn keys_in_order(tree: &TestTree, store: &Vec<TestNode>) -> Vec<u32> {
        tree.iter(store).map(|n| store.node(n).key).collect()
    }

    #[test]
    fn test_empty_tree() {
        let store: Vec<TestNode> = Vec::new();
        let tree = TestTree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.min(&store), None);
        assert_eq!(tree.max(&store), None);
        assert_eq!(tree.find_le(&store, &5), None);
        assert_eq!(tree.find_ge(&store, &5), None);
        assert_eq!(tree.validate(&store), Ok(0));
    }

    #[test]
    fn test_insert_keeps_order_and_balance() {
        let keys: Vec<u32> = (0..64).collect();
        let mut store = store_with(&keys);
        let mut tree = TestTree::new();
        for i in 0..keys.len() {
            assert_eq!(tree.insert(&mut store, id(i)), None);
            tree.validate(&store).expect("valid after insert");
        }
        assert_eq!(keys_in_order(&tree, &store), keys);
        assert_eq!(tree.len(&store), 64);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut store = store_with(&[10, 20, 10]);
        let mut tree = TestTree::new();
        assert_eq!(tree.insert(&mut store, id(0)), None);
        assert_eq!(tree.insert(&mut store, id(1)), None);
        assert_eq!(tree.insert(&mut store, id(2)), Some(id(0)));
        assert_eq!(tree.len(&store), 2);
        assert_eq!(tree.find(&store, &10), Some(id(0)));
    }

    #[test]
    fn test_find_le_and_ge() {
        let mut store = store_with(&[10, 20, 30, 40]);
        let mut tree = TestTree::new();
        for i in 0..4 {
            tree.insert(&mut store, id(i));
        }
        assert_eq!(tree.find_le(&store, &5), None);
        assert_eq!(tree.find_le(&store, &10), Some(id(0)));
        assert_eq!(tree.find_le(&store, &25), Some(id(1)));
        assert_eq!(tree.find_le(&store, &99), Some(id(3)));
        assert_eq!(tree.find_ge(&store, &5), Some(id(0)));
        assert_eq!(tree.find_ge(&store, &30), Some(id(2)));
        assert_eq!(tree.find_ge(&store, &31), Some(id(3)));
        assert_eq!(tree.find_ge(&store, &41), None);
        assert_eq!(tree.find(&store, &25), None);
    }

    #[test]
    fn test_next_and_prev_walk() {
        let mut store = store_with(&[3, 1, 4, 5, 9, 2, 6]);
        let mut tree = TestTree::new();
        for i in 0..store.len() {
            tree.insert(&mut store, id(i));
        }
        let mut forward = Vec::new();
        let mut cur = tree.min(&store);
        while let Some(n) = cur {
            forward.push(store.node(n).key);
            cur = tree.next(&store, n);
        }
        assert_eq!(forward, vec![1, 2, 3, 4, 5, 6, 9]);

        let mut backward = Vec::new();
        let mut cur = tree.max(&store);
        while let Some(n) = cur {
            backward.push(store.node(n).key);
            cur = tree.prev(&store, n);
        }
        assert_eq!(backward, vec![9, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_remove_non_member() {
        let mut store = store_with(&[1, 2, 2]);
        let mut tree = TestTree::new();
        tree.insert(&mut store, id(0));
        tree.insert(&mut store, id(1));
        // Same key as a member, but a different node.
        assert_eq!(tree.remove(&mut store, id(2)), None);
        assert_eq!(tree.len(&store), 2);
        assert_eq!(tree.remove(&mut store, id(1)), Some(id(1)));
        assert_eq!(tree.remove(&mut store, id(1)), None);
    }

    #[test]
    fn test_remove_root_and_relink() {
        let mut store = store_with(&[50, 25, 75, 10, 30, 60, 90]);
        let mut tree = TestTree::new();
        for i in 0..store.len() {
            tree.insert(&mut store, id(i));
        }
        let root = tree.root().expect("non-empty");
        assert_eq!(tree.remove(&mut store, root), Some(root));
        tree.validate(&store).expect("valid after root removal");
        assert_eq!(store.node(root).links, Links::new());
        assert_eq!(keys_in_order(&tree, &store).len(), 6);
        // The removed node can be linked again.
        assert_eq!(tree.insert(&mut store, root), None);
        tree.validate(&store).expect("valid after reinsert");
    }

    #[test]
    fn test_validate_reports_corrupted_links() {
        let keys = [20, 10, 30, 5];
        let mut store = store_with(&keys);
        let mut tree = TestTree::new();
        for i in 0..keys.len() {
            tree.insert(&mut store, id(i));
        }
        tree.validate(&store).expect("valid before corruption");

        let root = tree.root().unwrap();
        store.node_mut(root).links.color = Color::Red;
        assert_eq!(tree.validate(&store), Err(TreeError::RedRoot(root)));
        store.node_mut(root).links.color = Color::Black;

        store.node_mut(root).links.parent = Some(id(3));
        assert_eq!(tree.validate(&store), Err(TreeError::BadParent(root)));
    }

    /// Node borrowing its payload, so the store holds a non-'static type
    struct LabelNode<'a> {
        label: &'a str,
        links: Links,
    }

    impl<'a> TreeNode for LabelNode<'a> {
        type Key = &'a str;

        fn key(&self) -> &'a str {
            self.label
        }

        fn links(&self) -> &Links {
            &self.links
        }

        fn links_mut(&mut self) -> &mut Links {
            &mut self.links
        }
    }

    impl<'a> NodeStore<LabelNode<'a>> for Vec<LabelNode<'a>> {
        fn node(&self, id: NodeId) -> &LabelNode<'a> {
            &self[id.index()]
        }

        fn node_mut(&mut self, id: NodeId) -> &mut LabelNode<'a> {
            &mut self[id.index()]
        }
    }

    #[test]
    fn test_borrowed_node_type() {
        let text = String::from("delta alpha charlie bravo");
        let mut store: Vec<LabelNode<'_>> = text
            .split(' ')
            .map(|label| LabelNode {
                label,
                links: Links::new(),
            })
            .collect();
        let mut tree: RbTree<LabelNode<'_>, NaturalOrder> = RbTree::new();
        for i in 0..store.len() {
            assert_eq!(tree.insert(&mut store, id(i)), None);
        }
        tree.validate(&store).expect("valid tree");
        let labels: Vec<&str> = tree.iter(&store).map(|n| store.node(n).label).collect();
        assert_eq!(labels, vec!["alpha", "bravo", "charlie", "delta"]);

        assert_eq!(tree.remove(&mut store, id(1)), Some(id(1)));
        assert_eq!(tree.find(&store, &"alpha"), None);
        assert_eq!(tree.find_ge(&store, &"b"), Some(id(3)));
    }

    #[test]
    fn test_random_insert_remove_matches_btreeset() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let keys: Vec<u32> = (0..512).map(|_| rng.gen_range(0..2048)).collect();
        let mut store = store_with(&keys);
        let mut tree = TestTree::new();
        let mut model = BTreeSet::new();
        let mut members = Vec::new();

        for i in 0..keys.len() {
            let dup = tree.insert(&mut store, id(i));
            assert_eq!(dup.is_none(), model.insert(keys[i]));
            if dup.is_none() {
                members.push(i);
            }
        }
        tree.validate(&store).expect("valid after inserts");

        members.shuffle(&mut rng);
        for (n, &i) in members.iter().enumerate() {
            assert_eq!(tree.remove(&mut store, id(i)), Some(id(i)));
            model.remove(&keys[i]);
            if n % 16 == 0 {
                tree.validate(&store).expect("valid during removals");
                let expected: Vec<u32> = model.iter().copied().collect();
                assert_eq!(keys_in_order(&tree, &store), expected);
            }
        }
        assert!(tree.is_empty());
    }
}
