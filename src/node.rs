//! A named tree used as the namespace for [`crate::channel::Channel`]s and
//! [`crate::device::Device`]s.

use crate::errors::NodeError;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, Weak};

/// A child slot: either owned (dropped along with its parent) or linked (a non-owning
/// reference to a node that lives elsewhere in, or outside, this tree).
///
/// Storing linked children as `Weak` rather than a raw back-pointer is what keeps the tree
/// from ever forming an ownership cycle (§9): a link can point anywhere, including back up
/// its own ancestry, without keeping anything alive past its owner's lifetime.
#[derive(Clone)]
enum NodeChild {
    Owned(Arc<Node>),
    Linked(Weak<Node>),
}

impl NodeChild {
    fn upgrade(&self) -> Option<Arc<Node>> {
        match self {
            NodeChild::Owned(node) => Some(node.clone()),
            NodeChild::Linked(weak) => weak.upgrade(),
        }
    }
}

/// A named node in the namespace tree. Each node has at most one parent (tracked as a
/// `Weak` so the tree stays a DAG and never keeps a parent alive past its children) and an
/// arbitrary number of owned/linked children plus symbolic links.
///
/// Mutation (`add_child`, `add_link`, `link_symbol`) is expected only during setup/reset;
/// lookups (`find`, `child`) take no locks beyond the `DashMap`'s own sharded locking, so
/// concurrent reads never contend with each other.
pub struct Node {
    name: String,
    parent: Mutex<Option<Weak<Node>>>,
    children: DashMap<String, NodeChild>,
    /// Symbolic links: child name -> absolute `/`-delimited path, resolved lazily the
    /// first time the link is traversed, against the root of whichever tree the symlink's
    /// owning node currently belongs to.
    symlinks: DashMap<String, String>,
}

impl Node {
    /// Creates a fresh, parentless, childless node named `name`.
    pub fn new(name: impl Into<String>) -> Arc<Node> {
        Arc::new(Node {
            name: name.into(),
            parent: Mutex::new(None),
            children: DashMap::new(),
            symlinks: DashMap::new(),
        })
    }

    /// This node's own (non-path) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This node's parent, if any and still alive.
    pub fn parent(&self) -> Option<Arc<Node>> {
        self.parent.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    /// The root of the tree this node belongs to (itself, if it has no parent).
    pub fn root(self: &Arc<Self>) -> Arc<Node> {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Adds `child` as an owned child named `name`. Fails if a child (owned, linked, or a
    /// symlink) already occupies that name.
    pub fn add_child(self: &Arc<Self>, name: impl Into<String>, child: Arc<Node>) -> Result<(), NodeError> {
        let name = name.into();
        if self.children.contains_key(&name) || self.symlinks.contains_key(&name) {
            return Err(NodeError::ChildAlreadyExists(name));
        }
        *child.parent.lock().unwrap() = Some(Arc::downgrade(self));
        self.children.insert(name, NodeChild::Owned(child));
        Ok(())
    }

    /// Adds `child` as a non-owning linked child named `name`. The link does not update
    /// `child`'s parent pointer — a linked child's "real" parent is wherever it is owned.
    pub fn add_link(&self, name: impl Into<String>, child: &Arc<Node>) -> Result<(), NodeError> {
        let name = name.into();
        if self.children.contains_key(&name) || self.symlinks.contains_key(&name) {
            return Err(NodeError::ChildAlreadyExists(name));
        }
        self.children.insert(name, NodeChild::Linked(Arc::downgrade(child)));
        Ok(())
    }

    /// Registers a symbolic link named `name` pointing at `target_path`, resolved lazily
    /// against this node's tree root the first time it is traversed.
    pub fn link_symbol(&self, name: impl Into<String>, target_path: impl Into<String>) -> Result<(), NodeError> {
        let name = name.into();
        if self.children.contains_key(&name) || self.symlinks.contains_key(&name) {
            return Err(NodeError::ChildAlreadyExists(name));
        }
        self.symlinks.insert(name, target_path.into());
        Ok(())
    }

    /// Looks up an immediate child (owned, linked, or symlink) by its bare name.
    pub fn child(self: &Arc<Self>, name: &str) -> Result<Arc<Node>, NodeError> {
        if let Some(entry) = self.children.get(name) {
            return entry
                .upgrade()
                .ok_or_else(|| NodeError::PathNotFound(name.to_string()));
        }
        if let Some(target) = self.symlinks.get(name) {
            let target_path = target.clone();
            drop(target);
            return self
                .root()
                .find(&target_path)
                .map_err(|_| NodeError::UnresolvedLink(name.to_string(), target_path));
        }
        Err(NodeError::PathNotFound(name.to_string()))
    }

    /// Resolves `path` against this node. A path starting with `/` is resolved from this
    /// node's tree root; otherwise each `/`-delimited segment is resolved as a child lookup
    /// starting from `self`. A bare name with no `/` is equivalent to [`Node::child`].
    pub fn find(self: &Arc<Self>, path: &str) -> Result<Arc<Node>, NodeError> {
        let (mut current, rest) = if let Some(stripped) = path.strip_prefix('/') {
            (self.root(), stripped)
        } else {
            (self.clone(), path)
        };
        if rest.is_empty() {
            return Ok(current);
        }
        for segment in rest.split('/').filter(|s| !s.is_empty()) {
            current = current.child(segment)?;
        }
        Ok(current)
    }

    /// Iterates the bare names of this node's immediate children (owned and linked, not
    /// symlinks).
    pub fn child_names(&self) -> Vec<String> {
        self.children.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("children", &self.child_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_lookup_by_bare_name() {
        let root = Node::new("root");
        let child = Node::new("child");
        root.add_child("child", child.clone()).unwrap();
        let found = root.child("child").unwrap();
        assert_eq!(found.name(), "child");
    }

    #[test]
    fn absolute_path_resolves_from_root() {
        let root = Node::new("root");
        let a = Node::new("a");
        let b = Node::new("b");
        root.add_child("a", a.clone()).unwrap();
        a.add_child("b", b.clone()).unwrap();

        let found = b.find("/a/b").unwrap();
        assert_eq!(found.name(), "b");
    }

    #[test]
    fn duplicate_child_name_is_rejected() {
        let root = Node::new("root");
        root.add_child("x", Node::new("x")).unwrap();
        let err = root.add_child("x", Node::new("x2")).unwrap_err();
        assert!(matches!(err, NodeError::ChildAlreadyExists(_)));
    }

    #[test]
    fn symbolic_link_resolves_through_root() {
        let root = Node::new("root");
        let a = Node::new("a");
        let b = Node::new("b");
        root.add_child("a", a.clone()).unwrap();
        root.add_child("b", b.clone()).unwrap();
        a.link_symbol("sibling", "/b").unwrap();

        let found = a.child("sibling").unwrap();
        assert_eq!(found.name(), "b");
    }

    #[test]
    fn dangling_symlink_reports_unresolved() {
        let root = Node::new("root");
        root.link_symbol("ghost", "/nowhere").unwrap();
        let err = root.child("ghost").unwrap_err();
        assert!(matches!(err, NodeError::UnresolvedLink(_, _)));
    }

    #[test]
    fn linked_child_does_not_take_ownership() {
        let root = Node::new("root");
        let shared = Node::new("shared");
        root.add_link("shared", &shared).unwrap();
        assert_eq!(root.child("shared").unwrap().name(), "shared");
        drop(shared);
        assert!(root.child("shared").is_err());
    }
}
