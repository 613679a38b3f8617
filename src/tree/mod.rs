//! The set of [`Node`]s, organized by parent/child plus the three lookup
//! indices described in §3/§4.D: by watch descriptor, by canonical path,
//! by alias.

pub mod node;

use std::collections::HashMap;
use std::path::PathBuf;

use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};

pub use node::{Node, ProfileBin};

/// Maximum children a node may render per frame (§4.C).
pub const MAX_CHILD_RENDERS: u32 = 20;
/// Maximum snapshots a node may create per frame (§4.C).
pub const MAX_SNAPSHOTS: u32 = 5;

new_key_type! {
    /// Stable handle into [`Tree`]'s node storage. Doubles as the "weak"
    /// back-reference the design notes (§9) call for: a stale handle
    /// simply fails `SlotMap::get` rather than dangling.
    pub struct NodeHandle;
}

/// The watched-directory key used by the by-watch-descriptor index. Kept
/// distinct from the by-path index (even though both are currently keyed
/// off the canonical directory path, since the `notify` backend exposes no
/// integer watch descriptor) so a future lower-level watch primitive can
/// be swapped in without disturbing path/alias lookups.
pub type WatchKey = PathBuf;

pub struct Tree {
    nodes: SlotMap<NodeHandle, Node>,
    root: NodeHandle,
    by_wd: HashMap<WatchKey, NodeHandle>,
    by_path: FxHashMap<String, NodeHandle>,
    by_alias: FxHashMap<String, NodeHandle>,
}

impl Tree {
    /// Creates a tree containing only the root node.
    #[must_use]
    pub fn new(root_name: String, root_watch: WatchKey) -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(Node::new(root_name.clone(), root_name, root_watch.clone()));
        let mut by_path = FxHashMap::default();
        by_path.insert(nodes[root].path.clone(), root);
        let mut by_wd = HashMap::new();
        by_wd.insert(root_watch, root);

        Self {
            nodes,
            root,
            by_wd,
            by_path,
            by_alias: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn root(&self) -> NodeHandle {
        self.root
    }

    #[must_use]
    pub fn get(&self, handle: NodeHandle) -> Option<&Node> {
        self.nodes.get(handle)
    }

    pub fn get_mut(&mut self, handle: NodeHandle) -> Option<&mut Node> {
        self.nodes.get_mut(handle)
    }

    #[must_use]
    pub fn find_by_watch(&self, key: &WatchKey) -> Option<NodeHandle> {
        self.by_wd.get(key).copied()
    }

    /// Path lookup first, then alias (§4.D).
    #[must_use]
    pub fn find_by_path_or_alias(&self, address: &str) -> Option<NodeHandle> {
        self.by_path
            .get(address)
            .or_else(|| self.by_alias.get(address))
            .copied()
    }

    /// Inserts a new child of `parent` with local name `name`, registering
    /// it under `watch_key` and the path index. Fails (returns `None`) if
    /// `parent` does not exist.
    pub fn insert_child(
        &mut self,
        parent: NodeHandle,
        name: String,
        watch_key: WatchKey,
    ) -> Option<NodeHandle> {
        let parent_path = self.nodes.get(parent)?.path.clone();
        let path = format!("{parent_path}/{name}");

        let mut node = Node::new(name, path.clone(), watch_key.clone());
        node.parent = Some(parent);
        let handle = self.nodes.insert(node);

        self.nodes[parent].children.push(handle);
        self.by_path.insert(path, handle);
        self.by_wd.insert(watch_key, handle);
        Some(handle)
    }

    /// Idempotent for the node that already holds `alias`; fails for any
    /// other node attempting to take an alias already held (§4.C, §8).
    pub fn set_alias(&mut self, handle: NodeHandle, alias: String) -> crate::errors::Result<()> {
        if let Some(holder) = self.by_alias.get(&alias)
            && *holder != handle
        {
            return Err(crate::errors::BeamerError::AliasTaken(alias));
        }
        if let Some(node) = self.nodes.get_mut(handle) {
            if let Some(old) = node.alias.take() {
                self.by_alias.remove(&old);
            }
            node.alias = Some(alias.clone());
            self.by_alias.insert(alias, handle);
        }
        Ok(())
    }

    fn clear_alias(&mut self, handle: NodeHandle) {
        if let Some(node) = self.nodes.get_mut(handle)
            && let Some(alias) = node.alias.take()
        {
            self.by_alias.remove(&alias);
        }
    }

    /// Removes `handle` and its descendants, postorder (§4.D): children
    /// are freed before the node itself. Returns the removed node's local
    /// name and parent, so the caller can fire `child_update(name, false)`
    /// on the parent.
    pub fn remove_subtree(&mut self, handle: NodeHandle) -> Option<(String, Option<NodeHandle>)> {
        let children: SmallVecChildren = self.nodes.get(handle)?.children.clone();
        for child in children {
            self.remove_subtree(child);
        }

        let node = self.nodes.remove(handle)?;
        self.by_path.remove(&node.path);
        if let Some(alias) = &node.alias {
            self.by_alias.remove(alias);
        }
        self.by_wd.retain(|_, v| *v != handle);

        if let Some(parent) = node.parent {
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                parent_node.children.retain(|c| *c != handle);
            }
        }
        Some((node.name, node.parent))
    }

    /// Removes a single named child of `parent`, postorder over its own
    /// subtree. Used by `MOVED_FROM + IS_DIR` (§4.E).
    pub fn remove_child_by_name(&mut self, parent: NodeHandle, name: &str) -> Option<NodeHandle> {
        let child = self
            .nodes
            .get(parent)?
            .children
            .iter()
            .copied()
            .find(|c| self.nodes[*c].name == name)?;
        self.remove_subtree(child);
        Some(child)
    }

    /// Effects of a code-file write (§4.E, §9): reset blacklist/size,
    /// drop the alias registration. Always called before the sandbox is
    /// rebooted, whether this is the node's first boot or a reload.
    pub fn on_code_changed(&mut self, handle: NodeHandle) {
        if let Some(node) = self.nodes.get_mut(handle) {
            node.on_code_changed();
        }
        self.clear_alias(handle);
    }

    /// Runs `body` against the node's sandbox and host capabilities,
    /// implementing the take-out/put-back pattern that lets a capability
    /// closure re-enter the tree (e.g. `render_child`) without aliasing
    /// this node's own `sandbox` field. Resets per-frame quotas first, as
    /// part of the "enter" sequence (§4.B point 2).
    ///
    /// Returns `None` if `handle` no longer exists (the node may have been
    /// removed by a concurrent watcher event drained earlier this tick).
    pub fn dispatch(
        &mut self,
        handle: NodeHandle,
        now: f64,
        bin: ProfileBin,
        body: impl FnOnce(&mut crate::sandbox::Sandbox, &str) -> crate::sandbox::EnterOutcome,
    ) -> Option<()> {
        let node = self.nodes.get_mut(handle)?;
        node.reset_quota();
        let path = node.path.clone();
        let mut sandbox = node.sandbox.take()?;

        let outcome = body(&mut sandbox, &path);

        let node = self.nodes.get_mut(handle)?;
        node.sandbox = Some(sandbox);
        node.profiling[bin as usize] += outcome.cpu_seconds;
        node.last_activity = now;
        if outcome.blacklisted {
            node.blacklisted_until = now + node::BLACKLIST_SECS;
            log::warn!("[{path}] cpu budget exceeded, blacklisted for {}s", node::BLACKLIST_SECS);
        }
        if outcome.diagnostic.is_some() {
            node.last_diagnostic = outcome.diagnostic;
        }
        Some(())
    }

    /// Iterates every node reachable from the root, in insertion order
    /// (parent before children, children in sibling order). Used by GC
    /// sweeps and tests.
    pub fn walk(&self, mut visit: impl FnMut(NodeHandle, &Node)) {
        let mut stack = vec![self.root];
        while let Some(handle) = stack.pop() {
            let Some(node) = self.nodes.get(handle) else {
                continue;
            };
            visit(handle, node);
            for child in node.children.iter().rev() {
                stack.push(*child);
            }
        }
    }
}

type SmallVecChildren = smallvec::SmallVec<[NodeHandle; 4]>;

#[cfg(test)]
mod tests {
    use super::*;

    fn new_tree() -> Tree {
        Tree::new("root".to_string(), PathBuf::from("/root"))
    }

    #[test]
    fn root_is_findable_by_path() {
        let tree = new_tree();
        let root = tree.root();
        assert_eq!(tree.find_by_path_or_alias("root"), Some(root));
    }

    #[test]
    fn insert_child_registers_path_index() {
        let mut tree = new_tree();
        let root = tree.root();
        let child = tree
            .insert_child(root, "a".to_string(), PathBuf::from("/root/a"))
            .unwrap();
        assert_eq!(tree.find_by_path_or_alias("root/a"), Some(child));
        assert_eq!(tree.get(root).unwrap().children.as_slice(), &[child]);
    }

    #[test]
    fn set_alias_is_idempotent_for_same_node() {
        let mut tree = new_tree();
        let root = tree.root();
        tree.set_alias(root, "top".to_string()).unwrap();
        tree.set_alias(root, "top".to_string()).unwrap();
        assert_eq!(tree.find_by_path_or_alias("top"), Some(root));
    }

    #[test]
    fn set_alias_rejects_conflicting_owner() {
        let mut tree = new_tree();
        let root = tree.root();
        let child = tree
            .insert_child(root, "a".to_string(), PathBuf::from("/root/a"))
            .unwrap();
        tree.set_alias(root, "top".to_string()).unwrap();
        assert!(tree.set_alias(child, "top".to_string()).is_err());
    }

    #[test]
    fn remove_subtree_is_postorder_and_clears_indices() {
        let mut tree = new_tree();
        let root = tree.root();
        let a = tree
            .insert_child(root, "a".to_string(), PathBuf::from("/root/a"))
            .unwrap();
        let _b = tree
            .insert_child(a, "b".to_string(), PathBuf::from("/root/a/b"))
            .unwrap();

        let (name, parent) = tree.remove_subtree(a).unwrap();
        assert_eq!(name, "a");
        assert_eq!(parent, Some(root));
        assert!(tree.find_by_path_or_alias("root/a").is_none());
        assert!(tree.find_by_path_or_alias("root/a/b").is_none());
        assert!(tree.get(root).unwrap().children.is_empty());
    }

    #[test]
    fn remove_child_by_name_finds_sibling() {
        let mut tree = new_tree();
        let root = tree.root();
        tree.insert_child(root, "a".to_string(), PathBuf::from("/root/a"))
            .unwrap();
        let removed = tree.remove_child_by_name(root, "a");
        assert!(removed.is_some());
        assert!(tree.get(root).unwrap().children.is_empty());
    }
}
