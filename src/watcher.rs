//! Converts filesystem events into Node lifecycle operations (§4.E): one
//! `notify::RecommendedWatcher` watch per directory, non-recursive,
//! drained non-blockingly once per host-loop tick.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::errors::Result;
use crate::tree::{NodeHandle, Tree};

/// Conventional name of a Node's code file (§2, §4.E).
pub const CODE_FILE: &str = "node.lua";

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Owns the `notify` channel and one watch per known directory. `Tree`
/// mutation driven by events is delegated back to the caller through
/// [`FsWatcher::poll`], which returns a flat list of effects rather than
/// mutating the tree itself — keeping this module ignorant of the
/// capability-dispatch machinery needed to actually fire `content_update`
/// and friends.
pub struct FsWatcher {
    watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
}

/// One observed, already-classified effect a tick of [`FsWatcher::poll`]
/// produced, for the host loop to apply against the Tree and Sandboxes.
pub enum WatchEffect {
    ChildAppeared { parent: NodeHandle, name: String, path: PathBuf },
    ChildDisappeared { parent: NodeHandle, name: String },
    ContentUpdated { node: NodeHandle, name: String, added: bool },
    CodeChanged { node: NodeHandle },
    RootRemoved,
    FilesystemRace { detail: String },
}

impl FsWatcher {
    pub fn new() -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )?;
        Ok(Self { watcher, rx })
    }

    pub fn watch(&mut self, path: &Path) -> Result<()> {
        self.watcher.watch(path, RecursiveMode::NonRecursive)?;
        Ok(())
    }

    pub fn unwatch(&mut self, path: &Path) {
        let _ = self.watcher.unwatch(path);
    }

    /// Drains every pending `notify` event non-blockingly and turns it
    /// into zero or more [`WatchEffect`]s by consulting `tree` for which
    /// Node owns the affected directory. Does not mutate `tree`; the
    /// caller applies effects (and reboots sandboxes) afterward, since
    /// that requires the capability-binding machinery this module must
    /// not depend on.
    pub fn poll(&mut self, tree: &Tree) -> Vec<WatchEffect> {
        let mut effects = Vec::new();
        while let Ok(res) = self.rx.try_recv() {
            match res {
                Ok(event) => effects.extend(self.classify(tree, event)),
                Err(err) => effects.push(WatchEffect::FilesystemRace {
                    detail: err.to_string(),
                }),
            }
        }
        effects
    }

    fn classify(&self, tree: &Tree, event: Event) -> Vec<WatchEffect> {
        let mut out = Vec::new();
        for path in &event.paths {
            let Some(parent_dir) = path.parent() else {
                continue;
            };
            let Some(leaf) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if is_hidden(leaf) {
                continue;
            }

            let Some(parent) = tree.find_by_watch(&parent_dir.to_path_buf()) else {
                // The event belongs to a directory we don't track (yet, or
                // any more); a benign race, log-and-skip per §4.E.
                continue;
            };

            match event.kind {
                EventKind::Create(_) if path.is_dir() => out.push(WatchEffect::ChildAppeared {
                    parent,
                    name: leaf.to_string(),
                    path: path.clone(),
                }),
                EventKind::Create(_) => {
                    out.push(content_update_or_code_change(tree, parent, leaf, true));
                }
                EventKind::Modify(notify::event::ModifyKind::Data(_)) => {
                    out.push(content_update_or_code_change(tree, parent, leaf, true));
                }
                // `path` is already unlinked by the time a Remove event is
                // delivered, so `path.is_dir()` would always read `false`;
                // ask the tree (which still holds the about-to-be-removed
                // child Node) whether `leaf` names one of `parent`'s
                // children instead of re-`stat`-ing a path guaranteed not
                // to exist.
                EventKind::Remove(_) if is_known_child(tree, parent, leaf) => {
                    if tree.root() == parent && leaf == tree.get(parent).map(|n| n.name.clone()).unwrap_or_default() {
                        out.push(WatchEffect::RootRemoved);
                    } else {
                        out.push(WatchEffect::ChildDisappeared {
                            parent,
                            name: leaf.to_string(),
                        });
                    }
                }
                EventKind::Remove(_) => {
                    out.push(content_update_or_code_change(tree, parent, leaf, false));
                }
                _ => {}
            }
        }
        out
    }
}

/// Whether `leaf` names a child Node the tree already knows about under
/// `parent` — the removal-time stand-in for a directory stat on a path
/// that no longer exists.
fn is_known_child(tree: &Tree, parent: NodeHandle, leaf: &str) -> bool {
    tree.get(parent).is_some_and(|node| {
        node.children
            .iter()
            .any(|&child| tree.get(child).is_some_and(|n| n.name == leaf))
    })
}

fn content_update_or_code_change(
    tree: &Tree,
    parent: NodeHandle,
    leaf: &str,
    added: bool,
) -> WatchEffect {
    let is_code = leaf == CODE_FILE;
    if is_code && added {
        WatchEffect::CodeChanged { node: parent }
    } else {
        WatchEffect::ContentUpdated {
            node: parent,
            name: leaf.to_string(),
            added,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::RemoveKind;

    fn remove_event(path: &str) -> Event {
        Event::new(EventKind::Remove(RemoveKind::Folder)).add_path(PathBuf::from(path))
    }

    #[test]
    fn removing_a_known_child_directory_yields_child_disappeared() {
        let mut tree = Tree::new("root".to_string(), PathBuf::from("/root"));
        let root = tree.root();
        let child = tree
            .insert_child(root, "child".to_string(), PathBuf::from("/root/child"))
            .unwrap();
        let _ = child;

        let watcher = FsWatcher::new().unwrap();
        let effects = watcher.classify(&tree, remove_event("/root/child"));
        assert!(matches!(
            effects.as_slice(),
            [WatchEffect::ChildDisappeared { name, .. }] if name == "child"
        ));
    }

    #[test]
    fn removing_an_untracked_file_falls_through_to_content_update() {
        let tree = Tree::new("root".to_string(), PathBuf::from("/root"));

        let watcher = FsWatcher::new().unwrap();
        let effects = watcher.classify(&tree, remove_event("/root/image.png"));
        assert!(matches!(
            effects.as_slice(),
            [WatchEffect::ContentUpdated { name, added: false, .. }] if name == "image.png"
        ));
    }
}
