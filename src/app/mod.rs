//! The host loop (§4.H): one frame pumps the watcher, pumps the router,
//! renders the root Node directly, presents, then runs a bounded GC
//! sweep over non-idle Nodes.

use std::path::Path;
use std::time::Instant;

use crate::capabilities::{self, HostCtx};
use crate::config::Config;
use crate::decoders::{Decoders, NullDecoders};
use crate::errors::Result;
use crate::render::gl::{GlContext, NullGlContext};
use crate::render::pool::ResourcePool;
use crate::router::Router;
use crate::tree::{NodeHandle, ProfileBin, Tree};
use crate::watcher::{CODE_FILE, FsWatcher, WatchEffect};

/// Owns every piece of process-wide state (§9 "Global process state"):
/// the Tree, the watcher, the router, the GPU surface, the resource
/// pool, and the decoder ports. Constructed once at startup.
pub struct Host {
    tree: Tree,
    watcher: FsWatcher,
    router: Router,
    gl: Box<dyn GlContext>,
    pool: ResourcePool,
    decoders: Box<dyn Decoders>,
    started_at: Instant,
}

impl Host {
    pub fn new(config: &Config) -> Result<Self> {
        let mut watcher = FsWatcher::new()?;
        let tree = Tree::new(config.root_name.clone(), config.root_dir().to_path_buf());
        watcher.watch(config.root_dir())?;

        let router = Router::bind(config.port)?;
        let mut host = Self {
            tree,
            watcher,
            router,
            gl: Box::new(NullGlContext::new()),
            pool: ResourcePool::default(),
            decoders: Box::new(NullDecoders),
            started_at: Instant::now(),
        };

        let root = host.tree.root();
        host.discover(root, config.root_dir());
        host.boot(root);
        Ok(host)
    }

    /// Splits disjoint borrows for a capability dispatch: the Tree
    /// (re-entrant across recursive calls like `render_child`) and
    /// everything else a capability needs, bundled as [`HostCtx`].
    fn split(&mut self) -> (&mut Tree, HostCtx<'_>) {
        (
            &mut self.tree,
            HostCtx {
                gl: &mut *self.gl,
                pool: &mut self.pool,
                decoders: &*self.decoders,
                started_at: self.started_at,
            },
        )
    }

    fn now(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    /// Recursively seeds `handle` from an on-disk directory that already
    /// exists: registers a watch, discovers children and non-code
    /// content, but does not boot anything until the whole subtree is
    /// known (§3 "Created" lifecycle).
    fn discover(&mut self, handle: NodeHandle, dir: &Path) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if path.is_dir() {
                let Some(child) = self.tree.insert_child(handle, name.to_string(), path.clone())
                else {
                    continue;
                };
                if let Err(err) = self.watcher.watch(&path) {
                    log::warn!("watch {}: {err}", path.display());
                }
                self.discover(child, &path);
                self.boot(child);
            } else if name != CODE_FILE && let Some(node) = self.tree.get_mut(handle) {
                node.num_allocs += 1;
            }
        }
    }

    /// Loads and runs `<node>/node.lua` if present (§2, §4.E); a Node
    /// with no code file simply never boots and renders only as a
    /// diagnostic fill.
    fn boot(&mut self, handle: NodeHandle) {
        let Some(node) = self.tree.get(handle) else {
            return;
        };
        let code_path = node.fs_dir.join(CODE_FILE);
        let code = std::fs::read_to_string(&code_path).unwrap_or_default();
        let now = self.now();
        let (tree, mut ctx) = self.split();
        capabilities::boot_node(tree, &mut ctx, handle, &code, now);
    }

    /// Runs one frame (§4.H).
    pub fn tick(&mut self) {
        let now = self.now();

        let effects = self.watcher.poll(&self.tree);
        self.apply_watch_effects(effects);

        {
            let (tree, mut ctx) = self.split();
            self.router.poll(tree, &mut ctx, now);
        }

        self.gl.clear(1.0, 1.0, 1.0, 0.0);
        let root = self.tree.root();
        let (width, height) = self
            .tree
            .get(root)
            .map(|n| (n.width.max(1), n.height.max(1)))
            .unwrap_or((1, 1));
        {
            let (tree, mut ctx) = self.split();
            capabilities::dispatch_event(tree, &mut ctx, root, now, ProfileBin::Event, move |lua| {
                let globals = lua.globals();
                if let Ok(f) = globals.get::<mlua::Function>("on_render") {
                    f.call::<()>((width, height))?;
                }
                Ok(())
            });
        }

        self.gc_sweep(now);

        {
            let (_tree, mut ctx) = self.split();
            capabilities::recycle_collected_targets(&mut ctx);
        }
    }

    fn gc_sweep(&mut self, now: f64) {
        let mut idle_but_alive = Vec::new();
        self.tree.walk(|handle, node| {
            if !node.is_idle(now) {
                idle_but_alive.push(handle);
            }
        });
        for handle in idle_but_alive {
            if let Some(node) = self.tree.get_mut(handle)
                && let Some(lua) = node.sandbox.as_ref().and_then(|s| s.lua())
            {
                let _ = lua.gc_step_kbytes(16);
            }
        }
    }

    fn apply_watch_effects(&mut self, effects: Vec<WatchEffect>) {
        for effect in effects {
            match effect {
                WatchEffect::ChildAppeared { parent, name, path } => {
                    let Some(child) = self.tree.insert_child(parent, name, path.clone()) else {
                        continue;
                    };
                    if let Err(err) = self.watcher.watch(&path) {
                        log::warn!("watch {}: {err}", path.display());
                    }
                    self.discover(child, &path);
                    self.boot(child);
                    self.notify_child_update(parent, &path, true);
                }
                WatchEffect::ChildDisappeared { parent, name } => {
                    let doomed = self.tree.get(parent).and_then(|p| {
                        p.children
                            .iter()
                            .copied()
                            .find(|c| self.tree.get(*c).is_some_and(|n| n.name == name))
                    });
                    if let Some(child) = doomed {
                        self.watcher_unwatch_subtree(child);
                    }
                    self.tree.remove_child_by_name(parent, &name);
                    self.notify_child_update_by_name(parent, &name, false);
                }
                WatchEffect::ContentUpdated { node, name, added } => {
                    self.deliver_content_update(node, name, added);
                }
                WatchEffect::CodeChanged { node } => {
                    self.boot(node);
                }
                WatchEffect::RootRemoved => {
                    log::error!("root directory removed; exiting");
                    std::process::exit(1);
                }
                WatchEffect::FilesystemRace { detail } => {
                    log::warn!("filesystem race: {detail}");
                }
            }
        }
    }

    fn watcher_unwatch_subtree(&mut self, handle: NodeHandle) {
        let Some(node) = self.tree.get(handle) else {
            return;
        };
        let children: Vec<NodeHandle> = node.children.iter().copied().collect();
        let path = node.fs_dir.clone();
        self.watcher.unwatch(&path);
        for child in children {
            self.watcher_unwatch_subtree(child);
        }
    }

    fn deliver_content_update(&mut self, handle: NodeHandle, name: String, added: bool) {
        let now = self.now();
        let (tree, mut ctx) = self.split();
        capabilities::dispatch_event(tree, &mut ctx, handle, now, ProfileBin::Update, move |lua| {
            let globals = lua.globals();
            if let Ok(f) = globals.get::<mlua::Function>("on_content_update") {
                f.call::<()>((name.clone(), added))?;
            }
            Ok(())
        });
    }

    fn notify_child_update(&mut self, parent: NodeHandle, path: &Path, added: bool) {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        self.notify_child_update_by_name(parent, name, added);
    }

    fn notify_child_update_by_name(&mut self, parent: NodeHandle, name: &str, added: bool) {
        let now = self.now();
        let name = name.to_string();
        let (tree, mut ctx) = self.split();
        capabilities::dispatch_event(tree, &mut ctx, parent, now, ProfileBin::Update, move |lua| {
            let globals = lua.globals();
            if let Ok(f) = globals.get::<mlua::Function>("on_child_update") {
                f.call::<()>((name.clone(), added))?;
            }
            Ok(())
        });
    }
}
