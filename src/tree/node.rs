use smallvec::SmallVec;

use crate::sandbox::Sandbox;
use crate::tree::NodeHandle;

/// Sentinel matrix depth used outside a render dispatch. See §3.
pub const NOT_RENDERING: i32 = -1;

/// Default per-node heap ceiling (§4.B), ~2 GB.
pub const DEFAULT_MEM_LIMIT: usize = 2_000_000 * 1024;

/// Duration a node is blacklisted for after its first CPU-budget expiry.
pub const BLACKLIST_SECS: f64 = 60.0;

/// Seconds of inactivity after which a node is no longer walked for GC
/// (§4.H step 7).
pub const IDLE_SECS: f64 = 2.0;

/// Index into [`Node::profiling`] identifying which phase CPU time is
/// attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileBin {
    Boot = 0,
    Update = 1,
    Event = 2,
}

/// Opaque identifier for a stream subscriber linked to a node (§4.G, §9).
/// The node only ever holds this id; the router owns the actual socket.
pub type SubscriberId = u64;

/// One directory in the tree: its sandbox, declared render size, quotas,
/// and bookkeeping. See §3 for the full invariant list.
pub struct Node {
    /// Local name: the directory's leaf, never containing `/`.
    pub name: String,
    /// Canonical path from the tree root, e.g. `"a/b/c"`.
    pub path: String,
    /// The actual on-disk directory this Node is bound to.
    pub fs_dir: std::path::PathBuf,
    /// Routing alias, set at runtime by the node's own script.
    pub alias: Option<String>,

    pub parent: Option<NodeHandle>,
    pub children: SmallVec<[NodeHandle; 4]>,
    pub subscribers: Vec<SubscriberId>,

    /// Lines produced by `print`/diagnostics since the last drain. The
    /// router fans these out to linked subscribers once per host-loop
    /// tick; `Tree` itself never touches a socket.
    pub pending_output: std::collections::VecDeque<String>,

    /// Declared render size; `0` means setup has not completed.
    pub width: u32,
    pub height: u32,

    /// GPU matrix-push depth; [`NOT_RENDERING`] outside the render entry.
    pub matrix_depth: i32,

    pub profiling: [f64; 3],
    pub frame_count: u64,
    pub num_resource_inits: u64,
    pub num_allocs: u64,

    pub last_activity: f64,
    pub blacklisted_until: f64,

    pub child_render_quota: u32,
    pub snapshot_quota: u32,

    /// Set by `Tree::dispatch` when a dispatch produces a diagnostic line;
    /// drained once per tick by the host loop, which fans it out to
    /// subscribers via the router (Tree itself has no router access).
    pub last_diagnostic: Option<String>,

    /// Taken out (`Option::take`) for the duration of a dispatch so the
    /// tree can be re-entered from within a capability closure without
    /// aliasing this node's own sandbox. See `Tree::dispatch`.
    pub sandbox: Option<Sandbox>,
}

impl Node {
    #[must_use]
    pub fn new(name: String, path: String, fs_dir: std::path::PathBuf) -> Self {
        Self {
            name,
            path,
            fs_dir,
            alias: None,
            parent: None,
            children: SmallVec::new(),
            subscribers: Vec::new(),
            pending_output: std::collections::VecDeque::new(),
            width: 0,
            height: 0,
            matrix_depth: NOT_RENDERING,
            profiling: [0.0; 3],
            frame_count: 0,
            num_resource_inits: 0,
            num_allocs: 0,
            last_activity: 0.0,
            blacklisted_until: 0.0,
            child_render_quota: 0,
            snapshot_quota: 0,
            last_diagnostic: None,
            sandbox: Some(Sandbox::new()),
        }
    }

    /// `width>0 ⇔ setup completed` (§3).
    #[must_use]
    pub fn is_setup(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    #[must_use]
    pub fn is_blacklisted(&self, now: f64) -> bool {
        self.blacklisted_until > now
    }

    #[must_use]
    pub fn is_idle(&self, now: f64) -> bool {
        now - self.last_activity >= IDLE_SECS
    }

    /// Resets per-frame render quotas; called as part of every sandbox
    /// dispatch's "enter" sequence (§4.B point 2), not only render.
    pub fn reset_quota(&mut self) {
        self.child_render_quota = super::MAX_CHILD_RENDERS;
        self.snapshot_quota = super::MAX_SNAPSHOTS;
    }

    /// Effects of a write to the node's code file (§4.E): clear blacklist,
    /// clear declared size, drop the alias. The reboot itself is driven
    /// separately by whoever observed the write, always through this same
    /// path first (§9's resolved Open Question).
    pub fn on_code_changed(&mut self) -> Option<String> {
        self.blacklisted_until = 0.0;
        self.width = 0;
        self.height = 0;
        self.alias.take()
    }
}
