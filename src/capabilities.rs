//! Binds a Node's capability surface (§4.C) as Lua globals for the
//! duration of one dispatch. Lives outside `sandbox/` and `tree/` on
//! purpose: it depends on both (plus `render` and `decoders`), and
//! neither of those may depend back on it.

use std::cell::RefCell;
use std::time::Instant;

use mlua::{Lua, Variadic};

use crate::decoders::{DecodedImage, Decoders, FontFace, ShaderProgram, Texid, VideoInfo, VncScreen};
use crate::errors::BeamerError;
use crate::render::{Compositor, GlContext, RenderTarget, ResourcePool};
use crate::tree::node::NOT_RENDERING;
use crate::tree::{NodeHandle, ProfileBin, Tree};

thread_local! {
    /// Pool-backed targets whose [`ImageHandle`] was collected by the Lua
    /// GC since the last drain. `ImageHandle` owns no borrow into
    /// `HostCtx` (it must outlive the dispatch that created it, the same
    /// way any other Lua value does), so its `Drop` impl has nothing to
    /// hand the target back to directly; it queues here instead, and
    /// [`recycle_collected_targets`] drains the queue once per tick.
    static PENDING_RECYCLE: RefCell<Vec<RenderTarget>> = const { RefCell::new(Vec::new()) };
}

/// Everything a capability closure may need besides the Tree itself: the
/// GPU surface, the resource pool, and the decoder ports (§9 "Global
/// process state" — these are owned once by the Host and threaded down
/// rather than reached for as statics).
pub struct HostCtx<'a> {
    pub gl: &'a mut dyn GlContext,
    pub pool: &'a mut ResourcePool,
    pub decoders: &'a dyn Decoders,
    pub started_at: Instant,
}

/// A GPU-backed handle returned into Lua: an image, a video frame, a
/// snapshot, a rendered child. All answer `texid()` (§9's "texture-like"
/// accessor) so shader uniforms and `gl` draw calls accept any of them
/// interchangeably.
struct ImageHandle {
    texture_id: u64,
    fbo_id: u64,
    width: u32,
    height: u32,
    /// Whether this handle owns a `ResourcePool`-backed target that must
    /// be recycled on drop, as opposed to a decoder-owned image/video
    /// frame or the `create_snapshot` placeholder (§3, §5).
    pooled: bool,
}

impl Texid for ImageHandle {
    fn texid(&self) -> u64 {
        self.texture_id
    }
}

impl mlua::UserData for ImageHandle {
    fn add_fields<F: mlua::UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("width", |_, this| Ok(this.width));
        fields.add_field_method_get("height", |_, this| Ok(this.height));
    }
    fn add_methods<M: mlua::UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("texid", |_, this, ()| Ok(this.texture_id));
    }
}

impl Drop for ImageHandle {
    fn drop(&mut self) {
        if self.pooled {
            PENDING_RECYCLE.with(|q| {
                q.borrow_mut().push(RenderTarget {
                    width: self.width,
                    height: self.height,
                    fbo_id: self.fbo_id,
                    texture_id: self.texture_id,
                });
            });
        }
    }
}

impl From<RenderTarget> for ImageHandle {
    fn from(t: RenderTarget) -> Self {
        Self {
            texture_id: t.texture_id,
            fbo_id: t.fbo_id,
            width: t.width,
            height: t.height,
            pooled: true,
        }
    }
}

impl From<DecodedImage> for ImageHandle {
    fn from(img: DecodedImage) -> Self {
        Self {
            texture_id: img.texture_id,
            fbo_id: 0,
            width: img.width,
            height: img.height,
            pooled: false,
        }
    }
}

/// Runs [`Compositor::recycle`] for every pool-backed target whose handle
/// the Lua GC collected since the last call. The host loop drains this
/// once per tick (§4.H).
pub fn recycle_collected_targets(ctx: &mut HostCtx) {
    let targets = PENDING_RECYCLE.with(|q| std::mem::take(&mut *q.borrow_mut()));
    for target in targets {
        Compositor::recycle(ctx, target);
    }
}

struct ShaderHandle(ShaderProgram);
impl mlua::UserData for ShaderHandle {}

struct FontHandle(Box<dyn FontFace>);
impl mlua::UserData for FontHandle {
    fn add_methods<M: mlua::UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method(
            "write",
            |_, this, (x, y, text, size): (f32, f32, String, f32)| {
                this.0.write(x, y, &text, size).map_err(to_lua_err)
            },
        );
    }
}

struct VideoHandle(VideoInfo);
impl mlua::UserData for VideoHandle {
    fn add_fields<F: mlua::UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("width", |_, this| Ok(this.0.width));
        fields.add_field_method_get("height", |_, this| Ok(this.0.height));
        fields.add_field_method_get("fps", |_, this| Ok(this.0.fps));
    }
    fn add_methods<M: mlua::UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("texid", |_, this, ()| Ok(this.0.texture_id));
    }
}

struct VncHandle(RefCell<Box<dyn VncScreen>>);
impl mlua::UserData for VncHandle {
    fn add_methods<M: mlua::UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("size", |_, this, ()| Ok(this.0.borrow().size()));
        methods.add_method("alive", |_, this, ()| Ok(this.0.borrow().alive()));
        methods.add_method(
            "draw",
            |_, this, (x1, y1, x2, y2, alpha): (f32, f32, f32, f32, f32)| {
                this.0.borrow_mut().draw(x1, y1, x2, y2, alpha).map_err(to_lua_err)
            },
        );
    }
}

/// Runs one dispatch (`render`, `content_update`, `child_update`, or a
/// generic event) with the node's capability surface bound as Lua
/// globals for the duration of the call only (§4.B.1, §4.C). Rebinding
/// per call, rather than once at boot, is what lets a capability (e.g.
/// `render_child`) safely re-enter the Tree for a *different* node
/// without aliasing a long-lived reference.
pub fn dispatch_event(
    tree: &mut Tree,
    ctx: &mut HostCtx,
    handle: NodeHandle,
    now: f64,
    bin: ProfileBin,
    invoke: impl FnOnce(&Lua) -> mlua::Result<()>,
) -> Option<()> {
    tree.dispatch(handle, now, bin, move |tree, sandbox, path| {
        sandbox.enter(path, move |lua| {
            lua.scope(|scope| {
                bind_capabilities(lua, scope, tree, ctx, handle, now)?;
                invoke(lua)
            })
        })
    })
}

/// Boots (or reboots) a Node's sandbox from its code file: runs
/// `Tree::on_code_changed` first (§4.E, §9), then constructs a fresh
/// interpreter with this dispatch's capability surface bound, and runs
/// the code's top level.
pub fn boot_node(
    tree: &mut Tree,
    ctx: &mut HostCtx,
    handle: NodeHandle,
    code: &str,
    now: f64,
) -> Option<()> {
    tree.on_code_changed(handle);
    let node = tree.get_mut(handle)?;
    let path = node.path.clone();
    let mut sandbox = node.sandbox.take()?;

    let result = sandbox.boot(code, |lua| {
        lua.scope(|scope| bind_capabilities(lua, scope, tree, ctx, handle, now))
    });

    let node = tree.get_mut(handle)?;
    node.sandbox = Some(sandbox);
    if let Err(err) = result {
        log::error!("[{path}] boot failed: {err}");
    }
    Some(())
}

fn bind_capabilities<'scope>(
    lua: &'scope Lua,
    scope: &mlua::Scope<'scope, 'scope>,
    tree: &'scope mut Tree,
    ctx: &'scope mut HostCtx,
    handle: NodeHandle,
    now: f64,
) -> mlua::Result<()> {
    let tree = RefCell::new(tree);
    let ctx = RefCell::new(ctx);
    let globals = lua.globals();

    {
        let tree = &tree;
        globals.set(
            "setup",
            scope.create_function_mut(move |_, (w, h): (i64, i64)| {
                if !(32..=2048).contains(&w) || !(32..=2048).contains(&h) {
                    return Err(to_lua_err(BeamerError::InvalidDimensions {
                        width: w,
                        height: h,
                    }));
                }
                let mut tree = tree.borrow_mut();
                let node = tree
                    .get_mut(handle)
                    .ok_or_else(|| mlua::Error::RuntimeError("setup: node gone".into()))?;
                if node.matrix_depth != NOT_RENDERING {
                    return Err(to_lua_err(BeamerError::SetupDuringRender));
                }
                node.width = w as u32;
                node.height = h as u32;
                Ok(())
            })?,
        )?;
    }

    {
        let tree = &tree;
        globals.set(
            "set_alias",
            scope.create_function_mut(move |_, alias: String| {
                let mut tree = tree.borrow_mut();
                tree.set_alias(handle, alias)
                    .map_err(|err| mlua::Error::RuntimeError(err.to_string()))
            })?,
        )?;
    }

    {
        let tree = &tree;
        globals.set(
            "print",
            scope.create_function_mut(move |_, args: Variadic<mlua::Value>| {
                let line = args
                    .iter()
                    .map(|v| v.to_string().unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join("\t");
                let mut tree = tree.borrow_mut();
                if let Some(node) = tree.get_mut(handle) {
                    log::info!("[{}] {line}", node.path);
                    node.pending_output.push_back(line);
                }
                Ok(())
            })?,
        )?;
    }

    {
        let tree = &tree;
        let ctx = &ctx;
        globals.set(
            "load_image",
            scope.create_function_mut(move |_, name: String| {
                leaf_name(&name)?;
                let path = node_dir(&tree.borrow(), handle)?.join(&name);
                let img = ctx
                    .borrow()
                    .decoders
                    .image()
                    .load(&path)
                    .map_err(to_lua_err)?;
                if let Some(node) = tree.borrow_mut().get_mut(handle) {
                    node.num_resource_inits += 1;
                }
                Ok(ImageHandle::from(img))
            })?,
        )?;
    }

    {
        let tree = &tree;
        let ctx = &ctx;
        globals.set(
            "load_font",
            scope.create_function_mut(move |_, name: String| {
                leaf_name(&name)?;
                let path = node_dir(&tree.borrow(), handle)?.join(&name);
                let font = ctx
                    .borrow()
                    .decoders
                    .font()
                    .load(&path)
                    .map_err(to_lua_err)?;
                if let Some(node) = tree.borrow_mut().get_mut(handle) {
                    node.num_resource_inits += 1;
                }
                Ok(FontHandle(font))
            })?,
        )?;
    }

    {
        let tree = &tree;
        let ctx = &ctx;
        globals.set(
            "load_video",
            scope.create_function_mut(move |_, name: String| {
                leaf_name(&name)?;
                let path = node_dir(&tree.borrow(), handle)?.join(&name);
                let stream = ctx
                    .borrow()
                    .decoders
                    .video()
                    .open(&path)
                    .map_err(to_lua_err)?;
                let info = stream.info();
                if let Some(node) = tree.borrow_mut().get_mut(handle) {
                    node.num_resource_inits += 1;
                }
                Ok(VideoHandle(info))
            })?,
        )?;
    }

    {
        let tree = &tree;
        globals.set(
            "load_file",
            scope.create_function_mut(move |_, name: String| {
                leaf_name(&name)?;
                let path = node_dir(&tree.borrow(), handle)?.join(&name);
                std::fs::read(&path)
                    .map_err(|err| to_lua_err(BeamerError::ResourceLoad(format!("{name}: {err}"))))
            })?,
        )?;
    }

    {
        let ctx = &ctx;
        globals.set(
            "create_shader",
            scope.create_function_mut(move |_, (vs, fs): (String, String)| {
                let program = ctx
                    .borrow()
                    .decoders
                    .shader()
                    .compile(&vs, &fs)
                    .map_err(to_lua_err)?;
                Ok(ShaderHandle(program))
            })?,
        )?;
    }

    {
        let ctx = &ctx;
        globals.set(
            "create_vnc",
            scope.create_function_mut(move |_, (host, port): (String, Option<u16>)| {
                let screen = ctx
                    .borrow()
                    .decoders
                    .vnc()
                    .open(&host, port.unwrap_or(5900))
                    .map_err(to_lua_err)?;
                Ok(VncHandle(RefCell::new(screen)))
            })?,
        )?;
    }

    {
        let tree = &tree;
        globals.set(
            "create_snapshot",
            scope.create_function_mut(move |_, ()| {
                let mut tree = tree.borrow_mut();
                let node = tree
                    .get_mut(handle)
                    .ok_or_else(|| mlua::Error::RuntimeError("create_snapshot: node gone".into()))?;
                if node.matrix_depth == NOT_RENDERING {
                    return Err(mlua::Error::RuntimeError(
                        "create_snapshot: only valid during render".into(),
                    ));
                }
                if node.snapshot_quota == 0 {
                    return Err(to_lua_err(BeamerError::QuotaExceeded("create_snapshot")));
                }
                node.snapshot_quota -= 1;
                Ok(ImageHandle {
                    texture_id: 0,
                    fbo_id: 0,
                    width: node.width,
                    height: node.height,
                    pooled: false,
                })
            })?,
        )?;
    }

    {
        let tree = &tree;
        let ctx = &ctx;
        globals.set(
            "render_self",
            scope.create_function_mut(move |_, ()| {
                let mut tree = tree.borrow_mut();
                let mut ctx = ctx.borrow_mut();
                let mut sub_ctx = HostCtx {
                    gl: &mut *ctx.gl,
                    pool: &mut *ctx.pool,
                    decoders: ctx.decoders,
                    started_at: ctx.started_at,
                };
                let target = Compositor::render_to_image(&mut tree, &mut sub_ctx, handle, now);
                Ok(ImageHandle::from(target))
            })?,
        )?;
    }

    {
        let tree = &tree;
        let ctx = &ctx;
        globals.set(
            "render_child",
            scope.create_function_mut(move |_, name: String| {
                let child = {
                    let mut tree = tree.borrow_mut();
                    let node = tree.get_mut(handle).ok_or_else(|| {
                        mlua::Error::RuntimeError("render_child: node gone".into())
                    })?;
                    if node.child_render_quota == 0 {
                        return Err(to_lua_err(BeamerError::QuotaExceeded("render_child")));
                    }
                    node.child_render_quota -= 1;
                    let parent_path = node.path.clone();
                    tree.find_by_path_or_alias(&format!("{parent_path}/{name}"))
                        .ok_or_else(|| to_lua_err(BeamerError::NoSuchChild(name.clone())))?
                };
                let mut tree = tree.borrow_mut();
                let mut ctx = ctx.borrow_mut();
                let mut sub_ctx = HostCtx {
                    gl: &mut *ctx.gl,
                    pool: &mut *ctx.pool,
                    decoders: ctx.decoders,
                    started_at: ctx.started_at,
                };
                let target = Compositor::render_to_image(&mut tree, &mut sub_ctx, child, now);
                Ok(ImageHandle::from(target))
            })?,
        )?;
    }

    {
        let tree = &tree;
        globals.set(
            "send_child",
            scope.create_function_mut(move |_, (name, msg): (String, String)| {
                let mut tree = tree.borrow_mut();
                let parent_path = tree
                    .get(handle)
                    .ok_or_else(|| mlua::Error::RuntimeError("send_child: node gone".into()))?
                    .path
                    .clone();
                let child = tree
                    .find_by_path_or_alias(&format!("{parent_path}/{name}"))
                    .ok_or_else(|| to_lua_err(BeamerError::NoSuchChild(name.clone())))?;
                tree.dispatch(child, now, ProfileBin::Event, |_, sandbox, path| {
                    sandbox.enter(path, |lua| {
                        let globals = lua.globals();
                        if let Ok(f) = globals.get::<mlua::Function>("on_msg") {
                            f.call::<()>(msg.clone())?;
                        }
                        Ok(())
                    })
                });
                Ok(())
            })?,
        )?;
    }

    {
        let started_at = ctx.borrow().started_at;
        globals.set(
            "now",
            scope.create_function_mut(move |_, ()| Ok(started_at.elapsed().as_secs_f64()))?,
        )?;
    }

    let gl_table = lua.create_table()?;
    {
        let ctx = &ctx;
        gl_table.set(
            "push",
            scope.create_function_mut(move |_, ()| {
                let mut c = ctx.borrow_mut();
                c.gl.push_matrix().map_err(to_lua_err)
            })?,
        )?;
    }
    {
        let ctx = &ctx;
        gl_table.set(
            "pop",
            scope.create_function_mut(move |_, ()| {
                let mut c = ctx.borrow_mut();
                c.gl.pop_matrix().map_err(to_lua_err)
            })?,
        )?;
    }
    {
        let ctx = &ctx;
        gl_table.set(
            "translate",
            scope.create_function_mut(move |_, (x, y, z): (f32, f32, f32)| {
                ctx.borrow_mut().gl.translate(x, y, z);
                Ok(())
            })?,
        )?;
    }
    {
        let ctx = &ctx;
        gl_table.set(
            "rotate",
            scope.create_function_mut(move |_, (deg, x, y, z): (f32, f32, f32, f32)| {
                ctx.borrow_mut().gl.rotate(deg, x, y, z);
                Ok(())
            })?,
        )?;
    }
    {
        let ctx = &ctx;
        gl_table.set(
            "scale",
            scope.create_function_mut(move |_, (x, y, z): (f32, f32, f32)| {
                ctx.borrow_mut().gl.scale(x, y, z);
                Ok(())
            })?,
        )?;
    }
    {
        let ctx = &ctx;
        gl_table.set(
            "clear",
            scope.create_function_mut(move |_, (r, g, b, a): (f32, f32, f32, f32)| {
                ctx.borrow_mut().gl.clear(r, g, b, a);
                Ok(())
            })?,
        )?;
    }
    {
        let ctx = &ctx;
        gl_table.set(
            "ortho",
            scope.create_function_mut(move |_, (l, r, b, t): (f32, f32, f32, f32)| {
                ctx.borrow_mut().gl.ortho(l, r, b, t);
                Ok(())
            })?,
        )?;
    }
    {
        let ctx = &ctx;
        gl_table.set(
            "perspective",
            scope.create_function_mut(move |_, (fov, aspect, near, far): (f32, f32, f32, f32)| {
                ctx.borrow_mut().gl.perspective(fov, aspect, near, far);
                Ok(())
            })?,
        )?;
    }
    globals.set("gl", gl_table)?;

    Ok(())
}

fn leaf_name(name: &str) -> mlua::Result<()> {
    if name.contains('/') {
        return Err(mlua::Error::RuntimeError(format!(
            "resource name must not contain '/': {name}"
        )));
    }
    Ok(())
}

fn node_dir(tree: &Tree, handle: NodeHandle) -> mlua::Result<std::path::PathBuf> {
    let node = tree
        .get(handle)
        .ok_or_else(|| mlua::Error::RuntimeError("node gone".into()))?;
    Ok(node.fs_dir.clone())
}

fn to_lua_err(err: crate::errors::BeamerError) -> mlua::Error {
    mlua::Error::RuntimeError(err.to_string())
}
