//! The render-to-image contract (§4.F): capture/restore GL state,
//! diagnostic-fill substitution for un-setup or blacklisted nodes,
//! resource-pool-backed target acquisition, matrix-stack recovery,
//! mipmap generation.

use mlua::Lua;

use crate::capabilities::{self, HostCtx};
use crate::render::gl::{GlContext, RenderTarget};
use crate::tree::node::NOT_RENDERING;
use crate::tree::{NodeHandle, ProfileBin, Tree};

pub struct Compositor;

impl Compositor {
    /// Renders `handle` into a fresh or recycled offscreen target and
    /// returns it. Never fails: an un-setup or blacklisted node yields a
    /// 1×1 diagnostic fill instead (§4.F step 2).
    pub fn render_to_image(
        tree: &mut Tree,
        ctx: &mut HostCtx,
        handle: NodeHandle,
        now: f64,
    ) -> RenderTarget {
        let state = ctx.gl.capture_state();

        let Some(node) = tree.get(handle) else {
            ctx.gl.restore_state(state);
            return ctx.gl.alloc_target(1, 1);
        };
        let path = node.path.clone();

        if !node.is_setup() {
            log::warn!("[{path}] render requested before setup()");
            let target = ctx.gl.alloc_target(1, 1);
            ctx.gl.bind_target(&target);
            ctx.gl.fill_diagnostic(&target, 0.5, 0.5, 0.5);
            ctx.gl.restore_state(state);
            return target;
        }
        if node.is_blacklisted(now) {
            let target = ctx.gl.alloc_target(1, 1);
            ctx.gl.bind_target(&target);
            ctx.gl.fill_diagnostic(&target, 1.0, 0.0, 0.0);
            ctx.gl.restore_state(state);
            return target;
        }

        let (width, height) = (node.width, node.height);
        let target = ctx
            .pool
            .acquire(width, height)
            .unwrap_or_else(|| ctx.gl.alloc_target(width, height));
        ctx.gl.bind_target(&target);
        ctx.gl.setup_render_target_state(width, height);

        if let Some(node) = tree.get_mut(handle) {
            node.matrix_depth = 0;
            node.frame_count += 1;
        }

        capabilities::dispatch_event(tree, ctx, handle, now, ProfileBin::Event, |lua| {
            dispatch_render(lua, width, height)
        });

        if let Some(node) = tree.get_mut(handle) {
            while node.matrix_depth > 0 {
                let _ = ctx.gl.pop_matrix();
                node.matrix_depth -= 1;
            }
            node.matrix_depth = NOT_RENDERING;
        }

        ctx.gl.generate_mipmaps(target.texture_id);
        ctx.gl.restore_state(state);
        target
    }

    /// Returns a target to the pool, freeing whatever it evicts (§3, §5).
    pub fn recycle(ctx: &mut HostCtx, target: RenderTarget) {
        if let Some(evicted) = ctx.pool.recycle(target) {
            ctx.gl.free_target(evicted);
        }
    }
}

fn dispatch_render(lua: &Lua, width: u32, height: u32) -> mlua::Result<()> {
    let globals = lua.globals();
    if let Ok(handler) = globals.get::<mlua::Function>("on_render") {
        handler.call::<()>((width, height))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::NullDecoders;
    use crate::render::gl::NullGlContext;
    use crate::render::pool::ResourcePool;
    use std::path::PathBuf;
    use std::time::Instant;

    fn test_ctx<'a>(gl: &'a mut NullGlContext, pool: &'a mut ResourcePool) -> HostCtx<'a> {
        HostCtx {
            gl,
            pool,
            decoders: &NullDecoders,
            started_at: Instant::now(),
        }
    }

    #[test]
    fn un_setup_node_yields_one_by_one_diagnostic() {
        let mut tree = Tree::new("root".into(), PathBuf::from("/root"));
        let root = tree.root();
        let mut gl = NullGlContext::new();
        let mut pool = ResourcePool::new(4);
        let mut ctx = test_ctx(&mut gl, &mut pool);
        let target = Compositor::render_to_image(&mut tree, &mut ctx, root, 0.0);
        assert_eq!((target.width, target.height), (1, 1));
    }

    #[test]
    fn blacklisted_node_yields_diagnostic_even_when_setup() {
        let mut tree = Tree::new("root".into(), PathBuf::from("/root"));
        let root = tree.root();
        {
            let node = tree.get_mut(root).unwrap();
            node.width = 640;
            node.height = 480;
            node.blacklisted_until = 1000.0;
        }
        let mut gl = NullGlContext::new();
        let mut pool = ResourcePool::new(4);
        let mut ctx = test_ctx(&mut gl, &mut pool);
        let target = Compositor::render_to_image(&mut tree, &mut ctx, root, 0.0);
        assert_eq!((target.width, target.height), (1, 1));
    }

    #[test]
    fn setup_node_renders_at_declared_size() {
        let mut tree = Tree::new("root".into(), PathBuf::from("/root"));
        let root = tree.root();
        {
            let node = tree.get_mut(root).unwrap();
            node.width = 640;
            node.height = 480;
            node.sandbox.as_mut().unwrap().boot("", |_| Ok(())).unwrap();
        }
        let mut gl = NullGlContext::new();
        let mut pool = ResourcePool::new(4);
        let mut ctx = test_ctx(&mut gl, &mut pool);
        let target = Compositor::render_to_image(&mut tree, &mut ctx, root, 0.0);
        assert_eq!((target.width, target.height), (640, 480));
        assert_eq!(tree.get(root).unwrap().matrix_depth, NOT_RENDERING);
    }
}
