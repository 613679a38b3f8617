//! Narrow GPU interface the compositor drives (§1, §4.F.1). The teacher
//! abstracts its GPU device behind `WgpuContext`; this host abstracts the
//! much smaller surface it actually needs — matrix/attribute stack
//! discipline and render-target binding — behind [`GlContext`], so the
//! compositor's control flow is unit-testable without a live GL context.

use crate::errors::Result;

/// An offscreen render target: `(width, height, fbo_id, texture_id)`
/// (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub width: u32,
    pub height: u32,
    pub fbo_id: u64,
    pub texture_id: u64,
}

/// Opaque token returned by [`GlContext::capture_state`] and consumed by
/// [`GlContext::restore_state`]; implementations may stuff whatever they
/// need into it (bound framebuffer, active program, matrices, attribute
/// stack).
pub struct GlStateToken(pub u64);

/// The GPU surface the compositor needs. See §4.F for the exact contract
/// each method participates in.
pub trait GlContext {
    fn capture_state(&mut self) -> GlStateToken;
    fn restore_state(&mut self, token: GlStateToken);

    fn alloc_target(&mut self, width: u32, height: u32) -> RenderTarget;
    fn free_target(&mut self, target: RenderTarget);

    fn bind_target(&mut self, target: &RenderTarget);
    /// Orthographic projection matching `(w, h)`, z-range ±1000; identity
    /// modelview; viewport `(0, 0, w, h)`; clear to transparent white.
    fn setup_render_target_state(&mut self, width: u32, height: u32);

    fn push_matrix(&mut self) -> Result<()>;
    fn pop_matrix(&mut self) -> Result<()>;
    fn translate(&mut self, x: f32, y: f32, z: f32);
    fn rotate(&mut self, degrees: f32, x: f32, y: f32, z: f32);
    fn scale(&mut self, x: f32, y: f32, z: f32);
    fn ortho(&mut self, left: f32, right: f32, bottom: f32, top: f32);
    fn perspective(&mut self, fov_y: f32, aspect: f32, near: f32, far: f32);
    fn clear(&mut self, r: f32, g: f32, b: f32, a: f32);

    fn generate_mipmaps(&mut self, texture_id: u64);

    /// Fills the bound target with a flat diagnostic color (grey for
    /// "not set up", red for "blacklisted"); used in place of dispatching
    /// `render` when §4.F step 2 substitutes a fallback surface.
    fn fill_diagnostic(&mut self, target: &RenderTarget, r: f32, g: f32, b: f32);
}

/// A GL context with no real GPU behind it: every allocation hands back a
/// monotonically increasing id, every draw call is a no-op. Used for
/// headless operation and for exercising compositor/sandbox control flow
/// in tests (§4.F.1).
pub struct NullGlContext {
    next_id: u64,
}

impl NullGlContext {
    #[must_use]
    pub fn new() -> Self {
        Self { next_id: 1 }
    }
}

impl Default for NullGlContext {
    fn default() -> Self {
        Self::new()
    }
}

impl GlContext for NullGlContext {
    fn capture_state(&mut self) -> GlStateToken {
        GlStateToken(0)
    }
    fn restore_state(&mut self, _token: GlStateToken) {}

    fn alloc_target(&mut self, width: u32, height: u32) -> RenderTarget {
        let id = self.next_id;
        self.next_id += 1;
        RenderTarget {
            width,
            height,
            fbo_id: id,
            texture_id: id,
        }
    }
    fn free_target(&mut self, _target: RenderTarget) {}

    fn bind_target(&mut self, _target: &RenderTarget) {}
    fn setup_render_target_state(&mut self, _width: u32, _height: u32) {}

    fn push_matrix(&mut self) -> Result<()> {
        Ok(())
    }
    fn pop_matrix(&mut self) -> Result<()> {
        Ok(())
    }
    fn translate(&mut self, _x: f32, _y: f32, _z: f32) {}
    fn rotate(&mut self, _degrees: f32, _x: f32, _y: f32, _z: f32) {}
    fn scale(&mut self, _x: f32, _y: f32, _z: f32) {}
    fn ortho(&mut self, _left: f32, _right: f32, _bottom: f32, _top: f32) {}
    fn perspective(&mut self, _fov_y: f32, _aspect: f32, _near: f32, _far: f32) {}
    fn clear(&mut self, _r: f32, _g: f32, _b: f32, _a: f32) {}

    fn generate_mipmaps(&mut self, _texture_id: u64) {}

    fn fill_diagnostic(&mut self, _target: &RenderTarget, _r: f32, _g: f32, _b: f32) {}
}
