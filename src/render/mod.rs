//! GPU abstraction, resource pooling, and the render-to-image contract
//! (§3, §4.F).

pub mod compositor;
pub mod gl;
pub mod pool;

pub use compositor::Compositor;
pub use gl::{GlContext, GlStateToken, NullGlContext, RenderTarget};
pub use pool::ResourcePool;
