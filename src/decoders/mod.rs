//! Narrow interfaces onto the decoders this core treats as external
//! collaborators (§1, §6): image/video/font/shader/remote-screen decode
//! and their GPU upload. Production builds wire these to real decode
//! libraries; this crate ships only the trait boundary plus a
//! placeholder implementation used for headless operation and tests,
//! following the teacher's `AssetReader` pattern of a narrow trait with a
//! local (`FileAssetReader`) and a null/test double.

use std::path::Path;

use crate::errors::Result;

/// Any sandbox-exposed handle that can be bound as a shader uniform or
/// drawn as a texture (§9: "texture-like" accepts anything with a
/// `texid()`).
pub trait Texid {
    fn texid(&self) -> u64;
}

#[derive(Debug, Clone, Copy)]
pub struct DecodedImage {
    pub texture_id: u64,
    pub width: u32,
    pub height: u32,
}

impl Texid for DecodedImage {
    fn texid(&self) -> u64 {
        self.texture_id
    }
}

pub trait ImageDecoder {
    fn load(&self, path: &Path) -> Result<DecodedImage>;
}

#[derive(Debug, Clone, Copy)]
pub struct VideoInfo {
    pub texture_id: u64,
    pub width: u32,
    pub height: u32,
    pub fps: f32,
}

pub trait VideoStream {
    fn info(&self) -> VideoInfo;
    /// Advances one frame into the texture; `false` at end of stream.
    fn next(&mut self) -> Result<bool>;
}

pub trait VideoDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoStream>>;
}

pub trait FontFace {
    /// Draws `text` at `(x, y)` and returns the horizontal advance.
    /// `text` is validated as UTF-8 before reaching here (§4.C).
    fn write(&self, x: f32, y: f32, text: &str, size: f32) -> Result<f32>;
}

pub trait FontDecoder {
    fn load(&self, path: &Path) -> Result<Box<dyn FontFace>>;
}

#[derive(Debug, Clone, Copy)]
pub struct ShaderProgram {
    pub program_id: u64,
}

pub trait ShaderCompiler {
    fn compile(&self, vertex_source: &str, fragment_source: &str) -> Result<ShaderProgram>;
}

pub trait VncScreen {
    fn size(&self) -> (u32, u32);
    fn alive(&self) -> bool;
    fn draw(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, alpha: f32) -> Result<()>;
}

pub trait VncClient {
    fn open(&self, host: &str, port: u16) -> Result<Box<dyn VncScreen>>;
}

/// Bundles every decoder port behind one object so the rest of the host
/// only needs to thread a single `Rc<dyn Decoders>` through capability
/// bindings (§4.C.1).
pub trait Decoders {
    fn image(&self) -> &dyn ImageDecoder;
    fn video(&self) -> &dyn VideoDecoder;
    fn font(&self) -> &dyn FontDecoder;
    fn shader(&self) -> &dyn ShaderCompiler;
    fn vnc(&self) -> &dyn VncClient;
}

/// Headless/test decoder set: every load succeeds with a fixed-size
/// placeholder, the same path the compositor takes for an un-setup node.
pub struct NullDecoders;

struct NullImage;
impl ImageDecoder for NullImage {
    fn load(&self, _path: &Path) -> Result<DecodedImage> {
        Ok(DecodedImage {
            texture_id: 0,
            width: 1,
            height: 1,
        })
    }
}

struct NullVideo;
impl VideoDecoder for NullVideo {
    fn open(&self, _path: &Path) -> Result<Box<dyn VideoStream>> {
        Ok(Box::new(NullVideoStream))
    }
}
struct NullVideoStream;
impl VideoStream for NullVideoStream {
    fn info(&self) -> VideoInfo {
        VideoInfo {
            texture_id: 0,
            width: 1,
            height: 1,
            fps: 0.0,
        }
    }
    fn next(&mut self) -> Result<bool> {
        Ok(false)
    }
}

struct NullFont;
impl FontDecoder for NullFont {
    fn load(&self, _path: &Path) -> Result<Box<dyn FontFace>> {
        Ok(Box::new(NullFontFace))
    }
}
struct NullFontFace;
impl FontFace for NullFontFace {
    fn write(&self, _x: f32, _y: f32, text: &str, size: f32) -> Result<f32> {
        Ok(text.chars().count() as f32 * size)
    }
}

struct NullShader;
impl ShaderCompiler for NullShader {
    fn compile(&self, _vertex_source: &str, _fragment_source: &str) -> Result<ShaderProgram> {
        Ok(ShaderProgram { program_id: 0 })
    }
}

struct NullVnc;
impl VncClient for NullVnc {
    fn open(&self, _host: &str, _port: u16) -> Result<Box<dyn VncScreen>> {
        Ok(Box::new(NullVncScreen))
    }
}
struct NullVncScreen;
impl VncScreen for NullVncScreen {
    fn size(&self) -> (u32, u32) {
        (1, 1)
    }
    fn alive(&self) -> bool {
        false
    }
    fn draw(&mut self, _x1: f32, _y1: f32, _x2: f32, _y2: f32, _alpha: f32) -> Result<()> {
        Ok(())
    }
}

impl Decoders for NullDecoders {
    fn image(&self) -> &dyn ImageDecoder {
        &NullImage
    }
    fn video(&self) -> &dyn VideoDecoder {
        &NullVideo
    }
    fn font(&self) -> &dyn FontDecoder {
        &NullFont
    }
    fn shader(&self) -> &dyn ShaderCompiler {
        &NullShader
    }
    fn vnc(&self) -> &dyn VncClient {
        &NullVnc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_image_decoder_returns_placeholder() {
        let decoders = NullDecoders;
        let img = decoders.image().load(Path::new("x.png")).unwrap();
        assert_eq!((img.width, img.height), (1, 1));
    }
}
