//! Target shader representation emitted by the translator.
//!
//! This mirrors the node vocabulary of the external renderer: a small closed
//! set of shader operations wired through named input slots. The JSON
//! description produced by [`describe`] is what the CLI dumps and what the
//! integration tests snapshot against.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;

/// Pixel storage of a translated image artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PixelFormat {
    /// 8-bit per channel, display-referred.
    Rgb8,
    /// 32-bit float per channel, scene-referred (HDR).
    RgbF32,
}

#[derive(Debug, Clone)]
pub enum PixelData {
    Bytes(Vec<u8>),
    Floats(Vec<f32>),
}

/// A baked or decoded pixel buffer.
///
/// `components` is 1 for height fields and 3 for color/normal data; the data
/// length is always `width * height * components`.
#[derive(Debug, Clone)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub components: u8,
    pub format: PixelFormat,
    pub data: PixelData,
}

impl Image {
    /// The degraded artifact returned when a bake cannot allocate its buffer.
    pub fn empty() -> Image {
        Image {
            width: 0,
            height: 0,
            components: 3,
            format: PixelFormat::Rgb8,
            data: PixelData::Bytes(Vec::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn rgb8(width: u32, height: u32, data: Vec<u8>) -> Image {
        debug_assert_eq!(data.len(), (width * height * 3) as usize);
        Image {
            width,
            height,
            components: 3,
            format: PixelFormat::Rgb8,
            data: PixelData::Bytes(data),
        }
    }

    pub fn rgb_f32(width: u32, height: u32, data: Vec<f32>) -> Image {
        debug_assert_eq!(data.len(), (width * height * 3) as usize);
        Image {
            width,
            height,
            components: 3,
            format: PixelFormat::RgbF32,
            data: PixelData::Floats(data),
        }
    }

    /// Decoded pixel as linear floats, without any wrapping; callers must
    /// pass in-bounds coordinates.
    pub fn pixel(&self, x: u32, y: u32) -> [f32; 3] {
        let c = self.components as usize;
        let i = (y * self.width + x) as usize * c;
        let ch = |k: usize| -> f32 {
            match &self.data {
                PixelData::Bytes(b) => f32::from(b[i + k]) / 255.0,
                PixelData::Floats(f) => f[i + k],
            }
        };
        if c == 1 {
            let g = ch(0);
            [g, g, g]
        } else {
            [ch(0), ch(1), ch(2)]
        }
    }

    /// Decode a bitmap file into an 8-bit RGB image.
    pub fn load(path: &str) -> Result<Image> {
        let decoded = image::open(path).with_context(|| format!("failed to decode bitmap {path}"))?;
        let rgb = decoded.into_rgb8();
        let (w, h) = rgb.dimensions();
        Ok(Image::rgb8(w, h, rgb.into_raw()))
    }

    /// Write the image as PNG (floats are clamped and quantized).
    pub fn save_png(&self, path: &str) -> Result<()> {
        let bytes: Vec<u8> = match &self.data {
            PixelData::Bytes(b) if self.components == 3 => b.clone(),
            PixelData::Bytes(b) => b.iter().flat_map(|&g| [g, g, g]).collect(),
            PixelData::Floats(f) => f
                .iter()
                .map(|&v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
                .collect(),
        };
        let buf = image::RgbImage::from_raw(self.width, self.height, bytes)
            .ok_or_else(|| anyhow!("image buffer size mismatch"))?;
        buf.save(path).with_context(|| format!("failed to write {path}"))
    }
}

// Images can be large; the description only carries their shape.
impl Serialize for Image {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Image", 4)?;
        s.serialize_field("width", &self.width)?;
        s.serialize_field("height", &self.height)?;
        s.serialize_field("components", &self.components)?;
        s.serialize_field("format", &self.format)?;
        s.end()
    }
}

/// A plain value flowing through a shader input slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ShaderValue {
    Float(f32),
    Color([f32; 4]),
    Vector([f32; 3]),
    Uint(u32),
    /// Row-major affine 3x4 color transform.
    Matrix([f32; 12]),
}

impl ShaderValue {
    pub fn as_color(&self) -> Option<[f32; 4]> {
        match self {
            ShaderValue::Color(c) => Some(*c),
            ShaderValue::Float(f) => Some([*f, *f, *f, 1.0]),
            ShaderValue::Vector(v) => Some([v[0], v[1], v[2], 1.0]),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Average,
    Abs,
    Dot,
    /// Euclidean length of the single input.
    Length,
    /// `1 - x`, used by screen blends and inverted outputs.
    OneMinus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LookupKind {
    Uv,
    Normal,
    Incident,
    WorldPosition,
}

/// Closed operation set of the target renderer's shader graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShaderOp {
    Constant,
    ImageSample,
    Checker,
    Blend,
    Arith(ArithOp),
    ColorMatrix,
    Fresnel,
    Lookup(LookupKind),
    NormalMap,
    BumpMap,
    MatteBrdf,
}

pub type ShaderNodeRef = Arc<ShaderNode>;

#[derive(Debug, Clone, Serialize)]
pub enum ShaderInput {
    Value(ShaderValue),
    Node(ShaderNodeRef),
    Image(Arc<Image>),
}

impl ShaderInput {
    /// Constant color carried by this input, if it is a plain value.
    pub fn as_constant_color(&self) -> Option<[f32; 4]> {
        match self {
            ShaderInput::Value(v) => v.as_color(),
            _ => None,
        }
    }
}

/// One node of the emitted shader graph. Inputs keep insertion order so the
/// JSON description is stable.
#[derive(Debug, Serialize)]
pub struct ShaderNode {
    pub op: ShaderOp,
    pub inputs: Vec<(String, ShaderInput)>,
}

impl ShaderNode {
    pub fn input(&self, slot: &str) -> Option<&ShaderInput> {
        self.inputs.iter().find(|(n, _)| n == slot).map(|(_, v)| v)
    }
}

/// Builder for emitted shader nodes.
pub fn shader(op: ShaderOp) -> ShaderNodeBuilder {
    ShaderNodeBuilder {
        op,
        inputs: Vec::new(),
    }
}

pub struct ShaderNodeBuilder {
    op: ShaderOp,
    inputs: Vec<(String, ShaderInput)>,
}

impl ShaderNodeBuilder {
    pub fn input(mut self, slot: impl Into<String>, input: ShaderInput) -> Self {
        self.inputs.push((slot.into(), input));
        self
    }

    pub fn value(self, slot: impl Into<String>, v: ShaderValue) -> Self {
        self.input(slot, ShaderInput::Value(v))
    }

    pub fn node(self, slot: impl Into<String>, n: ShaderNodeRef) -> Self {
        self.input(slot, ShaderInput::Node(n))
    }

    pub fn image(self, slot: impl Into<String>, img: Arc<Image>) -> Self {
        self.input(slot, ShaderInput::Image(img))
    }

    pub fn finish(self) -> ShaderNodeRef {
        Arc::new(ShaderNode {
            op: self.op,
            inputs: self.inputs,
        })
    }
}

/// What a translation produced: an image, a plain value, or a shader graph.
#[derive(Debug, Clone, Serialize)]
pub enum TranslatedArtifact {
    Image(Arc<Image>),
    Value(ShaderValue),
    Shader(ShaderNodeRef),
}

impl TranslatedArtifact {
    /// View the artifact as a shader input slot value.
    pub fn as_input(&self) -> ShaderInput {
        match self {
            TranslatedArtifact::Image(img) => ShaderInput::Node(
                shader(ShaderOp::ImageSample).image("image", img.clone()).finish(),
            ),
            TranslatedArtifact::Value(v) => ShaderInput::Value(v.clone()),
            TranslatedArtifact::Shader(n) => ShaderInput::Node(n.clone()),
        }
    }
}

/// A translation result plus the cacheability decision, which composes
/// upward: a shader is cacheable only if everything it folded in was.
#[derive(Debug, Clone)]
pub struct Translated {
    pub artifact: TranslatedArtifact,
    pub cacheable: bool,
}

impl Translated {
    pub fn cacheable(artifact: TranslatedArtifact) -> Translated {
        Translated {
            artifact,
            cacheable: true,
        }
    }

    pub fn volatile(artifact: TranslatedArtifact) -> Translated {
        Translated {
            artifact,
            cacheable: false,
        }
    }
}

/// JSON description of an artifact, for diagnostics and snapshot tests.
pub fn describe(artifact: &TranslatedArtifact) -> serde_json::Value {
    serde_json::to_value(artifact).unwrap_or(serde_json::Value::Null)
}
