//! Host-side material graph model consumed by the translator.
//!
//! Nodes are owned by the host scene and shared freely (diamond-shaped
//! sub-graphs are common), so the reference type is `Arc` and the engine
//! never mutates a node after construction. Identity is the allocation
//! address; it is only ever used to key per-call memoization, never folded
//! into a content hash.

use std::sync::Arc;

use serde::Serialize;

pub type NodeRef = Arc<MaterialNode>;

/// Stable per-session identity of a shared node.
pub fn node_identity(node: &NodeRef) -> usize {
    Arc::as_ptr(node) as usize
}

/// Closed set of node kinds the translator knows how to dispatch on.
///
/// Anything the host exposes that has no dedicated translation routine maps
/// to `Unknown` and goes through the bake fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeKind {
    Diffuse,
    BitmapTexture,
    Checker,
    Noise,
    Gradient,
    Mix,
    Composite,
    ColorCorrection,
    RgbMultiply,
    RgbTint,
    Mask,
    Falloff,
    NormalBump,
    Output,
    Unknown,
}

impl NodeKind {
    /// Parse the interchange-format spelling of a kind.
    pub fn parse(s: &str) -> Option<NodeKind> {
        Some(match s {
            "Diffuse" => NodeKind::Diffuse,
            "BitmapTexture" => NodeKind::BitmapTexture,
            "Checker" => NodeKind::Checker,
            "Noise" => NodeKind::Noise,
            "Gradient" => NodeKind::Gradient,
            "Mix" => NodeKind::Mix,
            "Composite" => NodeKind::Composite,
            "ColorCorrection" => NodeKind::ColorCorrection,
            "RgbMultiply" => NodeKind::RgbMultiply,
            "RgbTint" => NodeKind::RgbTint,
            "Mask" => NodeKind::Mask,
            "Falloff" => NodeKind::Falloff,
            "NormalBump" => NodeKind::NormalBump,
            "Output" => NodeKind::Output,
            _ => return None,
        })
    }

    /// Discriminant folded into structural hashes.
    pub fn tag(self) -> u32 {
        match self {
            NodeKind::Diffuse => 1,
            NodeKind::BitmapTexture => 2,
            NodeKind::Checker => 3,
            NodeKind::Noise => 4,
            NodeKind::Gradient => 5,
            NodeKind::Mix => 6,
            NodeKind::Composite => 7,
            NodeKind::ColorCorrection => 8,
            NodeKind::RgbMultiply => 9,
            NodeKind::RgbTint => 10,
            NodeKind::Mask => 11,
            NodeKind::Falloff => 12,
            NodeKind::NormalBump => 13,
            NodeKind::Output => 14,
            NodeKind::Unknown => 255,
        }
    }
}

/// Typed parameter value. Node-typed parameters are how sub-graphs hang off
/// a node; an explicit `Node(None)` means the slot exists but is unconnected.
#[derive(Debug, Clone)]
pub enum ParamValue {
    Float(f32),
    Int(i64),
    Bool(bool),
    Color([f32; 4]),
    Vector([f32; 3]),
    Text(String),
    Node(Option<NodeRef>),
}

impl ParamValue {
    pub fn type_tag(&self) -> u8 {
        match self {
            ParamValue::Float(_) => 1,
            ParamValue::Int(_) => 2,
            ParamValue::Bool(_) => 3,
            ParamValue::Color(_) => 4,
            ParamValue::Vector(_) => 5,
            ParamValue::Text(_) => 6,
            ParamValue::Node(_) => 7,
        }
    }
}

/// 2-D placement of a texture in UV space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvTransform {
    pub offset: [f32; 2],
    pub tiling: [f32; 2],
    /// Rotation around the tile center, radians.
    pub rotation: f32,
}

impl UvTransform {
    pub const IDENTITY: UvTransform = UvTransform {
        offset: [0.0, 0.0],
        tiling: [1.0, 1.0],
        rotation: 0.0,
    };

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Map a raw UV coordinate through this transform.
    pub fn apply(&self, u: f32, v: f32) -> (f32, f32) {
        let mut u = u * self.tiling[0] + self.offset[0];
        let mut v = v * self.tiling[1] + self.offset[1];
        if self.rotation != 0.0 {
            let (s, c) = self.rotation.sin_cos();
            let (cu, cv) = (u - 0.5, v - 0.5);
            u = cu * c - cv * s + 0.5;
            v = cu * s + cv * c + 0.5;
        }
        (u, v)
    }
}

impl Default for UvTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// One node of the host material graph.
///
/// Parameters keep their declaration order; the structural hash depends on
/// that order, which is fine because the host enumerates parameter blocks
/// deterministically.
#[derive(Debug)]
pub struct MaterialNode {
    pub name: String,
    pub kind: NodeKind,
    pub params: Vec<(String, ParamValue)>,
    pub uv: UvTransform,
}

impl MaterialNode {
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// A missing or mistyped parameter resolves to the caller's default,
    /// never an error; that is the documented recoverable-missing-input
    /// behavior of the whole engine.
    pub fn float(&self, name: &str, default: f32) -> f32 {
        match self.param(name) {
            Some(ParamValue::Float(v)) => *v,
            Some(ParamValue::Int(v)) => *v as f32,
            _ => default,
        }
    }

    pub fn int(&self, name: &str, default: i64) -> i64 {
        match self.param(name) {
            Some(ParamValue::Int(v)) => *v,
            Some(ParamValue::Float(v)) => *v as i64,
            Some(ParamValue::Bool(v)) => i64::from(*v),
            _ => default,
        }
    }

    pub fn boolean(&self, name: &str, default: bool) -> bool {
        match self.param(name) {
            Some(ParamValue::Bool(v)) => *v,
            Some(ParamValue::Int(v)) => *v != 0,
            _ => default,
        }
    }

    pub fn color(&self, name: &str, default: [f32; 4]) -> [f32; 4] {
        match self.param(name) {
            Some(ParamValue::Color(v)) => *v,
            Some(ParamValue::Vector(v)) => [v[0], v[1], v[2], 1.0],
            Some(ParamValue::Float(v)) => [*v, *v, *v, 1.0],
            _ => default,
        }
    }

    pub fn vector(&self, name: &str, default: [f32; 3]) -> [f32; 3] {
        match self.param(name) {
            Some(ParamValue::Vector(v)) => *v,
            Some(ParamValue::Color(v)) => [v[0], v[1], v[2]],
            _ => default,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.param(name) {
            Some(ParamValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// The sub-node connected to a slot, if any.
    pub fn sub_node(&self, name: &str) -> Option<&NodeRef> {
        match self.param(name) {
            Some(ParamValue::Node(n)) => n.as_ref(),
            _ => None,
        }
    }

    /// All connected sub-nodes, in parameter order.
    pub fn sub_nodes(&self) -> impl Iterator<Item = &NodeRef> {
        self.params.iter().filter_map(|(_, v)| match v {
            ParamValue::Node(Some(n)) => Some(n),
            _ => None,
        })
    }
}

/// Builder used by the XML loader, the tests, and host adapters.
#[derive(Debug)]
pub struct NodeBuilder {
    name: String,
    kind: NodeKind,
    params: Vec<(String, ParamValue)>,
    uv: UvTransform,
}

impl NodeBuilder {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            name: String::new(),
            kind,
            params: Vec::new(),
            uv: UvTransform::IDENTITY,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.params.push((name.into(), value));
        self
    }

    pub fn float(self, name: impl Into<String>, v: f32) -> Self {
        self.param(name, ParamValue::Float(v))
    }

    pub fn int(self, name: impl Into<String>, v: i64) -> Self {
        self.param(name, ParamValue::Int(v))
    }

    pub fn color(self, name: impl Into<String>, v: [f32; 4]) -> Self {
        self.param(name, ParamValue::Color(v))
    }

    pub fn text(self, name: impl Into<String>, v: impl Into<String>) -> Self {
        self.param(name, ParamValue::Text(v.into()))
    }

    pub fn node(self, name: impl Into<String>, v: NodeRef) -> Self {
        self.param(name, ParamValue::Node(Some(v)))
    }

    pub fn uv(mut self, uv: UvTransform) -> Self {
        self.uv = uv;
        self
    }

    pub fn build(self) -> NodeRef {
        Arc::new(MaterialNode {
            name: self.name,
            kind: self.kind,
            params: self.params,
            uv: self.uv,
        })
    }
}
