//! Central translation dispatch.
//!
//! `Translator::translate` is the one entry point per node: consult the
//! session cache, dispatch on the node kind to a per-kind routine, and store
//! the result back unless something in the sub-graph declared itself
//! volatile (camera- or transform-dependent). Kinds without a dedicated
//! routine rasterize through the bake fallback, so an unknown node always
//! degrades to *something* visible rather than an error.

pub mod color_nodes;
pub mod composite_nodes;
pub mod falloff_nodes;
pub mod pattern_nodes;
pub mod texture_nodes;

use std::sync::Arc;

use anyhow::Result;

use crate::bake;
use crate::cache::{CacheKey, TranslationFlags, TranslationSession};
use crate::eval::HostEval;
use crate::graph::{NodeKind, NodeRef};
use crate::hash::{ReloadStamp, hash_graph};
use crate::target::{
    Image, ShaderInput, ShaderOp, ShaderValue, Translated, TranslatedArtifact, shader,
};

/// View state the falloff routines depend on. Anything derived from it is
/// marked not cacheable, because the cache outlives camera moves within a
/// synchronization pass only by luck.
#[derive(Debug, Clone, Copy)]
pub struct CameraInfo {
    pub position: [f32; 3],
    pub direction: [f32; 3],
}

impl Default for CameraInfo {
    fn default() -> Self {
        CameraInfo {
            position: [0.0, 0.0, 0.0],
            direction: [0.0, 0.0, -1.0],
        }
    }
}

/// Per-pass translator. Borrows the session (cache + reload stamp) and the
/// host evaluation boundary; owns nothing itself, per the explicit
/// dependency-injection design.
pub struct Translator<'a> {
    pub(crate) session: &'a mut TranslationSession,
    pub(crate) host: &'a dyn HostEval,
    /// Output resolution of the bake fallback.
    pub bake_size: (u32, u32),
    pub camera: CameraInfo,
}

impl<'a> Translator<'a> {
    pub fn new(session: &'a mut TranslationSession, host: &'a dyn HostEval) -> Translator<'a> {
        Translator {
            session,
            host,
            bake_size: (512, 512),
            camera: CameraInfo::default(),
        }
    }

    /// Translate one node under the given flags.
    pub fn translate(&mut self, node: &NodeRef, flags: TranslationFlags) -> Result<Translated> {
        let stamp = if flags.contains(TranslationFlags::NO_RELOAD_STAMP) {
            ReloadStamp::Excluded
        } else {
            ReloadStamp::Include(self.session.reload_stamp())
        };
        let key = CacheKey::new(hash_graph(node, stamp), flags);

        if let Some(artifact) = self.session.cache().get(&key) {
            return Ok(Translated::cacheable(artifact.clone()));
        }

        let result = if flags.contains(TranslationFlags::FORCE_BAKE) {
            self.bake_fallback(node, flags)?
        } else {
            self.dispatch(node, flags)?
        };

        // Volatile results must not outlive the state they captured.
        if result.cacheable {
            self.session.cache_mut().insert(key, result.artifact.clone());
        }
        Ok(result)
    }

    fn dispatch(&mut self, node: &NodeRef, flags: TranslationFlags) -> Result<Translated> {
        match node.kind {
            NodeKind::Diffuse => texture_nodes::translate_diffuse(self, node, flags),
            NodeKind::BitmapTexture => texture_nodes::translate_bitmap(self, node, flags),
            NodeKind::NormalBump => texture_nodes::translate_normal_bump(self, node, flags),
            NodeKind::Checker => pattern_nodes::translate_checker(self, node, flags),
            NodeKind::Noise => pattern_nodes::translate_noise(self, node, flags),
            NodeKind::Gradient => pattern_nodes::translate_gradient(self, node, flags),
            NodeKind::Mix => color_nodes::translate_mix(self, node, flags),
            NodeKind::ColorCorrection => color_nodes::translate_color_correction(self, node, flags),
            NodeKind::RgbMultiply => color_nodes::translate_rgb_multiply(self, node, flags),
            NodeKind::RgbTint => color_nodes::translate_rgb_tint(self, node, flags),
            NodeKind::Mask => color_nodes::translate_mask(self, node, flags),
            NodeKind::Output => color_nodes::translate_output(self, node, flags),
            NodeKind::Composite => composite_nodes::translate_composite(self, node, flags),
            NodeKind::Falloff => falloff_nodes::translate_falloff(self, node, flags),
            NodeKind::Unknown => self.bake_fallback(node, flags),
        }
    }

    /// Top-level material entry. Diffuse roots translate normally; any kind
    /// without material semantics degrades to a flat diffuse shader built
    /// from the host's representative color.
    pub fn translate_material(&mut self, node: &NodeRef) -> Result<Translated> {
        match node.kind {
            NodeKind::Diffuse => self.translate(node, TranslationFlags::empty()),
            _ => {
                log::debug!(
                    "material '{}' has unsupported kind {:?}; emitting flat diffuse",
                    node.name,
                    node.kind
                );
                let c = node.color("color", [0.5, 0.5, 0.5, 1.0]);
                let brdf = shader(ShaderOp::MatteBrdf)
                    .value("color", ShaderValue::Color(c))
                    .finish();
                Ok(Translated::cacheable(TranslatedArtifact::Shader(brdf)))
            }
        }
    }

    /// Default branch for kinds with no dedicated routine: rasterize the
    /// node and wrap the image in a sampling node, plus a normal-map or
    /// bump-map wrapper when the flags ask for one.
    pub(crate) fn bake_fallback(
        &mut self,
        node: &NodeRef,
        flags: TranslationFlags,
    ) -> Result<Translated> {
        let (w, h) = self.bake_size;
        let img = Arc::new(bake::bake(node, self.host, w, h, flags));
        let sample = shader(ShaderOp::ImageSample).image("image", img).finish();

        let out = if flags.contains(TranslationFlags::NORMAL_MAP) {
            shader(ShaderOp::NormalMap).node("color", sample).finish()
        } else if flags.contains(TranslationFlags::BUMP_MAP) {
            shader(ShaderOp::BumpMap).node("color", sample).finish()
        } else {
            sample
        };
        Ok(Translated::cacheable(TranslatedArtifact::Shader(out)))
    }

    /// Resolve an input slot that is either a sub-node or an inline color.
    /// Returns the shader input plus the sub-tree's cacheability.
    pub(crate) fn input_color(
        &mut self,
        node: &NodeRef,
        map_slot: &str,
        color_slot: &str,
        default: [f32; 4],
        flags: TranslationFlags,
    ) -> Result<(ShaderInput, bool)> {
        if let Some(sub) = node.sub_node(map_slot) {
            let sub = sub.clone();
            let translated = self.translate(&sub, flags)?;
            return Ok((translated.artifact.as_input(), translated.cacheable));
        }
        let c = node.color(color_slot, default);
        Ok((ShaderInput::Value(ShaderValue::Color(c)), true))
    }

    /// Materialize a node as a pixel buffer: direct bitmaps decode, anything
    /// else goes through the baker.
    pub(crate) fn node_image(&mut self, node: &NodeRef, flags: TranslationFlags) -> Arc<Image> {
        if node.kind == NodeKind::BitmapTexture {
            if let Some(img) = texture_nodes::cached_bitmap(self, node, flags) {
                return img;
            }
        }
        let (w, h) = self.bake_size;
        Arc::new(bake::bake(node, self.host, w, h, flags))
    }
}

/// Constant-fold a binary channel operation when both sides are plain
/// values; otherwise emit an Arith node. Folding keeps translated graphs
/// small and makes blend arithmetic observable in tests.
pub(crate) fn combine_inputs(
    op: crate::target::ArithOp,
    a: ShaderInput,
    b: ShaderInput,
    fold: impl Fn([f32; 4], [f32; 4]) -> [f32; 4],
) -> ShaderInput {
    if let (Some(ca), Some(cb)) = (a.as_constant_color(), b.as_constant_color()) {
        return ShaderInput::Value(ShaderValue::Color(fold(ca, cb)));
    }
    ShaderInput::Node(
        shader(ShaderOp::Arith(op))
            .input("a", a)
            .input("b", b)
            .finish(),
    )
}
