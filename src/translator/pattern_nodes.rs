//! Translation routines for procedural pattern nodes: checker, noise and
//! gradient.

use std::sync::Arc;

use anyhow::Result;

use super::Translator;
use crate::bake;
use crate::cache::TranslationFlags;
use crate::graph::{NodeBuilder, NodeKind, NodeRef};
use crate::target::{
    Image, ShaderOp, ShaderValue, Translated, TranslatedArtifact, shader,
};

pub(crate) const BLACK: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
pub(crate) const WHITE: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// Attach the node's UV placement to an emitted procedural node, if it is
/// not the identity.
fn with_uv(builder: crate::target::ShaderNodeBuilder, node: &NodeRef) -> crate::target::ShaderNodeBuilder {
    if node.uv.is_identity() {
        return builder;
    }
    builder
        .value(
            "uv_offset",
            ShaderValue::Vector([node.uv.offset[0], node.uv.offset[1], 0.0]),
        )
        .value(
            "uv_tiling",
            ShaderValue::Vector([node.uv.tiling[0], node.uv.tiling[1], 1.0]),
        )
        .value("uv_rotation", ShaderValue::Float(node.uv.rotation))
}

/// Checkerboard. The pure black/white case with no sub-maps collapses to
/// the raw procedural checker node; everything else blends the two inputs
/// with the checker value as the weight.
pub fn translate_checker(
    t: &mut Translator,
    node: &NodeRef,
    flags: TranslationFlags,
) -> Result<Translated> {
    let size = node.float("size", 2.0);
    let checker = with_uv(shader(ShaderOp::Checker), node)
        .value("size", ShaderValue::Float(size))
        .finish();

    let has_maps = node.sub_node("map1").is_some() || node.sub_node("map2").is_some();
    let c1 = node.color("color1", BLACK);
    let c2 = node.color("color2", WHITE);
    if !has_maps && c1 == BLACK && c2 == WHITE {
        return Ok(Translated::cacheable(TranslatedArtifact::Shader(checker)));
    }

    let (i1, k1) = t.input_color(node, "map1", "color1", BLACK, flags)?;
    let (i2, k2) = t.input_color(node, "map2", "color2", WHITE, flags)?;
    let blend = shader(ShaderOp::Blend)
        .input("color0", i1)
        .input("color1", i2)
        .node("weight", checker)
        .finish();
    Ok(Translated {
        artifact: TranslatedArtifact::Shader(blend),
        cacheable: k1 && k2,
    })
}

/// Multi-octave noise with threshold remap. The scalar field has no direct
/// equivalent in the target renderer, so it is baked once (colors stripped)
/// and used as the blend weight between the two color inputs.
pub fn translate_noise(
    t: &mut Translator,
    node: &NodeRef,
    flags: TranslationFlags,
) -> Result<Translated> {
    let weight_src = NodeBuilder::new(NodeKind::Noise)
        .float("size", node.float("size", 1.0))
        .float("levels", node.float("levels", 3.0))
        .float("low", node.float("low", 0.0))
        .float("high", node.float("high", 1.0))
        .uv(node.uv)
        .build();
    let (w, h) = t.bake_size;
    let img = Arc::new(bake::bake(&weight_src, t.host, w, h, TranslationFlags::empty()));
    let sample = shader(ShaderOp::ImageSample).image("image", img).finish();

    let has_maps = node.sub_node("map1").is_some() || node.sub_node("map2").is_some();
    let c1 = node.color("color1", BLACK);
    let c2 = node.color("color2", WHITE);
    if !has_maps && c1 == BLACK && c2 == WHITE {
        // The baked field already is the black-to-white result.
        return Ok(Translated::cacheable(TranslatedArtifact::Shader(sample)));
    }

    let (i1, k1) = t.input_color(node, "map1", "color1", BLACK, flags)?;
    let (i2, k2) = t.input_color(node, "map2", "color2", WHITE, flags)?;
    let blend = shader(ShaderOp::Blend)
        .input("color0", i1)
        .input("color1", i2)
        .node("weight", sample)
        .finish();
    Ok(Translated {
        artifact: TranslatedArtifact::Shader(blend),
        cacheable: k1 && k2,
    })
}

/// Two- or three-stop gradient. Linear gradients blend along the V axis;
/// radial gradients pre-bake a small 1-D lookup image sampled by radius.
pub fn translate_gradient(
    t: &mut Translator,
    node: &NodeRef,
    flags: TranslationFlags,
) -> Result<Translated> {
    let radial = node.int("type", 0) == 1;
    let has_maps = node.sub_nodes().next().is_some();

    if radial {
        if has_maps {
            // Sub-maps cannot go through the 1-D lookup; rasterize instead.
            return t.bake_fallback(node, flags);
        }
        let lut = Arc::new(radial_lut(node));
        let sample = with_uv(shader(ShaderOp::ImageSample), node)
            .image("image", lut)
            .value("mapping", ShaderValue::Uint(1))
            .finish();
        return Ok(Translated::cacheable(TranslatedArtifact::Shader(sample)));
    }

    let v_axis = shader(ShaderOp::Lookup(crate::target::LookupKind::Uv)).finish();
    let mid = node.float("position", 0.5).clamp(0.01, 0.99);
    let (i1, k1) = t.input_color(node, "map1", "color1", BLACK, flags)?;
    let (i2, k2) = t.input_color(node, "map2", "color2", [0.5, 0.5, 0.5, 1.0], flags)?;
    let (i3, k3) = t.input_color(node, "map3", "color3", WHITE, flags)?;

    let low = shader(ShaderOp::Blend)
        .input("color0", i1)
        .input("color1", i2)
        .node("weight", v_axis.clone())
        .value("range", ShaderValue::Vector([0.0, mid, 0.0]))
        .finish();
    let full = shader(ShaderOp::Blend)
        .node("color0", low)
        .input("color1", i3)
        .node("weight", v_axis)
        .value("range", ShaderValue::Vector([mid, 1.0, 0.0]))
        .finish();
    Ok(Translated {
        artifact: TranslatedArtifact::Shader(full),
        cacheable: k1 && k2 && k3,
    })
}

/// 256x1 lookup image of the gradient's stops along the radius.
fn radial_lut(node: &NodeRef) -> Image {
    const LUT_WIDTH: u32 = 256;
    let c1 = node.color("color1", BLACK);
    let c2 = node.color("color2", [0.5, 0.5, 0.5, 1.0]);
    let c3 = node.color("color3", WHITE);
    let mid = node.float("position", 0.5).clamp(0.01, 0.99);

    let mut data = Vec::with_capacity((LUT_WIDTH * 3) as usize);
    for x in 0..LUT_WIDTH {
        let p = x as f32 / (LUT_WIDTH - 1) as f32;
        let (a, b, t) = if p < mid {
            (c1, c2, p / mid)
        } else {
            (c2, c3, (p - mid) / (1.0 - mid))
        };
        for ch in 0..3 {
            let v = a[ch] + (b[ch] - a[ch]) * t;
            data.push((v.clamp(0.0, 1.0) * 255.0).round() as u8);
        }
    }
    Image::rgb8(LUT_WIDTH, 1, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TranslationSession;
    use crate::eval::ProceduralEval;
    use crate::graph::ParamValue;
    use crate::target::ShaderInput;

    fn translator(session: &mut TranslationSession) -> Translator<'_> {
        let mut t = Translator::new(session, &ProceduralEval);
        t.bake_size = (8, 8);
        t
    }

    #[test]
    fn black_white_checker_collapses_to_procedural_node() {
        let mut session = TranslationSession::new();
        let mut t = translator(&mut session);
        let node = NodeBuilder::new(NodeKind::Checker)
            .float("size", 4.0)
            .color("color1", BLACK)
            .color("color2", WHITE)
            .build();
        let out = translate_checker(&mut t, &node, TranslationFlags::empty()).unwrap();
        let TranslatedArtifact::Shader(s) = &out.artifact else {
            panic!("expected shader");
        };
        assert_eq!(s.op, ShaderOp::Checker, "must not be a blend wrapper");
    }

    #[test]
    fn tinted_checker_blends_inputs() {
        let mut session = TranslationSession::new();
        let mut t = translator(&mut session);
        let node = NodeBuilder::new(NodeKind::Checker)
            .color("color1", [1.0, 0.0, 0.0, 1.0])
            .color("color2", WHITE)
            .build();
        let out = translate_checker(&mut t, &node, TranslationFlags::empty()).unwrap();
        let TranslatedArtifact::Shader(s) = &out.artifact else {
            panic!("expected shader");
        };
        assert_eq!(s.op, ShaderOp::Blend);
        assert_eq!(
            s.input("color0").and_then(ShaderInput::as_constant_color),
            Some([1.0, 0.0, 0.0, 1.0])
        );
    }

    #[test]
    fn default_noise_is_a_baked_sample() {
        let mut session = TranslationSession::new();
        let mut t = translator(&mut session);
        let node = NodeBuilder::new(NodeKind::Noise).float("size", 2.0).build();
        let out = translate_noise(&mut t, &node, TranslationFlags::empty()).unwrap();
        let TranslatedArtifact::Shader(s) = &out.artifact else {
            panic!("expected shader");
        };
        assert_eq!(s.op, ShaderOp::ImageSample);
    }

    #[test]
    fn radial_gradient_prebakes_lut() {
        let mut session = TranslationSession::new();
        let mut t = translator(&mut session);
        let node = NodeBuilder::new(NodeKind::Gradient)
            .param("type", ParamValue::Int(1))
            .color("color1", BLACK)
            .color("color3", WHITE)
            .build();
        let out = translate_gradient(&mut t, &node, TranslationFlags::empty()).unwrap();
        let TranslatedArtifact::Shader(s) = &out.artifact else {
            panic!("expected shader");
        };
        assert_eq!(s.op, ShaderOp::ImageSample);
        let Some(ShaderInput::Image(img)) = s.input("image") else {
            panic!("expected lut image input");
        };
        assert_eq!((img.width, img.height), (256, 1));
        // Ends of the lut are the end stops.
        assert_eq!(img.pixel(0, 0), [0.0, 0.0, 0.0]);
        assert_eq!(img.pixel(255, 0), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn linear_gradient_chains_two_blends() {
        let mut session = TranslationSession::new();
        let mut t = translator(&mut session);
        let node = NodeBuilder::new(NodeKind::Gradient)
            .color("color1", BLACK)
            .color("color2", [0.5, 0.5, 0.5, 1.0])
            .color("color3", WHITE)
            .float("position", 0.25)
            .build();
        let out = translate_gradient(&mut t, &node, TranslationFlags::empty()).unwrap();
        let TranslatedArtifact::Shader(s) = &out.artifact else {
            panic!("expected shader");
        };
        assert_eq!(s.op, ShaderOp::Blend);
        let Some(ShaderInput::Value(ShaderValue::Vector(range))) = s.input("range") else {
            panic!("expected range value");
        };
        assert_eq!(*range, [0.25, 1.0, 0.0]);
    }
}
