//! Translation routines for color manipulation nodes: mix, color
//! correction, rgb multiply, tint, mask and output adjustment.

use anyhow::Result;

use super::{Translator, combine_inputs};
use crate::cache::TranslationFlags;
use crate::eval::{apply_color_matrix, color_correction_matrix};
use crate::graph::NodeRef;
use crate::target::{
    ArithOp, ShaderInput, ShaderOp, ShaderValue, Translated, TranslatedArtifact, shader,
};

use super::pattern_nodes::{BLACK, WHITE};

fn mul_rgb(a: [f32; 4], b: [f32; 4]) -> [f32; 4] {
    [a[0] * b[0], a[1] * b[1], a[2] * b[2], a[3] * b[3]]
}

fn shader_of(input: ShaderInput) -> TranslatedArtifact {
    match input {
        ShaderInput::Value(v) => TranslatedArtifact::Value(v),
        ShaderInput::Node(n) => TranslatedArtifact::Shader(n),
        ShaderInput::Image(img) => TranslatedArtifact::Shader(
            shader(ShaderOp::ImageSample).image("image", img).finish(),
        ),
    }
}

/// Mix two inputs by a constant amount or a mask sub-node. Amounts of
/// exactly 0 or 1 short-circuit to the corresponding input.
pub fn translate_mix(
    t: &mut Translator,
    node: &NodeRef,
    flags: TranslationFlags,
) -> Result<Translated> {
    let amount = node.float("amount", 0.5).clamp(0.0, 1.0);
    let has_mask = node.sub_node("mask").is_some();

    if !has_mask && amount == 0.0 {
        let (i1, k1) = t.input_color(node, "map1", "color1", BLACK, flags)?;
        return Ok(Translated {
            artifact: shader_of(i1),
            cacheable: k1,
        });
    }
    if !has_mask && amount == 1.0 {
        let (i2, k2) = t.input_color(node, "map2", "color2", WHITE, flags)?;
        return Ok(Translated {
            artifact: shader_of(i2),
            cacheable: k2,
        });
    }

    let (i1, k1) = t.input_color(node, "map1", "color1", BLACK, flags)?;
    let (i2, k2) = t.input_color(node, "map2", "color2", WHITE, flags)?;
    let (weight, kw) = if has_mask {
        t.input_color(node, "mask", "amount", [amount, amount, amount, 1.0], flags)?
    } else {
        (ShaderInput::Value(ShaderValue::Float(amount)), true)
    };

    let blend = shader(ShaderOp::Blend)
        .input("color0", i1)
        .input("color1", i2)
        .input("weight", weight)
        .finish();
    Ok(Translated {
        artifact: TranslatedArtifact::Shader(blend),
        cacheable: k1 && k2 && kw,
    })
}

/// HSV-style color correction as an affine 3x4 matrix. Identity parameters
/// pass the input through; a constant input is folded through the matrix at
/// translation time.
pub fn translate_color_correction(
    t: &mut Translator,
    node: &NodeRef,
    flags: TranslationFlags,
) -> Result<Translated> {
    let hue = node.float("hue", 0.0);
    let saturation = node.float("saturation", 1.0);
    let contrast = node.float("contrast", 1.0);
    let brightness = node.float("brightness", 0.0);

    let (input, cacheable) = t.input_color(node, "map", "color", [0.5, 0.5, 0.5, 1.0], flags)?;

    if hue == 0.0 && saturation == 1.0 && contrast == 1.0 && brightness == 0.0 {
        return Ok(Translated {
            artifact: shader_of(input),
            cacheable,
        });
    }

    let m = color_correction_matrix(hue, saturation, contrast, brightness);
    if let Some(c) = input.as_constant_color() {
        let rgb = apply_color_matrix(&m, [c[0], c[1], c[2]]);
        return Ok(Translated {
            artifact: TranslatedArtifact::Value(ShaderValue::Color([rgb[0], rgb[1], rgb[2], c[3]])),
            cacheable,
        });
    }

    let out = shader(ShaderOp::ColorMatrix)
        .input("color", input)
        .value("matrix", ShaderValue::Matrix(m))
        .finish();
    Ok(Translated {
        artifact: TranslatedArtifact::Shader(out),
        cacheable,
    })
}

pub fn translate_rgb_multiply(
    t: &mut Translator,
    node: &NodeRef,
    flags: TranslationFlags,
) -> Result<Translated> {
    let (i1, k1) = t.input_color(node, "map1", "color1", WHITE, flags)?;
    let (i2, k2) = t.input_color(node, "map2", "color2", WHITE, flags)?;
    Ok(Translated {
        artifact: shader_of(combine_inputs(ArithOp::Mul, i1, i2, mul_rgb)),
        cacheable: k1 && k2,
    })
}

/// Per-channel tint: output = r*red + g*green + b*blue, expressed as a
/// color matrix whose columns are the three tint colors.
pub fn translate_rgb_tint(
    t: &mut Translator,
    node: &NodeRef,
    flags: TranslationFlags,
) -> Result<Translated> {
    let r = node.vector("red", [1.0, 0.0, 0.0]);
    let g = node.vector("green", [0.0, 1.0, 0.0]);
    let b = node.vector("blue", [0.0, 0.0, 1.0]);
    let m: [f32; 12] = [
        r[0], g[0], b[0], 0.0,
        r[1], g[1], b[1], 0.0,
        r[2], g[2], b[2], 0.0,
    ];

    let (input, cacheable) = t.input_color(node, "map", "color", WHITE, flags)?;
    if let Some(c) = input.as_constant_color() {
        let rgb = apply_color_matrix(&m, [c[0], c[1], c[2]]);
        return Ok(Translated {
            artifact: TranslatedArtifact::Value(ShaderValue::Color([rgb[0], rgb[1], rgb[2], c[3]])),
            cacheable,
        });
    }
    let out = shader(ShaderOp::ColorMatrix)
        .input("color", input)
        .value("matrix", ShaderValue::Matrix(m))
        .finish();
    Ok(Translated {
        artifact: TranslatedArtifact::Shader(out),
        cacheable,
    })
}

pub fn translate_mask(
    t: &mut Translator,
    node: &NodeRef,
    flags: TranslationFlags,
) -> Result<Translated> {
    let (src, k1) = t.input_color(node, "map", "color", WHITE, flags)?;
    let (mask, k2) = t.input_color(node, "mask", "mask_color", WHITE, flags)?;
    Ok(Translated {
        artifact: shader_of(combine_inputs(ArithOp::Mul, src, mask, mul_rgb)),
        cacheable: k1 && k2,
    })
}

/// Host "output" adjustment node: optional invert plus an output amount.
/// The common amount=1/no-invert case passes the input through untouched.
pub fn translate_output(
    t: &mut Translator,
    node: &NodeRef,
    flags: TranslationFlags,
) -> Result<Translated> {
    let amount = node.float("amount", 1.0);
    let invert = node.boolean("invert", false);
    let (mut input, cacheable) = t.input_color(node, "map", "color", BLACK, flags)?;

    if invert {
        input = match input.as_constant_color() {
            Some(c) => ShaderInput::Value(ShaderValue::Color([
                1.0 - c[0],
                1.0 - c[1],
                1.0 - c[2],
                c[3],
            ])),
            None => ShaderInput::Node(
                shader(ShaderOp::Arith(ArithOp::OneMinus)).input("a", input).finish(),
            ),
        };
    }

    if amount != 1.0 {
        let scale = ShaderInput::Value(ShaderValue::Color([amount, amount, amount, 1.0]));
        input = combine_inputs(ArithOp::Mul, input, scale, mul_rgb);
    }

    Ok(Translated {
        artifact: shader_of(input),
        cacheable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TranslationSession;
    use crate::eval::ProceduralEval;
    use crate::graph::{NodeBuilder, NodeKind, ParamValue};

    fn translator(session: &mut TranslationSession) -> Translator<'_> {
        let mut t = Translator::new(session, &ProceduralEval);
        t.bake_size = (8, 8);
        t
    }

    #[test]
    fn mix_amount_zero_passes_first_input_through() {
        let mut session = TranslationSession::new();
        let mut t = translator(&mut session);
        let node = NodeBuilder::new(NodeKind::Mix)
            .float("amount", 0.0)
            .color("color1", [0.2, 0.3, 0.4, 1.0])
            .color("color2", WHITE)
            .build();
        let out = translate_mix(&mut t, &node, TranslationFlags::empty()).unwrap();
        let TranslatedArtifact::Value(ShaderValue::Color(c)) = out.artifact else {
            panic!("expected folded constant");
        };
        assert_eq!(c, [0.2, 0.3, 0.4, 1.0]);
    }

    #[test]
    fn identity_color_correction_is_a_passthrough() {
        let mut session = TranslationSession::new();
        let mut t = translator(&mut session);
        let node = NodeBuilder::new(NodeKind::ColorCorrection)
            .color("color", [0.1, 0.2, 0.3, 1.0])
            .build();
        let out = translate_color_correction(&mut t, &node, TranslationFlags::empty()).unwrap();
        let TranslatedArtifact::Value(ShaderValue::Color(c)) = out.artifact else {
            panic!("expected constant");
        };
        assert_eq!(c, [0.1, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn brightness_folds_into_constant_input() {
        let mut session = TranslationSession::new();
        let mut t = translator(&mut session);
        let node = NodeBuilder::new(NodeKind::ColorCorrection)
            .color("color", [0.2, 0.2, 0.2, 1.0])
            .float("brightness", 0.5)
            .build();
        let out = translate_color_correction(&mut t, &node, TranslationFlags::empty()).unwrap();
        let TranslatedArtifact::Value(ShaderValue::Color(c)) = out.artifact else {
            panic!("expected constant");
        };
        assert!((c[0] - 0.7).abs() < 1e-4);
    }

    #[test]
    fn correction_of_subgraph_emits_color_matrix() {
        let mut session = TranslationSession::new();
        let mut t = translator(&mut session);
        let checker = NodeBuilder::new(NodeKind::Checker).build();
        let node = NodeBuilder::new(NodeKind::ColorCorrection)
            .node("map", checker)
            .float("saturation", 0.0)
            .build();
        let out = translate_color_correction(&mut t, &node, TranslationFlags::empty()).unwrap();
        let TranslatedArtifact::Shader(s) = &out.artifact else {
            panic!("expected shader");
        };
        assert_eq!(s.op, ShaderOp::ColorMatrix);
    }

    #[test]
    fn rgb_multiply_folds_constants() {
        let mut session = TranslationSession::new();
        let mut t = translator(&mut session);
        let node = NodeBuilder::new(NodeKind::RgbMultiply)
            .color("color1", [0.5, 1.0, 0.0, 1.0])
            .color("color2", [0.5, 0.5, 1.0, 1.0])
            .build();
        let out = translate_rgb_multiply(&mut t, &node, TranslationFlags::empty()).unwrap();
        let TranslatedArtifact::Value(ShaderValue::Color(c)) = out.artifact else {
            panic!("expected constant");
        };
        assert_eq!(c, [0.25, 0.5, 0.0, 1.0]);
    }

    #[test]
    fn output_invert_and_amount_fold() {
        let mut session = TranslationSession::new();
        let mut t = translator(&mut session);
        let node = NodeBuilder::new(NodeKind::Output)
            .color("color", [1.0, 0.0, 0.5, 1.0])
            .param("invert", ParamValue::Bool(true))
            .float("amount", 0.5)
            .build();
        let out = translate_output(&mut t, &node, TranslationFlags::empty()).unwrap();
        let TranslatedArtifact::Value(ShaderValue::Color(c)) = out.artifact else {
            panic!("expected constant");
        };
        assert_eq!(c, [0.0, 0.5, 0.25, 1.0]);
    }
}
