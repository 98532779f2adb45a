//! Translation of the layered composite node.
//!
//! Layers stack bottom-up. Each layer carries a blend mode, an opacity and
//! an optional mask; fully transparent or black-masked layers are dropped at
//! translation time, and constant layers fold through the blend formulas so
//! a stack of plain colors collapses to a single value.

use anyhow::Result;

use super::{Translator, combine_inputs};
use crate::cache::TranslationFlags;
use crate::eval::BlendMode;
use crate::graph::NodeRef;
use crate::target::{
    ArithOp, ShaderInput, ShaderOp, ShaderValue, Translated, TranslatedArtifact, shader,
};

use super::pattern_nodes::{BLACK, WHITE};

fn fold3(mode: BlendMode) -> impl Fn([f32; 4], [f32; 4]) -> [f32; 4] {
    move |b, t| {
        let out = mode.apply([b[0], b[1], b[2]], [t[0], t[1], t[2]]);
        [out[0], out[1], out[2], t[3]]
    }
}

/// Blend `top` over `bottom` symbolically. Constant pairs fold through
/// [`BlendMode::apply`]; everything else expands to the arithmetic nodes the
/// target renderer understands.
pub(crate) fn blend_inputs(mode: BlendMode, bottom: ShaderInput, top: ShaderInput) -> ShaderInput {
    if let (Some(b), Some(t)) = (bottom.as_constant_color(), top.as_constant_color()) {
        return ShaderInput::Value(ShaderValue::Color(fold3(mode)(b, t)));
    }
    match mode {
        BlendMode::Normal => top,
        BlendMode::Multiply => combine_inputs(ArithOp::Mul, bottom, top, fold3(mode)),
        BlendMode::Add => combine_inputs(ArithOp::Add, bottom, top, fold3(mode)),
        BlendMode::Subtract => combine_inputs(ArithOp::Sub, bottom, top, fold3(mode)),
        BlendMode::Average => combine_inputs(ArithOp::Average, bottom, top, fold3(mode)),
        BlendMode::Difference => {
            let diff = shader(ShaderOp::Arith(ArithOp::Sub))
                .input("a", bottom)
                .input("b", top)
                .finish();
            ShaderInput::Node(
                shader(ShaderOp::Arith(ArithOp::Abs)).node("a", diff).finish(),
            )
        }
        BlendMode::Screen => {
            // 1 - (1 - b) * (1 - t)
            let ib = shader(ShaderOp::Arith(ArithOp::OneMinus))
                .input("a", bottom)
                .finish();
            let it = shader(ShaderOp::Arith(ArithOp::OneMinus))
                .input("a", top)
                .finish();
            let prod = shader(ShaderOp::Arith(ArithOp::Mul))
                .node("a", ib)
                .node("b", it)
                .finish();
            ShaderInput::Node(
                shader(ShaderOp::Arith(ArithOp::OneMinus)).node("a", prod).finish(),
            )
        }
    }
}

fn is_black(input: &ShaderInput) -> bool {
    matches!(
        input.as_constant_color(),
        Some(c) if c[0] <= 0.0 && c[1] <= 0.0 && c[2] <= 0.0
    )
}

fn is_white(input: &ShaderInput) -> bool {
    matches!(
        input.as_constant_color(),
        Some(c) if c[0] >= 1.0 && c[1] >= 1.0 && c[2] >= 1.0
    )
}

pub fn translate_composite(
    t: &mut Translator,
    node: &NodeRef,
    flags: TranslationFlags,
) -> Result<Translated> {
    let count = node.int("layers", 0).max(0) as usize;
    let mut acc: Option<ShaderInput> = None;
    let mut cacheable = true;

    for i in 0..count {
        let layer_slot = format!("layer{i}");
        let color_slot = format!("color{i}");
        if node.sub_node(&layer_slot).is_none() && node.param(&color_slot).is_none() {
            continue;
        }

        let opacity = node.float(&format!("opacity{i}"), 1.0).clamp(0.0, 1.0);
        if opacity <= 0.0 {
            continue;
        }

        let mask_slot = format!("mask{i}");
        let (mask, km) = if node.sub_node(&mask_slot).is_some()
            || node.param(&format!("mask_color{i}")).is_some()
        {
            t.input_color(node, &mask_slot, &format!("mask_color{i}"), WHITE, flags)?
        } else {
            (ShaderInput::Value(ShaderValue::Float(1.0)), true)
        };
        // A black mask hides the layer entirely.
        if is_black(&mask) {
            continue;
        }

        let (top, kt) = t.input_color(node, &layer_slot, &color_slot, BLACK, flags)?;
        cacheable = cacheable && kt && km;

        let Some(bottom) = acc.take() else {
            // First visible layer fades up from black, like the evaluator.
            let black = ShaderInput::Value(ShaderValue::Color(BLACK));
            acc = Some(apply_weight(black, top, mask, opacity));
            continue;
        };

        let mode = BlendMode::from_index(node.int(&format!("mode{i}"), 0));
        let blended = blend_inputs(mode, bottom.clone(), top);
        acc = Some(apply_weight(bottom, blended, mask, opacity));
    }

    let artifact = match acc {
        Some(ShaderInput::Value(v)) => TranslatedArtifact::Value(v),
        Some(ShaderInput::Node(n)) => TranslatedArtifact::Shader(n),
        Some(ShaderInput::Image(img)) => TranslatedArtifact::Shader(
            shader(ShaderOp::ImageSample).image("image", img).finish(),
        ),
        // No visible layers: constant black.
        None => TranslatedArtifact::Value(ShaderValue::Color(BLACK)),
    };
    Ok(Translated { artifact, cacheable })
}

/// Fade `blended` back toward `bottom` by mask * opacity. A full-strength
/// weight skips the wrapper; constant weights fold into constant inputs.
fn apply_weight(
    bottom: ShaderInput,
    blended: ShaderInput,
    mask: ShaderInput,
    opacity: f32,
) -> ShaderInput {
    let weight = if is_white(&mask) {
        ShaderInput::Value(ShaderValue::Float(opacity))
    } else if opacity >= 1.0 {
        mask
    } else {
        combine_inputs(
            ArithOp::Mul,
            mask,
            ShaderInput::Value(ShaderValue::Float(opacity)),
            |m, o| [m[0] * o[0], m[1] * o[1], m[2] * o[2], m[3]],
        )
    };

    if let Some(w) = weight.as_constant_color() {
        if w[0] >= 1.0 && w[1] >= 1.0 && w[2] >= 1.0 {
            return blended;
        }
        if let (Some(b), Some(t)) = (bottom.as_constant_color(), blended.as_constant_color()) {
            let mut out = [0.0f32; 4];
            for c in 0..3 {
                out[c] = b[c] + (t[c] - b[c]) * w[c];
            }
            out[3] = t[3];
            return ShaderInput::Value(ShaderValue::Color(out));
        }
    }

    ShaderInput::Node(
        shader(ShaderOp::Blend)
            .input("color0", bottom)
            .input("color1", blended)
            .input("weight", weight)
            .finish(),
    )
}
