//! Translation of the view-dependent falloff node.
//!
//! Falloff blends two inputs by a weight derived from shading geometry. The
//! weight expression depends on the falloff mode; every mode except Fresnel
//! captures camera or object state, so those results are marked volatile and
//! stay out of the content cache.

use anyhow::Result;

use super::Translator;
use crate::cache::TranslationFlags;
use crate::graph::NodeRef;
use crate::target::{
    ArithOp, LookupKind, ShaderInput, ShaderNodeRef, ShaderOp, ShaderValue, Translated,
    TranslatedArtifact, shader,
};

use super::pattern_nodes::{BLACK, WHITE};

fn arith(op: ArithOp, a: ShaderInput, b: ShaderInput) -> ShaderNodeRef {
    shader(ShaderOp::Arith(op)).input("a", a).input("b", b).finish()
}

fn lookup(kind: LookupKind) -> ShaderInput {
    ShaderInput::Node(shader(ShaderOp::Lookup(kind)).finish())
}

/// Weight expression for one falloff mode, plus whether it is stable across
/// view changes.
fn falloff_weight(t: &Translator, node: &NodeRef) -> (ShaderNodeRef, bool) {
    match node.int("mode", 0) {
        // Fresnel reflectance from the index of refraction. Pure surface
        // property, safe to cache.
        1 => {
            let ior = node.float("ior", 1.52);
            let w = shader(ShaderOp::Fresnel)
                .value("ior", ShaderValue::Float(ior))
                .finish();
            (w, true)
        }
        // Distance falloff: blend by distance from the camera position,
        // remapped over [near, far].
        2 => {
            let near = node.float("near", 0.0);
            let far = node.float("far", 100.0).max(near + 1e-3);
            let delta = arith(
                ArithOp::Sub,
                lookup(LookupKind::WorldPosition),
                ShaderInput::Value(ShaderValue::Vector(t.camera.position)),
            );
            let dist = shader(ShaderOp::Arith(ArithOp::Length))
                .node("a", delta)
                .finish();
            let w = shader(ShaderOp::Blend)
                .node("weight", dist)
                .value("range", ShaderValue::Vector([near, far, 0.0]))
                .finish();
            (w, false)
        }
        // Directional falloff against a fixed object-space axis.
        3 => {
            let dir = node.vector("direction", [0.0, 0.0, 1.0]);
            let w = arith(
                ArithOp::Dot,
                lookup(LookupKind::Normal),
                ShaderInput::Value(ShaderValue::Vector(dir)),
            );
            (w, false)
        }
        // Default: perpendicular-to-view, 1 - |N . I|.
        _ => {
            let facing = arith(
                ArithOp::Dot,
                lookup(LookupKind::Normal),
                lookup(LookupKind::Incident),
            );
            let mag = shader(ShaderOp::Arith(ArithOp::Abs))
                .node("a", facing)
                .finish();
            let w = shader(ShaderOp::Arith(ArithOp::OneMinus))
                .node("a", mag)
                .finish();
            (w, false)
        }
    }
}

pub fn translate_falloff(
    t: &mut Translator,
    node: &NodeRef,
    flags: TranslationFlags,
) -> Result<Translated> {
    let (weight, mode_cacheable) = falloff_weight(t, node);
    let (i1, k1) = t.input_color(node, "map1", "color1", BLACK, flags)?;
    let (i2, k2) = t.input_color(node, "map2", "color2", WHITE, flags)?;

    let blend = shader(ShaderOp::Blend)
        .input("color0", i1)
        .input("color1", i2)
        .node("weight", weight)
        .finish();
    Ok(Translated {
        artifact: TranslatedArtifact::Shader(blend),
        cacheable: k1 && k2 && mode_cacheable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TranslationSession;
    use crate::eval::ProceduralEval;
    use crate::graph::{NodeBuilder, NodeKind, ParamValue};

    fn translate(node: &NodeRef) -> (Translated, usize) {
        let mut session = TranslationSession::new();
        let mut t = Translator::new(&mut session, &ProceduralEval);
        let out = t.translate(node, TranslationFlags::empty()).unwrap();
        (out, session.cache().len())
    }

    #[test]
    fn view_mode_is_never_cached() {
        let node = NodeBuilder::new(NodeKind::Falloff).build();
        let (out, cached) = translate(&node);
        assert!(!out.cacheable);
        assert_eq!(cached, 0, "volatile result must not enter the cache");
    }

    #[test]
    fn fresnel_mode_is_cacheable() {
        let node = NodeBuilder::new(NodeKind::Falloff)
            .param("mode", ParamValue::Int(1))
            .float("ior", 1.33)
            .build();
        let (out, cached) = translate(&node);
        assert!(out.cacheable);
        assert_eq!(cached, 1);

        let TranslatedArtifact::Shader(s) = &out.artifact else {
            panic!("expected shader");
        };
        let Some(ShaderInput::Node(w)) = s.input("weight") else {
            panic!("expected weight node");
        };
        assert_eq!(w.op, ShaderOp::Fresnel);
    }

    #[test]
    fn distance_mode_captures_camera_position() {
        let mut session = TranslationSession::new();
        let mut t = Translator::new(&mut session, &ProceduralEval);
        t.camera.position = [1.0, 2.0, 3.0];
        let node = NodeBuilder::new(NodeKind::Falloff)
            .param("mode", ParamValue::Int(2))
            .float("near", 5.0)
            .float("far", 50.0)
            .build();
        let out = t.translate(&node, TranslationFlags::empty()).unwrap();
        assert!(!out.cacheable);

        let TranslatedArtifact::Shader(s) = &out.artifact else {
            panic!("expected shader");
        };
        let Some(ShaderInput::Node(w)) = s.input("weight") else {
            panic!("expected weight node");
        };
        let Some(ShaderInput::Value(ShaderValue::Vector(range))) = w.input("range") else {
            panic!("expected range");
        };
        assert_eq!(*range, [5.0, 50.0, 0.0]);
    }

    #[test]
    fn directional_mode_uses_axis_parameter() {
        let node = NodeBuilder::new(NodeKind::Falloff)
            .param("mode", ParamValue::Int(3))
            .param("direction", ParamValue::Vector([0.0, 1.0, 0.0]))
            .build();
        let (out, _) = translate(&node);
        let TranslatedArtifact::Shader(s) = &out.artifact else {
            panic!("expected shader");
        };
        let Some(ShaderInput::Node(w)) = s.input("weight") else {
            panic!("expected weight node");
        };
        assert_eq!(w.op, ShaderOp::Arith(ArithOp::Dot));
        let Some(ShaderInput::Value(ShaderValue::Vector(dir))) = w.input("b") else {
            panic!("expected direction value");
        };
        assert_eq!(*dir, [0.0, 1.0, 0.0]);
    }
}
