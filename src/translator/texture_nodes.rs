//! Translation of bitmap textures, normal/bump maps and the diffuse
//! material root.

use std::sync::Arc;

use anyhow::Result;
use xxhash_rust::xxh32::Xxh32;

use super::Translator;
use crate::cache::{CacheKey, TranslationFlags};
use crate::graph::NodeRef;
use crate::normal::{bump_to_normal, combine_normals, is_grayscale};
use crate::target::{
    Image, ShaderOp, ShaderValue, Translated, TranslatedArtifact, shader,
};

/// Decode a bitmap node's file through the session cache, so the same file
/// under the same flags is read from disk once per synchronization pass.
///
/// Keyed by path and gamma rather than the structural node hash: two bitmap
/// nodes with different UV placements still share the decoded pixels.
pub(crate) fn cached_bitmap(
    t: &mut Translator,
    node: &NodeRef,
    flags: TranslationFlags,
) -> Option<Arc<Image>> {
    let path = node.text("file")?;
    let gamma = node.float("gamma", 2.2);

    let mut acc = Xxh32::new(0);
    acc.update(path.as_bytes());
    acc.update(&gamma.to_le_bytes());
    let key = CacheKey::new(acc.digest(), flags & TranslationFlags::LINEAR_COLOR);

    if let Some(TranslatedArtifact::Image(img)) = t.session.cache().get(&key) {
        return Some(img.clone());
    }

    let img = match Image::load(path) {
        Ok(img) => Arc::new(img),
        Err(err) => {
            log::warn!("bitmap '{}': {err:#}", node.name);
            return None;
        }
    };
    t.session
        .cache_mut()
        .insert(key, TranslatedArtifact::Image(img.clone()));
    Some(img)
}

/// A bitmap texture becomes an image sample. Under the normal-map or
/// bump-map flags a grayscale source is first run through the height-field
/// converter, then wrapped in the decode node the renderer expects.
pub fn translate_bitmap(
    t: &mut Translator,
    node: &NodeRef,
    flags: TranslationFlags,
) -> Result<Translated> {
    let Some(img) = cached_bitmap(t, node, flags) else {
        // Missing file degrades to flat black, not an error.
        return Ok(Translated::cacheable(TranslatedArtifact::Value(
            ShaderValue::Color([0.0, 0.0, 0.0, 1.0]),
        )));
    };

    let wants_normal = flags.contains(TranslationFlags::NORMAL_MAP);
    let wants_bump = flags.contains(TranslationFlags::BUMP_MAP);

    let img = if (wants_normal || wants_bump) && is_grayscale(&img) {
        let strength = node.float("bump_strength", 1.0);
        Arc::new(bump_to_normal(&img, strength))
    } else {
        img
    };

    let mut sample = shader(ShaderOp::ImageSample).image("image", img);
    if !node.uv.is_identity() {
        sample = sample
            .value(
                "uv_offset",
                ShaderValue::Vector([node.uv.offset[0], node.uv.offset[1], 0.0]),
            )
            .value(
                "uv_tiling",
                ShaderValue::Vector([node.uv.tiling[0], node.uv.tiling[1], 1.0]),
            )
            .value("uv_rotation", ShaderValue::Float(node.uv.rotation));
    }
    let gamma = node.float("gamma", 2.2);
    if flags.contains(TranslationFlags::LINEAR_COLOR) || wants_normal || wants_bump {
        sample = sample.value("gamma", ShaderValue::Float(1.0));
    } else if gamma != 2.2 {
        sample = sample.value("gamma", ShaderValue::Float(gamma));
    }
    let sample = sample.finish();

    let out = if wants_normal || wants_bump {
        shader(ShaderOp::NormalMap).node("color", sample).finish()
    } else {
        sample
    };
    Ok(Translated::cacheable(TranslatedArtifact::Shader(out)))
}

/// Normal/bump modifier: merges an explicit normal map and a height-field
/// bump source into one tangent-space normal map input.
pub fn translate_normal_bump(
    t: &mut Translator,
    node: &NodeRef,
    flags: TranslationFlags,
) -> Result<Translated> {
    let normal_strength = node.float("normal_strength", 1.0);
    let bump_strength = node.float("bump_strength", 1.0);

    let normal_img = node.sub_node("normal_map").cloned().map(|sub| {
        let img = t.node_image(&sub, flags | TranslationFlags::LINEAR_COLOR);
        if is_grayscale(&img) {
            Arc::new(bump_to_normal(&img, normal_strength))
        } else {
            img
        }
    });
    let bump_img = node.sub_node("bump_map").cloned().map(|sub| {
        let img = t.node_image(&sub, flags | TranslationFlags::LINEAR_COLOR);
        // The bump slot is a height field by definition.
        Arc::new(bump_to_normal(&img, bump_strength))
    });

    let merged = match (normal_img, bump_img) {
        (Some(n), Some(b)) => Some(Arc::new(combine_normals(&n, &b))),
        (Some(n), None) => Some(n),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    };

    let out = match merged {
        Some(img) => shader(ShaderOp::NormalMap)
            .image("image", img)
            .value("strength", ShaderValue::Float(normal_strength))
            .finish(),
        // No input connected: the encoded straight-up normal.
        None => shader(ShaderOp::NormalMap)
            .value("color", ShaderValue::Color([0.5, 0.5, 1.0, 1.0]))
            .finish(),
    };
    Ok(Translated::cacheable(TranslatedArtifact::Shader(out)))
}

/// Diffuse material root: a matte BRDF with a color slot and an optional
/// normal perturbation.
pub fn translate_diffuse(
    t: &mut Translator,
    node: &NodeRef,
    flags: TranslationFlags,
) -> Result<Translated> {
    let (color, kc) = t.input_color(node, "map", "color", [0.5, 0.5, 0.5, 1.0], flags)?;
    let mut brdf = shader(ShaderOp::MatteBrdf).input("color", color);
    let mut cacheable = kc;

    if let Some(sub) = node.sub_node("normal").cloned() {
        let translated = t.translate(&sub, flags | TranslationFlags::NORMAL_MAP)?;
        cacheable = cacheable && translated.cacheable;
        brdf = brdf.input("normal", translated.artifact.as_input());
    }

    Ok(Translated {
        artifact: TranslatedArtifact::Shader(brdf.finish()),
        cacheable,
    })
}
