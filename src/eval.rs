//! Host evaluation boundary and the built-in CPU evaluator.
//!
//! Contract (important for baking): any time the engine needs a node's color
//! **on CPU** it goes through [`EvalContext::eval_color`]. A context carries
//! mutable per-sample scratch state (noise tables, decoded-bitmap cache) and
//! must therefore never be shared across baker workers; each worker asks
//! [`HostEval::make_context`] for its own instance.

use std::collections::HashMap;
use std::sync::Arc;

use crate::graph::{MaterialNode, NodeKind};
use crate::target::Image;

/// Factory for per-worker evaluation contexts. Shared by reference across
/// the baker's worker threads, hence `Sync`.
pub trait HostEval: Sync {
    fn make_context(&self) -> Box<dyn EvalContext + '_>;
}

/// One worker's evaluation state.
pub trait EvalContext {
    /// Color of `node` at UV `(u, v)`, linear RGB. Never fails: unknown
    /// kinds and missing inputs degrade to a flat color.
    fn eval_color(&mut self, node: &MaterialNode, u: f32, v: f32) -> [f32; 3];
}

/// Composite layer blend formulas, shared by the CPU evaluator and the
/// translator's constant folding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Normal,
    Multiply,
    Screen,
    Difference,
    Add,
    Subtract,
    Average,
}

impl BlendMode {
    /// Host blend-mode index; out-of-range indices degrade to `Normal`.
    pub fn from_index(i: i64) -> BlendMode {
        match i {
            1 => BlendMode::Multiply,
            2 => BlendMode::Screen,
            3 => BlendMode::Difference,
            4 => BlendMode::Add,
            5 => BlendMode::Subtract,
            6 => BlendMode::Average,
            _ => BlendMode::Normal,
        }
    }

    /// Blend `top` over `bottom`, per channel.
    pub fn apply(self, bottom: [f32; 3], top: [f32; 3]) -> [f32; 3] {
        let mut out = [0.0; 3];
        for c in 0..3 {
            let (b, t) = (bottom[c], top[c]);
            out[c] = match self {
                BlendMode::Normal => t,
                BlendMode::Multiply => b * t,
                BlendMode::Screen => 1.0 - (1.0 - b) * (1.0 - t),
                BlendMode::Difference => (b - t).abs(),
                BlendMode::Add => b + t,
                BlendMode::Subtract => b - t,
                BlendMode::Average => (b + t) * 0.5,
            };
        }
        out
    }
}

/// Affine 3x4 color transform for hue/saturation/contrast/brightness, row
/// major. Built once per ColorCorrection node; applied per pixel when the
/// evaluator bakes and carried symbolically when the translator emits a
/// ColorMatrix shader node.
pub fn color_correction_matrix(
    hue_deg: f32,
    saturation: f32,
    contrast: f32,
    brightness: f32,
) -> [f32; 12] {
    // Hue rotation around the grey axis, Rodrigues form specialized to
    // (1,1,1)/sqrt(3).
    let theta = hue_deg.to_radians();
    let (s, c) = theta.sin_cos();
    let a = c + (1.0 - c) / 3.0;
    let b1 = (1.0 - c) / 3.0 - s / 3.0_f32.sqrt();
    let b2 = (1.0 - c) / 3.0 + s / 3.0_f32.sqrt();
    let hue = [[a, b1, b2], [b2, a, b1], [b1, b2, a]];

    // Saturation: lerp between luminance grey and identity.
    // Compose: out = contrast * (hue * sat * rgb - 0.5) + 0.5 + brightness.
    const LUMA: [f32; 3] = [0.299, 0.587, 0.114];
    let mut sat_m = [[0.0f32; 3]; 3];
    for (r, row) in sat_m.iter_mut().enumerate() {
        for (col, cell) in row.iter_mut().enumerate() {
            let ident = if r == col { 1.0 } else { 0.0 };
            *cell = LUMA[col] * (1.0 - saturation) + ident * saturation;
        }
    }
    let mut rot = [[0.0f32; 3]; 3];
    for r in 0..3 {
        for col in 0..3 {
            let mut acc = 0.0;
            for k in 0..3 {
                acc += hue[r][k] * sat_m[k][col];
            }
            rot[r][col] = acc * contrast;
        }
    }
    let offset = 0.5 - 0.5 * contrast + brightness;
    [
        rot[0][0], rot[0][1], rot[0][2], offset,
        rot[1][0], rot[1][1], rot[1][2], offset,
        rot[2][0], rot[2][1], rot[2][2], offset,
    ]
}

/// Apply a 3x4 affine color matrix to an RGB triple.
pub fn apply_color_matrix(m: &[f32; 12], rgb: [f32; 3]) -> [f32; 3] {
    let row = |r: usize| {
        m[r * 4] * rgb[0] + m[r * 4 + 1] * rgb[1] + m[r * 4 + 2] * rgb[2] + m[r * 4 + 3]
    };
    [row(0), row(1), row(2)]
}

/// Built-in evaluator for the procedural node kinds, so baking works without
/// a live host application. Hosts embed their own `HostEval` in production.
#[derive(Debug, Default)]
pub struct ProceduralEval;

impl HostEval for ProceduralEval {
    fn make_context(&self) -> Box<dyn EvalContext + '_> {
        Box::new(ProceduralContext::new())
    }
}

/// Scratch state for one worker: lazily built noise permutation table and a
/// decoded-bitmap cache. Both are why contexts must not be shared.
pub struct ProceduralContext {
    perm: Option<Box<[u8; 512]>>,
    bitmaps: HashMap<String, Option<Arc<Image>>>,
}

impl ProceduralContext {
    pub fn new() -> ProceduralContext {
        ProceduralContext {
            perm: None,
            bitmaps: HashMap::new(),
        }
    }

    fn perm_table(&mut self) -> &[u8; 512] {
        self.perm.get_or_insert_with(|| {
            let mut p: Vec<u8> = (0..=255).collect();
            // Deterministic LCG shuffle; per-context, so no shared state.
            let mut state = 0x2545_f491u32;
            for i in (1..256).rev() {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                let j = (state >> 16) as usize % (i + 1);
                p.swap(i, j);
            }
            let mut table = Box::new([0u8; 512]);
            for i in 0..512 {
                table[i] = p[i & 255];
            }
            table
        })
    }

    fn lattice(&mut self, x: i32, y: i32) -> f32 {
        let p = self.perm_table();
        let xi = (x & 255) as usize;
        let yi = (y & 255) as usize;
        f32::from(p[p[xi] as usize + yi]) / 255.0
    }

    fn value_noise(&mut self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let sx = fx * fx * (3.0 - 2.0 * fx);
        let sy = fy * fy * (3.0 - 2.0 * fy);
        let (xi, yi) = (x0 as i32, y0 as i32);
        let v00 = self.lattice(xi, yi);
        let v10 = self.lattice(xi + 1, yi);
        let v01 = self.lattice(xi, yi + 1);
        let v11 = self.lattice(xi + 1, yi + 1);
        let top = v00 + (v10 - v00) * sx;
        let bot = v01 + (v11 - v01) * sx;
        top + (bot - top) * sy
    }

    /// Multi-octave fractal noise in [0, 1].
    fn fbm(&mut self, x: f32, y: f32, octaves: u32) -> f32 {
        let mut amp = 0.5;
        let mut freq = 1.0;
        let mut sum = 0.0;
        let mut norm = 0.0;
        for _ in 0..octaves.max(1) {
            sum += amp * self.value_noise(x * freq, y * freq);
            norm += amp;
            amp *= 0.5;
            freq *= 2.0;
        }
        sum / norm
    }

    fn bitmap(&mut self, path: &str) -> Option<Arc<Image>> {
        self.bitmaps
            .entry(path.to_string())
            .or_insert_with(|| match Image::load(path) {
                Ok(img) => Some(Arc::new(img)),
                Err(err) => {
                    log::warn!("bitmap eval: {err:#}");
                    None
                }
            })
            .clone()
    }

    fn input_color(
        &mut self,
        node: &MaterialNode,
        map_slot: &str,
        color_slot: &str,
        default: [f32; 3],
        u: f32,
        v: f32,
    ) -> [f32; 3] {
        if let Some(sub) = node.sub_node(map_slot) {
            return self.eval_color(sub, u, v);
        }
        let c = node.color(color_slot, [default[0], default[1], default[2], 1.0]);
        [c[0], c[1], c[2]]
    }
}

impl Default for ProceduralContext {
    fn default() -> Self {
        Self::new()
    }
}

fn checker_cell(u: f32, v: f32) -> f32 {
    let iu = u.floor() as i64;
    let iv = v.floor() as i64;
    if (iu + iv).rem_euclid(2) == 0 { 0.0 } else { 1.0 }
}

fn lerp3(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

impl EvalContext for ProceduralContext {
    fn eval_color(&mut self, node: &MaterialNode, u: f32, v: f32) -> [f32; 3] {
        let (u, v) = node.uv.apply(u, v);
        match node.kind {
            NodeKind::Checker => {
                let size = node.float("size", 2.0).max(1e-6);
                let t = checker_cell(u * size, v * size);
                let c1 = self.input_color(node, "map1", "color1", [0.0; 3], u, v);
                let c2 = self.input_color(node, "map2", "color2", [1.0; 3], u, v);
                lerp3(c1, c2, t)
            }
            NodeKind::Noise => {
                let size = node.float("size", 1.0).max(1e-6);
                let levels = node.float("levels", 3.0).max(1.0) as u32;
                let low = node.float("low", 0.0);
                let high = node.float("high", 1.0);
                let raw = self.fbm(u * size, v * size, levels);
                // Threshold remap: everything below `low` is color1,
                // everything above `high` is color2.
                let span = (high - low).max(1e-6);
                let t = ((raw - low) / span).clamp(0.0, 1.0);
                let c1 = self.input_color(node, "map1", "color1", [0.0; 3], u, v);
                let c2 = self.input_color(node, "map2", "color2", [1.0; 3], u, v);
                lerp3(c1, c2, t)
            }
            NodeKind::Gradient => {
                let radial = node.int("type", 0) == 1;
                let t = if radial {
                    let du = u - 0.5;
                    let dv = v - 0.5;
                    (2.0 * (du * du + dv * dv).sqrt()).clamp(0.0, 1.0)
                } else {
                    v.clamp(0.0, 1.0)
                };
                let c1 = self.input_color(node, "map1", "color1", [0.0; 3], u, v);
                let c2 = self.input_color(node, "map2", "color2", [0.5; 3], u, v);
                let c3 = self.input_color(node, "map3", "color3", [1.0; 3], u, v);
                let mid = node.float("position", 0.5).clamp(0.01, 0.99);
                if t < mid {
                    lerp3(c1, c2, t / mid)
                } else {
                    lerp3(c2, c3, (t - mid) / (1.0 - mid))
                }
            }
            NodeKind::Mix => {
                let amount = node.float("amount", 0.5).clamp(0.0, 1.0);
                let c1 = self.input_color(node, "map1", "color1", [0.0; 3], u, v);
                let c2 = self.input_color(node, "map2", "color2", [1.0; 3], u, v);
                lerp3(c1, c2, amount)
            }
            NodeKind::Composite => {
                let count = node.int("layers", 0).max(0) as usize;
                let mut acc = [0.0f32; 3];
                for i in 0..count {
                    let Some(layer) = node.sub_node(&format!("layer{i}")) else {
                        continue;
                    };
                    let opacity = node.float(&format!("opacity{i}"), 1.0).clamp(0.0, 1.0);
                    if opacity <= 0.0 {
                        continue;
                    }
                    let mode = BlendMode::from_index(node.int(&format!("mode{i}"), 0));
                    let top = self.eval_color(layer, u, v);
                    let blended = if i == 0 { top } else { mode.apply(acc, top) };
                    acc = lerp3(acc, blended, opacity);
                }
                acc
            }
            NodeKind::ColorCorrection => {
                let m = color_correction_matrix(
                    node.float("hue", 0.0),
                    node.float("saturation", 1.0),
                    node.float("contrast", 1.0),
                    node.float("brightness", 0.0),
                );
                let src = self.input_color(node, "map", "color", [0.5; 3], u, v);
                apply_color_matrix(&m, src)
            }
            NodeKind::RgbMultiply => {
                let a = self.input_color(node, "map1", "color1", [1.0; 3], u, v);
                let b = self.input_color(node, "map2", "color2", [1.0; 3], u, v);
                [a[0] * b[0], a[1] * b[1], a[2] * b[2]]
            }
            NodeKind::RgbTint => {
                let src = self.input_color(node, "map", "color", [1.0; 3], u, v);
                let r = node.vector("red", [1.0, 0.0, 0.0]);
                let g = node.vector("green", [0.0, 1.0, 0.0]);
                let b = node.vector("blue", [0.0, 0.0, 1.0]);
                [
                    src[0] * r[0] + src[1] * g[0] + src[2] * b[0],
                    src[0] * r[1] + src[1] * g[1] + src[2] * b[1],
                    src[0] * r[2] + src[1] * g[2] + src[2] * b[2],
                ]
            }
            NodeKind::Mask => {
                let src = self.input_color(node, "map", "color", [1.0; 3], u, v);
                let mask = self.input_color(node, "mask", "mask_color", [1.0; 3], u, v);
                [src[0] * mask[0], src[1] * mask[1], src[2] * mask[2]]
            }
            NodeKind::Falloff => {
                // No geometry available on CPU; mid-blend approximation.
                let c1 = self.input_color(node, "map1", "color1", [0.0; 3], u, v);
                let c2 = self.input_color(node, "map2", "color2", [1.0; 3], u, v);
                lerp3(c1, c2, 0.5)
            }
            NodeKind::Output => {
                let amount = node.float("amount", 1.0);
                let invert = node.boolean("invert", false);
                let mut c = self.input_color(node, "map", "color", [0.0; 3], u, v);
                if invert {
                    c = [1.0 - c[0], 1.0 - c[1], 1.0 - c[2]];
                }
                [c[0] * amount, c[1] * amount, c[2] * amount]
            }
            NodeKind::BitmapTexture => {
                let Some(path) = node.text("file") else {
                    return [0.0; 3];
                };
                match self.bitmap(path) {
                    Some(img) if !img.is_empty() => {
                        let x = (u.rem_euclid(1.0) * img.width as f32) as u32 % img.width;
                        let y = (v.rem_euclid(1.0) * img.height as f32) as u32 % img.height;
                        img.pixel(x, y)
                    }
                    _ => [0.0; 3],
                }
            }
            NodeKind::Diffuse | NodeKind::NormalBump => {
                self.input_color(node, "map", "color", [0.5; 3], u, v)
            }
            NodeKind::Unknown => {
                let c = node.color("color", [0.0, 0.0, 0.0, 1.0]);
                [c[0], c[1], c[2]]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeBuilder;

    fn ctx() -> ProceduralContext {
        ProceduralContext::new()
    }

    #[test]
    fn checker_alternates_cells() {
        let node = NodeBuilder::new(NodeKind::Checker)
            .float("size", 2.0)
            .color("color1", [0.0, 0.0, 0.0, 1.0])
            .color("color2", [1.0, 1.0, 1.0, 1.0])
            .build();
        let mut c = ctx();
        let a = c.eval_color(&node, 0.1, 0.1);
        let b = c.eval_color(&node, 0.6, 0.1);
        assert_ne!(a, b);
        assert_eq!(a, c.eval_color(&node, 0.1, 0.1));
    }

    #[test]
    fn noise_is_deterministic_across_contexts() {
        let node = NodeBuilder::new(NodeKind::Noise)
            .float("size", 4.0)
            .float("levels", 3.0)
            .build();
        let a = ctx().eval_color(&node, 0.3, 0.7);
        let b = ctx().eval_color(&node, 0.3, 0.7);
        assert_eq!(a, b);
    }

    #[test]
    fn blend_modes_match_formulas() {
        let b = [1.0, 0.0, 0.0];
        let t = [0.5, 0.5, 0.5];
        assert_eq!(BlendMode::Multiply.apply(b, t), [0.5, 0.0, 0.0]);
        assert_eq!(BlendMode::Add.apply(b, t), [1.5, 0.5, 0.5]);
        assert_eq!(BlendMode::Average.apply(b, t), [0.75, 0.25, 0.25]);
        assert_eq!(BlendMode::Normal.apply(b, t), t);
        let s = BlendMode::Screen.apply(b, t);
        assert!((s[0] - 1.0).abs() < 1e-6 && (s[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn color_matrix_identity_is_noop() {
        let m = color_correction_matrix(0.0, 1.0, 1.0, 0.0);
        let rgb = [0.2, 0.4, 0.8];
        let out = apply_color_matrix(&m, rgb);
        for c in 0..3 {
            assert!((out[c] - rgb[c]).abs() < 1e-4, "{out:?} vs {rgb:?}");
        }
    }

    #[test]
    fn color_matrix_brightness_shifts_all_channels() {
        let m = color_correction_matrix(0.0, 1.0, 1.0, 0.25);
        let out = apply_color_matrix(&m, [0.0, 0.5, 1.0]);
        assert!((out[0] - 0.25).abs() < 1e-4);
        assert!((out[1] - 0.75).abs() < 1e-4);
    }

    #[test]
    fn output_invert_flips_color() {
        let node = NodeBuilder::new(NodeKind::Output)
            .color("color", [1.0, 0.0, 0.25, 1.0])
            .param("invert", crate::graph::ParamValue::Bool(true))
            .build();
        let out = ctx().eval_color(&node, 0.0, 0.0);
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!((out[1] - 1.0).abs() < 1e-6);
        assert!((out[2] - 0.75).abs() < 1e-6);
    }
}
