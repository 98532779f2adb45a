//! Height-field to tangent-space normal map conversion.
//!
//! Bump maps store a single height channel; normal maps store an encoded
//! direction per texel. The converter decides which one it is looking at
//! with a sampled-row grayscale heuristic, differentiates heights with a
//! Sobel kernel, and can merge an independent secondary bump into a primary
//! normal map with a reoriented blend.

use crate::target::Image;

/// Channel tolerance for "red equals green equals blue", in linear units.
const GRAY_EPSILON: f32 = 2.0 / 255.0;

/// Number of evenly spaced rows the grayscale heuristic inspects. Sampling
/// rows instead of the full image keeps the check cheap on large bitmaps.
const GRAY_SAMPLE_ROWS: u32 = 8;

/// True if the image looks like a single-channel height field rather than
/// an RGB normal map.
pub fn is_grayscale(img: &Image) -> bool {
    if img.is_empty() {
        return true;
    }
    if img.components == 1 {
        return true;
    }
    let step = (img.height / GRAY_SAMPLE_ROWS).max(1);
    let mut y = 0;
    while y < img.height {
        for x in 0..img.width {
            let [r, g, b] = img.pixel(x, y);
            if (r - g).abs() > GRAY_EPSILON || (g - b).abs() > GRAY_EPSILON {
                return false;
            }
        }
        y += step;
    }
    true
}

/// Toroidal height lookup: sampling wraps at the borders so the gradient
/// kernel is well-defined everywhere.
fn height_at(img: &Image, x: i64, y: i64) -> f32 {
    let x = x.rem_euclid(i64::from(img.width)) as u32;
    let y = y.rem_euclid(i64::from(img.height)) as u32;
    img.pixel(x, y)[0]
}

/// Convert a height field into an encoded tangent-space normal map.
///
/// For each pixel a Sobel gradient (Gx, Gy) is taken over the 3x3
/// neighborhood, the vector `(Gx, Gy, 1 / strength)` is remapped from
/// [-1, 1] to [0, 1] and clamped. A flat input therefore maps every texel to
/// `(0.5, 0.5, 0.5 + 0.5 / strength)` clamped, regardless of strength.
pub fn bump_to_normal(img: &Image, strength: f32) -> Image {
    if img.is_empty() {
        return Image::empty();
    }
    let strength = if strength == 0.0 { 1.0 } else { strength };
    let z = 1.0 / strength;

    let (w, h) = (img.width, img.height);
    let mut out = Vec::with_capacity((w * h * 3) as usize);
    for y in 0..i64::from(h) {
        for x in 0..i64::from(w) {
            let tl = height_at(img, x - 1, y - 1);
            let l = height_at(img, x - 1, y);
            let bl = height_at(img, x - 1, y + 1);
            let tr = height_at(img, x + 1, y - 1);
            let r = height_at(img, x + 1, y);
            let br = height_at(img, x + 1, y + 1);
            let t = height_at(img, x, y - 1);
            let b = height_at(img, x, y + 1);

            let gx = (tl + 2.0 * l + bl) - (tr + 2.0 * r + br);
            let gy = (tl + 2.0 * t + tr) - (bl + 2.0 * b + br);

            for v in [gx, gy, z] {
                let encoded = (v * 0.5 + 0.5).clamp(0.0, 1.0);
                out.push((encoded * 255.0).round() as u8);
            }
        }
    }
    Image::rgb8(w, h, out)
}

fn decode(img: &Image, x: u32, y: u32) -> [f32; 3] {
    let p = img.pixel(x, y);
    [p[0] * 2.0 - 1.0, p[1] * 2.0 - 1.0, p[2] * 2.0 - 1.0]
}

fn encode_into(out: &mut Vec<u8>, n: [f32; 3]) {
    for v in n {
        out.push(((v * 0.5 + 0.5).clamp(0.0, 1.0) * 255.0).round() as u8);
    }
}

/// Merge a secondary bump source into a primary normal map.
///
/// Both inputs are decoded to tangent vectors; the detail vector is
/// reoriented against the base (reflected through the half-vector frame),
/// re-normalized and re-encoded. The detail image wraps toroidally if its
/// dimensions differ from the base.
pub fn combine_normals(base: &Image, detail: &Image) -> Image {
    if base.is_empty() {
        return detail.clone();
    }
    if detail.is_empty() {
        return base.clone();
    }

    let (w, h) = (base.width, base.height);
    let mut out = Vec::with_capacity((w * h * 3) as usize);
    for y in 0..h {
        for x in 0..w {
            let nb = decode(base, x, y);
            let nd = decode(detail, x % detail.width, y % detail.height);

            // Reoriented normal blend: t carries the base up, u flips the
            // detail so the reflection lands in the base's hemisphere.
            let t = [nb[0], nb[1], nb[2] + 1.0];
            let u = [-nd[0], -nd[1], nd[2]];
            let dot = t[0] * u[0] + t[1] * u[1] + t[2] * u[2];
            let tz = if t[2].abs() < 1e-6 { 1e-6 } else { t[2] };
            let mut r = [
                t[0] * (dot / tz) - u[0],
                t[1] * (dot / tz) - u[1],
                t[2] * (dot / tz) - u[2],
            ];
            let len = (r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt();
            if len > 1e-6 {
                r = [r[0] / len, r[1] / len, r[2] / len];
            } else {
                r = [0.0, 0.0, 1.0];
            }
            encode_into(&mut out, r);
        }
    }
    Image::rgb8(w, h, out)
}
