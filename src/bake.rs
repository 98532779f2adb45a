//! Rasterizing ("baking") a node's evaluator into a pixel buffer.
//!
//! Rows are fanned out to a scoped worker pool over a channel; every worker
//! builds its own evaluation context, which is the engine's one hard
//! concurrency rule (contexts carry mutable scratch state). Workers write
//! nothing shared: finished rows come back over a second channel and are
//! assembled on the calling thread, which is also the only place the cache
//! is ever touched.

use crossbeam_channel::unbounded;

use crate::cache::TranslationFlags;
use crate::eval::HostEval;
use crate::graph::{NodeKind, NodeRef};
use crate::target::Image;

/// Rasterize `node` over a `width` x `height` UV grid.
///
/// UV for pixel `(x, y)` is `(x / width, 1 - y / height)`; V is flipped so
/// row zero is the top of the texture, matching the host's convention.
/// Channels are clamped to [0, 1] unless `HDR_OUTPUT` is set, in which case
/// the output is 32-bit float.
///
/// Failure mode: if the pixel buffer cannot be allocated the bake aborts and
/// returns an empty image; the notice is logged once here, not per pixel.
pub fn bake(
    node: &NodeRef,
    host: &dyn HostEval,
    width: u32,
    height: u32,
    flags: TranslationFlags,
) -> Image {
    if width == 0 || height == 0 {
        return Image::empty();
    }

    // Direct bitmap with identity placement: reuse the decoded pixels
    // instead of re-sampling them through the evaluator.
    if let Some(img) = bitmap_fast_path(node) {
        return img;
    }

    let hdr = flags.contains(TranslationFlags::HDR_OUTPUT);
    let len = (width as usize) * (height as usize) * 3;

    let mut buf: Vec<f32> = Vec::new();
    if buf.try_reserve_exact(len).is_err() {
        log::error!(
            "bake of '{}' aborted: cannot allocate {}x{} pixel buffer",
            node.name,
            width,
            height
        );
        return Image::empty();
    }
    buf.resize(len, 0.0);

    let workers = std::thread::available_parallelism()
        .map_or(1, |n| n.get())
        .min(height as usize);

    let (row_tx, row_rx) = unbounded::<u32>();
    let (out_tx, out_rx) = unbounded::<(u32, Vec<f32>)>();
    for y in 0..height {
        // Unbounded channel; send cannot fail while rx is alive.
        let _ = row_tx.send(y);
    }
    drop(row_tx);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let row_rx = row_rx.clone();
            let out_tx = out_tx.clone();
            scope.spawn(move || {
                // One context per worker; see module docs.
                let mut ctx = host.make_context();
                while let Ok(y) = row_rx.recv() {
                    let mut row = Vec::with_capacity(width as usize * 3);
                    let v = 1.0 - y as f32 / height as f32;
                    for x in 0..width {
                        let u = x as f32 / width as f32;
                        let mut c = ctx.eval_color(node, u, v);
                        if !hdr {
                            c = [
                                c[0].clamp(0.0, 1.0),
                                c[1].clamp(0.0, 1.0),
                                c[2].clamp(0.0, 1.0),
                            ];
                        }
                        row.extend_from_slice(&c);
                    }
                    if out_tx.send((y, row)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(out_tx);

        for _ in 0..height {
            let Ok((y, row)) = out_rx.recv() else { break };
            let start = y as usize * width as usize * 3;
            buf[start..start + row.len()].copy_from_slice(&row);
        }
    });

    if hdr {
        Image::rgb_f32(width, height, buf)
    } else {
        let bytes = buf
            .iter()
            .map(|&v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
            .collect();
        Image::rgb8(width, height, bytes)
    }
}

/// A direct bitmap reference with an identity UV transform needs no baking;
/// the decoded file is the result.
fn bitmap_fast_path(node: &NodeRef) -> Option<Image> {
    if node.kind != NodeKind::BitmapTexture || !node.uv.is_identity() {
        return None;
    }
    let path = node.text("file")?;
    match Image::load(path) {
        Ok(img) => Some(img),
        Err(err) => {
            log::warn!("bitmap fast path failed, falling back to bake: {err:#}");
            None
        }
    }
}
