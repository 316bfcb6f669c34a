//! Log-shaped tone curve.
//!
//! Remaps each color channel with
//! `out = round(255 * log10(1 + k*v) / log10(1 + k))`, `v = channel / 255`,
//! lifting shadows and compressing highlights. Alpha is never touched.

use crate::buffer::PixelBuffer;
use std::sync::OnceLock;

/// Curve strength. Fixed; there is no configuration surface.
pub const K: f64 = 9.0;

static LUT: OnceLock<[u8; 256]> = OnceLock::new();

/// Map a normalized channel value in [0, 1] through the curve.
pub fn map_unit(v: f64) -> u8 {
    let denom = (1.0 + K).log10();
    let out = 255.0 * (1.0 + K * v).log10() / denom;
    out.round().clamp(0.0, 255.0) as u8
}

fn lut() -> &'static [u8; 256] {
    LUT.get_or_init(|| {
        let mut table = [0u8; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            *slot = map_unit(i as f64 / 255.0);
        }
        table
    })
}

/// Curve value for a single 8-bit channel.
pub fn curve(v: u8) -> u8 {
    lut()[v as usize]
}

/// Apply the curve in place to R, G and B of every texel.
pub fn apply(buffer: &mut PixelBuffer) {
    let table = lut();
    for px in buffer.pixels_mut() {
        px[0] = table[px[0] as usize];
        px[1] = table[px[1] as usize];
        px[2] = table[px[2] as usize];
    }
    tracing::debug!(
        width = buffer.width(),
        height = buffer.height(),
        "tone curve applied"
    );
}
