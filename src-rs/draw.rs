//! Raster primitives for the trial canvas.

use image::{Rgba, RgbaImage};

pub fn parse_color(hex: &str, fallback: [u8; 4]) -> Rgba<u8> {
    parse_color_opt(hex).unwrap_or(Rgba(fallback))
}

pub fn parse_color_opt(raw: &str) -> Option<Rgba<u8>> {
    let hex = raw.trim().strip_prefix('#')?;
    let channel = |range: std::ops::Range<usize>| {
        hex.get(range)
            .and_then(|digits| u8::from_str_radix(digits, 16).ok())
    };
    match hex.len() {
        6 => Some(Rgba([channel(0..2)?, channel(2..4)?, channel(4..6)?, 255])),
        8 => Some(Rgba([
            channel(0..2)?,
            channel(2..4)?,
            channel(4..6)?,
            channel(6..8)?,
        ])),
        _ => None,
    }
}

fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let a = f64::from(src[3]) / 255.0;
    if a <= 0.0 {
        return dst;
    }
    let inv = 1.0 - a;
    let mix = |d: u8, s: u8| (f64::from(d) * inv + f64::from(s) * a).round().clamp(0.0, 255.0) as u8;
    let out_a = (f64::from(dst[3]) + f64::from(src[3]) * inv)
        .round()
        .clamp(0.0, 255.0) as u8;
    Rgba([mix(dst[0], src[0]), mix(dst[1], src[1]), mix(dst[2], src[2]), out_a.max(src[3])])
}

fn plot(img: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>) {
    if x < 0 || y < 0 || x >= i64::from(img.width()) || y >= i64::from(img.height()) {
        return;
    }
    let dst = *img.get_pixel(x as u32, y as u32);
    img.put_pixel(x as u32, y as u32, blend_pixel(dst, color));
}

const MAX_CIRCLE_STEPS: f64 = 1e6;

/// Clips `a -> b` to the rectangle `min..=max` (Liang-Barsky); `None` when nothing is left.
fn clip_segment(a: (f64, f64), b: (f64, f64), min: (f64, f64), max: (f64, f64)) -> Option<((f64, f64), (f64, f64))> {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    if !(dx.is_finite() && dy.is_finite()) {
        return None;
    }
    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for (p, q) in [(-dx, a.0 - min.0), (dx, max.0 - a.0), (-dy, a.1 - min.1), (dy, max.1 - a.1)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }
    // huge inputs lose precision in the interpolation; keep the result inside the band
    let at = |t: f64| {
        (
            (a.0 + t * dx).clamp(min.0, max.0),
            (a.1 + t * dy).clamp(min.1, max.1),
        )
    };
    Some((at(t0), at(t1)))
}

/// One pixel wide segment; endpoints are rounded to the pixel grid.
///
/// The segment is clipped to a one pixel band around the image first, so far
/// away or non-finite endpoints never drive the stepping loop.
pub fn draw_line(img: &mut RgbaImage, x1: f64, y1: f64, x2: f64, y2: f64, color: Rgba<u8>) {
    let max = (f64::from(img.width()), f64::from(img.height()));
    let Some((start, end)) = clip_segment((x1, y1), (x2, y2), (-1.0, -1.0), max) else {
        return;
    };
    let (mut x, mut y) = (start.0.round() as i64, start.1.round() as i64);
    let (x_end, y_end) = (end.0.round() as i64, end.1.round() as i64);
    let dx = (x_end - x).abs();
    let dy = -(y_end - y).abs();
    let sx = if x < x_end { 1 } else { -1 };
    let sy = if y < y_end { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        plot(img, x, y, color);
        if x == x_end && y == y_end {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// Open circle of the given radius, one pixel wide. Circles that miss the image are skipped.
pub fn draw_circle(img: &mut RgbaImage, cx: f64, cy: f64, radius: f64, color: Rgba<u8>) {
    if !(cx.is_finite() && cy.is_finite() && radius.is_finite() && radius > 0.0) {
        return;
    }
    let (width, height) = (f64::from(img.width()), f64::from(img.height()));
    if cx + radius < -1.0 || cy + radius < -1.0 || cx - radius > width || cy - radius > height {
        return;
    }
    let steps = ((std::f64::consts::TAU * radius).ceil().min(MAX_CIRCLE_STEPS) as usize * 2).max(8);
    let mut last: Option<(i64, i64)> = None;
    for step in 0..steps {
        let t = step as f64 / steps as f64 * std::f64::consts::TAU;
        let x = (cx + radius * t.cos()).round() as i64;
        let y = (cy + radius * t.sin()).round() as i64;
        if last == Some((x, y)) {
            continue;
        }
        plot(img, x, y, color);
        last = Some((x, y));
    }
}

/// Copies `src` onto `dst` with its top left corner at `(x, y)`, clipped to `dst`.
pub fn blit(dst: &mut RgbaImage, src: &RgbaImage, x: u32, y: u32) {
    for (sx, sy, pixel) in src.enumerate_pixels() {
        let tx = x + sx;
        let ty = y + sy;
        if tx < dst.width() && ty < dst.height() {
            dst.put_pixel(tx, ty, *pixel);
        }
    }
}
