use std::io::Cursor;

use image::{ImageFormat, ImageResult, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::color::{generate_palette, tint};
use crate::pipeline::condition::ConditionedSpectrum;
use crate::pipeline::validate::RawSpectrum;

/// Size and density of the raw-vs-processed overlay.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub width: u32,
    pub height: u32,
    /// Traces longer than this are thinned by even index spacing.
    pub max_points: usize,
}

impl Default for PlotConfig {
    fn default() -> Self {
        PlotConfig {
            width: 1050,
            height: 600,
            max_points: 4000,
        }
    }
}

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);
const AXIS: Rgb<u8> = Rgb([90, 90, 90]);
const MARGIN: u32 = 40;
const SWATCH: u32 = 14;

// ---------------------------------------------------------------------------
// Overlay rendering
// ---------------------------------------------------------------------------

/// Render the raw trace (min-max scaled) and the processed trace on a shared axis as PNG.
///
/// Stateless: the output depends only on the two spectra and `config`.
pub fn render_overlay(
    raw: &RawSpectrum,
    conditioned: &ConditionedSpectrum,
    config: &PlotConfig,
) -> ImageResult<Vec<u8>> {
    let width = config.width.max(2 * MARGIN + 2);
    let height = config.height.max(2 * MARGIN + 2);
    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);
    let frame = Frame::new(raw.wavenumbers(), width, height);

    draw_grid(&mut img, &frame);

    let palette = generate_palette(2);
    let (raw_color, processed_color) = (tint(palette[1], 0.35), palette[0]);

    let raw_scaled = minmax_scale(raw.intensities());
    draw_trace(
        &mut img,
        &frame,
        &downsample(raw.wavenumbers(), &raw_scaled, config.max_points),
        raw_color,
    );
    draw_trace(
        &mut img,
        &frame,
        &downsample(
            conditioned.wavenumbers(),
            conditioned.intensities(),
            config.max_points,
        ),
        processed_color,
    );
    draw_legend(&mut img, &[raw_color, processed_color]);

    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, ImageFormat::Png)?;
    Ok(bytes.into_inner())
}

/// Scale values to [0, 1]; a flat trace maps to zeros.
pub fn minmax_scale(values: &[f64]) -> Vec<f64> {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if !range.is_finite() || range.abs() < f64::EPSILON {
        vec![0.0; values.len()]
    } else {
        values.iter().map(|&v| (v - min) / range).collect()
    }
}

/// Keep at most `max_points` (x, y) pairs, evenly spaced by index, always including both ends.
pub fn downsample(xs: &[f64], ys: &[f64], max_points: usize) -> Vec<(f64, f64)> {
    let n = xs.len().min(ys.len());
    if n <= max_points || max_points < 2 {
        return xs.iter().copied().zip(ys.iter().copied()).take(n).collect();
    }
    let step = (n - 1) as f64 / (max_points - 1) as f64;
    (0..max_points)
        .map(|i| {
            let idx = ((i as f64 * step).round() as usize).min(n - 1);
            (xs[idx], ys[idx])
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Drawing primitives
// ---------------------------------------------------------------------------

/// Maps data coordinates (wavenumber, [0, 1] intensity) to pixels.
struct Frame {
    x_min: f64,
    x_max: f64,
    left: f64,
    right: f64,
    top: f64,
    bottom: f64,
}

impl Frame {
    fn new(wavenumbers: &[f64], width: u32, height: u32) -> Self {
        let x_min = wavenumbers.first().copied().unwrap_or(0.0);
        let mut x_max = wavenumbers.last().copied().unwrap_or(1.0);
        if x_max <= x_min {
            x_max = x_min + 1.0;
        }
        Frame {
            x_min,
            x_max,
            left: MARGIN as f64,
            right: (width - MARGIN) as f64,
            top: MARGIN as f64,
            bottom: (height - MARGIN) as f64,
        }
    }

    fn to_pixel(&self, x: f64, y: f64) -> (i64, i64) {
        let px = self.left + (x - self.x_min) / (self.x_max - self.x_min) * (self.right - self.left);
        // 5 % headroom above the maximum
        let py = self.bottom - y / 1.05 * (self.bottom - self.top);
        (px.round() as i64, py.round() as i64)
    }
}

fn put(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_line(img: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
    let (mut x0, mut y0) = from;
    let (x1, y1) = to;
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put(img, x0, y0, color);
        put(img, x0, y0 + 1, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_grid(img: &mut RgbImage, frame: &Frame) {
    let (left, right) = (frame.left as i64, frame.right as i64);
    let (top, bottom) = (frame.top as i64, frame.bottom as i64);
    for i in 0..=10 {
        let x = left + (right - left) * i / 10;
        for y in top..=bottom {
            put(img, x, y, GRID);
        }
    }
    for i in 0..=5 {
        let y = bottom - (bottom - top) * i / 5;
        for x in left..=right {
            put(img, x, y, GRID);
        }
    }
    for x in left..=right {
        put(img, x, bottom, AXIS);
    }
    for y in top..=bottom {
        put(img, left, y, AXIS);
    }
}

fn draw_trace(img: &mut RgbImage, frame: &Frame, points: &[(f64, f64)], color: Rgb<u8>) {
    let pixels: Vec<(i64, i64)> = points.iter().map(|&(x, y)| frame.to_pixel(x, y)).collect();
    for pair in pixels.windows(2) {
        draw_line(img, pair[0], pair[1], color);
    }
}

// One filled square per trace in the top-right corner: raw first, processed second.
fn draw_legend(img: &mut RgbImage, colors: &[Rgb<u8>]) {
    let right = img.width().saturating_sub(MARGIN + SWATCH);
    for (i, &color) in colors.iter().enumerate() {
        let y0 = MARGIN / 2 + i as u32 * (SWATCH + 6);
        for dy in 0..SWATCH {
            for dx in 0..SWATCH {
                put(img, (right + dx) as i64, (y0 + dy) as i64, color);
            }
        }
    }
}
