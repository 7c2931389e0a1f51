use image::Rgb;
use palette::{Hsl, IntoColor, Srgb};

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

/// Generates `n` visually distinct colours using evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<Rgb<u8>> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            let hsl = Hsl::new(hue, 0.75, 0.45);
            let rgb: Srgb = hsl.into_color();
            Rgb([
                (rgb.red * 255.0).round() as u8,
                (rgb.green * 255.0).round() as u8,
                (rgb.blue * 255.0).round() as u8,
            ])
        })
        .collect()
}

/// Blend `color` towards white; `amount` 0 keeps the colour, 1 gives white.
pub fn tint(color: Rgb<u8>, amount: f32) -> Rgb<u8> {
    let amount = amount.clamp(0.0, 1.0);
    Rgb(color.0.map(|c| (c as f32 + (255.0 - c as f32) * amount).round() as u8))
}
