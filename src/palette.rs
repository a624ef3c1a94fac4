//! Display colours for demands.
//!
//! Colours are purely cosmetic: a demand's colour depends only on its
//! position in the demand list. The fifty hues are spread evenly around
//! the HSL wheel and then visited with a stride of five, so neighbouring
//! demands get hues roughly 36 degrees apart.

use std::sync::OnceLock;

use crate::model::Demand;

pub const PALETTE_SIZE: usize = 50;

const SATURATION: f64 = 75.0;
const LIGHTNESS: f64 = 55.0;
const STRIDE: usize = 5;
/// Residue class the stride walk starts from.
const FIRST_OFFSET: usize = 4;

static PALETTE: OnceLock<Vec<String>> = OnceLock::new();

/// The reordered palette, computed once.
pub fn palette() -> &'static [String] {
    PALETTE.get_or_init(build_palette)
}

/// Colour for the demand at `index` in the list (wraps around).
pub fn color_for_index(index: usize) -> &'static str {
    let colors = palette();
    colors
        .get(index % colors.len())
        .map(String::as_str)
        .unwrap_or("#000000")
}

/// Recomputes every demand's colour from its list position.
pub fn recolor(demands: &mut [Demand]) {
    for (index, demand) in demands.iter_mut().enumerate() {
        demand.color = Some(color_for_index(index).to_string());
    }
}

fn build_palette() -> Vec<String> {
    let base: Vec<String> = (0..PALETTE_SIZE)
        .map(|i| {
            let hue = 360.0 * i as f64 / PALETTE_SIZE as f64;
            hsl_to_hex(hue, SATURATION, LIGHTNESS)
        })
        .collect();

    // 4, 9, .., 49, then 5, 10, .., 45, .. up to residue 8, then the leftovers 0..=3.
    let mut order: Vec<usize> = (FIRST_OFFSET..FIRST_OFFSET + STRIDE)
        .flat_map(|offset| (offset..PALETTE_SIZE).step_by(STRIDE))
        .collect();
    order.extend(0..FIRST_OFFSET);

    order.into_iter().filter_map(|i| base.get(i).cloned()).collect()
}

fn hsl_to_hex(hue: f64, saturation: f64, lightness: f64) -> String {
    let s = saturation / 100.0;
    let l = lightness / 100.0;

    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let x = c * (1.0 - ((hue / 60.0) % 2.0 - 1.0).abs());
    let m = l - c / 2.0;

    let (r, g, b) = match hue {
        h if h < 60.0 => (c, x, 0.0),
        h if h < 120.0 => (x, c, 0.0),
        h if h < 180.0 => (0.0, c, x),
        h if h < 240.0 => (0.0, x, c),
        h if h < 300.0 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    let channel = |value: f64| ((value + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    format!("#{:02X}{:02X}{:02X}", channel(r), channel(g), channel(b))
}
