//! CSS color strings as raster fill colors.

use std::str::FromStr;

use color::{DynamicColor, Srgb};
use resvg::tiny_skia;

/// A parsed CSS color (`#0f172a`, `rgb(…)`, `white`, …).
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Color {
    color: DynamicColor,
}

impl Color {
    pub fn new(color_str: &str) -> Result<Self, String> {
        match DynamicColor::from_str(color_str.trim()) {
            Ok(color) => Ok(Self { color }),
            Err(err) => Err(format!("invalid color `{color_str}`: {err}")),
        }
    }

    pub fn white() -> Self {
        Self::new("white").expect("'white' is a valid CSS color")
    }

    pub fn alpha(&self) -> f32 {
        self.color.components[3]
    }

    pub fn to_skia(self) -> tiny_skia::Color {
        let rgba = self.color.to_alpha_color::<Srgb>().to_rgba8();
        tiny_skia::Color::from_rgba8(rgba.r, rgba.g, rgba.b, rgba.a)
    }
}
