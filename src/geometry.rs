#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Self) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Axis-aligned rectangle in document user units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Pixel dimensions of this box at `scale`, rounded up so content is never cropped.
    pub fn pixel_size(&self, scale: f32) -> (f64, f64) {
        (
            (f64::from(self.width) * f64::from(scale)).ceil(),
            (f64::from(self.height) * f64::from(scale)).ceil(),
        )
    }

    pub fn view_box(&self) -> String {
        format!(
            "{} {} {} {}",
            fmt_num(self.x),
            fmt_num(self.y),
            fmt_num(self.width),
            fmt_num(self.height)
        )
    }

    pub fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        (self.x - other.x).abs() <= epsilon
            && (self.y - other.y).abs() <= epsilon
            && (self.width - other.width).abs() <= epsilon
            && (self.height - other.height).abs() <= epsilon
    }
}

/// Formats a coordinate with at most three decimals and no trailing zeros.
pub fn fmt_num(value: f32) -> String {
    let mut out = format!("{value:.3}");
    if out.contains('.') {
        while out.ends_with('0') {
            out.pop();
        }
        if out.ends_with('.') {
            out.pop();
        }
    }
    if out == "-0" {
        out = "0".to_string();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_numbers_compactly() {
        assert_eq!(fmt_num(12.0), "12");
        assert_eq!(fmt_num(12.5), "12.5");
        assert_eq!(fmt_num(0.12345), "0.123");
        assert_eq!(fmt_num(-0.0001), "0");
    }

    #[test]
    fn pixel_size_rounds_up() {
        let bbox = BoundingBox::new(0.0, 0.0, 100.2, 50.0);
        assert_eq!(bbox.pixel_size(2.0), (201.0, 100.0));
        assert_eq!(bbox.view_box(), "0 0 100.2 50");
    }

    #[test]
    fn zero_area_is_empty() {
        assert!(BoundingBox::new(5.0, 5.0, 0.0, 10.0).is_empty());
        assert!(!BoundingBox::new(5.0, 5.0, 1.0, 10.0).is_empty());
    }
}
