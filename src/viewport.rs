//! Pan/zoom state for the diagram preview.
//!
//! Raw pointer, pinch, wheel and zoom-field input is folded into a single
//! [`ViewportState`]. Gesture ownership is tracked by the [`Gesture`] state
//! machine: `Idle → Dragging` and `Idle → Pinching`, both returning to `Idle`.
//! A pinch always preempts a drag. Every handler is synchronous and total.

use crate::geometry::Point;

pub const MIN_SCALE: f32 = 0.1;
pub const MAX_SCALE: f32 = 5.0;
pub const MIN_ZOOM_PERCENT: i64 = 10;
pub const MAX_ZOOM_PERCENT: i64 = 500;
/// Scale change per modifier+wheel notch.
pub const WHEEL_ZOOM_STEP: f32 = 0.2;
/// Scale change per zoom button press.
pub const BUTTON_ZOOM_STEP: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tool {
    #[default]
    Pan,
    None,
}

/// Snapshot of the viewport as seen by the preview.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportState {
    pub scale: f32,
    pub pan: Point,
    pub active_tool: Tool,
    pub dragging: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Gesture {
    #[default]
    Idle,
    Dragging,
    Pinching {
        initial_distance: f32,
        start_scale: f32,
    },
}

pub type PointerId = u64;

#[derive(Debug, Clone, Copy)]
struct ActivePointer {
    id: PointerId,
    position: Point,
}

#[derive(Debug, Clone)]
pub struct ViewportController {
    scale: f32,
    pan: Point,
    tool: Tool,
    gesture: Gesture,
    pointers: Vec<ActivePointer>,
    /// Set once a pinch ends while a pointer is still down; cleared when all
    /// pointers are lifted.
    pinch_tail: bool,
}

impl Default for ViewportController {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewportController {
    pub fn new() -> Self {
        Self {
            scale: 1.0,
            pan: Point::ZERO,
            tool: Tool::Pan,
            gesture: Gesture::Idle,
            pointers: Vec::with_capacity(2),
            pinch_tail: false,
        }
    }

    pub fn state(&self) -> ViewportState {
        ViewportState {
            scale: self.scale,
            pan: self.pan,
            active_tool: self.tool,
            dragging: self.is_dragging(),
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn pan(&self) -> Point {
        self.pan
    }

    pub fn gesture(&self) -> Gesture {
        self.gesture
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.gesture, Gesture::Dragging)
    }

    pub fn is_pinching(&self) -> bool {
        matches!(self.gesture, Gesture::Pinching { .. })
    }

    pub fn active_tool(&self) -> Tool {
        self.tool
    }

    pub fn set_active_tool(&mut self, tool: Tool) {
        self.tool = tool;
        if tool != Tool::Pan {
            self.end_drag();
        }
    }

    pub fn toggle_pan_tool(&mut self) {
        let next = match self.tool {
            Tool::Pan => Tool::None,
            Tool::None => Tool::Pan,
        };
        self.set_active_tool(next);
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.scale = clamp_scale(scale);
    }

    pub fn begin_drag(&mut self) {
        if self.tool == Tool::Pan && self.gesture == Gesture::Idle {
            self.gesture = Gesture::Dragging;
        }
    }

    /// Moves the pan offset by the pointer delta. Only the drag gesture owns pan.
    pub fn update_drag(&mut self, delta_x: f32, delta_y: f32) {
        if self.is_dragging() {
            self.pan.x += delta_x;
            self.pan.y += delta_y;
        }
    }

    pub fn end_drag(&mut self) {
        if self.is_dragging() {
            self.gesture = Gesture::Idle;
        }
    }

    /// Starts a pinch, cancelling any drag. Coincident pointers are rejected
    /// and leave the gesture untouched.
    pub fn begin_pinch(&mut self, p1: Point, p2: Point) {
        let initial_distance = p1.distance(p2);
        if initial_distance <= 0.0 || !initial_distance.is_finite() {
            return;
        }
        self.gesture = Gesture::Pinching {
            initial_distance,
            start_scale: self.scale,
        };
    }

    pub fn update_pinch(&mut self, p1: Point, p2: Point) {
        if let Gesture::Pinching {
            initial_distance,
            start_scale,
        } = self.gesture
        {
            let ratio = p1.distance(p2) / initial_distance;
            self.scale = clamp_scale(start_scale * ratio);
        }
    }

    pub fn end_pinch(&mut self) {
        if self.is_pinching() {
            self.gesture = Gesture::Idle;
        }
    }

    /// Modifier+wheel zoom. Plain wheel events belong to scrolling and are ignored.
    pub fn wheel_zoom(&mut self, delta_y: f32, modifier_held: bool) {
        if !modifier_held || delta_y == 0.0 || delta_y.is_nan() {
            return;
        }
        let direction = if delta_y > 0.0 { -1.0 } else { 1.0 };
        self.scale = round2(clamp_scale(self.scale + direction * WHEEL_ZOOM_STEP));
    }

    pub fn zoom_in(&mut self) {
        self.scale = round2(clamp_scale(self.scale + BUTTON_ZOOM_STEP));
    }

    pub fn zoom_out(&mut self) {
        self.scale = round2(clamp_scale(self.scale - BUTTON_ZOOM_STEP));
    }

    /// Applies the zoom field text and returns the text the field should show.
    ///
    /// Input is read like a leading integer (`"150%"` is 150). Unparseable
    /// input keeps the current scale.
    pub fn commit_zoom_input(&mut self, text: &str) -> String {
        let Some(percent) = parse_leading_int(text) else {
            return self.zoom_percent_text();
        };
        let percent = percent.clamp(MIN_ZOOM_PERCENT, MAX_ZOOM_PERCENT);
        self.scale = percent as f32 / 100.0;
        percent.to_string()
    }

    pub fn zoom_percent_text(&self) -> String {
        format!("{}", (self.scale * 100.0).round() as i64)
    }

    pub fn reset_view(&mut self) {
        self.scale = 1.0;
        self.pan = Point::ZERO;
    }

    /// Full reset used when the document itself is cleared.
    pub fn reset(&mut self) {
        self.reset_view();
        self.gesture = Gesture::Idle;
        self.pointers.clear();
        self.pinch_tail = false;
    }

    pub fn pointer_down(&mut self, id: PointerId, position: Point) {
        if let Some(existing) = self.pointers.iter_mut().find(|p| p.id == id) {
            existing.position = position;
            return;
        }
        if self.pointers.len() >= 2 {
            // Third and later fingers do not take part in the gesture.
            return;
        }
        self.pointers.push(ActivePointer { id, position });
        match self.pointers.len() {
            1 if !self.pinch_tail => self.begin_drag(),
            2 => {
                self.end_drag();
                self.begin_pinch(self.pointers[0].position, self.pointers[1].position);
            }
            _ => {}
        }
    }

    pub fn pointer_move(&mut self, id: PointerId, position: Point) {
        let Some(index) = self.pointers.iter().position(|p| p.id == id) else {
            return;
        };
        let previous = self.pointers[index].position;
        self.pointers[index].position = position;

        match self.gesture {
            Gesture::Dragging => {
                self.update_drag(position.x - previous.x, position.y - previous.y);
            }
            Gesture::Pinching { .. } => {
                if self.pointers.len() == 2 {
                    self.update_pinch(self.pointers[0].position, self.pointers[1].position);
                }
            }
            Gesture::Idle => {
                // A rejected pinch (coincident fingers) starts once they separate.
                if self.pointers.len() == 2 {
                    self.begin_pinch(self.pointers[0].position, self.pointers[1].position);
                }
            }
        }
    }

    pub fn pointer_up(&mut self, id: PointerId) {
        self.pointers.retain(|p| p.id != id);
        match self.gesture {
            Gesture::Pinching { .. } => {
                self.end_pinch();
                self.pinch_tail = !self.pointers.is_empty();
            }
            Gesture::Dragging => self.end_drag(),
            Gesture::Idle => {
                if self.pointers.len() < 2 && !self.pointers.is_empty() {
                    self.pinch_tail = true;
                }
            }
        }
        if self.pointers.is_empty() {
            self.pinch_tail = false;
        }
    }

    /// Pointer left the canvas: drop every pointer and end whatever gesture was live.
    pub fn pointer_leave(&mut self) {
        self.pointers.clear();
        self.pinch_tail = false;
        self.end_drag();
        self.end_pinch();
    }
}

fn clamp_scale(scale: f32) -> f32 {
    if scale.is_nan() {
        return MIN_SCALE;
    }
    scale.clamp(MIN_SCALE, MAX_SCALE)
}

fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

/// Leading-integer parse: optional whitespace and sign, then at least one digit.
fn parse_leading_int(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let digits: &str = &rest[..rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len())];
    if digits.is_empty() {
        return None;
    }
    // Absurdly long digit runs saturate; they clamp to the maximum anyway.
    let magnitude = digits.parse::<i64>().unwrap_or(i64::MAX);
    Some(if negative { -magnitude } else { magnitude })
}
