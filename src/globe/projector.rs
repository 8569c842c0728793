//! Orientation state and sphere -> screen projection

use std::f64::consts::FRAC_PI_2;

use super::geometry::UnitVec;

pub const MIN_ZOOM: f64 = 0.6;
pub const MAX_ZOOM: f64 = 3.0;
const DRAG_SENSITIVITY: f64 = 0.01;     // radians per pixel
const SCROLL_STEP: f64 = 0.1;

/// Interactive view state. Owned by the foreground loop only.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Orientation {
    pitch: f64,
    yaw: f64,
    zoom: f64,
    dragging: bool,
}

impl Orientation {
    pub fn new(pitch: f64, yaw: f64, zoom: f64) -> Self {
        Self {
            pitch: pitch.clamp(-FRAC_PI_2, FRAC_PI_2),
            yaw,
            zoom: zoom.clamp(MIN_ZOOM, MAX_ZOOM),
            dragging: false,
        }
    }

    pub fn from_degrees(pitch_deg: f64, yaw_deg: f64) -> Self {
        Self::new(pitch_deg.to_radians(), yaw_deg.to_radians(), 1.0)
    }

    pub fn pitch(&self) -> f64 {
        self.pitch
    }

    pub fn yaw(&self) -> f64 {
        self.yaw
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// True while the pointer is held down; the renderer coarsens the grid.
    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub fn begin_drag(&mut self) {
        self.dragging = true;
    }

    pub fn end_drag(&mut self) {
        self.dragging = false;
    }

    /// Pointer moved by (dx, dy) pixels while dragging
    pub fn drag(&mut self, dx: f64, dy: f64) {
        self.yaw += dx * DRAG_SENSITIVITY;
        self.rotate_pitch(-dy * DRAG_SENSITIVITY);
    }

    pub fn rotate_pitch(&mut self, delta: f64) {
        self.pitch = (self.pitch + delta).clamp(-FRAC_PI_2, FRAC_PI_2);
    }

    pub fn rotate_yaw(&mut self, delta: f64) {
        self.yaw += delta;
    }

    /// Positive notches zoom out, matching a wheel rolled towards the user
    pub fn scroll(&mut self, notches: f64) {
        self.zoom = (self.zoom - notches * SCROLL_STEP).clamp(MIN_ZOOM, MAX_ZOOM);
    }

    /// Idle spin. Skipped on ticks where the user is dragging.
    pub fn auto_rotate(&mut self, step: f64) {
        if !self.dragging {
            self.yaw += step;
        }
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Self::from_degrees(20.0, -30.0)
    }
}

/// Drawing surface size, in square pixels
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> ScreenPoint {
        ScreenPoint {
            x: self.width / 2.0,
            y: self.height / 2.0,
        }
    }

    /// Globe radius at the given zoom
    pub fn radius(&self, zoom: f64) -> f64 {
        self.width.min(self.height) / 2.2 * zoom
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

/// Projection for one frame. Holds the rotation trig so every point
/// projected this frame reuses the same four values.
#[derive(Clone, Copy, Debug)]
pub struct FrameProjector {
    cos_pitch: f64,
    sin_pitch: f64,
    cos_yaw: f64,
    sin_yaw: f64,
    radius: f64,
    center: ScreenPoint,
}

impl FrameProjector {
    pub fn new(orientation: &Orientation, radius: f64, center: ScreenPoint) -> Self {
        let (sin_pitch, cos_pitch) = orientation.pitch.sin_cos();
        let (sin_yaw, cos_yaw) = orientation.yaw.sin_cos();
        Self {
            cos_pitch,
            sin_pitch,
            cos_yaw,
            sin_yaw,
            radius,
            center,
        }
    }

    pub fn for_viewport(orientation: &Orientation, viewport: Viewport) -> Self {
        Self::new(orientation, viewport.radius(orientation.zoom), viewport.center())
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn center(&self) -> ScreenPoint {
        self.center
    }

    /// Yaw about the vertical axis, then pitch about the horizontal one.
    /// Returns (x, y, depth) in sphere units.
    fn rotate(&self, v: &UnitVec) -> (f64, f64, f64) {
        let tx = v.x * self.cos_yaw - v.z * self.sin_yaw;
        let tz = v.x * self.sin_yaw + v.z * self.cos_yaw;
        let ty = v.y * self.cos_pitch - tz * self.sin_pitch;
        let depth = v.y * self.sin_pitch + tz * self.cos_pitch;
        (tx, ty, depth)
    }

    /// `None` when the point is on the far hemisphere
    pub fn project_vec(&self, v: &UnitVec) -> Option<ScreenPoint> {
        let (x, y, depth) = self.rotate(v);
        if depth < 0.0 {
            return None;
        }
        Some(ScreenPoint {
            x: self.center.x + x * self.radius,
            y: self.center.y - y * self.radius,
        })
    }

    pub fn project(&self, lon: f64, lat: f64) -> Option<ScreenPoint> {
        self.project_vec(&UnitVec::from_lon_lat(lon, lat))
    }
}

/// One-off projection of a geographic point
pub fn project(
    lon: f64,
    lat: f64,
    orientation: &Orientation,
    radius: f64,
    center: ScreenPoint,
) -> Option<ScreenPoint> {
    FrameProjector::new(orientation, radius, center).project(lon, lat)
}
