//! Frame composition: turns boundaries, the current trace and the view state
//! into an ordered list of drawing commands, back to front.

use super::geometry::{BoundarySet, UnitVec};
use super::projector::{FrameProjector, Orientation, ScreenPoint, Viewport};
use crate::geo::GeoCoordinate;

/// Sample density for great-circle arcs, per radian of arc
const ARC_SAMPLES_PER_RADIAN: f64 = 28.0;
const MIN_ARC_SAMPLES: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgba(pub u8, pub u8, pub u8, pub u8);

pub const BACKGROUND: Rgba = Rgba(10, 18, 34, 255);
pub const SHADOW: Rgba = Rgba(0, 0, 0, 77);
pub const OCEAN_BASE: Rgba = Rgba(36, 72, 140, 255);
pub const OCEAN_HIGHLIGHT: Rgba = Rgba(60, 100, 180, 255);
pub const HALO_CLEAR: Rgba = Rgba(160, 200, 255, 0);
pub const HALO_EDGE: Rgba = Rgba(160, 200, 255, 70);
pub const RIM: Rgba = Rgba(180, 210, 255, 60);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Fill {
    Solid(Rgba),
    /// Gradient centered on `focus`; `inner` at `inner_at`·extent, `outer` at extent
    Radial {
        focus: ScreenPoint,
        extent: f64,
        inner_at: f64,
        inner: Rgba,
        outer: Rgba,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stroke {
    Grid,
    GridAxis,
    Boundary,
    /// Arc between hop `leg` and hop `leg + 1`
    Trace { leg: usize },
}

impl Stroke {
    pub fn color(&self) -> Rgba {
        match self {
            Stroke::Grid => Rgba(180, 200, 230, 70),
            Stroke::GridAxis => Rgba(180, 200, 230, 110),
            Stroke::Boundary => Rgba(145, 185, 230, 170),
            Stroke::Trace { .. } => Rgba(255, 60, 60, 255),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HopRole {
    First,
    Intermediate,
    Last,
}

impl HopRole {
    fn of(index: usize, count: usize) -> Self {
        if index == 0 {
            HopRole::First
        } else if index + 1 == count {
            HopRole::Last
        } else {
            HopRole::Intermediate
        }
    }

    pub fn color(&self) -> Rgba {
        match self {
            HopRole::First => Rgba(0, 255, 0, 255),
            HopRole::Intermediate => Rgba(255, 200, 0, 255),
            HopRole::Last => Rgba(0, 0, 255, 255),
        }
    }
}

pub const MARKER_OUTLINE: Rgba = Rgba(255, 255, 255, 255);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DrawCommand {
    Clear(Rgba),
    Disc { center: ScreenPoint, radius: f64, fill: Fill },
    Ring { center: ScreenPoint, radius: f64, color: Rgba },
    Line { from: ScreenPoint, to: ScreenPoint, stroke: Stroke },
    Marker { at: ScreenPoint, radius: f64, role: HopRole },
}

/// Graticule spacing and how finely each grid line is sampled
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridDensity {
    pub lon_step_deg: usize,   // between meridians
    pub lat_step_deg: usize,   // between parallels
    pub samples: usize,
}

pub const FINE_GRID: GridDensity = GridDensity { lon_step_deg: 15, lat_step_deg: 15, samples: 160 };
pub const COARSE_GRID: GridDensity = GridDensity { lon_step_deg: 30, lat_step_deg: 30, samples: 90 };

pub struct GlobeRenderer {
    fine: GridDensity,
    coarse: GridDensity,
}

impl Default for GlobeRenderer {
    fn default() -> Self {
        Self::new(FINE_GRID, COARSE_GRID)
    }
}

impl GlobeRenderer {
    /// `coarse` is used while the view is being dragged
    pub fn new(fine: GridDensity, coarse: GridDensity) -> Self {
        Self { fine, coarse }
    }

    pub fn render(
        &self,
        boundaries: &BoundarySet,
        trace: &[GeoCoordinate],
        orientation: &Orientation,
        viewport: Viewport,
    ) -> Vec<DrawCommand> {
        let proj = FrameProjector::for_viewport(orientation, viewport);
        let mut out = Vec::new();

        backdrop(&mut out, &proj);

        let density = if orientation.is_dragging() { self.coarse } else { self.fine };
        graticule(&mut out, &proj, density);

        for boundary in boundaries.iter() {
            polyline(&mut out, &proj, boundary.iter().copied(), Stroke::Boundary);
        }

        draw_trace(&mut out, &proj, trace);
        out
    }
}

fn backdrop(out: &mut Vec<DrawCommand>, proj: &FrameProjector) {
    let r = proj.radius();
    let c = proj.center();

    out.push(DrawCommand::Clear(BACKGROUND));
    out.push(DrawCommand::Disc {
        center: ScreenPoint { x: c.x + r * 0.06, y: c.y + r * 0.08 },
        radius: r,
        fill: Fill::Solid(SHADOW),
    });
    out.push(DrawCommand::Disc {
        center: c,
        radius: r,
        fill: Fill::Radial {
            focus: ScreenPoint { x: c.x - r * 0.25, y: c.y - r * 0.25 },
            extent: r * 1.05,
            inner_at: 0.0,
            inner: OCEAN_HIGHLIGHT,
            outer: OCEAN_BASE,
        },
    });
    out.push(DrawCommand::Disc {
        center: c,
        radius: r * 1.08,
        fill: Fill::Radial {
            focus: c,
            extent: r * 1.08,
            inner_at: 0.92,
            inner: HALO_CLEAR,
            outer: HALO_EDGE,
        },
    });
    out.push(DrawCommand::Ring { center: c, radius: r, color: RIM });
}

fn graticule(out: &mut Vec<DrawCommand>, proj: &FrameProjector, density: GridDensity) {
    for lon in (-180..=180).step_by(density.lon_step_deg.max(1)) {
        geo_line(out, proj, (lon as f64, -85.0), (lon as f64, 85.0), density.samples, Stroke::Grid);
    }
    for lat in (-75..=75).step_by(density.lat_step_deg.max(1)) {
        geo_line(out, proj, (-180.0, lat as f64), (180.0, lat as f64), density.samples, Stroke::Grid);
    }
    // equator and prime meridian on top
    geo_line(out, proj, (-180.0, 0.0), (180.0, 0.0), density.samples, Stroke::GridAxis);
    geo_line(out, proj, (0.0, -85.0), (0.0, 85.0), density.samples, Stroke::GridAxis);
}

/// Straight line in lon/lat space, sampled into `samples` segments
fn geo_line(
    out: &mut Vec<DrawCommand>,
    proj: &FrameProjector,
    from: (f64, f64),
    to: (f64, f64),
    samples: usize,
    stroke: Stroke,
) {
    let samples = samples.max(1);
    let points = (0..=samples).map(|i| {
        let t = i as f64 / samples as f64;
        UnitVec::from_lon_lat(from.0 + (to.0 - from.0) * t, from.1 + (to.1 - from.1) * t)
    });
    polyline(out, proj, points, stroke);
}

/// Connect consecutive visible points. A culled point breaks the line.
fn polyline<I>(out: &mut Vec<DrawCommand>, proj: &FrameProjector, points: I, stroke: Stroke)
where
    I: IntoIterator<Item = UnitVec>,
{
    let mut last: Option<ScreenPoint> = None;
    for v in points {
        let p = proj.project_vec(&v);
        if let (Some(from), Some(to)) = (last, p) {
            out.push(DrawCommand::Line { from, to, stroke });
        }
        last = p;
    }
}

/// Number of segments for an arc spanning `theta` radians
pub fn arc_samples(theta: f64) -> usize {
    ((theta * ARC_SAMPLES_PER_RADIAN).ceil() as usize).max(MIN_ARC_SAMPLES)
}

fn great_circle(out: &mut Vec<DrawCommand>, proj: &FrameProjector, a: &GeoCoordinate, b: &GeoCoordinate, leg: usize) {
    let va = UnitVec::from_lon_lat(a.lon, a.lat);
    let vb = UnitVec::from_lon_lat(b.lon, b.lat);
    let theta = va.angle_to(&vb);
    let n = arc_samples(theta);

    let samples = (0..=n).map(|i| va.slerp(&vb, theta, i as f64 / n as f64));
    polyline(out, proj, samples, Stroke::Trace { leg });
}

fn draw_trace(out: &mut Vec<DrawCommand>, proj: &FrameProjector, trace: &[GeoCoordinate]) {
    for (leg, pair) in trace.windows(2).enumerate() {
        great_circle(out, proj, &pair[0], &pair[1], leg);
    }

    let marker_radius = (proj.radius() * 0.03).max(1.5);
    for (i, hop) in trace.iter().enumerate() {
        if let Some(at) = proj.project(hop.lon, hop.lat) {
            out.push(DrawCommand::Marker {
                at,
                radius: marker_radius,
                role: HopRole::of(i, trace.len()),
            });
        }
    }
}
