//! Braille rasterizer for globe drawing commands
//!
//! Each terminal cell holds a 2x4 block of dots. Strokes and markers light
//! dots; discs and gradients become the cell background colour.

use crossterm::style::Color;

use crate::globe::projector::{ScreenPoint, Viewport};
use crate::globe::renderer::{DrawCommand, Fill, HopRole, Rgba, Stroke, MARKER_OUTLINE};
use crate::terminal::{rgb, Terminal};

const DOT_BITS: [[u8; 2]; 4] = [
    [0x01, 0x08],
    [0x02, 0x10],
    [0x04, 0x20],
    [0x40, 0x80],
];

#[derive(Clone, Copy)]
struct Dot {
    rank: u8,
    color: Rgba,
}

pub struct BrailleCanvas {
    cols: usize,
    rows: usize,
    dots: Vec<Option<Dot>>,
    background: Vec<Rgba>,
}

impl BrailleCanvas {
    pub fn new(cols: usize, rows: usize) -> Self {
        Self {
            cols,
            rows,
            dots: vec![None; cols * 2 * rows * 4],
            background: vec![Rgba(0, 0, 0, 255); cols * rows],
        }
    }

    pub fn resize(&mut self, cols: usize, rows: usize) {
        if cols != self.cols || rows != self.rows {
            *self = Self::new(cols, rows);
        }
    }

    /// Dot-space surface the renderer should target
    pub fn viewport(&self) -> Viewport {
        Viewport::new((self.cols * 2) as f64, (self.rows * 4) as f64)
    }

    fn dot_width(&self) -> usize {
        self.cols * 2
    }

    fn dot_height(&self) -> usize {
        self.rows * 4
    }

    /// Rasterize a frame, replacing whatever was there
    pub fn paint(&mut self, commands: &[DrawCommand]) {
        self.dots.fill(None);
        for cmd in commands {
            match *cmd {
                DrawCommand::Clear(color) => self.background.fill(color),
                DrawCommand::Disc { center, radius, fill } => self.fill_disc(center, radius, fill),
                DrawCommand::Ring { center, radius, color } => self.ring(center, radius, color),
                DrawCommand::Line { from, to, stroke } => {
                    self.line(from, to, Dot { rank: stroke_rank(stroke), color: stroke.color() })
                }
                DrawCommand::Marker { at, radius, role } => self.marker(at, radius, role),
            }
        }
    }

    fn fill_disc(&mut self, center: ScreenPoint, radius: f64, fill: Fill) {
        for row in 0..self.rows {
            for col in 0..self.cols {
                // sample the middle of the cell in dot space
                let x = col as f64 * 2.0 + 1.0;
                let y = row as f64 * 4.0 + 2.0;
                let dist = ((x - center.x).powi(2) + (y - center.y).powi(2)).sqrt();
                if dist > radius {
                    continue;
                }
                let color = match fill {
                    Fill::Solid(c) => c,
                    Fill::Radial { focus, extent, inner_at, inner, outer } => {
                        let d = ((x - focus.x).powi(2) + (y - focus.y).powi(2)).sqrt();
                        let t = if extent <= 0.0 { 1.0 } else { d / extent };
                        let t = ((t - inner_at) / (1.0 - inner_at).max(f64::EPSILON)).clamp(0.0, 1.0);
                        lerp(inner, outer, t)
                    }
                };
                let idx = row * self.cols + col;
                self.background[idx] = blend(self.background[idx], color);
            }
        }
    }

    fn ring(&mut self, center: ScreenPoint, radius: f64, color: Rgba) {
        let steps = ((radius * std::f64::consts::TAU).ceil() as usize).max(8);
        for i in 0..steps {
            let a = i as f64 / steps as f64 * std::f64::consts::TAU;
            self.plot(
                center.x + radius * a.cos(),
                center.y + radius * a.sin(),
                Dot { rank: 1, color },
            );
        }
    }

    fn line(&mut self, from: ScreenPoint, to: ScreenPoint, dot: Dot) {
        let (mut x0, mut y0) = (from.x.round() as i64, from.y.round() as i64);
        let (x1, y1) = (to.x.round() as i64, to.y.round() as i64);
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        loop {
            self.plot_i(x0, y0, dot);
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

    /// Filled dot in the hop colour inside a one-dot white outline
    fn marker(&mut self, at: ScreenPoint, radius: f64, role: HopRole) {
        let fill = Dot { rank: 7, color: role.color() };
        let outline = Dot { rank: 6, color: MARKER_OUTLINE };
        let outer = radius + 1.0;
        let r = outer.ceil() as i64;
        let (cx, cy) = (at.x.round() as i64, at.y.round() as i64);
        for dy in -r..=r {
            for dx in -r..=r {
                let d2 = (dx * dx + dy * dy) as f64;
                if d2 <= radius * radius {
                    self.plot_i(cx + dx, cy + dy, fill);
                } else if d2 <= outer * outer {
                    self.plot_i(cx + dx, cy + dy, outline);
                }
            }
        }
    }

    fn plot(&mut self, x: f64, y: f64, dot: Dot) {
        self.plot_i(x.round() as i64, y.round() as i64, dot);
    }

    fn plot_i(&mut self, x: i64, y: i64, dot: Dot) {
        if x < 0 || y < 0 || x >= self.dot_width() as i64 || y >= self.dot_height() as i64 {
            return;
        }
        let idx = y as usize * self.dot_width() + x as usize;
        match self.dots[idx] {
            Some(existing) if existing.rank > dot.rank => {}
            _ => self.dots[idx] = Some(dot),
        }
    }

    /// Braille glyph and foreground for one cell
    fn cell(&self, col: usize, row: usize) -> (char, Option<Rgba>) {
        let mut bits = 0u8;
        let mut top: Option<Dot> = None;
        for (dy, row_bits) in DOT_BITS.iter().enumerate() {
            for (dx, bit) in row_bits.iter().enumerate() {
                let idx = (row * 4 + dy) * self.dot_width() + col * 2 + dx;
                if let Some(dot) = self.dots[idx] {
                    bits |= bit;
                    if top.map_or(true, |t| dot.rank >= t.rank) {
                        top = Some(dot);
                    }
                }
            }
        }
        if bits == 0 {
            return (' ', None);
        }
        let ch = char::from_u32(0x2800 + bits as u32).unwrap_or(' ');
        (ch, top.map(|d| d.color))
    }

    /// Copy into the terminal buffer with the top-left cell at `(x, y)`
    pub fn blit(&self, term: &mut Terminal, x: i32, y: i32) {
        for row in 0..self.rows {
            for col in 0..self.cols {
                let bg = self.background[row * self.cols + col];
                let (ch, fg) = self.cell(col, row);
                let fg = fg.map(|c| to_color(blend(bg, c)));
                term.set_with_bg(x + col as i32, y + row as i32, ch, fg, Some(to_color(bg)), false);
            }
        }
    }
}

fn stroke_rank(stroke: Stroke) -> u8 {
    match stroke {
        Stroke::Grid => 2,
        Stroke::GridAxis => 3,
        Stroke::Boundary => 4,
        Stroke::Trace { .. } => 5,
    }
}

fn lerp(a: Rgba, b: Rgba, t: f64) -> Rgba {
    let mix = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * t).round() as u8;
    Rgba(mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2), mix(a.3, b.3))
}

/// `src` over `dst`; the result is opaque
fn blend(dst: Rgba, src: Rgba) -> Rgba {
    let a = src.3 as f64 / 255.0;
    let mix = |d: u8, s: u8| (d as f64 * (1.0 - a) + s as f64 * a).round() as u8;
    Rgba(mix(dst.0, src.0), mix(dst.1, src.1), mix(dst.2, src.2), 255)
}

fn to_color(c: Rgba) -> Color {
    rgb(c.0, c.1, c.2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globe::renderer::BACKGROUND;

    fn pt(x: f64, y: f64) -> ScreenPoint {
        ScreenPoint { x, y }
    }

    #[test]
    fn viewport_is_in_dots() {
        let canvas = BrailleCanvas::new(40, 10);
        assert_eq!(canvas.viewport(), Viewport::new(80.0, 40.0));
    }

    #[test]
    fn horizontal_line_fills_top_dot_row() {
        let mut canvas = BrailleCanvas::new(2, 1);
        canvas.paint(&[DrawCommand::Line { from: pt(0.0, 0.0), to: pt(3.0, 0.0), stroke: Stroke::Boundary }]);
        let (ch, fg) = canvas.cell(0, 0);
        assert_eq!(ch, '\u{2809}');
        assert_eq!(fg, Some(Stroke::Boundary.color()));
        assert_eq!(canvas.cell(1, 0).0, '\u{2809}');
    }

    #[test]
    fn marker_outranks_strokes_in_shared_cell() {
        let mut canvas = BrailleCanvas::new(4, 2);
        canvas.paint(&[
            DrawCommand::Line { from: pt(0.0, 3.0), to: pt(7.0, 3.0), stroke: Stroke::Trace { leg: 0 } },
            DrawCommand::Marker { at: pt(2.0, 3.0), radius: 1.0, role: HopRole::Last },
            DrawCommand::Line { from: pt(0.0, 3.0), to: pt(7.0, 3.0), stroke: Stroke::Grid },
        ]);
        assert_eq!(canvas.cell(1, 0).1, Some(HopRole::Last.color()));
    }

    #[test]
    fn marker_has_white_outline() {
        let mut canvas = BrailleCanvas::new(4, 3);
        canvas.paint(&[DrawCommand::Marker { at: pt(3.0, 5.0), radius: 1.0, role: HopRole::First }]);
        let outline = canvas.dots[5 * 8 + 5].map(|d| d.color);
        assert_eq!(outline, Some(MARKER_OUTLINE));
        let center = canvas.dots[5 * 8 + 3].map(|d| d.color);
        assert_eq!(center, Some(HopRole::First.color()));
    }

    #[test]
    fn discs_tint_background_inside_only() {
        let mut canvas = BrailleCanvas::new(10, 5);
        canvas.paint(&[
            DrawCommand::Clear(BACKGROUND),
            DrawCommand::Disc { center: pt(10.0, 10.0), radius: 4.0, fill: Fill::Solid(Rgba(255, 0, 0, 255)) },
        ]);
        assert_eq!(canvas.background[2 * 10 + 5 - 1], Rgba(255, 0, 0, 255));
        assert_eq!(canvas.background[0], BACKGROUND);
    }

    #[test]
    fn out_of_bounds_strokes_are_clipped() {
        let mut canvas = BrailleCanvas::new(2, 1);
        canvas.paint(&[DrawCommand::Line { from: pt(-50.0, -50.0), to: pt(-10.0, 80.0), stroke: Stroke::Grid }]);
        assert_eq!(canvas.cell(0, 0).0, ' ');
    }

    #[test]
    fn blend_respects_alpha() {
        assert_eq!(blend(Rgba(0, 0, 0, 255), Rgba(200, 100, 50, 0)), Rgba(0, 0, 0, 255));
        assert_eq!(blend(Rgba(0, 0, 0, 255), Rgba(200, 100, 50, 255)), Rgba(200, 100, 50, 255));
    }
}
