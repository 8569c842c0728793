//! Static boundary outlines, converted once to unit-sphere vectors

use std::fs;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Point on the unit sphere. +y is north, lon 0 lies on +x, lon 90E on +z.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UnitVec {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl UnitVec {
    pub fn from_lon_lat(lon_deg: f64, lat_deg: f64) -> Self {
        let (lon, lat) = (lon_deg.to_radians(), lat_deg.to_radians());
        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lon, cos_lon) = lon.sin_cos();
        Self {
            x: cos_lat * cos_lon,
            y: sin_lat,
            z: cos_lat * sin_lon,
        }
    }

    pub fn dot(&self, other: &UnitVec) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Angle between two unit vectors, radians
    pub fn angle_to(&self, other: &UnitVec) -> f64 {
        self.dot(other).clamp(-1.0, 1.0).acos()
    }

    /// Spherical linear interpolation from `self` (t=0) to `other` (t=1).
    ///
    /// Antipodal endpoints have no unique great circle; the arc is taken
    /// through the pole (or through lon 0 when the endpoints are the poles).
    pub fn slerp(&self, other: &UnitVec, theta: f64, t: f64) -> UnitVec {
        let sin_theta = theta.sin();
        if sin_theta.abs() < 1e-9 && self.dot(other) < 0.0 {
            let mid = self.orthogonal();
            let half = std::f64::consts::FRAC_PI_2;
            return if t <= 0.5 {
                self.slerp(&mid, half, t * 2.0)
            } else {
                mid.slerp(other, half, t * 2.0 - 1.0)
            };
        }
        let (s1, s2) = if sin_theta.abs() < 1e-9 {
            (1.0 - t, t)
        } else {
            (((1.0 - t) * theta).sin() / sin_theta, (t * theta).sin() / sin_theta)
        };
        UnitVec {
            x: s1 * self.x + s2 * other.x,
            y: s1 * self.y + s2 * other.y,
            z: s1 * self.z + s2 * other.z,
        }
    }

    /// A unit vector at right angles to `self`, leaning north when possible
    fn orthogonal(&self) -> UnitVec {
        let axis = if self.y.abs() < 0.9 {
            UnitVec { x: 0.0, y: 1.0, z: 0.0 }
        } else {
            UnitVec { x: 1.0, y: 0.0, z: 0.0 }
        };
        let d = self.dot(&axis);
        let (x, y, z) = (axis.x - d * self.x, axis.y - d * self.y, axis.z - d * self.z);
        let len = (x * x + y * y + z * z).sqrt();
        UnitVec { x: x / len, y: y / len, z: z / len }
    }
}

#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("boundary data not found")]
    NotFound,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("bad coordinate on line {line}: {text:?}")]
    Parse { line: usize, text: String },
}

/// All boundary polylines in one flat arena, indexed by boundary id
#[derive(Debug, Default)]
pub struct BoundarySet {
    points: Vec<UnitVec>,
    spans: Vec<Range<usize>>,
}

impl BoundarySet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse blank-line separated polylines of `lon,lat` lines
    pub fn parse(text: &str) -> Result<Self, GeometryError> {
        let mut set = Self::default();
        let mut start = 0;

        for (idx, line) in text.lines().enumerate() {
            let t = line.trim();
            if t.is_empty() {
                set.close_span(start);
                start = set.points.len();
                continue;
            }

            let mut parts = t.split(',');
            let (Some(lon), Some(lat)) = (parts.next(), parts.next()) else {
                continue;
            };
            let parse = |s: &str| {
                s.trim().parse::<f64>().map_err(|_| GeometryError::Parse {
                    line: idx + 1,
                    text: t.to_string(),
                })
            };
            set.points.push(UnitVec::from_lon_lat(parse(lon)?, parse(lat)?));
        }
        set.close_span(start);

        Ok(set)
    }

    fn close_span(&mut self, start: usize) {
        if self.points.len() > start {
            self.spans.push(start..self.points.len());
        }
    }

    pub fn load(path: &Path) -> Result<Self, GeometryError> {
        let text = fs::read_to_string(path).map_err(|source| GeometryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Load from the configured or default location. Failure is logged and
    /// yields an empty set; the globe just has no outlines.
    pub fn load_or_empty(explicit: Option<&Path>) -> Self {
        let result = find_boundaries(explicit)
            .ok_or(GeometryError::NotFound)
            .and_then(|path| {
                let set = Self::load(&path)?;
                info!(path = %path.display(), boundaries = set.len(), "loaded boundary data");
                Ok(set)
            });

        result.unwrap_or_else(|e| {
            warn!(error = %e, "continuing without boundaries");
            Self::empty()
        })
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn boundary(&self, id: usize) -> &[UnitVec] {
        self.spans
            .get(id)
            .map(|span| &self.points[span.clone()])
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &[UnitVec]> {
        self.spans.iter().map(|span| &self.points[span.clone()])
    }
}

fn find_boundaries(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        // An explicit path that does not exist should fail, not fall through
        return Some(path.to_path_buf());
    }

    let candidates = [
        dirs::config_dir().map(|p| p.join("traceglobe/countries.txt")),
        Some(PathBuf::from("/usr/share/traceglobe/countries.txt")),
        Some(PathBuf::from("./countries.txt")),
        Some(PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/countries.txt"))),
    ];

    candidates.into_iter().flatten().find(|p| p.exists())
}
