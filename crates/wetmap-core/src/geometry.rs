//! Planar geometry in lon/lat degrees: rectangles, region boundaries and
//! boundary simplification.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::raster::METRES_PER_DEGREE;

/// Axis-aligned rectangle `[min_lon, min_lat, max_lon, max_lat]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BBox {
    pub const fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self { min_lon, min_lat, max_lon, max_lat }
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    /// Closed ring tracing the rectangle counter-clockwise.
    pub fn to_polygon(&self) -> Polygon {
        Polygon::new(vec![
            [self.min_lon, self.min_lat],
            [self.max_lon, self.min_lat],
            [self.max_lon, self.max_lat],
            [self.min_lon, self.max_lat],
        ])
    }
}

/// Simple polygon given by one exterior ring of `[lon, lat]` vertices.
/// The ring is implicitly closed; a repeated first vertex is tolerated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub ring: Vec<[f64; 2]>,
}

impl Polygon {
    pub fn new(mut ring: Vec<[f64; 2]>) -> Self {
        if ring.len() > 1 && ring.first() == ring.last() {
            ring.pop();
        }
        Self { ring }
    }

    pub fn vertex_count(&self) -> usize {
        self.ring.len()
    }

    pub fn bbox(&self) -> BBox {
        let mut b = BBox::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for &[lon, lat] in &self.ring {
            b.min_lon = b.min_lon.min(lon);
            b.max_lon = b.max_lon.max(lon);
            b.min_lat = b.min_lat.min(lat);
            b.max_lat = b.max_lat.max(lat);
        }
        b
    }

    /// Even-odd ray casting.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        let n = self.ring.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let [xi, yi] = self.ring[i];
            let [xj, yj] = self.ring[j];
            if (yi > lat) != (yj > lat) && lon < (xj - xi) * (lat - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// Douglas–Peucker simplification with a tolerance in metres.
    /// The result always keeps at least three vertices.
    pub fn simplify(&self, tolerance_m: f64) -> Polygon {
        let n = self.ring.len();
        if n <= 3 || tolerance_m <= 0.0 {
            return self.clone();
        }
        let tol_deg = tolerance_m / METRES_PER_DEGREE;

        // Split the closed ring at vertex 0 and the vertex farthest from it so
        // both halves are open polylines.
        let far = (1..n)
            .max_by(|&a, &b| {
                dist2(self.ring[0], self.ring[a]).total_cmp(&dist2(self.ring[0], self.ring[b]))
            })
            .unwrap_or(n / 2);

        let mut keep = vec![false; n + 1];
        keep[0] = true;
        keep[far] = true;
        keep[n] = true;
        let closed: Vec<[f64; 2]> = self.ring.iter().copied().chain(std::iter::once(self.ring[0])).collect();
        mark_douglas_peucker(&closed, 0, far, tol_deg, &mut keep);
        mark_douglas_peucker(&closed, far, n, tol_deg, &mut keep);

        let mut ring: Vec<[f64; 2]> = (0..n).filter(|&i| keep[i]).map(|i| self.ring[i]).collect();
        if ring.len() < 3 {
            // Degenerate after simplification: fall back to the three most
            // spread vertices.
            let third = (1..n)
                .filter(|&i| i != far)
                .max_by(|&a, &b| {
                    seg_dist2(self.ring[a], self.ring[0], self.ring[far])
                        .total_cmp(&seg_dist2(self.ring[b], self.ring[0], self.ring[far]))
                })
                .unwrap_or(1);
            let mut idx = [0, far, third];
            idx.sort_unstable();
            ring = idx.iter().map(|&i| self.ring[i]).collect();
        }
        Polygon { ring }
    }
}

fn dist2(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

/// Squared distance from `p` to segment `a`–`b`.
fn seg_dist2(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    let len2 = dist2(a, b);
    if len2 == 0.0 {
        return dist2(p, a);
    }
    let t = (((p[0] - a[0]) * (b[0] - a[0]) + (p[1] - a[1]) * (b[1] - a[1])) / len2).clamp(0.0, 1.0);
    dist2(p, [a[0] + t * (b[0] - a[0]), a[1] + t * (b[1] - a[1])])
}

fn mark_douglas_peucker(pts: &[[f64; 2]], first: usize, last: usize, tol_deg: f64, keep: &mut [bool]) {
    if last <= first + 1 {
        return;
    }
    let (mut idx, mut max_d2) = (first, 0.0);
    for i in first + 1..last {
        let d2 = seg_dist2(pts[i], pts[first], pts[last]);
        if d2 > max_d2 {
            idx = i;
            max_d2 = d2;
        }
    }
    if max_d2 > tol_deg * tol_deg {
        keep[idx] = true;
        mark_douglas_peucker(pts, first, idx, tol_deg, keep);
        mark_douglas_peucker(pts, idx, last, tol_deg, keep);
    }
}

/// A named area that restricts filtering, sampling and export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    /// Administrative region code; 0 for synthetic regions such as `all`.
    pub code: u32,
    pub boundary: Polygon,
}

impl Region {
    pub fn new(name: impl Into<String>, code: u32, boundary: Polygon) -> Result<Self> {
        let name = name.into();
        if boundary.vertex_count() < 3 {
            return Err(PipelineError::config(format!(
                "region {name} boundary has {} vertices, need at least 3",
                boundary.vertex_count()
            )));
        }
        Ok(Self { name, code, boundary })
    }

    pub fn bbox(&self) -> BBox {
        self.boundary.bbox()
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.boundary.contains(lon, lat)
    }

    /// Same region with a simplified boundary.
    pub fn simplified(&self, tolerance_m: f64) -> Region {
        Region {
            name: self.name.clone(),
            code: self.code,
            boundary: self.boundary.simplify(tolerance_m),
        }
    }
}
