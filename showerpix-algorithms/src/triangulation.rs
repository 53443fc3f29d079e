//! Delaunay triangulation with barycentric point location.

use delaunator::Point;

/// Barycentric coordinates below this are treated as zero.
const BARYCENTRIC_EPS: f64 = 1e-10;

/// A triangle of point indices together with its barycentric denominator.
#[derive(Clone, Copy, Debug)]
struct Triangle {
    vertices: [usize; 3],
    denom: f64,
}

/// Delaunay triangulation of a scattered point set.
#[derive(Clone, Debug)]
pub struct Triangulation {
    points: Vec<[f64; 2]>,
    triangles: Vec<Triangle>,
}

impl Triangulation {
    /// Triangulate `points`.
    ///
    /// Fewer than three non-collinear points yield an empty triangulation, in
    /// which every location is outside the hull.
    #[must_use]
    pub fn new(points: &[[f64; 2]]) -> Self {
        let input: Vec<Point> = points.iter().map(|&[x, y]| Point { x, y }).collect();
        let delaunay = delaunator::triangulate(&input);

        let triangles = delaunay
            .triangles
            .chunks_exact(3)
            .filter_map(|t| {
                let vertices = [t[0], t[1], t[2]];
                let [p0, p1, p2] = vertices.map(|i| points[i]);
                let denom = (p1[1] - p2[1]) * (p0[0] - p2[0]) + (p2[0] - p1[0]) * (p0[1] - p2[1]);
                (denom.abs() > f64::EPSILON).then_some(Triangle { vertices, denom })
            })
            .collect();

        Self {
            points: points.to_vec(),
            triangles,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Axis-aligned bounding box of triangle `t`: `(x_min, x_max, y_min, y_max)`.
    #[must_use]
    pub fn triangle_bounds(&self, t: usize) -> (f64, f64, f64, f64) {
        let [a, b, c] = self.triangles[t].vertices.map(|i| self.points[i]);
        (
            a[0].min(b[0]).min(c[0]),
            a[0].max(b[0]).max(c[0]),
            a[1].min(b[1]).min(c[1]),
            a[1].max(b[1]).max(c[1]),
        )
    }

    /// Barycentric weights of `(x, y)` in triangle `t`, if it lies inside.
    #[must_use]
    pub fn barycentric(&self, t: usize, x: f64, y: f64) -> Option<Vertex3> {
        let tri = &self.triangles[t];
        let [p0, p1, p2] = tri.vertices.map(|i| self.points[i]);
        let l0 = ((p1[1] - p2[1]) * (x - p2[0]) + (p2[0] - p1[0]) * (y - p2[1])) / tri.denom;
        let l1 = ((p2[1] - p0[1]) * (x - p2[0]) + (p0[0] - p2[0]) * (y - p2[1])) / tri.denom;
        let l2 = 1.0 - l0 - l1;
        if l0 < -BARYCENTRIC_EPS || l1 < -BARYCENTRIC_EPS || l2 < -BARYCENTRIC_EPS {
            return None;
        }
        Some(Vertex3 {
            indices: tri.vertices,
            weights: [l0, l1, l2],
        })
    }

    /// Locate `(x, y)` by scanning every triangle.
    #[must_use]
    pub fn locate(&self, x: f64, y: f64) -> Option<Vertex3> {
        (0..self.triangles.len()).find_map(|t| self.barycentric(t, x, y))
    }
}

/// Interpolation stencil: three point indices and their barycentric weights.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Vertex3 {
    pub indices: [usize; 3],
    pub weights: [f64; 3],
}

impl Vertex3 {
    /// Linear interpolation of `values` at this stencil.
    #[must_use]
    pub fn interpolate(&self, values: &[f64]) -> f64 {
        self.indices
            .iter()
            .zip(self.weights.iter())
            .map(|(&i, &w)| w * values[i])
            .sum()
    }
}
