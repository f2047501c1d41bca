//! Mirror symmetry of a mesh about an axis-aligned plane
//!
//! Vertices are paired with the vertex nearest to their reflection. Only
//! mutual pairs count, and vertices within the tolerance of the plane are
//! their own mirror.

use lodcrate_core::{bounds_of, Point3f};
use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::{Deserialize, Serialize};

type VertexPoint = GeomWithData<[f32; 3], usize>;

/// Detection accepts a plane once this share of the vertices has a mirror
const MIN_DETECTED_FRACTION: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SymmetryAxis {
    #[default]
    X,
    Y,
    Z,
}

impl SymmetryAxis {
    pub const ALL: [SymmetryAxis; 3] = [SymmetryAxis::X, SymmetryAxis::Y, SymmetryAxis::Z];

    pub fn index(self) -> usize {
        match self {
            SymmetryAxis::X => 0,
            SymmetryAxis::Y => 1,
            SymmetryAxis::Z => 2,
        }
    }
}

/// The plane `p[axis] == offset`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymmetryPlane {
    pub axis: SymmetryAxis,
    pub offset: f32,
}

impl SymmetryPlane {
    pub fn new(axis: SymmetryAxis, offset: f32) -> Self {
        Self { axis, offset }
    }

    /// Signed distance from the plane
    pub fn distance(&self, p: &Point3f) -> f32 {
        p[self.axis.index()] - self.offset
    }

    pub fn project(&self, p: &Point3f) -> Point3f {
        let mut q = *p;
        q[self.axis.index()] = self.offset;
        q
    }

    pub fn reflect(&self, p: &Point3f) -> Point3f {
        let mut q = *p;
        let a = self.axis.index();
        q[a] = 2.0 * self.offset - p[a];
        q
    }
}

/// Symmetry the reducer keeps. Without a plane, one is detected per mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymmetryConstraint {
    pub plane: Option<SymmetryPlane>,
    /// Matching distance, relative to the mesh bounding box diagonal
    pub tolerance: f32,
}

impl SymmetryConstraint {
    /// Plane and absolute matching distance for a mesh, `None` when
    /// detection finds no plane
    pub fn resolve(&self, coords: &[Point3f]) -> Option<(SymmetryPlane, f32)> {
        let (min, max) = bounds_of(coords.iter());
        let tolerance = self.tolerance * (max - min).norm();
        match self.plane {
            Some(plane) => Some((plane, tolerance)),
            None => detect_plane(coords, tolerance).map(|(plane, _)| (plane, tolerance)),
        }
    }
}

fn squared_distance(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    (0..3).map(|i| (a[i] - b[i]) * (a[i] - b[i])).sum()
}

/// Mirror partner of every vertex: itself on the plane, `None` when unmatched
pub fn mirror_vertices(coords: &[Point3f], plane: &SymmetryPlane, tolerance: f32) -> Vec<Option<usize>> {
    let tree = RTree::bulk_load(
        coords
            .iter()
            .enumerate()
            .map(|(i, p)| VertexPoint::new([p.x, p.y, p.z], i))
            .collect(),
    );
    let on_plane = |p: &Point3f| plane.distance(p).abs() <= tolerance;
    let radius2 = tolerance * tolerance;
    let nearest: Vec<Option<usize>> = coords
        .iter()
        .enumerate()
        .map(|(v, p)| {
            if on_plane(p) {
                return Some(v);
            }
            let m = plane.reflect(p);
            let query = [m.x, m.y, m.z];
            tree.locate_within_distance(query, radius2)
                .filter(|c| c.data != v && !on_plane(&coords[c.data]))
                .min_by(|a, b| {
                    squared_distance(a.geom(), &query)
                        .total_cmp(&squared_distance(b.geom(), &query))
                        .then(a.data.cmp(&b.data))
                })
                .map(|c| c.data)
        })
        .collect();
    nearest
        .iter()
        .enumerate()
        .map(|(v, &m)| m.filter(|&u| u == v || nearest[u] == Some(v)))
        .collect()
}

/// Best of the three axis planes through the bounding box center, with the
/// share of vertices it pairs
pub fn detect_plane(coords: &[Point3f], tolerance: f32) -> Option<(SymmetryPlane, f32)> {
    if coords.is_empty() {
        return None;
    }
    let (min, max) = bounds_of(coords.iter());
    let center = (min.coords + max.coords) * 0.5;
    SymmetryAxis::ALL
        .iter()
        .map(|&axis| {
            let plane = SymmetryPlane::new(axis, center[axis.index()]);
            let paired = mirror_vertices(coords, &plane, tolerance).iter().flatten().count();
            (plane, paired as f32 / coords.len() as f32)
        })
        .min_by(|a, b| b.1.total_cmp(&a.1))
        .filter(|(_, fraction)| *fraction >= MIN_DETECTED_FRACTION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_plane_reflect_and_project() {
        let plane = SymmetryPlane::new(SymmetryAxis::Y, 1.0);
        let p = Point3f::new(3.0, 4.0, 5.0);
        assert_relative_eq!(plane.reflect(&p), Point3f::new(3.0, -2.0, 5.0));
        assert_relative_eq!(plane.project(&p), Point3f::new(3.0, 1.0, 5.0));
        assert_relative_eq!(plane.distance(&p), 3.0);
    }

    #[test]
    fn test_mirror_pairs_are_mutual() {
        let coords = vec![
            Point3f::new(-1.0, 0.0, 0.0),
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(0.0, 1.0, 0.0),
            // no partner at (-2, 1, 0)
            Point3f::new(2.0, 1.0, 0.0),
        ];
        let mirror = mirror_vertices(&coords, &SymmetryPlane::new(SymmetryAxis::X, 0.0), 1e-3);
        assert_eq!(mirror, vec![Some(1), Some(0), Some(2), None]);
    }

    #[test]
    fn test_detects_the_symmetric_axis() {
        // symmetric about x = 2, not about the y or z center planes
        let coords = vec![
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(3.0, 0.0, 0.0),
            Point3f::new(1.0, 1.0, 3.0),
            Point3f::new(3.0, 1.0, 3.0),
            Point3f::new(2.0, 5.0, 0.5),
        ];
        let (plane, fraction) = detect_plane(&coords, 1e-3).unwrap();
        assert_eq!(plane.axis, SymmetryAxis::X);
        assert_relative_eq!(plane.offset, 2.0);
        assert_relative_eq!(fraction, 1.0);

        let lopsided = vec![
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(1.0, 0.3, 0.0),
            Point3f::new(0.2, 1.0, 0.7),
            Point3f::new(0.9, 0.8, 1.0),
        ];
        assert!(detect_plane(&lopsided, 1e-3).is_none());
    }
}
