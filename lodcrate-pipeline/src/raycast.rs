//! Ray queries against scene-space triangles
//!
//! Triangles are indexed by their bounding boxes in an R-tree. A ray walks
//! the tree through a selection function that only opens boxes it passes
//! through, then intersects the candidate triangles exactly.

use lodcrate_core::{bounds_of, GeometryData, Point3f, Vector3f};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, RTreeObject, SelectionFunction, AABB};

/// Triangle box with (mesh, triangle, slot in `corners`)
type TriangleBox = GeomWithData<Rectangle<[f32; 3]>, (u32, u32, u32)>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Point3f,
    /// Unit length
    pub direction: Vector3f,
    pub max_distance: f32,
}

impl Ray {
    pub fn new(origin: Point3f, direction: Vector3f, max_distance: f32) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
            max_distance,
        }
    }

    /// Ray from `from` ending just short of `to`
    pub fn between(from: Point3f, to: Point3f) -> Self {
        let d = to - from;
        let length = d.norm();
        Self::new(from, d, length * (1.0 - 1e-4))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub mesh: u32,
    pub triangle: u32,
    pub distance: f32,
}

/// Slab test of a ray segment against boxes
struct RaySelection {
    origin: [f32; 3],
    inverse: [f32; 3],
    max_distance: f32,
}

impl RaySelection {
    fn new(ray: &Ray) -> Self {
        Self {
            origin: [ray.origin.x, ray.origin.y, ray.origin.z],
            inverse: [1.0 / ray.direction.x, 1.0 / ray.direction.y, 1.0 / ray.direction.z],
            max_distance: ray.max_distance,
        }
    }

    fn crosses(&self, envelope: &AABB<[f32; 3]>) -> bool {
        let (lower, upper) = (envelope.lower(), envelope.upper());
        let (mut near, mut far) = (0.0f32, self.max_distance);
        for axis in 0..3 {
            let a = (lower[axis] - self.origin[axis]) * self.inverse[axis];
            let b = (upper[axis] - self.origin[axis]) * self.inverse[axis];
            // a parallel ray starting on a slab plane gives NaN, which max/min skip
            near = near.max(a.min(b));
            far = far.min(a.max(b));
            if near > far {
                return false;
            }
        }
        true
    }
}

impl SelectionFunction<TriangleBox> for RaySelection {
    fn should_unpack_parent(&self, envelope: &AABB<[f32; 3]>) -> bool {
        self.crosses(envelope)
    }

    fn should_unpack_leaf(&self, leaf: &TriangleBox) -> bool {
        self.crosses(&leaf.envelope())
    }
}

/// Möller-Trumbore; distance along the ray when it crosses the triangle
fn intersect(ray: &Ray, [a, b, c]: &[Point3f; 3]) -> Option<f32> {
    let e1 = b - a;
    let e2 = c - a;
    let p = ray.direction.cross(&e2);
    let det = e1.dot(&p);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv = 1.0 / det;
    let s = ray.origin - a;
    let u = s.dot(&p) * inv;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(&e1);
    let v = ray.direction.dot(&q) * inv;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(&q) * inv;
    (t > 0.0 && t <= ray.max_distance).then_some(t)
}

/// Every triangle of a mesh list, ready for ray queries
pub struct RayIndex {
    corners: Vec<[Point3f; 3]>,
    tree: RTree<TriangleBox>,
    diameter: f32,
}

impl RayIndex {
    pub fn new<'g>(meshes: impl IntoIterator<Item = &'g GeometryData>) -> Self {
        let mut corners = Vec::new();
        let mut boxes = Vec::new();
        for (m, g) in meshes.into_iter().enumerate() {
            for (t, tri) in g.triangles.iter().enumerate() {
                let points = tri.map(|v| g.coords[v]);
                let (min, max) = bounds_of(points.iter());
                boxes.push(GeomWithData::new(
                    Rectangle::from_corners([min.x, min.y, min.z], [max.x, max.y, max.z]),
                    (m as u32, t as u32, corners.len() as u32),
                ));
                corners.push(points);
            }
        }
        let (min, max) = bounds_of(corners.iter().flatten());
        Self {
            diameter: if corners.is_empty() { 0.0 } else { (max - min).norm() },
            corners,
            tree: RTree::bulk_load(boxes),
        }
    }

    pub fn diameter(&self) -> f32 {
        self.diameter
    }

    pub fn is_empty(&self) -> bool {
        self.corners.is_empty()
    }

    fn candidates<'s>(&'s self, ray: &Ray) -> impl Iterator<Item = (u32, u32, f32)> + 's {
        let ray = *ray;
        self.tree
            .locate_with_selection_function(RaySelection::new(&ray))
            .filter_map(move |item| {
                let (mesh, triangle, slot) = item.data;
                intersect(&ray, &self.corners[slot as usize]).map(|t| (mesh, triangle, t))
            })
    }

    /// Closest crossing along the ray
    pub fn first_hit(&self, ray: &Ray) -> Option<RayHit> {
        self.candidates(ray)
            .min_by(|a, b| a.2.total_cmp(&b.2).then((a.0, a.1).cmp(&(b.0, b.1))))
            .map(|(mesh, triangle, distance)| RayHit {
                mesh,
                triangle,
                distance,
            })
    }

    /// Whether any triangle other than `skip` crosses the ray
    pub fn is_blocked(&self, ray: &Ray, skip: Option<(u32, u32)>) -> bool {
        self.candidates(ray)
            .any(|(mesh, triangle, _)| skip != Some((mesh, triangle)))
    }
}
