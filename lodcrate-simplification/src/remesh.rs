//! Vertex-clustering remeshing
//!
//! Implements Rossignac & Borrel (1993) vertex clustering on a uniform grid
//! whose cell size follows the on-screen size target: one cell per pixel
//! of the bounding sphere's diameter. Each cell is represented by the
//! position minimizing the summed quadric error of its vertices. Border
//! loops left in the result can be closed by hole filling.

use std::collections::{BTreeMap, HashSet};

use lodcrate_core::{Bounded, Error, GeometryData, Point3f, ProgressTracker, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::normals::{calculate_normals, NormalCalculationSettings};
use crate::quadric::Quadric;
use crate::settings::on_screen_size_deviation;

/// Largest border loop, in edges, closed by each hole filling level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HoleFilling {
    #[default]
    Disabled,
    Low,
    Medium,
    High,
}

impl HoleFilling {
    pub fn max_hole_edges(&self) -> usize {
        match self {
            HoleFilling::Disabled => 0,
            HoleFilling::Low => 8,
            HoleFilling::Medium => 32,
            HoleFilling::High => 128,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemeshingSettings {
    /// Target diameter in pixels
    pub on_screen_size: u32,
    pub hole_filling: HoleFilling,
    /// Only meshes in this selection set are remeshed
    pub process_selection_set_name: Option<String>,
    /// Hard edge angle (degrees) for the normals of the new surface
    pub hard_edge_angle: f32,
}

impl Default for RemeshingSettings {
    fn default() -> Self {
        Self {
            on_screen_size: 300,
            hole_filling: HoleFilling::Disabled,
            process_selection_set_name: None,
            hard_edge_angle: 80.0,
        }
    }
}

impl RemeshingSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_on_screen_size(mut self, pixels: u32) -> Self {
        self.on_screen_size = pixels;
        self
    }

    pub fn with_hole_filling(mut self, hole_filling: HoleFilling) -> Self {
        self.hole_filling = hole_filling;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.on_screen_size < 20 || self.on_screen_size > 100_000 {
            return Err(Error::InvalidSettings(format!(
                "on-screen size {} is outside 20..=100000 pixels",
                self.on_screen_size
            )));
        }
        Ok(())
    }
}

type CellKey = (i64, i64, i64);

fn cell_of(p: &Point3f, origin: &Point3f, cell_size: f64) -> CellKey {
    (
        ((p.x - origin.x) as f64 / cell_size).floor() as i64,
        ((p.y - origin.y) as f64 / cell_size).floor() as i64,
        ((p.z - origin.z) as f64 / cell_size).floor() as i64,
    )
}

/// Position minimizing the summed quadric error of `cluster`, kept inside
/// a cell-sized neighborhood of the cluster
fn representative(cluster: &[usize], coords: &[Point3f], quadrics: &[Quadric], cell_size: f64) -> Point3f {
    let q = cluster.iter().fold(Quadric::zero(), |acc, &v| acc + quadrics[v]);
    let n = cluster.len() as f32;
    let centroid = Point3f::from(cluster.iter().fold(nalgebra::Vector3::zeros(), |acc, &v| acc + coords[v].coords) / n);
    if let Some(p) = q.optimal() {
        if ((p - centroid).norm() as f64) <= cell_size {
            return p;
        }
    }
    // Fallback: the member vertex with minimum quadric error
    cluster
        .iter()
        .map(|&v| coords[v])
        .min_by(|a, b| q.evaluate(a).total_cmp(&q.evaluate(b)))
        .unwrap_or(centroid)
}

/// Close border loops of at most `max_edges` edges with a fan around their
/// centroid. Returns the number of holes filled.
fn fill_holes(coords: &mut Vec<Point3f>, triangles: &mut Vec<[usize; 3]>, max_edges: usize) -> usize {
    if max_edges == 0 {
        return 0;
    }
    let mut directed: HashSet<(usize, usize)> = HashSet::new();
    for tri in triangles.iter() {
        for k in 0..3 {
            directed.insert((tri[k], tri[(k + 1) % 3]));
        }
    }
    // border half-edges have no opposite
    let mut next: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for &(a, b) in &directed {
        if !directed.contains(&(b, a)) {
            next.entry(a).or_default().push(b);
        }
    }

    let mut visited: HashSet<usize> = HashSet::new();
    let mut filled = 0;
    let starts: Vec<usize> = next.keys().copied().collect();
    for start in starts {
        if visited.contains(&start) {
            continue;
        }
        let mut loop_vertices = vec![start];
        let mut current = start;
        let closed = loop {
            let Some(targets) = next.get(&current) else {
                break false;
            };
            if targets.len() != 1 {
                break false;
            }
            current = targets[0];
            if current == start {
                break true;
            }
            if loop_vertices.len() > max_edges || loop_vertices.contains(&current) {
                break false;
            }
            loop_vertices.push(current);
        };
        visited.extend(loop_vertices.iter().copied());
        if !closed || loop_vertices.len() < 3 || loop_vertices.len() > max_edges {
            continue;
        }

        let n = loop_vertices.len();
        if n == 3 {
            triangles.push([loop_vertices[1], loop_vertices[0], loop_vertices[2]]);
        } else {
            let centroid = Point3f::from(
                loop_vertices
                    .iter()
                    .fold(nalgebra::Vector3::zeros(), |acc, &v| acc + coords[v].coords)
                    / n as f32,
            );
            let c = coords.len();
            coords.push(centroid);
            for i in 0..n {
                let (a, b) = (loop_vertices[i], loop_vertices[(i + 1) % n]);
                triangles.push([b, a, c]);
            }
        }
        filled += 1;
    }
    filled
}

/// Build a new surface approximating `geometry` at the settings' on-screen size
pub fn remesh(
    geometry: &GeometryData,
    settings: &RemeshingSettings,
    progress: Option<&ProgressTracker>,
) -> Result<GeometryData> {
    settings.validate()?;
    if geometry.is_empty() {
        return Err(Error::InvalidData(format!("{}: geometry has no triangles", geometry.name)));
    }
    geometry.validate()?;

    let (min, _) = geometry.bounding_box();
    let diameter = geometry.radius() as f64 * 2.0;
    let cell_size = on_screen_size_deviation(diameter, settings.on_screen_size);
    if cell_size <= 0.0 || !cell_size.is_finite() {
        return Err(Error::InvalidData(format!("{}: geometry has no extent", geometry.name)));
    }

    let face_quadrics: Vec<Quadric> = geometry
        .triangles
        .par_iter()
        .enumerate()
        .map(|(t, &[a, b, c])| {
            let area = geometry.triangle_area(t) as f64;
            Quadric::from_triangle(&geometry.coords[a], &geometry.coords[b], &geometry.coords[c], area)
        })
        .collect();
    let mut quadrics = vec![Quadric::zero(); geometry.vertex_count()];
    for (tri, q) in geometry.triangles.iter().zip(&face_quadrics) {
        for &v in tri {
            quadrics[v] += *q;
        }
    }
    if let Some(progress) = progress {
        progress.report(20.0)?;
    }

    let mut cells: BTreeMap<CellKey, Vec<usize>> = BTreeMap::new();
    let mut used = vec![false; geometry.vertex_count()];
    for tri in &geometry.triangles {
        for &v in tri {
            used[v] = true;
        }
    }
    for (v, p) in geometry.coords.iter().enumerate() {
        if used[v] {
            cells.entry(cell_of(p, &min, cell_size)).or_default().push(v);
        }
    }

    let mut vertex_to_cluster = vec![usize::MAX; geometry.vertex_count()];
    let mut coords = Vec::with_capacity(cells.len());
    for (ci, cluster) in cells.values().enumerate() {
        for &v in cluster {
            vertex_to_cluster[v] = ci;
        }
        coords.push(if cluster.len() == 1 {
            geometry.coords[cluster[0]]
        } else {
            representative(cluster, &geometry.coords, &quadrics, cell_size)
        });
    }
    if let Some(progress) = progress {
        progress.report(60.0)?;
    }

    // Remap faces, filtering degenerate and duplicate triangles
    let mut triangles = Vec::new();
    let mut seen_faces: HashSet<[usize; 3]> = HashSet::new();
    for face in &geometry.triangles {
        let mapped = face.map(|v| vertex_to_cluster[v]);
        if mapped[0] == mapped[1] || mapped[1] == mapped[2] || mapped[2] == mapped[0] {
            continue;
        }
        let mut sorted = mapped;
        sorted.sort_unstable();
        if seen_faces.insert(sorted) {
            triangles.push(mapped);
        }
    }

    let holes = fill_holes(&mut coords, &mut triangles, settings.hole_filling.max_hole_edges());

    let mut remeshed = GeometryData::from_coords_and_triangles(geometry.name.clone(), coords, triangles);
    remeshed.remove_unused_vertices();
    let normal_settings = NormalCalculationSettings {
        hard_edge_angle: settings.hard_edge_angle,
        ..NormalCalculationSettings::default()
    };
    calculate_normals(&mut remeshed, &normal_settings)?;
    if let Some(progress) = progress {
        progress.report(100.0)?;
    }
    log::info!(
        "{}: remeshed {} -> {} triangles with cell size {:.5}, filled {} holes",
        geometry.name,
        geometry.triangle_count(),
        remeshed.triangle_count(),
        cell_size,
        holes
    );
    Ok(remeshed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sphere(rings: usize, segments: usize) -> GeometryData {
        let mut coords = vec![Point3f::new(0.0, 0.0, 1.0)];
        for r in 1..rings {
            let phi = std::f32::consts::PI * r as f32 / rings as f32;
            for s in 0..segments {
                let theta = 2.0 * std::f32::consts::PI * s as f32 / segments as f32;
                coords.push(Point3f::new(phi.sin() * theta.cos(), phi.sin() * theta.sin(), phi.cos()));
            }
        }
        coords.push(Point3f::new(0.0, 0.0, -1.0));
        let south = coords.len() - 1;
        let ring = |r: usize, s: usize| 1 + (r - 1) * segments + s % segments;
        let mut triangles = Vec::new();
        for s in 0..segments {
            triangles.push([0, ring(1, s), ring(1, s + 1)]);
            triangles.push([south, ring(rings - 1, s + 1), ring(rings - 1, s)]);
        }
        for r in 1..(rings - 1) {
            for s in 0..segments {
                triangles.push([ring(r, s), ring(r + 1, s), ring(r + 1, s + 1)]);
                triangles.push([ring(r, s), ring(r + 1, s + 1), ring(r, s + 1)]);
            }
        }
        GeometryData::from_coords_and_triangles("sphere", coords, triangles)
    }

    fn open_box() -> GeometryData {
        let coords = vec![
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(1.0, 1.0, 0.0),
            Point3f::new(0.0, 1.0, 0.0),
            Point3f::new(0.0, 0.0, 1.0),
            Point3f::new(1.0, 0.0, 1.0),
            Point3f::new(1.0, 1.0, 1.0),
            Point3f::new(0.0, 1.0, 1.0),
        ];
        // bottom and four sides, top left open
        let triangles = vec![
            [0, 2, 1],
            [0, 3, 2],
            [0, 1, 5],
            [0, 5, 4],
            [1, 2, 6],
            [1, 6, 5],
            [2, 3, 7],
            [2, 7, 6],
            [3, 0, 4],
            [3, 4, 7],
        ];
        GeometryData::from_coords_and_triangles("box", coords, triangles)
    }

    fn border_edge_count(g: &GeometryData) -> usize {
        let mut directed = HashSet::new();
        for t in &g.triangles {
            for k in 0..3 {
                directed.insert((t[k], t[(k + 1) % 3]));
            }
        }
        directed.iter().filter(|(a, b)| !directed.contains(&(*b, *a))).count()
    }

    #[test]
    fn test_remesh_coarsens_dense_sphere() {
        let sphere = make_sphere(80, 160);
        let remeshed = remesh(&sphere, &RemeshingSettings::default().with_on_screen_size(20), None).unwrap();
        assert!(remeshed.triangle_count() < sphere.triangle_count() / 2);
        assert!(remeshed.triangle_count() > 0);
        assert!(remeshed.normals.is_some());
        assert!(remeshed.tex_coords(0).is_none());
        assert!(remeshed.validate().is_ok());
        assert!(remeshed.vertex_count() < sphere.vertex_count() / 2);
    }

    #[test]
    fn test_remesh_is_deterministic() {
        let sphere = make_sphere(16, 32);
        let settings = RemeshingSettings::default().with_on_screen_size(25);
        let a = remesh(&sphere, &settings, None).unwrap();
        let b = remesh(&sphere, &settings, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_hole_filling_closes_open_box() {
        let settings = RemeshingSettings::default().with_on_screen_size(300);
        let open = remesh(&open_box(), &settings, None).unwrap();
        assert_eq!(border_edge_count(&open), 4);

        let closed = remesh(&open_box(), &settings.clone().with_hole_filling(HoleFilling::Low), None).unwrap();
        assert_eq!(border_edge_count(&closed), 0);
        assert_eq!(closed.triangle_count(), 14);
    }

    #[test]
    fn test_hole_larger_than_limit_stays_open() {
        let sphere = make_sphere(12, 40);
        let keep: Vec<bool> = (0..sphere.triangle_count()).map(|t| t >= 80).collect();
        let mut open = sphere.clone();
        // drop both polar caps: two 40-edge holes
        open.retain_triangles(&keep);
        let settings = RemeshingSettings::default().with_on_screen_size(1000);
        let medium = remesh(&open, &settings.clone().with_hole_filling(HoleFilling::Medium), None).unwrap();
        assert_eq!(border_edge_count(&medium), 80);
        let high = remesh(&open, &settings.with_hole_filling(HoleFilling::High), None).unwrap();
        assert_eq!(border_edge_count(&high), 0);
    }

    #[test]
    fn test_invalid_settings() {
        let settings = RemeshingSettings::default().with_on_screen_size(5);
        assert!(matches!(remesh(&open_box(), &settings, None), Err(Error::InvalidSettings(_))));
    }
}
