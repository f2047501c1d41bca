//! Vertex welding and T-junction removal

use std::collections::HashMap;

use itertools::Itertools;
use lodcrate_core::{Color, Error, GeometryData, QuadFlag, Result, Vector2f, Vector3f};
use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::{Deserialize, Serialize};

/// Parameter margin that keeps split points off the edge endpoints
const SPLIT_MARGIN: f32 = 1e-4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairSettings {
    pub use_welding: bool,
    /// Vertices closer than this are merged; 0 merges exact duplicates only
    pub weld_dist: f32,
    /// Requires welding
    pub use_t_junction_remover: bool,
    /// How far a border vertex may lie from a border edge and still split it
    pub t_junc_dist: f32,
    /// Maximum number of T-junction passes
    pub progressive_passes: u32,
    pub weld_only_border_vertices: bool,
    pub weld_only_within_material: bool,
}

impl Default for RepairSettings {
    fn default() -> Self {
        Self {
            use_welding: false,
            weld_dist: 0.0,
            use_t_junction_remover: false,
            t_junc_dist: 0.0,
            progressive_passes: 3,
            weld_only_border_vertices: false,
            weld_only_within_material: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepairStats {
    pub welded_vertices: usize,
    pub removed_triangles: usize,
    pub split_triangles: usize,
    pub passes: u32,
}

impl RepairSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.use_welding || self.use_t_junction_remover
    }

    pub fn validate(&self) -> Result<()> {
        if self.use_t_junction_remover && !self.use_welding {
            return Err(Error::InvalidSettings(
                "the T-junction remover requires welding to be enabled".into(),
            ));
        }
        if self.weld_dist < 0.0 || !self.weld_dist.is_finite() {
            return Err(Error::InvalidSettings(format!("weld distance {} is invalid", self.weld_dist)));
        }
        if self.t_junc_dist < 0.0 || !self.t_junc_dist.is_finite() {
            return Err(Error::InvalidSettings(format!(
                "T-junction distance {} is invalid",
                self.t_junc_dist
            )));
        }
        Ok(())
    }
}

/// Run the enabled repair steps on `geometry`
pub fn repair(geometry: &mut GeometryData, settings: &RepairSettings) -> Result<RepairStats> {
    settings.validate()?;
    let mut stats = RepairStats::default();
    if settings.use_welding {
        let triangles = geometry.triangle_count();
        stats.welded_vertices = weld(geometry, settings);
        stats.removed_triangles = triangles - geometry.triangle_count();
    }
    if settings.use_t_junction_remover {
        for _ in 0..settings.progressive_passes.max(1) {
            let split = remove_t_junctions(geometry, settings);
            stats.passes += 1;
            stats.split_triangles += split;
            if split == 0 {
                break;
            }
        }
    }
    log::debug!(
        "{}: welded {} vertices, removed {} degenerate triangles, split {} triangles",
        geometry.name,
        stats.welded_vertices,
        stats.removed_triangles,
        stats.split_triangles
    );
    Ok(stats)
}

/// Edges used by exactly one triangle
fn border_edges(geometry: &GeometryData) -> HashMap<(usize, usize), usize> {
    let mut counts: HashMap<(usize, usize), (usize, usize)> = HashMap::new();
    for (t, tri) in geometry.triangles.iter().enumerate() {
        for k in 0..3 {
            let (a, b) = (tri[k], tri[(k + 1) % 3]);
            let entry = counts.entry((a.min(b), a.max(b))).or_insert((0, t));
            entry.0 += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(_, (count, _))| *count == 1)
        .map(|(edge, (_, t))| (edge, t))
        .collect()
}

fn border_vertices(geometry: &GeometryData) -> Vec<bool> {
    let mut border = vec![false; geometry.vertex_count()];
    for (a, b) in border_edges(geometry).into_keys() {
        border[a] = true;
        border[b] = true;
    }
    border
}

fn vertex_materials(geometry: &GeometryData) -> Vec<Vec<usize>> {
    let mut materials = vec![Vec::new(); geometry.vertex_count()];
    for (t, tri) in geometry.triangles.iter().enumerate() {
        let id = geometry.material_id(t);
        for &v in tri {
            if !materials[v].contains(&id) {
                materials[v].push(id);
            }
        }
    }
    materials
}

type WeldPoint = GeomWithData<[f32; 3], usize>;

/// Merge vertices closer than `weld_dist` into the lowest-indexed one and
/// drop triangles that become degenerate. Returns the number of merged vertices.
pub fn weld(geometry: &mut GeometryData, settings: &RepairSettings) -> usize {
    let n = geometry.vertex_count();
    let border = if settings.weld_only_border_vertices {
        border_vertices(geometry)
    } else {
        vec![true; n]
    };
    let materials = if settings.weld_only_within_material {
        Some(vertex_materials(geometry))
    } else {
        None
    };
    let compatible = |a: usize, b: usize| match &materials {
        Some(m) => m[a].iter().any(|id| m[b].contains(id)),
        None => true,
    };

    let mut target: Vec<usize> = (0..n).collect();
    if settings.weld_dist > 0.0 {
        let tree = RTree::bulk_load(
            (0..n)
                .filter(|&v| border[v])
                .map(|v| WeldPoint::new(geometry.coords[v].coords.into(), v))
                .collect(),
        );
        let radius2 = settings.weld_dist * settings.weld_dist;
        for v in (0..n).filter(|&v| border[v]) {
            let p: [f32; 3] = geometry.coords[v].coords.into();
            let representative = tree
                .locate_within_distance(p, radius2)
                .map(|other| other.data)
                .filter(|&u| u < v && target[u] == u && compatible(u, v))
                .min();
            if let Some(u) = representative {
                target[v] = u;
            }
        }
    } else {
        let mut exact: HashMap<[u32; 3], Vec<usize>> = HashMap::new();
        for v in (0..n).filter(|&v| border[v]) {
            let p = geometry.coords[v];
            let key = [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()];
            let bucket = exact.entry(key).or_default();
            match bucket.iter().copied().find(|&u| compatible(u, v)) {
                Some(u) => target[v] = u,
                None => bucket.push(v),
            }
        }
    }

    let merged = (0..n).filter(|&v| target[v] != v).count();
    if merged == 0 {
        return 0;
    }
    if let Some(locks) = &mut geometry.vertex_locks {
        for v in 0..n {
            if locks[v] {
                locks[target[v]] = true;
            }
        }
    }
    for tri in &mut geometry.triangles {
        for v in tri.iter_mut() {
            *v = target[*v];
        }
    }
    let keep: Vec<bool> = geometry
        .triangles
        .iter()
        .map(|t| t[0] != t[1] && t[1] != t[2] && t[2] != t[0])
        .collect();
    geometry.retain_triangles(&keep);
    geometry.remove_unused_vertices();
    merged
}

#[derive(Debug, Clone, Copy)]
enum CornerSource {
    Corner(usize),
    /// Interpolated between two corners of the same triangle
    Lerp(usize, usize, f32),
}

fn resample<T: Copy>(channel: &[T], sources: &[CornerSource], lerp: impl Fn(T, T, f32) -> T) -> Vec<T> {
    sources
        .iter()
        .map(|s| match *s {
            CornerSource::Corner(c) => channel[c],
            CornerSource::Lerp(a, b, t) => lerp(channel[a], channel[b], t),
        })
        .collect()
}

/// Split triangles whose border edge passes through another border vertex.
/// Returns the number of triangles that were split.
pub fn remove_t_junctions(geometry: &mut GeometryData, settings: &RepairSettings) -> usize {
    let edges = border_edges(geometry);
    if edges.is_empty() {
        return 0;
    }
    let border = border_vertices(geometry);
    let tree: RTree<WeldPoint> = RTree::bulk_load(
        (0..geometry.vertex_count())
            .filter(|&v| border[v])
            .map(|v| WeldPoint::new(geometry.coords[v].coords.into(), v))
            .collect(),
    );

    // For each triangle, the first border edge with vertices on it
    let mut splits: HashMap<usize, (usize, Vec<(f32, usize)>)> = HashMap::new();
    let mut sorted_edges: Vec<_> = edges.into_iter().collect();
    sorted_edges.sort_unstable();
    for ((a, b), t) in sorted_edges {
        if splits.contains_key(&t) {
            continue;
        }
        let (pa, pb) = (geometry.coords[a], geometry.coords[b]);
        let dir = pb - pa;
        let len = dir.norm();
        if len <= f32::EPSILON {
            continue;
        }
        let tolerance = settings.t_junc_dist.max(len * 1e-5);
        let mid: [f32; 3] = ((pa.coords + pb.coords) * 0.5).into();
        let reach = len * 0.5 + tolerance;
        let mut on_edge: Vec<(f32, usize)> = tree
            .locate_within_distance(mid, reach * reach)
            .map(|p| p.data)
            .filter(|&v| v != a && v != b)
            .filter_map(|v| {
                let offset = geometry.coords[v] - pa;
                let s = offset.dot(&dir) / (len * len);
                let distance = (offset - dir * s).norm();
                (s > SPLIT_MARGIN && s < 1.0 - SPLIT_MARGIN && distance <= tolerance).then_some((s, v))
            })
            .collect();
        if on_edge.is_empty() {
            continue;
        }
        on_edge.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)));
        let tri = geometry.triangles[t];
        let k = (0..3)
            .find(|&k| (tri[k], tri[(k + 1) % 3]) == (a, b) || (tri[k], tri[(k + 1) % 3]) == (b, a))
            .unwrap_or(0);
        // parameters run from corner k to corner k+1
        if tri[k] != a {
            for entry in &mut on_edge {
                entry.0 = 1.0 - entry.0;
            }
            on_edge.reverse();
        }
        splits.insert(t, (k, on_edge));
    }
    if splits.is_empty() {
        return 0;
    }

    let mut triangles = Vec::new();
    let mut sources = Vec::new();
    let mut parents = Vec::new();
    for (t, tri) in geometry.triangles.iter().enumerate() {
        let base = t * 3;
        match splits.get(&t) {
            None => {
                triangles.push(*tri);
                sources.extend((0..3).map(|k| CornerSource::Corner(base + k)));
                parents.push(t);
            }
            Some((k, points)) => {
                let (k0, k1, k2) = (*k, (k + 1) % 3, (k + 2) % 3);
                let mut chain = vec![(0.0f32, tri[k0], CornerSource::Corner(base + k0))];
                chain.extend(
                    points
                        .iter()
                        .map(|&(s, v)| (s, v, CornerSource::Lerp(base + k0, base + k1, s))),
                );
                chain.push((1.0, tri[k1], CornerSource::Corner(base + k1)));
                for (from, to) in chain.iter().tuple_windows() {
                    triangles.push([from.1, to.1, tri[k2]]);
                    sources.extend([from.2, to.2, CornerSource::Corner(base + k2)]);
                    parents.push(t);
                }
            }
        }
    }

    let g = &mut *geometry;
    for channel in g.tex_coords.iter_mut().flatten() {
        *channel = resample(channel, &sources, |a: Vector2f, b, t| a + (b - a) * t);
    }
    for channel in g.colors.iter_mut().flatten() {
        *channel = resample(channel, &sources, |a: Color, b, t| a + (b - a) * t);
    }
    if let Some(normals) = &mut g.normals {
        *normals = resample(normals, &sources, |a: Vector3f, b, t| {
            let n = a + (b - a) * t;
            n.try_normalize(f32::EPSILON).unwrap_or(a)
        });
    }
    if let Some(tangents) = &mut g.tangents {
        *tangents = resample(tangents, &sources, |a: Vector3f, b, t| {
            let n = a + (b - a) * t;
            n.try_normalize(f32::EPSILON).unwrap_or(a)
        });
    }
    if let Some(ids) = &mut g.material_ids {
        *ids = parents.iter().map(|&t| ids[t]).collect();
    }
    if let Some(flags) = &mut g.quad_flags {
        *flags = parents
            .iter()
            .map(|&t| if splits.contains_key(&t) { QuadFlag::Triangle } else { flags[t] })
            .collect();
        // a quad whose partner was split is no longer a quad
        for i in 0..flags.len() {
            let partner_ok = match flags[i] {
                QuadFlag::FirstOfQuad => flags.get(i + 1) == Some(&QuadFlag::SecondOfQuad),
                QuadFlag::SecondOfQuad => i > 0 && flags[i - 1] == QuadFlag::FirstOfQuad,
                QuadFlag::Triangle => true,
            };
            if !partner_ok {
                flags[i] = QuadFlag::Triangle;
            }
        }
    }
    g.triangles = triangles;
    splits.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodcrate_core::Point3f;

    /// Two unit squares side by side with separate vertices along x = 1
    fn split_squares() -> GeometryData {
        GeometryData::from_coords_and_triangles(
            "split",
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(1.0, 1.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(2.0, 0.0, 0.0),
                Point3f::new(2.0, 1.0, 0.0),
                Point3f::new(1.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3], [4, 5, 6], [4, 6, 7]],
        )
    }

    #[test]
    fn test_t_junction_remover_requires_welding() {
        let settings = RepairSettings {
            use_t_junction_remover: true,
            ..RepairSettings::default()
        };
        assert!(matches!(settings.validate(), Err(Error::InvalidSettings(_))));
        let mut g = split_squares();
        assert!(repair(&mut g, &settings).is_err());
    }

    #[test]
    fn test_weld_exact_duplicates() {
        let mut g = split_squares();
        let merged = weld(&mut g, &RepairSettings::default());
        assert_eq!(merged, 2);
        assert_eq!(g.vertex_count(), 6);
        assert_eq!(g.triangle_count(), 4);
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_weld_within_distance_drops_degenerates() {
        let mut g = split_squares();
        g.coords[4].x += 0.01;
        g.coords[7].x -= 0.01;
        assert_eq!(weld(&mut g, &RepairSettings::default()), 0);
        let settings = RepairSettings {
            use_welding: true,
            weld_dist: 0.05,
            ..RepairSettings::default()
        };
        assert_eq!(weld(&mut g, &settings), 2);

        let mut sliver = GeometryData::from_coords_and_triangles(
            "sliver",
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(0.001, 0.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2]],
        );
        weld(&mut sliver, &settings);
        assert_eq!(sliver.triangle_count(), 0);
    }

    #[test]
    fn test_weld_only_within_material() {
        let mut g = split_squares();
        g.set_material_ids(&[0, 0, 1, 1]).unwrap();
        let settings = RepairSettings {
            use_welding: true,
            weld_only_within_material: true,
            ..RepairSettings::default()
        };
        assert_eq!(weld(&mut g, &settings), 0);
        assert_eq!(g.vertex_count(), 8);
    }

    #[test]
    fn test_t_junction_split() {
        // left square is split in two along y; right square is a single quad
        let mut g = GeometryData::from_coords_and_triangles(
            "tjunction",
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(1.0, 0.5, 0.0),
                Point3f::new(1.0, 1.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
                Point3f::new(2.0, 0.0, 0.0),
                Point3f::new(2.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 4], [4, 2, 3], [1, 5, 6], [1, 6, 3]],
        );
        let uv: Vec<f32> = g
            .triangles
            .iter()
            .flatten()
            .flat_map(|&v| [g.coords[v].x * 0.5, g.coords[v].y])
            .collect();
        g.set_tex_coords(0, &uv).unwrap();
        let settings = RepairSettings {
            use_welding: true,
            use_t_junction_remover: true,
            ..RepairSettings::default()
        };
        let stats = repair(&mut g, &settings).unwrap();
        assert_eq!(stats.split_triangles, 1);
        assert_eq!(g.triangle_count(), 6);
        assert!(g.validate().is_ok());
        // the new corner at (1, 0.5) interpolates the UVs of its edge
        let corner = g
            .triangles
            .iter()
            .enumerate()
            .skip(3)
            .find_map(|(t, tri)| tri.iter().position(|&v| v == 2).map(|k| t * 3 + k))
            .unwrap();
        let uv = g.tex_coords(0).unwrap()[corner];
        assert!((uv.x - 0.5).abs() < 1e-5 && (uv.y - 0.5).abs() < 1e-5);
        assert!(border_edges(&g).keys().all(|&(a, b)| !(a.min(b) == 1 && a.max(b) == 3)));
    }
}
