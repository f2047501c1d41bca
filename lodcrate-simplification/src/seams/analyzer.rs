//! Modular seam analysis

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use lodcrate_core::{Bounded, Error, GeometryData, Reporter, Result, Vector3f};
use priority_queue::PriorityQueue;
use rstar::primitives::GeomWithData;
use rstar::RTree;

use super::{ModularSeam, ModularSeams, SeamCollapse};
use crate::edge_collapse::{EdgeCollapseReducer, ForcedCollapse, ReductionTargets};
use crate::settings::ReductionSettings;

type BorderPoint = GeomWithData<[f32; 3], usize>;

/// Vertices on open borders, sorted, together with the undirected border
/// edges. Non-manifold edges are not borders.
pub(super) fn border_of(geometry: &GeometryData) -> (Vec<usize>, Vec<(usize, usize)>) {
    let mut counts: BTreeMap<(usize, usize), usize> = BTreeMap::new();
    for tri in &geometry.triangles {
        for k in 0..3 {
            let (a, b) = (tri[k], tri[(k + 1) % 3]);
            if a != b {
                *counts.entry((a.min(b), a.max(b))).or_default() += 1;
            }
        }
    }
    let edges: Vec<(usize, usize)> = counts
        .into_iter()
        .filter(|&(_, n)| n == 1)
        .map(|(e, _)| e)
        .collect();
    let vertices: BTreeSet<usize> = edges.iter().flat_map(|&(a, b)| [a, b]).collect();
    (vertices.into_iter().collect(), edges)
}

/// Vertices whose triangles do not form a single edge-connected fan, and
/// the end points of edges used by more than two triangles
pub(super) fn non_manifold_vertices(geometry: &GeometryData) -> BTreeSet<usize> {
    let mut edge_use: HashMap<(usize, usize), usize> = HashMap::new();
    // per vertex: (other vertex, triangle) for every edge around it
    let mut spokes: Vec<Vec<(usize, usize)>> = vec![Vec::new(); geometry.vertex_count()];
    for (t, tri) in geometry.triangles.iter().enumerate() {
        if tri[0] == tri[1] || tri[1] == tri[2] || tri[0] == tri[2] {
            continue;
        }
        for k in 0..3 {
            let (a, b) = (tri[k], tri[(k + 1) % 3]);
            *edge_use.entry((a.min(b), a.max(b))).or_default() += 1;
            spokes[a].push((b, t));
            spokes[b].push((a, t));
        }
    }

    let mut result: BTreeSet<usize> = edge_use
        .iter()
        .filter(|&(_, &n)| n > 2)
        .flat_map(|(&(a, b), _)| [a, b])
        .collect();
    for (v, around) in spokes.iter_mut().enumerate() {
        if around.is_empty() || result.contains(&v) {
            continue;
        }
        around.sort_unstable();
        let mut faces: Vec<usize> = around.iter().map(|&(_, t)| t).collect();
        faces.sort_unstable();
        faces.dedup();
        let index = |t: usize| faces.binary_search(&t).unwrap_or(0);
        let mut fan = UnionFind::new(faces.len());
        for pair in around.windows(2) {
            if pair[0].0 == pair[1].0 {
                fan.union(index(pair[0].1), index(pair[1].1));
            }
        }
        let root = fan.find(0);
        if (1..faces.len()).any(|i| fan.find(i) != root) {
            result.insert(v);
        }
    }
    result
}

/// Offset subtracted from positions before matching
pub(super) fn matching_origin(geometry: &GeometryData, translation_independent: bool) -> Vector3f {
    if translation_independent {
        geometry.bounding_box().0.coords
    } else {
        Vector3f::zeros()
    }
}

fn lexicographic(a: &[f32; 3], b: &[f32; 3]) -> Ordering {
    a[0].total_cmp(&b[0])
        .then(a[1].total_cmp(&b[1]))
        .then(a[2].total_cmp(&b[2]))
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // smaller root wins so the result does not depend on call order
            let (lo, hi) = (ra.min(rb), ra.max(rb));
            self.parent[hi] = lo;
        }
    }
}

/// A border vertex of one of the analysed geometries
struct BorderVertex {
    geometry: usize,
    vertex: usize,
    position: [f32; 3],
}

/// Positions within the tolerance of each other, merged transitively
struct Cluster {
    position: [f32; 3],
    geometries: BTreeSet<usize>,
    /// Two vertices of one geometry fell into this cluster
    ambiguous: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TrialCost {
    cost: f64,
    vertex: u32,
}

impl Eq for TrialCost {}

impl PartialOrd for TrialCost {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TrialCost {
    // Reversed: the priority queue pops the cheapest vertex, lowest index first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then(other.vertex.cmp(&self.vertex))
    }
}

/// Run of seam vertices between two fixed vertices
struct Chain {
    vertices: Vec<u32>,
    alive: Vec<bool>,
}

impl Chain {
    fn prev(&self, pos: usize) -> usize {
        (0..pos).rev().find(|&i| self.alive[i]).unwrap_or(0)
    }

    fn next(&self, pos: usize) -> usize {
        (pos + 1..self.vertices.len())
            .find(|&i| self.alive[i])
            .unwrap_or(self.vertices.len() - 1)
    }

    /// Largest distance of the original chain between `from` and `to` from
    /// the straight segment joining them
    fn deviation(&self, from: usize, to: usize, positions: &[[f32; 3]]) -> f64 {
        let point = |i: usize| {
            let [x, y, z] = positions[self.vertices[i] as usize];
            nalgebra::Vector3::new(x as f64, y as f64, z as f64)
        };
        let (a, b) = (point(from), point(to));
        let ab = b - a;
        let len2 = ab.norm_squared();
        (from + 1..to)
            .map(|i| {
                let p = point(i);
                let t = if len2 > 0.0 { ((p - a).dot(&ab) / len2).clamp(0.0, 1.0) } else { 0.0 };
                (p - (a + ab * t)).norm()
            })
            .fold(0.0, f64::max)
    }
}

/// Finds modular seams shared between geometries
#[derive(Debug, Clone)]
pub struct ModularSeamAnalyzer {
    /// Border vertices closer than this are the same vertex
    pub tolerance: f32,
    /// Match positions relative to each geometry's bounding box minimum
    pub is_translation_independent: bool,
    geometries: Vec<GeometryData>,
    reporter: Option<Reporter>,
}

impl ModularSeamAnalyzer {
    pub fn new(tolerance: f32) -> Self {
        Self {
            tolerance,
            is_translation_independent: false,
            geometries: Vec::new(),
            reporter: None,
        }
    }

    pub fn with_translation_independence(mut self, translation_independent: bool) -> Self {
        self.is_translation_independent = translation_independent;
        self
    }

    /// Report inconsistent seams to `reporter` as warnings
    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn add_geometry(&mut self, geometry: GeometryData) {
        self.geometries.push(geometry);
    }

    pub fn geometry_count(&self) -> usize {
        self.geometries.len()
    }

    fn warn(&self, text: String) {
        match &self.reporter {
            Some(reporter) => reporter.warning("ModularSeamAnalyzer", "analyze", text),
            None => log::warn!("{}", text),
        }
    }

    fn border_vertices(&self) -> (Vec<BorderVertex>, Vec<Vec<(usize, usize)>>) {
        let mut points = Vec::new();
        let mut edges = Vec::with_capacity(self.geometries.len());
        for (gi, geometry) in self.geometries.iter().enumerate() {
            let origin = matching_origin(geometry, self.is_translation_independent);
            let (vertices, border_edges) = border_of(geometry);
            for v in vertices {
                let p = geometry.coords[v] - origin;
                points.push(BorderVertex {
                    geometry: gi,
                    vertex: v,
                    position: [p.x, p.y, p.z],
                });
            }
            edges.push(border_edges);
        }
        (points, edges)
    }

    /// Merge border vertices within the tolerance. Returns the clusters
    /// sorted by position and the cluster of every border vertex.
    fn cluster(&self, points: &[BorderVertex]) -> (Vec<Cluster>, Vec<usize>) {
        let tree = RTree::bulk_load(
            points
                .iter()
                .enumerate()
                .map(|(i, p)| BorderPoint::new(p.position, i))
                .collect(),
        );
        let radius2 = self.tolerance * self.tolerance;
        let mut sets = UnionFind::new(points.len());
        for (i, p) in points.iter().enumerate() {
            for other in tree.locate_within_distance(p.position, radius2) {
                sets.union(i, other.data);
            }
        }

        let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..points.len() {
            members.entry(sets.find(i)).or_default().push(i);
        }
        let mut clusters: Vec<(Cluster, Vec<usize>)> = members
            .into_values()
            .map(|m| {
                let position = m
                    .iter()
                    .map(|&i| points[i].position)
                    .min_by(lexicographic)
                    .unwrap_or_default();
                let geometries: BTreeSet<usize> = m.iter().map(|&i| points[i].geometry).collect();
                let ambiguous = geometries.len() != m.len();
                (
                    Cluster {
                        position,
                        geometries,
                        ambiguous,
                    },
                    m,
                )
            })
            .collect();
        clusters.sort_by(|a, b| lexicographic(&a.0.position, &b.0.position).then(a.1.cmp(&b.1)));

        let mut cluster_of = vec![0; points.len()];
        for (c, (_, m)) in clusters.iter().enumerate() {
            for &i in m {
                cluster_of[i] = c;
            }
        }
        (clusters.into_iter().map(|(c, _)| c).collect(), cluster_of)
    }

    /// Find the seams shared by the added geometries and record their
    /// decimation order. Only the importances of `settings` are used.
    pub fn analyze(&self, settings: &ReductionSettings) -> Result<ModularSeams> {
        if !(self.tolerance >= 0.0) || !self.tolerance.is_finite() {
            return Err(Error::InvalidSettings(format!(
                "modular seam tolerance {} must be finite and non-negative",
                self.tolerance
            )));
        }
        if !(settings.geometry_importance >= 0.0) {
            return Err(Error::InvalidSettings("importances must be non-negative".into()));
        }
        if self.geometries.is_empty() {
            return Err(Error::InvalidData("no geometries were added to the analyzer".into()));
        }
        for geometry in &self.geometries {
            geometry.validate()?;
        }

        let (points, border_edges) = self.border_vertices();
        let (clusters, cluster_of) = self.cluster(&points);
        let lookup: HashMap<(usize, usize), usize> = points
            .iter()
            .enumerate()
            .map(|(i, p)| ((p.geometry, p.vertex), cluster_of[i]))
            .collect();
        let mut members: Vec<Vec<(usize, usize)>> = vec![Vec::new(); clusters.len()];
        for (i, p) in points.iter().enumerate() {
            members[cluster_of[i]].push((p.geometry, p.vertex));
        }
        let non_manifold: Vec<BTreeSet<usize>> = self.geometries.iter().map(non_manifold_vertices).collect();

        // Border edges in cluster space and the geometries they appear in
        let mut shared: BTreeMap<(usize, usize), BTreeSet<usize>> = BTreeMap::new();
        for (gi, edges) in border_edges.iter().enumerate() {
            for &(a, b) in edges {
                let (Some(&ca), Some(&cb)) = (lookup.get(&(gi, a)), lookup.get(&(gi, b))) else {
                    continue;
                };
                if ca != cb {
                    shared.entry((ca.min(cb), ca.max(cb))).or_default().insert(gi);
                }
            }
        }
        let seam_edges: Vec<((usize, usize), BTreeSet<usize>)> =
            shared.into_iter().filter(|(_, g)| g.len() >= 2).collect();

        // Adjacent seam edges shared by the same geometries form one seam
        let mut incident: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (e, ((a, b), _)) in seam_edges.iter().enumerate() {
            incident.entry(*a).or_default().push(e);
            incident.entry(*b).or_default().push(e);
        }
        let mut groups = UnionFind::new(seam_edges.len());
        for edges in incident.values() {
            for (i, &e) in edges.iter().enumerate() {
                if let Some(&f) = edges[..i].iter().find(|&&f| seam_edges[f].1 == seam_edges[e].1) {
                    groups.union(e, f);
                }
            }
        }
        let mut grouped: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for e in 0..seam_edges.len() {
            grouped.entry(groups.find(e)).or_default().push(e);
        }

        let mut seams_of_cluster: HashMap<usize, usize> = HashMap::new();
        for edges in grouped.values() {
            let vertices: BTreeSet<usize> = edges
                .iter()
                .flat_map(|&e| [seam_edges[e].0 .0, seam_edges[e].0 .1])
                .collect();
            for c in vertices {
                *seams_of_cluster.entry(c).or_default() += 1;
            }
        }

        let importance = settings.geometry_importance as f64;
        let mut seams = Vec::with_capacity(grouped.len());
        let mut placements = Vec::with_capacity(grouped.len());
        // groups are keyed by their smallest edge, which sorts them by position
        for edges in grouped.values() {
            let sharing = &seam_edges[edges[0]].1;
            let vertices: Vec<usize> = edges
                .iter()
                .flat_map(|&e| [seam_edges[e].0 .0, seam_edges[e].0 .1])
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let local: HashMap<usize, u32> = vertices
                .iter()
                .enumerate()
                .map(|(i, &c)| (c, i as u32))
                .collect();
            let seam_edges_local: Vec<[u32; 2]> = edges
                .iter()
                .map(|&e| {
                    let (a, b) = seam_edges[e].0;
                    [local[&a], local[&b]]
                })
                .collect();

            let mut degree = vec![0usize; vertices.len()];
            for &[a, b] in &seam_edges_local {
                degree[a as usize] += 1;
                degree[b as usize] += 1;
            }
            let mut consistent = true;
            let mut fixed = vec![false; vertices.len()];
            for (i, &c) in vertices.iter().enumerate() {
                let cluster = &clusters[c];
                let junction = seams_of_cluster.get(&c).copied().unwrap_or(0) > 1;
                let foreign = cluster.geometries != *sharing;
                let pinched = members[c]
                    .iter()
                    .any(|&(g, v)| sharing.contains(&g) && non_manifold[g].contains(&v));
                if cluster.ambiguous || pinched || (foreign && !junction && degree[i] == 2) {
                    consistent = false;
                }
                fixed[i] = degree[i] != 2 || junction || foreign;
            }

            let names: Vec<String> = {
                let mut names: Vec<String> = sharing
                    .iter()
                    .map(|&g| self.geometries[g].name.clone())
                    .collect();
                names.sort();
                names
            };
            let positions: Vec<[f32; 3]> = vertices.iter().map(|&c| clusters[c].position).collect();

            let collapses = if consistent {
                decimation_trial(&positions, &seam_edges_local, &mut fixed, importance)
            } else {
                self.warn(format!(
                    "modular seam {} shared by {} has inconsistent topology and will be locked",
                    seams.len(),
                    names.join(", ")
                ));
                Vec::new()
            };

            seams.push(ModularSeam {
                vertices: positions,
                edges: seam_edges_local,
                geometry_names: names,
                consistent,
                collapses,
            });
            placements.push(SeamPlacement {
                clusters: vertices,
                sharing: sharing.clone(),
            });
        }
        self.verify_collapses(&mut seams, &placements, &members)?;

        log::info!(
            "modular seam analysis: {} geometries, {} border clusters, {} seams",
            self.geometries.len(),
            clusters.len(),
            seams.len()
        );
        Ok(ModularSeams {
            tolerance: self.tolerance,
            is_translation_independent: self.is_translation_independent,
            seams,
        })
    }
}

/// Where a seam sits: the cluster of each seam vertex and the geometries
/// sharing it
struct SeamPlacement {
    clusters: Vec<usize>,
    sharing: BTreeSet<usize>,
}

impl ModularSeamAnalyzer {
    /// Apply the recorded collapses of every consistent seam to each
    /// geometry sharing it, in the order a reduction applies them. A seam
    /// with a collapse that some geometry cannot perform is locked, and the
    /// check repeats until every remaining collapse applies everywhere.
    fn verify_collapses(
        &self,
        seams: &mut [ModularSeam],
        placements: &[SeamPlacement],
        members: &[Vec<(usize, usize)>],
    ) -> Result<()> {
        let reducer = EdgeCollapseReducer::new();
        loop {
            let mut failed = BTreeSet::new();
            for (gi, geometry) in self.geometries.iter().enumerate() {
                let mut forced = Vec::new();
                let mut owner = Vec::new();
                for (s, (seam, placement)) in seams.iter().zip(placements).enumerate() {
                    if !seam.consistent || !placement.sharing.contains(&gi) {
                        continue;
                    }
                    let vertex_of = |local: u32| {
                        members[placement.clusters[local as usize]]
                            .iter()
                            .find(|&&(g, _)| g == gi)
                            .map(|&(_, v)| v)
                    };
                    for collapse in &seam.collapses {
                        if let (Some(removed), Some(kept)) = (vertex_of(collapse.removed), vertex_of(collapse.kept)) {
                            forced.push(ForcedCollapse { removed, kept });
                            owner.push(s);
                        }
                    }
                }
                if forced.is_empty() {
                    continue;
                }
                let targets = ReductionTargets::triangles(geometry.triangle_count());
                let output = reducer.reduce_with(geometry, &targets, &forced, None)?;
                for skipped in &output.skipped_forced {
                    if let Some(i) = forced.iter().position(|f| f == skipped) {
                        failed.insert(owner[i]);
                    }
                }
            }
            if failed.is_empty() {
                return Ok(());
            }
            for s in failed {
                self.warn(format!(
                    "modular seam {} shared by {} cannot be collapsed the same way in every geometry and will be locked",
                    s,
                    seams[s].geometry_names.join(", ")
                ));
                seams[s].consistent = false;
                seams[s].collapses.clear();
            }
        }
    }
}

/// Split the seam graph into chains between fixed vertices. Closed loops
/// without a fixed vertex get two fixed vertices on opposite sides.
fn chains(edges: &[[u32; 2]], fixed: &mut [bool]) -> Vec<Chain> {
    let n = fixed.len();
    let mut adjacency: Vec<Vec<(u32, usize)>> = vec![Vec::new(); n];
    for (e, &[a, b]) in edges.iter().enumerate() {
        adjacency[a as usize].push((b, e));
        adjacency[b as usize].push((a, e));
    }
    for list in &mut adjacency {
        list.sort();
    }
    let mut used = vec![false; edges.len()];

    let walk = |start: u32, first: (u32, usize), used: &mut Vec<bool>, fixed: &[bool]| {
        let mut vertices = vec![start];
        let (mut current, mut edge) = first;
        loop {
            used[edge] = true;
            vertices.push(current);
            if fixed[current as usize] || current == start {
                break;
            }
            match adjacency[current as usize].iter().find(|&&(_, e)| !used[e]) {
                Some(&next) => (current, edge) = next,
                None => break,
            }
        }
        vertices
    };

    let mut result = Vec::new();
    for v in 0..n as u32 {
        if !fixed[v as usize] {
            continue;
        }
        for &(w, e) in &adjacency[v as usize] {
            if !used[e] {
                let vertices = walk(v, (w, e), &mut used, &*fixed);
                result.push(vertices);
            }
        }
    }
    // Remaining edges form loops of interior vertices only
    for v in 0..n as u32 {
        let Some(&(w, e)) = adjacency[v as usize].iter().find(|&&(_, e)| !used[e]) else {
            continue;
        };
        let mut ring = walk(v, (w, e), &mut used, &*fixed);
        ring.pop();
        let half = ring.len() / 2;
        fixed[ring[0] as usize] = true;
        fixed[ring[half] as usize] = true;
        let mut second: Vec<u32> = ring[half..].to_vec();
        second.push(ring[0]);
        result.push(ring[..=half].to_vec());
        result.push(second);
    }

    result
        .into_iter()
        .map(|vertices| Chain {
            alive: vec![true; vertices.len()],
            vertices,
        })
        .collect()
}

/// Decimate the seam polyline as far as possible, cheapest vertex first.
/// The recorded deviation is a running maximum, so any prefix of the
/// result has a deviation bound equal to its last entry.
fn decimation_trial(
    positions: &[[f32; 3]],
    edges: &[[u32; 2]],
    fixed: &mut [bool],
    importance: f64,
) -> Vec<SeamCollapse> {
    let mut chains = chains(edges, fixed);
    let mut queue: PriorityQueue<(usize, usize), TrialCost> = PriorityQueue::new();
    let cost = |chain: &Chain, pos: usize| TrialCost {
        cost: chain.deviation(chain.prev(pos), chain.next(pos), positions) * importance,
        vertex: chain.vertices[pos],
    };
    for (ci, chain) in chains.iter().enumerate() {
        for pos in 1..chain.vertices.len().saturating_sub(1) {
            queue.push((ci, pos), cost(chain, pos));
        }
    }

    let distance = |a: u32, b: u32| {
        let (p, q) = (positions[a as usize], positions[b as usize]);
        ((p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2) + (p[2] - q[2]).powi(2)) as f64
    };

    let mut collapses = Vec::new();
    let mut running = 0.0f64;
    while let Some(((ci, pos), priority)) = queue.pop() {
        let chain = &mut chains[ci];
        let (prev, next) = (chain.prev(pos), chain.next(pos));
        let removed = chain.vertices[pos];
        let (a, b) = (chain.vertices[prev], chain.vertices[next]);
        let kept = if distance(removed, b) < distance(removed, a) { b } else { a };
        chain.alive[pos] = false;
        running = running.max(priority.cost);
        collapses.push(SeamCollapse {
            removed,
            kept,
            max_deviation: running,
        });
        let chain = &chains[ci];
        for neighbour in [prev, next] {
            if neighbour > 0 && neighbour + 1 < chain.vertices.len() {
                queue.push((ci, neighbour), cost(chain, neighbour));
            }
        }
    }
    collapses
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodcrate_core::Point3f;

    /// Strip of `n` quads along x, between y = y0 and y = y0 + 1
    fn strip(name: &str, n: usize, y0: f32) -> GeometryData {
        let mut coords = Vec::new();
        for row in 0..2 {
            for i in 0..=n {
                coords.push(Point3f::new(i as f32, y0 + row as f32, 0.0));
            }
        }
        let mut triangles = Vec::new();
        for i in 0..n {
            let (a, b, c, d) = (i, i + 1, n + 1 + i, n + 2 + i);
            triangles.push([a, b, d]);
            triangles.push([a, d, c]);
        }
        GeometryData::from_coords_and_triangles(name, coords, triangles)
    }

    #[test]
    fn test_shared_border_is_one_seam() {
        let mut analyzer = ModularSeamAnalyzer::new(1e-4);
        analyzer.add_geometry(strip("lower", 6, 0.0));
        analyzer.add_geometry(strip("upper", 6, 1.0));
        let seams = analyzer.analyze(&ReductionSettings::default()).unwrap();
        assert_eq!(seams.modular_seam_count(), 1);
        let seam = &seams.seams[0];
        assert_eq!(seam.vertex_count(), 7);
        assert_eq!(seam.edges.len(), 6);
        assert!(seam.consistent);
        assert_eq!(seams.modular_seam_geometry_names(0).unwrap(), ["lower", "upper"]);
        // straight line: every interior vertex goes at zero deviation
        assert_eq!(seam.collapses.len(), 5);
        assert!(seam.collapses.iter().all(|c| c.max_deviation == 0.0));
        for c in &seam.collapses {
            let [_, y, _] = seam.vertices[c.removed as usize];
            assert_eq!(y, 1.0);
        }
    }

    #[test]
    fn test_disjoint_geometries_have_no_seams() {
        let mut analyzer = ModularSeamAnalyzer::new(1e-4);
        analyzer.add_geometry(strip("a", 3, 0.0));
        analyzer.add_geometry(strip("b", 3, 5.0));
        let seams = analyzer.analyze(&ReductionSettings::default()).unwrap();
        assert_eq!(seams.modular_seam_count(), 0);
    }

    #[test]
    fn test_curved_seam_deviation_is_monotone_and_scaled() {
        let bent = |name: &str, y0: f32| {
            let mut g = strip(name, 8, y0);
            for p in &mut g.coords {
                p.z = (p.x * 0.7).sin();
            }
            g
        };
        let run = |importance: f32| {
            let mut analyzer = ModularSeamAnalyzer::new(1e-4);
            analyzer.add_geometry(bent("a", 0.0));
            analyzer.add_geometry(bent("b", 1.0));
            let settings = ReductionSettings {
                geometry_importance: importance,
                ..ReductionSettings::default()
            };
            analyzer.analyze(&settings).unwrap()
        };
        let seams = run(1.0);
        let collapses = &seams.seams[0].collapses;
        assert_eq!(collapses.len(), 7);
        assert!(collapses.windows(2).all(|w| w[0].max_deviation <= w[1].max_deviation));
        assert!(collapses.last().unwrap().max_deviation > 0.0);

        let doubled = run(2.0);
        let last = |s: &ModularSeams| s.seams[0].collapses.last().unwrap().max_deviation;
        assert!((last(&doubled) - 2.0 * last(&seams)).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_vertices_make_seam_inconsistent() {
        let mut upper = strip("upper", 4, 1.0);
        // split the shared border of the upper strip at x = 2
        let copy = upper.coords[2];
        upper.coords.push(copy);
        let last = upper.coords.len() - 1;
        for tri in upper.triangles.iter_mut().skip(4) {
            for v in tri.iter_mut() {
                if *v == 2 {
                    *v = last;
                }
            }
        }
        let reporter = Reporter::new();
        let mut analyzer = ModularSeamAnalyzer::new(1e-4).with_reporter(reporter.clone());
        analyzer.add_geometry(strip("lower", 4, 0.0));
        analyzer.add_geometry(upper);
        let seams = analyzer.analyze(&ReductionSettings::default()).unwrap();
        assert!(seams.seams.iter().any(|s| !s.consistent));
        assert!(seams.seams.iter().filter(|s| !s.consistent).all(|s| s.collapses.is_empty()));
        assert!(reporter.warning_occurred());
    }

    /// Two triangles below y = 1 that touch only at (1, 1)
    fn pinched(name: &str) -> GeometryData {
        GeometryData::from_coords_and_triangles(
            name,
            vec![
                Point3f::new(0.0, 1.0, 0.0),
                Point3f::new(1.0, 1.0, 0.0),
                Point3f::new(2.0, 1.0, 0.0),
                Point3f::new(0.5, 0.0, 0.0),
                Point3f::new(1.5, 0.0, 0.0),
            ],
            vec![[0, 3, 1], [1, 4, 2]],
        )
    }

    #[test]
    fn test_non_manifold_vertices() {
        assert_eq!(non_manifold_vertices(&pinched("p")), BTreeSet::from([1]));
        assert!(non_manifold_vertices(&strip("s", 4, 0.0)).is_empty());

        // two fins on the bottom edge 0-1 of the strip
        let mut fin = strip("fin", 2, 0.0);
        fin.coords.push(Point3f::new(0.5, -0.5, 1.0));
        fin.coords.push(Point3f::new(0.5, -0.5, -1.0));
        fin.triangles.push([0, 1, 6]);
        fin.triangles.push([1, 0, 7]);
        let flagged = non_manifold_vertices(&fin);
        assert!(flagged.contains(&0) && flagged.contains(&1));
    }

    #[test]
    fn test_pinched_vertex_makes_seam_inconsistent() {
        let reporter = Reporter::new();
        let mut analyzer = ModularSeamAnalyzer::new(1e-4).with_reporter(reporter.clone());
        analyzer.add_geometry(strip("above", 2, 1.0));
        analyzer.add_geometry(pinched("below"));
        let seams = analyzer.analyze(&ReductionSettings::default()).unwrap();
        assert_eq!(seams.modular_seam_count(), 1);
        assert!(!seams.seams[0].consistent);
        assert!(seams.seams[0].collapses.is_empty());
        let warnings = reporter.warning_messages();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].text.contains("above, below"));
    }

    #[test]
    fn test_collapse_blocked_in_one_geometry_locks_seam() {
        // manifold, but the border 0-1-2 closes into a loop through the
        // edge 0-2, so folding 1 into either end would pinch the surface
        let tent = GeometryData::from_coords_and_triangles(
            "tent",
            vec![
                Point3f::new(0.0, 1.0, 0.0),
                Point3f::new(1.0, 1.0, 0.0),
                Point3f::new(2.0, 1.0, 0.0),
                Point3f::new(1.0, 0.5, -1.0),
            ],
            vec![[0, 3, 1], [1, 3, 2], [0, 2, 3]],
        );
        assert!(non_manifold_vertices(&tent).is_empty());

        let reporter = Reporter::new();
        let mut analyzer = ModularSeamAnalyzer::new(1e-4).with_reporter(reporter.clone());
        analyzer.add_geometry(strip("above", 2, 1.0));
        analyzer.add_geometry(tent);
        let seams = analyzer.analyze(&ReductionSettings::default()).unwrap();
        assert_eq!(seams.modular_seam_count(), 1);
        assert!(!seams.seams[0].consistent);
        assert!(seams.seams[0].collapses.is_empty());
        assert!(reporter
            .warning_messages()
            .iter()
            .any(|w| w.text.contains("cannot be collapsed")));
    }

    #[test]
    fn test_translation_independence() {
        let mut analyzer = ModularSeamAnalyzer::new(1e-4).with_translation_independence(true);
        analyzer.add_geometry(strip("a", 3, 0.0));
        analyzer.add_geometry(strip("b", 3, 10.0));
        let seams = analyzer.analyze(&ReductionSettings::default()).unwrap();
        // identical strips overlap entirely once their origins coincide
        assert!(seams.modular_seam_count() >= 1);
        assert!(seams.is_translation_independent);
    }

    #[test]
    fn test_bad_tolerance() {
        let mut analyzer = ModularSeamAnalyzer::new(-1.0);
        analyzer.add_geometry(strip("a", 2, 0.0));
        assert!(matches!(
            analyzer.analyze(&ReductionSettings::default()),
            Err(Error::InvalidSettings(_))
        ));
        let empty = ModularSeamAnalyzer::new(1e-4);
        assert!(empty.analyze(&ReductionSettings::default()).is_err());
    }
}
