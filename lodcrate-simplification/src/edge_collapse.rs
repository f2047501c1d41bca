//! Edge collapse reduction
//!
//! Implements iterative edge collapse over a half-edge structure, with
//! candidates prioritised by quadric error metrics (QEM). Open borders,
//! material borders and attribute seams add constraint quadrics weighted by
//! their importance. Per-corner attributes stay on the corners of the
//! surviving triangles; corners of a removed vertex take the attribute of
//! the kept vertex in the same wedge.
//!
//! Per-triangle weights scale the quadrics of their triangle. With a
//! symmetry plane, an edge and its mirror image collapse together, and
//! vertices on the plane stay on it.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use lodcrate_core::{Error, GeometryData, Point3f, ProgressTracker, QuadFlag, Result, Vector3f};
use priority_queue::PriorityQueue;

use crate::quadric::Quadric;
use crate::settings::{ReductionSettings, StopCondition};
use crate::symmetry::{mirror_vertices, SymmetryConstraint, SymmetryPlane};
use crate::MeshSimplifier;

const INVALID: usize = usize::MAX;

/// Collapses that turn a face normal further than this cosine are rejected
const MIN_NORMAL_DOT: f32 = 0.1;

/// Relative weight of an open border constraint
const BORDER_WEIGHT: f64 = 1.0;

const PROGRESS_INTERVAL: usize = 256;

// ============================================================
// Settings and results
// ============================================================

/// Per-feature weights for the constraint quadrics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureImportances {
    pub geometry: f64,
    pub material: f64,
    pub texture: f64,
    pub shading: f64,
    pub vertex_color: f64,
}

impl Default for FeatureImportances {
    fn default() -> Self {
        Self {
            geometry: 1.0,
            material: 1.0,
            texture: 1.0,
            shading: 1.0,
            vertex_color: 1.0,
        }
    }
}

/// Resolved stop targets for one reduction run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReductionTargets {
    pub stop_condition: StopCondition,
    /// Reached once at most this many triangles remain
    pub triangle_count: Option<usize>,
    /// Reached once the cheapest remaining collapse deviates further than this
    pub max_deviation: Option<f64>,
}

impl ReductionTargets {
    pub fn triangles(count: usize) -> Self {
        Self {
            stop_condition: StopCondition::Any,
            triangle_count: Some(count),
            max_deviation: None,
        }
    }

    pub fn deviation(max_deviation: f64) -> Self {
        Self {
            stop_condition: StopCondition::Any,
            triangle_count: None,
            max_deviation: Some(max_deviation),
        }
    }

    /// Fold several triangle and deviation targets into one of each.
    /// With `All` the hardest target of each kind wins, with `Any` the easiest.
    pub fn combine(stop_condition: StopCondition, triangle_targets: &[usize], deviation_targets: &[f64]) -> Self {
        let (triangle_count, max_deviation) = match stop_condition {
            StopCondition::All => (
                triangle_targets.iter().copied().min(),
                deviation_targets.iter().copied().reduce(f64::max),
            ),
            StopCondition::Any => (
                triangle_targets.iter().copied().max(),
                deviation_targets.iter().copied().reduce(f64::min),
            ),
        };
        Self {
            stop_condition,
            triangle_count,
            max_deviation,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.triangle_count.is_some() || self.max_deviation.is_some()
    }
}

/// A collapse dictated by a recorded order rather than chosen by cost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForcedCollapse {
    pub removed: usize,
    pub kept: usize,
}

/// One applied collapse, in input vertex indices
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollapseRecord {
    pub kept: usize,
    pub removed: usize,
    pub position: Point3f,
    /// Deviation bound of the collapse
    pub error: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ReductionStats {
    pub triangles_before: usize,
    pub triangles_after: usize,
    pub vertices_before: usize,
    pub vertices_after: usize,
    pub collapses: usize,
    pub forced_collapses: usize,
    pub skipped_forced_collapses: usize,
    pub max_deviation: f64,
}

#[derive(Debug, Clone)]
pub struct ReductionOutput {
    pub geometry: GeometryData,
    pub stats: ReductionStats,
    pub collapse_log: Vec<CollapseRecord>,
    /// Output vertex each input vertex ended up in, `None` if it vanished
    pub vertex_map: Vec<Option<usize>>,
    /// Forced collapses that could not be applied, in input order
    pub skipped_forced: Vec<ForcedCollapse>,
}

// ============================================================
// Half-Edge Data Structure
// ============================================================

#[derive(Debug, Clone)]
struct HalfEdge {
    target: usize,
    twin: usize,
    next: usize,
    prev: usize,
    face: usize,
}

/// Collapse of the mirror image of a planned edge
#[derive(Debug, Clone, Copy)]
struct MirrorCollapse {
    keep: usize,
    remove: usize,
    position: Point3f,
}

#[derive(Debug, Clone, Copy)]
struct CollapsePlan {
    keep: usize,
    remove: usize,
    position: Point3f,
    cost: f64,
    deviation: f64,
    mirror: Option<MirrorCollapse>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymmetryRole {
    /// No symmetry, or no living mirror partner
    Free,
    OnPlane,
    Paired(usize),
}

impl SymmetryRole {
    /// A collapse never removes a vertex of higher rank than the one it keeps
    fn rank(self) -> u8 {
        match self {
            SymmetryRole::Free => 0,
            SymmetryRole::Paired(_) => 1,
            SymmetryRole::OnPlane => 2,
        }
    }
}

/// Half-edge mesh over a geometry. Half-edge `3 * f + k` starts at corner
/// `k` of face `f`, so corner channels are indexed by half-edge.
#[derive(Clone)]
struct HalfEdgeMesh {
    half_edges: Vec<HalfEdge>,
    /// One outgoing half-edge per vertex (INVALID if removed or unused)
    vertex_edge: Vec<usize>,
    /// One half-edge per face (INVALID if removed)
    face_edge: Vec<usize>,
    active_face_count: usize,
    geometry: GeometryData,
    quadrics: Vec<Quadric>,
    /// Unweighted plane sums used for the deviation bound
    distance: Vec<Quadric>,
    locked: Vec<bool>,
    border: Vec<bool>,
    vertex_removed: Vec<bool>,
    merged_into: Vec<usize>,
    plane: Option<SymmetryPlane>,
    /// Mirror partner per vertex, INVALID when unpaired
    mirror: Vec<usize>,
}

fn remap_channel<T: Copy + PartialEq>(channel: &mut [T], corners: &[usize], pairs: &[(usize, usize)]) {
    let wedges: Vec<(T, T)> = pairs.iter().map(|&(r, k)| (channel[r], channel[k])).collect();
    for &c in corners {
        if let Some(&(_, value)) = wedges.iter().find(|(from, _)| *from == channel[c]) {
            channel[c] = value;
        }
    }
}

fn differs<T: PartialEq>(channel: Option<&[T]>, a: usize, b: usize) -> bool {
    channel.map(|c| c[a] != c[b]).unwrap_or(false)
}

impl HalfEdgeMesh {
    fn from_geometry(geometry: &GeometryData, importances: &FeatureImportances, weights: Option<&[f32]>) -> Self {
        let nv = geometry.vertex_count();
        let nf = geometry.triangle_count();

        let mut half_edges = Vec::with_capacity(nf * 3);
        let mut vertex_edge = vec![INVALID; nv];
        let mut face_edge = Vec::with_capacity(nf);
        let mut active_face_count = 0;

        for (fi, face) in geometry.triangles.iter().enumerate() {
            let base = fi * 3;
            let degenerate = face[0] == face[1] || face[1] == face[2] || face[2] == face[0];
            let face_id = if degenerate { INVALID } else { fi };
            for j in 0..3usize {
                half_edges.push(HalfEdge {
                    target: face[(j + 1) % 3],
                    twin: INVALID,
                    next: base + (j + 1) % 3,
                    prev: base + (j + 2) % 3,
                    face: face_id,
                });
                if !degenerate && vertex_edge[face[j]] == INVALID {
                    vertex_edge[face[j]] = base + j;
                }
            }
            if degenerate {
                face_edge.push(INVALID);
            } else {
                face_edge.push(base);
                active_face_count += 1;
            }
        }

        // Pair twins; edges used more than once per direction stay unpaired
        let mut edge_map: HashMap<(usize, usize), Vec<usize>> = HashMap::with_capacity(nf * 3);
        for (he_idx, he) in half_edges.iter().enumerate() {
            if he.face == INVALID {
                continue;
            }
            let src = half_edges[he.prev].target;
            edge_map.entry((src, he.target)).or_default().push(he_idx);
        }
        for he_idx in 0..half_edges.len() {
            if half_edges[he_idx].face == INVALID || half_edges[he_idx].twin != INVALID {
                continue;
            }
            let src = half_edges[half_edges[he_idx].prev].target;
            let tgt = half_edges[he_idx].target;
            let forward = edge_map.get(&(src, tgt)).map(Vec::len).unwrap_or(0);
            if let Some([twin_idx]) = edge_map.get(&(tgt, src)).map(Vec::as_slice) {
                if forward == 1 {
                    half_edges[he_idx].twin = *twin_idx;
                    half_edges[*twin_idx].twin = he_idx;
                }
            }
        }

        let mut locked = vec![false; nv];
        if let Some(locks) = &geometry.vertex_locks {
            for (l, &g) in locked.iter_mut().zip(locks) {
                *l = g;
            }
        }

        let mut hem = HalfEdgeMesh {
            half_edges,
            vertex_edge,
            face_edge,
            active_face_count,
            geometry: geometry.clone(),
            quadrics: vec![Quadric::zero(); nv],
            distance: vec![Quadric::zero(); nv],
            locked,
            border: vec![false; nv],
            vertex_removed: vec![false; nv],
            merged_into: (0..nv).collect(),
            plane: None,
            mirror: vec![INVALID; nv],
        };
        hem.lock_non_manifold_vertices();
        for v in 0..nv {
            hem.border[v] = hem.is_boundary_vertex(v);
        }
        hem.initialize_quadrics(importances, weights);
        hem
    }

    /// Pair vertices across `plane`; returns the number of paired vertices
    fn set_symmetry(&mut self, plane: SymmetryPlane, tolerance: f32) -> usize {
        self.mirror = mirror_vertices(&self.geometry.coords, &plane, tolerance)
            .into_iter()
            .map(|m| m.unwrap_or(INVALID))
            .collect();
        self.plane = Some(plane);
        self.mirror.iter().filter(|&&m| m != INVALID).count()
    }

    fn role(&self, v: usize) -> SymmetryRole {
        if self.plane.is_none() {
            return SymmetryRole::Free;
        }
        match self.mirror[v] {
            INVALID => SymmetryRole::Free,
            m if m == v => SymmetryRole::OnPlane,
            m if self.alive(m) => SymmetryRole::Paired(m),
            _ => SymmetryRole::Free,
        }
    }

    #[inline]
    fn source(&self, he: usize) -> usize {
        self.half_edges[self.half_edges[he].prev].target
    }

    fn alive(&self, v: usize) -> bool {
        !self.vertex_removed[v] && self.vertex_edge[v] != INVALID
    }

    fn face_vertices(&self, f: usize) -> [usize; 3] {
        let he0 = self.face_edge[f];
        let he1 = self.half_edges[he0].next;
        [self.source(he0), self.half_edges[he0].target, self.half_edges[he1].target]
    }

    fn face_normal(&self, f: usize) -> Vector3f {
        let [a, b, c] = self.face_vertices(f);
        let p = &self.geometry.coords;
        (p[b] - p[a]).cross(&(p[c] - p[a]))
    }

    /// A vertex whose faces do not form a single fan cannot be collapsed safely
    fn lock_non_manifold_vertices(&mut self) {
        let mut incident = vec![0usize; self.geometry.vertex_count()];
        for f in 0..self.face_edge.len() {
            if self.face_edge[f] != INVALID {
                for v in self.face_vertices(f) {
                    incident[v] += 1;
                }
            }
        }
        for v in 0..incident.len() {
            if incident[v] > 0 && self.outgoing_half_edges(v).len() != incident[v] {
                self.locked[v] = true;
            }
        }
    }

    fn initialize_quadrics(&mut self, importances: &FeatureImportances, weights: Option<&[f32]>) {
        let weight = |f: usize| weights.map_or(1.0, |w| w[f] as f64);
        for fi in 0..self.face_edge.len() {
            if self.face_edge[fi] == INVALID {
                continue;
            }
            let [v0, v1, v2] = self.face_vertices(fi);
            let p = &self.geometry.coords;
            let area = self.face_normal(fi).norm() as f64 * 0.5;
            let q = Quadric::from_triangle(&p[v0], &p[v1], &p[v2], area * importances.geometry * weight(fi));
            let d = Quadric::from_triangle(&p[v0], &p[v1], &p[v2], 1.0);
            for v in [v0, v1, v2] {
                self.quadrics[v] += q;
                self.distance[v] += d;
            }
        }

        for he in 0..self.half_edges.len() {
            let face = self.half_edges[he].face;
            if face == INVALID {
                continue;
            }
            let twin = self.half_edges[he].twin;
            let (a, b) = (self.source(he), self.half_edges[he].target);
            let (pa, pb) = (self.geometry.coords[a], self.geometry.coords[b]);
            let len2 = (pb - pa).norm_squared() as f64;
            let normal = self.face_normal(face).normalize();
            if !normal.iter().all(|x| x.is_finite()) {
                continue;
            }

            let feature = if twin == INVALID {
                self.distance[a] += Quadric::edge_constraint(&pa, &pb, &normal, 1.0);
                self.distance[b] += Quadric::edge_constraint(&pa, &pb, &normal, 1.0);
                BORDER_WEIGHT * importances.geometry
            } else {
                self.seam_weight(he, twin, importances)
            };
            if feature > 0.0 {
                let c = Quadric::edge_constraint(&pa, &pb, &normal, len2 * feature * weight(face));
                self.quadrics[a] += c;
                self.quadrics[b] += c;
            }
        }
    }

    /// Summed importance of the attribute seams running along an interior edge
    fn seam_weight(&self, he: usize, twin: usize, importances: &FeatureImportances) -> f64 {
        let g = &self.geometry;
        // he runs a -> b in one face, twin b -> a in the other
        let (a_here, b_here) = (he, self.half_edges[he].next);
        let (b_there, a_there) = (twin, self.half_edges[twin].next);

        let mut weight = 0.0;
        if g.material_id(self.half_edges[he].face) != g.material_id(self.half_edges[twin].face) {
            weight += importances.material;
        }
        if g.tex_coord_levels().any(|level| {
            differs(g.tex_coords(level), a_here, a_there) || differs(g.tex_coords(level), b_here, b_there)
        }) {
            weight += importances.texture;
        }
        if differs(g.normals.as_deref(), a_here, a_there) || differs(g.normals.as_deref(), b_here, b_there) {
            weight += importances.shading;
        }
        if g.color_levels().any(|level| {
            differs(g.colors(level), a_here, a_there) || differs(g.colors(level), b_here, b_there)
        }) {
            weight += importances.vertex_color;
        }
        weight
    }

    /// Get all outgoing half-edges from a vertex (handles boundary vertices).
    fn outgoing_half_edges(&self, v: usize) -> Vec<usize> {
        let start = self.vertex_edge[v];
        if start == INVALID {
            return vec![];
        }
        let limit = self.half_edges.len();
        let mut result = Vec::new();
        let mut current = start;

        // Rotate counterclockwise: current.prev.twin
        loop {
            result.push(current);
            let prev = self.half_edges[current].prev;
            let twin = self.half_edges[prev].twin;
            if twin == INVALID || result.len() > limit {
                break;
            }
            current = twin;
            if current == start {
                return result;
            }
        }

        // Boundary: also rotate clockwise from start via twin.next
        let twin_of_start = self.half_edges[start].twin;
        if twin_of_start != INVALID {
            let mut current = self.half_edges[twin_of_start].next;
            while current != start && result.len() <= limit {
                result.push(current);
                let twin = self.half_edges[current].twin;
                if twin == INVALID {
                    break;
                }
                current = self.half_edges[twin].next;
            }
        }

        result
    }

    fn neighbors(&self, v: usize) -> HashSet<usize> {
        let mut out = HashSet::new();
        for he in self.outgoing_half_edges(v) {
            out.insert(self.half_edges[he].target);
            // the apex behind a border fan is only reachable through prev
            out.insert(self.source(self.half_edges[he].prev));
        }
        out.remove(&v);
        out
    }

    fn is_boundary_vertex(&self, v: usize) -> bool {
        self.outgoing_half_edges(v).iter().any(|&he| {
            self.half_edges[he].twin == INVALID
                || self.half_edges[self.half_edges[he].prev].twin == INVALID
        })
    }

    fn find_half_edge(&self, from: usize, to: usize) -> Option<usize> {
        self.outgoing_half_edges(from)
            .into_iter()
            .find(|&he| self.half_edges[he].target == to)
    }

    fn edge_between(&self, a: usize, b: usize) -> Option<usize> {
        self.find_half_edge(a, b).or_else(|| self.find_half_edge(b, a))
    }

    /// Check the link condition: common neighbors must equal exactly the
    /// face apices opposite the edge (2 for interior, 1 for boundary).
    fn check_link_condition(&self, a: usize, b: usize) -> bool {
        let h = match self.edge_between(a, b) {
            Some(h) => h,
            None => return false,
        };
        let interior = self.half_edges[h].twin != INVALID;
        if interior && self.border[a] && self.border[b] {
            return false;
        }
        let common = self.neighbors(a).intersection(&self.neighbors(b)).count();
        common == if interior { 2 } else { 1 }
    }

    /// No surviving face around the edge may flip or degenerate
    fn keeps_orientation(&self, keep: usize, remove: usize, position: &Point3f) -> bool {
        for v in [keep, remove] {
            for he in self.outgoing_half_edges(v) {
                let f = self.half_edges[he].face;
                if f == INVALID {
                    continue;
                }
                let verts = self.face_vertices(f);
                if verts.contains(&keep) && verts.contains(&remove) {
                    continue;
                }
                let old = self.face_normal(f);
                let old_len = old.norm();
                if old_len <= f32::EPSILON {
                    continue;
                }
                let p = |u: usize| if u == keep || u == remove { *position } else { self.geometry.coords[u] };
                let new = (p(verts[1]) - p(verts[0])).cross(&(p(verts[2]) - p(verts[0])));
                let new_len = new.norm();
                if new_len <= old_len * 1e-4 || new.dot(&old) / (new_len * old_len) < MIN_NORMAL_DOT {
                    return false;
                }
            }
        }
        true
    }

    fn is_quad_diagonal(&self, he: usize) -> bool {
        let Some(flags) = &self.geometry.quad_flags else {
            return false;
        };
        let twin = self.half_edges[he].twin;
        if twin == INVALID {
            return false;
        }
        let (fa, fb) = (self.half_edges[he].face, self.half_edges[twin].face);
        let (lo, hi) = (fa.min(fb), fa.max(fb));
        hi == lo + 1 && flags[lo] == QuadFlag::FirstOfQuad && flags[hi] == QuadFlag::SecondOfQuad
    }

    fn destroys_quad(&self, he: usize) -> bool {
        let Some(flags) = &self.geometry.quad_flags else {
            return false;
        };
        [he, self.half_edges[he].twin]
            .into_iter()
            .filter(|&e| e != INVALID)
            .any(|e| flags[self.half_edges[e].face] != QuadFlag::Triangle)
    }

    /// Collapse edge (keep, remove), merging `remove` into `keep` at `position`.
    /// Returns true on success.
    fn collapse_edge(&mut self, keep: usize, remove: usize, position: Point3f) -> bool {
        let h = match self.edge_between(keep, remove) {
            Some(h) => h,
            None => return false,
        };

        let h_twin = self.half_edges[h].twin;
        let h_next = self.half_edges[h].next;
        let h_prev = self.half_edges[h].prev;
        let face_a = self.half_edges[h].face;
        let h_next_twin = self.half_edges[h_next].twin;
        let h_prev_twin = self.half_edges[h_prev].twin;
        let c = self.half_edges[h_next].target;

        let (face_b, ht_next, ht_prev, ht_next_twin, ht_prev_twin, d) = if h_twin != INVALID {
            let hn = self.half_edges[h_twin].next;
            let hp = self.half_edges[h_twin].prev;
            (
                self.half_edges[h_twin].face,
                hn,
                hp,
                self.half_edges[hn].twin,
                self.half_edges[hp].twin,
                self.half_edges[hn].target,
            )
        } else {
            (INVALID, INVALID, INVALID, INVALID, INVALID, INVALID)
        };

        // Collect fans BEFORE any modifications
        let keep_outgoing = self.outgoing_half_edges(keep);
        let remove_outgoing = self.outgoing_half_edges(remove);
        let c_outgoing = self.outgoing_half_edges(c);
        let d_outgoing = if d != INVALID { self.outgoing_half_edges(d) } else { vec![] };

        self.remap_wedges(remove, h, h_twin, face_a, face_b, &remove_outgoing);

        // Re-pair twins for face A border edges
        if h_next_twin != INVALID {
            self.half_edges[h_next_twin].twin = h_prev_twin;
        }
        if h_prev_twin != INVALID {
            self.half_edges[h_prev_twin].twin = h_next_twin;
        }

        // Mark face A as removed
        self.half_edges[h].face = INVALID;
        self.half_edges[h_next].face = INVALID;
        self.half_edges[h_prev].face = INVALID;
        self.face_edge[face_a] = INVALID;
        self.active_face_count -= 1;

        // Handle face B
        if face_b != INVALID {
            if ht_next_twin != INVALID {
                self.half_edges[ht_next_twin].twin = ht_prev_twin;
            }
            if ht_prev_twin != INVALID {
                self.half_edges[ht_prev_twin].twin = ht_next_twin;
            }
            self.half_edges[h_twin].face = INVALID;
            self.half_edges[ht_next].face = INVALID;
            self.half_edges[ht_prev].face = INVALID;
            self.face_edge[face_b] = INVALID;
            self.active_face_count -= 1;
        }

        // Redirect all references to `remove` to `keep`
        for &he in &remove_outgoing {
            let prev = self.half_edges[he].prev;
            self.half_edges[prev].target = keep;

            let twin = self.half_edges[he].twin;
            if twin != INVALID && self.half_edges[twin].face != INVALID {
                self.half_edges[twin].target = keep;
            }
        }

        let first_valid = |mesh: &Self, candidates: &[usize]| {
            candidates
                .iter()
                .copied()
                .find(|&he| mesh.half_edges[he].face != INVALID)
                .unwrap_or(INVALID)
        };
        let keep_candidates: Vec<usize> = keep_outgoing.iter().chain(&remove_outgoing).copied().collect();
        self.vertex_edge[keep] = first_valid(self, &keep_candidates);
        self.vertex_edge[c] = first_valid(self, &c_outgoing);
        if d != INVALID {
            self.vertex_edge[d] = first_valid(self, &d_outgoing);
        }

        self.vertex_edge[remove] = INVALID;
        self.vertex_removed[remove] = true;
        self.merged_into[remove] = keep;

        self.geometry.coords[keep] = position;
        let (q, dq) = (self.quadrics[remove], self.distance[remove]);
        self.quadrics[keep] += q;
        self.distance[keep] += dq;
        self.border[keep] |= self.border[remove];
        true
    }

    /// Corners of `remove` that share a wedge with the collapsing edge take
    /// the attribute value of `keep` in that wedge
    fn remap_wedges(
        &mut self,
        remove: usize,
        h: usize,
        h_twin: usize,
        face_a: usize,
        face_b: usize,
        remove_outgoing: &[usize],
    ) {
        let mut pairs = Vec::with_capacity(2);
        for e in [h, h_twin] {
            if e == INVALID {
                continue;
            }
            let n = self.half_edges[e].next;
            if self.source(e) == remove {
                pairs.push((e, n));
            } else {
                pairs.push((n, e));
            }
        }
        let corners: Vec<usize> = remove_outgoing
            .iter()
            .copied()
            .filter(|&c| {
                let f = self.half_edges[c].face;
                f != face_a && f != face_b
            })
            .collect();

        let g = &mut self.geometry;
        for channel in g.tex_coords.iter_mut().flatten() {
            remap_channel(channel, &corners, &pairs);
        }
        for channel in g.colors.iter_mut().flatten() {
            remap_channel(channel, &corners, &pairs);
        }
        if let Some(n) = &mut g.normals {
            remap_channel(n, &corners, &pairs);
        }
        if let Some(t) = &mut g.tangents {
            remap_channel(t, &corners, &pairs);
        }
    }

    fn root(&self, mut v: usize) -> usize {
        while self.merged_into[v] != v {
            v = self.merged_into[v];
        }
        v
    }

    fn into_output(self) -> (GeometryData, Vec<Option<usize>>) {
        let mut geometry = self.geometry.clone();
        let mut keep = vec![false; self.face_edge.len()];
        for f in 0..self.face_edge.len() {
            if self.face_edge[f] != INVALID {
                geometry.triangles[f] = self.face_vertices(f);
                keep[f] = true;
            }
        }
        if let Some(flags) = &mut geometry.quad_flags {
            for t in 0..flags.len().saturating_sub(1) {
                if flags[t] != QuadFlag::FirstOfQuad || flags[t + 1] != QuadFlag::SecondOfQuad {
                    continue;
                }
                let shared = if keep[t] && keep[t + 1] {
                    let a = geometry.triangles[t];
                    geometry.triangles[t + 1].iter().filter(|v| a.contains(v)).count()
                } else {
                    0
                };
                if shared != 2 {
                    flags[t] = QuadFlag::Triangle;
                    flags[t + 1] = QuadFlag::Triangle;
                }
            }
        }
        geometry.retain_triangles(&keep);
        let remap = geometry.remove_unused_vertices();
        let vertex_map = (0..self.merged_into.len())
            .map(|v| remap[self.root(v)])
            .collect();
        (geometry, vertex_map)
    }
}

// ============================================================
// Edge Cost for Priority Queue
// ============================================================

#[derive(Debug, Clone)]
struct EdgeCost {
    v1: usize,
    v2: usize,
    cost: f64,
}

impl PartialEq for EdgeCost {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for EdgeCost {}

impl PartialOrd for EdgeCost {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EdgeCost {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: smallest cost first, then smallest vertex pair
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| (other.v1, other.v2).cmp(&(self.v1, self.v2)))
    }
}

fn edge_key(a: usize, b: usize) -> (usize, usize) {
    (a.min(b), a.max(b))
}

// ============================================================
// Edge Collapse Reducer
// ============================================================

/// Quadric edge collapse reducer for [`GeometryData`]
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeCollapseReducer {
    pub importances: FeatureImportances,
    /// Never move or remove vertices on open borders
    pub lock_geometric_border: bool,
    /// Never collapse the shared diagonal of a quad pair
    pub protect_quad_diagonals: bool,
    /// Extra cost, relative to the edge length, for collapses that break a quad
    pub quad_penalty: f64,
    pub symmetry: Option<SymmetryConstraint>,
    /// Scales the collapse cost around each input triangle, such as by how
    /// visible it is. Must hold one non-negative value per triangle.
    pub triangle_weights: Option<Vec<f32>>,
}

impl Default for EdgeCollapseReducer {
    fn default() -> Self {
        Self {
            importances: FeatureImportances::default(),
            lock_geometric_border: false,
            protect_quad_diagonals: false,
            quad_penalty: 0.0,
            symmetry: None,
            triangle_weights: None,
        }
    }
}

impl EdgeCollapseReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &ReductionSettings) -> Self {
        Self {
            importances: settings.importances(),
            lock_geometric_border: settings.lock_geometric_border,
            symmetry: settings.symmetry(),
            ..Self::default()
        }
    }

    pub fn with_triangle_weights(mut self, weights: Vec<f32>) -> Self {
        self.triangle_weights = Some(weights);
        self
    }

    fn plan(&self, hem: &HalfEdgeMesh, a: usize, b: usize) -> Option<CollapsePlan> {
        let he = hem.edge_between(a, b)?;
        if self.protect_quad_diagonals && hem.is_quad_diagonal(he) {
            return None;
        }
        let locked = |v: usize| hem.locked[v] || (self.lock_geometric_border && hem.border[v]);
        let (pa, pb) = (hem.geometry.coords[a], hem.geometry.coords[b]);
        let q = hem.quadrics[a] + hem.quadrics[b];

        let (keep, remove) = match (locked(a), locked(b)) {
            (true, true) => return None,
            (true, false) => (a, b),
            (false, true) => (b, a),
            (false, false) => match hem.role(a).rank().cmp(&hem.role(b).rank()) {
                Ordering::Greater => (a, b),
                Ordering::Less => (b, a),
                Ordering::Equal => (a.min(b), a.max(b)),
            },
        };
        let (keep_role, remove_role) = (hem.role(keep), hem.role(remove));
        if remove_role.rank() > keep_role.rank() {
            return None;
        }
        // the two vertices are each other's mirror; the kept one lands on the plane
        let crossing = keep_role == SymmetryRole::Paired(remove);
        let fixed = locked(keep) || (remove_role == SymmetryRole::Free && keep_role != SymmetryRole::Free);
        if fixed && crossing {
            return None;
        }

        let position = if fixed {
            hem.geometry.coords[keep]
        } else {
            let mid = Point3f::from((pa.coords + pb.coords) * 0.5);
            let edge_len = (pb - pa).norm();
            let optimal = q
                .optimal()
                .filter(|p| (*p - mid).norm() <= edge_len * 2.0)
                .unwrap_or_else(|| {
                    // fall back to the cheapest of the endpoints and the midpoint
                    [pa, pb, mid]
                        .into_iter()
                        .min_by(|x, y| q.evaluate(x).total_cmp(&q.evaluate(y)))
                        .unwrap_or(mid)
                });
            match hem.plane {
                Some(plane) if crossing || keep_role == SymmetryRole::OnPlane => plane.project(&optimal),
                _ => optimal,
            }
        };

        let mut cost = q.evaluate(&position);
        if self.quad_penalty > 0.0 && hem.destroys_quad(he) {
            let len2 = (pb - pa).norm_squared() as f64;
            cost += self.quad_penalty * len2 * len2;
        }
        let mut deviation = (hem.distance[a] + hem.distance[b]).evaluate(&position).sqrt();

        let mirror = match (hem.plane, remove_role) {
            (Some(plane), SymmetryRole::Paired(mirror_remove)) if !crossing => {
                let mirror_keep = match keep_role {
                    SymmetryRole::Paired(m) => m,
                    _ => keep,
                };
                if locked(mirror_remove) || (locked(mirror_keep) && !fixed) {
                    return None;
                }
                hem.edge_between(mirror_keep, mirror_remove)?;
                let mirror_position = if mirror_keep == keep {
                    position
                } else {
                    plane.reflect(&position)
                };
                cost += (hem.quadrics[mirror_keep] + hem.quadrics[mirror_remove]).evaluate(&mirror_position);
                deviation = deviation.max(
                    (hem.distance[mirror_keep] + hem.distance[mirror_remove])
                        .evaluate(&mirror_position)
                        .sqrt(),
                );
                Some(MirrorCollapse {
                    keep: mirror_keep,
                    remove: mirror_remove,
                    position: mirror_position,
                })
            }
            _ => None,
        };
        Some(CollapsePlan {
            keep,
            remove,
            position,
            cost,
            deviation,
            mirror,
        })
    }

    /// Whether the mirror collapse is still valid once the planned one is done.
    /// Mirror edges next to the planned edge are checked on a copy.
    fn mirror_is_valid(hem: &HalfEdgeMesh, plan: &CollapsePlan, mirror: &MirrorCollapse) -> bool {
        let mut near = hem.neighbors(plan.keep);
        near.extend(hem.neighbors(plan.remove));
        near.extend([plan.keep, plan.remove]);
        if !near.contains(&mirror.keep) && !near.contains(&mirror.remove) {
            return hem.check_link_condition(mirror.keep, mirror.remove)
                && hem.keeps_orientation(mirror.keep, mirror.remove, &mirror.position);
        }
        let mut trial = hem.clone();
        trial.collapse_edge(plan.keep, plan.remove, plan.position)
            && trial.alive(mirror.keep)
            && trial.alive(mirror.remove)
            && trial.check_link_condition(mirror.keep, mirror.remove)
            && trial.keeps_orientation(mirror.keep, mirror.remove, &mirror.position)
    }

    fn push_edge(&self, hem: &HalfEdgeMesh, queue: &mut PriorityQueue<(usize, usize), EdgeCost>, a: usize, b: usize) {
        let key = edge_key(a, b);
        match self.plan(hem, a, b) {
            Some(plan) => {
                queue.push(
                    key,
                    EdgeCost {
                        v1: key.0,
                        v2: key.1,
                        cost: plan.cost,
                    },
                );
            }
            None => {
                queue.remove(&key);
            }
        }
    }

    /// Build the initial priority queue of edge collapse candidates.
    fn build_queue(&self, hem: &HalfEdgeMesh) -> PriorityQueue<(usize, usize), EdgeCost> {
        let mut queue = PriorityQueue::new();
        let mut seen_edges: HashSet<(usize, usize)> = HashSet::new();
        for he in 0..hem.half_edges.len() {
            if hem.half_edges[he].face == INVALID {
                continue;
            }
            let (a, b) = (hem.source(he), hem.half_edges[he].target);
            if seen_edges.insert(edge_key(a, b)) {
                self.push_edge(hem, &mut queue, a, b);
            }
        }
        queue
    }

    /// Pop candidates until one can be collapsed right now
    fn pop_valid(
        &self,
        hem: &HalfEdgeMesh,
        queue: &mut PriorityQueue<(usize, usize), EdgeCost>,
    ) -> Option<CollapsePlan> {
        while let Some(((a, b), _)) = queue.pop() {
            if !hem.alive(a) || !hem.alive(b) {
                continue;
            }
            let Some(plan) = self.plan(hem, a, b) else {
                continue;
            };
            if !hem.check_link_condition(a, b) {
                continue;
            }
            if !hem.keeps_orientation(plan.keep, plan.remove, &plan.position) {
                continue;
            }
            if let Some(mirror) = &plan.mirror {
                if !Self::mirror_is_valid(hem, &plan, mirror) {
                    continue;
                }
            }
            return Some(plan);
        }
        None
    }

    fn collapse(
        &self,
        hem: &mut HalfEdgeMesh,
        queue: &mut PriorityQueue<(usize, usize), EdgeCost>,
        keep: usize,
        remove: usize,
        position: Point3f,
    ) -> bool {
        let stale = hem.neighbors(remove);
        if !hem.collapse_edge(keep, remove, position) {
            return false;
        }
        for n in stale {
            queue.remove(&edge_key(remove, n));
        }
        let mut around: Vec<usize> = hem.neighbors(keep).into_iter().collect();
        around.sort_unstable();
        for n in around {
            self.push_edge(hem, queue, keep, n);
        }
        true
    }

    /// Apply a plan and its mirror collapse; appends what was done to `records`
    fn apply(
        &self,
        hem: &mut HalfEdgeMesh,
        queue: &mut PriorityQueue<(usize, usize), EdgeCost>,
        plan: &CollapsePlan,
        records: &mut Vec<CollapseRecord>,
    ) -> usize {
        let crossing = hem.role(plan.keep) == SymmetryRole::Paired(plan.remove);
        if !self.collapse(hem, queue, plan.keep, plan.remove, plan.position) {
            return 0;
        }
        if crossing {
            hem.mirror[plan.keep] = plan.keep;
        }
        records.push(CollapseRecord {
            kept: plan.keep,
            removed: plan.remove,
            position: plan.position,
            error: plan.deviation,
        });
        let Some(mirror) = plan.mirror else {
            return 1;
        };
        let applied = hem.alive(mirror.keep)
            && hem.alive(mirror.remove)
            && hem.check_link_condition(mirror.keep, mirror.remove)
            && hem.keeps_orientation(mirror.keep, mirror.remove, &mirror.position)
            && self.collapse(hem, queue, mirror.keep, mirror.remove, mirror.position);
        if !applied {
            // the pair is broken; pin what is left of it
            for v in [plan.keep, mirror.keep, mirror.remove] {
                if hem.alive(v) {
                    hem.locked[v] = true;
                    hem.mirror[v] = INVALID;
                }
            }
            log::debug!(
                "mirror collapse {} -> {} failed, vertex {} pinned",
                mirror.remove,
                mirror.keep,
                plan.keep
            );
            return 1;
        }
        records.push(CollapseRecord {
            kept: mirror.keep,
            removed: mirror.remove,
            position: mirror.position,
            error: plan.deviation,
        });
        2
    }

    fn apply_forced(hem: &mut HalfEdgeMesh, forced: ForcedCollapse) -> std::result::Result<CollapseRecord, &'static str> {
        let ForcedCollapse { removed, kept } = forced;
        if removed >= hem.vertex_removed.len() || kept >= hem.vertex_removed.len() {
            return Err("vertex index out of range");
        }
        if !hem.alive(removed) || !hem.alive(kept) {
            return Err("vertex already removed");
        }
        if hem.locked[removed] {
            return Err("removed vertex is locked");
        }
        if !hem.check_link_condition(kept, removed) {
            return Err("collapse would break the surface topology");
        }
        let position = hem.geometry.coords[kept];
        let error = (hem.distance[kept] + hem.distance[removed]).evaluate(&position).sqrt();
        if !hem.collapse_edge(kept, removed, position) {
            return Err("vertices are not adjacent");
        }
        Ok(CollapseRecord {
            kept,
            removed,
            position,
            error,
        })
    }

    /// Reduce `geometry` until `targets` are reached
    pub fn reduce(&self, geometry: &GeometryData, targets: &ReductionTargets) -> Result<ReductionOutput> {
        self.reduce_with(geometry, targets, &[], None)
    }

    /// Apply `forced` collapses in order, then reduce greedily until
    /// `targets` are reached. Forced collapses that are no longer possible
    /// are skipped and their removed vertex is locked in place, so the
    /// greedy pass cannot move it either.
    pub fn reduce_with(
        &self,
        geometry: &GeometryData,
        targets: &ReductionTargets,
        forced: &[ForcedCollapse],
        progress: Option<&ProgressTracker>,
    ) -> Result<ReductionOutput> {
        if geometry.is_empty() {
            return Err(Error::InvalidData(format!("{}: geometry has no triangles", geometry.name)));
        }
        if !targets.is_enabled() {
            return Err(Error::InvalidSettings("no reduction target is enabled".into()));
        }
        geometry.validate()?;
        if let Some(weights) = &self.triangle_weights {
            if weights.len() != geometry.triangle_count() {
                return Err(Error::InvalidSettings(format!(
                    "{}: {} triangle weights for {} triangles",
                    geometry.name,
                    weights.len(),
                    geometry.triangle_count()
                )));
            }
            if weights.iter().any(|w| !(*w >= 0.0) || !w.is_finite()) {
                return Err(Error::InvalidSettings("triangle weights must be finite and non-negative".into()));
            }
        }

        let mut hem = HalfEdgeMesh::from_geometry(geometry, &self.importances, self.triangle_weights.as_deref());
        if let Some(symmetry) = &self.symmetry {
            match symmetry.resolve(&geometry.coords) {
                Some((plane, tolerance)) => {
                    let paired = hem.set_symmetry(plane, tolerance);
                    log::debug!(
                        "{}: {} of {} vertices mirrored about {:?} = {}",
                        geometry.name,
                        paired,
                        geometry.vertex_count(),
                        plane.axis,
                        plane.offset
                    );
                }
                None => log::debug!("{}: no symmetry plane found", geometry.name),
            }
        }
        let mut stats = ReductionStats {
            triangles_before: geometry.triangle_count(),
            vertices_before: geometry.vertex_count(),
            ..ReductionStats::default()
        };
        let mut collapse_log = Vec::new();
        let mut skipped_forced = Vec::new();

        for &f in forced {
            match Self::apply_forced(&mut hem, f) {
                Ok(record) => {
                    stats.forced_collapses += 1;
                    stats.max_deviation = stats.max_deviation.max(record.error);
                    collapse_log.push(record);
                }
                Err(reason) => {
                    stats.skipped_forced_collapses += 1;
                    if f.removed < hem.vertex_removed.len() && hem.alive(f.removed) {
                        hem.locked[f.removed] = true;
                    }
                    skipped_forced.push(f);
                    log::debug!(
                        "{}: skipped forced collapse {} -> {}: {}",
                        geometry.name,
                        f.removed,
                        f.kept,
                        reason
                    );
                }
            }
        }

        let start_faces = hem.active_face_count;
        let span = start_faces.saturating_sub(targets.triangle_count.unwrap_or(0)).max(1);
        let mut queue = self.build_queue(&hem);
        let mut steps = 0usize;

        loop {
            let triangles_reached = targets.triangle_count.map(|t| hem.active_face_count <= t);
            match targets.stop_condition {
                StopCondition::Any if triangles_reached == Some(true) => break,
                StopCondition::All if triangles_reached == Some(true) && targets.max_deviation.is_none() => break,
                _ => {}
            }

            let Some(plan) = self.pop_valid(&hem, &mut queue) else {
                break;
            };
            if let Some(max_deviation) = targets.max_deviation {
                if plan.deviation > max_deviation {
                    let done = match targets.stop_condition {
                        StopCondition::Any => true,
                        StopCondition::All => triangles_reached.unwrap_or(true),
                    };
                    if done {
                        break;
                    }
                }
            }

            let applied = self.apply(&mut hem, &mut queue, &plan, &mut collapse_log);
            if applied > 0 {
                stats.collapses += applied;
                stats.max_deviation = stats.max_deviation.max(plan.deviation);
                steps += 1;
                if let Some(progress) = progress {
                    if steps % PROGRESS_INTERVAL == 0 {
                        let done = start_faces.saturating_sub(hem.active_face_count);
                        progress.report(100.0 * done as f32 / span as f32)?;
                    }
                }
            }
        }

        let (geometry_out, vertex_map) = hem.into_output();
        stats.triangles_after = geometry_out.triangle_count();
        stats.vertices_after = geometry_out.vertex_count();
        log::debug!(
            "{}: {} -> {} triangles, {} collapses ({} forced), max deviation {:.6}",
            geometry.name,
            stats.triangles_before,
            stats.triangles_after,
            stats.collapses,
            stats.forced_collapses,
            stats.max_deviation
        );
        Ok(ReductionOutput {
            geometry: geometry_out,
            stats,
            collapse_log,
            vertex_map,
            skipped_forced,
        })
    }
}

impl MeshSimplifier for EdgeCollapseReducer {
    fn simplify(&self, geometry: &GeometryData, reduction_ratio: f32) -> Result<GeometryData> {
        if geometry.is_empty() {
            return Err(Error::InvalidData("Geometry is empty".to_string()));
        }
        if !(0.0..=1.0).contains(&reduction_ratio) {
            return Err(Error::InvalidData(
                "Reduction ratio must be between 0.0 and 1.0".to_string(),
            ));
        }
        if reduction_ratio == 0.0 {
            return Ok(geometry.clone());
        }
        let target = ((1.0 - reduction_ratio) * geometry.triangle_count() as f32) as usize;
        Ok(self.reduce(geometry, &ReductionTargets::triangles(target))?.geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodcrate_core::Vector2f;
    use std::sync::Arc;

    fn make_single_triangle() -> GeometryData {
        GeometryData::from_coords_and_triangles(
            "triangle",
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(0.5, 1.0, 0.0),
            ],
            vec![[0, 1, 2]],
        )
    }

    fn make_tetrahedron() -> GeometryData {
        // Consistently wound: each shared edge appears in opposite directions
        GeometryData::from_coords_and_triangles(
            "tetrahedron",
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(0.5, 1.0, 0.0),
                Point3f::new(0.5, 0.5, 1.0),
            ],
            vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
        )
    }

    fn make_plane_grid(size: usize) -> GeometryData {
        let mut coords = Vec::new();
        for y in 0..size {
            for x in 0..size {
                coords.push(Point3f::new(x as f32, y as f32, 0.0));
            }
        }
        let mut triangles = Vec::new();
        for y in 0..(size - 1) {
            for x in 0..(size - 1) {
                let tl = y * size + x;
                let tr = tl + 1;
                let bl = (y + 1) * size + x;
                let br = bl + 1;
                triangles.push([tl, tr, bl]);
                triangles.push([tr, br, bl]);
            }
        }
        GeometryData::from_coords_and_triangles("grid", coords, triangles)
    }

    fn make_curved_surface(size: usize) -> GeometryData {
        let mut g = make_plane_grid(size);
        for p in &mut g.coords {
            let fx = p.x / (size - 1) as f32 * std::f32::consts::PI;
            let fy = p.y / (size - 1) as f32 * std::f32::consts::PI;
            p.z = fx.sin() * fy.sin() * 2.0;
        }
        g
    }

    // ---- Half-edge structure tests ----

    #[test]
    fn test_halfedge_construction() {
        let g = make_tetrahedron();
        let hem = HalfEdgeMesh::from_geometry(&g, &FeatureImportances::default(), None);
        assert_eq!(hem.half_edges.len(), 12);
        assert_eq!(hem.active_face_count, 4);
        for he in &hem.half_edges {
            assert_ne!(he.twin, INVALID, "closed surface half-edge should have twin");
        }
        for v in 0..4 {
            assert_eq!(hem.neighbors(v).len(), 3);
            assert!(!hem.border[v]);
        }
        assert!(hem.check_link_condition(0, 1));
    }

    #[test]
    fn test_halfedge_boundary() {
        let hem = HalfEdgeMesh::from_geometry(&make_single_triangle(), &FeatureImportances::default(), None);
        assert!(hem.half_edges.iter().all(|he| he.twin == INVALID));
        assert!((0..3).all(|v| hem.border[v]));
    }

    #[test]
    fn test_non_manifold_vertex_is_locked() {
        // two triangles touching at vertex 0 only
        let g = GeometryData::from_coords_and_triangles(
            "bowtie",
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(1.0, 1.0, 0.0),
                Point3f::new(-1.0, 0.0, 0.0),
                Point3f::new(-1.0, -1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 3, 4]],
        );
        let hem = HalfEdgeMesh::from_geometry(&g, &FeatureImportances::default(), None);
        assert!(hem.locked[0]);
        assert!(!hem.locked[1]);
    }

    #[test]
    fn test_degenerate_input_triangle_is_dropped() {
        let mut g = make_plane_grid(3);
        g.triangles.push([0, 0, 1]);
        let out = EdgeCollapseReducer::new()
            .reduce(&g, &ReductionTargets::triangles(100))
            .unwrap();
        assert_eq!(out.geometry.triangle_count(), 8);
    }

    // ---- Reduction tests ----

    #[test]
    fn test_empty_geometry() {
        let r = EdgeCollapseReducer::new();
        assert!(r.simplify(&GeometryData::new("empty"), 0.5).is_err());
        assert!(r.reduce(&GeometryData::new("empty"), &ReductionTargets::triangles(0)).is_err());
    }

    #[test]
    fn test_invalid_reduction_ratio() {
        let r = EdgeCollapseReducer::new();
        let g = make_single_triangle();
        assert!(r.simplify(&g, -0.1).is_err());
        assert!(r.simplify(&g, 1.1).is_err());
    }

    #[test]
    fn test_zero_reduction() {
        let result = EdgeCollapseReducer::new().simplify(&make_single_triangle(), 0.0).unwrap();
        assert_eq!(result.vertex_count(), 3);
        assert_eq!(result.triangle_count(), 1);
    }

    #[test]
    fn test_triangle_target_on_grid() {
        let g = make_plane_grid(6);
        assert_eq!(g.triangle_count(), 50);
        let out = EdgeCollapseReducer::new()
            .reduce(&g, &ReductionTargets::triangles(25))
            .unwrap();
        assert!(out.geometry.triangle_count() <= 25);
        assert!(out.geometry.triangle_count() > 0);
        assert_eq!(out.stats.triangles_before, 50);
        assert_eq!(out.stats.triangles_after, out.geometry.triangle_count());
        assert!(out.geometry.validate().is_ok());
        // flat collapses cost nothing
        assert!(out.stats.max_deviation < 1e-3);
    }

    #[test]
    fn test_curved_surface_reduction() {
        let g = make_curved_surface(8);
        let out = EdgeCollapseReducer::new().simplify(&g, 0.5).unwrap();
        assert!(out.triangle_count() < g.triangle_count());
        assert!(out.triangle_count() > 0);
    }

    #[test]
    fn test_deviation_target_stops_early() {
        let g = make_curved_surface(10);
        let tight = EdgeCollapseReducer::new()
            .reduce(&g, &ReductionTargets::deviation(1e-4))
            .unwrap();
        let loose = EdgeCollapseReducer::new()
            .reduce(&g, &ReductionTargets::deviation(0.5))
            .unwrap();
        assert!(tight.geometry.triangle_count() > loose.geometry.triangle_count());
        assert!(loose.stats.max_deviation <= 0.5);
    }

    #[test]
    fn test_stop_condition_all_reaches_every_target() {
        let g = make_curved_surface(10);
        let any = ReductionTargets::combine(StopCondition::Any, &[100], &[1e-4]);
        let all = ReductionTargets::combine(StopCondition::All, &[100], &[1e-4]);
        let r = EdgeCollapseReducer::new();
        let any_out = r.reduce(&g, &any).unwrap();
        let all_out = r.reduce(&g, &all).unwrap();
        assert!(all_out.geometry.triangle_count() <= 100);
        assert!(any_out.geometry.triangle_count() >= all_out.geometry.triangle_count());
    }

    #[test]
    fn test_locked_vertices_survive_in_place() {
        let mut g = make_plane_grid(6);
        for v in [7, 14, 21] {
            g.lock_vertex(v);
        }
        let out = EdgeCollapseReducer::new()
            .reduce(&g, &ReductionTargets::triangles(4))
            .unwrap();
        for v in [7, 14, 21] {
            let mapped = out.vertex_map[v].unwrap();
            assert_eq!(out.geometry.coords[mapped], g.coords[v]);
            assert!(out.geometry.is_vertex_locked(mapped));
        }
        assert!(out.collapse_log.iter().all(|c| ![7, 14, 21].contains(&c.removed)));
    }

    #[test]
    fn test_locked_border_keeps_outline() {
        let g = make_plane_grid(6);
        let reducer = EdgeCollapseReducer {
            lock_geometric_border: true,
            ..EdgeCollapseReducer::default()
        };
        let out = reducer.reduce(&g, &ReductionTargets::triangles(0)).unwrap();
        // all 20 border vertices remain at their positions
        let border: Vec<usize> = (0..36)
            .filter(|v| {
                let (x, y) = (v % 6, v / 6);
                x == 0 || y == 0 || x == 5 || y == 5
            })
            .collect();
        for v in border {
            let mapped = out.vertex_map[v].unwrap();
            assert_eq!(out.geometry.coords[mapped], g.coords[v]);
        }
    }

    #[test]
    fn test_forced_collapses_apply_first() {
        let g = make_plane_grid(4);
        // bottom row 0-1-2-3: fold 1 into 0 then 2 into 0
        let forced = [
            ForcedCollapse { removed: 1, kept: 0 },
            ForcedCollapse { removed: 2, kept: 0 },
            ForcedCollapse { removed: 15, kept: 99 },
        ];
        let out = EdgeCollapseReducer::new()
            .reduce_with(&g, &ReductionTargets::triangles(18), &forced, None)
            .unwrap();
        assert_eq!(out.stats.forced_collapses, 2);
        assert_eq!(out.stats.skipped_forced_collapses, 1);
        assert_eq!(out.collapse_log[0].removed, 1);
        assert_eq!(out.collapse_log[1].removed, 2);
        assert_eq!(out.vertex_map[1], out.vertex_map[0]);
        assert_eq!(out.geometry.coords[out.vertex_map[0].unwrap()], g.coords[0]);
        assert_eq!(out.skipped_forced, vec![ForcedCollapse { removed: 15, kept: 99 }]);
    }

    #[test]
    fn test_skipped_forced_collapse_pins_its_vertex() {
        let g = make_plane_grid(6);
        // 14 and 21 are diagonal neighbours without a shared edge
        let forced = [ForcedCollapse { removed: 14, kept: 21 }];
        let out = EdgeCollapseReducer::new()
            .reduce_with(&g, &ReductionTargets::triangles(0), &forced, None)
            .unwrap();
        assert_eq!(out.stats.skipped_forced_collapses, 1);
        assert_eq!(out.skipped_forced, forced.to_vec());
        assert!(out.collapse_log.iter().all(|c| c.removed != 14));
        let mapped = out.vertex_map[14].unwrap();
        assert_eq!(out.geometry.coords[mapped], g.coords[14]);
    }

    #[test]
    fn test_deterministic() {
        let g = make_curved_surface(9);
        let r = EdgeCollapseReducer::new();
        let a = r.reduce(&g, &ReductionTargets::triangles(40)).unwrap();
        let b = r.reduce(&g, &ReductionTargets::triangles(40)).unwrap();
        assert_eq!(a.geometry, b.geometry);
        assert_eq!(a.collapse_log, b.collapse_log);
    }

    #[test]
    fn test_corner_attributes_follow_surviving_corners() {
        let mut g = make_plane_grid(5);
        let uv: Vec<f32> = g
            .triangles
            .iter()
            .flatten()
            .flat_map(|&v| [g.coords[v].x / 4.0, g.coords[v].y / 4.0])
            .collect();
        g.set_tex_coords(0, &uv).unwrap();
        g.add_material_ids();
        let out = EdgeCollapseReducer::new().simplify(&g, 0.5).unwrap();
        assert!(out.validate().is_ok());
        let tex = out.tex_coords(0).unwrap();
        assert_eq!(tex.len(), out.corner_count());
        // UVs stay inside the original chart
        assert!(tex.iter().all(|t| (0.0..=1.0).contains(&t.x) && (0.0..=1.0).contains(&t.y)));
        // the chart corner at the origin is never merged away
        assert!(tex.iter().any(|t| *t == Vector2f::new(0.0, 0.0)));
    }

    #[test]
    fn test_material_border_is_preserved() {
        let mut g = make_plane_grid(7);
        // left half material 0, right half material 1
        let ids: Vec<usize> = (0..g.triangle_count())
            .map(|t| {
                let [a, b, c] = g.triangles[t];
                let cx = (g.coords[a].x + g.coords[b].x + g.coords[c].x) / 3.0;
                usize::from(cx > 3.0)
            })
            .collect();
        g.set_material_ids(&ids).unwrap();
        let reducer = EdgeCollapseReducer {
            importances: FeatureImportances {
                material: 100.0,
                ..FeatureImportances::default()
            },
            ..EdgeCollapseReducer::default()
        };
        let out = reducer.reduce(&g, &ReductionTargets::triangles(30)).unwrap().geometry;
        for t in 0..out.triangle_count() {
            let [a, b, c] = out.triangles[t];
            let cx = (out.coords[a].x + out.coords[b].x + out.coords[c].x) / 3.0;
            let expected = usize::from(cx > 3.0);
            assert_eq!(out.material_id(t), expected, "triangle {} crossed the material border", t);
        }
    }

    #[test]
    fn test_progress_is_reported() {
        let g = make_plane_grid(30);
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let tracker = ProgressTracker::new(
            "Reduction",
            vec![Arc::new(move |_: &str, _: f32| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                true
            }) as Arc<dyn lodcrate_core::Observer>],
        );
        EdgeCollapseReducer::new()
            .reduce_with(&g, &ReductionTargets::triangles(100), &[], Some(&tracker))
            .unwrap();
        assert!(calls.load(std::sync::atomic::Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_observer_abort_stops_reduction() {
        let g = make_plane_grid(30);
        let tracker = ProgressTracker::new(
            "Reduction",
            vec![Arc::new(|_: &str, _: f32| false) as Arc<dyn lodcrate_core::Observer>],
        );
        let result = EdgeCollapseReducer::new().reduce_with(&g, &ReductionTargets::triangles(100), &[], Some(&tracker));
        assert!(matches!(result, Err(Error::Aborted)));
    }

    /// Grid over x in [-1, 1] whose triangulation mirrors about x = 0
    fn make_mirrored_grid(n: usize) -> GeometryData {
        let mut coords = Vec::new();
        for j in 0..=n {
            for i in 0..=n {
                let x = -1.0 + 2.0 * i as f32 / n as f32;
                let y = j as f32 / n as f32;
                coords.push(Point3f::new(x, y, 0.4 * x * x + 0.2 * (3.0 * y).sin()));
            }
        }
        let id = |i: usize, j: usize| j * (n + 1) + i;
        let mut triangles = Vec::new();
        for j in 0..n {
            for i in 0..n {
                let (a, b, c, d) = (id(i, j), id(i + 1, j), id(i + 1, j + 1), id(i, j + 1));
                if i < n / 2 {
                    triangles.push([a, b, c]);
                    triangles.push([a, c, d]);
                } else {
                    triangles.push([a, b, d]);
                    triangles.push([b, c, d]);
                }
            }
        }
        GeometryData::from_coords_and_triangles("mirrored", coords, triangles)
    }

    #[test]
    fn test_triangle_weights_steer_collapses() {
        let g = make_curved_surface(10);
        let centroid_x = |g: &GeometryData, t: usize| {
            let [a, b, c] = g.triangles[t];
            (g.coords[a].x + g.coords[b].x + g.coords[c].x) / 3.0
        };
        let weights: Vec<f32> = (0..g.triangle_count())
            .map(|t| if centroid_x(&g, t) < 4.5 { 100.0 } else { 0.01 })
            .collect();
        let out = EdgeCollapseReducer::new()
            .with_triangle_weights(weights)
            .reduce(&g, &ReductionTargets::triangles(60))
            .unwrap()
            .geometry;
        let heavy = (0..out.triangle_count()).filter(|&t| centroid_x(&out, t) < 4.5).count();
        assert!(heavy * 2 > out.triangle_count(), "{} of {}", heavy, out.triangle_count());
    }

    #[test]
    fn test_triangle_weight_count_must_match() {
        let g = make_plane_grid(4);
        let result = EdgeCollapseReducer::new()
            .with_triangle_weights(vec![1.0; 3])
            .reduce(&g, &ReductionTargets::triangles(4));
        assert!(matches!(result, Err(Error::InvalidSettings(_))));
    }

    #[test]
    fn test_symmetry_is_kept() {
        let g = make_mirrored_grid(8);
        let plane = SymmetryPlane::new(crate::symmetry::SymmetryAxis::X, 0.0);
        for constraint in [
            SymmetryConstraint {
                plane: Some(plane),
                tolerance: 1e-4,
            },
            SymmetryConstraint {
                plane: None,
                tolerance: 1e-4,
            },
        ] {
            let reducer = EdgeCollapseReducer {
                symmetry: Some(constraint),
                ..EdgeCollapseReducer::default()
            };
            let out = reducer.reduce(&g, &ReductionTargets::triangles(48)).unwrap().geometry;
            assert!(out.triangle_count() <= 64, "{}", out.triangle_count());

            let near = |p: &Point3f, q: &Point3f| (p - q).norm() < 1e-4;
            for p in &out.coords {
                let m = plane.reflect(p);
                assert!(out.coords.iter().any(|q| near(&m, q)), "{:?} has no mirror", p);
            }
            for t in &out.triangles {
                let mirrored = t.map(|v| plane.reflect(&out.coords[v]));
                let found = out.triangles.iter().any(|u| {
                    mirrored.iter().all(|m| u.iter().any(|&v| near(m, &out.coords[v])))
                });
                assert!(found, "triangle {:?} has no mirror", t);
            }
        }
    }

    #[test]
    fn test_plane_vertices_stay_on_the_plane() {
        let g = make_mirrored_grid(8);
        let reducer = EdgeCollapseReducer {
            symmetry: Some(SymmetryConstraint {
                plane: Some(SymmetryPlane::new(crate::symmetry::SymmetryAxis::X, 0.0)),
                tolerance: 1e-4,
            }),
            ..EdgeCollapseReducer::default()
        };
        let out = reducer.reduce(&g, &ReductionTargets::triangles(40)).unwrap();
        for v in (0..=8).map(|j| j * 9 + 4) {
            if let Some(mapped) = out.vertex_map[v] {
                assert_eq!(out.geometry.coords[mapped].x, 0.0);
            }
        }
    }
}
