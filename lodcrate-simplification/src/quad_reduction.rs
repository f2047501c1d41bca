//! Quad detection and quad-preserving reduction
//!
//! Triangulated quads are found as adjacent, nearly coplanar triangle pairs
//! forming a convex quad whose shared edge is the longest edge of both
//! triangles. Pairs are stored as consecutive triangles flagged
//! [`QuadFlag::FirstOfQuad`] / [`QuadFlag::SecondOfQuad`]. Reduction then
//! runs the edge collapser with quad diagonals protected.

use std::collections::HashMap;

use itertools::Itertools;
use lodcrate_core::{Bounded, Error, GeometryData, ProgressTracker, QuadFlag, Result};
use serde::{Deserialize, Serialize};

use crate::edge_collapse::{EdgeCollapseReducer, ReductionOutput};
use crate::settings::{ReductionSettings, StopCondition};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadReductionSettings {
    pub reduction: ReductionSettings,
    /// Largest angle (degrees) between the two halves of a quad
    pub max_quad_fold_angle: f32,
    /// Extra cost for collapses that break a quad
    pub quad_penalty: f64,
}

impl Default for QuadReductionSettings {
    fn default() -> Self {
        let mut reduction = ReductionSettings::default();
        reduction.set_reduction_targets(StopCondition::All, false, false, false, true);
        reduction.reduction_target_on_screen_size = 100;
        Self {
            reduction,
            max_quad_fold_angle: 15.0,
            quad_penalty: 4.0,
        }
    }
}

impl QuadReductionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reduction_targets(
        &mut self,
        stop_condition: StopCondition,
        use_triangle_ratio: bool,
        use_triangle_count: bool,
        use_max_deviation: bool,
        use_on_screen_size: bool,
    ) {
        self.reduction.set_reduction_targets(
            stop_condition,
            use_triangle_ratio,
            use_triangle_count,
            use_max_deviation,
            use_on_screen_size,
        );
    }

    pub fn validate(&self) -> Result<()> {
        self.reduction.validate()?;
        if !(0.0..90.0).contains(&self.max_quad_fold_angle) {
            return Err(Error::InvalidSettings(format!(
                "quad fold angle {} is outside 0..90 degrees",
                self.max_quad_fold_angle
            )));
        }
        if self.quad_penalty < 0.0 {
            return Err(Error::InvalidSettings("quad penalty must not be negative".into()));
        }
        Ok(())
    }
}

pub fn quad_count(geometry: &GeometryData) -> usize {
    geometry
        .quad_flags
        .as_ref()
        .map(|flags| flags.iter().filter(|f| **f == QuadFlag::FirstOfQuad).count())
        .unwrap_or(0)
}

/// Reorder triangles (and every per-triangle and per-corner channel)
fn permute_triangles(geometry: &mut GeometryData, order: &[usize]) {
    fn gather<T: Copy>(values: &[T], index: &[usize]) -> Vec<T> {
        index.iter().map(|&i| values[i]).collect()
    }
    let corners: Vec<usize> = order.iter().flat_map(|&t| [t * 3, t * 3 + 1, t * 3 + 2]).collect();
    geometry.triangles = gather(&geometry.triangles, order);
    for channel in geometry.tex_coords.iter_mut().flatten() {
        *channel = gather(channel, &corners);
    }
    for channel in geometry.colors.iter_mut().flatten() {
        *channel = gather(channel, &corners);
    }
    if let Some(n) = &mut geometry.normals {
        *n = gather(n, &corners);
    }
    if let Some(t) = &mut geometry.tangents {
        *t = gather(t, &corners);
    }
    if let Some(ids) = &mut geometry.material_ids {
        *ids = gather(ids, order);
    }
    if let Some(flags) = &mut geometry.quad_flags {
        *flags = gather(flags, order);
    }
}

fn longest_edge_is(geometry: &GeometryData, t: usize, a: usize, b: usize) -> bool {
    let tri = geometry.triangles[t];
    let shared = (geometry.coords[a] - geometry.coords[b]).norm_squared();
    (0..3).all(|k| {
        let (u, v) = (tri[k], tri[(k + 1) % 3]);
        (geometry.coords[u] - geometry.coords[v]).norm_squared() <= shared * (1.0 + 1e-4)
    })
}

fn apex(tri: [usize; 3], a: usize, b: usize) -> usize {
    tri.into_iter().find(|&v| v != a && v != b).unwrap_or(tri[0])
}

/// Planarity score of the quad formed by triangles `t` and `u` sharing edge
/// `(a, b)`, or `None` when they do not form a convex, flat enough quad
fn quad_score(geometry: &GeometryData, t: usize, u: usize, a: usize, b: usize, min_cos: f32) -> Option<f32> {
    let (nt, nu) = (geometry.face_normal(t), geometry.face_normal(u));
    let cos = nt.dot(&nu);
    if cos < min_cos || !longest_edge_is(geometry, t, a, b) || !longest_edge_is(geometry, u, a, b) {
        return None;
    }
    let n = nt + nu;
    let (c, d) = (apex(geometry.triangles[t], a, b), apex(geometry.triangles[u], a, b));
    let p = |v: usize| geometry.coords[v];
    let side = |x: usize, y: usize, z: usize| (p(y) - p(x)).cross(&(p(z) - p(x))).dot(&n);
    let convex = side(a, b, c) * side(a, b, d) < 0.0 && side(c, d, a) * side(c, d, b) < 0.0;
    convex.then_some(cos)
}

/// Pair up triangles into quads. Existing quad pairs are kept; the other
/// triangles are paired greedily in index order with their flattest
/// neighbor. Returns the number of quads.
pub fn link_quads(geometry: &mut GeometryData, max_fold_angle: f32) -> usize {
    let n = geometry.triangle_count();
    geometry.add_quad_flags();
    let flags = geometry.quad_flags.clone().unwrap_or_default();
    let min_cos = max_fold_angle.to_radians().cos();

    let edge_faces: HashMap<(usize, usize), Vec<usize>> = geometry
        .triangles
        .iter()
        .enumerate()
        .flat_map(|(t, tri)| {
            (0..3).map(move |k| {
                let (a, b) = (tri[k], tri[(k + 1) % 3]);
                ((a.min(b), a.max(b)), t)
            })
        })
        .into_group_map();

    let mut partner: Vec<Option<usize>> = vec![None; n];
    for t in 0..n.saturating_sub(1) {
        if flags[t] == QuadFlag::FirstOfQuad && flags[t + 1] == QuadFlag::SecondOfQuad {
            partner[t] = Some(t + 1);
            partner[t + 1] = Some(t);
        }
    }
    for t in 0..n {
        if partner[t].is_some() {
            continue;
        }
        let tri = geometry.triangles[t];
        let mut best: Option<(f32, usize)> = None;
        for k in 0..3 {
            let (a, b) = (tri[k], tri[(k + 1) % 3]);
            let Some(faces) = edge_faces.get(&(a.min(b), a.max(b))) else {
                continue;
            };
            if faces.len() != 2 {
                continue;
            }
            for &u in faces {
                if u == t || partner[u].is_some() {
                    continue;
                }
                if let Some(score) = quad_score(geometry, t, u, a, b, min_cos) {
                    let better = match best {
                        None => true,
                        Some((s, w)) => score > s || (score == s && u < w),
                    };
                    if better {
                        best = Some((score, u));
                    }
                }
            }
        }
        if let Some((_, u)) = best {
            partner[t] = Some(u);
            partner[u] = Some(t);
        }
    }

    let mut order = Vec::with_capacity(n);
    let mut new_flags = Vec::with_capacity(n);
    for t in 0..n {
        match partner[t] {
            Some(u) if u > t => {
                order.extend([t, u]);
                new_flags.extend([QuadFlag::FirstOfQuad, QuadFlag::SecondOfQuad]);
            }
            Some(_) => {}
            None => {
                order.push(t);
                new_flags.push(QuadFlag::Triangle);
            }
        }
    }
    permute_triangles(geometry, &order);
    geometry.quad_flags = Some(new_flags);
    quad_count(geometry)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuadReductionStats {
    pub quads_before: usize,
    pub quads_after: usize,
}

/// Reduce `geometry` while keeping as many quads intact as possible
pub fn quad_reduce(
    geometry: &GeometryData,
    settings: &QuadReductionSettings,
    progress: Option<&ProgressTracker>,
) -> Result<(ReductionOutput, QuadReductionStats)> {
    settings.validate()?;
    let mut linked = geometry.clone();
    let quads_before = link_quads(&mut linked, settings.max_quad_fold_angle);

    let reducer = EdgeCollapseReducer {
        protect_quad_diagonals: true,
        quad_penalty: settings.quad_penalty,
        ..EdgeCollapseReducer::from_settings(&settings.reduction)
    };
    let targets = settings
        .reduction
        .targets(linked.triangle_count(), linked.radius() as f64 * 2.0);
    let mut output = reducer.reduce_with(&linked, &targets, &[], progress)?;
    let quads_after = link_quads(&mut output.geometry, settings.max_quad_fold_angle);
    log::info!(
        "{}: quad reduction kept {} of {} quads, {} -> {} triangles",
        geometry.name,
        quads_after,
        quads_before,
        output.stats.triangles_before,
        output.stats.triangles_after
    );
    Ok((
        output,
        QuadReductionStats {
            quads_before,
            quads_after,
        },
    ))
}
