//! Seam-constrained reduction

use std::collections::{BTreeMap, HashSet};

use lodcrate_core::{Error, GeometryData, Point3f, ProgressTracker, Result};
use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::{Deserialize, Serialize};

use super::analyzer::{border_of, matching_origin};
use super::ModularSeams;
use crate::edge_collapse::{EdgeCollapseReducer, ForcedCollapse, ReductionOutput, ReductionTargets};
use crate::settings::StopCondition;

type SeamPoint = GeomWithData<[f32; 3], (usize, u32)>;

/// How far shared seams are reduced when a geometry is reduced against a
/// set of modular seams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModularSeamSettings {
    pub modular_seams: Option<ModularSeams>,
    /// Fraction of each seam's vertices to keep
    pub reduction_ratio: f32,
    /// Largest allowed deviation of a seam polyline
    pub max_deviation: f32,
    pub stop_condition: StopCondition,
}

impl Default for ModularSeamSettings {
    fn default() -> Self {
        Self {
            modular_seams: None,
            reduction_ratio: 0.75,
            max_deviation: 0.0,
            stop_condition: StopCondition::All,
        }
    }
}

impl ModularSeamSettings {
    pub fn new(modular_seams: ModularSeams) -> Self {
        Self {
            modular_seams: Some(modular_seams),
            ..Self::default()
        }
    }

    pub fn with_reduction_ratio(mut self, ratio: f32) -> Self {
        self.reduction_ratio = ratio;
        self
    }

    pub fn with_max_deviation(mut self, deviation: f32) -> Self {
        self.max_deviation = deviation;
        self
    }

    pub fn with_stop_condition(mut self, stop_condition: StopCondition) -> Self {
        self.stop_condition = stop_condition;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.reduction_ratio) {
            return Err(Error::InvalidSettings(format!(
                "modular seam reduction ratio {} is outside [0, 1]",
                self.reduction_ratio
            )));
        }
        if !(self.max_deviation >= 0.0) {
            return Err(Error::InvalidSettings(
                "modular seam max deviation must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// Reduce `geometry` so that every modular seam it contains is reduced
/// exactly as recorded.
///
/// Border vertices matching a seam vertex are snapped to its recorded
/// position. The recorded collapse prefix selected by the seam targets is
/// applied first, the remaining seam vertices are locked, and the rest of
/// the geometry is reduced normally towards `targets`. A recorded collapse
/// this geometry cannot perform leaves its vertex locked in place and is
/// listed in [`ReductionOutput::skipped_forced`].
pub fn reduce_with_modular_seams(
    reducer: &EdgeCollapseReducer,
    geometry: &GeometryData,
    targets: &ReductionTargets,
    settings: &ModularSeamSettings,
    progress: Option<&ProgressTracker>,
) -> Result<ReductionOutput> {
    settings.validate()?;
    let Some(seams) = &settings.modular_seams else {
        return reducer.reduce_with(geometry, targets, &[], progress);
    };
    geometry.validate()?;

    let mut working = geometry.clone();
    let origin = matching_origin(geometry, seams.is_translation_independent);
    let (border_vertices, border_edges) = border_of(geometry);
    let border_edges: HashSet<(usize, usize)> = border_edges.into_iter().collect();

    let tree = RTree::bulk_load(
        seams
            .seams
            .iter()
            .enumerate()
            .flat_map(|(s, seam)| {
                seam.vertices
                    .iter()
                    .enumerate()
                    .map(move |(i, &p)| SeamPoint::new(p, (s, i as u32)))
            })
            .collect(),
    );
    let radius2 = seams.tolerance * seams.tolerance;

    // matches[(seam, seam vertex)] = geometry vertices found there
    let mut matches: BTreeMap<(usize, u32), Vec<usize>> = BTreeMap::new();
    let mut matched = Vec::new();
    for &v in &border_vertices {
        let p = geometry.coords[v] - origin;
        let query = [p.x, p.y, p.z];
        let hits: Vec<&SeamPoint> = tree.locate_within_distance(query, radius2).collect();
        let nearest = hits.iter().min_by(|a, b| {
            let (da, db) = (squared_distance(a.geom(), &query), squared_distance(b.geom(), &query));
            da.total_cmp(&db).then(a.data.cmp(&b.data))
        });
        let Some(nearest) = nearest else {
            continue;
        };
        let [x, y, z] = *nearest.geom();
        working.coords[v] = if seams.is_translation_independent {
            Point3f::new(x, y, z) + origin
        } else {
            Point3f::new(x, y, z)
        };
        for hit in &hits {
            matches.entry(hit.data).or_default().push(v);
        }
        matched.push(v);
    }

    let mut forced = Vec::new();
    let mut removed: HashSet<usize> = HashSet::new();
    let mut applied = 0;
    for (s, seam) in seams.seams.iter().enumerate() {
        let vertex_of = |i: u32| match matches.get(&(s, i)).map(Vec::as_slice) {
            Some([v]) => Some(*v),
            _ => None,
        };
        let complete = (0..seam.vertices.len() as u32).all(|i| vertex_of(i).is_some())
            && seam.edges.iter().all(|&[a, b]| match (vertex_of(a), vertex_of(b)) {
                (Some(va), Some(vb)) => border_edges.contains(&(va.min(vb), va.max(vb))),
                _ => false,
            });
        if !complete {
            if (0..seam.vertices.len() as u32).any(|i| matches.contains_key(&(s, i))) {
                log::debug!(
                    "{}: modular seam {} only partially matches and stays locked",
                    geometry.name,
                    s
                );
            }
            continue;
        }
        let prefix = seam.collapse_prefix(
            settings.reduction_ratio,
            settings.max_deviation as f64,
            settings.stop_condition,
        );
        for c in &seam.collapses[..prefix] {
            if let (Some(r), Some(k)) = (vertex_of(c.removed), vertex_of(c.kept)) {
                forced.push(ForcedCollapse { removed: r, kept: k });
                removed.insert(r);
            }
        }
        applied += 1;
    }

    for &v in &matched {
        if !removed.contains(&v) {
            working.lock_vertex(v);
        }
    }

    let mut output = reducer.reduce_with(&working, targets, &forced, progress)?;
    if output.stats.skipped_forced_collapses > 0 {
        log::warn!(
            "{}: {} of {} seam collapses could not be replayed",
            geometry.name,
            output.stats.skipped_forced_collapses,
            forced.len()
        );
    }

    // Seam locks were only needed during reduction
    output.geometry.vertex_locks = geometry.vertex_locks.as_ref().map(|locks| {
        let mut kept = vec![false; output.geometry.vertex_count()];
        for (v, &locked) in locks.iter().enumerate() {
            if let Some(Some(new)) = output.vertex_map.get(v) {
                kept[*new] |= locked;
            }
        }
        kept
    });

    log::info!(
        "{}: {} modular seams applied, {} seam vertices matched, {} seam collapses replayed",
        geometry.name,
        applied,
        matched.len(),
        output.stats.forced_collapses
    );
    Ok(output)
}

fn squared_distance(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seams::{ModularSeam, SeamCollapse};

    /// Strip of `n` quads along x between y = 0 and y = 1, top border at y = 1
    fn strip(n: usize) -> GeometryData {
        let mut coords = Vec::new();
        for row in 0..2 {
            for i in 0..=n {
                coords.push(Point3f::new(i as f32, row as f32, 0.0));
            }
        }
        let mut triangles = Vec::new();
        for i in 0..n {
            let (a, b, c, d) = (i, i + 1, n + 1 + i, n + 2 + i);
            triangles.push([a, b, d]);
            triangles.push([a, d, c]);
        }
        GeometryData::from_coords_and_triangles("strip", coords, triangles)
    }

    fn top_seam(n: usize) -> ModularSeams {
        ModularSeams {
            tolerance: 1e-3,
            is_translation_independent: false,
            seams: vec![ModularSeam {
                vertices: (0..=n).map(|i| [i as f32, 1.0, 0.0]).collect(),
                edges: (0..n as u32).map(|i| [i, i + 1]).collect(),
                geometry_names: vec!["a".into(), "b".into()],
                consistent: true,
                collapses: (1..n as u32)
                    .map(|i| SeamCollapse {
                        removed: i,
                        kept: 0,
                        max_deviation: 0.0,
                    })
                    .collect(),
            }],
        }
    }

    #[test]
    fn test_without_seams_reduces_normally() {
        let g = strip(4);
        let out = reduce_with_modular_seams(
            &EdgeCollapseReducer::new(),
            &g,
            &ReductionTargets::triangles(4),
            &ModularSeamSettings::default(),
            None,
        )
        .unwrap();
        assert_eq!(out.stats.forced_collapses, 0);
    }

    #[test]
    fn test_seam_vertices_snap_and_stay() {
        let mut g = strip(4);
        // nudge a top vertex within the tolerance
        g.coords[7].x += 2e-4;
        let settings = ModularSeamSettings::new(top_seam(4))
            .with_reduction_ratio(1.0)
            .with_stop_condition(StopCondition::Any);
        let out = reduce_with_modular_seams(
            &EdgeCollapseReducer::new(),
            &g,
            &ReductionTargets::triangles(2),
            &settings,
            None,
        )
        .unwrap();
        assert_eq!(out.stats.forced_collapses, 0);
        for v in 5..10 {
            let mapped = out.vertex_map[v].unwrap();
            assert_eq!(out.geometry.coords[mapped], Point3f::new((v - 5) as f32, 1.0, 0.0));
        }
        assert!(out.geometry.vertex_locks.is_none());
    }

    #[test]
    fn test_recorded_prefix_is_replayed() {
        let g = strip(4);
        // keep 3 of 5 seam vertices: two forced collapses
        let settings = ModularSeamSettings::new(top_seam(4))
            .with_reduction_ratio(0.5)
            .with_stop_condition(StopCondition::Any)
            .with_max_deviation(1.0);
        let out = reduce_with_modular_seams(
            &EdgeCollapseReducer::new(),
            &g,
            &ReductionTargets::triangles(8),
            &settings,
            None,
        )
        .unwrap();
        assert_eq!(out.stats.forced_collapses, 2);
        assert_eq!(out.vertex_map[6], out.vertex_map[5]);
        assert_eq!(out.vertex_map[7], out.vertex_map[5]);
        assert_ne!(out.vertex_map[8], out.vertex_map[5]);
    }

    #[test]
    fn test_invalid_settings() {
        let settings = ModularSeamSettings::default().with_reduction_ratio(2.0);
        let result = reduce_with_modular_seams(
            &EdgeCollapseReducer::new(),
            &strip(2),
            &ReductionTargets::triangles(1),
            &settings,
            None,
        );
        assert!(matches!(result, Err(Error::InvalidSettings(_))));
    }
}
