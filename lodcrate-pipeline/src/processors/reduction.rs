use std::sync::atomic::{AtomicUsize, Ordering};

use lodcrate_core::{Error, ErrorKind, GeometryData, NodeId, ProgressTracker, Result, Scene};
use lodcrate_simplification::{
    calculate_normals, reduce_with_modular_seams, repair, EdgeCollapseReducer, ModularSeamSettings,
    NormalCalculationSettings, ReductionSettings, ReductionStats, RepairSettings,
};
use rayon::prelude::*;

use super::{Processor, ProcessorCore};
use crate::visibility::{visibility_weights, VisibilityContext, VisibilitySettings};

/// Reduces every in-scope mesh with quadric edge collapse.
///
/// Each mesh is repaired (if enabled), reduced towards the shared targets,
/// optionally against a set of modular seams, and gets recomputed normals.
/// Meshes are independent and reduced in parallel.
///
/// With visibility enabled, triangles no viewpoint sees can be culled first
/// and the rest weighted by how visible they are. Camera meshes and occluders
/// are not reduced, and camera meshes are removed from the output.
#[derive(Debug, Default)]
pub struct ReductionProcessor {
    core: ProcessorCore,
    pub reduction_settings: ReductionSettings,
    pub repair_settings: RepairSettings,
    pub normal_calculation_settings: NormalCalculationSettings,
    pub modular_seam_settings: Option<ModularSeamSettings>,
    pub visibility_settings: VisibilitySettings,
    stats: Vec<(NodeId, ReductionStats)>,
}

impl ReductionProcessor {
    pub fn new(scene: Scene) -> Self {
        Self {
            core: ProcessorCore::new(scene),
            ..Self::default()
        }
    }

    /// Per-mesh statistics of the last run
    pub fn stats(&self) -> &[(NodeId, ReductionStats)] {
        &self.stats
    }

    fn repair_one(&self, geometry: &mut GeometryData) -> Result<()> {
        let repaired = repair(geometry, &self.repair_settings)?;
        log::debug!(
            "{}: welded {} vertices, split {} triangles",
            geometry.name,
            repaired.welded_vertices,
            repaired.split_triangles
        );
        Ok(())
    }

    /// Cull hidden triangles if enabled and return reducer weights if enabled
    fn apply_visibility(
        &self,
        context: &VisibilityContext,
        inputs: &mut [(NodeId, GeometryData)],
    ) -> Vec<Option<Vec<f32>>> {
        let settings = &self.visibility_settings;
        let visibility = context.compute(self.core.scene(), inputs);
        inputs
            .iter_mut()
            .zip(visibility)
            .map(|((_, g), mut seen)| {
                if settings.cull_occluded_geometry {
                    let keep: Vec<bool> = seen.iter().map(|&v| v > 0.0).collect();
                    let culled = keep.iter().filter(|k| !**k).count();
                    if culled > 0 {
                        g.retain_triangles(&keep);
                        g.remove_unused_vertices();
                        seen.retain(|&v| v > 0.0);
                        log::info!("{}: culled {} hidden triangles", g.name, culled);
                    }
                }
                settings
                    .use_visibility_weights_in_reducer
                    .then(|| visibility_weights(&seen, settings.visibility_weights_power))
            })
            .collect()
    }

    fn reduce_one(
        &self,
        reducer: &EdgeCollapseReducer,
        seam_settings: &ModularSeamSettings,
        diameter: f64,
        input: &GeometryData,
        weights: Option<Vec<f32>>,
        progress: &ProgressTracker,
    ) -> Result<(GeometryData, ReductionStats)> {
        let weighted;
        let reducer = match weights {
            Some(weights) => {
                weighted = reducer.clone().with_triangle_weights(weights);
                &weighted
            }
            None => reducer,
        };
        let targets = self.reduction_settings.targets(input.triangle_count(), diameter);
        let output = reduce_with_modular_seams(reducer, input, &targets, seam_settings, Some(progress))?;
        if !output.skipped_forced.is_empty() {
            // the vertices stay locked, but the other assets sharing the seam
            // may have removed them
            let vertices: Vec<String> = output.skipped_forced.iter().map(|f| f.removed.to_string()).collect();
            self.core.reporter().error(
                self.processor_name(),
                "process",
                ErrorKind::Inconsistency,
                format!(
                    "{}: modular seam collapses of vertices [{}] could not be replayed, shared borders may differ",
                    input.name,
                    vertices.join(", ")
                ),
            );
        }
        let mut reduced = output.geometry;
        calculate_normals(&mut reduced, &self.normal_calculation_settings)?;
        Ok((reduced, output.stats))
    }
}

impl Processor for ReductionProcessor {
    fn processor_name(&self) -> &'static str {
        "ReductionProcessor"
    }

    fn core(&self) -> &ProcessorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ProcessorCore {
        &mut self.core
    }

    fn validate(&self) -> Result<()> {
        self.reduction_settings.validate()?;
        self.repair_settings.validate()?;
        self.normal_calculation_settings.validate()?;
        self.visibility_settings.validate()?;
        if let Some(seams) = &self.modular_seam_settings {
            seams.validate()?;
        }
        self.core.mapping_image_settings.validate()
    }

    fn process(&mut self, progress: &ProgressTracker) -> Result<()> {
        let scope = self
            .core
            .scene()
            .nodes_in_scope(self.reduction_settings.process_selection_set_name.as_deref())?;
        let visibility = if self.visibility_settings.is_enabled() {
            Some(VisibilityContext::from_scene(self.core.scene(), &self.visibility_settings)?)
        } else {
            None
        };
        let mut nodes: Vec<NodeId> = scope
            .into_iter()
            .filter(|&id| self.core.scene().geometry(id).is_some_and(|g| !g.is_empty()))
            .filter(|&id| !visibility.as_ref().is_some_and(|v| v.excludes(id)))
            .collect();
        self.stats.clear();
        if nodes.is_empty() {
            self.core
                .reporter()
                .warning(self.processor_name(), "process", "no meshes in the processing scope");
            return Ok(());
        }

        let sources = if self.core.mapping_image_settings.generate_mapping_image {
            self.core.snapshot_sources(&nodes)
        } else {
            Default::default()
        };
        let (min, max) = self.core.scene().calculate_extents();
        let diameter = (max - min).norm() as f64;
        let reducer = EdgeCollapseReducer::from_settings(&self.reduction_settings);
        let seam_settings = self.modular_seam_settings.clone().unwrap_or_default();

        let mut inputs: Vec<(NodeId, GeometryData)> = nodes
            .iter()
            .filter_map(|&id| self.core.scene().geometry(id).map(|g| (id, g.clone())))
            .collect();
        if self.repair_settings.is_enabled() {
            inputs.par_iter_mut().try_for_each(|(_, g)| self.repair_one(g))?;
        }
        let mut weights = match &visibility {
            Some(context) => self.apply_visibility(context, &mut inputs),
            None => vec![None; inputs.len()],
        };

        // meshes culled away entirely leave the scene
        let hidden: Vec<NodeId> = inputs.iter().filter(|(_, g)| g.is_empty()).map(|(id, _)| *id).collect();
        if !hidden.is_empty() {
            let mut kept_weights = Vec::with_capacity(inputs.len());
            for ((id, g), w) in inputs.iter().zip(weights) {
                if !g.is_empty() {
                    kept_weights.push(w);
                } else {
                    log::info!("{}: no visible triangles, mesh removed", g.name);
                    self.core.scene_mut().remove_node(*id)?;
                }
            }
            weights = kept_weights;
            inputs.retain(|(_, g)| !g.is_empty());
            nodes.retain(|id| !hidden.contains(id));
        }

        let done = AtomicUsize::new(0);
        let total = inputs.len().max(1);
        let share = 80.0 / total as f32;
        let reduced: Vec<(NodeId, GeometryData, ReductionStats)> = inputs
            .par_iter()
            .zip(weights)
            .enumerate()
            .map(|(i, ((id, g), w))| {
                let mesh_progress = progress.sub_range(share * i as f32, share * (i + 1) as f32);
                let (reduced, stats) = self.reduce_one(&reducer, &seam_settings, diameter, g, w, &mesh_progress)?;
                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                progress.report_step(0.0, 80.0, finished as f32 / total as f32)?;
                Ok((*id, reduced, stats))
            })
            .collect::<Result<_>>()?;

        for (id, geometry, stats) in reduced {
            log::info!(
                "{}: {} -> {} triangles, max deviation {:.5}",
                geometry.name,
                stats.triangles_before,
                stats.triangles_after,
                stats.max_deviation
            );
            let slot = self
                .core
                .scene_mut()
                .geometry_mut(id)
                .ok_or_else(|| Error::NotFound(format!("mesh node {}", id)))?;
            *slot = geometry;
            self.stats.push((id, stats));
        }
        if let Some(context) = &visibility {
            for &id in &context.camera_meshes {
                if self.core.scene().node(id).is_some() {
                    self.core.scene_mut().remove_node(id)?;
                }
            }
        }

        self.core.build_transfer_images(&nodes, sources, progress)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use lodcrate_core::{CameraView, NodeKind, SelectionSet, Transform3D, Vector3f};
    use lodcrate_simplification::StopCondition;

    #[test]
    fn test_reduces_to_ratio() {
        let mut processor = ReductionProcessor::new(scene_with(vec![grid("a", 8, 0.0), grid("b", 4, 1.0)]));
        processor
            .reduction_settings
            .set_reduction_targets(StopCondition::All, true, false, false, false);
        processor.reduction_settings.reduction_target_triangle_ratio = 0.25;
        processor.run_processing().unwrap();

        assert_eq!(processor.stats().len(), 2);
        for (_, stats) in processor.stats() {
            assert!(stats.triangles_after <= stats.triangles_before / 2);
        }
        let scene = processor.processed_scene();
        for node in scene.mesh_nodes() {
            assert!(scene.geometry(node).unwrap().normals.is_some());
        }
    }

    #[test]
    fn test_selection_set_limits_scope() {
        let mut scene = scene_with(vec![grid("kept", 6, 0.0), grid("reduced", 6, 1.0)]);
        let nodes = scene.mesh_nodes();
        let mut set = SelectionSet::new("ProcessSet");
        set.add_item(nodes[1]);
        scene.selection_sets.add_selection_set(set);
        if let Some(node) = scene.node_mut(nodes[1]) {
            node.relative_transform = Transform3D::translation(lodcrate_core::Vector3f::new(5.0, 0.0, 0.0));
        }

        let mut processor = ReductionProcessor::new(scene);
        processor.reduction_settings.process_selection_set_name = Some("ProcessSet".into());
        processor.reduction_settings.reduction_target_triangle_ratio = 0.5;
        processor.run_processing().unwrap();

        let scene = processor.into_scene();
        assert_eq!(scene.geometry(nodes[0]).unwrap().triangle_count(), 72);
        assert!(scene.geometry(nodes[1]).unwrap().triangle_count() < 72);
    }

    #[test]
    fn test_unknown_selection_set_fails() {
        let mut processor = ReductionProcessor::new(scene_with(vec![grid("a", 2, 0.0)]));
        processor.reduction_settings.process_selection_set_name = Some("Missing".into());
        assert!(matches!(processor.run_processing(), Err(Error::NotFound(_))));
    }

    fn top_camera(scene: &mut Scene) -> NodeId {
        let camera = scene
            .create_child(
                scene.root(),
                "Top",
                NodeKind::Camera(CameraView {
                    direction: -Vector3f::z(),
                    ..CameraView::default()
                }),
            )
            .unwrap();
        let mut set = SelectionSet::new("Camera");
        set.add_item(camera);
        scene.selection_sets.add_selection_set(set);
        camera
    }

    #[test]
    fn test_hidden_mesh_is_culled() {
        let mut scene = scene_with(vec![grid("floor", 4, 0.0), grid("lid", 4, 0.5)]);
        let nodes = scene.mesh_nodes();
        top_camera(&mut scene);

        let mut processor = ReductionProcessor::new(scene);
        processor.visibility_settings.cull_occluded_geometry = true;
        processor.visibility_settings.camera_selection_set_name = Some("Camera".into());
        processor.reduction_settings.reduction_target_triangle_ratio = 0.5;
        processor.run_processing().unwrap();

        let scene = processor.processed_scene();
        assert!(scene.node(nodes[0]).is_none());
        let lid = scene.geometry(nodes[1]).unwrap();
        assert!(lid.triangle_count() <= 16 && lid.triangle_count() > 0);
        assert_eq!(processor.stats().len(), 1);
    }

    #[test]
    fn test_occluders_and_camera_meshes_are_not_reduced() {
        let mut scene = scene_with(vec![grid("target", 6, 0.0), grid("wall", 6, 0.5), grid("eye", 2, 3.0)]);
        let nodes = scene.mesh_nodes();
        let mut occluders = SelectionSet::new("Occluder");
        occluders.add_item(nodes[1]);
        scene.selection_sets.add_selection_set(occluders);
        let mut cameras = SelectionSet::new("Camera");
        cameras.add_item(nodes[2]);
        scene.selection_sets.add_selection_set(cameras);

        let mut processor = ReductionProcessor::new(scene);
        processor.visibility_settings.use_visibility_weights_in_reducer = true;
        processor.visibility_settings.occluder_selection_set_name = Some("Occluder".into());
        processor.visibility_settings.camera_selection_set_name = Some("Camera".into());
        processor.reduction_settings.reduction_target_triangle_ratio = 0.5;
        processor.run_processing().unwrap();

        let scene = processor.processed_scene();
        assert!(scene.geometry(nodes[0]).unwrap().triangle_count() <= 36);
        assert_eq!(scene.geometry(nodes[1]).unwrap().triangle_count(), 72);
        assert!(scene.node(nodes[2]).is_none());
    }

    #[test]
    fn test_missing_camera_set_fails() {
        let mut processor = ReductionProcessor::new(scene_with(vec![grid("a", 2, 0.0)]));
        processor.visibility_settings.cull_occluded_geometry = true;
        processor.visibility_settings.camera_selection_set_name = Some("Missing".into());
        assert!(matches!(processor.run_processing(), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_empty_scope_warns() {
        let mut processor = ReductionProcessor::new(Scene::new());
        processor.run_processing().unwrap();
        assert!(processor.reporter().warning_occurred());
        assert!(processor.mapping_image().is_none());
    }
}
