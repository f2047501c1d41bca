use lodcrate_core::{Error, NodeId, ProgressTracker, Result, Scene};
use lodcrate_simplification::{quad_reduce, QuadReductionSettings, QuadReductionStats};

use super::{Processor, ProcessorCore};

/// Reduces quad-dominant meshes while keeping implicit quads intact.
///
/// Triangle pairs that form a flat quad are linked before reduction and
/// re-linked afterwards, so the output carries quad flags an exporter can
/// turn back into polygons.
#[derive(Debug, Default)]
pub struct QuadReductionProcessor {
    core: ProcessorCore,
    pub quad_reduction_settings: QuadReductionSettings,
    stats: Vec<(NodeId, QuadReductionStats)>,
}

impl QuadReductionProcessor {
    pub fn new(scene: Scene) -> Self {
        Self {
            core: ProcessorCore::new(scene),
            ..Self::default()
        }
    }

    pub fn stats(&self) -> &[(NodeId, QuadReductionStats)] {
        &self.stats
    }
}

impl Processor for QuadReductionProcessor {
    fn processor_name(&self) -> &'static str {
        "QuadReductionProcessor"
    }

    fn core(&self) -> &ProcessorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ProcessorCore {
        &mut self.core
    }

    fn validate(&self) -> Result<()> {
        self.quad_reduction_settings.validate()?;
        self.core.mapping_image_settings.validate()
    }

    fn process(&mut self, progress: &ProgressTracker) -> Result<()> {
        let selection = self.quad_reduction_settings.reduction.process_selection_set_name.clone();
        let nodes: Vec<NodeId> = self
            .core
            .scene()
            .nodes_in_scope(selection.as_deref())?
            .into_iter()
            .filter(|&id| self.core.scene().geometry(id).is_some_and(|g| !g.is_empty()))
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

        let share = 80.0 / nodes.len() as f32;
        for (i, &id) in nodes.iter().enumerate() {
            let mesh_progress = progress.sub_range(share * i as f32, share * (i + 1) as f32);
            let geometry = self
                .core
                .scene()
                .geometry(id)
                .ok_or_else(|| Error::NotFound(format!("mesh node {}", id)))?;
            let (output, stats) = quad_reduce(geometry, &self.quad_reduction_settings, Some(&mesh_progress))?;
            if let Some(slot) = self.core.scene_mut().geometry_mut(id) {
                *slot = output.geometry;
            }
            self.stats.push((id, stats));
            progress.report_step(0.0, 80.0, (i + 1) as f32 / nodes.len() as f32)?;
        }

        self.core.build_transfer_images(&nodes, sources, progress)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use lodcrate_core::QuadFlag;
    use lodcrate_simplification::StopCondition;

    #[test]
    fn test_output_keeps_quad_flags() {
        let mut processor = QuadReductionProcessor::new(scene_with(vec![grid("face", 8, 0.0)]));
        let settings = &mut processor.quad_reduction_settings;
        settings.set_reduction_targets(StopCondition::Any, true, false, false, false);
        settings.reduction.reduction_target_triangle_ratio = 0.5;
        processor.run_processing().unwrap();

        let (_, stats) = processor.stats()[0];
        assert_eq!(stats.quads_before, 64);
        let scene = processor.processed_scene();
        let g = scene.geometry(scene.mesh_nodes()[0]).unwrap();
        assert!(g.triangle_count() <= 64);
        let flags = g.quad_flags.as_ref().unwrap();
        assert!(flags.iter().any(|f| *f == QuadFlag::FirstOfQuad));
    }

    #[test]
    fn test_defaults_target_on_screen_size() {
        let processor = QuadReductionProcessor::new(Scene::new());
        let reduction = &processor.quad_reduction_settings.reduction;
        assert!(reduction.use_on_screen_size);
        assert!(!reduction.use_triangle_ratio);
        assert_eq!(reduction.reduction_target_on_screen_size, 100);
    }
}
