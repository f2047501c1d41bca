use lodcrate_core::{GeometryData, ProgressTracker, Result, Scene, Transform3D};
use lodcrate_simplification::{remesh, RemeshingSettings};

use super::{Processor, ProcessorCore};

/// Replaces the in-scope meshes with one new surface sized for the target
/// on-screen size. The source materials are cast onto it
/// through a mapping image, since the new surface has no texture
/// coordinates of its own.
#[derive(Debug, Default)]
pub struct RemeshingProcessor {
    core: ProcessorCore,
    pub remeshing_settings: RemeshingSettings,
}

impl RemeshingProcessor {
    pub fn new(scene: Scene) -> Self {
        Self {
            core: ProcessorCore::new(scene),
            remeshing_settings: RemeshingSettings::default(),
        }
    }
}

impl Processor for RemeshingProcessor {
    fn processor_name(&self) -> &'static str {
        "RemeshingProcessor"
    }

    fn core(&self) -> &ProcessorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ProcessorCore {
        &mut self.core
    }

    fn validate(&self) -> Result<()> {
        self.remeshing_settings.validate()?;
        self.core.mapping_image_settings.validate()
    }

    fn process(&mut self, progress: &ProgressTracker) -> Result<()> {
        let scope = self
            .core
            .scene()
            .nodes_in_scope(self.remeshing_settings.process_selection_set_name.as_deref())?;
        if scope.is_empty() {
            self.core
                .reporter()
                .warning(self.processor_name(), "process", "no meshes in the processing scope");
            return Ok(());
        }
        let sources = self.core.snapshot_sources(&scope);

        let mut combined = GeometryData::new("RemeshedGeometry");
        for source in sources.iter() {
            combined.append(&source.geometry, &Transform3D::identity(), 0);
        }
        progress.report(10.0)?;
        let remeshed = remesh(&combined, &self.remeshing_settings, Some(&progress.sub_range(10.0, 60.0)))?;
        progress.report(60.0)?;
        log::info!(
            "remeshed {} meshes ({} triangles) into {} triangles",
            scope.len(),
            combined.triangle_count(),
            remeshed.triangle_count()
        );

        self.core.strip_geometry(&scope);
        let root = self.core.scene().root();
        let node = self.core.scene_mut().create_child_mesh(root, remeshed)?;
        self.core.build_transfer_images(&[node], sources, progress)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use lodcrate_core::Error;
    use lodcrate_simplification::HoleFilling;

    #[test]
    fn test_replaces_scope_with_one_mesh() {
        let mut processor = RemeshingProcessor::new(scene_with(vec![grid("a", 8, 0.0), grid("b", 8, 0.5)]));
        processor.remeshing_settings = RemeshingSettings::new()
            .with_on_screen_size(50)
            .with_hole_filling(HoleFilling::Medium);
        processor.mapping_image_settings_mut().generate_mapping_image = true;
        processor.run_processing().unwrap();

        let scene = processor.processed_scene();
        let meshes = scene.mesh_nodes();
        assert_eq!(meshes.len(), 1);
        let g = scene.geometry(meshes[0]).unwrap();
        assert_eq!(g.name, "RemeshedGeometry");
        assert!(g.has_tex_coords(0));
        let image = processor.mapping_image().unwrap();
        assert_eq!(image.sources().len(), 2);
        assert!(image.covered_texel_count() > 0);
    }

    #[test]
    fn test_rejects_tiny_on_screen_size() {
        let mut processor = RemeshingProcessor::new(scene_with(vec![grid("a", 2, 0.0)]));
        processor.remeshing_settings.on_screen_size = 5;
        assert!(matches!(processor.run_processing(), Err(Error::InvalidSettings(_))));
        assert_eq!(processor.processed_scene().mesh_nodes().len(), 1);
    }
}
