use lodcrate_core::{GeometryData, NodeId, ProgressTracker, Result, Scene};
use serde::{Deserialize, Serialize};

use super::{Processor, ProcessorCore};
use crate::visibility::{VisibilityContext, VisibilitySettings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationSettings {
    /// Bake every in-scope mesh into one scene-space mesh
    pub merge_geometries: bool,
    /// Keep meshes outside the processing scope; otherwise their geometry is dropped
    pub keep_unprocessed_scene_meshes: bool,
    pub process_selection_set_name: Option<String>,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            merge_geometries: true,
            keep_unprocessed_scene_meshes: false,
            process_selection_set_name: None,
        }
    }
}

/// Combines meshes and their materials into one atlas-textured set.
///
/// The geometry itself is not simplified. With a mapping image requested,
/// the existing UV charts are repacked into one atlas so every source
/// material can be cast into a single output material. Visibility settings
/// only cull here; there is no reducer to weight.
#[derive(Debug, Default)]
pub struct AggregationProcessor {
    core: ProcessorCore,
    pub aggregation_settings: AggregationSettings,
    pub visibility_settings: VisibilitySettings,
}

impl AggregationProcessor {
    pub fn new(scene: Scene) -> Self {
        Self {
            core: ProcessorCore::new(scene),
            ..Self::default()
        }
    }

    /// Drop the triangles of `scope` no viewpoint sees, and the camera meshes.
    /// Returns the meshes that still have triangles.
    fn cull_hidden(&mut self, context: &VisibilityContext, scope: Vec<NodeId>) -> Result<Vec<NodeId>> {
        let inputs: Vec<(NodeId, GeometryData)> = scope
            .iter()
            .filter_map(|&id| self.core.scene().geometry(id).map(|g| (id, g.clone())))
            .collect();
        let visibility = context.compute(self.core.scene(), &inputs);
        for ((id, _), seen) in inputs.iter().zip(visibility) {
            let keep: Vec<bool> = seen.iter().map(|&v| v > 0.0).collect();
            if keep.iter().all(|k| *k) {
                continue;
            }
            if let Some(g) = self.core.scene_mut().geometry_mut(*id) {
                g.retain_triangles(&keep);
                g.remove_unused_vertices();
                log::info!("{}: {} triangles left after culling", g.name, g.triangle_count());
            }
        }
        for &id in &context.camera_meshes {
            if self.core.scene().node(id).is_some() {
                self.core.scene_mut().remove_node(id)?;
            }
        }
        let (visible, hidden): (Vec<NodeId>, Vec<NodeId>) = scope
            .into_iter()
            .partition(|&id| self.core.scene().geometry(id).is_some_and(|g| !g.is_empty()));
        self.core.strip_geometry(&hidden);
        Ok(visible)
    }
}

impl Processor for AggregationProcessor {
    fn processor_name(&self) -> &'static str {
        "AggregationProcessor"
    }

    fn core(&self) -> &ProcessorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ProcessorCore {
        &mut self.core
    }

    fn validate(&self) -> Result<()> {
        self.visibility_settings.validate()?;
        self.core.mapping_image_settings.validate()
    }

    fn process(&mut self, progress: &ProgressTracker) -> Result<()> {
        let settings = self.aggregation_settings.clone();
        let mut scope = self
            .core
            .scene()
            .nodes_in_scope(settings.process_selection_set_name.as_deref())?;
        let visibility = if self.visibility_settings.cull_occluded_geometry {
            let context = VisibilityContext::from_scene(self.core.scene(), &self.visibility_settings)?;
            scope.retain(|&id| !context.excludes(id));
            Some(context)
        } else {
            None
        };
        if scope.is_empty() {
            self.core
                .reporter()
                .warning(self.processor_name(), "process", "no meshes in the processing scope");
            return Ok(());
        }
        let sources = if self.core.mapping_image_settings.generate_mapping_image {
            self.core.snapshot_sources(&scope)
        } else {
            Default::default()
        };
        if let Some(context) = &visibility {
            scope = self.cull_hidden(context, scope)?;
        }

        if !settings.keep_unprocessed_scene_meshes {
            let outside: Vec<NodeId> = self
                .core
                .scene()
                .mesh_nodes()
                .into_iter()
                .filter(|id| !scope.contains(id))
                .collect();
            log::debug!("dropping {} meshes outside the scope", outside.len());
            self.core.strip_geometry(&outside);
        }
        progress.report(20.0)?;

        let processed = if settings.merge_geometries {
            let scene = self.core.scene();
            let mut merged = GeometryData::new("AggregatedGeometry");
            for &id in &scope {
                if let Some(g) = scene.geometry(id) {
                    merged.append(g, &scene.global_transform(id), 0);
                }
            }
            log::info!(
                "merged {} meshes into {} triangles",
                scope.len(),
                merged.triangle_count()
            );
            self.core.strip_geometry(&scope);
            let root = self.core.scene().root();
            vec![self.core.scene_mut().create_child_mesh(root, merged)?]
        } else {
            scope
        };
        progress.report(50.0)?;

        self.core.build_transfer_images(&processed, sources, progress)
    }
}
