//! Scene processors
//!
//! A processor owns the scene it works on. `run_processing` validates the
//! settings, resolves the selection-set scope, runs the stage with progress
//! reporting and, when requested, builds the mapping images that casters
//! read afterwards.

mod aggregation;
mod impostor;
mod quad_reduction;
mod reduction;
mod remeshing;

use std::sync::Arc;

use lodcrate_core::{NodeId, NodeKind, Observer, ProgressTracker, Reporter, Result, Scene};
use lodcrate_simplification::calculate_tangents;

use crate::mapping::{
    build_transfer_mapping, generate_tex_coords, MappingImage, MappingImageSettings, SourceMesh,
};

pub use aggregation::{AggregationProcessor, AggregationSettings};
pub use impostor::{BillboardMode, ImpostorProcessor, ImpostorSettings, ImpostorType};
pub use quad_reduction::QuadReductionProcessor;
pub use reduction::ReductionProcessor;
pub use remeshing::RemeshingProcessor;

/// State shared by every processor
#[derive(Default)]
pub struct ProcessorCore {
    scene: Scene,
    reporter: Reporter,
    observers: Vec<Arc<dyn Observer>>,
    mapping_images: Vec<MappingImage>,
    pub mapping_image_settings: MappingImageSettings,
}

impl std::fmt::Debug for ProcessorCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorCore")
            .field("nodes", &self.scene.node_count())
            .field("observers", &self.observers.len())
            .field("mapping_images", &self.mapping_images.len())
            .finish()
    }
}

impl ProcessorCore {
    pub fn new(scene: Scene) -> Self {
        Self {
            scene,
            ..Self::default()
        }
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    fn progress(&self, subject: &str) -> ProgressTracker {
        ProgressTracker::new(subject, self.observers.clone())
    }

    /// Scene-space copies of `nodes`, in order
    pub(crate) fn snapshot_sources(&self, nodes: &[NodeId]) -> Arc<Vec<SourceMesh>> {
        Arc::new(
            nodes
                .iter()
                .filter_map(|&id| self.scene.world_geometry(id).map(|g| SourceMesh::new(id, g)))
                .filter(|s| !s.geometry.is_empty())
                .collect(),
        )
    }

    /// Turn mesh nodes into plain transform nodes, keeping their children
    pub(crate) fn strip_geometry(&mut self, nodes: &[NodeId]) {
        for &id in nodes {
            if let Some(node) = self.scene.node_mut(id) {
                node.kind = NodeKind::Transform;
            }
        }
    }

    /// Give `processed` output texture coordinates and build one transfer
    /// mapping image per output material against `sources`
    pub(crate) fn build_transfer_images(
        &mut self,
        processed: &[NodeId],
        sources: Arc<Vec<SourceMesh>>,
        progress: &ProgressTracker,
    ) -> Result<()> {
        let settings = self.mapping_image_settings.clone();
        if !settings.generate_mapping_image {
            return Ok(());
        }
        let level = settings.tex_coord_level;
        let processed: Vec<NodeId> = processed
            .iter()
            .copied()
            .filter(|&id| self.scene.geometry(id).is_some_and(|g| !g.is_empty()))
            .collect();

        if settings.generate_tex_coords {
            let mut world: Vec<_> = processed
                .iter()
                .filter_map(|&id| self.scene.world_geometry(id))
                .collect();
            let layout = generate_tex_coords(&mut world, &settings)?;
            log::info!(
                "generated texture coordinates: {} charts at {:.2} texels per unit",
                layout.chart_count,
                layout.texels_per_unit
            );
            for (&id, w) in processed.iter().zip(&world) {
                if let (Some(g), Some(uvs)) = (self.scene.geometry_mut(id), w.tex_coords(level)) {
                    g.add_tex_coords(level)?;
                    if let Some(channel) = g.tex_coords_mut(level) {
                        *channel = uvs.to_vec();
                    }
                }
            }
        }
        progress.report(85.0)?;

        for &id in &processed {
            let Some(g) = self.scene.geometry_mut(id) else { continue };
            if !g.has_tex_coords(level) {
                return Err(lodcrate_core::Error::NotFound(format!(
                    "{}: tex coord level {} for the mapping image",
                    g.name, level
                )));
            }
            if settings.use_full_retexturing {
                for (i, channel) in g.tex_coords.iter_mut().enumerate() {
                    if i != level {
                        *channel = None;
                    }
                }
            }
            if settings.generate_tangents {
                calculate_tangents(g, level)?;
            }
        }

        let outputs: Vec<_> = processed
            .iter()
            .filter_map(|&id| self.scene.world_geometry(id))
            .collect();
        self.mapping_images.clear();
        for index in 0..settings.output_material_count() {
            let image = build_transfer_mapping(&outputs, Arc::clone(&sources), &settings, index)?;
            log::info!(
                "mapping image {} ({}x{}): {} covered texels",
                index,
                image.width,
                image.height,
                image.covered_texel_count()
            );
            self.mapping_images.push(image);
            progress.report_step(85.0, 99.0, (index + 1) as f32 / settings.output_material_count() as f32)?;
        }
        Ok(())
    }

    pub(crate) fn set_mapping_images(&mut self, images: Vec<MappingImage>) {
        self.mapping_images = images;
    }
}

/// A processing stage over an owned scene
pub trait Processor: Send {
    fn processor_name(&self) -> &'static str;

    fn core(&self) -> &ProcessorCore;

    fn core_mut(&mut self) -> &mut ProcessorCore;

    /// Check settings before anything is touched
    fn validate(&self) -> Result<()>;

    /// Run the stage on the owned scene
    fn process(&mut self, progress: &ProgressTracker) -> Result<()>;

    /// Validate and run. Failures are recorded through the reporter and
    /// returned.
    fn run_processing(&mut self) -> Result<()> {
        let name = self.processor_name();
        let progress = self.core().progress(name);
        log::debug!("{}: starting on {} triangles", name, self.core().scene.triangle_count());
        self.core_mut().mapping_images.clear();
        let result = self
            .validate()
            .and_then(|_| self.process(&progress))
            .and_then(|_| progress.finish());
        match &result {
            Ok(()) => log::info!("{}: done, {} triangles", name, self.core().scene.triangle_count()),
            Err(e) => self.core().reporter.report(name, "run_processing", e),
        }
        result
    }

    fn scene(&self) -> &Scene {
        &self.core().scene
    }

    fn processed_scene(&self) -> &Scene {
        &self.core().scene
    }

    fn set_scene(&mut self, scene: Scene) {
        let core = self.core_mut();
        core.scene = scene;
        core.mapping_images.clear();
    }

    /// Move the scene out, leaving an empty one behind
    fn take_scene(&mut self) -> Scene {
        std::mem::take(&mut self.core_mut().scene)
    }

    fn into_scene(mut self) -> Scene
    where
        Self: Sized,
    {
        self.take_scene()
    }

    fn reporter(&self) -> &Reporter {
        &self.core().reporter
    }

    /// Share a reporter, e.g. the one of an enclosing pipeline
    fn set_reporter(&mut self, reporter: Reporter) {
        self.core_mut().reporter = reporter;
    }

    fn add_observer(&mut self, observer: Arc<dyn Observer>) {
        self.core_mut().observers.push(observer);
    }

    fn mapping_image_settings(&self) -> &MappingImageSettings {
        &self.core().mapping_image_settings
    }

    fn mapping_image_settings_mut(&mut self) -> &mut MappingImageSettings {
        &mut self.core_mut().mapping_image_settings
    }

    /// Mapping image of output material 0 from the last run
    fn mapping_image(&self) -> Option<&MappingImage> {
        self.core().mapping_images.first()
    }

    fn mapping_image_for(&self, output_material: usize) -> Option<&MappingImage> {
        self.core().mapping_images.get(output_material)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use lodcrate_core::{GeometryData, Point3f, Scene, Vector2f};

    /// Flat `n`×`n` grid of quads on z = `z`, spanning [0, 1]², UV = xy
    pub fn grid(name: &str, n: usize, z: f32) -> GeometryData {
        let step = 1.0 / n as f32;
        let coords: Vec<Point3f> = (0..=n)
            .flat_map(|j| (0..=n).map(move |i| Point3f::new(i as f32 * step, j as f32 * step, z)))
            .collect();
        let id = |i: usize, j: usize| j * (n + 1) + i;
        let mut triangles = Vec::new();
        for j in 0..n {
            for i in 0..n {
                triangles.push([id(i, j), id(i + 1, j), id(i + 1, j + 1)]);
                triangles.push([id(i, j), id(i + 1, j + 1), id(i, j + 1)]);
            }
        }
        let mut g = GeometryData::from_coords_and_triangles(name, coords, triangles);
        let uvs: Vec<Vector2f> = g
            .triangles
            .iter()
            .flat_map(|t| t.iter().map(|&v| Vector2f::new(g.coords[v].x, g.coords[v].y)).collect::<Vec<_>>())
            .collect();
        if g.add_tex_coords(0).is_ok() {
            if let Some(channel) = g.tex_coords_mut(0) {
                *channel = uvs;
            }
        }
        g
    }

    pub fn scene_with(geometries: Vec<GeometryData>) -> Scene {
        let mut scene = Scene::new();
        let root = scene.root();
        for g in geometries {
            scene.create_child_mesh(root, g).expect("root exists");
        }
        scene
    }
}
