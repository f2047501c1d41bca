//! Pipelines: one processor stage plus material casting, run inline or on
//! an isolated worker thread
//!
//! A run clones the source materials, processes the scene, casts every
//! registered caster against the mapping image of its output material and
//! re-links the results into the processed scene.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use lodcrate_core::{Error, ErrorKind, Observer, Reporter, Result, Scene};
use lodcrate_io::{SceneExporter, SceneImporter};
use serde::{Deserialize, Serialize};

use crate::casters::{output_texture_name, relink_outputs, CastOutput, CasterInput, MaterialCaster};
use crate::mapping::MappingImage;
use crate::processors::{
    AggregationProcessor, ImpostorProcessor, Processor, QuadReductionProcessor, ReductionProcessor,
    RemeshingProcessor,
};

/// Where a pipeline executes its stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunMode {
    #[default]
    InThisProcess,
    /// Run on a dedicated worker thread; a panic there fails the run with
    /// [`Error::Processing`] instead of unwinding into the caller
    InNewProcess,
}

pub type ReductionPipeline = Pipeline<ReductionProcessor>;
pub type AggregationPipeline = Pipeline<AggregationProcessor>;
pub type RemeshingPipeline = Pipeline<RemeshingProcessor>;
pub type ImpostorPipeline = Pipeline<ImpostorProcessor>;
pub type QuadReductionPipeline = Pipeline<QuadReductionProcessor>;

const PIPELINE_THREAD_NAME: &str = "lodcrate-pipeline";

pub struct Pipeline<P: Processor> {
    processor: P,
    casters: Vec<(Box<dyn MaterialCaster>, usize)>,
    reporter: Reporter,
    /// Directory for caster outputs without an explicit path
    pub texture_output_directory: Option<PathBuf>,
    outputs: Vec<(usize, CastOutput)>,
}

impl<P: Processor + Default> Default for Pipeline<P> {
    fn default() -> Self {
        Self::new(P::default())
    }
}

impl<P: Processor> std::fmt::Debug for Pipeline<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("processor", &self.processor.processor_name())
            .field("casters", &self.casters.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

impl<P: Processor> Pipeline<P> {
    pub fn new(mut processor: P) -> Self {
        let reporter = Reporter::new();
        processor.set_reporter(reporter.clone());
        Self {
            processor,
            casters: Vec::new(),
            reporter,
            texture_output_directory: None,
            outputs: Vec::new(),
        }
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Settings of the processor stage live here
    pub fn processor_mut(&mut self) -> &mut P {
        &mut self.processor
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Use `reporter` for the pipeline and its processor
    pub fn set_reporter(&mut self, reporter: Reporter) {
        self.processor.set_reporter(reporter.clone());
        self.reporter = reporter;
    }

    pub fn add_observer(&mut self, observer: Arc<dyn Observer>) {
        self.processor.add_observer(observer);
    }

    /// Cast `caster` against the mapping image of `output_material_index`
    pub fn add_material_caster(&mut self, caster: impl MaterialCaster + 'static, output_material_index: usize) {
        self.casters.push((Box::new(caster), output_material_index));
    }

    pub fn material_casters(&self) -> impl Iterator<Item = (&dyn MaterialCaster, usize)> {
        self.casters.iter().map(|(c, i)| (c.as_ref(), *i))
    }

    pub fn material_caster_count(&self) -> usize {
        self.casters.len()
    }

    /// Caster results of the last run, tagged with their output material
    pub fn outputs(&self) -> &[(usize, CastOutput)] {
        &self.outputs
    }

    pub fn processed_scene(&self) -> &Scene {
        self.processor.processed_scene()
    }

    pub fn take_scene(&mut self) -> Scene {
        self.processor.take_scene()
    }

    pub fn mapping_image(&self) -> Option<&MappingImage> {
        self.processor.mapping_image()
    }

    /// Process `scene` and cast its materials; the result is available
    /// through [`Pipeline::processed_scene`]
    pub fn run_scene(&mut self, scene: Scene, mode: RunMode) -> Result<()> {
        let result = match mode {
            RunMode::InThisProcess => self.run_stages(scene),
            RunMode::InNewProcess => {
                let reporter = self.reporter.clone();
                thread::scope(|scope| {
                    let worker = thread::Builder::new()
                        .name(PIPELINE_THREAD_NAME.to_string())
                        .spawn_scoped(scope, || self.run_stages(scene))?;
                    worker.join().map_err(|payload| {
                        let message = format!("worker thread panicked: {}", panic_message(payload));
                        reporter.error("Pipeline", "run_scene", ErrorKind::Processing, message.clone());
                        Error::Processing(message)
                    })?
                })
            }
        };
        if result.is_ok() {
            log::info!(
                "{} pipeline finished with {} cast outputs",
                self.processor.processor_name(),
                self.outputs.len()
            );
        }
        result
    }

    /// Import `input`, run, and export to `output` if given. Textures go
    /// next to the output scene unless a texture directory is set.
    pub fn run_scene_from_file<I, O>(&mut self, input: I, output: Option<O>, mode: RunMode) -> Result<()>
    where
        I: AsRef<Path>,
        O: AsRef<Path>,
    {
        let mut importer = SceneImporter::new(self.reporter.clone());
        importer.set_import_file_path(input.as_ref());
        importer.run()?;
        let scene = importer
            .take_scene()
            .ok_or_else(|| Error::NotFound(format!("scene from {}", input.as_ref().display())))?;

        let output = output.map(|o| o.as_ref().to_path_buf());
        if self.texture_output_directory.is_none() {
            self.texture_output_directory = output
                .as_ref()
                .and_then(|o| o.parent())
                .map(Path::to_path_buf);
        }
        self.run_scene(scene, mode)?;

        if let Some(output) = output {
            let mut exporter = SceneExporter::new(self.reporter.clone());
            exporter.set_export_file_path(output);
            exporter.run(self.processed_scene())?;
        }
        Ok(())
    }

    fn run_stages(&mut self, scene: Scene) -> Result<()> {
        self.outputs.clear();
        let source_materials = scene.materials.clone();
        let source_textures = scene.textures.clone();
        self.processor.set_scene(scene);
        self.processor.run_processing()?;

        let settings = self.processor.mapping_image_settings().clone();
        let directory = self.texture_output_directory.clone().unwrap_or_default();
        let mut outputs = Vec::with_capacity(self.casters.len());
        for (caster, index) in self.casters.iter_mut() {
            let name = caster.caster_type().name();
            let Some(mapping_image) = self.processor.mapping_image_for(*index) else {
                let message = format!("no mapping image for output material {}", index);
                self.reporter.error(name, "run_processing", ErrorKind::InvalidSettings, message.clone());
                return Err(Error::InvalidSettings(message));
            };
            if !caster.has_output_file_path() {
                let channel = caster.settings().material_channel.clone();
                caster.set_output_file_path(directory.join(output_texture_name(&channel, *index)));
            }
            let input = CasterInput {
                mapping_image,
                source_materials: &source_materials,
                source_textures: &source_textures,
                processed_scene: Some(self.processor.processed_scene()),
            };
            match caster.run_processing(&input) {
                Ok(output) => outputs.push((*index, output)),
                Err(e) => {
                    self.reporter.report(name, "run_processing", &e);
                    return Err(e);
                }
            }
        }

        if !outputs.is_empty() {
            let scene = self.processor.core_mut().scene_mut();
            relink_outputs(scene, &outputs, settings.apply_new_material_ids, settings.tex_coord_level)
                .inspect_err(|e| self.reporter.report("Pipeline", "relink_outputs", e))?;
        }
        self.outputs = outputs;
        Ok(())
    }
}
