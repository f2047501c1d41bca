//! Mapping images: texel-to-source correspondence for material casting
//!
//! A [`MappingImage`] covers the output texture of a processed scene. Every
//! texel holds `multisampling_level²` samples, and every covered sample
//! records the output surface frame at that point plus up to
//! `maximum_layers` source surface locations, ordered front to back.
//! Casters read the mapping image to evaluate source materials and write
//! the result into new textures.

pub mod charts;
mod projection;
mod raster;
pub(crate) mod transfer;

use std::sync::Arc;

use lodcrate_core::{Error, GeometryData, NodeId, Point3f, Result, Vector3f, MAX_TEXCOORD_LEVELS};
use serde::{Deserialize, Serialize};

pub use charts::{generate_tex_coords, ChartLayout};
pub use projection::{build_projection_mapping, ImpostorView};
pub use transfer::build_transfer_mapping;

/// How processed geometry gets texture coordinates for the output atlas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TexCoordGenerator {
    /// Cut the surface into planar charts and pack them
    Parameterizer,
    /// Keep the existing UV charts and repack them into one atlas
    #[default]
    ChartAggregator,
}

/// How the chart aggregator sizes charts relative to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChartAggregatorMode {
    /// Texel density follows 3D surface area
    #[default]
    SurfaceArea,
    /// Charts keep their original UV size relative to each other
    TextureSizeProportions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartAggregatorSettings {
    pub mode: ChartAggregatorMode,
    /// Pack charts whose UV areas overlap separately. When off, overlapping
    /// charts are moved as one block and keep sharing UV space.
    pub separate_overlapping_charts: bool,
}

impl Default for ChartAggregatorSettings {
    fn default() -> Self {
        Self {
            mode: ChartAggregatorMode::SurfaceArea,
            separate_overlapping_charts: true,
        }
    }
}

/// Size and sampling of one output texture set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputMaterialSettings {
    pub texture_width: usize,
    pub texture_height: usize,
    /// Samples per texel along each axis
    pub multisampling_level: usize,
    /// Empty texels kept between packed charts
    pub gutter_space: usize,
}

impl Default for OutputMaterialSettings {
    fn default() -> Self {
        Self {
            texture_width: 1024,
            texture_height: 1024,
            multisampling_level: 2,
            gutter_space: 4,
        }
    }
}

impl OutputMaterialSettings {
    pub fn with_texture_size(mut self, width: usize, height: usize) -> Self {
        self.texture_width = width;
        self.texture_height = height;
        self
    }

    pub fn with_multisampling_level(mut self, level: usize) -> Self {
        self.multisampling_level = level;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=16384).contains(&self.texture_width) || !(1..=16384).contains(&self.texture_height) {
            return Err(Error::InvalidSettings(format!(
                "output texture size {}x{} is outside 1..=16384",
                self.texture_width, self.texture_height
            )));
        }
        if !(1..=8).contains(&self.multisampling_level) {
            return Err(Error::InvalidSettings(format!(
                "multisampling level {} is outside 1..=8",
                self.multisampling_level
            )));
        }
        if self.gutter_space * 2 >= self.texture_width.min(self.texture_height) {
            return Err(Error::InvalidSettings(format!(
                "gutter space {} leaves no room in a {}x{} texture",
                self.gutter_space, self.texture_width, self.texture_height
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingImageSettings {
    pub generate_mapping_image: bool,
    /// Generate new texture coordinates; otherwise `tex_coord_level` must exist
    pub generate_tex_coords: bool,
    /// Point every processed triangle at output material 0
    pub apply_new_material_ids: bool,
    pub generate_tangents: bool,
    /// Drop every other texture coordinate level from processed geometry
    pub use_full_retexturing: bool,
    pub tex_coord_generator: TexCoordGenerator,
    pub chart_aggregator: ChartAggregatorSettings,
    /// Source layers kept per sample
    pub maximum_layers: usize,
    /// Level the output texture coordinates are written to
    pub tex_coord_level: usize,
    /// One mapping image is built per entry, all over the same UV layout
    pub output_materials: Vec<OutputMaterialSettings>,
}

impl Default for MappingImageSettings {
    fn default() -> Self {
        Self {
            generate_mapping_image: false,
            generate_tex_coords: true,
            apply_new_material_ids: false,
            generate_tangents: false,
            use_full_retexturing: false,
            tex_coord_generator: TexCoordGenerator::ChartAggregator,
            chart_aggregator: ChartAggregatorSettings::default(),
            maximum_layers: 3,
            tex_coord_level: 0,
            output_materials: vec![OutputMaterialSettings::default()],
        }
    }
}

impl MappingImageSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output_material_count(&self) -> usize {
        self.output_materials.len()
    }

    /// Resize the output material list, filling with defaults
    pub fn set_output_material_count(&mut self, count: usize) {
        self.output_materials.resize(count, OutputMaterialSettings::default());
    }

    pub fn output_material_settings(&self, index: usize) -> Option<&OutputMaterialSettings> {
        self.output_materials.get(index)
    }

    pub fn output_material_settings_mut(&mut self, index: usize) -> Option<&mut OutputMaterialSettings> {
        self.output_materials.get_mut(index)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=16).contains(&self.maximum_layers) {
            return Err(Error::InvalidSettings(format!(
                "maximum layers {} is outside 1..=16",
                self.maximum_layers
            )));
        }
        if self.tex_coord_level >= MAX_TEXCOORD_LEVELS {
            return Err(Error::InvalidSettings(format!(
                "tex coord level {} is out of range",
                self.tex_coord_level
            )));
        }
        if self.generate_mapping_image && self.output_materials.is_empty() {
            return Err(Error::InvalidSettings(
                "a mapping image needs at least one output material".into(),
            ));
        }
        for output in &self.output_materials {
            output.validate()?;
        }
        Ok(())
    }
}

/// A source mesh referenced by mapping samples, in scene space
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMesh {
    pub node: NodeId,
    pub geometry: GeometryData,
}

impl SourceMesh {
    pub fn new(node: NodeId, geometry: GeometryData) -> Self {
        Self { node, geometry }
    }
}

/// Location on a source surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceSample {
    /// Index into [`MappingImage::sources`]
    pub mesh: u32,
    pub triangle: u32,
    pub barycentric: [f32; 3],
    /// Signed offset from the output surface along its normal; larger is
    /// further in front
    pub distance: f32,
}

/// Output surface frame at a sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceFrame {
    pub position: Point3f,
    pub normal: Vector3f,
    pub tangent: Vector3f,
    pub bitangent: Vector3f,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappingSample {
    pub frame: SurfaceFrame,
    /// Front to back
    pub layers: Vec<SourceSample>,
}

/// Correspondence from output texels to source surfaces
#[derive(Debug, Clone)]
pub struct MappingImage {
    pub width: usize,
    pub height: usize,
    pub multisampling_level: usize,
    samples: Vec<Option<MappingSample>>,
    sources: Arc<Vec<SourceMesh>>,
}

impl MappingImage {
    pub(crate) fn new(width: usize, height: usize, multisampling_level: usize, sources: Arc<Vec<SourceMesh>>) -> Self {
        let spp = multisampling_level * multisampling_level;
        Self {
            width,
            height,
            multisampling_level,
            samples: vec![None; width * height * spp],
            sources,
        }
    }

    pub fn samples_per_texel(&self) -> usize {
        self.multisampling_level * self.multisampling_level
    }

    /// Every sample of texel `(x, y)`; row 0 is the top of the image
    pub fn texel_samples(&self, x: usize, y: usize) -> &[Option<MappingSample>] {
        let spp = self.samples_per_texel();
        let start = (y * self.width + x) * spp;
        &self.samples[start..start + spp]
    }

    pub fn sample(&self, x: usize, y: usize, s: usize) -> Option<&MappingSample> {
        self.texel_samples(x, y).get(s).and_then(|s| s.as_ref())
    }

    pub fn is_covered(&self, x: usize, y: usize) -> bool {
        self.texel_samples(x, y).iter().any(|s| s.is_some())
    }

    pub fn covered_texel_count(&self) -> usize {
        (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| (x, y)))
            .filter(|&(x, y)| self.is_covered(x, y))
            .count()
    }

    /// Deepest layer stack of any sample
    pub fn max_layer_count(&self) -> usize {
        self.samples
            .iter()
            .flatten()
            .map(|s| s.layers.len())
            .max()
            .unwrap_or(0)
    }

    pub fn sources(&self) -> &[SourceMesh] {
        &self.sources
    }

    pub(crate) fn shared_sources(&self) -> Arc<Vec<SourceMesh>> {
        Arc::clone(&self.sources)
    }

    pub(crate) fn samples_mut(&mut self) -> &mut [Option<MappingSample>] {
        &mut self.samples
    }

    /// Source geometry of a layer
    pub fn source_geometry(&self, sample: &SourceSample) -> Option<&GeometryData> {
        self.sources.get(sample.mesh as usize).map(|s| &s.geometry)
    }
}
