//! Material casters
//!
//! A caster reads a [`MappingImage`] and bakes one property of the source
//! surfaces into the processed scene: a texture written to disk, or a
//! vertex color level. [`relink_outputs`] then points the processed
//! scene's materials at the results.

mod ambient_occlusion;
mod color;
mod compute;
mod displacement;
mod fill;
mod geometry_data;
mod normal;
mod relink;
mod vertex_color;

use std::path::{Path, PathBuf};

use lodcrate_core::{
    channels, Color, Error, GeometryData, ImageData, MaterialTable, NodeId, Result, Scene, ShadingContext,
    TextureTable, Vector2f,
};
use lodcrate_io::{save_image, PixelFormat};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::mapping::{MappingImage, MappingSample, SourceMesh, SourceSample};

pub use ambient_occlusion::AmbientOcclusionCaster;
pub use color::{ColorCaster, OpacityCaster};
pub use compute::{ComputeCaster, ComputeEvaluator, ComputeSample};
pub use displacement::DisplacementCaster;
pub use fill::FillMode;
pub use geometry_data::{GeometryDataCaster, GeometryDataFieldType};
pub use normal::NormalCaster;
pub use relink::{output_texture_name, relink_outputs};
pub use vertex_color::VertexColorCaster;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageFileFormat {
    #[default]
    Png,
}

impl ImageFileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFileFormat::Png => "png",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorComponent {
    Red,
    Green,
    Blue,
    #[default]
    Alpha,
}

impl ColorComponent {
    pub fn index(&self) -> usize {
        match self {
            ColorComponent::Red => 0,
            ColorComponent::Green => 1,
            ColorComponent::Blue => 2,
            ColorComponent::Alpha => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CasterType {
    Color,
    Opacity,
    Normal,
    Displacement,
    GeometryData,
    Compute,
    VertexColor,
    AmbientOcclusion,
}

impl CasterType {
    pub fn name(&self) -> &'static str {
        match self {
            CasterType::Color => "ColorCaster",
            CasterType::Opacity => "OpacityCaster",
            CasterType::Normal => "NormalCaster",
            CasterType::Displacement => "DisplacementCaster",
            CasterType::GeometryData => "GeometryDataCaster",
            CasterType::Compute => "ComputeCaster",
            CasterType::VertexColor => "VertexColorCaster",
            CasterType::AmbientOcclusion => "AmbientOcclusionCaster",
        }
    }
}

/// Settings shared by every caster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CasterSettings {
    /// Channel evaluated on the source materials, and the channel name the
    /// result is linked under
    pub material_channel: String,
    pub opacity_channel: String,
    pub opacity_channel_component: ColorComponent,
    pub bake_opacity_in_alpha: bool,
    pub output_pixel_format: PixelFormat,
    pub output_image_file_format: ImageFileFormat,
    /// Texels grown outward from covered areas before filling
    pub dilation: usize,
    pub fill_mode: FillMode,
}

impl Default for CasterSettings {
    fn default() -> Self {
        Self {
            material_channel: channels::DIFFUSE.to_string(),
            opacity_channel: channels::OPACITY.to_string(),
            opacity_channel_component: ColorComponent::Alpha,
            bake_opacity_in_alpha: false,
            output_pixel_format: PixelFormat::R8G8B8A8,
            output_image_file_format: ImageFileFormat::Png,
            dilation: 10,
            fill_mode: FillMode::Interpolate,
        }
    }
}

impl CasterSettings {
    pub fn with_material_channel(mut self, channel: impl Into<String>) -> Self {
        self.material_channel = channel.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.material_channel.is_empty() {
            return Err(Error::InvalidSettings("caster material channel is empty".into()));
        }
        Ok(())
    }
}

/// What a caster reads
pub struct CasterInput<'a> {
    pub mapping_image: &'a MappingImage,
    pub source_materials: &'a MaterialTable,
    pub source_textures: &'a TextureTable,
    /// Needed by casters that write into the processed geometry
    pub processed_scene: Option<&'a Scene>,
}

/// What a caster produced
#[derive(Debug, Clone, PartialEq)]
pub enum CastOutput {
    Texture {
        channel: String,
        path: PathBuf,
        image: ImageData,
    },
    VertexColors {
        channel: String,
        level: usize,
        /// Per-corner colors of every processed mesh node
        colors: Vec<(NodeId, Vec<Color>)>,
    },
}

impl CastOutput {
    pub fn channel(&self) -> &str {
        match self {
            CastOutput::Texture { channel, .. } | CastOutput::VertexColors { channel, .. } => channel,
        }
    }
}

/// Settings and output path bookkeeping every caster carries
#[derive(Debug, Clone, Default)]
pub struct CasterState {
    pub settings: CasterSettings,
    output_file_path: Option<PathBuf>,
    written_path: Option<PathBuf>,
}

impl CasterState {
    pub fn new(settings: CasterSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Requested path with the image file extension appended
    fn target_path(&self) -> Result<PathBuf> {
        let requested = self
            .output_file_path
            .as_ref()
            .ok_or_else(|| Error::InvalidSettings("caster has no output file path".into()))?;
        let mut path = requested.as_os_str().to_owned();
        path.push(".");
        path.push(self.settings.output_image_file_format.extension());
        Ok(PathBuf::from(path))
    }
}

pub trait MaterialCaster: Send {
    fn caster_type(&self) -> CasterType;

    fn state(&self) -> &CasterState;

    fn state_mut(&mut self) -> &mut CasterState;

    /// Bake using `input`. Texture casters also write the image file.
    fn run_processing(&mut self, input: &CasterInput<'_>) -> Result<CastOutput>;

    fn settings(&self) -> &CasterSettings {
        &self.state().settings
    }

    fn settings_mut(&mut self) -> &mut CasterSettings {
        &mut self.state_mut().settings
    }

    /// Output path without extension
    fn set_output_file_path(&mut self, path: PathBuf) {
        let state = self.state_mut();
        state.output_file_path = Some(path);
        state.written_path = None;
    }

    fn has_output_file_path(&self) -> bool {
        self.state().output_file_path.is_some()
    }

    /// Path of the last written file, extension included
    fn output_file_path(&self) -> Option<&Path> {
        self.state().written_path.as_deref()
    }
}

/// Evaluates source material networks at mapping image layers
pub(crate) struct SourceShading<'a> {
    pub sources: &'a [SourceMesh],
    pub materials: &'a MaterialTable,
    pub textures: &'a TextureTable,
}

impl<'a> SourceShading<'a> {
    pub(crate) fn new(input: &CasterInput<'a>) -> Self {
        Self {
            sources: input.mapping_image.sources(),
            materials: input.source_materials,
            textures: input.source_textures,
        }
    }

    pub(crate) fn geometry(&self, layer: &SourceSample) -> Option<&'a GeometryData> {
        self.sources.get(layer.mesh as usize).map(|s| &s.geometry)
    }

    /// Value of `channel` on the layer's material; `None` when the material
    /// has no such channel
    pub(crate) fn channel_value(&self, layer: &SourceSample, channel: &str) -> Option<Color> {
        let g = self.geometry(layer)?;
        self.channel_value_at(g, layer.triangle as usize, layer.barycentric, channel)
    }

    pub(crate) fn channel_value_at(&self, g: &GeometryData, t: usize, bary: [f32; 3], channel: &str) -> Option<Color> {
        let network = self.materials.material(g.material_id(t))?.shading_network(channel)?;
        let tex_coords: Vec<Option<Vector2f>> = g
            .tex_coords
            .iter()
            .map(|level| {
                level
                    .as_ref()
                    .map(|uv| uv[t * 3] * bary[0] + uv[t * 3 + 1] * bary[1] + uv[t * 3 + 2] * bary[2])
            })
            .collect();
        let vertex_colors: Vec<Option<Color>> = g
            .colors
            .iter()
            .map(|level| {
                level
                    .as_ref()
                    .map(|c| c[t * 3] * bary[0] + c[t * 3 + 1] * bary[1] + c[t * 3 + 2] * bary[2])
            })
            .collect();
        Some(network.evaluate(&ShadingContext {
            tex_coords: &tex_coords,
            vertex_colors: &vertex_colors,
            textures: self.textures,
        }))
    }

    /// Opacity of a layer; materials without the opacity channel are opaque
    pub(crate) fn opacity(&self, layer: &SourceSample, settings: &CasterSettings) -> f32 {
        self.channel_value(layer, &settings.opacity_channel)
            .map(|c| c[settings.opacity_channel_component.index()].clamp(0.0, 1.0))
            .unwrap_or(1.0)
    }
}

/// Average the samples of every texel with `evaluate`, dilate and fill,
/// then write the image. Returns the written path and the image.
pub(crate) fn cast_texture<F>(
    state: &mut CasterState,
    mapping_image: &MappingImage,
    evaluate: F,
) -> Result<(PathBuf, ImageData)>
where
    F: Fn(&MappingSample) -> Option<Color> + Sync,
{
    state.settings.validate()?;
    let path = state.target_path()?;
    let (width, height) = (mapping_image.width, mapping_image.height);
    let mut image = ImageData::new(width, height);
    let mut covered = vec![false; width * height];

    image
        .pixels
        .par_chunks_mut(width.max(1))
        .zip(covered.par_chunks_mut(width.max(1)))
        .enumerate()
        .for_each(|(y, (row, row_covered))| {
            for x in 0..width {
                let mut sum = Color::zeros();
                let mut count = 0usize;
                for sample in mapping_image.texel_samples(x, y).iter().flatten() {
                    if let Some(value) = evaluate(sample) {
                        sum += value;
                        count += 1;
                    }
                }
                if count > 0 {
                    row[x] = sum / count as f32;
                    row_covered[x] = true;
                }
            }
        });

    fill::dilate(&mut image, &mut covered, state.settings.dilation);
    fill::fill(&mut image, &covered, state.settings.fill_mode);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    save_image(&image, &path, state.settings.output_pixel_format)?;
    log::info!("wrote {} ({}x{})", path.display(), width, height);
    state.written_path = Some(path.clone());
    Ok((path, image))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use lodcrate_core::{GeometryData, ImageData, Material, NodeId, Point3f, ShadingNode, Texture};

    use super::*;
    use crate::mapping::{build_transfer_mapping, MappingImageSettings, OutputMaterialSettings};

    /// Unit quad on z, texture coordinates equal to x and y
    pub fn quad(name: &str, z: f32, material: usize) -> GeometryData {
        let mut g = GeometryData::from_coords_and_triangles(
            name,
            vec![
                Point3f::new(0.0, 0.0, z),
                Point3f::new(1.0, 0.0, z),
                Point3f::new(1.0, 1.0, z),
                Point3f::new(0.0, 1.0, z),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        );
        g.set_tex_coords(0, &[0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0])
            .unwrap();
        g.set_material_ids(&[material, material]).unwrap();
        g
    }

    pub fn mapping(sources: Vec<GeometryData>, layers: usize) -> MappingImage {
        let settings = MappingImageSettings {
            maximum_layers: layers,
            output_materials: vec![OutputMaterialSettings::default()
                .with_texture_size(16, 16)
                .with_multisampling_level(1)],
            ..MappingImageSettings::default()
        };
        let sources = sources
            .into_iter()
            .enumerate()
            .map(|(i, g)| SourceMesh::new(NodeId(i as u64 + 1), g))
            .collect();
        build_transfer_mapping(&[quad("out", 0.0, 0)], Arc::new(sources), &settings, 0).unwrap()
    }

    /// Material 0: red diffuse; material 1: half transparent blue
    pub fn materials() -> (MaterialTable, TextureTable) {
        let mut materials = MaterialTable::new();
        let mut red = Material::new("red");
        red.set_shading_network(channels::DIFFUSE, ShadingNode::color(1.0, 0.0, 0.0, 1.0));
        materials.add_material(red);
        let mut glass = Material::new("glass");
        glass.set_shading_network(channels::DIFFUSE, ShadingNode::color(0.0, 0.0, 1.0, 1.0));
        glass.set_shading_network(channels::OPACITY, ShadingNode::color(1.0, 1.0, 1.0, 0.5));
        materials.add_material(glass);

        let mut textures = TextureTable::new();
        textures.add_texture(Texture::new("unused", "unused.png").with_image(ImageData::new(1, 1)));
        (materials, textures)
    }

    pub fn temp_output(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("lodcrate_caster_{}_{}", name, std::process::id()))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_output_path_gets_extension() {
        let mut state = CasterState::new(CasterSettings::default());
        assert!(state.target_path().is_err());
        state.output_file_path = Some(PathBuf::from("out/Diffuse"));
        assert_eq!(state.target_path().unwrap(), PathBuf::from("out/Diffuse.png"));
    }

    #[test]
    fn test_cast_texture_writes_png() {
        let image = mapping(vec![quad("src", 0.0, 0)], 1);
        let mut state = CasterState::new(CasterSettings::default());
        let base = temp_output("driver");
        state.output_file_path = Some(base.clone());
        let (path, baked) = cast_texture(&mut state, &image, |_| Some(Color::new(0.25, 0.5, 0.75, 1.0))).unwrap();
        assert!(path.exists());
        assert_eq!(state.written_path.as_deref(), Some(path.as_path()));
        assert_eq!(baked.get(4, 4), Color::new(0.25, 0.5, 0.75, 1.0));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_channel_lookup_follows_material_ids() {
        let image = mapping(vec![quad("src", 0.0, 1)], 1);
        let (materials, textures) = materials();
        let shading = SourceShading {
            sources: image.sources(),
            materials: &materials,
            textures: &textures,
        };
        let layer = image.sample(8, 8, 0).unwrap().layers[0];
        assert_eq!(shading.channel_value(&layer, channels::DIFFUSE), Some(Color::new(0.0, 0.0, 1.0, 1.0)));
        assert_eq!(shading.opacity(&layer, &CasterSettings::default()), 0.5);
        assert_eq!(shading.channel_value(&layer, channels::SPECULAR), None);
    }
}
