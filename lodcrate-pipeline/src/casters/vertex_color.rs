use lodcrate_core::{white, Color, Error, Result};
use rayon::prelude::*;

use super::{CastOutput, CasterInput, CasterSettings, CasterState, CasterType, MaterialCaster, SourceShading};
use crate::mapping::transfer::SourceIndex;

/// Bakes a material channel into per-corner colors of the processed scene,
/// sampling the closest source surface at every corner
#[derive(Debug, Clone)]
pub struct VertexColorCaster {
    state: CasterState,
    /// Channel name the colors are linked under
    pub output_color_name: String,
    pub output_color_level: usize,
}

impl Default for VertexColorCaster {
    fn default() -> Self {
        Self {
            state: CasterState::new(CasterSettings::default()),
            output_color_name: "VertexColors".to_string(),
            output_color_level: 0,
        }
    }
}

impl VertexColorCaster {
    pub fn new(output_color_name: impl Into<String>) -> Self {
        Self {
            output_color_name: output_color_name.into(),
            ..Self::default()
        }
    }
}

impl MaterialCaster for VertexColorCaster {
    fn caster_type(&self) -> CasterType {
        CasterType::VertexColor
    }

    fn state(&self) -> &CasterState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut CasterState {
        &mut self.state
    }

    fn run_processing(&mut self, input: &CasterInput<'_>) -> Result<CastOutput> {
        self.state.settings.validate()?;
        let scene = input
            .processed_scene
            .ok_or_else(|| Error::InvalidSettings("vertex color casting needs the processed scene".into()))?;
        let shading = SourceShading::new(input);
        let index = SourceIndex::new(shading.sources);
        let channel = &self.state.settings.material_channel;

        let mut colors = Vec::new();
        for node in scene.mesh_nodes() {
            let Some(g) = scene.world_geometry(node) else {
                continue;
            };
            let corner_colors: Vec<Color> = (0..g.corner_count())
                .into_par_iter()
                .map(|corner| {
                    let p = g.coords[g.triangles[corner / 3][corner % 3]];
                    index
                        .nearest(&p)
                        .and_then(|hit| {
                            let source = &shading.sources[hit.mesh as usize].geometry;
                            shading.channel_value_at(source, hit.triangle as usize, hit.barycentric, channel)
                        })
                        .unwrap_or_else(white)
                })
                .collect();
            colors.push((node, corner_colors));
        }
        log::info!(
            "cast {} into vertex colors '{}' of {} meshes",
            channel,
            self.output_color_name,
            colors.len()
        );
        Ok(CastOutput::VertexColors {
            channel: self.output_color_name.clone(),
            level: self.output_color_level,
            colors,
        })
    }
}
