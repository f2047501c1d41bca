use lodcrate_core::{bounds_of, Color, Result, Vector3f};
use serde::{Deserialize, Serialize};

use super::{cast_texture, CastOutput, CasterInput, CasterSettings, CasterState, CasterType, MaterialCaster, SourceShading};

/// Source attribute baked by [`GeometryDataCaster`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GeometryDataFieldType {
    /// Positions, normalised to the source bounding box
    #[default]
    Coords,
    /// Scene-space normals encoded as `0.5 + 0.5n`
    Normals,
    /// Texture coordinates of level `field_index`
    TexCoords,
    /// Material id in the red channel, divided by 255
    MaterialIds,
}

/// Bakes a raw attribute of the front source layer
#[derive(Debug, Clone)]
pub struct GeometryDataCaster {
    state: CasterState,
    pub field_type: GeometryDataFieldType,
    pub field_index: usize,
}

impl Default for GeometryDataCaster {
    fn default() -> Self {
        Self::new(GeometryDataFieldType::Coords)
    }
}

impl GeometryDataCaster {
    pub fn new(field_type: GeometryDataFieldType) -> Self {
        let channel = match field_type {
            GeometryDataFieldType::Coords => "GeometryData_Coords",
            GeometryDataFieldType::Normals => "GeometryData_Normals",
            GeometryDataFieldType::TexCoords => "GeometryData_TexCoords",
            GeometryDataFieldType::MaterialIds => "GeometryData_MaterialIds",
        };
        Self {
            state: CasterState::new(CasterSettings::default().with_material_channel(channel)),
            field_type,
            field_index: 0,
        }
    }
}

impl MaterialCaster for GeometryDataCaster {
    fn caster_type(&self) -> CasterType {
        CasterType::GeometryData
    }

    fn state(&self) -> &CasterState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut CasterState {
        &mut self.state
    }

    fn run_processing(&mut self, input: &CasterInput<'_>) -> Result<CastOutput> {
        let shading = SourceShading::new(input);
        let (min, max) = bounds_of(shading.sources.iter().flat_map(|s| s.geometry.coords.iter()));
        let extent = (max - min).map(|e| if e > f32::EPSILON { e } else { 1.0 });
        let (field_type, level) = (self.field_type, self.field_index);

        let (path, image) = cast_texture(&mut self.state, input.mapping_image, |sample| {
            let layer = sample.layers.first()?;
            let g = shading.geometry(layer)?;
            let t = layer.triangle as usize;
            let bary = layer.barycentric;
            let value = match field_type {
                GeometryDataFieldType::Coords => {
                    let p = (g.interpolate_position(t, bary) - min).component_div(&extent);
                    Color::new(p.x, p.y, p.z, 1.0)
                }
                GeometryDataFieldType::Normals => {
                    let n = g
                        .normals
                        .as_ref()
                        .map(|n| n[t * 3] * bary[0] + n[t * 3 + 1] * bary[1] + n[t * 3 + 2] * bary[2])
                        .and_then(|n: Vector3f| n.try_normalize(f32::EPSILON))
                        .unwrap_or_else(|| g.face_normal(t));
                    Color::new(0.5 + 0.5 * n.x, 0.5 + 0.5 * n.y, 0.5 + 0.5 * n.z, 1.0)
                }
                GeometryDataFieldType::TexCoords => {
                    let uv = g.tex_coords(level)?;
                    let uv = uv[t * 3] * bary[0] + uv[t * 3 + 1] * bary[1] + uv[t * 3 + 2] * bary[2];
                    Color::new(uv.x, uv.y, 0.0, 1.0)
                }
                GeometryDataFieldType::MaterialIds => {
                    let id = g.material_id(t) as f32 / 255.0;
                    Color::new(id, id, id, 1.0)
                }
            };
            Some(value)
        })?;
        Ok(CastOutput::Texture {
            channel: self.state.settings.material_channel.clone(),
            path,
            image,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use approx::assert_relative_eq;
    use lodcrate_core::{GeometryData, ImageData, MaterialTable, TextureTable};

    fn cast(field_type: GeometryDataFieldType, source: GeometryData) -> ImageData {
        let image = mapping(vec![source], 1);
        let mut caster = GeometryDataCaster::new(field_type);
        caster.set_output_file_path(temp_output(&format!("geometry_{:?}", field_type)));
        let output = caster
            .run_processing(&CasterInput {
                mapping_image: &image,
                source_materials: &MaterialTable::new(),
                source_textures: &TextureTable::new(),
                processed_scene: None,
            })
            .unwrap();
        std::fs::remove_file(caster.output_file_path().unwrap()).unwrap();
        match output {
            CastOutput::Texture { image, .. } => image,
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_coords_and_tex_coords() {
        let coords = cast(GeometryDataFieldType::Coords, quad("src", 0.0, 0));
        // texel (12, 4) centre is at (0.78125, 0.71875)
        assert_relative_eq!(coords.get(12, 4).x, 0.78125, epsilon = 1e-4);
        assert_relative_eq!(coords.get(12, 4).y, 0.71875, epsilon = 1e-4);

        let uv = cast(GeometryDataFieldType::TexCoords, quad("src", 0.0, 0));
        assert_relative_eq!(uv.get(12, 4).x, 0.78125, epsilon = 1e-4);
    }

    #[test]
    fn test_material_ids_and_normals() {
        let ids = cast(GeometryDataFieldType::MaterialIds, quad("src", 0.0, 5));
        assert_relative_eq!(ids.get(1, 1).x, 5.0 / 255.0, epsilon = 1e-6);
        let normals = cast(GeometryDataFieldType::Normals, quad("src", 0.0, 0));
        assert_relative_eq!(normals.get(1, 1), Color::new(0.5, 0.5, 1.0, 1.0), epsilon = 1e-5);
    }
}
