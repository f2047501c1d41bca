//! Normal casting

use lodcrate_core::{channels, Color, GeometryData, Result, Vector3f};

use super::{cast_texture, CastOutput, CasterInput, CasterSettings, CasterState, CasterType, MaterialCaster, SourceShading};
use crate::mapping::{MappingSample, SourceSample};

/// Bakes source normals, optionally perturbed by the source normal maps
#[derive(Debug, Clone)]
pub struct NormalCaster {
    state: CasterState,
    /// Express normals in the output tangent frame instead of scene space
    pub generate_tangent_space_normals: bool,
    /// Negate the green component, for engines with a flipped bitangent
    pub flip_green: bool,
}

impl Default for NormalCaster {
    fn default() -> Self {
        Self {
            state: CasterState::new(CasterSettings::default().with_material_channel(channels::NORMALS)),
            generate_tangent_space_normals: true,
            flip_green: false,
        }
    }
}

fn interpolated(values: &[Vector3f], t: usize, bary: [f32; 3]) -> Vector3f {
    values[t * 3] * bary[0] + values[t * 3 + 1] * bary[1] + values[t * 3 + 2] * bary[2]
}

impl NormalCaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scene-space source normal of `layer`
    fn source_normal(g: &GeometryData, layer: &SourceSample, shading: &SourceShading<'_>, channel: &str) -> Vector3f {
        let t = layer.triangle as usize;
        let bary = layer.barycentric;
        let geometric = g
            .normals
            .as_ref()
            .and_then(|n| interpolated(n, t, bary).try_normalize(f32::EPSILON))
            .unwrap_or_else(|| g.face_normal(t));

        let (Some(tangents), Some(mapped)) = (&g.tangents, shading.channel_value_at(g, t, bary, channel)) else {
            return geometric;
        };
        let tangent = interpolated(tangents, t, bary);
        let tangent = (tangent - geometric * geometric.dot(&tangent))
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(Vector3f::x);
        let bitangent = geometric.cross(&tangent);
        let local = Vector3f::new(mapped.x, mapped.y, mapped.z) * 2.0 - Vector3f::repeat(1.0);
        (tangent * local.x + bitangent * local.y + geometric * local.z)
            .try_normalize(f32::EPSILON)
            .unwrap_or(geometric)
    }

    fn encode(sample: &MappingSample, normal: Vector3f, tangent_space: bool, flip_green: bool) -> Color {
        let mut n = if tangent_space {
            let frame = &sample.frame;
            Vector3f::new(
                normal.dot(&frame.tangent),
                normal.dot(&frame.bitangent),
                normal.dot(&frame.normal),
            )
        } else {
            normal
        };
        if flip_green {
            n.y = -n.y;
        }
        Color::new(0.5 + 0.5 * n.x, 0.5 + 0.5 * n.y, 0.5 + 0.5 * n.z, 1.0)
    }
}

impl MaterialCaster for NormalCaster {
    fn caster_type(&self) -> CasterType {
        CasterType::Normal
    }

    fn state(&self) -> &CasterState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut CasterState {
        &mut self.state
    }

    fn run_processing(&mut self, input: &CasterInput<'_>) -> Result<CastOutput> {
        let shading = SourceShading::new(input);
        let channel = self.state.settings.material_channel.clone();
        let (tangent_space, flip_green) = (self.generate_tangent_space_normals, self.flip_green);
        let (path, image) = cast_texture(&mut self.state, input.mapping_image, |sample| {
            let layer = sample.layers.first()?;
            let g = shading.geometry(layer)?;
            let normal = Self::source_normal(g, layer, &shading, &channel);
            Some(Self::encode(sample, normal, tangent_space, flip_green))
        })?;
        Ok(CastOutput::Texture { channel, path, image })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use approx::assert_relative_eq;
    use lodcrate_core::{Material, MaterialTable, ShadingNode, TextureTable};

    fn cast(caster: &mut NormalCaster, source: GeometryData, materials: &MaterialTable, name: &str) -> lodcrate_core::ImageData {
        let image = mapping(vec![source], 1);
        caster.set_output_file_path(temp_output(name));
        let output = caster
            .run_processing(&CasterInput {
                mapping_image: &image,
                source_materials: materials,
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
    fn test_flat_source_is_straight_up_in_tangent_space() {
        let mut caster = NormalCaster::new();
        let image = cast(&mut caster, quad("src", 0.0, 0), &MaterialTable::new(), "flat");
        assert_relative_eq!(image.get(5, 5), Color::new(0.5, 0.5, 1.0, 1.0), epsilon = 1e-5);

        caster.generate_tangent_space_normals = false;
        caster.flip_green = true;
        let image = cast(&mut caster, quad("src", 0.0, 0), &MaterialTable::new(), "object");
        assert_relative_eq!(image.get(5, 5), Color::new(0.5, 0.5, 1.0, 1.0), epsilon = 1e-5);
    }

    #[test]
    fn test_normal_map_tilts_the_normal() {
        let mut source = quad("src", 0.0, 0);
        source.tangents = Some(vec![Vector3f::x(); 6]);
        let mut materials = MaterialTable::new();
        let mut bumpy = Material::new("bumpy");
        // tangent-space normal (1, 0, 0) encoded
        bumpy.set_shading_network(channels::NORMALS, ShadingNode::color(1.0, 0.5, 0.5, 1.0));
        materials.add_material(bumpy);

        let mut caster = NormalCaster::new();
        let image = cast(&mut caster, source, &materials, "mapped");
        assert_relative_eq!(image.get(5, 5), Color::new(1.0, 0.5, 0.5, 1.0), epsilon = 1e-5);
    }
}
