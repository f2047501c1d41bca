use lodcrate_core::{Color, Error, Result};

use super::{cast_texture, CastOutput, CasterInput, CasterSettings, CasterState, CasterType, MaterialCaster};

/// Bakes the offset from the processed surface to the front source layer
/// along the output normal. `0.5` is no offset; `0` and `1` are
/// `-max_displacement` and `+max_displacement`.
#[derive(Debug, Clone)]
pub struct DisplacementCaster {
    state: CasterState,
    pub max_displacement: f32,
}

impl Default for DisplacementCaster {
    fn default() -> Self {
        Self {
            state: CasterState::new(CasterSettings::default().with_material_channel("Displacement")),
            max_displacement: 0.1,
        }
    }
}

impl DisplacementCaster {
    pub fn new(max_displacement: f32) -> Self {
        Self {
            max_displacement,
            ..Self::default()
        }
    }
}

impl MaterialCaster for DisplacementCaster {
    fn caster_type(&self) -> CasterType {
        CasterType::Displacement
    }

    fn state(&self) -> &CasterState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut CasterState {
        &mut self.state
    }

    fn run_processing(&mut self, input: &CasterInput<'_>) -> Result<CastOutput> {
        if self.max_displacement.is_nan() || self.max_displacement <= 0.0 {
            return Err(Error::InvalidSettings(format!(
                "max displacement must be positive, got {}",
                self.max_displacement
            )));
        }
        let max = self.max_displacement;
        let (path, image) = cast_texture(&mut self.state, input.mapping_image, |sample| {
            let layer = sample.layers.first()?;
            let v = 0.5 + 0.5 * (layer.distance / max).clamp(-1.0, 1.0);
            Some(Color::new(v, v, v, 1.0))
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
    use lodcrate_core::{MaterialTable, TextureTable};

    #[test]
    fn test_offset_is_normalised() {
        let image = mapping(vec![quad("above", 0.05, 0)], 1);
        let mut caster = DisplacementCaster::new(0.1);
        caster.set_output_file_path(temp_output("displacement"));
        let output = caster
            .run_processing(&CasterInput {
                mapping_image: &image,
                source_materials: &MaterialTable::new(),
                source_textures: &TextureTable::new(),
                processed_scene: None,
            })
            .unwrap();
        std::fs::remove_file(caster.output_file_path().unwrap()).unwrap();
        let CastOutput::Texture { image, .. } = output else {
            panic!("expected a texture");
        };
        assert_relative_eq!(image.get(8, 8).x, 0.75, epsilon = 1e-4);

        caster.max_displacement = 0.0;
        assert!(caster
            .run_processing(&CasterInput {
                mapping_image: &mapping(vec![quad("above", 0.05, 0)], 1),
                source_materials: &MaterialTable::new(),
                source_textures: &TextureTable::new(),
                processed_scene: None,
            })
            .is_err());
    }
}
