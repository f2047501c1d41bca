use std::fmt;
use std::sync::Arc;

use lodcrate_core::{Color, GeometryData, Result};

use super::{cast_texture, CastOutput, CasterInput, CasterSettings, CasterState, CasterType, MaterialCaster, SourceShading};
use crate::mapping::{SourceSample, SurfaceFrame};

/// What a compute evaluator sees at one mapping image sample
pub struct ComputeSample<'a> {
    pub frame: &'a SurfaceFrame,
    /// Front source layer
    pub layer: &'a SourceSample,
    pub source_geometry: &'a GeometryData,
    /// The material channel evaluated at the layer, if its material has one
    pub channel_value: Option<Color>,
}

pub type ComputeEvaluator = Arc<dyn Fn(&ComputeSample<'_>) -> Option<Color> + Send + Sync>;

/// Bakes the result of a user evaluation function. Without one it bakes
/// the front layer's material channel.
#[derive(Clone, Default)]
pub struct ComputeCaster {
    state: CasterState,
    evaluator: Option<ComputeEvaluator>,
}

impl fmt::Debug for ComputeCaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeCaster")
            .field("state", &self.state)
            .field("evaluator", &self.evaluator.is_some())
            .finish()
    }
}

impl ComputeCaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: CasterSettings) -> Self {
        Self {
            state: CasterState::new(settings),
            evaluator: None,
        }
    }

    pub fn with_evaluator<F>(mut self, evaluator: F) -> Self
    where
        F: Fn(&ComputeSample<'_>) -> Option<Color> + Send + Sync + 'static,
    {
        self.evaluator = Some(Arc::new(evaluator));
        self
    }
}

impl MaterialCaster for ComputeCaster {
    fn caster_type(&self) -> CasterType {
        CasterType::Compute
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
        let evaluator = self.evaluator.clone();
        let (path, image) = cast_texture(&mut self.state, input.mapping_image, |sample| {
            let layer = sample.layers.first()?;
            let compute = ComputeSample {
                frame: &sample.frame,
                layer,
                source_geometry: shading.geometry(layer)?,
                channel_value: shading.channel_value(layer, &channel),
            };
            match &evaluator {
                Some(evaluate) => evaluate(&compute),
                None => compute.channel_value,
            }
        })?;
        Ok(CastOutput::Texture { channel, path, image })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use approx::assert_relative_eq;

    fn cast(caster: &mut ComputeCaster, name: &str) -> lodcrate_core::ImageData {
        let image = mapping(vec![quad("src", 0.0, 0)], 1);
        let (materials, textures) = materials();
        caster.set_output_file_path(temp_output(name));
        let output = caster
            .run_processing(&CasterInput {
                mapping_image: &image,
                source_materials: &materials,
                source_textures: &textures,
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
    fn test_defaults_to_channel_value() {
        let image = cast(&mut ComputeCaster::new(), "compute_default");
        assert_relative_eq!(image.get(2, 2), Color::new(1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn test_evaluator_sees_the_frame() {
        let mut caster = ComputeCaster::new().with_evaluator(|s| {
            let inverted = Color::repeat(1.0) - s.channel_value?;
            Some(Color::new(inverted.x, inverted.y, s.frame.position.x, 1.0))
        });
        let image = cast(&mut caster, "compute_custom");
        let texel = image.get(12, 4);
        assert_relative_eq!(texel.x, 0.0);
        assert_relative_eq!(texel.y, 1.0);
        assert_relative_eq!(texel.z, 0.78125, epsilon = 1e-4);
    }
}
