//! Color and opacity casting with front-to-back layer compositing

use lodcrate_core::{white, Color, Result};

use super::{cast_texture, CastOutput, CasterInput, CasterSettings, CasterState, CasterType, MaterialCaster, SourceShading};
use crate::mapping::MappingSample;

/// Opacity at which compositing stops looking at deeper layers
const OPAQUE: f32 = 0.999;

/// Composite the sample's layers front to back. Returns the un-premultiplied
/// color and the accumulated opacity.
pub(crate) fn composite(sample: &MappingSample, shading: &SourceShading<'_>, settings: &CasterSettings) -> Option<(Color, f32)> {
    let first = sample.layers.first()?;
    let mut accumulated = Color::zeros();
    let mut alpha = 0.0f32;
    for layer in &sample.layers {
        let color = shading
            .channel_value(layer, &settings.material_channel)
            .unwrap_or_else(white);
        let opacity = shading.opacity(layer, settings);
        let weight = (1.0 - alpha) * opacity;
        accumulated += color * weight;
        alpha += weight;
        if alpha >= OPAQUE {
            break;
        }
    }
    let color = if alpha > f32::EPSILON {
        accumulated / alpha
    } else {
        shading
            .channel_value(first, &settings.material_channel)
            .unwrap_or_else(white)
    };
    Some((color, alpha))
}

/// Bakes a material channel into a texture
#[derive(Debug, Clone, Default)]
pub struct ColorCaster {
    state: CasterState,
}

impl ColorCaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: CasterSettings) -> Self {
        Self {
            state: CasterState::new(settings),
        }
    }
}

impl MaterialCaster for ColorCaster {
    fn caster_type(&self) -> CasterType {
        CasterType::Color
    }

    fn state(&self) -> &CasterState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut CasterState {
        &mut self.state
    }

    fn run_processing(&mut self, input: &CasterInput<'_>) -> Result<CastOutput> {
        let shading = SourceShading::new(input);
        let settings = self.state.settings.clone();
        let (path, image) = cast_texture(&mut self.state, input.mapping_image, |sample| {
            let (color, alpha) = composite(sample, &shading, &settings)?;
            let alpha = if settings.bake_opacity_in_alpha { alpha } else { 1.0 };
            Some(Color::new(color.x, color.y, color.z, alpha))
        })?;
        Ok(CastOutput::Texture {
            channel: settings.material_channel,
            path,
            image,
        })
    }
}

/// Bakes the accumulated layer opacity as a gray texture
#[derive(Debug, Clone)]
pub struct OpacityCaster {
    state: CasterState,
}

impl Default for OpacityCaster {
    fn default() -> Self {
        Self::with_settings(CasterSettings::default().with_material_channel(lodcrate_core::channels::OPACITY))
    }
}

impl OpacityCaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: CasterSettings) -> Self {
        Self {
            state: CasterState::new(settings),
        }
    }
}

impl MaterialCaster for OpacityCaster {
    fn caster_type(&self) -> CasterType {
        CasterType::Opacity
    }

    fn state(&self) -> &CasterState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut CasterState {
        &mut self.state
    }

    fn run_processing(&mut self, input: &CasterInput<'_>) -> Result<CastOutput> {
        let shading = SourceShading::new(input);
        let settings = self.state.settings.clone();
        let (path, image) = cast_texture(&mut self.state, input.mapping_image, |sample| {
            let (_, alpha) = composite(sample, &shading, &settings)?;
            Some(Color::new(alpha, alpha, alpha, 1.0))
        })?;
        Ok(CastOutput::Texture {
            channel: settings.material_channel,
            path,
            image,
        })
    }
}
