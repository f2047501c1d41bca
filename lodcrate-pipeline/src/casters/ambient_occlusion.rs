use lodcrate_core::{channels, Color, Error, Point3f, Result, Vector3f};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{cast_texture, CastOutput, CasterInput, CasterSettings, CasterState, CasterType, MaterialCaster};
use crate::mapping::SourceSample;
use crate::raycast::{Ray, RayIndex};

/// Origin offset along the normal, relative to the scene diameter
const SURFACE_OFFSET: f32 = 1e-4;

/// Bakes ambient occlusion of the source surfaces. Every sample casts
/// cosine-weighted rays over the hemisphere of its front source layer; the
/// texel stores one minus the weighted fraction that hits geometry.
#[derive(Debug, Clone)]
pub struct AmbientOcclusionCaster {
    state: CasterState,
    /// Split evenly over the samples of a texel, at least one each
    pub rays_per_pixel: usize,
    /// Hits further away do not occlude. Zero means a tenth of the scene diameter.
    pub occlusion_distance: f32,
    /// Zero counts every hit fully; larger values fade distant hits faster
    pub occlusion_falloff: f32,
    pub occlusion_multiplier: f32,
}

impl Default for AmbientOcclusionCaster {
    fn default() -> Self {
        Self {
            state: CasterState::new(
                CasterSettings::default().with_material_channel(channels::AMBIENT_OCCLUSION),
            ),
            rays_per_pixel: 64,
            occlusion_distance: 0.0,
            occlusion_falloff: 0.0,
            occlusion_multiplier: 1.0,
        }
    }
}

impl AmbientOcclusionCaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rays_per_pixel(mut self, rays: usize) -> Self {
        self.rays_per_pixel = rays;
        self
    }

    pub fn with_occlusion_distance(mut self, distance: f32) -> Self {
        self.occlusion_distance = distance;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.rays_per_pixel == 0 {
            return Err(Error::InvalidSettings("rays per pixel must be positive".into()));
        }
        if !(self.occlusion_distance >= 0.0) || !(self.occlusion_falloff >= 0.0) || !(self.occlusion_multiplier >= 0.0) {
            return Err(Error::InvalidSettings(
                "occlusion distance, falloff and multiplier must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// Same directions for the same surface point on every run
fn sample_seed(layer: &SourceSample) -> u64 {
    let [u, v, _] = layer.barycentric;
    (((layer.mesh as u64) << 32) | layer.triangle as u64)
        ^ (u.to_bits() as u64).rotate_left(17)
        ^ (v.to_bits() as u64).rotate_left(41)
}

fn cosine_direction(normal: &Vector3f, rng: &mut StdRng) -> Vector3f {
    let helper = if normal.x.abs() < 0.9 { Vector3f::x() } else { Vector3f::y() };
    let tangent = normal.cross(&helper).normalize();
    let bitangent = normal.cross(&tangent);
    let phi = std::f32::consts::TAU * rng.gen::<f32>();
    let r2: f32 = rng.gen();
    let r = r2.sqrt();
    tangent * (r * phi.cos()) + bitangent * (r * phi.sin()) + normal * (1.0 - r2).max(0.0).sqrt()
}

impl MaterialCaster for AmbientOcclusionCaster {
    fn caster_type(&self) -> CasterType {
        CasterType::AmbientOcclusion
    }

    fn state(&self) -> &CasterState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut CasterState {
        &mut self.state
    }

    fn run_processing(&mut self, input: &CasterInput<'_>) -> Result<CastOutput> {
        self.validate()?;
        let mapping_image = input.mapping_image;
        let index = RayIndex::new(mapping_image.sources().iter().map(|s| &s.geometry));
        let distance = if self.occlusion_distance > 0.0 {
            self.occlusion_distance
        } else {
            0.1 * index.diameter()
        };
        let offset = SURFACE_OFFSET * index.diameter();
        let rays = self.rays_per_pixel.div_ceil(mapping_image.samples_per_texel().max(1)).max(1);
        let (falloff, multiplier) = (self.occlusion_falloff, self.occlusion_multiplier);
        log::debug!(
            "casting {} occlusion rays per sample over {} triangles, distance {}",
            rays,
            mapping_image.sources().iter().map(|s| s.geometry.triangle_count()).sum::<usize>(),
            distance
        );

        let (path, image) = cast_texture(&mut self.state, mapping_image, |sample| {
            let layer = sample.layers.first()?;
            let g = mapping_image.source_geometry(layer)?;
            let t = layer.triangle as usize;
            let mut normal = g.face_normal(t);
            if normal == Vector3f::zeros() {
                return None;
            }
            if normal.dot(&sample.frame.normal) < 0.0 {
                normal = -normal;
            }
            let origin: Point3f = g.interpolate_position(t, layer.barycentric) + normal * offset;
            let mut rng = StdRng::seed_from_u64(sample_seed(layer));
            let mut occlusion = 0.0f32;
            for _ in 0..rays {
                let ray = Ray::new(origin, cosine_direction(&normal, &mut rng), distance);
                if let Some(hit) = index.first_hit(&ray) {
                    if (hit.mesh, hit.triangle) == (layer.mesh, layer.triangle) {
                        continue;
                    }
                    occlusion += (1.0 - hit.distance / distance).max(0.0).powf(falloff);
                }
            }
            let ao = (1.0 - multiplier * occlusion / rays as f32).clamp(0.0, 1.0);
            Some(Color::new(ao, ao, ao, 1.0))
        })?;
        Ok(CastOutput::Texture {
            channel: self.state.settings.material_channel.clone(),
            path,
            image,
        })
    }
}
