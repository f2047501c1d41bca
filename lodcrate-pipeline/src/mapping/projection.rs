//! Projection mapping: orthographic views of the sources into atlas regions
//!
//! Used by impostors. Each view owns a rectangle of the output texture;
//! every source triangle is rasterized into it with its depth along the
//! view, and the layers of a sample are the surfaces hit front to back.

use std::cmp::Reverse;
use std::sync::Arc;

use lodcrate_core::{Error, Point3f, Result, Vector2f, Vector3f};
use rayon::prelude::*;

use super::raster::{rasterize_triangle, subsample_offsets, uv_to_pixel};
use super::{MappingImage, MappingImageSettings, MappingSample, SourceMesh, SourceSample, SurfaceFrame};

/// One orthographic view rendered into part of the output texture
#[derive(Debug, Clone, PartialEq)]
pub struct ImpostorView {
    /// Looking direction, from the viewer into the scene
    pub direction: Vector3f,
    pub up: Vector3f,
    /// Centre of the view window
    pub center: Point3f,
    /// Half width and half height of the view window in scene units
    pub half_extents: Vector2f,
    /// Texture coordinate rectangle the view is drawn into
    pub region_min: Vector2f,
    pub region_max: Vector2f,
    /// Restrict the view to these `(mesh, triangle)` pairs
    pub triangles: Option<Vec<(u32, u32)>>,
}

impl ImpostorView {
    pub fn new(direction: Vector3f, up: Vector3f, center: Point3f, half_extents: Vector2f) -> Self {
        Self {
            direction,
            up,
            center,
            half_extents,
            region_min: Vector2f::zeros(),
            region_max: Vector2f::new(1.0, 1.0),
            triangles: None,
        }
    }

    /// View that tightly frames `points` along `direction`
    pub fn framing<'a>(direction: Vector3f, up: Vector3f, points: impl Iterator<Item = &'a Point3f>) -> Result<Self> {
        let mut view = Self::new(direction, up, Point3f::origin(), Vector2f::new(1.0, 1.0));
        let (d, right, true_up) = view.basis()?;
        let mut min = Vector3f::repeat(f32::MAX);
        let mut max = Vector3f::repeat(f32::MIN);
        for p in points {
            let local = Vector3f::new(p.coords.dot(&right), p.coords.dot(&true_up), p.coords.dot(&d));
            min = min.inf(&local);
            max = max.sup(&local);
        }
        if min.x > max.x {
            return Err(Error::InvalidData("nothing to frame".into()));
        }
        let mid = (min + max) * 0.5;
        view.center = Point3f::from(right * mid.x + true_up * mid.y + d * mid.z);
        view.half_extents = Vector2f::new(
            ((max.x - min.x) * 0.5).max(f32::EPSILON),
            ((max.y - min.y) * 0.5).max(f32::EPSILON),
        );
        Ok(view)
    }

    pub fn with_region(mut self, min: Vector2f, max: Vector2f) -> Self {
        self.region_min = min;
        self.region_max = max;
        self
    }

    pub fn with_triangles(mut self, triangles: Vec<(u32, u32)>) -> Self {
        self.triangles = Some(triangles);
        self
    }

    /// Unit looking direction, right and up vectors
    pub fn basis(&self) -> Result<(Vector3f, Vector3f, Vector3f)> {
        let direction = self
            .direction
            .try_normalize(f32::EPSILON)
            .ok_or_else(|| Error::InvalidSettings("view direction is zero".into()))?;
        let right = direction
            .cross(&self.up)
            .try_normalize(1e-6)
            .ok_or_else(|| Error::InvalidSettings("up vector is parallel to the view direction".into()))?;
        Ok((direction, right, right.cross(&direction)))
    }

    /// Texture coordinate of `p` within the view region
    pub fn project(&self, p: &Point3f) -> Result<Vector2f> {
        let (_, right, up) = self.basis()?;
        let offset = p - self.center;
        let s = Vector2f::new(
            offset.dot(&right) / self.half_extents.x,
            offset.dot(&up) / self.half_extents.y,
        );
        Ok(self.region_min + (s * 0.5 + Vector2f::repeat(0.5)).component_mul(&(self.region_max - self.region_min)))
    }

    /// Point on the view plane at texture coordinate `uv`
    fn unproject(&self, uv: Vector2f, right: &Vector3f, up: &Vector3f) -> Point3f {
        let size = self.region_max - self.region_min;
        let s = (uv - self.region_min).component_div(&size) * 2.0 - Vector2f::repeat(1.0);
        self.center + right * (s.x * self.half_extents.x) + up * (s.y * self.half_extents.y)
    }
}

/// Insert keeping front-to-back order and at most `cap` entries
fn push_layer(stack: &mut Vec<SourceSample>, layer: SourceSample, cap: usize) {
    let key = |l: &SourceSample| (l.distance, Reverse((l.mesh, l.triangle)));
    let at = stack.iter().position(|l| key(l) < key(&layer)).unwrap_or(stack.len());
    if at < cap {
        stack.insert(at, layer);
        stack.truncate(cap);
    }
}

/// Build the mapping image of output material `output_index` by projecting
/// `sources` through `views`.
///
/// Sample frames lie on each view plane facing the viewer; layer distances
/// grow toward the viewer.
pub fn build_projection_mapping(
    sources: Arc<Vec<SourceMesh>>,
    views: &[ImpostorView],
    settings: &MappingImageSettings,
    output_index: usize,
) -> Result<MappingImage> {
    settings.validate()?;
    let output = settings
        .output_material_settings(output_index)
        .ok_or_else(|| Error::InvalidSettings(format!("no output material {}", output_index)))?;
    let (width, height) = (output.texture_width, output.texture_height);
    let offsets = subsample_offsets(output.multisampling_level);
    let spp = offsets.len();
    let cap = settings.maximum_layers;

    let mut stacks: Vec<Vec<SourceSample>> = vec![Vec::new(); width * height * spp];
    let mut owner: Vec<Option<u32>> = vec![None; width * height * spp];
    for (v, view) in views.iter().enumerate() {
        let (direction, _, _) = view.basis()?;
        let all: Vec<(u32, u32)>;
        let triangles = match &view.triangles {
            Some(list) => list.as_slice(),
            None => {
                all = sources
                    .iter()
                    .enumerate()
                    .flat_map(|(m, s)| (0..s.geometry.triangle_count()).map(move |t| (m as u32, t as u32)))
                    .collect();
                all.as_slice()
            }
        };
        for &(mesh, triangle) in triangles {
            let g = &sources
                .get(mesh as usize)
                .ok_or_else(|| Error::NotFound(format!("source mesh {}", mesh)))?
                .geometry;
            let tri = *g
                .triangles
                .get(triangle as usize)
                .ok_or_else(|| Error::NotFound(format!("triangle {} of {}", triangle, g.name)))?;
            let mut corners = [(0.0, 0.0); 3];
            for k in 0..3 {
                corners[k] = uv_to_pixel(view.project(&g.coords[tri[k]])?, width, height);
            }
            let depths = tri.map(|i| (view.center - g.coords[i]).dot(&direction));
            rasterize_triangle(corners, width, height, &offsets, |x, y, s, bary| {
                let index = (y * width + x) * spp + s;
                match owner[index] {
                    Some(o) if o != v as u32 => return,
                    _ => owner[index] = Some(v as u32),
                }
                let distance = depths[0] * bary[0] + depths[1] * bary[1] + depths[2] * bary[2];
                push_layer(
                    &mut stacks[index],
                    SourceSample {
                        mesh,
                        triangle,
                        barycentric: bary,
                        distance,
                    },
                    cap,
                );
            });
        }
    }

    let frames: Vec<(Vector3f, Vector3f, Vector3f)> = views.iter().map(ImpostorView::basis).collect::<Result<_>>()?;
    let mut image = MappingImage::new(width, height, output.multisampling_level, Arc::clone(&sources));
    image
        .samples_mut()
        .par_iter_mut()
        .zip(stacks.into_par_iter().zip(owner.into_par_iter()))
        .enumerate()
        .for_each(|(index, (slot, (layers, owner)))| {
            let Some(v) = owner else { return };
            let view = &views[v as usize];
            let (direction, right, up) = frames[v as usize];
            let texel = index / spp;
            let (ox, oy) = offsets[index % spp];
            let (px, py) = ((texel % width) as f32 + ox, (texel / width) as f32 + oy);
            let uv = Vector2f::new(px / width as f32, 1.0 - py / height as f32);
            *slot = Some(MappingSample {
                frame: SurfaceFrame {
                    position: view.unproject(uv, &right, &up),
                    normal: -direction,
                    tangent: right,
                    bitangent: up,
                },
                layers,
            });
        });

    log::debug!(
        "projection mapping {}x{} over {} views: {} covered texels",
        width,
        height,
        views.len(),
        image.covered_texel_count()
    );
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::OutputMaterialSettings;
    use approx::assert_relative_eq;
    use lodcrate_core::{GeometryData, NodeId};

    fn square(z: f32) -> GeometryData {
        GeometryData::from_coords_and_triangles(
            "square",
            vec![
                Point3f::new(-1.0, -1.0, z),
                Point3f::new(1.0, -1.0, z),
                Point3f::new(1.0, 1.0, z),
                Point3f::new(-1.0, 1.0, z),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        )
    }

    fn settings(layers: usize) -> MappingImageSettings {
        MappingImageSettings {
            maximum_layers: layers,
            output_materials: vec![OutputMaterialSettings::default()
                .with_texture_size(16, 16)
                .with_multisampling_level(1)],
            ..MappingImageSettings::default()
        }
    }

    #[test]
    fn test_basis_is_right_handed() {
        let view = ImpostorView::new(-Vector3f::z(), Vector3f::y(), Point3f::origin(), Vector2f::new(1.0, 1.0));
        let (d, r, u) = view.basis().unwrap();
        assert_relative_eq!(d, -Vector3f::z());
        assert_relative_eq!(r, Vector3f::x());
        assert_relative_eq!(u, Vector3f::y());

        let parallel = ImpostorView::new(Vector3f::y(), Vector3f::y(), Point3f::origin(), Vector2f::new(1.0, 1.0));
        assert!(matches!(parallel.basis(), Err(Error::InvalidSettings(_))));
    }

    #[test]
    fn test_framing_centres_the_points() {
        let g = square(2.0);
        let view = ImpostorView::framing(-Vector3f::z(), Vector3f::y(), g.coords.iter()).unwrap();
        assert_relative_eq!(view.center, Point3f::new(0.0, 0.0, 2.0), epsilon = 1e-6);
        assert_relative_eq!(view.half_extents, Vector2f::new(1.0, 1.0), epsilon = 1e-6);
        assert_relative_eq!(view.project(&Point3f::new(1.0, 1.0, 0.0)).unwrap(), Vector2f::new(1.0, 1.0), epsilon = 1e-6);
    }

    #[test]
    fn test_layers_front_to_back() {
        let sources = Arc::new(vec![
            SourceMesh::new(NodeId(1), square(-0.5)),
            SourceMesh::new(NodeId(2), square(0.5)),
        ]);
        let view = ImpostorView::new(-Vector3f::z(), Vector3f::y(), Point3f::origin(), Vector2f::new(1.0, 1.0));
        let image = build_projection_mapping(Arc::clone(&sources), &[view.clone()], &settings(3), 0).unwrap();
        assert_eq!(image.covered_texel_count(), 256);
        let sample = image.sample(5, 5, 0).unwrap();
        assert_eq!(sample.layers.iter().map(|l| l.mesh).collect::<Vec<_>>(), vec![1, 0]);
        assert_relative_eq!(sample.layers[0].distance, 0.5, epsilon = 1e-5);
        assert_relative_eq!(sample.frame.normal, Vector3f::z());

        let capped = build_projection_mapping(sources, &[view], &settings(1), 0).unwrap();
        assert_eq!(capped.sample(5, 5, 0).unwrap().layers[0].mesh, 1);
        assert_eq!(capped.max_layer_count(), 1);
    }

    #[test]
    fn test_regions_and_triangle_filter() {
        let sources = Arc::new(vec![SourceMesh::new(NodeId(1), square(0.0))]);
        let view = ImpostorView::new(-Vector3f::z(), Vector3f::y(), Point3f::origin(), Vector2f::new(1.0, 1.0))
            .with_region(Vector2f::zeros(), Vector2f::new(0.5, 1.0))
            .with_triangles(vec![(0, 0), (0, 1)]);
        let image = build_projection_mapping(sources, &[view], &settings(1), 0).unwrap();
        assert_eq!(image.covered_texel_count(), 128);
        assert!(image.is_covered(7, 0));
        assert!(!image.is_covered(8, 0));
    }
}
