//! Transfer mapping: output texels to the nearest source surfaces
//!
//! Output triangles are rasterized in texture space; each covered sample is
//! matched to the closest point of every source mesh within a thin band
//! around the overall closest one. Source triangles are indexed by their
//! bounding boxes in an R-tree and searched branch-and-bound.

use std::sync::Arc;

use lodcrate_core::{bounds_of, Error, GeometryData, Point3f, Result, Vector3f};
use rayon::prelude::*;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::RTree;

use super::raster::{rasterize_triangle, subsample_offsets, uv_to_pixel};
use super::{MappingImage, MappingImageSettings, MappingSample, SourceMesh, SourceSample, SurfaceFrame};

/// Layer band relative to the source diameter
const LAYER_BAND: f32 = 1e-3;

type TriangleBox = GeomWithData<Rectangle<[f32; 3]>, (u32, u32)>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SurfaceHit {
    pub mesh: u32,
    pub triangle: u32,
    pub barycentric: [f32; 3],
    pub point: Point3f,
    pub distance: f32,
}

/// Closest-point queries over every triangle of a source mesh list
pub(crate) struct SourceIndex<'a> {
    sources: &'a [SourceMesh],
    tree: RTree<TriangleBox>,
    diameter: f32,
}

impl<'a> SourceIndex<'a> {
    pub(crate) fn new(sources: &'a [SourceMesh]) -> Self {
        let boxes: Vec<TriangleBox> = sources
            .iter()
            .enumerate()
            .flat_map(|(m, source)| {
                let g = &source.geometry;
                g.triangles.iter().enumerate().map(move |(t, tri)| {
                    let (min, max) = bounds_of(tri.iter().map(|&v| &g.coords[v]));
                    GeomWithData::new(
                        Rectangle::from_corners([min.x, min.y, min.z], [max.x, max.y, max.z]),
                        (m as u32, t as u32),
                    )
                })
            })
            .collect();
        let (min, max) = bounds_of(sources.iter().flat_map(|s| s.geometry.coords.iter()));
        Self {
            sources,
            tree: RTree::bulk_load(boxes),
            diameter: (max - min).norm(),
        }
    }

    pub(crate) fn diameter(&self) -> f32 {
        self.diameter
    }

    fn hit(&self, (mesh, triangle): (u32, u32), p: &Point3f) -> SurfaceHit {
        let g = &self.sources[mesh as usize].geometry;
        let [a, b, c] = g.triangles[triangle as usize];
        let (point, barycentric) = closest_point_on_triangle(p, &g.coords[a], &g.coords[b], &g.coords[c]);
        SurfaceHit {
            mesh,
            triangle,
            barycentric,
            point,
            distance: (point - p).norm(),
        }
    }

    /// Closest hit of every mesh lying within `band` of the closest overall
    pub(crate) fn closest_per_mesh(&self, p: &Point3f, band: f32) -> Vec<SurfaceHit> {
        let mut best: Vec<SurfaceHit> = Vec::new();
        let mut best_distance = f32::INFINITY;
        for (item, envelope_distance_2) in self.tree.nearest_neighbor_iter_with_distance_2(&[p.x, p.y, p.z]) {
            let reach = best_distance + band;
            if envelope_distance_2 > reach * reach {
                break;
            }
            let hit = self.hit(item.data, p);
            best_distance = best_distance.min(hit.distance);
            match best.iter_mut().find(|h| h.mesh == hit.mesh) {
                Some(h) if (hit.distance, hit.triangle) < (h.distance, h.triangle) => *h = hit,
                Some(_) => {}
                None => best.push(hit),
            }
        }
        best.retain(|h| h.distance <= best_distance + band);
        best
    }

    pub(crate) fn nearest(&self, p: &Point3f) -> Option<SurfaceHit> {
        self.closest_per_mesh(p, 0.0)
            .into_iter()
            .min_by(|a, b| a.distance.total_cmp(&b.distance).then(a.mesh.cmp(&b.mesh)))
    }
}

/// Closest point of triangle `abc` to `p` with its barycentric weights
pub(crate) fn closest_point_on_triangle(p: &Point3f, a: &Point3f, b: &Point3f, c: &Point3f) -> (Point3f, [f32; 3]) {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (*a, [1.0, 0.0, 0.0]);
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (*b, [0.0, 1.0, 0.0]);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return (a + ab * v, [1.0 - v, v, 0.0]);
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (*c, [0.0, 0.0, 1.0]);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return (a + ac * w, [1.0 - w, 0.0, w]);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && d4 - d3 >= 0.0 && d5 - d6 >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (b + (c - b) * w, [0.0, 1.0 - w, w]);
    }

    let denom = 1.0 / (va + vb + vc);
    if !denom.is_finite() {
        return (*a, [1.0, 0.0, 0.0]);
    }
    let v = vb * denom;
    let w = vc * denom;
    (a + ab * v + ac * w, [1.0 - v - w, v, w])
}

fn interpolate(values: &[Vector3f], t: usize, bary: [f32; 3]) -> Vector3f {
    values[t * 3] * bary[0] + values[t * 3 + 1] * bary[1] + values[t * 3 + 2] * bary[2]
}

/// Output surface frame on triangle `t`; tangents come from the tangent
/// channel when present, else from the texture coordinate gradient
fn surface_frame(g: &GeometryData, t: usize, bary: [f32; 3], level: usize) -> SurfaceFrame {
    let position = g.interpolate_position(t, bary);
    let face = g.face_normal(t);
    let normal = g
        .normals
        .as_ref()
        .and_then(|n| interpolate(n, t, bary).try_normalize(f32::EPSILON))
        .or_else(|| face.try_normalize(f32::EPSILON))
        .unwrap_or_else(Vector3f::z);

    let raw_tangent = match (&g.tangents, g.tex_coords(level)) {
        (Some(tangents), _) => interpolate(tangents, t, bary),
        (None, Some(uv)) => {
            let [a, b, c] = g.triangles[t];
            let e1 = g.coords[b] - g.coords[a];
            let e2 = g.coords[c] - g.coords[a];
            let d1 = uv[t * 3 + 1] - uv[t * 3];
            let d2 = uv[t * 3 + 2] - uv[t * 3];
            let det = d1.x * d2.y - d2.x * d1.y;
            if det.abs() > f32::EPSILON {
                (e1 * d2.y - e2 * d1.y) / det
            } else {
                e1
            }
        }
        (None, None) => Vector3f::x(),
    };
    let tangent = (raw_tangent - normal * normal.dot(&raw_tangent))
        .try_normalize(f32::EPSILON)
        .or_else(|| normal.cross(&Vector3f::x()).try_normalize(f32::EPSILON))
        .unwrap_or_else(Vector3f::y);
    SurfaceFrame {
        position,
        normal,
        tangent,
        bitangent: normal.cross(&tangent),
    }
}

fn layers_at(index: &SourceIndex<'_>, frame: &SurfaceFrame, band: f32, maximum_layers: usize) -> Vec<SourceSample> {
    let mut layers: Vec<SourceSample> = index
        .closest_per_mesh(&frame.position, band)
        .into_iter()
        .map(|hit| SourceSample {
            mesh: hit.mesh,
            triangle: hit.triangle,
            barycentric: hit.barycentric,
            distance: (hit.point - frame.position).dot(&frame.normal),
        })
        .collect();
    layers.sort_by(|a, b| b.distance.total_cmp(&a.distance).then(a.mesh.cmp(&b.mesh)));
    layers.truncate(maximum_layers);
    layers
}

/// Build the mapping image of output material `output_index` for processed
/// geometry `outputs`, matching it against `sources`.
///
/// Both sides must be in the same space. Every non-empty output needs
/// texture coordinates at `settings.tex_coord_level`.
pub fn build_transfer_mapping(
    outputs: &[GeometryData],
    sources: Arc<Vec<SourceMesh>>,
    settings: &MappingImageSettings,
    output_index: usize,
) -> Result<MappingImage> {
    settings.validate()?;
    let output = settings
        .output_material_settings(output_index)
        .ok_or_else(|| Error::InvalidSettings(format!("no output material {}", output_index)))?;
    let level = settings.tex_coord_level;
    let (width, height) = (output.texture_width, output.texture_height);
    let offsets = subsample_offsets(output.multisampling_level);
    let spp = offsets.len();

    let mut frames: Vec<Option<SurfaceFrame>> = vec![None; width * height * spp];
    for g in outputs.iter().filter(|g| !g.is_empty()) {
        let uv = g.tex_coords(level).ok_or_else(|| {
            Error::NotFound(format!("{}: tex coord level {} is needed for mapping", g.name, level))
        })?;
        for t in 0..g.triangle_count() {
            let corners = [0, 1, 2].map(|k| uv_to_pixel(uv[t * 3 + k], width, height));
            rasterize_triangle(corners, width, height, &offsets, |x, y, s, bary| {
                frames[(y * width + x) * spp + s] = Some(surface_frame(g, t, bary, level));
            });
        }
    }

    let index = SourceIndex::new(&sources);
    let band = index.diameter() * LAYER_BAND;
    let maximum_layers = settings.maximum_layers;
    let mut image = MappingImage::new(width, height, output.multisampling_level, Arc::clone(&sources));
    image
        .samples_mut()
        .par_iter_mut()
        .zip(frames.into_par_iter())
        .for_each(|(slot, frame)| {
            *slot = frame.map(|frame| MappingSample {
                layers: layers_at(&index, &frame, band, maximum_layers),
                frame,
            });
        });

    log::debug!(
        "transfer mapping {}x{}: {} covered texels, up to {} layers",
        width,
        height,
        image.covered_texel_count(),
        image.max_layer_count()
    );
    Ok(image)
}
