//! Impostors: a few textured quads standing in for a whole scene
//!
//! Every impostor type boils down to a list of orthographic views. Each view
//! owns a rectangle of the output texture and becomes one quad of the output
//! mesh; the projection mapping image ties the rectangle to the source
//! surfaces seen through it.

use std::sync::Arc;

use lodcrate_core::{
    bounds_of, Error, GeometryData, Point3f, ProgressTracker, Result, Scene, Transform3D, Vector2f, Vector3f,
};
use serde::{Deserialize, Serialize};

use super::{Processor, ProcessorCore};
use crate::mapping::charts::pack_rectangles;
use crate::mapping::{build_projection_mapping, ImpostorView, SourceMesh};

/// How billboard cloud planes treat facing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BillboardMode {
    /// Thin, unordered geometry such as leaves; opposite normals share planes
    #[default]
    Foliage,
    /// Closed shapes seen from outside; planes face outwards
    OuterShell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImpostorType {
    /// One quad facing a fixed view
    FromSingleView {
        view_direction: Vector3f,
        up_vector: Vector3f,
        /// Frame the projected geometry tightly instead of its bounding sphere
        use_tight_fitting: bool,
        /// Move the quad along the view direction, in scene units
        tight_fitting_depth_offset: f32,
        /// Texture border left empty on each side, as a fraction of the texture
        tex_coord_padding: f32,
    },
    /// `number_of_views` views rotated about the up vector, packed as a grid
    /// of frames. The quad shows frame 0.
    Flipbook {
        number_of_views: usize,
        view_direction: Vector3f,
        up_vector: Vector3f,
    },
    /// Planes fitted to clusters of similarly oriented triangles
    BillboardCloud {
        mode: BillboardMode,
        /// 0..1; higher splits a direction into more parallel planes
        billboard_density: f32,
        /// 0..1; fraction of `max_plane_count` spent on distinct directions
        geometric_complexity: f32,
        max_plane_count: usize,
        two_sided: bool,
    },
}

impl Default for ImpostorType {
    fn default() -> Self {
        ImpostorType::FromSingleView {
            view_direction: -Vector3f::z(),
            up_vector: Vector3f::y(),
            use_tight_fitting: false,
            tight_fitting_depth_offset: 0.0,
            tex_coord_padding: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpostorSettings {
    pub impostor_type: ImpostorType,
    pub process_selection_set_name: Option<String>,
}

/// Replaces the scene with an impostor mesh. Materials and textures are
/// carried over so casters can read them.
#[derive(Debug, Default)]
pub struct ImpostorProcessor {
    core: ProcessorCore,
    pub impostor_settings: ImpostorSettings,
}

struct Billboard {
    normal: Vector3f,
    offset: f32,
    area: f32,
    triangles: Vec<(u32, u32)>,
}

struct Facet {
    id: (u32, u32),
    normal: Vector3f,
    offset: f32,
    area: f32,
}

/// Flip `n` into the half space with a positive leading component
fn canonical(n: Vector3f) -> Vector3f {
    let sign = [n.y, n.x, n.z].into_iter().find(|c| c.abs() > 1e-6).unwrap_or(1.0);
    if sign < 0.0 {
        -n
    } else {
        n
    }
}

fn up_for(normal: &Vector3f) -> Vector3f {
    if normal.y.abs() < 0.9 {
        Vector3f::y()
    } else {
        Vector3f::z()
    }
}

/// View of the bounding sphere of `sources`
fn sphere_view(direction: Vector3f, up: Vector3f, sources: &[SourceMesh]) -> ImpostorView {
    let (min, max) = bounds_of(sources.iter().flat_map(|s| s.geometry.coords.iter()));
    let radius = ((max - min).norm() * 0.5).max(f32::EPSILON);
    ImpostorView::new(direction, up, nalgebra::center(&min, &max), Vector2f::repeat(radius))
}

/// Cluster area-weighted facet normals into `k` directions
fn cluster_normals(facets: &[Facet], k: usize) -> Vec<usize> {
    let mut centers: Vec<Vector3f> = Vec::with_capacity(k);
    if let Some(first) = facets.iter().max_by(|a, b| a.area.total_cmp(&b.area)) {
        centers.push(first.normal);
    }
    while centers.len() < k {
        let farthest = facets
            .iter()
            .map(|f| {
                let closest = centers.iter().map(|c| c.dot(&f.normal)).fold(f32::MIN, f32::max);
                ((1.0 - closest) * f.area, f.normal)
            })
            .max_by(|a, b| a.0.total_cmp(&b.0));
        match farthest {
            Some((spread, n)) if spread > 1e-9 => centers.push(n),
            _ => break,
        }
    }

    let assign = |centers: &[Vector3f]| -> Vec<usize> {
        facets
            .iter()
            .map(|f| {
                (0..centers.len())
                    .max_by(|&a, &b| centers[a].dot(&f.normal).total_cmp(&centers[b].dot(&f.normal)).then(b.cmp(&a)))
                    .unwrap_or(0)
            })
            .collect()
    };
    let mut labels = assign(&centers);
    for _ in 0..10 {
        let mut sums = vec![Vector3f::zeros(); centers.len()];
        for (f, &l) in facets.iter().zip(&labels) {
            sums[l] += f.normal * f.area;
        }
        for (c, s) in centers.iter_mut().zip(sums) {
            if let Some(n) = s.try_normalize(f32::EPSILON) {
                *c = n;
            }
        }
        let next = assign(&centers);
        if next == labels {
            break;
        }
        labels = next;
    }
    labels
}

fn billboards(sources: &[SourceMesh], mode: BillboardMode, density: f32, complexity: f32, max_planes: usize) -> Vec<Billboard> {
    let mut facets = Vec::new();
    for (m, source) in sources.iter().enumerate() {
        let g = &source.geometry;
        for t in 0..g.triangle_count() {
            let area = g.triangle_area(t);
            if area <= f32::EPSILON {
                continue;
            }
            let normal = match mode {
                BillboardMode::Foliage => canonical(g.face_normal(t)),
                BillboardMode::OuterShell => g.face_normal(t),
            };
            let centroid = g.interpolate_position(t, [1.0 / 3.0; 3]);
            facets.push(Facet {
                id: (m as u32, t as u32),
                normal,
                offset: centroid.coords.dot(&normal),
                area,
            });
        }
    }
    if facets.is_empty() {
        return Vec::new();
    }
    let (min, max) = bounds_of(sources.iter().flat_map(|s| s.geometry.coords.iter()));
    let diameter = (max - min).norm().max(f32::EPSILON);

    let directions = ((max_planes as f32 * complexity).round() as usize).clamp(1, max_planes.max(1));
    let labels = cluster_normals(&facets, directions.min(facets.len()));

    // split every direction into parallel slabs
    let thickness = diameter * (1.0 - density).clamp(0.05, 1.0) * 0.5;
    let mut slabs: std::collections::BTreeMap<(usize, i64), Vec<usize>> = std::collections::BTreeMap::new();
    let mut lowest = std::collections::HashMap::new();
    for (f, &l) in facets.iter().zip(&labels) {
        let low = lowest.entry(l).or_insert(f32::MAX);
        *low = low.min(f.offset);
    }
    for (i, (f, &l)) in facets.iter().zip(&labels).enumerate() {
        let slab = ((f.offset - lowest[&l]) / thickness).floor() as i64;
        slabs.entry((l, slab)).or_default().push(i);
    }

    let mut planes: Vec<Billboard> = slabs
        .into_values()
        .map(|members| {
            let area: f32 = members.iter().map(|&i| facets[i].area).sum();
            let weighted: Vector3f = members.iter().map(|&i| facets[i].normal * facets[i].area).sum();
            let normal = weighted.try_normalize(f32::EPSILON).unwrap_or(facets[members[0]].normal);
            let offset = members.iter().map(|&i| facets[i].offset * facets[i].area).sum::<f32>() / area;
            Billboard {
                normal,
                offset,
                area,
                triangles: members.iter().map(|&i| facets[i].id).collect(),
            }
        })
        .collect();
    planes.sort_by(|a, b| b.area.total_cmp(&a.area));

    if planes.len() > max_planes {
        let dropped = planes.split_off(max_planes);
        for plane in dropped {
            for id in plane.triangles {
                let Some(f) = facets.iter().find(|f| f.id == id) else { continue };
                let fit = |p: &Billboard| p.normal.dot(&f.normal) - (p.offset - f.offset).abs() / diameter;
                if let Some(target) = planes.iter_mut().max_by(|a, b| fit(a).total_cmp(&fit(b))) {
                    target.triangles.push(id);
                }
            }
        }
    }
    planes
}

impl ImpostorProcessor {
    pub fn new(scene: Scene) -> Self {
        Self {
            core: ProcessorCore::new(scene),
            impostor_settings: ImpostorSettings::default(),
        }
    }

    fn sources(&self) -> Result<Arc<Vec<SourceMesh>>> {
        let scope = self
            .core
            .scene()
            .nodes_in_scope(self.impostor_settings.process_selection_set_name.as_deref())?;
        Ok(self.core.snapshot_sources(&scope))
    }

    /// Width over height of the single view, for sizing its texture
    pub fn single_view_aspect_ratio(&self) -> Result<f32> {
        let ImpostorType::FromSingleView {
            view_direction,
            up_vector,
            use_tight_fitting,
            ..
        } = self.impostor_settings.impostor_type
        else {
            return Err(Error::InvalidSettings("impostor type is not a single view".into()));
        };
        if !use_tight_fitting {
            return Ok(1.0);
        }
        let sources = self.sources()?;
        let view = ImpostorView::framing(
            view_direction,
            up_vector,
            sources.iter().flat_map(|s| s.geometry.coords.iter()),
        )?;
        Ok(view.half_extents.x / view.half_extents.y)
    }

    fn views(&self, sources: &[SourceMesh]) -> Result<Vec<ImpostorView>> {
        let points = || sources.iter().flat_map(|s| s.geometry.coords.iter());
        match &self.impostor_settings.impostor_type {
            ImpostorType::FromSingleView {
                view_direction,
                up_vector,
                use_tight_fitting,
                tight_fitting_depth_offset,
                tex_coord_padding,
            } => {
                let mut view = if *use_tight_fitting {
                    let mut view = ImpostorView::framing(*view_direction, *up_vector, points())?;
                    let (d, _, _) = view.basis()?;
                    view.center += d * *tight_fitting_depth_offset;
                    view
                } else {
                    sphere_view(*view_direction, *up_vector, sources)
                };
                let pad = *tex_coord_padding;
                view = view.with_region(Vector2f::repeat(pad), Vector2f::repeat(1.0 - pad));
                Ok(vec![view])
            }
            ImpostorType::Flipbook {
                number_of_views,
                view_direction,
                up_vector,
            } => {
                let n = *number_of_views;
                let columns = (n as f32).sqrt().ceil() as usize;
                let rows = n.div_ceil(columns);
                Ok((0..n)
                    .map(|i| {
                        let angle = 360.0 * i as f32 / n as f32;
                        let direction = Transform3D::rotation(angle, *up_vector).transform_vector(view_direction);
                        let (column, row) = ((i % columns) as f32, (i / columns) as f32);
                        let (w, h) = (1.0 / columns as f32, 1.0 / rows as f32);
                        sphere_view(direction, *up_vector, sources).with_region(
                            Vector2f::new(column * w, 1.0 - (row + 1.0) * h),
                            Vector2f::new((column + 1.0) * w, 1.0 - row * h),
                        )
                    })
                    .collect())
            }
            ImpostorType::BillboardCloud {
                mode,
                billboard_density,
                geometric_complexity,
                max_plane_count,
                ..
            } => {
                let planes = billboards(sources, *mode, *billboard_density, *geometric_complexity, *max_plane_count);
                let mut views = Vec::with_capacity(planes.len());
                for plane in planes {
                    let points: Vec<Point3f> = plane
                        .triangles
                        .iter()
                        .flat_map(|&(m, t)| {
                            let g = &sources[m as usize].geometry;
                            g.triangles[t as usize].map(|v| g.coords[v])
                        })
                        .collect();
                    let view = ImpostorView::framing(-plane.normal, up_for(&plane.normal), points.iter())?;
                    views.push(view.with_triangles(plane.triangles));
                }
                let output = self
                    .core
                    .mapping_image_settings
                    .output_material_settings(0)
                    .ok_or_else(|| Error::InvalidSettings("no output material settings".into()))?;
                let sizes: Vec<Vector2f> = views.iter().map(|v| v.half_extents * 2.0).collect();
                let (corners, texels_per_unit) = pack_rectangles(&sizes, output)?;
                let texture = Vector2f::new(output.texture_width as f32, output.texture_height as f32);
                Ok(views
                    .into_iter()
                    .zip(sizes.iter().zip(corners))
                    .map(|(view, (size, corner))| {
                        let max = corner + size * texels_per_unit;
                        view.with_region(corner.component_div(&texture), max.component_div(&texture))
                    })
                    .collect())
            }
        }
    }

    fn quad_views<'a>(&self, views: &'a [ImpostorView]) -> &'a [ImpostorView] {
        match self.impostor_settings.impostor_type {
            ImpostorType::Flipbook { .. } => &views[..views.len().min(1)],
            _ => views,
        }
    }

    fn two_sided(&self) -> bool {
        matches!(
            self.impostor_settings.impostor_type,
            ImpostorType::BillboardCloud { two_sided: true, .. }
        )
    }
}

/// One quad per view, facing the viewer, with texture coordinates spanning
/// the view's region
fn impostor_geometry(views: &[ImpostorView], two_sided: bool, level: usize) -> Result<GeometryData> {
    let mut coords = Vec::new();
    let mut triangles = Vec::new();
    let mut uvs = Vec::new();
    let mut normals = Vec::new();
    for view in views {
        let (d, right, up) = view.basis()?;
        let (hx, hy) = (right * view.half_extents.x, up * view.half_extents.y);
        let base = coords.len();
        coords.extend([
            view.center - hx - hy,
            view.center + hx - hy,
            view.center + hx + hy,
            view.center - hx + hy,
        ]);
        let corner_uv = [
            view.region_min,
            Vector2f::new(view.region_max.x, view.region_min.y),
            view.region_max,
            Vector2f::new(view.region_min.x, view.region_max.y),
        ];
        let mut faces = vec![([0, 1, 2], -d), ([0, 2, 3], -d)];
        if two_sided {
            faces.extend([([0, 2, 1], d), ([0, 3, 2], d)]);
        }
        for (face, normal) in faces {
            triangles.push(face.map(|k| base + k));
            uvs.extend(face.map(|k| corner_uv[k]));
            normals.extend([normal; 3]);
        }
    }
    let mut g = GeometryData::from_coords_and_triangles("ImpostorGeometry", coords, triangles);
    g.add_tex_coords(level)?;
    if let Some(channel) = g.tex_coords_mut(level) {
        *channel = uvs;
    }
    g.normals = Some(normals);
    g.validate()?;
    Ok(g)
}

impl Processor for ImpostorProcessor {
    fn processor_name(&self) -> &'static str {
        "ImpostorProcessor"
    }

    fn core(&self) -> &ProcessorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ProcessorCore {
        &mut self.core
    }

    fn validate(&self) -> Result<()> {
        self.core.mapping_image_settings.validate()?;
        match &self.impostor_settings.impostor_type {
            ImpostorType::FromSingleView {
                view_direction,
                up_vector,
                tight_fitting_depth_offset,
                tex_coord_padding,
                ..
            } => {
                ImpostorView::new(*view_direction, *up_vector, Point3f::origin(), Vector2f::repeat(1.0)).basis()?;
                if !(0.0..0.5).contains(tex_coord_padding) {
                    return Err(Error::InvalidSettings(format!(
                        "tex coord padding {} is outside [0, 0.5)",
                        tex_coord_padding
                    )));
                }
                if !tight_fitting_depth_offset.is_finite() {
                    return Err(Error::InvalidSettings("tight fitting depth offset is not finite".into()));
                }
            }
            ImpostorType::Flipbook {
                number_of_views,
                view_direction,
                up_vector,
            } => {
                if *number_of_views == 0 {
                    return Err(Error::InvalidSettings("a flipbook needs at least one view".into()));
                }
                ImpostorView::new(*view_direction, *up_vector, Point3f::origin(), Vector2f::repeat(1.0)).basis()?;
            }
            ImpostorType::BillboardCloud {
                billboard_density,
                geometric_complexity,
                max_plane_count,
                ..
            } => {
                if !(0.0..=1.0).contains(billboard_density) || !(0.0..=1.0).contains(geometric_complexity) {
                    return Err(Error::InvalidSettings(
                        "billboard density and geometric complexity must be within [0, 1]".into(),
                    ));
                }
                if *max_plane_count == 0 {
                    return Err(Error::InvalidSettings("max plane count must be at least 1".into()));
                }
            }
        }
        Ok(())
    }

    fn process(&mut self, progress: &ProgressTracker) -> Result<()> {
        let sources = self.sources()?;
        if sources.is_empty() {
            self.core
                .reporter()
                .warning(self.processor_name(), "process", "no meshes in the processing scope");
            return Ok(());
        }
        let views = self.views(&sources)?;
        if views.is_empty() {
            return Err(Error::Algorithm("no impostor views could be built".into()));
        }
        progress.report(20.0)?;

        let settings = self.core.mapping_image_settings.clone();
        let geometry = impostor_geometry(self.quad_views(&views), self.two_sided(), settings.tex_coord_level)?;
        log::info!(
            "impostor with {} views, {} triangles, from {} source meshes",
            views.len(),
            geometry.triangle_count(),
            sources.len()
        );

        let mut scene = Scene::new();
        scene.materials.copy_from(&self.core.scene().materials);
        scene.textures.copy_from(&self.core.scene().textures);
        let root = scene.root();
        scene.create_child_mesh(root, geometry)?;
        *self.core.scene_mut() = scene;
        progress.report(40.0)?;

        if settings.generate_mapping_image {
            let mut images = Vec::with_capacity(settings.output_material_count());
            for index in 0..settings.output_material_count() {
                images.push(build_projection_mapping(Arc::clone(&sources), &views, &settings, index)?);
                progress.report_step(40.0, 99.0, (index + 1) as f32 / settings.output_material_count() as f32)?;
            }
            self.core.set_mapping_images(images);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::mapping::OutputMaterialSettings;
    use approx::assert_relative_eq;
    use lodcrate_core::Material;

    fn processor(scene: Scene, impostor_type: ImpostorType) -> ImpostorProcessor {
        let mut processor = ImpostorProcessor::new(scene);
        processor.impostor_settings.impostor_type = impostor_type;
        let settings = processor.mapping_image_settings_mut();
        settings.generate_mapping_image = true;
        settings.output_materials = vec![OutputMaterialSettings::default()
            .with_texture_size(64, 64)
            .with_multisampling_level(1)];
        processor
    }

    fn single_view(tight: bool) -> ImpostorType {
        ImpostorType::FromSingleView {
            view_direction: -Vector3f::z(),
            up_vector: Vector3f::y(),
            use_tight_fitting: tight,
            tight_fitting_depth_offset: 0.0,
            tex_coord_padding: 0.0,
        }
    }

    #[test]
    fn test_single_view_quad_faces_viewer() {
        let mut scene = scene_with(vec![grid("panel", 4, 0.0)]);
        scene.materials.add_material(Material::new("panel"));
        let mut processor = processor(scene, single_view(true));
        assert_relative_eq!(processor.single_view_aspect_ratio().unwrap(), 1.0);
        processor.run_processing().unwrap();

        let scene = processor.processed_scene();
        assert_eq!(scene.materials.len(), 1);
        let g = scene.geometry(scene.mesh_nodes()[0]).unwrap();
        assert_eq!(g.triangle_count(), 2);
        assert_relative_eq!(g.face_normal(0), Vector3f::z(), epsilon = 1e-5);
        assert_eq!(processor.mapping_image().unwrap().covered_texel_count(), 64 * 64);
    }

    #[test]
    fn test_loose_fit_covers_less() {
        let mut processor = processor(scene_with(vec![grid("panel", 4, 0.0)]), single_view(false));
        processor.run_processing().unwrap();
        let covered = processor.mapping_image().unwrap().covered_texel_count();
        assert!(covered < 64 * 64 * 3 / 4, "covered {}", covered);
        assert!(covered > 64 * 64 / 4, "covered {}", covered);
    }

    #[test]
    fn test_flipbook_quad_uses_first_frame() {
        let flipbook = ImpostorType::Flipbook {
            number_of_views: 4,
            view_direction: -Vector3f::z(),
            up_vector: Vector3f::y(),
        };
        let mut processor = processor(scene_with(vec![grid("panel", 2, 0.0)]), flipbook);
        processor.run_processing().unwrap();

        let scene = processor.processed_scene();
        let g = scene.geometry(scene.mesh_nodes()[0]).unwrap();
        assert_eq!(g.triangle_count(), 2);
        let uv = g.tex_coords(0).unwrap();
        assert!(uv.iter().all(|t| t.x <= 0.5 + 1e-6 && t.y >= 0.5 - 1e-6));
        // frames 0 and 2 see the panel face-on; 1 and 3 edge-on
        let image = processor.mapping_image().unwrap();
        assert!(image.is_covered(16, 16));
        assert!(image.is_covered(16, 48));
    }

    #[test]
    fn test_billboard_cloud_planes() {
        let mut scene = scene_with(vec![grid("floor", 4, 0.0), grid("wall", 4, 0.0)]);
        let wall = scene.mesh_nodes()[1];
        if let Some(node) = scene.node_mut(wall) {
            node.relative_transform = Transform3D::translation(Vector3f::new(3.0, 0.0, 0.0))
                * Transform3D::rotation(90.0, Vector3f::y());
        }
        let cloud = ImpostorType::BillboardCloud {
            mode: BillboardMode::OuterShell,
            billboard_density: 0.0,
            geometric_complexity: 1.0,
            max_plane_count: 2,
            two_sided: true,
        };
        let mut processor = processor(scene, cloud);
        processor.run_processing().unwrap();

        let scene = processor.processed_scene();
        let g = scene.geometry(scene.mesh_nodes()[0]).unwrap();
        assert_eq!(g.triangle_count(), 8);
        let uv = g.tex_coords(0).unwrap();
        assert!(uv.iter().all(|t| (0.0..=1.0).contains(&t.x) && (0.0..=1.0).contains(&t.y)));
        let image = processor.mapping_image().unwrap();
        assert!(image.covered_texel_count() > 0);
        assert_eq!(image.sources().len(), 2);
    }

    #[test]
    fn test_foliage_merges_opposite_normals() {
        let n = Vector3f::new(0.0, -1.0, 0.0);
        assert_eq!(canonical(n), Vector3f::y());
        assert_eq!(canonical(Vector3f::x()), Vector3f::x());
        assert_eq!(canonical(-Vector3f::z()), Vector3f::z());
    }

    #[test]
    fn test_invalid_settings() {
        let parallel = ImpostorType::FromSingleView {
            view_direction: Vector3f::y(),
            up_vector: Vector3f::y(),
            use_tight_fitting: false,
            tight_fitting_depth_offset: 0.0,
            tex_coord_padding: 0.0,
        };
        let mut p = processor(scene_with(vec![grid("panel", 2, 0.0)]), parallel);
        assert!(matches!(p.run_processing(), Err(Error::InvalidSettings(_))));

        let empty = ImpostorType::Flipbook {
            number_of_views: 0,
            view_direction: -Vector3f::z(),
            up_vector: Vector3f::y(),
        };
        let mut p = processor(scene_with(vec![grid("panel", 2, 0.0)]), empty);
        assert!(p.run_processing().is_err());
        assert!(p.single_view_aspect_ratio().is_err());
    }
}
