//! Which parts of a scene can be seen, computed by ray casting on the CPU
//!
//! Viewpoints come from the camera selection set: camera nodes look along
//! their view direction, and every vertex of a mesh in the set is a camera
//! looking at the scene. Without a camera set, views are spread over a
//! sphere around the scene. A triangle's visibility is the fraction of its
//! sample points that some viewpoint reaches without crossing other geometry.

use std::collections::HashSet;

use lodcrate_core::{bounds_of, Error, GeometryData, NodeId, NodeKind, Point3f, Result, Scene, Vector3f};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::raycast::{Ray, RayIndex};

/// Lowest weight handed to the reducer, so hidden triangles still cost something
const MIN_WEIGHT: f32 = 0.01;

/// Sight ray origins are moved off the surface by this much of the scene diameter
const SURFACE_OFFSET: f32 = 1e-4;

/// Barycentric sample points of a triangle
const SAMPLES: [[f32; 3]; 4] = [
    [1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0],
    [2.0 / 3.0, 1.0 / 6.0, 1.0 / 6.0],
    [1.0 / 6.0, 2.0 / 3.0, 1.0 / 6.0],
    [1.0 / 6.0, 1.0 / 6.0, 2.0 / 3.0],
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilitySettings {
    /// Scale collapse costs by how visible each triangle is
    pub use_visibility_weights_in_reducer: bool,
    pub visibility_weights_power: f32,
    /// Remove triangles no viewpoint sees
    pub cull_occluded_geometry: bool,
    /// A triangle facing away from a viewpoint is not seen from it
    pub use_backface_culling: bool,
    /// Camera nodes and camera meshes defining the viewpoints
    pub camera_selection_set_name: Option<String>,
    /// Meshes that block sight but are not processed
    pub occluder_selection_set_name: Option<String>,
    /// Views on the surrounding sphere when no camera set is named
    pub default_view_count: usize,
}

impl Default for VisibilitySettings {
    fn default() -> Self {
        Self {
            use_visibility_weights_in_reducer: false,
            visibility_weights_power: 1.0,
            cull_occluded_geometry: false,
            use_backface_culling: true,
            camera_selection_set_name: None,
            occluder_selection_set_name: None,
            default_view_count: 64,
        }
    }
}

impl VisibilitySettings {
    pub fn is_enabled(&self) -> bool {
        self.use_visibility_weights_in_reducer || self.cull_occluded_geometry
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.visibility_weights_power > 0.0) {
            return Err(Error::InvalidSettings(format!(
                "visibility weights power must be positive, got {}",
                self.visibility_weights_power
            )));
        }
        if self.is_enabled() && self.camera_selection_set_name.is_none() && self.default_view_count == 0 {
            return Err(Error::InvalidSettings(
                "visibility needs a camera selection set or default views".into(),
            ));
        }
        Ok(())
    }
}

/// Where sight rays end
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Viewpoint {
    /// A point camera. With a cone it only sees within the half angle (given
    /// as its cosine) around the view direction.
    Point {
        position: Point3f,
        cone: Option<(Vector3f, f32)>,
    },
    /// Parallel rays travelling along `direction`
    Directional { direction: Vector3f },
}

impl Viewpoint {
    /// Whether a surface point at `p` with face normal `normal` is seen,
    /// ignoring occlusion. Returns the sight ray target.
    fn target(&self, p: &Point3f, normal: &Vector3f, backface_culling: bool, reach: f32) -> Option<Point3f> {
        let target = match *self {
            Viewpoint::Point { position, cone } => {
                if let Some((axis, min_cos)) = cone {
                    let from_camera = p - position;
                    let length = from_camera.norm();
                    if length > 0.0 && from_camera.dot(&axis) / length < min_cos {
                        return None;
                    }
                }
                position
            }
            Viewpoint::Directional { direction } => p - direction * reach,
        };
        if backface_culling && (target - p).dot(normal) <= 0.0 {
            return None;
        }
        Some(target)
    }
}

/// `count` views evenly spread over a sphere
pub fn sphere_viewpoints(center: Point3f, radius: f32, count: usize) -> Vec<Viewpoint> {
    let golden = std::f32::consts::PI * (3.0 - 5.0f32.sqrt());
    (0..count)
        .map(|i| {
            let y = 1.0 - 2.0 * (i as f32 + 0.5) / count as f32;
            let r = (1.0 - y * y).max(0.0).sqrt();
            let phi = golden * i as f32;
            Viewpoint::Point {
                position: center + Vector3f::new(r * phi.cos(), y, r * phi.sin()) * radius,
                cone: None,
            }
        })
        .collect()
}

/// Weights for the reducer: `visibility^power`, never below a small floor
pub fn visibility_weights(visibility: &[f32], power: f32) -> Vec<f32> {
    visibility.iter().map(|v| v.max(MIN_WEIGHT).powf(power)).collect()
}

/// Per-triangle visibility of every mesh in `targets`. All geometry is in
/// scene space; `occluders` block sight without being measured.
pub fn compute_visibility(
    targets: &[GeometryData],
    occluders: &[GeometryData],
    viewpoints: &[Viewpoint],
    backface_culling: bool,
) -> Vec<Vec<f32>> {
    let index = RayIndex::new(targets.iter().chain(occluders));
    let reach = 2.0 * index.diameter();
    let offset = SURFACE_OFFSET * index.diameter();
    targets
        .iter()
        .enumerate()
        .map(|(m, g)| {
            (0..g.triangle_count())
                .into_par_iter()
                .map(|t| {
                    let normal = g.face_normal(t);
                    if normal == Vector3f::zeros() {
                        return 0.0;
                    }
                    let seen = SAMPLES
                        .iter()
                        .filter(|&&bary| {
                            let p = g.interpolate_position(t, bary);
                            viewpoints.iter().any(|view| {
                                let Some(target) = view.target(&p, &normal, backface_culling, reach) else {
                                    return false;
                                };
                                let to_target = target - p;
                                if to_target.norm() <= offset {
                                    return true;
                                }
                                let origin = p + to_target.normalize() * offset;
                                !index.is_blocked(&Ray::between(origin, target), Some((m as u32, t as u32)))
                            })
                        })
                        .count();
                    seen as f32 / SAMPLES.len() as f32
                })
                .collect()
        })
        .collect()
}

/// Viewpoints and helper meshes a scene's visibility settings refer to
#[derive(Debug, Clone, Default)]
pub struct VisibilityContext {
    pub viewpoints: Vec<Viewpoint>,
    /// Mesh nodes in the camera set; they only carry viewpoints
    pub camera_meshes: Vec<NodeId>,
    /// Mesh nodes in the occluder set
    pub occluders: Vec<NodeId>,
    backface_culling: bool,
}

impl VisibilityContext {
    pub fn from_scene(scene: &Scene, settings: &VisibilitySettings) -> Result<Self> {
        let mut context = Self {
            backface_culling: settings.use_backface_culling,
            ..Self::default()
        };
        if let Some(name) = settings.occluder_selection_set_name.as_deref() {
            context.occluders = scene.nodes_in_scope(Some(name))?;
        }
        match settings.camera_selection_set_name.as_deref() {
            Some(name) => {
                context.collect_cameras(scene, name)?;
                if context.viewpoints.is_empty() {
                    return Err(Error::InvalidData(format!(
                        "camera selection set '{}' holds no cameras or camera meshes",
                        name
                    )));
                }
            }
            None => {
                let points: Vec<Point3f> = scene
                    .mesh_nodes()
                    .into_iter()
                    .filter_map(|id| scene.world_geometry(id))
                    .flat_map(|g| g.coords)
                    .collect();
                let (min, max) = bounds_of(points.iter());
                let center = Point3f::from((min.coords + max.coords) * 0.5);
                let radius = (max - min).norm().max(f32::EPSILON);
                context.viewpoints = sphere_viewpoints(center, radius, settings.default_view_count);
            }
        }
        log::debug!(
            "visibility from {} viewpoints, {} camera meshes, {} occluders",
            context.viewpoints.len(),
            context.camera_meshes.len(),
            context.occluders.len()
        );
        Ok(context)
    }

    fn collect_cameras(&mut self, scene: &Scene, set_name: &str) -> Result<()> {
        let set = scene
            .selection_sets
            .find(set_name)
            .ok_or_else(|| Error::NotFound(format!("selection set '{}'", set_name)))?;
        for id in scene.descendants(scene.root()) {
            if !scene.ancestors(id).any(|a| set.contains(a)) {
                continue;
            }
            let Some(node) = scene.node(id) else {
                continue;
            };
            let transform = scene.global_transform(id);
            match &node.kind {
                NodeKind::Camera(view) => {
                    let direction = transform.transform_vector(&view.direction).normalize();
                    if view.orthographic {
                        self.viewpoints.push(Viewpoint::Directional { direction });
                    } else {
                        let half_angle = (view.field_of_view * 0.5).to_radians();
                        self.viewpoints.push(Viewpoint::Point {
                            position: transform.transform_point(&Point3f::origin()),
                            cone: Some((direction, half_angle.cos())),
                        });
                    }
                }
                NodeKind::Mesh(g) => {
                    self.viewpoints.extend(g.coords.iter().map(|p| Viewpoint::Point {
                        position: transform.transform_point(p),
                        cone: None,
                    }));
                    self.camera_meshes.push(id);
                }
                NodeKind::Transform => {}
            }
        }
        Ok(())
    }

    /// Whether `id` is a helper mesh rather than something to process
    pub fn excludes(&self, id: NodeId) -> bool {
        self.camera_meshes.contains(&id) || self.occluders.contains(&id)
    }

    /// Per-triangle visibility of `targets`, each geometry placed by the
    /// global transform of its node in `scene`
    pub fn compute(&self, scene: &Scene, targets: &[(NodeId, GeometryData)]) -> Vec<Vec<f32>> {
        let target_set: HashSet<NodeId> = targets.iter().map(|(id, _)| *id).collect();
        let world: Vec<GeometryData> = targets
            .iter()
            .map(|(id, g)| {
                let mut g = g.clone();
                g.transform(&scene.global_transform(*id));
                g
            })
            .collect();
        let occluders: Vec<GeometryData> = self
            .occluders
            .iter()
            .filter(|id| !target_set.contains(id))
            .filter_map(|&id| scene.world_geometry(id))
            .collect();
        compute_visibility(&world, &occluders, &self.viewpoints, self.backface_culling)
    }
}
