//! Per-corner normal and tangent calculation

use lodcrate_core::{Error, GeometryData, Result, Vector3f};
use serde::{Deserialize, Serialize};

/// Faces closer than this cosine count as one flat surface when snapping
const FLAT_SURFACE_COS: f32 = 0.9998;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalCalculationSettings {
    /// Recompute every normal; otherwise only missing or invalid normals are touched
    pub replace_normals: bool,
    pub replace_tangents: bool,
    /// Edges with a dihedral angle above this (degrees) are hard
    pub hard_edge_angle: f32,
    pub scale_by_area: bool,
    pub scale_by_angle: bool,
    pub repair_invalid_normals: bool,
    pub snap_normals_to_flat_surfaces: bool,
}

impl Default for NormalCalculationSettings {
    fn default() -> Self {
        Self {
            replace_normals: true,
            replace_tangents: false,
            hard_edge_angle: 80.0,
            scale_by_area: true,
            scale_by_angle: true,
            repair_invalid_normals: true,
            snap_normals_to_flat_surfaces: false,
        }
    }
}

impl NormalCalculationSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hard_edge_angle(mut self, degrees: f32) -> Self {
        self.hard_edge_angle = degrees;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=180.0).contains(&self.hard_edge_angle) {
            return Err(Error::InvalidSettings(format!(
                "hard edge angle {} is outside 0..=180 degrees",
                self.hard_edge_angle
            )));
        }
        Ok(())
    }
}

fn is_valid_normal(n: &Vector3f) -> bool {
    n.iter().all(|c| c.is_finite()) && (n.norm() - 1.0).abs() < 0.1
}

/// Smoothed normals for every corner. A corner averages the faces around
/// its vertex whose normal is within the hard edge angle of its own face.
fn smoothed_normals(geometry: &GeometryData, settings: &NormalCalculationSettings) -> Vec<Vector3f> {
    let face_normals = geometry.face_normals();
    let cos_hard = settings.hard_edge_angle.to_radians().cos();

    let mut corners_of_vertex: Vec<Vec<usize>> = vec![Vec::new(); geometry.vertex_count()];
    let mut weights = vec![1.0f32; geometry.corner_count()];
    for (t, tri) in geometry.triangles.iter().enumerate() {
        let area = geometry.triangle_area(t);
        for k in 0..3 {
            let corner = t * 3 + k;
            corners_of_vertex[tri[k]].push(corner);
            if settings.scale_by_area {
                weights[corner] *= area;
            }
            if settings.scale_by_angle {
                let p = geometry.coords[tri[k]];
                let e1 = geometry.coords[tri[(k + 1) % 3]] - p;
                let e2 = geometry.coords[tri[(k + 2) % 3]] - p;
                weights[corner] *= e1.angle(&e2);
            }
        }
    }

    let mut normals = vec![Vector3f::z(); geometry.corner_count()];
    for corners in &corners_of_vertex {
        for &corner in corners {
            let own = face_normals[corner / 3];
            let mut sum = Vector3f::zeros();
            let mut flat = true;
            for &other in corners {
                let n = face_normals[other / 3];
                let cos = own.dot(&n);
                if cos >= cos_hard {
                    sum += n * weights[other];
                    flat &= cos >= FLAT_SURFACE_COS;
                }
            }
            normals[corner] = if settings.snap_normals_to_flat_surfaces && flat {
                own
            } else {
                sum.try_normalize(f32::EPSILON).unwrap_or(own)
            };
            if normals[corner] == Vector3f::zeros() {
                normals[corner] = Vector3f::z();
            }
        }
    }
    normals
}

/// Compute per-corner normals for `geometry`
pub fn calculate_normals(geometry: &mut GeometryData, settings: &NormalCalculationSettings) -> Result<()> {
    settings.validate()?;
    let computed = smoothed_normals(geometry, settings);
    if settings.replace_normals || geometry.normals.is_none() {
        geometry.normals = Some(computed);
    } else if settings.repair_invalid_normals {
        let mut repaired = 0;
        if let Some(existing) = &mut geometry.normals {
            for (n, fresh) in existing.iter_mut().zip(&computed) {
                if !is_valid_normal(n) {
                    *n = *fresh;
                    repaired += 1;
                }
            }
        }
        if repaired > 0 {
            log::debug!("{}: repaired {} invalid normals", geometry.name, repaired);
        }
    }
    if settings.replace_tangents && geometry.has_tex_coords(0) {
        calculate_tangents(geometry, 0)?;
    }
    Ok(())
}

/// Compute per-corner tangents from texture coordinate `level`, orthogonal
/// to the corner normals
pub fn calculate_tangents(geometry: &mut GeometryData, level: usize) -> Result<()> {
    let uv = geometry
        .tex_coords(level)
        .ok_or_else(|| Error::NotFound(format!("{}: tex coord level {}", geometry.name, level)))?;
    let normals = match &geometry.normals {
        Some(n) => n.clone(),
        None => smoothed_normals(geometry, &NormalCalculationSettings::default()),
    };

    let mut tangents = Vec::with_capacity(geometry.corner_count());
    for (t, tri) in geometry.triangles.iter().enumerate() {
        let base = t * 3;
        let e1 = geometry.coords[tri[1]] - geometry.coords[tri[0]];
        let e2 = geometry.coords[tri[2]] - geometry.coords[tri[0]];
        let d1 = uv[base + 1] - uv[base];
        let d2 = uv[base + 2] - uv[base];
        let det = d1.x * d2.y - d2.x * d1.y;
        let face_tangent = if det.abs() > f32::EPSILON {
            (e1 * d2.y - e2 * d1.y) / det
        } else {
            e1
        };
        for k in 0..3 {
            let n = normals[base + k];
            // Gram-Schmidt against the corner normal
            let tangent = (face_tangent - n * n.dot(&face_tangent))
                .try_normalize(f32::EPSILON)
                .unwrap_or_else(|| n.cross(&Vector3f::x()).try_normalize(f32::EPSILON).unwrap_or(Vector3f::y()));
            tangents.push(tangent);
        }
    }
    geometry.tangents = Some(tangents);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lodcrate_core::Point3f;

    /// Unit cube corner: three faces meeting at right angles
    fn cube_corner() -> GeometryData {
        GeometryData::from_coords_and_triangles(
            "corner",
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
                Point3f::new(0.0, 0.0, 1.0),
            ],
            vec![[0, 2, 1], [0, 1, 3], [0, 3, 2]],
        )
    }

    fn flat_pair() -> GeometryData {
        GeometryData::from_coords_and_triangles(
            "flat",
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(1.0, 1.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        )
    }

    #[test]
    fn test_hard_edges_keep_face_normals() {
        let mut g = cube_corner();
        calculate_normals(&mut g, &NormalCalculationSettings::default().with_hard_edge_angle(60.0)).unwrap();
        let normals = g.normals.as_ref().unwrap();
        for t in 0..3 {
            for k in 0..3 {
                assert_relative_eq!(normals[t * 3 + k], g.face_normal(t), epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_soft_edges_average() {
        let mut g = cube_corner();
        let settings = NormalCalculationSettings {
            hard_edge_angle: 120.0,
            scale_by_area: false,
            scale_by_angle: false,
            ..NormalCalculationSettings::default()
        };
        calculate_normals(&mut g, &settings).unwrap();
        let n = g.normals.as_ref().unwrap()[0];
        let expected = -Vector3f::new(1.0, 1.0, 1.0).normalize();
        assert_relative_eq!(n, expected, epsilon = 1e-5);
    }

    #[test]
    fn test_invalid_normals_are_repaired_only() {
        let mut g = flat_pair();
        g.add_normals();
        let normals = g.normals.as_mut().unwrap();
        normals[0] = Vector3f::new(0.0, 1.0, 0.0);
        normals[4] = Vector3f::new(f32::NAN, 0.0, 0.0);
        let settings = NormalCalculationSettings {
            replace_normals: false,
            ..NormalCalculationSettings::default()
        };
        calculate_normals(&mut g, &settings).unwrap();
        let normals = g.normals.as_ref().unwrap();
        assert_eq!(normals[0], Vector3f::new(0.0, 1.0, 0.0));
        assert_relative_eq!(normals[4], Vector3f::z(), epsilon = 1e-5);
    }

    #[test]
    fn test_bad_angle_is_rejected() {
        let mut g = flat_pair();
        let settings = NormalCalculationSettings::default().with_hard_edge_angle(200.0);
        assert!(calculate_normals(&mut g, &settings).is_err());
    }

    #[test]
    fn test_tangents_follow_u_direction() {
        let mut g = flat_pair();
        let uv: Vec<f32> = g
            .triangles
            .iter()
            .flatten()
            .flat_map(|&v| [g.coords[v].x, g.coords[v].y])
            .collect();
        g.set_tex_coords(0, &uv).unwrap();
        let settings = NormalCalculationSettings {
            replace_tangents: true,
            ..NormalCalculationSettings::default()
        };
        calculate_normals(&mut g, &settings).unwrap();
        for t in g.tangents.as_ref().unwrap() {
            assert_relative_eq!(*t, Vector3f::x(), epsilon = 1e-5);
        }
        assert!(calculate_tangents(&mut g, 3).is_err());
    }
}
