//! Wavefront OBJ scene support
//!
//! Every `o` or `g` block becomes one mesh node under the scene root.
//! Polygons are fan-triangulated; four-sided faces keep their quad
//! pairing through quad flags so a round trip writes them back as quads.
//! Texture coordinates and normals become per-corner channels.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use lodcrate_core::{
    Color, GeometryData, Material, Point3f, QuadFlag, Reporter, Result, Scene, Vector2f,
    Vector3f,
};

use crate::error::IoError;
use crate::mtl::{to_material, write_mtl};
use crate::texture::{save_image, PixelFormat};
use crate::{SceneReader, SceneWriter};

/// Polygons stay polygons so quads can be recognised; points and lines
/// are dropped
fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        single_index: false,
        triangulate: false,
        ignore_points: true,
        ignore_lines: true,
        ..Default::default()
    }
}

/// Models and materials of an OBJ file before they become a scene
#[derive(Debug, Default)]
pub struct ObjDocument {
    models: Vec<tobj::Model>,
    materials: Vec<tobj::Material>,
}

/// Per-triangle data gathered while building one geometry
#[derive(Default)]
struct Triangles {
    vertices: Vec<[usize; 3]>,
    uvs: Vec<Option<Vector2f>>,
    normals: Vec<Option<Vector3f>>,
    materials: Vec<usize>,
    quad_flags: Vec<QuadFlag>,
}

fn out_of_range(what: &str, name: &str) -> IoError {
    IoError::InvalidFormat {
        format: format!("OBJ object '{}' has a {} index out of range", name, what),
    }
}

impl ObjDocument {
    /// Parse OBJ text. `mtllib` lines are read with `material_loader`; a
    /// library that cannot be read is reported as a warning.
    pub fn parse<R, F>(reader: &mut R, material_loader: F, reporter: &Reporter) -> Result<Self>
    where
        R: BufRead,
        F: Fn(&Path) -> tobj::MTLLoadResult,
    {
        let (models, materials) = tobj::load_obj_buf(reader, &load_options(), material_loader).map_err(IoError::from)?;
        let materials = materials.unwrap_or_else(|e| {
            reporter.warning(
                "SceneImporter",
                "run",
                format!("material library could not be read: {}", e),
            );
            Vec::new()
        });
        Ok(Self { models, materials })
    }

    /// Consecutive models with the same name are one object that changes
    /// material part way through
    fn objects(&self) -> Vec<(&str, Vec<&tobj::Mesh>)> {
        let mut objects: Vec<(&str, Vec<&tobj::Mesh>)> = Vec::new();
        for model in &self.models {
            match objects.last_mut() {
                Some((name, meshes)) if *name == model.name => meshes.push(&model.mesh),
                _ => objects.push((model.name.as_str(), vec![&model.mesh])),
            }
        }
        objects
    }

    pub fn object_count(&self) -> usize {
        self.objects().len()
    }

    /// Vertices of later parts that sit exactly on a vertex of an earlier
    /// part are joined with it, so material changes do not open the surface
    fn build_geometry(name: &str, meshes: &[&tobj::Mesh], default_material: Option<usize>) -> Result<GeometryData> {
        let name = if name.is_empty() { "default" } else { name };
        let mut coords: Vec<Point3f> = Vec::new();
        let mut vertex_colors: Vec<Option<Color>> = Vec::new();
        let mut earlier: HashMap<[u32; 3], usize> = HashMap::new();
        let mut tris = Triangles::default();

        for mesh in meshes {
            let mut local = Vec::with_capacity(mesh.positions.len() / 3);
            for (v, p) in mesh.positions.chunks_exact(3).enumerate() {
                let key = [p[0].to_bits(), p[1].to_bits(), p[2].to_bits()];
                if let Some(&joined) = earlier.get(&key) {
                    local.push(joined);
                    continue;
                }
                coords.push(Point3f::new(p[0], p[1], p[2]));
                vertex_colors.push(
                    mesh.vertex_color
                        .get(3 * v..3 * v + 3)
                        .map(|c| Color::new(c[0], c[1], c[2], 1.0)),
                );
                local.push(coords.len() - 1);
            }
            for (p, &v) in mesh.positions.chunks_exact(3).zip(&local) {
                earlier.entry([p[0].to_bits(), p[1].to_bits(), p[2].to_bits()]).or_insert(v);
            }

            let arities: Vec<usize> = if mesh.face_arities.is_empty() {
                vec![3; mesh.indices.len() / 3]
            } else {
                mesh.face_arities.iter().map(|&n| n as usize).collect()
            };
            let material = mesh.material_id.or(default_material).unwrap_or(0);
            let mut start = 0;
            for n in arities {
                if n >= 3 {
                    for k in 1..n - 1 {
                        let fan = [start, start + k, start + k + 1];
                        let mut triangle = [0; 3];
                        for (slot, &c) in triangle.iter_mut().zip(&fan) {
                            let index = *mesh.indices.get(c).ok_or_else(|| out_of_range("face", name))? as usize;
                            *slot = *local.get(index).ok_or_else(|| out_of_range("vertex", name))?;
                            tris.uvs.push(match mesh.texcoord_indices.get(c) {
                                Some(&i) => {
                                    let i = i as usize;
                                    let t = mesh
                                        .texcoords
                                        .get(2 * i..2 * i + 2)
                                        .ok_or_else(|| out_of_range("texture coordinate", name))?;
                                    Some(Vector2f::new(t[0], t[1]))
                                }
                                None => None,
                            });
                            tris.normals.push(match mesh.normal_indices.get(c) {
                                Some(&i) => {
                                    let i = i as usize;
                                    let n = mesh
                                        .normals
                                        .get(3 * i..3 * i + 3)
                                        .ok_or_else(|| out_of_range("normal", name))?;
                                    Some(Vector3f::new(n[0], n[1], n[2]))
                                }
                                None => None,
                            });
                        }
                        tris.vertices.push(triangle);
                        tris.materials.push(material);
                        tris.quad_flags.push(match (n, k) {
                            (4, 1) => QuadFlag::FirstOfQuad,
                            (4, 2) => QuadFlag::SecondOfQuad,
                            _ => QuadFlag::Triangle,
                        });
                    }
                }
                start += n;
            }
        }

        let mut geometry = GeometryData::from_coords_and_triangles(name, coords, tris.vertices);
        if tris.uvs.iter().any(Option::is_some) {
            geometry.add_tex_coords(0)?;
            if let Some(channel) = geometry.tex_coords_mut(0) {
                for (dst, uv) in channel.iter_mut().zip(&tris.uvs) {
                    *dst = uv.unwrap_or_else(Vector2f::zeros);
                }
            }
        }
        if tris.normals.iter().any(Option::is_some) {
            geometry.normals = Some(tris.normals.iter().map(|n| n.unwrap_or_else(Vector3f::z)).collect());
        }
        if vertex_colors.iter().any(Option::is_some) {
            let per_corner: Vec<Color> = geometry
                .triangles
                .iter()
                .flatten()
                .map(|&v| vertex_colors[v].unwrap_or_else(lodcrate_core::white))
                .collect();
            geometry.colors = vec![Some(per_corner)];
        }
        if default_material.is_some() {
            geometry.material_ids = Some(tris.materials);
        }
        if tris.quad_flags.iter().any(|f| *f != QuadFlag::Triangle) {
            geometry.quad_flags = Some(tris.quad_flags);
        }
        geometry.validate()?;
        Ok(geometry)
    }

    /// Build a scene; textures named by the materials are resolved
    /// relative to `base_dir`
    pub fn into_scene(self, base_dir: &Path, reporter: &Reporter) -> Result<Scene> {
        let mut scene = Scene::new();
        for source in &self.materials {
            let material = to_material(source, base_dir, &mut scene.textures, reporter);
            scene.materials.add_material(material);
        }

        let unassigned = self.models.iter().any(|m| m.mesh.material_id.is_none());
        let default_material = match (self.materials.is_empty(), unassigned) {
            (true, _) => None,
            (false, false) => Some(0),
            (false, true) => {
                let mut m = Material::new("default");
                m.add_material_channel(lodcrate_core::channels::DIFFUSE);
                scene.materials.add_material(m);
                Some(scene.materials.len() - 1)
            }
        };

        for (name, meshes) in self.objects() {
            let geometry = Self::build_geometry(name, &meshes, default_material)?;
            scene.create_child_mesh(scene.root(), geometry)?;
        }
        Ok(scene)
    }
}

pub struct ObjReader;
pub struct ObjWriter;

impl SceneReader for ObjReader {
    fn read_scene<P: AsRef<Path>>(path: P, reporter: &Reporter) -> Result<Scene> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(IoError::FileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        let mut reader = BufReader::new(File::open(path)?);
        let doc = ObjDocument::parse(&mut reader, |lib| tobj::load_mtl(base_dir.join(lib)), reporter)?;
        let scene = doc.into_scene(base_dir, reporter)?;
        log::info!(
            "imported {} with {} meshes, {} triangles, {} materials",
            path.display(),
            scene.mesh_nodes().len(),
            scene.triangle_count(),
            scene.materials.len()
        );
        Ok(scene)
    }
}

/// Corner list for a quad pair, or `None` if the two triangles do not share an edge
fn quad_corners(g: &GeometryData, a: usize, b: usize) -> Option<[(usize, usize); 4]> {
    let ta = g.triangles[a];
    let tb = g.triangles[b];
    let extra = (0..3).find(|&k| !ta.contains(&tb[k]))?;
    let shared = (0..3).filter(|&k| tb.contains(&ta[k])).count();
    if shared != 2 {
        return None;
    }
    // the shared edge runs from ta[i] to ta[i + 1]; the extra corner goes between them
    let i = (0..3).find(|&i| tb.contains(&ta[i]) && tb.contains(&ta[(i + 1) % 3]))?;
    let mut out = [(a, 0); 4];
    let mut n = 0;
    for k in 0..3 {
        out[n] = (a, k);
        n += 1;
        if k == i {
            out[n] = (b, extra);
            n += 1;
        }
    }
    Some(out)
}

fn fmt_err(e: std::fmt::Error) -> IoError {
    IoError::WriteError {
        message: e.to_string(),
    }
}

/// Serialize all meshes of `scene` in scene space
pub fn write_obj(scene: &Scene, mtl_name: Option<&str>) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "# lodcrate OBJ export").map_err(fmt_err)?;
    if let Some(mtl) = mtl_name {
        writeln!(out, "mtllib {}", mtl).map_err(fmt_err)?;
    }
    let (mut v_offset, mut vt_offset, mut vn_offset) = (1usize, 1usize, 1usize);

    for id in scene.mesh_nodes() {
        let Some(g) = scene.world_geometry(id) else {
            continue;
        };
        let name = scene.node(id).map(|n| n.name.clone()).unwrap_or_default();
        writeln!(out, "o {}", name).map_err(fmt_err)?;

        let colors = g.colors(0);
        let mut vertex_color: Vec<Option<Color>> = vec![None; g.vertex_count()];
        if let Some(colors) = colors {
            for (corner, &v) in g.triangles.iter().flatten().enumerate() {
                vertex_color[v].get_or_insert(colors[corner]);
            }
        }
        for (p, c) in g.coords.iter().zip(&vertex_color) {
            let written = match c {
                Some(c) => writeln!(out, "v {} {} {} {} {} {}", p.x, p.y, p.z, c.x, c.y, c.z),
                None => writeln!(out, "v {} {} {}", p.x, p.y, p.z),
            };
            written.map_err(fmt_err)?;
        }
        let uv = g.tex_coords(0);
        if let Some(uv) = uv {
            for t in uv {
                writeln!(out, "vt {} {}", t.x, t.y).map_err(fmt_err)?;
            }
        }
        if let Some(normals) = &g.normals {
            for n in normals {
                writeln!(out, "vn {} {} {}", n.x, n.y, n.z).map_err(fmt_err)?;
            }
        }

        let corner_ref = |t: usize, k: usize| -> String {
            let corner = t * 3 + k;
            let v = g.triangles[t][k] + v_offset;
            match (uv.is_some(), g.normals.is_some()) {
                (true, true) => format!("{}/{}/{}", v, corner + vt_offset, corner + vn_offset),
                (true, false) => format!("{}/{}", v, corner + vt_offset),
                (false, true) => format!("{}//{}", v, corner + vn_offset),
                (false, false) => v.to_string(),
            }
        };

        let mut current_material = None;
        let mut t = 0;
        while t < g.triangle_count() {
            if mtl_name.is_some() {
                let m = g.material_id(t);
                if current_material != Some(m) {
                    let name = scene
                        .materials
                        .material(m)
                        .map(|m| m.name.clone())
                        .unwrap_or_else(|| format!("material_{}", m));
                    writeln!(out, "usemtl {}", name).map_err(fmt_err)?;
                    current_material = Some(m);
                }
            }
            let is_quad = g
                .quad_flags
                .as_ref()
                .map(|f| {
                    f[t] == QuadFlag::FirstOfQuad
                        && f.get(t + 1) == Some(&QuadFlag::SecondOfQuad)
                        && g.material_id(t) == g.material_id(t + 1)
                })
                .unwrap_or(false);
            if let Some(quad) = is_quad.then(|| quad_corners(&g, t, t + 1)).flatten() {
                let refs: Vec<String> = quad.iter().map(|&(tri, k)| corner_ref(tri, k)).collect();
                writeln!(out, "f {}", refs.join(" ")).map_err(fmt_err)?;
                t += 2;
            } else {
                writeln!(out, "f {} {} {}", corner_ref(t, 0), corner_ref(t, 1), corner_ref(t, 2))
                    .map_err(fmt_err)?;
                t += 1;
            }
        }

        v_offset += g.vertex_count();
        if uv.is_some() {
            vt_offset += g.corner_count();
        }
        if g.normals.is_some() {
            vn_offset += g.corner_count();
        }
    }
    Ok(out)
}

impl SceneWriter for ObjWriter {
    fn write_scene<P: AsRef<Path>>(scene: &Scene, path: P) -> Result<()> {
        let path = path.as_ref();
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("scene")
            .to_string();

        let mtl_name = (!scene.materials.is_empty()).then(|| format!("{}.mtl", stem));
        if let Some(mtl_name) = &mtl_name {
            // textures that only exist in memory are written next to the scene
            let mut textures = scene.textures.clone();
            for texture in textures.iter_mut() {
                if let Some(image) = &texture.image {
                    if !Path::new(&texture.file_path).exists() {
                        let file = dir.join(format!("{}.png", texture.name));
                        save_image(image, &file, PixelFormat::R8G8B8A8)?;
                        texture.file_path = file.display().to_string();
                    }
                }
            }
            let materials: Vec<&Material> = scene.materials.iter().collect();
            let text = write_mtl(&materials, &textures, dir)?;
            std::fs::write(dir.join(mtl_name), text)?;
        }
        let text = write_obj(scene, mtl_name.as_deref())?;
        std::fs::write(path, text)?;
        log::info!(
            "exported {} meshes, {} triangles to {}",
            scene.mesh_nodes().len(),
            scene.triangle_count(),
            path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const CUBE_SIDE: &str = "\
mtllib side.mtl
o Tri
v 2 0 0
v 3 0 0
v 2 1 0
f -3 -2 -1
o Panel
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 0 1
usemtl Wood
f 4/1/1 5/2/1 6/3/1 7/4/1
";

    const SIDE_MTL: &str = "newmtl Wood\nKd 0.8 0.6 0.4\n";

    fn document(text: &str, mtl: Option<&'static str>, reporter: &Reporter) -> Result<ObjDocument> {
        ObjDocument::parse(
            &mut text.as_bytes(),
            move |_| match mtl {
                Some(mtl) => tobj::load_mtl_buf(&mut mtl.as_bytes()),
                None => Err(tobj::LoadError::OpenFileFailed),
            },
            reporter,
        )
    }

    fn scene(text: &str, mtl: Option<&'static str>, reporter: &Reporter) -> Scene {
        document(text, mtl, reporter)
            .unwrap()
            .into_scene(Path::new("."), reporter)
            .unwrap()
    }

    #[test]
    fn test_into_scene() {
        let reporter = Reporter::new();
        let scene = scene(CUBE_SIDE, Some(SIDE_MTL), &reporter);
        assert!(!reporter.warning_occurred(), "{:?}", reporter.warning_messages());
        // Tri comes before any usemtl so it gets a default material
        assert_eq!(scene.materials.len(), 2);

        let meshes = scene.mesh_nodes();
        assert_eq!(meshes.len(), 2);
        let tri = scene.geometry(meshes[0]).unwrap();
        assert_eq!(tri.material_id(0), 1);
        assert!(tri.tex_coords(0).is_none());
        assert!(tri.normals.is_none());

        let panel = scene.geometry(meshes[1]).unwrap();
        assert_eq!(panel.triangle_count(), 2);
        assert_eq!(
            panel.quad_flags.as_deref(),
            Some(&[QuadFlag::FirstOfQuad, QuadFlag::SecondOfQuad][..])
        );
        assert_relative_eq!(panel.tex_coords(0).unwrap()[4], Vector2f::new(1.0, 1.0));
        assert!(panel.normals.is_some());
        assert_eq!(panel.material_id(0), 0);
    }

    #[test]
    fn test_vertex_colors_become_corner_colors() {
        let text = "o Colored\nv 0 0 0 1 0 0\nv 1 0 0 0 1 0\nv 0 1 0 0 0 1\nf 1 2 3\n";
        let reporter = Reporter::new();
        let scene = scene(text, None, &reporter);
        let g = scene.geometry(scene.mesh_nodes()[0]).unwrap();
        assert_relative_eq!(g.colors(0).unwrap()[1], Color::new(0.0, 1.0, 0.0, 1.0));
        assert!(g.material_ids.is_none());
    }

    #[test]
    fn test_missing_library_is_a_warning() {
        let reporter = Reporter::new();
        let scene = scene(CUBE_SIDE, None, &reporter);
        assert!(reporter.warning_occurred());
        assert!(scene.materials.is_empty());
        assert_eq!(scene.triangle_count(), 3);
    }

    #[test]
    fn test_material_change_keeps_object_connected() {
        let text = "mtllib two.mtl\no Strip\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nv 2 0 0\nv 2 1 0\nusemtl A\nf 1 2 3 4\nusemtl B\nf 2 5 6 3\n";
        let reporter = Reporter::new();
        let scene = scene(text, Some("newmtl A\nKd 1 0 0\nnewmtl B\nKd 0 0 1\n"), &reporter);
        let meshes = scene.mesh_nodes();
        assert_eq!(meshes.len(), 1);
        let strip = scene.geometry(meshes[0]).unwrap();
        assert_eq!(strip.vertex_count(), 6);
        assert_eq!(strip.triangle_count(), 4);
        assert_eq!((strip.material_id(0), strip.material_id(3)), (0, 1));
    }

    #[test]
    fn test_bad_index_is_invalid_data() {
        let reporter = Reporter::new();
        assert!(matches!(
            document("v 0 0 0\nf 1 2 3\n", None, &reporter),
            Err(lodcrate_core::Error::InvalidData(_))
        ));
        assert!(document("v 0 0 x\n", None, &reporter).is_err());
    }

    #[test]
    fn test_write_keeps_quads() {
        let reporter = Reporter::new();
        let scene = scene(CUBE_SIDE, Some(SIDE_MTL), &reporter);
        let text = write_obj(&scene, Some("out.mtl")).unwrap();
        assert!(text.contains("f 1 2 3"));
        assert!(text.contains("f 4/1/1 5/2/2 6/3/3 7/6/6"));
        assert!(text.contains("usemtl Wood"));

        // writing then reading gives the same topology
        let again = self::scene(&text, Some(SIDE_MTL), &reporter);
        let meshes = again.mesh_nodes();
        assert_eq!(meshes.len(), 2);
        assert_eq!(again.geometry(meshes[0]).unwrap().triangle_count(), 2);
        assert_eq!(again.triangle_count(), 3);
    }
}
