//! I/O operations for lodcrate scenes and textures
//!
//! This crate reads and writes scenes by file path with the format chosen
//! from the extension (OBJ with MTL material libraries through `tobj`, and
//! glTF 2.0 `.glb`/`.gltf` through `gltf`), and encodes and decodes PNG
//! textures for material casting.

pub mod error;
pub mod glb;
pub mod mtl;
pub mod obj;
pub mod scene_io;
pub mod texture;

pub use error::*;
pub use glb::{GltfReader, GltfWriter};
pub use scene_io::{read_scene, write_scene, SceneExporter, SceneFormat, SceneImporter};
pub use texture::{encode_png, load_image, save_image, PixelFormat};

use lodcrate_core::{Reporter, Result, Scene};

/// Trait for reading scenes from files
pub trait SceneReader {
    fn read_scene<P: AsRef<std::path::Path>>(path: P, reporter: &Reporter) -> Result<Scene>;
}

/// Trait for writing scenes to files
pub trait SceneWriter {
    fn write_scene<P: AsRef<std::path::Path>>(scene: &Scene, path: P) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodcrate_core::{
        channels, Color, GeometryData, ImageData, Material, Point3f, ShadingNode, Texture,
    };
    use std::fs;
    use std::path::PathBuf;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lodcrate_io_{}_{}", std::process::id(), name));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn textured_scene() -> Scene {
        let mut scene = Scene::new();
        let mut g = GeometryData::from_coords_and_triangles(
            "Plane",
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2]],
        );
        g.set_tex_coords(0, &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0]).unwrap();
        g.add_material_ids();
        scene.create_child_mesh(scene.root(), g).unwrap();
        scene.textures.add_texture(
            Texture::new("baked", "not_on_disk.png")
                .with_image(ImageData::filled(4, 4, Color::new(1.0, 0.0, 0.0, 1.0))),
        );
        let mut m = Material::new("Baked");
        m.set_shading_network(channels::DIFFUSE, ShadingNode::texture("baked", 0));
        scene.materials.add_material(m);
        scene
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(SceneFormat::from_path("a/b/Teapot.OBJ").unwrap(), SceneFormat::Obj);
        assert_eq!(SceneFormat::from_path("x.glb").unwrap(), SceneFormat::Glb);
        assert!(SceneFormat::from_path("x.stl").is_err());
        assert!(SceneFormat::from_path("noext").is_err());
    }

    #[test]
    fn test_fbx_is_rejected() {
        let reporter = Reporter::new();
        assert!(matches!(
            read_scene("model.fbx", &reporter),
            Err(lodcrate_core::Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_obj_roundtrip_with_materials_and_textures() {
        let dir = temp_dir("roundtrip");
        let path = dir.join("plane.obj");
        let scene = textured_scene();
        write_scene(&scene, &path).unwrap();
        assert!(dir.join("plane.mtl").exists());
        assert!(dir.join("baked.png").exists());

        let reporter = Reporter::new();
        let loaded = read_scene(&path, &reporter).unwrap();
        assert!(!reporter.warning_occurred(), "{:?}", reporter.warning_messages());
        assert_eq!(loaded.triangle_count(), 1);
        assert_eq!(loaded.materials.len(), 1);
        let texture = loaded.textures.find("baked").unwrap();
        let image = texture.image.as_ref().unwrap();
        assert_eq!(image.width, 4);
        let mesh = loaded.mesh_nodes()[0];
        assert!(loaded.geometry(mesh).unwrap().has_tex_coords(0));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_importer_records_failure() {
        let reporter = Reporter::new();
        let mut importer = SceneImporter::new(reporter.clone());
        importer.set_import_file_path(temp_dir("missing").join("nothing.obj"));
        assert!(importer.run().is_err());
        assert!(reporter.error_occurred());
        assert!(importer.scene().is_none());
    }
}
