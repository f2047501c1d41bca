//! Writing scenes as glTF and reading them back

use std::fs;
use std::path::PathBuf;

use approx::assert_relative_eq;
use lodcrate_core::{
    channels, BlendMode, Color, GeometryData, ImageData, Material, NodeKind, Point3f, Reporter,
    Scene, ShadingNode, Texture, Transform3D, Vector2f, Vector3f,
};
use lodcrate_io::{read_scene, write_scene};

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("lodcrate_glb_it_{}_{}", std::process::id(), name));
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// A textured quad under a translated frame node
fn framed_quad() -> Scene {
    let mut scene = Scene::new();
    let frame = scene
        .create_child(scene.root(), "Frame", NodeKind::Transform)
        .unwrap();
    scene.node_mut(frame).unwrap().relative_transform =
        Transform3D::translation(Vector3f::new(2.0, 0.0, -1.0));

    let mut g = GeometryData::from_coords_and_triangles(
        "Quad",
        vec![
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(1.0, 1.0, 0.0),
            Point3f::new(0.0, 1.0, 0.0),
        ],
        vec![[0, 1, 2], [0, 2, 3]],
    );
    g.set_tex_coords(0, &[0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0])
        .unwrap();
    g.normals = Some(vec![Vector3f::z(); 6]);
    g.add_material_ids();
    scene.create_child_mesh(frame, g).unwrap();

    let mut checker = ImageData::filled(4, 2, Color::new(1.0, 1.0, 1.0, 1.0));
    checker.set(0, 0, Color::new(0.0, 0.0, 1.0, 1.0));
    scene
        .textures
        .add_texture(Texture::new("checker", "checker.png").with_image(checker));
    let mut m = Material::new("Glass");
    m.set_shading_network(channels::DIFFUSE, ShadingNode::texture("checker", 0));
    m.set_shading_network(channels::OPACITY, ShadingNode::color(0.5, 0.5, 0.5, 0.5));
    m.blend_mode = BlendMode::Blend;
    scene.materials.add_material(m);
    scene
}

fn check_framed_quad(loaded: &Scene) {
    let root = loaded.node(loaded.root()).unwrap();
    assert_eq!(root.children.len(), 1);
    let frame = loaded.node(root.children[0]).unwrap();
    assert_eq!(frame.name, "Frame");
    assert_relative_eq!(
        frame.relative_transform.matrix,
        Transform3D::translation(Vector3f::new(2.0, 0.0, -1.0)).matrix,
        epsilon = 1e-6
    );

    let mesh = loaded.node(frame.children[0]).unwrap();
    let g = mesh.geometry().unwrap();
    assert_eq!(g.triangle_count(), 2);
    assert_eq!(g.vertex_count(), 4);
    let uv = g.tex_coords(0).unwrap();
    assert_relative_eq!(uv[5], Vector2f::new(0.0, 1.0), epsilon = 1e-6);
    assert_relative_eq!(g.normals.as_ref().unwrap()[0], Vector3f::z(), epsilon = 1e-6);

    let world = loaded.world_geometry(frame.children[0]).unwrap();
    assert_relative_eq!(world.coords[2], Point3f::new(3.0, 1.0, -1.0), epsilon = 1e-6);

    assert_eq!(loaded.materials.len(), 1);
    let material = loaded.materials.material(0).unwrap();
    assert_eq!(material.name, "Glass");
    assert_eq!(material.blend_mode, BlendMode::Blend);
    let diffuse = material.shading_network(channels::DIFFUSE).unwrap();
    assert_eq!(diffuse.texture_names(), vec!["checker"]);
    let image = loaded.textures.find("checker").unwrap().image.as_ref().unwrap();
    assert_eq!((image.width, image.height), (4, 2));
    assert_relative_eq!(image.get(0, 0), Color::new(0.0, 0.0, 1.0, 1.0), epsilon = 1e-2);
}

#[test]
fn test_glb_round_trip() {
    let dir = temp_dir("glb");
    let path = dir.join("quad.glb");
    write_scene(&framed_quad(), &path).unwrap();
    assert_eq!(&fs::read(&path).unwrap()[..4], b"glTF");

    let reporter = Reporter::new();
    let loaded = read_scene(&path, &reporter).unwrap();
    assert!(!reporter.warning_occurred(), "{:?}", reporter.warning_messages());
    check_framed_quad(&loaded);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_gltf_writes_side_buffer() {
    let dir = temp_dir("gltf");
    let path = dir.join("quad.gltf");
    write_scene(&framed_quad(), &path).unwrap();
    assert!(dir.join("quad.bin").exists());

    let reporter = Reporter::new();
    check_framed_quad(&read_scene(&path, &reporter).unwrap());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_obj_converts_to_glb() {
    let dir = temp_dir("convert");
    fs::write(
        dir.join("tri.obj"),
        "o Tri\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n",
    )
    .unwrap();
    let reporter = Reporter::new();
    let scene = read_scene(dir.join("tri.obj"), &reporter).unwrap();
    write_scene(&scene, dir.join("tri.glb")).unwrap();

    let loaded = read_scene(dir.join("tri.glb"), &reporter).unwrap();
    assert_eq!(loaded.triangle_count(), 1);
    assert_eq!(loaded.materials.len(), 0);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_truncated_glb_is_invalid_data() {
    let dir = temp_dir("truncated");
    let path = dir.join("broken.glb");
    fs::write(&path, b"glTF\x02\x00\x00\x00").unwrap();
    let reporter = Reporter::new();
    assert!(matches!(
        read_scene(&path, &reporter),
        Err(lodcrate_core::Error::InvalidData(_))
    ));
    let _ = fs::remove_dir_all(&dir);
}
