//! Importing an OBJ with an MTL library and PNG textures from disk

use std::fs;
use std::path::PathBuf;

use lodcrate_core::{channels, Color, ImageData, Reporter};
use lodcrate_io::{read_scene, save_image, write_scene, PixelFormat, SceneExporter, SceneImporter};

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("lodcrate_io_it_{}_{}", std::process::id(), name));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_assets(dir: &PathBuf) {
    let mut checker = ImageData::new(2, 2);
    checker.set(0, 0, Color::new(1.0, 1.0, 1.0, 1.0));
    checker.set(1, 1, Color::new(1.0, 1.0, 1.0, 1.0));
    save_image(&checker, dir.join("checker.png"), PixelFormat::R8G8B8A8).unwrap();

    fs::write(
        dir.join("box.mtl"),
        "newmtl Checker\nKd 1 1 1\nmap_Kd checker.png\n\nnewmtl Red\nKd 1 0 0\n",
    )
    .unwrap();
    fs::write(
        dir.join("box.obj"),
        "mtllib box.mtl\n\
         o Left\n\
         v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\n\
         vt 0 0\nvt 1 0\nvt 1 1\nvt 0 1\n\
         usemtl Checker\n\
         f 1/1 2/2 3/3 4/4\n\
         o Right\n\
         v 2 0 0\nv 3 0 0\nv 3 1 0\n\
         usemtl Red\n\
         f 5 6 7\n",
    )
    .unwrap();
}

#[test]
fn test_import_resolves_materials_and_textures() {
    let dir = temp_dir("import");
    write_assets(&dir);

    let reporter = Reporter::new();
    let scene = read_scene(dir.join("box.obj"), &reporter).unwrap();
    assert!(!reporter.warning_occurred(), "{:?}", reporter.warning_messages());

    assert_eq!(scene.mesh_nodes().len(), 2);
    assert_eq!(scene.triangle_count(), 3);
    assert_eq!(scene.materials.len(), 2);

    let checker = scene.materials.find_id("Checker").unwrap();
    let material = scene.materials.material(checker).unwrap();
    assert_eq!(
        material.shading_network(channels::DIFFUSE).unwrap().texture_names(),
        vec!["checker"]
    );
    let image = scene.textures.find("checker").unwrap().image.as_ref().unwrap();
    assert_eq!((image.width, image.height), (2, 2));

    let right = scene.node_from_path("/Root/Right").unwrap();
    assert_eq!(scene.geometry(right).unwrap().material_id(0), scene.materials.find_id("Red").unwrap());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_importer_exporter_roundtrip() {
    let dir = temp_dir("roundtrip");
    write_assets(&dir);

    let reporter = Reporter::new();
    let mut importer = SceneImporter::new(reporter.clone());
    importer.set_import_file_path(dir.join("box.obj"));
    importer.run().unwrap();
    let scene = importer.take_scene().unwrap();

    let out_dir = temp_dir("roundtrip_out");
    let mut exporter = SceneExporter::new(reporter.clone());
    exporter.set_export_file_path(out_dir.join("copy.obj"));
    exporter.run(&scene).unwrap();
    assert!(out_dir.join("copy.mtl").exists());

    let again = read_scene(out_dir.join("copy.obj"), &reporter).unwrap();
    assert_eq!(again.triangle_count(), scene.triangle_count());
    assert_eq!(again.materials.len(), scene.materials.len());
    assert!(!reporter.error_occurred());

    let _ = fs::remove_dir_all(&dir);
    let _ = fs::remove_dir_all(&out_dir);
}

#[test]
fn test_unknown_extension_is_rejected() {
    let dir = temp_dir("unknown");
    let scene = lodcrate_core::Scene::new();
    assert!(write_scene(&scene, dir.join("scene.stl")).is_err());
    let _ = fs::remove_dir_all(&dir);
}
