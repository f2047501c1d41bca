//! End-to-end pipeline runs: processing, casting and re-linking

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use approx::assert_relative_eq;
use lodcrate_core::{
    channels, Error, ErrorKind, GeometryData, LogMessage, Material, Observer, Point3f, Reporter, Scene, ShadingNode,
};
use lodcrate_io::{read_scene, write_scene};
use lodcrate_pipeline::{
    AggregationPipeline, CastOutput, ColorCaster, MaterialCaster, NormalCaster, OutputMaterialSettings, Processor,
    ReductionPipeline, RunMode,
};

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("lodcrate_pipeline_it_{}_{}", std::process::id(), name));
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// n x n quad grid over the unit square at height `z`, UVs equal to xy
fn grid(name: &str, n: usize, z: f32) -> GeometryData {
    let step = 1.0 / n as f32;
    let coords: Vec<Point3f> = (0..=n)
        .flat_map(|j| (0..=n).map(move |i| Point3f::new(i as f32 * step, j as f32 * step, z)))
        .collect();
    let mut triangles = Vec::new();
    for j in 0..n {
        for i in 0..n {
            let v = j * (n + 1) + i;
            triangles.push([v, v + 1, v + n + 2]);
            triangles.push([v, v + n + 2, v + n + 1]);
        }
    }
    let uvs: Vec<f32> = triangles
        .iter()
        .flat_map(|t: &[usize; 3]| t.iter().flat_map(|&v| [coords[v].x, coords[v].y]).collect::<Vec<_>>())
        .collect();
    let mut g = GeometryData::from_coords_and_triangles(name, coords, triangles);
    g.set_tex_coords(0, &uvs).unwrap();
    g.add_material_ids();
    g
}

fn red_scene() -> Scene {
    let mut scene = Scene::new();
    let root = scene.root();
    scene.create_child_mesh(root, grid("floor", 8, 0.0)).unwrap();
    let mut red = Material::new("Red");
    red.set_shading_network(channels::DIFFUSE, ShadingNode::color(1.0, 0.0, 0.0, 1.0));
    scene.materials.add_material(red);
    scene
}

fn small_output(pipeline: &mut ReductionPipeline) {
    let settings = pipeline.processor_mut().mapping_image_settings_mut();
    settings.generate_mapping_image = true;
    settings.apply_new_material_ids = true;
    settings.output_materials = vec![OutputMaterialSettings::default().with_texture_size(32, 32)];
}

#[test]
fn test_reduction_casts_and_relinks_materials() {
    let dir = temp_dir("reduction");
    let mut pipeline = ReductionPipeline::default();
    small_output(&mut pipeline);
    pipeline.texture_output_directory = Some(dir.clone());
    pipeline.add_material_caster(ColorCaster::new(), 0);
    pipeline.add_material_caster(NormalCaster::new(), 0);

    pipeline.run_scene(red_scene(), RunMode::InThisProcess).unwrap();
    assert!(!pipeline.reporter().error_occurred());

    let outputs = pipeline.outputs();
    assert_eq!(outputs.len(), 2);
    let CastOutput::Texture { image, path, .. } = &outputs[0].1 else {
        panic!("color caster should produce a texture");
    };
    assert!(path.exists(), "{} was not written", path.display());
    assert_eq!(path, &dir.join(format!("{}.png", channels::DIFFUSE)));
    let center = image.get(16, 16);
    assert_relative_eq!(center.x, 1.0, epsilon = 0.02);
    assert_relative_eq!(center.y, 0.0, epsilon = 0.02);

    let scene = pipeline.processed_scene();
    assert!(scene.triangle_count() <= 128);
    assert_eq!(scene.materials.len(), 1);
    assert_eq!(scene.textures.len(), 2);
    let material = scene.materials.material(0).unwrap();
    assert_eq!(
        material.shading_network(channels::DIFFUSE).unwrap().texture_names(),
        vec![channels::DIFFUSE]
    );

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_worker_thread_run_matches_caster_output() {
    let dir = temp_dir("worker");
    let mut pipeline = ReductionPipeline::default();
    small_output(&mut pipeline);
    pipeline.texture_output_directory = Some(dir.clone());
    pipeline.add_material_caster(ColorCaster::new(), 0);

    pipeline.run_scene(red_scene(), RunMode::InNewProcess).unwrap();
    assert_eq!(pipeline.outputs().len(), 1);
    let (caster, _) = pipeline.material_casters().next().unwrap();
    assert!(caster.output_file_path().is_some_and(|p| p.exists()));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_observer_cancels_worker_run() {
    let mut pipeline = ReductionPipeline::default();
    let observer: Arc<dyn Observer> = Arc::new(|_: &str, percent: f32| percent < 30.0);
    pipeline.add_observer(observer);
    let reporter = Reporter::new();
    pipeline.set_reporter(reporter.clone());

    let result = pipeline.run_scene(red_scene(), RunMode::InNewProcess);
    assert!(matches!(result, Err(Error::Aborted)));
    assert!(reporter.error_occurred());
}

#[test]
fn test_aggregation_from_file_writes_next_to_output() {
    let dir = temp_dir("from_file");
    let mut scene = red_scene();
    let root = scene.root();
    scene.create_child_mesh(root, grid("wall", 4, 0.5)).unwrap();
    let input = dir.join("input.obj");
    write_scene(&scene, &input).unwrap();

    let output = dir.join("out").join("aggregated.obj");
    let mut pipeline = AggregationPipeline::default();
    {
        let settings = pipeline.processor_mut().mapping_image_settings_mut();
        settings.generate_mapping_image = true;
        settings.apply_new_material_ids = true;
        settings.output_materials = vec![OutputMaterialSettings::default().with_texture_size(64, 64)];
    }
    pipeline.add_material_caster(ColorCaster::new(), 0);
    pipeline.run_scene_from_file(&input, Some(&output), RunMode::InThisProcess).unwrap();

    assert!(output.exists());
    assert!(dir.join("out").join(format!("{}.png", channels::DIFFUSE)).exists());

    let reporter = Reporter::new();
    let loaded = read_scene(&output, &reporter).unwrap();
    assert_eq!(loaded.mesh_nodes().len(), 1);
    assert_eq!(loaded.triangle_count(), 128 + 32);
    assert_eq!(loaded.materials.len(), 1);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_missing_input_is_reported() {
    let mut pipeline = ReductionPipeline::default();
    let result = pipeline.run_scene_from_file(
        temp_dir("missing").join("nothing.obj"),
        None::<PathBuf>,
        RunMode::InThisProcess,
    );
    assert!(result.is_err());
    assert!(pipeline.reporter().error_occurred());
}

#[test]
fn test_contradicting_repair_settings_fire_the_error_handler() {
    let dir = temp_dir("error_event");
    let input = dir.join("in.obj");
    write_scene(&red_scene(), &input).unwrap();

    let reporter = Reporter::new();
    let fired = Arc::new(std::sync::Mutex::new(Vec::new()));
    let record = Arc::clone(&fired);
    reporter.set_error_handler(Arc::new(move |message: &LogMessage| {
        record.lock().unwrap().push((message.source.clone(), message.kind));
    }));

    let mut pipeline = ReductionPipeline::default();
    pipeline.set_reporter(reporter.clone());
    let repair = &mut pipeline.processor_mut().repair_settings;
    repair.use_welding = false;
    repair.use_t_junction_remover = true;

    let output = dir.join("out.obj");
    let result = pipeline.run_scene_from_file(&input, Some(&output), RunMode::InNewProcess);
    assert!(matches!(result, Err(Error::InvalidSettings(_))));
    assert!(!output.exists());

    let fired = fired.lock().unwrap();
    assert!(
        fired.contains(&("ReductionProcessor".to_string(), ErrorKind::InvalidSettings)),
        "{:?}",
        fired
    );
    let _ = fs::remove_dir_all(&dir);
}
