//! Analyze the seams shared by a set of modular tiles, store them, then
//! reduce every tile on its own so the shared borders still line up.

use anyhow::{Context, Result};
use lodcrate_core::{Bounded, GeometryData, LogPolicy, NodeType, Reporter, Scene};
use lodcrate_demos::{init_logging, modular_assets_scene, output_dir, print_log};
use lodcrate_io::write_scene;
use lodcrate_pipeline::{Processor, ReductionProcessor};
use lodcrate_simplification::{ModularSeamAnalyzer, ModularSeamSettings, ModularSeams, ReductionSettings, StopCondition};

const TRIANGLE_RATIO: f32 = 0.5;
const MAX_DEVIATION: f32 = 0.0;
const SEAM_REDUCTION_RATIO: f32 = 0.75;
const SEAM_MAX_DEVIATION: f32 = 0.0;

fn modify_reduction_settings(settings: &mut ReductionSettings, triangle_ratio: f32, max_deviation: f32) {
    // importances are shared by the analyzer and the per-asset reductions
    settings.geometry_importance = 1.0;
    settings.material_importance = 1.0;
    settings.texture_importance = 1.0;
    settings.shading_importance = 1.0;
    settings.vertex_color_importance = 1.0;

    settings.reduction_target_triangle_ratio = triangle_ratio;
    settings.reduction_target_max_deviation = max_deviation;
    settings.set_reduction_targets(StopCondition::All, true, false, true, false);
}

fn geometries_in_scene(scene: &mut Scene) -> Vec<GeometryData> {
    let set = scene.select_nodes(NodeType::Mesh);
    let items = scene
        .selection_sets
        .selection_set(set)
        .map(|s| s.items().to_vec())
        .unwrap_or_default();
    items.into_iter().filter_map(|id| scene.geometry(id).cloned()).collect()
}

fn generate_modular_seams(scene: &mut Scene, reporter: &Reporter) -> Result<ModularSeams> {
    let geometries = geometries_in_scene(scene);
    // vertices closer than this are the same vertex, relative to the scene size
    let tolerance = scene.radius() * 1e-4;
    let mut settings = ReductionSettings::default();
    modify_reduction_settings(&mut settings, 0.0, 0.0);

    let mut analyzer = ModularSeamAnalyzer::new(tolerance)
        .with_translation_independence(false)
        .with_reporter(reporter.clone());
    for geometry in geometries {
        analyzer.add_geometry(geometry);
    }
    Ok(analyzer.analyze(&settings)?)
}

fn debug_modular_seams(seams: &ModularSeams) -> Result<()> {
    for index in 0..seams.modular_seam_count() {
        let geometry = seams.new_debug_modular_seam_geometry(index)?;
        let names = seams.modular_seam_geometry_names(index)?;
        let vertex_count = geometry.vertex_count();

        let mut debug_scene = Scene::new();
        let root = debug_scene.root();
        debug_scene.create_child_mesh(root, geometry)?;
        let path = output_dir()?.join(format!("ReductionWithModularSeams_seam_{}.obj", index));
        write_scene(&debug_scene, &path)?;

        println!(
            "Seam {} consists of {} vertices and is shared among {} geometries:",
            index,
            vertex_count,
            names.len()
        );
        for (i, name) in names.iter().enumerate() {
            println!(" geom {}: {}", i, name);
        }
    }
    Ok(())
}

fn run_reduction(scene: &mut Scene, seams: &ModularSeams, reporter: &Reporter) -> Result<()> {
    for geometry in geometries_in_scene(scene) {
        // keep materials and textures, drop every node
        let mut single = scene.clone();
        single.remove_scene_nodes();
        let root = single.root();
        let name = geometry.name.clone();
        single.create_child_mesh(root, geometry)?;

        let mut processor = ReductionProcessor::new(single);
        processor.set_reporter(reporter.clone());
        modify_reduction_settings(&mut processor.reduction_settings, TRIANGLE_RATIO, MAX_DEVIATION);
        processor.modular_seam_settings = Some(
            ModularSeamSettings::new(seams.clone())
                .with_reduction_ratio(SEAM_REDUCTION_RATIO)
                .with_max_deviation(SEAM_MAX_DEVIATION)
                .with_stop_condition(StopCondition::All),
        );
        processor.run_processing()?;

        let path = output_dir()?.join(format!("ReductionWithModularSeams_{}.obj", name));
        write_scene(processor.processed_scene(), &path).with_context(|| format!("failed to save {}", name))?;
    }
    Ok(())
}

fn main() -> Result<()> {
    init_logging();
    let reporter = Reporter::new();
    let mut scene = modular_assets_scene()?;
    let seams_path = output_dir()?.join("ModularAssets.modseam");

    let generate_new_seams = true;
    if generate_new_seams {
        generate_modular_seams(&mut scene, &reporter)?.save_to_file(&seams_path)?;
    }
    let seams = ModularSeams::load_from_file(&seams_path)?;
    debug_modular_seams(&seams)?;

    run_reduction(&mut scene, &seams, &reporter)?;
    print_log(&reporter, LogPolicy::Report)
}
