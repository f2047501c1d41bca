//! Reduce a box while keeping it mirror symmetric. The first pass uses a
//! fixed plane, the second lets the reducer find the plane per mesh.

use anyhow::Result;
use lodcrate_core::{LogPolicy, Scene, Vector3f};
use lodcrate_demos::{init_logging, output_dir, print_log, subdivided_box};
use lodcrate_io::write_scene;
use lodcrate_pipeline::{Processor, ReductionProcessor};
use lodcrate_simplification::SymmetryAxis;

fn box_scene() -> Result<Scene> {
    let mut scene = Scene::new();
    let root = scene.root();
    scene.create_child_mesh(root, subdivided_box("Box", Vector3f::new(2.0, 1.0, 1.0), 10))?;
    Ok(scene)
}

fn main() -> Result<()> {
    init_logging();

    let mut processor = ReductionProcessor::new(box_scene()?);
    processor.reduction_settings.reduction_target_triangle_ratio = 0.2;
    processor.reduction_settings.keep_symmetry = true;
    processor.reduction_settings.symmetry_axis = SymmetryAxis::X;
    // the box spans 0..2 along x
    processor.reduction_settings.symmetry_offset = 1.0;
    println!("Start the reduction processor with a fixed symmetry plane.");
    processor.run_processing()?;
    println!("Box: {} triangles", processor.processed_scene().triangle_count());
    write_scene(
        processor.processed_scene(),
        output_dir()?.join("ReductionWithSymmetry_Output.obj"),
    )?;
    print_log(processor.reporter(), LogPolicy::Report)?;

    let mut processor = ReductionProcessor::new(box_scene()?);
    processor.reduction_settings.reduction_target_triangle_ratio = 0.2;
    processor.reduction_settings.keep_symmetry = true;
    processor.reduction_settings.use_automatic_symmetry_detection = true;
    println!("Start the reduction processor with symmetry detection.");
    processor.run_processing()?;
    println!("Box: {} triangles", processor.processed_scene().triangle_count());
    write_scene(
        processor.processed_scene(),
        output_dir()?.join("ReductionWithDetectedSymmetry_Output.obj"),
    )?;
    print_log(processor.reporter(), LogPolicy::Report)
}
