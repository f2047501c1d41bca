//! Reduce only the meshes of one selection set; everything else is left
//! untouched.

use anyhow::Result;
use lodcrate_core::{LogPolicy, SelectionSet};
use lodcrate_demos::{crates_scene, init_logging, output_dir, print_log};
use lodcrate_io::write_scene;
use lodcrate_pipeline::{Processor, ReductionProcessor};

fn main() -> Result<()> {
    init_logging();
    let mut scene = crates_scene()?;

    let mut set = SelectionSet::new("Selection");
    if let Some(node) = scene.node_from_path("Root/Crates/BigCrate") {
        set.add_item(node);
    }
    scene.selection_sets.add_selection_set(set);
    let before = scene.triangle_count();

    let mut processor = ReductionProcessor::new(scene);
    processor.reduction_settings.process_selection_set_name = Some("Selection".to_string());
    processor.reduction_settings.reduction_target_triangle_ratio = 0.25;
    println!("Start the reduction processor.");
    processor.run_processing()?;

    for (node, stats) in processor.stats() {
        println!(
            "node {}: {} -> {} triangles",
            node, stats.triangles_before, stats.triangles_after
        );
    }
    println!("Scene: {} -> {} triangles", before, processor.processed_scene().triangle_count());

    let path = output_dir()?.join("ReductionWithProcessSelectionSet_Output.obj");
    write_scene(processor.processed_scene(), &path)?;
    print_log(processor.reporter(), LogPolicy::Report)
}
