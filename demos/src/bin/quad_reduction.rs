//! Reduce quad-dominant meshes and export the result as quads.

use anyhow::Result;
use lodcrate_core::LogPolicy;
use lodcrate_demos::{crates_scene, init_logging, output_dir, print_log};
use lodcrate_io::write_scene;
use lodcrate_pipeline::{Processor, QuadReductionProcessor};
use lodcrate_simplification::StopCondition;

fn main() -> Result<()> {
    init_logging();
    let mut processor = QuadReductionProcessor::new(crates_scene()?);
    let settings = &mut processor.quad_reduction_settings;
    settings.set_reduction_targets(StopCondition::Any, true, false, false, false);
    settings.reduction.reduction_target_triangle_ratio = 0.5;

    println!("Start the quad reduction processor.");
    processor.run_processing()?;
    for (node, stats) in processor.stats() {
        println!("node {}: {} -> {} quads", node, stats.quads_before, stats.quads_after);
    }

    let path = output_dir()?.join("QuadReduction_Output.obj");
    write_scene(processor.processed_scene(), &path)?;
    print_log(processor.reporter(), LogPolicy::Report)
}
