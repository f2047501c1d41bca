//! Reduce every `.glb` asset of a folder with its own pipeline, each run
//! isolated from the others.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use lodcrate_core::LogPolicy;
use lodcrate_demos::{crates_scene, foliage_scene, init_logging, modular_assets_scene, output_dir, print_log};
use lodcrate_io::write_scene;
use lodcrate_pipeline::{ReductionPipeline, RunMode};
use lodcrate_simplification::StopCondition;

fn run_reduction(input: &Path, output: &Path) -> Result<()> {
    let mut pipeline = ReductionPipeline::default();
    let settings = &mut pipeline.processor_mut().reduction_settings;
    settings.set_reduction_targets(StopCondition::All, true, false, false, false);
    settings.reduction_target_triangle_ratio = 0.5;

    println!("Start the reduction pipeline for {}.", input.display());
    pipeline.run_scene_from_file(input, Some(output), RunMode::InNewProcess)?;
    print_log(pipeline.reporter(), LogPolicy::Report)
}

fn main() -> Result<()> {
    init_logging();
    let assets = output_dir()?.join("BatchingAssets");
    fs::create_dir_all(&assets).context("failed to create asset directory")?;
    write_scene(&crates_scene()?, assets.join("Crates.glb"))?;
    write_scene(&foliage_scene()?, assets.join("Foliage.glb"))?;
    write_scene(&modular_assets_scene()?, assets.join("Modular.glb"))?;

    let mut inputs: Vec<_> = fs::read_dir(&assets)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|e| e == "glb"))
        .collect();
    inputs.sort();
    for input in inputs {
        let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("asset");
        let output = output_dir()?.join(format!("Batching_{}_LOD.glb", stem));
        run_reduction(&input, &output)?;
    }
    Ok(())
}
