//! Run a reduction pipeline on a worker thread with a progress observer.

use std::sync::Arc;

use anyhow::Result;
use lodcrate_core::{LogPolicy, Observer};
use lodcrate_demos::{crates_scene, init_logging, output_dir, print_log, write_input};
use lodcrate_pipeline::{ReductionPipeline, RunMode};

fn main() -> Result<()> {
    init_logging();
    let input = write_input(&crates_scene()?, "ProgressEvent")?;
    let output = output_dir()?.join("ProgressEvent_Output.obj");

    let mut pipeline = ReductionPipeline::default();
    // return false to abort the processing
    let observer: Arc<dyn Observer> = Arc::new(|_subject: &str, percent: f32| {
        println!("Progress: {:.6}", percent);
        true
    });
    pipeline.add_observer(observer);

    println!("Start the reduction pipeline.");
    pipeline.run_scene_from_file(&input, Some(&output), RunMode::InNewProcess)?;

    print_log(pipeline.reporter(), LogPolicy::Report)
}
