//! Install an error handler, then run a reduction pipeline on a worker
//! thread with repair settings that contradict each other: the T-junction
//! remover is enabled while welding is off. The stage rejects them and the
//! handler fires.

use std::sync::Arc;

use anyhow::Result;
use lodcrate_core::{LogMessage, LogPolicy, Reporter};
use lodcrate_demos::{crates_scene, init_logging, output_dir, print_log, write_input};
use lodcrate_pipeline::{ReductionPipeline, RunMode};

fn main() -> Result<()> {
    init_logging();
    let input = write_input(&crates_scene()?, "ErrorEvent")?;
    let output = output_dir()?.join("ErrorEvent_Output.obj");

    let reporter = Reporter::new();
    reporter.set_error_handler(Arc::new(|message: &LogMessage| {
        println!(
            "Error ({}:{}) [{}]: {}",
            message.source, message.method, message.kind, message.text
        );
    }));

    let mut pipeline = ReductionPipeline::default();
    pipeline.set_reporter(reporter.clone());
    let repair = &mut pipeline.processor_mut().repair_settings;
    repair.use_welding = false;
    repair.use_t_junction_remover = true;

    println!("Start the reduction pipeline.");
    if let Err(e) = pipeline.run_scene_from_file(&input, Some(&output), RunMode::InNewProcess) {
        println!("Failed to run the pipeline: {}", e);
    }

    print_log(&reporter, LogPolicy::Report)
}
