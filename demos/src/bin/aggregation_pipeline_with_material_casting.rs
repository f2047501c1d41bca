//! Merge every mesh into one and cast all source materials into a single
//! atlas material.

use anyhow::Result;
use lodcrate_core::LogPolicy;
use lodcrate_demos::{crates_scene, init_logging, output_dir, print_log, write_input};
use lodcrate_pipeline::{
    AggregationPipeline, ChartAggregatorMode, ColorCaster, NormalCaster, OpacityCaster, OutputMaterialSettings,
    Processor, RunMode, TexCoordGenerator,
};

fn main() -> Result<()> {
    init_logging();
    let input = write_input(&crates_scene()?, "AggregationPipelineWithMaterialCasting")?;
    let output = output_dir()?.join("AggregationPipelineWithMaterialCasting_Output.obj");

    let mut pipeline = AggregationPipeline::default();
    {
        let processor = pipeline.processor_mut();
        processor.aggregation_settings.merge_geometries = true;

        let mapping = processor.mapping_image_settings_mut();
        mapping.generate_mapping_image = true;
        mapping.apply_new_material_ids = true;
        mapping.generate_tangents = true;
        mapping.use_full_retexturing = true;
        mapping.tex_coord_generator = TexCoordGenerator::ChartAggregator;
        mapping.chart_aggregator.mode = ChartAggregatorMode::SurfaceArea;
        mapping.chart_aggregator.separate_overlapping_charts = false;
        mapping.output_materials = vec![OutputMaterialSettings::default().with_texture_size(1024, 1024)];
    }
    pipeline.add_material_caster(ColorCaster::new(), 0);
    pipeline.add_material_caster(OpacityCaster::new(), 0);
    pipeline.add_material_caster(NormalCaster::new(), 0);

    println!("Start the aggregation pipeline.");
    pipeline.run_scene_from_file(&input, Some(&output), RunMode::InThisProcess)?;
    print_log(pipeline.reporter(), LogPolicy::Report)
}
