//! Reduce a textured scene to half its triangles and cast its diffuse and
//! normal channels into one new material.

use anyhow::Result;
use lodcrate_core::{channels, LogPolicy};
use lodcrate_demos::{crates_scene, init_logging, output_dir, print_log, write_input};
use lodcrate_pipeline::{
    CasterSettings, ColorCaster, MaterialCaster, NormalCaster, OutputMaterialSettings, Processor,
    ReductionPipeline, RunMode,
};
use lodcrate_simplification::StopCondition;

fn main() -> Result<()> {
    init_logging();
    let input = write_input(&crates_scene()?, "ReductionPipelineWithMaterialCasting")?;
    let output = output_dir()?.join("ReductionPipelineWithMaterialCasting_Output.obj");

    let mut pipeline = ReductionPipeline::default();
    {
        let processor = pipeline.processor_mut();
        let reduction = &mut processor.reduction_settings;
        reduction.set_reduction_targets(StopCondition::All, true, false, false, false);
        reduction.reduction_target_triangle_ratio = 0.5;

        let mapping = processor.mapping_image_settings_mut();
        mapping.generate_mapping_image = true;
        mapping.generate_tex_coords = true;
        mapping.apply_new_material_ids = true;
        mapping.generate_tangents = true;
        mapping.use_full_retexturing = true;
        mapping.output_materials = vec![OutputMaterialSettings::default().with_texture_size(1024, 1024)];
    }

    pipeline.add_material_caster(
        ColorCaster::with_settings(CasterSettings::default().with_material_channel(channels::DIFFUSE)),
        0,
    );
    let mut normals = NormalCaster::new();
    normals.generate_tangent_space_normals = true;
    normals.settings_mut().dilation = 8;
    pipeline.add_material_caster(normals, 0);

    println!("Start the reduction pipeline.");
    pipeline.run_scene_from_file(&input, Some(&output), RunMode::InThisProcess)?;
    println!(
        "Reduced to {} triangles, wrote {}",
        pipeline.processed_scene().triangle_count(),
        output.display()
    );

    print_log(pipeline.reporter(), LogPolicy::Report)
}
