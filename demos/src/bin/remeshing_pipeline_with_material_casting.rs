//! Replace the scene with one remeshed surface, fill small holes, and cast
//! the source colors onto it.

use anyhow::Result;
use lodcrate_core::LogPolicy;
use lodcrate_demos::{crates_scene, init_logging, output_dir, print_log, write_input};
use lodcrate_pipeline::{ColorCaster, NormalCaster, OutputMaterialSettings, Processor, RemeshingPipeline, RunMode};
use lodcrate_simplification::HoleFilling;

fn main() -> Result<()> {
    init_logging();
    let input = write_input(&crates_scene()?, "RemeshingPipelineWithMaterialCasting")?;
    let output = output_dir()?.join("RemeshingPipelineWithMaterialCasting_Output.obj");

    let mut pipeline = RemeshingPipeline::default();
    {
        let processor = pipeline.processor_mut();
        processor.remeshing_settings.on_screen_size = 300;
        processor.remeshing_settings.hole_filling = HoleFilling::Medium;

        let mapping = processor.mapping_image_settings_mut();
        mapping.generate_mapping_image = true;
        mapping.generate_tex_coords = true;
        mapping.apply_new_material_ids = true;
        mapping.generate_tangents = true;
        mapping.output_materials = vec![OutputMaterialSettings::default().with_texture_size(512, 512)];
    }
    pipeline.add_material_caster(ColorCaster::new(), 0);
    pipeline.add_material_caster(NormalCaster::new(), 0);

    println!("Start the remeshing pipeline.");
    pipeline.run_scene_from_file(&input, Some(&output), RunMode::InThisProcess)?;
    println!("Remeshed to {} triangles", pipeline.processed_scene().triangle_count());
    print_log(pipeline.reporter(), LogPolicy::Report)
}
