//! Reduce the crates and bake the ambient occlusion of the original
//! surfaces into a texture of the output material.

use anyhow::Result;
use lodcrate_core::LogPolicy;
use lodcrate_demos::{crates_scene, init_logging, output_dir, print_log};
use lodcrate_io::write_scene;
use lodcrate_pipeline::{
    AmbientOcclusionCaster, OutputMaterialSettings, Processor, ReductionPipeline, RunMode,
};

fn main() -> Result<()> {
    init_logging();
    let mut pipeline = ReductionPipeline::default();
    pipeline.texture_output_directory = Some(output_dir()?);
    {
        let processor = pipeline.processor_mut();
        processor.reduction_settings.reduction_target_triangle_ratio = 0.5;
        let mapping = processor.mapping_image_settings_mut();
        mapping.generate_mapping_image = true;
        mapping.output_materials = vec![OutputMaterialSettings::default().with_texture_size(512, 512)];
    }

    let mut occlusion = AmbientOcclusionCaster::new()
        .with_rays_per_pixel(32)
        .with_occlusion_distance(0.5);
    occlusion.occlusion_falloff = 1.0;
    pipeline.add_material_caster(occlusion, 0);

    println!("Start the reduction pipeline.");
    pipeline.run_scene(crates_scene()?, RunMode::InThisProcess)?;
    for (index, output) in pipeline.outputs() {
        println!("output material {}: {}", index, output.channel());
    }

    let path = output_dir()?.join("AmbientOcclusionCasting_Output.obj");
    write_scene(pipeline.processed_scene(), &path)?;
    print_log(pipeline.reporter(), LogPolicy::Report)
}
