//! Reduce a scene and bake custom channels with a compute caster: a height
//! gradient into a texture and the diffuse color into vertex colors.

use anyhow::Result;
use lodcrate_core::{Color, LogPolicy};
use lodcrate_demos::{crates_scene, init_logging, output_dir, print_log};
use lodcrate_io::write_scene;
use lodcrate_pipeline::{
    CasterSettings, ComputeCaster, OutputMaterialSettings, Processor, ReductionPipeline, RunMode,
    VertexColorCaster,
};

fn main() -> Result<()> {
    init_logging();
    let mut pipeline = ReductionPipeline::default();
    pipeline.texture_output_directory = Some(output_dir()?);
    {
        let mapping = pipeline.processor_mut().mapping_image_settings_mut();
        mapping.generate_mapping_image = true;
        mapping.output_materials = vec![OutputMaterialSettings::default().with_texture_size(512, 512)];
    }

    let gradient = ComputeCaster::with_settings(CasterSettings::default().with_material_channel("HeightGradient"))
        .with_evaluator(|sample| {
            let h = (sample.frame.position.y + 0.1).clamp(0.0, 1.0);
            let tint = sample.channel_value.unwrap_or_else(|| Color::new(1.0, 1.0, 1.0, 1.0));
            Some(Color::new(h * tint.x, h * tint.y, h * tint.z, 1.0))
        });
    pipeline.add_material_caster(gradient, 0);

    let mut vertex_colors = VertexColorCaster::new("BakedDiffuse");
    vertex_colors.output_color_level = 0;
    pipeline.add_material_caster(vertex_colors, 0);

    println!("Start the reduction pipeline.");
    pipeline.run_scene(crates_scene()?, RunMode::InThisProcess)?;
    for (index, output) in pipeline.outputs() {
        println!("output material {}: {}", index, output.channel());
    }

    let path = output_dir()?.join("ComputeCasting_Output.obj");
    write_scene(pipeline.processed_scene(), &path)?;
    print_log(pipeline.reporter(), LogPolicy::Report)
}
