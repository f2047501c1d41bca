//! Approximate a tree with a cloud of alpha-tested billboards.

use anyhow::Result;
use lodcrate_core::{channels, LogPolicy};
use lodcrate_demos::{foliage_scene, init_logging, output_dir, print_log, write_input};
use lodcrate_pipeline::{
    BillboardMode, CasterSettings, ColorCaster, ImpostorPipeline, ImpostorType, OpacityCaster,
    OutputMaterialSettings, Processor, RunMode,
};

fn main() -> Result<()> {
    init_logging();
    let input = write_input(&foliage_scene()?, "ImpostorBillboardCloud")?;
    let output = output_dir()?.join("ImpostorBillboardCloud_Output.obj");

    let mut pipeline = ImpostorPipeline::default();
    {
        let processor = pipeline.processor_mut();
        processor.impostor_settings.impostor_type = ImpostorType::BillboardCloud {
            mode: BillboardMode::Foliage,
            billboard_density: 0.5,
            geometric_complexity: 0.9,
            max_plane_count: 10,
            two_sided: true,
        };
        let mapping = processor.mapping_image_settings_mut();
        mapping.generate_mapping_image = true;
        mapping.maximum_layers = 10;
        mapping.output_materials = vec![OutputMaterialSettings::default().with_texture_size(1024, 1024)];
    }

    let mut color = CasterSettings::default().with_material_channel(channels::DIFFUSE);
    color.bake_opacity_in_alpha = true;
    pipeline.add_material_caster(ColorCaster::with_settings(color), 0);
    pipeline.add_material_caster(OpacityCaster::new(), 0);

    println!("Start the impostor pipeline.");
    pipeline.run_scene_from_file(&input, Some(&output), RunMode::InThisProcess)?;
    println!(
        "Billboard cloud uses {} triangles",
        pipeline.processed_scene().triangle_count()
    );
    print_log(pipeline.reporter(), LogPolicy::Report)
}
