//! Render a flipbook of views around the up axis into one texture atlas.

use anyhow::Result;
use lodcrate_core::{LogPolicy, Vector3f};
use lodcrate_demos::{crates_scene, init_logging, output_dir, print_log};
use lodcrate_io::write_scene;
use lodcrate_pipeline::{
    ColorCaster, ImpostorPipeline, ImpostorType, NormalCaster, OutputMaterialSettings, Processor, RunMode,
};

fn main() -> Result<()> {
    init_logging();
    let mut pipeline = ImpostorPipeline::default();
    pipeline.texture_output_directory = Some(output_dir()?);
    {
        let processor = pipeline.processor_mut();
        processor.impostor_settings.impostor_type = ImpostorType::Flipbook {
            number_of_views: 9,
            view_direction: Vector3f::new(1.0, 0.0, 0.0),
            up_vector: Vector3f::y(),
        };
        let mapping = processor.mapping_image_settings_mut();
        mapping.generate_mapping_image = true;
        mapping.maximum_layers = 10;
        mapping.output_materials = vec![OutputMaterialSettings::default()
            .with_texture_size(1536, 1536)
            .with_multisampling_level(2)];
    }
    pipeline.add_material_caster(ColorCaster::new(), 0);
    pipeline.add_material_caster(NormalCaster::new(), 0);

    println!("Start the impostor pipeline.");
    pipeline.run_scene(crates_scene()?, RunMode::InThisProcess)?;

    let path = output_dir()?.join("ImpostorFlipbook_Output.obj");
    write_scene(pipeline.processed_scene(), &path)?;
    print_log(pipeline.reporter(), LogPolicy::Report)
}
