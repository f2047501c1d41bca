use std::collections::BTreeMap;

use lodcrate_core::{Error, Material, MaterialTable, Result, Scene, ShadingNode, Texture, TextureTable};

use super::CastOutput;

/// Name of the texture holding `channel` of output material `output_material`
pub fn output_texture_name(channel: &str, output_material: usize) -> String {
    if output_material == 0 {
        channel.to_string()
    } else {
        format!("{}_{}", channel, output_material)
    }
}

/// Link caster results into `scene`.
///
/// Every output material index gets one material whose channels read the
/// cast textures at `tex_coord_level`, or the baked vertex colors. With
/// `apply_new_material_ids` the scene's tables are replaced by the new ones
/// and every triangle points at material 0; otherwise the new materials and
/// textures are appended and material ids are left alone.
pub fn relink_outputs(
    scene: &mut Scene,
    outputs: &[(usize, CastOutput)],
    apply_new_material_ids: bool,
    tex_coord_level: usize,
) -> Result<()> {
    let mut materials: BTreeMap<usize, Material> = BTreeMap::new();
    let mut textures = TextureTable::new();

    for (output_material, output) in outputs {
        let material = materials
            .entry(*output_material)
            .or_insert_with(|| Material::new(format!("output_material_{}", output_material)));
        match output {
            CastOutput::Texture { channel, path, image } => {
                let name = output_texture_name(channel, *output_material);
                textures.add_texture(Texture::new(name.clone(), path.to_string_lossy()).with_image(image.clone()));
                material.set_shading_network(channel.clone(), ShadingNode::texture(name, tex_coord_level));
            }
            CastOutput::VertexColors { channel, level, colors } => {
                for (node, corner_colors) in colors {
                    let g = scene
                        .geometry_mut(*node)
                        .ok_or_else(|| Error::NotFound(format!("mesh node {:?}", node)))?;
                    if corner_colors.len() != g.corner_count() {
                        return Err(Error::InvalidData(format!(
                            "{}: {} vertex colors for {} corners",
                            g.name,
                            corner_colors.len(),
                            g.corner_count()
                        )));
                    }
                    g.add_colors(*level)?;
                    if let Some(channel) = g.colors_mut(*level) {
                        channel.clone_from(corner_colors);
                    }
                }
                material.set_shading_network(channel.clone(), ShadingNode::VertexColor { level: *level });
            }
        }
    }

    if materials.is_empty() {
        return Ok(());
    }
    let count = materials.keys().next_back().map_or(0, |last| last + 1);

    if apply_new_material_ids {
        let mut table = MaterialTable::new();
        for i in 0..count {
            table.add_material(
                materials
                    .remove(&i)
                    .unwrap_or_else(|| Material::new(format!("output_material_{}", i))),
            );
        }
        scene.materials.clear();
        scene.materials.copy_from(&table);
        scene.textures.clear();
        scene.textures.copy_from(&textures);
        for node in scene.mesh_nodes() {
            if let Some(g) = scene.geometry_mut(node) {
                g.material_ids = Some(vec![0; g.triangle_count()]);
            }
        }
    } else {
        for material in materials.into_values() {
            scene.materials.add_material(material);
        }
        for texture in textures.iter() {
            scene.textures.add_texture(texture.clone());
        }
    }
    log::debug!(
        "relinked {} outputs into {} materials, {} textures",
        outputs.len(),
        count,
        textures.len()
    );
    Ok(())
}
