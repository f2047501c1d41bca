//! MTL material library support
//!
//! Parsing is done by `tobj`; this module turns its materials into scene
//! materials and writes scene materials back out.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use lodcrate_core::{
    channels, BlendMode, Color, Material, Reporter, Result, ShadingNode, Texture, TextureTable,
};

use crate::error::IoError;
use crate::texture::load_image;

/// The file name is the last token; options such as `-bm 1.0` precede it
fn map_path(value: &str) -> Option<&str> {
    value.split_whitespace().last()
}

fn rgb(value: [f32; 3]) -> Color {
    Color::new(value[0], value[1], value[2], 1.0)
}

fn texture_name(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string()
}

/// Register a texture referenced by an MTL file, decoding it when it exists
fn register_texture(
    map: &str,
    base_dir: &Path,
    textures: &mut TextureTable,
    reporter: &Reporter,
) -> String {
    let name = texture_name(map);
    if textures.find(&name).is_some() {
        return name;
    }
    let resolved: PathBuf = base_dir.join(map);
    let mut texture = Texture::new(name.clone(), resolved.display().to_string());
    match load_image(&resolved) {
        Ok(image) => texture.image = Some(image),
        Err(e) => reporter.warning(
            "SceneImporter",
            "run",
            format!("texture '{}' could not be loaded: {}", resolved.display(), e),
        ),
    }
    textures.add_texture(texture);
    name
}

fn color_and_map(
    color: Option<Color>,
    map: Option<&str>,
    base_dir: &Path,
    textures: &mut TextureTable,
    reporter: &Reporter,
) -> Option<ShadingNode> {
    let texture = map.map(|m| ShadingNode::texture(register_texture(m, base_dir, textures, reporter), 0));
    match (texture, color) {
        (Some(t), Some(c)) if c != Color::new(1.0, 1.0, 1.0, 1.0) => {
            Some(ShadingNode::multiply(t, ShadingNode::Color(c)))
        }
        (Some(t), _) => Some(t),
        (None, Some(c)) => Some(ShadingNode::Color(c)),
        (None, None) => None,
    }
}

/// Build a scene material from a parsed MTL block, registering the
/// textures it references in `textures`
pub fn to_material(
    source: &tobj::Material,
    base_dir: &Path,
    textures: &mut TextureTable,
    reporter: &Reporter,
) -> Material {
    let extra = |key: &str| source.unknown_param.get(key).map(String::as_str);
    let mut material = Material::new(source.name.clone());

    let diffuse = color_and_map(
        source.diffuse.map(rgb),
        source.diffuse_texture.as_deref().and_then(map_path),
        base_dir,
        textures,
        reporter,
    )
    .unwrap_or_else(|| ShadingNode::color(1.0, 1.0, 1.0, 1.0));
    material.set_shading_network(channels::DIFFUSE, diffuse);

    if let Some(specular) = color_and_map(
        source.specular.map(rgb),
        source.specular_texture.as_deref().and_then(map_path),
        base_dir,
        textures,
        reporter,
    ) {
        material.set_shading_network(channels::SPECULAR, specular);
    }

    // `Tr` is transparency, the inverse of `d`
    let dissolve = source
        .dissolve
        .or_else(|| extra("Tr").and_then(|t| t.trim().parse::<f32>().ok()).map(|t| 1.0 - t));
    let dissolve_map = source.dissolve_texture.as_deref().and_then(map_path);
    if let Some(node) = color_and_map(
        dissolve.map(|d| Color::new(d, d, d, d)),
        dissolve_map,
        base_dir,
        textures,
        reporter,
    ) {
        material.set_shading_network(channels::OPACITY, node);
        material.blend_mode = if dissolve_map.is_none() && dissolve.is_some_and(|d| d >= 1.0) {
            BlendMode::Opaque
        } else {
            BlendMode::Blend
        };
    }

    let bump = source
        .normal_texture
        .as_deref()
        .or_else(|| extra("bump"))
        .or_else(|| extra("norm"))
        .and_then(map_path);
    if let Some(bump) = bump {
        let name = register_texture(bump, base_dir, textures, reporter);
        material.set_shading_network(channels::NORMALS, ShadingNode::texture(name, 0));
    }
    material
}

/// Split a channel network into its constant color and first texture
pub(crate) fn channel_parts<'a>(node: &'a ShadingNode) -> (Option<Color>, Option<&'a str>) {
    match node {
        ShadingNode::Color(c) => (Some(*c), None),
        ShadingNode::Texture { texture_name, .. } => (None, Some(texture_name.as_str())),
        ShadingNode::Multiply(a, b) => {
            let (ca, ta) = channel_parts(a);
            let (cb, tb) = channel_parts(b);
            (ca.or(cb), ta.or(tb))
        }
        other => (None, other.texture_names().first().copied()),
    }
}

fn texture_path(name: &str, textures: &TextureTable, mtl_dir: &Path) -> String {
    let path = textures
        .find(name)
        .map(|t| t.file_path.clone())
        .unwrap_or_else(|| format!("{}.png", name));
    let relative = Path::new(&path)
        .strip_prefix(mtl_dir)
        .ok()
        .map(|p| p.display().to_string());
    relative.unwrap_or(path)
}

/// Serialize materials as MTL text. Texture paths are written relative to `mtl_dir` when possible.
pub fn write_mtl(materials: &[&Material], textures: &TextureTable, mtl_dir: &Path) -> Result<String> {
    let mut out = String::new();
    let w = |e: std::fmt::Error| IoError::WriteError {
        message: e.to_string(),
    };
    for material in materials {
        writeln!(out, "newmtl {}", material.name).map_err(w)?;
        if let Some(node) = material.shading_network(channels::DIFFUSE) {
            let (color, map) = channel_parts(node);
            let c = color.unwrap_or_else(|| Color::new(1.0, 1.0, 1.0, 1.0));
            writeln!(out, "Kd {} {} {}", c.x, c.y, c.z).map_err(w)?;
            if let Some(map) = map {
                writeln!(out, "map_Kd {}", texture_path(map, textures, mtl_dir)).map_err(w)?;
            }
        }
        if let Some(node) = material.shading_network(channels::SPECULAR) {
            let (color, map) = channel_parts(node);
            if let Some(c) = color {
                writeln!(out, "Ks {} {} {}", c.x, c.y, c.z).map_err(w)?;
            }
            if let Some(map) = map {
                writeln!(out, "map_Ks {}", texture_path(map, textures, mtl_dir)).map_err(w)?;
            }
        }
        if let Some(node) = material.shading_network(channels::OPACITY) {
            let (color, map) = channel_parts(node);
            if let Some(c) = color {
                writeln!(out, "d {}", c.x).map_err(w)?;
            }
            if let Some(map) = map {
                writeln!(out, "map_d {}", texture_path(map, textures, mtl_dir)).map_err(w)?;
            }
        }
        if let Some(node) = material.shading_network(channels::NORMALS) {
            if let (_, Some(map)) = channel_parts(node) {
                writeln!(out, "map_Bump {}", texture_path(map, textures, mtl_dir)).map_err(w)?;
            }
        }
        writeln!(out).map_err(w)?;
    }
    Ok(out)
}
