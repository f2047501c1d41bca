//! Materials and shading networks
//!
//! A material maps channel names to a [`ShadingNode`] tree. Casters evaluate
//! the tree at a surface sample to get the channel value there.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::point::*;
use crate::texture::TextureTable;

/// Well-known channel names
pub mod channels {
    pub const DIFFUSE: &str = "Diffuse";
    pub const SPECULAR: &str = "Specular";
    pub const NORMALS: &str = "Normals";
    pub const OPACITY: &str = "Opacity";
    pub const EMISSIVE: &str = "Emissive";
    pub const ROUGHNESS: &str = "Roughness";
    pub const METALNESS: &str = "Metalness";
    pub const AMBIENT_OCCLUSION: &str = "AmbientOcclusion";
}

/// Node of a shading network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ShadingNode {
    Color(Color),
    Texture {
        texture_name: String,
        tex_coord_level: usize,
    },
    VertexColor {
        level: usize,
    },
    Multiply(Box<ShadingNode>, Box<ShadingNode>),
    Add(Box<ShadingNode>, Box<ShadingNode>),
    /// `a * (1 - t) + b * t`, component-wise
    Interpolate(Box<ShadingNode>, Box<ShadingNode>, Box<ShadingNode>),
    Clamp(Box<ShadingNode>, Color, Color),
}

/// Attribute values at a surface sample, used to evaluate a shading network
pub struct ShadingContext<'a> {
    pub tex_coords: &'a [Option<Vector2f>],
    pub vertex_colors: &'a [Option<Color>],
    pub textures: &'a TextureTable,
}

impl ShadingNode {
    pub fn color(r: f32, g: f32, b: f32, a: f32) -> Self {
        ShadingNode::Color(Color::new(r, g, b, a))
    }

    pub fn texture(texture_name: impl Into<String>, tex_coord_level: usize) -> Self {
        ShadingNode::Texture {
            texture_name: texture_name.into(),
            tex_coord_level,
        }
    }

    pub fn multiply(a: ShadingNode, b: ShadingNode) -> Self {
        ShadingNode::Multiply(Box::new(a), Box::new(b))
    }

    pub fn add(a: ShadingNode, b: ShadingNode) -> Self {
        ShadingNode::Add(Box::new(a), Box::new(b))
    }

    /// Evaluate to RGBA. Missing textures and attribute levels read as white.
    pub fn evaluate(&self, ctx: &ShadingContext<'_>) -> Color {
        match self {
            ShadingNode::Color(c) => *c,
            ShadingNode::Texture {
                texture_name,
                tex_coord_level,
            } => {
                let uv = ctx.tex_coords.get(*tex_coord_level).copied().flatten();
                let image = ctx.textures.find(texture_name).and_then(|t| t.image.as_ref());
                match (uv, image) {
                    (Some(uv), Some(image)) => image.sample_bilinear(uv),
                    _ => white(),
                }
            }
            ShadingNode::VertexColor { level } => ctx
                .vertex_colors
                .get(*level)
                .copied()
                .flatten()
                .unwrap_or_else(white),
            ShadingNode::Multiply(a, b) => a.evaluate(ctx).component_mul(&b.evaluate(ctx)),
            ShadingNode::Add(a, b) => a.evaluate(ctx) + b.evaluate(ctx),
            ShadingNode::Interpolate(a, b, t) => {
                let t = t.evaluate(ctx);
                let a = a.evaluate(ctx);
                let b = b.evaluate(ctx);
                a.component_mul(&(Color::repeat(1.0) - t)) + b.component_mul(&t)
            }
            ShadingNode::Clamp(node, min, max) => {
                let v = node.evaluate(ctx);
                v.sup(min).inf(max)
            }
        }
    }

    /// Names of every texture referenced by this network
    pub fn texture_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_textures(&mut names);
        names
    }

    fn collect_textures<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ShadingNode::Texture { texture_name, .. } => out.push(texture_name),
            ShadingNode::Multiply(a, b) | ShadingNode::Add(a, b) => {
                a.collect_textures(out);
                b.collect_textures(out);
            }
            ShadingNode::Interpolate(a, b, t) => {
                a.collect_textures(out);
                b.collect_textures(out);
                t.collect_textures(out);
            }
            ShadingNode::Clamp(node, _, _) => node.collect_textures(out),
            ShadingNode::Color(_) | ShadingNode::VertexColor { .. } => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Opaque,
    Blend,
    Mask,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    pub channels: BTreeMap<String, ShadingNode>,
    pub blend_mode: BlendMode,
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_material_channel(&mut self, channel: impl Into<String>) {
        self.channels
            .entry(channel.into())
            .or_insert(ShadingNode::Color(white()));
    }

    pub fn set_shading_network(&mut self, channel: impl Into<String>, node: ShadingNode) {
        self.channels.insert(channel.into(), node);
    }

    pub fn shading_network(&self, channel: &str) -> Option<&ShadingNode> {
        self.channels.get(channel)
    }

    pub fn has_material_channel(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaterialTable {
    materials: Vec<Material>,
}

impl MaterialTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_material(&mut self, material: Material) -> usize {
        self.materials.push(material);
        self.materials.len() - 1
    }

    pub fn material(&self, id: usize) -> Option<&Material> {
        self.materials.get(id)
    }

    pub fn material_mut(&mut self, id: usize) -> Option<&mut Material> {
        self.materials.get_mut(id)
    }

    pub fn find_id(&self, name: &str) -> Option<usize> {
        self.materials.iter().position(|m| m.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Material> {
        self.materials.iter()
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn clear(&mut self) {
        self.materials.clear();
    }

    pub fn copy_from(&mut self, other: &MaterialTable) {
        self.materials = other.materials.clone();
    }
}
