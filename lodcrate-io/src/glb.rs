//! glTF 2.0 scene support
//!
//! `.glb` files carry the document, geometry and images in one binary
//! container. A `.gltf` file is written as JSON with its buffer in a `.bin`
//! file next to it. The node hierarchy and local transforms are kept.
//!
//! glTF splits a vertex wherever one of its attributes changes. On import,
//! vertices of a mesh with identical positions are joined again and the
//! attributes become corner channels, so the surface stays connected.
//! glTF puts `v = 0` at the top of an image; scene texture coordinates put
//! it at the bottom, so `v` is flipped both ways.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use gltf::json;
use gltf::json::validation::Checked::Valid;
use gltf::json::validation::USize64;
use lodcrate_core::{
    channels, white, BlendMode, Color, GeometryData, ImageData, Material, NodeId, NodeKind,
    Point3f, Reporter, Result, Scene, ShadingNode, Texture, Transform3D, Vector2f, Vector3f,
};
use nalgebra::Matrix4;

use crate::error::IoError;
use crate::mtl::channel_parts;
use crate::texture::{encode_png, load_image};
use crate::{SceneReader, SceneWriter};

const SOURCE: &str = "SceneImporter";

fn image_data(data: &gltf::image::Data) -> Option<ImageData> {
    use gltf::image::Format;
    let stride = match data.format {
        Format::R8 => 1,
        Format::R8G8 => 2,
        Format::R8G8B8 => 3,
        Format::R8G8B8A8 => 4,
        _ => return None,
    };
    let pixels: Vec<Color> = data
        .pixels
        .chunks_exact(stride)
        .map(|p| {
            let c = |i: usize| p[i] as f32 / 255.0;
            match stride {
                1 => Color::new(c(0), c(0), c(0), 1.0),
                2 => Color::new(c(0), c(0), c(0), c(1)),
                3 => Color::new(c(0), c(1), c(2), 1.0),
                _ => Color::new(c(0), c(1), c(2), c(3)),
            }
        })
        .collect();
    let (width, height) = (data.width as usize, data.height as usize);
    (pixels.len() == width * height).then_some(ImageData {
        width,
        height,
        pixels,
    })
}

/// Register every document texture, returning scene texture names by glTF texture index
fn import_textures(
    document: &gltf::Document,
    images: &[gltf::image::Data],
    scene: &mut Scene,
    reporter: &Reporter,
) -> Vec<String> {
    document
        .textures()
        .map(|texture| {
            let source = texture.source();
            let name = texture
                .name()
                .or(source.name())
                .map(str::to_string)
                .unwrap_or_else(|| format!("texture_{}", texture.index()));
            if scene.textures.find(&name).is_some() {
                return name;
            }
            let file_path = match source.source() {
                gltf::image::Source::Uri { uri, .. } => uri.to_string(),
                gltf::image::Source::View { .. } => String::new(),
            };
            let mut entry = Texture::new(name.clone(), file_path);
            match images.get(source.index()).and_then(image_data) {
                Some(image) => entry.image = Some(image),
                None => reporter.warning(
                    SOURCE,
                    "run",
                    format!("texture '{}' has a pixel format that is not imported", name),
                ),
            }
            scene.textures.add_texture(entry);
            name
        })
        .collect()
}

fn import_material(material: &gltf::Material<'_>, texture_names: &[String]) -> Material {
    let name = material
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("material_{}", material.index().unwrap_or(0)));
    let mut out = Material::new(name);
    let texture = |index: usize, tex_coord: u32| {
        texture_names
            .get(index)
            .map(|name| ShadingNode::texture(name.clone(), tex_coord as usize))
    };

    let pbr = material.pbr_metallic_roughness();
    let [r, g, b, a] = pbr.base_color_factor();
    let factor = Color::new(r, g, b, a);
    let map = pbr
        .base_color_texture()
        .and_then(|info| texture(info.texture().index(), info.tex_coord()));
    let diffuse = match map {
        Some(map) if factor != white() => ShadingNode::multiply(map, ShadingNode::Color(factor)),
        Some(map) => map,
        None => ShadingNode::Color(factor),
    };
    out.set_shading_network(channels::DIFFUSE, diffuse);

    let metallic = pbr.metallic_factor();
    let roughness = pbr.roughness_factor();
    out.set_shading_network(
        channels::METALNESS,
        ShadingNode::color(metallic, metallic, metallic, 1.0),
    );
    out.set_shading_network(
        channels::ROUGHNESS,
        ShadingNode::color(roughness, roughness, roughness, 1.0),
    );

    if let Some(normal) = material
        .normal_texture()
        .and_then(|n| texture(n.texture().index(), n.tex_coord()))
    {
        out.set_shading_network(channels::NORMALS, normal);
    }
    let [er, eg, eb] = material.emissive_factor();
    if er > 0.0 || eg > 0.0 || eb > 0.0 {
        out.set_shading_network(channels::EMISSIVE, ShadingNode::color(er, eg, eb, 1.0));
    }
    if material.alpha_mode() == gltf::material::AlphaMode::Blend {
        out.set_shading_network(channels::OPACITY, ShadingNode::color(a, a, a, a));
        out.blend_mode = BlendMode::Blend;
    }
    out
}

struct Importer<'a> {
    buffers: &'a [gltf::buffer::Data],
    default_material: Option<usize>,
    reporter: &'a Reporter,
}

impl Importer<'_> {
    fn node(&self, node: gltf::Node<'_>, parent: NodeId, scene: &mut Scene) -> Result<()> {
        let name = node
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("node_{}", node.index()));
        let geometry = match node.mesh() {
            Some(mesh) => self.mesh(&mesh, &name)?,
            None => None,
        };
        let kind = geometry.map(NodeKind::Mesh).unwrap_or(NodeKind::Transform);
        let id = scene.create_child(parent, name, kind)?;
        if let Some(scene_node) = scene.node_mut(id) {
            scene_node.relative_transform = Transform3D {
                matrix: Matrix4::from(node.transform().matrix()),
            };
        }
        for child in node.children() {
            self.node(child, id, scene)?;
        }
        Ok(())
    }

    fn mesh(&self, mesh: &gltf::Mesh<'_>, name: &str) -> Result<Option<GeometryData>> {
        let mut coords = Vec::new();
        let mut joined: HashMap<[u32; 3], usize> = HashMap::new();
        let mut triangles = Vec::new();
        let mut materials = Vec::new();
        let mut normals: Vec<Option<Vector3f>> = Vec::new();
        let mut colors: Vec<Option<Color>> = Vec::new();
        let mut uvs: Vec<Vec<Option<Vector2f>>> = Vec::new();

        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                self.reporter.warning(
                    SOURCE,
                    "run",
                    format!(
                        "{}: skipped a {:?} primitive, only triangle lists are imported",
                        name,
                        primitive.mode()
                    ),
                );
                continue;
            }
            let reader = primitive.reader(|buffer| {
                self.buffers
                    .get(buffer.index())
                    .map(|data| data.0.as_slice())
            });
            let Some(positions) = reader.read_positions() else {
                continue;
            };
            let local: Vec<usize> = positions
                .map(|p| {
                    *joined.entry(p.map(f32::to_bits)).or_insert_with(|| {
                        coords.push(Point3f::new(p[0], p[1], p[2]));
                        coords.len() - 1
                    })
                })
                .collect();
            let corners: Vec<usize> = match reader.read_indices() {
                Some(indices) => indices.into_u32().map(|i| i as usize).collect(),
                None => (0..local.len()).collect(),
            };
            if let Some(bad) = corners.iter().find(|&&i| i >= local.len()) {
                return Err(IoError::InvalidFormat {
                    format: format!("glTF mesh '{}' uses vertex {} of {}", name, bad, local.len()),
                }
                .into());
            }
            let vertex_normals: Option<Vec<[f32; 3]>> = reader.read_normals().map(Iterator::collect);
            let vertex_colors: Option<Vec<[f32; 4]>> =
                reader.read_colors(0).map(|c| c.into_rgba_f32().collect());
            let mut sets: Vec<Vec<[f32; 2]>> = Vec::new();
            while let Some(set) = reader.read_tex_coords(sets.len() as u32) {
                sets.push(set.into_f32().collect());
            }
            while uvs.len() < sets.len() {
                uvs.push(vec![None; 3 * triangles.len()]);
            }
            let material = primitive
                .material()
                .index()
                .or(self.default_material)
                .unwrap_or(0);

            for tri in corners.chunks_exact(3) {
                triangles.push([local[tri[0]], local[tri[1]], local[tri[2]]]);
                materials.push(material);
                for &i in tri {
                    normals.push(
                        vertex_normals
                            .as_ref()
                            .and_then(|n| n.get(i))
                            .map(|n| Vector3f::new(n[0], n[1], n[2])),
                    );
                    colors.push(
                        vertex_colors
                            .as_ref()
                            .and_then(|c| c.get(i))
                            .map(|c| Color::new(c[0], c[1], c[2], c[3])),
                    );
                    for (set, channel) in uvs.iter_mut().enumerate() {
                        channel.push(
                            sets.get(set)
                                .and_then(|s| s.get(i))
                                .map(|t| Vector2f::new(t[0], 1.0 - t[1])),
                        );
                    }
                }
            }
        }
        if triangles.is_empty() {
            return Ok(None);
        }

        let mut geometry = GeometryData::from_coords_and_triangles(name, coords, triangles);
        for (level, channel) in uvs.iter().enumerate() {
            geometry.add_tex_coords(level)?;
            if let Some(dst) = geometry.tex_coords_mut(level) {
                for (d, uv) in dst.iter_mut().zip(channel) {
                    *d = uv.unwrap_or_else(Vector2f::zeros);
                }
            }
        }
        if normals.iter().any(Option::is_some) {
            geometry.normals = Some(normals.iter().map(|n| n.unwrap_or_else(Vector3f::z)).collect());
        }
        if colors.iter().any(Option::is_some) {
            geometry.colors = vec![Some(colors.iter().map(|c| c.unwrap_or_else(white)).collect())];
        }
        if self.default_material.is_some() {
            geometry.material_ids = Some(materials);
        }
        geometry.validate()?;
        Ok(Some(geometry))
    }
}

/// Reads `.glb` and `.gltf` files
pub struct GltfReader;

impl SceneReader for GltfReader {
    fn read_scene<P: AsRef<Path>>(path: P, reporter: &Reporter) -> Result<Scene> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(IoError::FileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let (document, buffers, images) = gltf::import(path).map_err(IoError::from)?;
        let mut scene = Scene::new();
        let texture_names = import_textures(&document, &images, &mut scene, reporter);
        for material in document.materials() {
            scene
                .materials
                .add_material(import_material(&material, &texture_names));
        }
        let unassigned = document
            .meshes()
            .flat_map(|mesh| mesh.primitives())
            .any(|p| p.material().index().is_none());
        let default_material = match (scene.materials.is_empty(), unassigned) {
            (true, _) => None,
            (false, false) => Some(0),
            (false, true) => Some(scene.materials.add_material(Material::new("default"))),
        };

        let roots: Vec<gltf::Node<'_>> =
            match document.default_scene().or_else(|| document.scenes().next()) {
                Some(s) => s.nodes().collect(),
                None => {
                    let children: HashSet<usize> = document
                        .nodes()
                        .flat_map(|n| n.children().map(|c| c.index()))
                        .collect();
                    document
                        .nodes()
                        .filter(|n| !children.contains(&n.index()))
                        .collect()
                }
            };
        let importer = Importer {
            buffers: &buffers,
            default_material,
            reporter,
        };
        let root = scene.root();
        for node in roots {
            importer.node(node, root, &mut scene)?;
        }
        log::info!(
            "read {} meshes, {} materials and {} textures from {}",
            scene.mesh_nodes().len(),
            scene.materials.len(),
            scene.textures.len(),
            path.display()
        );
        Ok(scene)
    }
}

type TextureIndices = HashMap<String, json::Index<json::Texture>>;

/// Builds a glTF document and its binary buffer from a scene
struct Exporter {
    root: json::Root,
    bin: Vec<u8>,
}

impl Exporter {
    fn new() -> Self {
        let mut root = json::Root::default();
        root.push(json::Buffer {
            byte_length: USize64(0),
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            uri: None,
        });
        Self {
            root,
            bin: Vec::new(),
        }
    }

    /// Append bytes to the buffer. Views start on four byte boundaries.
    fn view(
        &mut self,
        data: &[u8],
        target: Option<json::buffer::Target>,
    ) -> json::Index<json::buffer::View> {
        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }
        let offset = self.bin.len();
        self.bin.extend_from_slice(data);
        self.root.push(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: USize64::from(data.len()),
            byte_offset: Some(USize64::from(offset)),
            byte_stride: None,
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            target: target.map(Valid),
        })
    }

    fn accessor(
        &mut self,
        view: json::Index<json::buffer::View>,
        count: usize,
        component: json::accessor::ComponentType,
        type_: json::accessor::Type,
        bounds: Option<(Vec<f32>, Vec<f32>)>,
    ) -> json::Index<json::Accessor> {
        let (min, max) = match bounds {
            Some((min, max)) => (Some(json::Value::from(min)), Some(json::Value::from(max))),
            None => (None, None),
        };
        self.root.push(json::Accessor {
            buffer_view: Some(view),
            byte_offset: None,
            count: USize64::from(count),
            component_type: Valid(json::accessor::GenericComponentType(component)),
            extensions: Default::default(),
            extras: Default::default(),
            type_: Valid(type_),
            min,
            max,
            name: None,
            normalized: false,
            sparse: None,
        })
    }

    fn floats<const N: usize>(
        &mut self,
        values: &[[f32; N]],
        type_: json::accessor::Type,
        bounded: bool,
    ) -> json::Index<json::Accessor> {
        let data: Vec<u8> = values
            .iter()
            .flatten()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let view = self.view(&data, Some(json::buffer::Target::ArrayBuffer));
        let bounds = bounded.then(|| {
            let mut min = vec![f32::INFINITY; N];
            let mut max = vec![f32::NEG_INFINITY; N];
            for value in values {
                for ((lo, hi), &x) in min.iter_mut().zip(max.iter_mut()).zip(value) {
                    *lo = lo.min(x);
                    *hi = hi.max(x);
                }
            }
            (min, max)
        });
        self.accessor(view, values.len(), json::accessor::ComponentType::F32, type_, bounds)
    }

    fn indices(&mut self, values: &[u32]) -> json::Index<json::Accessor> {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let view = self.view(&data, Some(json::buffer::Target::ElementArrayBuffer));
        self.accessor(
            view,
            values.len(),
            json::accessor::ComponentType::U32,
            json::accessor::Type::Scalar,
            None,
        )
    }

    /// Embed every texture with pixels as PNG. Textures only known by path are read from disk.
    fn textures(&mut self, scene: &Scene) -> Result<TextureIndices> {
        let mut out = HashMap::new();
        for texture in scene.textures.iter() {
            let loaded;
            let image = match &texture.image {
                Some(image) => image,
                None => match load_image(&texture.file_path) {
                    Ok(image) => {
                        loaded = image;
                        &loaded
                    }
                    Err(e) => {
                        log::warn!("texture '{}' is not embedded: {}", texture.name, e);
                        continue;
                    }
                },
            };
            let png = encode_png(image)?;
            let view = self.view(&png, None);
            let source = self.root.push(json::Image {
                buffer_view: Some(view),
                mime_type: Some(json::image::MimeType("image/png".to_string())),
                name: Some(texture.name.clone()),
                uri: None,
                extensions: Default::default(),
                extras: Default::default(),
            });
            let index = self.root.push(json::Texture {
                name: Some(texture.name.clone()),
                sampler: None,
                source,
                extensions: Default::default(),
                extras: Default::default(),
            });
            out.insert(texture.name.clone(), index);
        }
        Ok(out)
    }

    fn material(
        &mut self,
        material: &Material,
        textures: &TextureIndices,
    ) -> json::Index<json::Material> {
        let parts = |channel: &str| {
            material
                .shading_network(channel)
                .map(channel_parts)
                .unwrap_or((None, None))
        };
        let lookup = |map: Option<&str>| map.and_then(|name| textures.get(name)).copied();

        let (color, map) = parts(channels::DIFFUSE);
        let mut base = color.unwrap_or_else(white);
        let blend = material.blend_mode == BlendMode::Blend;
        if let (Some(opacity), _) = parts(channels::OPACITY) {
            base.w = opacity.x;
        }
        let mut pbr = json::material::PbrMetallicRoughness {
            base_color_factor: json::material::PbrBaseColorFactor([base.x, base.y, base.z, base.w]),
            base_color_texture: lookup(map).map(|index| json::texture::Info {
                index,
                tex_coord: 0,
                extensions: Default::default(),
                extras: Default::default(),
            }),
            ..Default::default()
        };
        pbr.metallic_factor =
            json::material::StrengthFactor(parts(channels::METALNESS).0.map_or(0.0, |c| c.x));
        pbr.roughness_factor =
            json::material::StrengthFactor(parts(channels::ROUGHNESS).0.map_or(1.0, |c| c.x));
        let normal_texture = lookup(parts(channels::NORMALS).1).map(|index| {
            json::material::NormalTexture {
                index,
                scale: 1.0,
                tex_coord: 0,
                extensions: Default::default(),
                extras: Default::default(),
            }
        });
        let emissive = parts(channels::EMISSIVE)
            .0
            .map_or([0.0; 3], |c| [c.x, c.y, c.z]);

        self.root.push(json::Material {
            name: Some(material.name.clone()),
            alpha_mode: Valid(if blend {
                json::material::AlphaMode::Blend
            } else {
                json::material::AlphaMode::Opaque
            }),
            pbr_metallic_roughness: pbr,
            normal_texture,
            emissive_factor: json::material::EmissiveFactor(emissive),
            ..Default::default()
        })
    }

    /// One primitive per material. Corners that agree on every attribute share a vertex.
    fn mesh(
        &mut self,
        name: &str,
        geometry: &GeometryData,
        material_count: usize,
    ) -> json::Index<json::Mesh> {
        let levels: Vec<usize> = geometry.tex_coord_levels().collect();
        let colors = geometry.colors(0);
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for t in 0..geometry.triangle_count() {
            groups.entry(geometry.material_id(t)).or_default().push(t);
        }

        let mut primitives = Vec::with_capacity(groups.len());
        for (material, group) in groups {
            let mut keys: HashMap<Vec<u32>, u32> = HashMap::new();
            let mut positions: Vec<[f32; 3]> = Vec::new();
            let mut normals: Vec<[f32; 3]> = Vec::new();
            let mut vertex_colors: Vec<[f32; 4]> = Vec::new();
            let mut uvs: Vec<Vec<[f32; 2]>> = vec![Vec::new(); levels.len()];
            let mut indices = Vec::with_capacity(group.len() * 3);

            for t in group {
                for (k, &v) in geometry.triangles[t].iter().enumerate() {
                    let corner = 3 * t + k;
                    let normal = geometry.normals.as_ref().map(|n| n[corner]);
                    let color = colors.map(|c| c[corner]);
                    let uv: Vec<Vector2f> = levels
                        .iter()
                        .filter_map(|&level| geometry.tex_coords(level).map(|c| c[corner]))
                        .collect();
                    let mut key = vec![v as u32];
                    key.extend(normal.iter().flat_map(|n| n.iter()).map(|x| x.to_bits()));
                    key.extend(color.iter().flat_map(|c| c.iter()).map(|x| x.to_bits()));
                    key.extend(uv.iter().flat_map(|t| t.iter()).map(|x| x.to_bits()));

                    let index = match keys.get(&key) {
                        Some(&index) => index,
                        None => {
                            let index = positions.len() as u32;
                            let p = geometry.coords[v];
                            positions.push([p.x, p.y, p.z]);
                            if let Some(n) = normal {
                                normals.push([n.x, n.y, n.z]);
                            }
                            if let Some(c) = color {
                                vertex_colors.push([c.x, c.y, c.z, c.w]);
                            }
                            for (channel, t) in uvs.iter_mut().zip(&uv) {
                                channel.push([t.x, 1.0 - t.y]);
                            }
                            keys.insert(key, index);
                            index
                        }
                    };
                    indices.push(index);
                }
            }

            let mut attributes = BTreeMap::new();
            attributes.insert(
                Valid(json::mesh::Semantic::Positions),
                self.floats(&positions, json::accessor::Type::Vec3, true),
            );
            if !normals.is_empty() {
                attributes.insert(
                    Valid(json::mesh::Semantic::Normals),
                    self.floats(&normals, json::accessor::Type::Vec3, false),
                );
            }
            if !vertex_colors.is_empty() {
                attributes.insert(
                    Valid(json::mesh::Semantic::Colors(0)),
                    self.floats(&vertex_colors, json::accessor::Type::Vec4, false),
                );
            }
            for (set, channel) in uvs.iter().enumerate() {
                attributes.insert(
                    Valid(json::mesh::Semantic::TexCoords(set as u32)),
                    self.floats(channel, json::accessor::Type::Vec2, false),
                );
            }
            let indices = self.indices(&indices);
            primitives.push(json::mesh::Primitive {
                attributes,
                extensions: Default::default(),
                extras: Default::default(),
                indices: Some(indices),
                material: (material < material_count).then(|| json::Index::new(material as u32)),
                mode: Valid(json::mesh::Mode::Triangles),
                targets: None,
            });
        }

        self.root.push(json::Mesh {
            extensions: Default::default(),
            extras: Default::default(),
            name: Some(name.to_string()),
            primitives,
            weights: None,
        })
    }

    fn node(
        &mut self,
        scene: &Scene,
        id: NodeId,
        parent_matrix: Matrix4<f32>,
        material_count: usize,
    ) -> Option<json::Index<json::Node>> {
        let node = scene.node(id)?;
        let children: Vec<json::Index<json::Node>> = node
            .children
            .iter()
            .filter_map(|&child| self.node(scene, child, Matrix4::identity(), material_count))
            .collect();
        let mesh = match &node.kind {
            NodeKind::Mesh(geometry) if geometry.triangle_count() > 0 => {
                Some(self.mesh(&node.name, geometry, material_count))
            }
            _ => None,
        };
        let local = parent_matrix * node.relative_transform.matrix;
        let matrix = (local != Matrix4::identity()).then(|| {
            let mut flat = [0.0f32; 16];
            flat.copy_from_slice(local.as_slice());
            flat
        });
        Some(self.root.push(json::Node {
            name: Some(node.name.clone()),
            mesh,
            matrix,
            children: (!children.is_empty()).then_some(children),
            ..Default::default()
        }))
    }

    fn build(mut self, scene: &Scene) -> Result<(json::Root, Vec<u8>)> {
        let textures = self.textures(scene)?;
        for material in scene.materials.iter() {
            self.material(material, &textures);
        }
        let material_count = scene.materials.len();
        let root = scene.root();
        let root_matrix = scene
            .node(root)
            .map(|n| n.relative_transform.matrix)
            .unwrap_or_else(Matrix4::identity);
        let top: Vec<NodeId> = scene.node(root).map(|n| n.children.clone()).unwrap_or_default();
        let nodes: Vec<json::Index<json::Node>> = top
            .into_iter()
            .filter_map(|id| self.node(scene, id, root_matrix, material_count))
            .collect();
        let index = self.root.push(json::Scene {
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            nodes,
        });
        self.root.scene = Some(index);

        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }
        if let Some(buffer) = self.root.buffers.first_mut() {
            buffer.byte_length = USize64::from(self.bin.len());
        }
        Ok((self.root, self.bin))
    }
}

fn write_err(e: impl std::fmt::Display) -> IoError {
    IoError::WriteError {
        message: e.to_string(),
    }
}

/// Writes `.glb` containers, or `.gltf` JSON with a side `.bin` buffer
pub struct GltfWriter;

impl SceneWriter for GltfWriter {
    fn write_scene<P: AsRef<Path>>(scene: &Scene, path: P) -> Result<()> {
        let path = path.as_ref();
        let (mut root, bin) = Exporter::new().build(scene)?;
        let binary = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("glb"));

        if binary {
            let mut json = json::serialize::to_vec(&root).map_err(write_err)?;
            while json.len() % 4 != 0 {
                json.push(b' ');
            }
            let length = 12 + 8 + json.len() + if bin.is_empty() { 0 } else { 8 + bin.len() };
            let glb = gltf::binary::Glb {
                header: gltf::binary::Header {
                    magic: *b"glTF",
                    version: 2,
                    length: u32::try_from(length).map_err(write_err)?,
                },
                json: Cow::Owned(json),
                bin: (!bin.is_empty()).then_some(Cow::Owned(bin)),
            };
            let file = fs::File::create(path).map_err(IoError::from)?;
            glb.to_writer(std::io::BufWriter::new(file))
                .map_err(IoError::from)?;
        } else {
            let bin_path = path.with_extension("bin");
            let bin_name = bin_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("scene.bin")
                .to_string();
            if let Some(buffer) = root.buffers.first_mut() {
                buffer.uri = Some(bin_name);
            }
            fs::write(&bin_path, &bin).map_err(IoError::from)?;
            let json = json::serialize::to_string_pretty(&root).map_err(write_err)?;
            fs::write(path, json).map_err(IoError::from)?;
        }
        log::info!(
            "wrote {} meshes and {} materials to {}",
            scene.mesh_nodes().len(),
            scene.materials.len(),
            path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("lodcrate_gltf_{}_{}", std::process::id(), name))
    }

    fn two_material_quad() -> Scene {
        let mut scene = Scene::new();
        let mut g = GeometryData::from_coords_and_triangles(
            "Quad",
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(1.0, 1.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        );
        g.material_ids = Some(vec![0, 1]);
        scene.create_child_mesh(scene.root(), g).unwrap();
        let mut red = Material::new("Red");
        red.set_shading_network(channels::DIFFUSE, ShadingNode::color(1.0, 0.0, 0.0, 1.0));
        scene.materials.add_material(red);
        scene.materials.add_material(Material::new("Plain"));
        scene
    }

    #[test]
    fn test_one_primitive_per_material() {
        let (root, bin) = Exporter::new().build(&two_material_quad()).unwrap();
        assert_eq!(root.meshes.len(), 1);
        assert_eq!(root.meshes[0].primitives.len(), 2);
        assert_eq!(root.materials.len(), 2);
        assert_eq!(bin.len() % 4, 0);
        assert_eq!(root.buffers[0].byte_length.0, bin.len() as u64);
        let [r, g, b, _] = root.materials[0].pbr_metallic_roughness.base_color_factor.0;
        assert_eq!([r, g, b], [1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_shared_position_is_joined_on_import() {
        let path = temp_path("joined.glb");
        let mut scene = two_material_quad();
        let mesh = scene.mesh_nodes()[0];
        // distinct UVs on the diagonal split those vertices in the file
        let g = scene.geometry_mut(mesh).unwrap();
        g.set_tex_coords(0, &[0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.5, 0.5, 0.9, 0.9, 0.0, 1.0])
            .unwrap();
        GltfWriter::write_scene(&scene, &path).unwrap();

        let reporter = Reporter::new();
        let loaded = GltfReader::read_scene(&path, &reporter).unwrap();
        let g = loaded.geometry(loaded.mesh_nodes()[0]).unwrap();
        assert_eq!(g.vertex_count(), 4);
        assert_eq!(g.triangle_count(), 2);
        assert_eq!(g.material_ids.as_deref(), Some(&[0, 1][..]));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file() {
        let reporter = Reporter::new();
        assert!(matches!(
            GltfReader::read_scene(temp_path("nothing.glb"), &reporter),
            Err(lodcrate_core::Error::NotFound(_))
        ));
    }
}
