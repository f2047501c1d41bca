//! Shared setup for the demo binaries: stderr logging, log draining and
//! procedural input assets written to `output/`.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use lodcrate_core::{
    channels, check_log, Color, GeometryData, ImageData, LogPolicy, Material, NodeKind, Point3f, QuadFlag, Reporter,
    Scene, ShadingNode, Texture, Transform3D, Vector3f,
};
use lodcrate_io::write_scene;
use log::{LevelFilter, Log, Metadata, Record};

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{:<5} {}] {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

/// Install the stderr logger. `LODCRATE_LOG` picks the level (`info` if unset).
pub fn init_logging() {
    let level = std::env::var("LODCRATE_LOG")
        .ok()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

pub fn output_dir() -> anyhow::Result<PathBuf> {
    let dir = PathBuf::from("output");
    fs::create_dir_all(&dir).context("failed to create output directory")?;
    Ok(dir)
}

/// Drain and print the reporter's errors and warnings
pub fn print_log(reporter: &Reporter, policy: LogPolicy) -> anyhow::Result<()> {
    println!("Check log for any warnings or errors.");
    let drained = check_log(reporter, policy)?;
    if drained.errors.is_empty() {
        println!("No errors.");
    } else {
        println!("Errors:");
        for message in &drained.errors {
            println!("{}", message);
        }
    }
    if drained.warnings.is_empty() {
        println!("No warnings.");
    } else {
        println!("Warnings:");
        for message in &drained.warnings {
            println!("{}", message);
        }
    }
    Ok(())
}

/// Write `scene` as `output/<name>_Input.obj` and return the path
pub fn write_input(scene: &Scene, name: &str) -> anyhow::Result<PathBuf> {
    let path = output_dir()?.join(format!("{}_Input.obj", name));
    write_scene(scene, &path).with_context(|| format!("failed to save {}", path.display()))?;
    Ok(path)
}

pub fn checker_image(size: usize, cells: usize, a: Color, b: Color) -> ImageData {
    let mut image = ImageData::new(size, size);
    let cell = (size / cells.max(1)).max(1);
    for y in 0..size {
        for x in 0..size {
            image.set(x, y, if (x / cell + y / cell) % 2 == 0 { a } else { b });
        }
    }
    image
}

/// Axis-aligned box of size `extent`, every face split into `n x n` quads
/// with its own 0..1 UV square. Quads are flagged, so exports keep them.
pub fn subdivided_box(name: &str, extent: Vector3f, n: usize) -> GeometryData {
    let faces: [(Vector3f, Vector3f, Vector3f); 6] = [
        (Vector3f::new(0.0, 0.0, 1.0), Vector3f::x(), Vector3f::y()),
        (Vector3f::new(1.0, 0.0, 0.0), -Vector3f::x(), Vector3f::y()),
        (Vector3f::new(1.0, 0.0, 1.0), Vector3f::new(0.0, 0.0, -1.0), Vector3f::y()),
        (Vector3f::new(0.0, 0.0, 0.0), Vector3f::z(), Vector3f::y()),
        (Vector3f::new(0.0, 1.0, 1.0), Vector3f::x(), Vector3f::new(0.0, 0.0, -1.0)),
        (Vector3f::new(0.0, 0.0, 0.0), Vector3f::x(), Vector3f::z()),
    ];
    let mut coords = Vec::new();
    let mut triangles = Vec::new();
    let mut uvs = Vec::new();
    let mut flags = Vec::new();
    for (origin, u_axis, v_axis) in faces {
        let base = coords.len();
        for j in 0..=n {
            for i in 0..=n {
                let (u, v) = (i as f32 / n as f32, j as f32 / n as f32);
                let p = origin + u_axis * u + v_axis * v;
                coords.push(Point3f::new(p.x * extent.x, p.y * extent.y, p.z * extent.z));
            }
        }
        let id = |i: usize, j: usize| base + j * (n + 1) + i;
        for j in 0..n {
            for i in 0..n {
                for tri in [[(i, j), (i + 1, j), (i + 1, j + 1)], [(i, j), (i + 1, j + 1), (i, j + 1)]] {
                    triangles.push(tri.map(|(a, b)| id(a, b)));
                    for (a, b) in tri {
                        uvs.extend([a as f32 / n as f32, b as f32 / n as f32]);
                    }
                }
                flags.extend([QuadFlag::FirstOfQuad, QuadFlag::SecondOfQuad]);
            }
        }
    }
    let mut geometry = GeometryData::from_coords_and_triangles(name, coords, triangles);
    if let Err(e) = geometry.set_tex_coords(0, &uvs) {
        log::warn!("{}: {}", name, e);
    }
    geometry.add_material_ids();
    geometry.quad_flags = Some(flags);
    geometry
}

fn checker_material(scene: &mut Scene, name: &str, image: ImageData) -> usize {
    let texture = format!("{}Texture", name);
    scene
        .textures
        .add_texture(Texture::new(texture.clone(), format!("{}.png", texture)).with_image(image));
    let mut material = Material::new(name);
    material.set_shading_network(channels::DIFFUSE, ShadingNode::texture(texture, 0));
    scene.materials.add_material(material)
}

/// Two textured crates and a plain pallet under a `Crates` group node
pub fn crates_scene() -> anyhow::Result<Scene> {
    let mut scene = Scene::new();
    let wood = checker_material(
        &mut scene,
        "Wood",
        checker_image(128, 8, Color::new(0.55, 0.35, 0.15, 1.0), Color::new(0.35, 0.2, 0.08, 1.0)),
    );
    let metal = checker_material(
        &mut scene,
        "Metal",
        checker_image(64, 2, Color::new(0.7, 0.7, 0.75, 1.0), Color::new(0.4, 0.4, 0.45, 1.0)),
    );
    let mut painted = Material::new("Painted");
    painted.set_shading_network(channels::DIFFUSE, ShadingNode::color(0.1, 0.4, 0.8, 1.0));
    let painted = scene.materials.add_material(painted);

    let root = scene.root();
    let group = scene.create_child(root, "Crates", NodeKind::Transform)?;

    let mut big = subdivided_box("BigCrate", Vector3f::new(1.0, 1.0, 1.0), 8);
    big.material_ids = Some(vec![wood; big.triangle_count()]);
    scene.create_child_mesh(group, big)?;

    let mut small = subdivided_box("SmallCrate", Vector3f::new(0.5, 0.5, 0.5), 6);
    small.material_ids = Some(vec![metal; small.triangle_count()]);
    let small = scene.create_child_mesh(group, small)?;
    if let Some(node) = scene.node_mut(small) {
        node.relative_transform = Transform3D::translation(Vector3f::new(1.3, 0.0, 0.2))
            * Transform3D::rotation(30.0, Vector3f::y());
    }

    let mut pallet = subdivided_box("Pallet", Vector3f::new(2.2, 0.1, 1.4), 4);
    pallet.material_ids = Some(vec![painted; pallet.triangle_count()]);
    let pallet = scene.create_child_mesh(root, pallet)?;
    if let Some(node) = scene.node_mut(pallet) {
        node.relative_transform = Transform3D::translation(Vector3f::new(-0.3, -0.1, -0.2));
    }
    Ok(scene)
}

/// A trunk with crossed leaf cards; leaves are alpha-masked
pub fn foliage_scene() -> anyhow::Result<Scene> {
    let mut scene = Scene::new();
    let mut leaf_image = ImageData::new(32, 32);
    for y in 0..32 {
        for x in 0..32 {
            let (dx, dy) = (x as f32 - 15.5, y as f32 - 15.5);
            let inside = dx * dx / 200.0 + dy * dy / 90.0 <= 1.0;
            let alpha = if inside { 1.0 } else { 0.0 };
            leaf_image.set(x, y, Color::new(0.2, 0.5 + dx.abs() / 64.0, 0.15, alpha));
        }
    }
    let leaves = checker_material(&mut scene, "Leaves", leaf_image);
    if let Some(material) = scene.materials.material_mut(leaves) {
        material.set_shading_network(channels::OPACITY, ShadingNode::texture("LeavesTexture", 0));
    }
    let mut bark = Material::new("Bark");
    bark.set_shading_network(channels::DIFFUSE, ShadingNode::color(0.3, 0.2, 0.1, 1.0));
    let bark = scene.materials.add_material(bark);

    let root = scene.root();
    let mut trunk = subdivided_box("Trunk", Vector3f::new(0.2, 2.0, 0.2), 2);
    trunk.material_ids = Some(vec![bark; trunk.triangle_count()]);
    let trunk = scene.create_child_mesh(root, trunk)?;
    if let Some(node) = scene.node_mut(trunk) {
        node.relative_transform = Transform3D::translation(Vector3f::new(-0.1, 0.0, -0.1));
    }

    let mut cards = GeometryData::new("LeafCards");
    for k in 0..12 {
        let angle = k as f32 * 137.5;
        let height = 1.0 + 0.08 * k as f32;
        let mut card = GeometryData::from_coords_and_triangles(
            "card",
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(0.6, 0.0, 0.0),
                Point3f::new(0.6, 0.35, 0.0),
                Point3f::new(0.0, 0.35, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        );
        card.set_tex_coords(0, &[0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0])?;
        card.material_ids = Some(vec![leaves; 2]);
        let placement = Transform3D::rotation(angle, Vector3f::y())
            * Transform3D::translation(Vector3f::new(0.1, height, 0.0))
            * Transform3D::rotation(-25.0, Vector3f::x());
        cards.append(&card, &placement, 0);
    }
    scene.create_child_mesh(root, cards)?;
    Ok(scene)
}

/// Curved floor tiles that share exact border positions with their
/// neighbours but differ inside
pub fn modular_assets_scene() -> anyhow::Result<Scene> {
    fn height(x: f32, y: f32) -> f32 {
        (x * 2.0).sin() * (y * 3.0).cos() * 0.2
    }
    let tiles = [("TileA", 0.0, 0.0, 0.3), ("TileB", 1.0, 0.0, -0.2), ("TileC", 0.0, 1.0, 0.5), ("TileD", 1.0, 1.0, 0.1)];
    let n = 10;
    let mut scene = Scene::new();
    let root = scene.root();
    for (name, x0, y0, bump) in tiles {
        let mut coords = Vec::new();
        for j in 0..=n {
            for i in 0..=n {
                let (u, v) = (i as f32 / n as f32, j as f32 / n as f32);
                let (x, y) = (x0 + u, y0 + v);
                coords.push(Point3f::new(
                    x,
                    y,
                    height(x, y) + bump * 16.0 * u * (1.0 - u) * v * (1.0 - v),
                ));
            }
        }
        let mut triangles = Vec::new();
        for j in 0..n {
            for i in 0..n {
                let v = j * (n + 1) + i;
                triangles.push([v, v + 1, v + n + 1]);
                triangles.push([v + 1, v + n + 2, v + n + 1]);
            }
        }
        scene.create_child_mesh(root, GeometryData::from_coords_and_triangles(name, coords, triangles))?;
    }
    Ok(scene)
}
