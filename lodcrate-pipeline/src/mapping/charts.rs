//! Texture coordinate generation for output atlases
//!
//! Both generators produce charts: groups of triangles with 2D corner
//! coordinates. The chart aggregator takes them from existing UVs, the
//! parameterizer from planar projection along the dominant normal axis.
//! Charts are then shelf-packed into the output texture with a gutter.

use std::collections::HashMap;

use itertools::Itertools;
use lodcrate_core::{Error, GeometryData, Result, Vector2f};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, RTreeObject};

use super::{ChartAggregatorMode, MappingImageSettings, OutputMaterialSettings, TexCoordGenerator};

/// Outcome of [`generate_tex_coords`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChartLayout {
    pub chart_count: usize,
    /// Blocks actually packed; overlapping charts may share one
    pub block_count: usize,
    /// Output texels per chart unit
    pub texels_per_unit: f32,
}

struct Chart {
    geometry: usize,
    triangles: Vec<usize>,
    /// Three coordinates per triangle, in `triangles` order
    corners: Vec<Vector2f>,
    surface_area: f32,
}

impl Chart {
    fn bounds(&self) -> (Vector2f, Vector2f) {
        self.corners.iter().fold(
            (Vector2f::repeat(f32::MAX), Vector2f::repeat(f32::MIN)),
            |(min, max), c| (min.inf(c), max.sup(c)),
        )
    }

    fn uv_area(&self) -> f32 {
        self.corners
            .chunks_exact(3)
            .map(|c| {
                let (e1, e2) = (c[1] - c[0], c[2] - c[0]);
                (e1.x * e2.y - e1.y * e2.x).abs() * 0.5
            })
            .sum()
    }
}

/// Charts moved and scaled together
struct Block {
    charts: Vec<usize>,
    min: Vector2f,
    size: Vector2f,
    scale: f32,
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }

    /// Members of every set, ordered by their smallest member
    fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: HashMap<usize, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for i in 0..self.parent.len() {
            let root = self.find(i);
            let slot = *by_root.entry(root).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(i);
        }
        groups
    }
}

/// Planar basis for each dominant axis, chosen so `u x v` is the axis
fn project_on_axis(class: usize, p: &lodcrate_core::Point3f) -> Vector2f {
    match class {
        0 => Vector2f::new(p.y, p.z),
        1 => Vector2f::new(p.z, p.y),
        2 => Vector2f::new(p.z, p.x),
        3 => Vector2f::new(p.x, p.z),
        4 => Vector2f::new(p.x, p.y),
        _ => Vector2f::new(p.y, p.x),
    }
}

fn dominant_axis(n: &lodcrate_core::Vector3f) -> usize {
    let abs = n.abs();
    let axis = if abs.x >= abs.y && abs.x >= abs.z {
        0
    } else if abs.y >= abs.z {
        1
    } else {
        2
    };
    axis * 2 + usize::from(n[axis] < 0.0)
}

fn planar_charts(g: &GeometryData, index: usize, triangles: &[usize], charts: &mut Vec<Chart>) {
    let classes: HashMap<usize, usize> = triangles.iter().map(|&t| (t, dominant_axis(&g.face_normal(t)))).collect();
    let mut sets = DisjointSet::new(triangles.len());
    let mut edges: HashMap<(usize, usize), usize> = HashMap::new();
    for (i, &t) in triangles.iter().enumerate() {
        let tri = g.triangles[t];
        for k in 0..3 {
            let (a, b) = (tri[k], tri[(k + 1) % 3]);
            let key = (a.min(b), a.max(b));
            match edges.get(&key) {
                Some(&j) if classes[&triangles[j]] == classes[&t] => sets.union(i, j),
                Some(_) => {}
                None => {
                    edges.insert(key, i);
                }
            }
        }
    }
    for members in sets.groups() {
        let tris: Vec<usize> = members.iter().map(|&i| triangles[i]).collect();
        let class = classes[&tris[0]];
        let corners = tris
            .iter()
            .flat_map(|&t| g.triangles[t].map(|v| project_on_axis(class, &g.coords[v])))
            .collect();
        let surface_area = tris.iter().map(|&t| g.triangle_area(t)).sum();
        charts.push(Chart {
            geometry: index,
            triangles: tris,
            corners,
            surface_area,
        });
    }
}

fn uv_charts(g: &GeometryData, index: usize, level: usize, charts: &mut Vec<Chart>) -> Vec<usize> {
    let Some(uv) = g.tex_coords(level) else {
        return (0..g.triangle_count()).collect();
    };
    let mut sets = DisjointSet::new(g.triangle_count());
    let mut edges: HashMap<(usize, usize, [u32; 4]), usize> = HashMap::new();
    for (t, tri) in g.triangles.iter().enumerate() {
        for k in 0..3 {
            let (ka, kb) = (k, (k + 1) % 3);
            let (ka, kb) = if tri[ka] <= tri[kb] { (ka, kb) } else { (kb, ka) };
            let (ca, cb) = (t * 3 + ka, t * 3 + kb);
            let key = (
                tri[ka],
                tri[kb],
                [uv[ca].x.to_bits(), uv[ca].y.to_bits(), uv[cb].x.to_bits(), uv[cb].y.to_bits()],
            );
            match edges.get(&key) {
                Some(&other) => sets.union(t, other),
                None => {
                    edges.insert(key, t);
                }
            }
        }
    }

    let mut degenerate = Vec::new();
    for triangles in sets.groups() {
        let corners = triangles.iter().flat_map(|&t| [uv[t * 3], uv[t * 3 + 1], uv[t * 3 + 2]]).collect();
        let surface_area = triangles.iter().map(|&t| g.triangle_area(t)).sum();
        let chart = Chart {
            geometry: index,
            triangles,
            corners,
            surface_area,
        };
        if chart.uv_area() < 1e-12 {
            degenerate.extend(chart.triangles);
        } else {
            charts.push(chart);
        }
    }
    degenerate
}

/// Source level the aggregator reads: `preferred` if present, else the
/// lowest existing level
fn aggregation_level(g: &GeometryData, preferred: usize) -> Option<usize> {
    if g.has_tex_coords(preferred) {
        Some(preferred)
    } else {
        g.tex_coord_levels().next()
    }
}

fn build_blocks(charts: &[Chart], settings: &MappingImageSettings) -> Vec<Block> {
    let aggregating = settings.tex_coord_generator == TexCoordGenerator::ChartAggregator;
    let groups: Vec<Vec<usize>> = if aggregating && !settings.chart_aggregator.separate_overlapping_charts {
        let boxes: Vec<GeomWithData<Rectangle<[f32; 2]>, usize>> = charts
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let (min, max) = c.bounds();
                GeomWithData::new(Rectangle::from_corners([min.x, min.y], [max.x, max.y]), i)
            })
            .collect();
        let tree = RTree::bulk_load(boxes.clone());
        let mut sets = DisjointSet::new(charts.len());
        for b in &boxes {
            for other in tree.locate_in_envelope_intersecting(&b.geom().envelope()) {
                sets.union(b.data, other.data);
            }
        }
        sets.groups()
    } else {
        (0..charts.len()).map(|i| vec![i]).collect()
    };

    groups
        .into_iter()
        .map(|members| {
            let (min, max) = members.iter().fold(
                (Vector2f::repeat(f32::MAX), Vector2f::repeat(f32::MIN)),
                |(min, max), &i| {
                    let (cmin, cmax) = charts[i].bounds();
                    (min.inf(&cmin), max.sup(&cmax))
                },
            );
            let proportional = aggregating && settings.chart_aggregator.mode == ChartAggregatorMode::TextureSizeProportions;
            let scale = if aggregating && !proportional {
                let surface: f32 = members.iter().map(|&i| charts[i].surface_area).sum();
                let uv: f32 = members.iter().map(|&i| charts[i].uv_area()).sum();
                if uv > 0.0 && surface > 0.0 {
                    (surface / uv).sqrt()
                } else {
                    1.0
                }
            } else {
                1.0
            };
            Block {
                charts: members,
                min,
                size: (max - min) * scale,
                scale,
            }
        })
        .collect()
}

/// Shelf-pack `sizes` at `texels_per_unit`; returns lower-left corners in
/// texels, or `None` if they do not fit
fn shelf_pack(sizes: &[Vector2f], order: &[usize], texels_per_unit: f32, width: f32, height: f32, gutter: f32) -> Option<Vec<Vector2f>> {
    let mut placed = vec![Vector2f::zeros(); sizes.len()];
    let (mut x, mut y, mut shelf) = (0.0f32, 0.0f32, 0.0f32);
    for &i in order {
        let w = sizes[i].x * texels_per_unit + gutter;
        let h = sizes[i].y * texels_per_unit + gutter;
        if w > width {
            return None;
        }
        if x + w > width {
            y += shelf;
            x = 0.0;
            shelf = 0.0;
        }
        if y + h > height {
            return None;
        }
        placed[i] = Vector2f::new(x + gutter * 0.5, y + gutter * 0.5);
        x += w;
        shelf = shelf.max(h);
    }
    Some(placed)
}

/// Pack rectangles of `sizes` (scene units) into one texture of `output`
/// at the largest uniform scale that fits.
///
/// Returns the lower-left corner of every rectangle in texels and the
/// texels per scene unit.
pub(crate) fn pack_rectangles(sizes: &[Vector2f], output: &OutputMaterialSettings) -> Result<(Vec<Vector2f>, f32)> {
    let order: Vec<usize> = (0..sizes.len())
        .sorted_by(|&a, &b| sizes[b].y.total_cmp(&sizes[a].y).then(a.cmp(&b)))
        .collect();

    let (width, height) = (output.texture_width as f32, output.texture_height as f32);
    let gutter = output.gutter_space as f32;
    let largest = sizes.iter().fold(0.0f32, |m, s| m.max(s.x).max(s.y)).max(f32::MIN_POSITIVE);
    let mut hi = (width.min(height) - gutter).max(1.0) / largest;
    let mut lo = 0.0f32;
    if shelf_pack(sizes, &order, lo, width, height, gutter).is_none() {
        return Err(Error::InvalidData(format!(
            "{} charts do not fit a {}x{} texture with gutter {}",
            sizes.len(),
            output.texture_width,
            output.texture_height,
            gutter
        )));
    }
    if shelf_pack(sizes, &order, hi, width, height, gutter).is_some() {
        lo = hi;
    } else {
        for _ in 0..40 {
            let mid = (lo + hi) * 0.5;
            if shelf_pack(sizes, &order, mid, width, height, gutter).is_some() {
                lo = mid;
            } else {
                hi = mid;
            }
        }
    }
    let placed = shelf_pack(sizes, &order, lo, width, height, gutter)
        .ok_or_else(|| Error::Algorithm("chart packing did not converge".into()))?;
    Ok((placed, lo))
}

/// Generate texture coordinates at `settings.tex_coord_level` for every
/// geometry, packed into one atlas sized by output material 0.
///
/// Geometries should be in a common space, usually scene space, so texel
/// density is comparable across them.
pub fn generate_tex_coords(geometries: &mut [GeometryData], settings: &MappingImageSettings) -> Result<ChartLayout> {
    settings.validate()?;
    let output = settings
        .output_material_settings(0)
        .ok_or_else(|| Error::InvalidSettings("no output material settings".into()))?;

    let mut charts = Vec::new();
    for (index, g) in geometries.iter().enumerate() {
        if g.is_empty() {
            continue;
        }
        let leftover = match settings.tex_coord_generator {
            TexCoordGenerator::ChartAggregator => match aggregation_level(g, settings.tex_coord_level) {
                Some(level) => uv_charts(g, index, level, &mut charts),
                None => {
                    log::debug!("{}: no texture coordinates to aggregate, parameterizing", g.name);
                    (0..g.triangle_count()).collect()
                }
            },
            TexCoordGenerator::Parameterizer => (0..g.triangle_count()).collect(),
        };
        if !leftover.is_empty() {
            planar_charts(g, index, &leftover, &mut charts);
        }
    }
    if charts.is_empty() {
        return Err(Error::InvalidData("no triangles to generate texture coordinates for".into()));
    }

    let blocks = build_blocks(&charts, settings);
    let sizes: Vec<Vector2f> = blocks.iter().map(|b| b.size).collect();
    let (placed, texels_per_unit) = pack_rectangles(&sizes, output)?;
    let (width, height) = (output.texture_width as f32, output.texture_height as f32);

    let mut new_uvs: Vec<Vec<Vector2f>> = geometries
        .iter()
        .map(|g| vec![Vector2f::zeros(); g.corner_count()])
        .collect();
    for (block, corner) in blocks.iter().zip(&placed) {
        for &c in &block.charts {
            let chart = &charts[c];
            for (i, &t) in chart.triangles.iter().enumerate() {
                for k in 0..3 {
                    let local = (chart.corners[i * 3 + k] - block.min) * block.scale * texels_per_unit;
                    let texel = corner + local;
                    new_uvs[chart.geometry][t * 3 + k] = Vector2f::new(texel.x / width, texel.y / height);
                }
            }
        }
    }

    let level = settings.tex_coord_level;
    for (g, uvs) in geometries.iter_mut().zip(new_uvs) {
        if g.is_empty() {
            continue;
        }
        g.add_tex_coords(level)?;
        if let Some(channel) = g.tex_coords_mut(level) {
            *channel = uvs;
        }
    }

    log::debug!(
        "packed {} charts in {} blocks at {:.3} texels per unit",
        charts.len(),
        blocks.len(),
        texels_per_unit
    );
    Ok(ChartLayout {
        chart_count: charts.len(),
        block_count: blocks.len(),
        texels_per_unit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodcrate_core::Point3f;

    fn unit_cube() -> GeometryData {
        let coords = (0..8)
            .map(|i| Point3f::new((i & 1) as f32, ((i >> 1) & 1) as f32, ((i >> 2) & 1) as f32))
            .collect();
        let faces = [
            [0, 2, 3, 1],
            [4, 5, 7, 6],
            [0, 1, 5, 4],
            [2, 6, 7, 3],
            [0, 4, 6, 2],
            [1, 3, 7, 5],
        ];
        let triangles = faces.iter().flat_map(|f| [[f[0], f[1], f[2]], [f[0], f[2], f[3]]]).collect();
        GeometryData::from_coords_and_triangles("cube", coords, triangles)
    }

    fn settings(generator: TexCoordGenerator) -> MappingImageSettings {
        MappingImageSettings {
            tex_coord_generator: generator,
            output_materials: vec![OutputMaterialSettings::default().with_texture_size(256, 256)],
            ..MappingImageSettings::default()
        }
    }

    fn assert_inside_unit_square(g: &GeometryData) {
        for uv in g.tex_coords(0).unwrap() {
            assert!((0.0..=1.0).contains(&uv.x) && (0.0..=1.0).contains(&uv.y), "{:?}", uv);
        }
    }

    #[test]
    fn test_parameterizer_splits_cube_faces() {
        let mut geometries = vec![unit_cube()];
        let layout = generate_tex_coords(&mut geometries, &settings(TexCoordGenerator::Parameterizer)).unwrap();
        assert_eq!(layout.chart_count, 6);
        assert!(layout.texels_per_unit > 0.0);
        assert_inside_unit_square(&geometries[0]);
    }

    #[test]
    fn test_aggregator_without_uvs_falls_back() {
        let mut geometries = vec![unit_cube()];
        let layout = generate_tex_coords(&mut geometries, &settings(TexCoordGenerator::ChartAggregator)).unwrap();
        assert_eq!(layout.chart_count, 6);
    }

    #[test]
    fn test_aggregator_keeps_chart_shape() {
        // two separate quads; the second has UVs half the size of the first
        let mut g = GeometryData::from_coords_and_triangles(
            "quads",
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(1.0, 1.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
                Point3f::new(2.0, 0.0, 0.0),
                Point3f::new(3.0, 0.0, 0.0),
                Point3f::new(3.0, 1.0, 0.0),
                Point3f::new(2.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3], [4, 5, 6], [4, 6, 7]],
        );
        let uv = [
            0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, //
            0.0, 0.0, 0.5, 0.0, 0.5, 0.5, 0.0, 0.0, 0.5, 0.5, 0.0, 0.5,
        ];
        g.set_tex_coords(0, &uv).unwrap();
        let mut geometries = vec![g];
        let layout = generate_tex_coords(&mut geometries, &settings(TexCoordGenerator::ChartAggregator)).unwrap();
        assert_eq!(layout.chart_count, 2);
        assert_inside_unit_square(&geometries[0]);

        // surface area mode gives both unit quads the same texel footprint
        let uvs = geometries[0].tex_coords(0).unwrap();
        let first = uvs[1].x - uvs[0].x;
        let second = uvs[7].x - uvs[6].x;
        assert!((first - second).abs() < 1e-4, "{} vs {}", first, second);
    }

    #[test]
    fn test_overlapping_charts_share_space() {
        let mut g = GeometryData::from_coords_and_triangles(
            "mirrored",
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
                Point3f::new(5.0, 0.0, 0.0),
                Point3f::new(6.0, 0.0, 0.0),
                Point3f::new(5.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [3, 4, 5]],
        );
        g.set_tex_coords(0, &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]).unwrap();
        let mut s = settings(TexCoordGenerator::ChartAggregator);
        s.chart_aggregator.separate_overlapping_charts = false;
        let mut geometries = vec![g];
        let layout = generate_tex_coords(&mut geometries, &s).unwrap();
        assert_eq!(layout.chart_count, 2);
        assert_eq!(layout.block_count, 1);
        let uvs = geometries[0].tex_coords(0).unwrap();
        assert_eq!(uvs[0], uvs[3]);
    }

    #[test]
    fn test_empty_input_is_an_error() {
        let mut geometries = vec![GeometryData::new("empty")];
        assert!(generate_tex_coords(&mut geometries, &settings(TexCoordGenerator::Parameterizer)).is_err());
    }
}
