//! Geometry data: vertex coordinates, triangles and attribute channels
//!
//! Vertex coordinates and lock flags are stored per vertex. Texture
//! coordinates, normals, tangents and vertex colors are stored per triangle
//! corner (`triangle * 3 + k`), so a vertex may carry different attribute
//! values on each adjacent triangle. Material ids and quad flags are stored
//! per triangle.
//!
//! Counts are allocated first with [`GeometryData::set_vertex_count`] and
//! [`GeometryData::set_triangle_count`]; every channel is then sized
//! consistently with those counts before data is loaded into it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::point::*;
use crate::traits::Bounded;
use crate::transform::Transform3D;

/// Number of texture coordinate levels a geometry can carry
pub const MAX_TEXCOORD_LEVELS: usize = 8;

/// Number of vertex color levels a geometry can carry
pub const MAX_COLOR_LEVELS: usize = 8;

/// Marks triangles that together form a quad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QuadFlag {
    #[default]
    Triangle,
    /// First triangle of a quad; its partner is the next triangle
    FirstOfQuad,
    /// Second triangle of a quad; its partner is the previous triangle
    SecondOfQuad,
}

/// Indexed triangle geometry with per-corner attribute channels
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeometryData {
    pub name: String,
    pub coords: Vec<Point3f>,
    pub triangles: Vec<[usize; 3]>,
    pub tex_coords: Vec<Option<Vec<Vector2f>>>,
    pub normals: Option<Vec<Vector3f>>,
    pub tangents: Option<Vec<Vector3f>>,
    pub colors: Vec<Option<Vec<Color>>>,
    pub material_ids: Option<Vec<usize>>,
    pub quad_flags: Option<Vec<QuadFlag>>,
    pub vertex_locks: Option<Vec<bool>>,
}

fn check_len(what: &str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(Error::InvalidData(format!(
            "{} expects {} values, got {}",
            what, expected, got
        )));
    }
    Ok(())
}

fn check_level(level: usize, max: usize) -> Result<()> {
    if level >= max {
        return Err(Error::InvalidData(format!(
            "attribute level {} out of range (max {})",
            level,
            max - 1
        )));
    }
    Ok(())
}

impl GeometryData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Build from vertex positions and triangles without attributes
    pub fn from_coords_and_triangles(
        name: impl Into<String>,
        coords: Vec<Point3f>,
        triangles: Vec<[usize; 3]>,
    ) -> Self {
        Self {
            name: name.into(),
            coords,
            triangles,
            ..Self::default()
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.coords.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn corner_count(&self) -> usize {
        self.triangles.len() * 3
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty() || self.triangles.is_empty()
    }

    /// Allocate `count` vertices. Per-vertex channels follow the new size.
    pub fn set_vertex_count(&mut self, count: usize) {
        self.coords.resize(count, Point3f::origin());
        if let Some(locks) = &mut self.vertex_locks {
            locks.resize(count, false);
        }
    }

    /// Allocate `count` triangles. Per-corner and per-triangle channels follow the new size.
    pub fn set_triangle_count(&mut self, count: usize) {
        self.triangles.resize(count, [0; 3]);
        let corners = count * 3;
        for level in self.tex_coords.iter_mut().flatten() {
            level.resize(corners, Vector2f::zeros());
        }
        for level in self.colors.iter_mut().flatten() {
            level.resize(corners, white());
        }
        if let Some(normals) = &mut self.normals {
            normals.resize(corners, Vector3f::z());
        }
        if let Some(tangents) = &mut self.tangents {
            tangents.resize(corners, Vector3f::x());
        }
        if let Some(ids) = &mut self.material_ids {
            ids.resize(count, 0);
        }
        if let Some(flags) = &mut self.quad_flags {
            flags.resize(count, QuadFlag::Triangle);
        }
    }

    /// Load packed `x y z` coordinates for every allocated vertex
    pub fn set_coords(&mut self, values: &[f32]) -> Result<()> {
        check_len("coords", values.len(), self.vertex_count() * 3)?;
        for (coord, xyz) in self.coords.iter_mut().zip(values.chunks_exact(3)) {
            *coord = Point3f::new(xyz[0], xyz[1], xyz[2]);
        }
        Ok(())
    }

    /// Load three vertex ids per allocated triangle
    pub fn set_vertex_ids(&mut self, ids: &[usize]) -> Result<()> {
        check_len("vertex ids", ids.len(), self.corner_count())?;
        let vertex_count = self.vertex_count();
        if let Some(bad) = ids.iter().find(|&&id| id >= vertex_count) {
            return Err(Error::InvalidData(format!(
                "vertex id {} out of range ({} vertices)",
                bad, vertex_count
            )));
        }
        for (tri, corner) in self.triangles.iter_mut().zip(ids.chunks_exact(3)) {
            *tri = [corner[0], corner[1], corner[2]];
        }
        Ok(())
    }

    /// Create texture coordinate channel `level`, zero-filled
    pub fn add_tex_coords(&mut self, level: usize) -> Result<()> {
        check_level(level, MAX_TEXCOORD_LEVELS)?;
        if self.tex_coords.len() <= level {
            self.tex_coords.resize(level + 1, None);
        }
        let corners = self.corner_count();
        self.tex_coords[level].get_or_insert_with(|| vec![Vector2f::zeros(); corners]);
        Ok(())
    }

    pub fn set_tex_coords(&mut self, level: usize, values: &[f32]) -> Result<()> {
        check_len("tex coords", values.len(), self.corner_count() * 2)?;
        self.add_tex_coords(level)?;
        if let Some(channel) = self.tex_coords_mut(level) {
            for (uv, pair) in channel.iter_mut().zip(values.chunks_exact(2)) {
                *uv = Vector2f::new(pair[0], pair[1]);
            }
        }
        Ok(())
    }

    pub fn tex_coords(&self, level: usize) -> Option<&[Vector2f]> {
        self.tex_coords.get(level).and_then(|c| c.as_deref())
    }

    pub fn tex_coords_mut(&mut self, level: usize) -> Option<&mut Vec<Vector2f>> {
        self.tex_coords.get_mut(level).and_then(|c| c.as_mut())
    }

    pub fn has_tex_coords(&self, level: usize) -> bool {
        self.tex_coords(level).is_some()
    }

    /// Levels that carry a texture coordinate channel
    pub fn tex_coord_levels(&self) -> impl Iterator<Item = usize> + '_ {
        self.tex_coords
            .iter()
            .enumerate()
            .filter_map(|(level, c)| c.as_ref().map(|_| level))
    }

    pub fn add_colors(&mut self, level: usize) -> Result<()> {
        check_level(level, MAX_COLOR_LEVELS)?;
        if self.colors.len() <= level {
            self.colors.resize(level + 1, None);
        }
        let corners = self.corner_count();
        self.colors[level].get_or_insert_with(|| vec![white(); corners]);
        Ok(())
    }

    /// Load packed `r g b a` colors per corner
    pub fn set_colors(&mut self, level: usize, values: &[f32]) -> Result<()> {
        check_len("colors", values.len(), self.corner_count() * 4)?;
        self.add_colors(level)?;
        if let Some(channel) = self.colors_mut(level) {
            for (color, rgba) in channel.iter_mut().zip(values.chunks_exact(4)) {
                *color = Color::new(rgba[0], rgba[1], rgba[2], rgba[3]);
            }
        }
        Ok(())
    }

    pub fn colors(&self, level: usize) -> Option<&[Color]> {
        self.colors.get(level).and_then(|c| c.as_deref())
    }

    pub fn colors_mut(&mut self, level: usize) -> Option<&mut Vec<Color>> {
        self.colors.get_mut(level).and_then(|c| c.as_mut())
    }

    pub fn color_levels(&self) -> impl Iterator<Item = usize> + '_ {
        self.colors
            .iter()
            .enumerate()
            .filter_map(|(level, c)| c.as_ref().map(|_| level))
    }

    pub fn add_normals(&mut self) {
        let corners = self.corner_count();
        self.normals.get_or_insert_with(|| vec![Vector3f::z(); corners]);
    }

    /// Load packed `x y z` normals per corner
    pub fn set_normals(&mut self, values: &[f32]) -> Result<()> {
        check_len("normals", values.len(), self.corner_count() * 3)?;
        self.normals = Some(
            values
                .chunks_exact(3)
                .map(|n| Vector3f::new(n[0], n[1], n[2]))
                .collect(),
        );
        Ok(())
    }

    pub fn add_material_ids(&mut self) {
        let count = self.triangle_count();
        self.material_ids.get_or_insert_with(|| vec![0; count]);
    }

    pub fn set_material_ids(&mut self, ids: &[usize]) -> Result<()> {
        check_len("material ids", ids.len(), self.triangle_count())?;
        self.material_ids = Some(ids.to_vec());
        Ok(())
    }

    /// Material of triangle `t`; geometry without material ids uses material 0
    pub fn material_id(&self, t: usize) -> usize {
        self.material_ids
            .as_ref()
            .and_then(|ids| ids.get(t).copied())
            .unwrap_or(0)
    }

    pub fn add_quad_flags(&mut self) {
        let count = self.triangle_count();
        self.quad_flags
            .get_or_insert_with(|| vec![QuadFlag::Triangle; count]);
    }

    pub fn add_vertex_locks(&mut self) {
        let count = self.vertex_count();
        self.vertex_locks.get_or_insert_with(|| vec![false; count]);
    }

    pub fn lock_vertex(&mut self, v: usize) {
        self.add_vertex_locks();
        if let Some(locks) = &mut self.vertex_locks {
            if let Some(lock) = locks.get_mut(v) {
                *lock = true;
            }
        }
    }

    pub fn is_vertex_locked(&self, v: usize) -> bool {
        self.vertex_locks
            .as_ref()
            .and_then(|locks| locks.get(v).copied())
            .unwrap_or(false)
    }

    /// Check that indices reference valid vertices and that every channel
    /// is sized for the allocated counts
    pub fn validate(&self) -> Result<()> {
        let vertex_count = self.vertex_count();
        for (t, tri) in self.triangles.iter().enumerate() {
            if tri.iter().any(|&v| v >= vertex_count) {
                return Err(Error::InvalidData(format!(
                    "{}: triangle {} references vertex outside 0..{}",
                    self.name, t, vertex_count
                )));
            }
        }
        let corners = self.corner_count();
        for (level, channel) in self.tex_coords.iter().enumerate() {
            if let Some(c) = channel {
                check_len(&format!("{}: tex coord level {}", self.name, level), c.len(), corners)?;
            }
        }
        for (level, channel) in self.colors.iter().enumerate() {
            if let Some(c) = channel {
                check_len(&format!("{}: color level {}", self.name, level), c.len(), corners)?;
            }
        }
        if let Some(n) = &self.normals {
            check_len(&format!("{}: normals", self.name), n.len(), corners)?;
        }
        if let Some(t) = &self.tangents {
            check_len(&format!("{}: tangents", self.name), t.len(), corners)?;
        }
        if let Some(ids) = &self.material_ids {
            check_len(&format!("{}: material ids", self.name), ids.len(), self.triangle_count())?;
        }
        if let Some(flags) = &self.quad_flags {
            check_len(&format!("{}: quad flags", self.name), flags.len(), self.triangle_count())?;
        }
        if let Some(locks) = &self.vertex_locks {
            check_len(&format!("{}: vertex locks", self.name), locks.len(), vertex_count)?;
        }
        Ok(())
    }

    /// Unnormalized face normal (length is twice the area)
    pub fn face_cross(&self, t: usize) -> Vector3f {
        let [a, b, c] = self.triangles[t];
        let p0 = self.coords[a];
        (self.coords[b] - p0).cross(&(self.coords[c] - p0))
    }

    /// Unit face normal, zero for degenerate triangles
    pub fn face_normal(&self, t: usize) -> Vector3f {
        let n = self.face_cross(t);
        let len = n.norm();
        if len > f32::EPSILON {
            n / len
        } else {
            Vector3f::zeros()
        }
    }

    pub fn face_normals(&self) -> Vec<Vector3f> {
        (0..self.triangle_count()).map(|t| self.face_normal(t)).collect()
    }

    pub fn triangle_area(&self, t: usize) -> f32 {
        self.face_cross(t).norm() * 0.5
    }

    pub fn surface_area(&self) -> f32 {
        (0..self.triangle_count()).map(|t| self.triangle_area(t)).sum()
    }

    /// Position on triangle `t` at barycentric coordinates `bary`
    pub fn interpolate_position(&self, t: usize, bary: [f32; 3]) -> Point3f {
        let [a, b, c] = self.triangles[t];
        Point3f::from(
            self.coords[a].coords * bary[0]
                + self.coords[b].coords * bary[1]
                + self.coords[c].coords * bary[2],
        )
    }

    /// Bake a transform into coordinates, normals and tangents
    pub fn transform(&mut self, transform: &Transform3D) {
        for p in &mut self.coords {
            *p = transform.transform_point(p);
        }
        if let Some(normals) = &mut self.normals {
            for n in normals.iter_mut() {
                *n = transform.transform_normal(n);
            }
        }
        if let Some(tangents) = &mut self.tangents {
            for t in tangents.iter_mut() {
                let v = transform.transform_vector(t);
                let len = v.norm();
                if len > f32::EPSILON {
                    *t = v / len;
                }
            }
        }
    }

    /// Append `other`, transformed by `transform`, with its material ids
    /// shifted by `material_offset`. Channels present on only one side are
    /// filled with neutral values on the other.
    pub fn append(&mut self, other: &GeometryData, transform: &Transform3D, material_offset: usize) {
        let vertex_offset = self.vertex_count();
        let own_triangles = self.triangle_count();
        let own_corners = self.corner_count();
        let other_corners = other.corner_count();

        let mut placed = other.clone();
        placed.transform(transform);

        self.coords.extend_from_slice(&placed.coords);
        self.triangles.extend(
            placed
                .triangles
                .iter()
                .map(|t| [t[0] + vertex_offset, t[1] + vertex_offset, t[2] + vertex_offset]),
        );

        let levels = self.tex_coords.len().max(placed.tex_coords.len());
        self.tex_coords.resize(levels, None);
        for level in 0..levels {
            let theirs = placed.tex_coords(level);
            let ours = &mut self.tex_coords[level];
            if ours.is_none() && theirs.is_none() {
                continue;
            }
            let channel = ours.get_or_insert_with(|| vec![Vector2f::zeros(); own_corners]);
            match theirs {
                Some(uv) => channel.extend_from_slice(uv),
                None => channel.extend(std::iter::repeat(Vector2f::zeros()).take(other_corners)),
            }
        }

        let levels = self.colors.len().max(placed.colors.len());
        self.colors.resize(levels, None);
        for level in 0..levels {
            let theirs = placed.colors(level);
            let ours = &mut self.colors[level];
            if ours.is_none() && theirs.is_none() {
                continue;
            }
            let channel = ours.get_or_insert_with(|| vec![white(); own_corners]);
            match theirs {
                Some(c) => channel.extend_from_slice(c),
                None => channel.extend(std::iter::repeat(white()).take(other_corners)),
            }
        }

        merge_channel(&mut self.normals, placed.normals.as_deref(), own_corners, other_corners, Vector3f::z());
        merge_channel(&mut self.tangents, placed.tangents.as_deref(), own_corners, other_corners, Vector3f::x());
        merge_channel(
            &mut self.quad_flags,
            placed.quad_flags.as_deref(),
            own_triangles,
            other.triangle_count(),
            QuadFlag::Triangle,
        );
        merge_channel(
            &mut self.vertex_locks,
            placed.vertex_locks.as_deref(),
            vertex_offset,
            other.vertex_count(),
            false,
        );

        if self.material_ids.is_some() || other.material_ids.is_some() || material_offset > 0 {
            let ids = self.material_ids.get_or_insert_with(|| vec![0; own_triangles]);
            ids.extend((0..other.triangle_count()).map(|t| other.material_id(t) + material_offset));
        }
    }

    /// Keep only the triangles whose mask entry is `true`
    pub fn retain_triangles(&mut self, keep: &[bool]) {
        let corner_keep: Vec<bool> = keep.iter().flat_map(|&k| [k, k, k]).collect();
        retain_by_mask(&mut self.triangles, keep);
        for channel in self.tex_coords.iter_mut().flatten() {
            retain_by_mask(channel, &corner_keep);
        }
        for channel in self.colors.iter_mut().flatten() {
            retain_by_mask(channel, &corner_keep);
        }
        if let Some(n) = &mut self.normals {
            retain_by_mask(n, &corner_keep);
        }
        if let Some(t) = &mut self.tangents {
            retain_by_mask(t, &corner_keep);
        }
        if let Some(ids) = &mut self.material_ids {
            retain_by_mask(ids, keep);
        }
        if let Some(flags) = &mut self.quad_flags {
            retain_by_mask(flags, keep);
            repair_quad_flags(flags);
        }
    }

    /// Drop vertices no triangle references. Returns the old-to-new index
    /// map (`None` for removed vertices).
    pub fn remove_unused_vertices(&mut self) -> Vec<Option<usize>> {
        let mut used = vec![false; self.vertex_count()];
        for tri in &self.triangles {
            for &v in tri {
                used[v] = true;
            }
        }
        let mut remap = vec![None; self.vertex_count()];
        let mut next = 0;
        for (v, &u) in used.iter().enumerate() {
            if u {
                remap[v] = Some(next);
                next += 1;
            }
        }
        retain_by_mask(&mut self.coords, &used);
        if let Some(locks) = &mut self.vertex_locks {
            retain_by_mask(locks, &used);
        }
        for tri in &mut self.triangles {
            for v in tri.iter_mut() {
                if let Some(new) = remap[*v] {
                    *v = new;
                }
            }
        }
        remap
    }

    /// Per-vertex copy: vertices whose corners disagree on any attribute are split
    pub fn new_packed_copy(&self) -> PackedGeometryData {
        let mut lookup: HashMap<(usize, Vec<u32>), usize> = HashMap::new();
        let mut packed = PackedGeometryData {
            name: self.name.clone(),
            material_ids: self.material_ids.clone(),
            ..PackedGeometryData::default()
        };
        packed.tex_coords = self.tex_coords.iter().map(|c| c.as_ref().map(|_| Vec::new())).collect();
        packed.colors = self.colors.iter().map(|c| c.as_ref().map(|_| Vec::new())).collect();
        if self.normals.is_some() {
            packed.normals = Some(Vec::new());
        }

        for tri in 0..self.triangle_count() {
            let mut packed_tri = [0usize; 3];
            for k in 0..3 {
                let corner = tri * 3 + k;
                let vertex = self.triangles[tri][k];
                let key = (vertex, self.corner_key(corner));
                let next = packed.coords.len();
                let index = *lookup.entry(key).or_insert(next);
                if index == next {
                    packed.coords.push(self.coords[vertex]);
                    for (level, channel) in packed.tex_coords.iter_mut().enumerate() {
                        if let (Some(dst), Some(src)) = (channel, self.tex_coords(level)) {
                            dst.push(src[corner]);
                        }
                    }
                    for (level, channel) in packed.colors.iter_mut().enumerate() {
                        if let (Some(dst), Some(src)) = (channel, self.colors(level)) {
                            dst.push(src[corner]);
                        }
                    }
                    if let (Some(dst), Some(src)) = (&mut packed.normals, &self.normals) {
                        dst.push(src[corner]);
                    }
                }
                packed_tri[k] = index;
            }
            packed.triangles.push(packed_tri);
        }
        packed
    }

    fn corner_key(&self, corner: usize) -> Vec<u32> {
        let mut key = Vec::new();
        for channel in self.tex_coords.iter().flatten() {
            key.extend(channel[corner].iter().map(|f| f.to_bits()));
        }
        for channel in self.colors.iter().flatten() {
            key.extend(channel[corner].iter().map(|f| f.to_bits()));
        }
        if let Some(normals) = &self.normals {
            key.extend(normals[corner].iter().map(|f| f.to_bits()));
        }
        key
    }
}

fn merge_channel<T: Clone>(
    ours: &mut Option<Vec<T>>,
    theirs: Option<&[T]>,
    own_len: usize,
    other_len: usize,
    fill: T,
) {
    if ours.is_none() && theirs.is_none() {
        return;
    }
    let channel = ours.get_or_insert_with(|| vec![fill.clone(); own_len]);
    match theirs {
        Some(values) => channel.extend_from_slice(values),
        None => channel.extend(std::iter::repeat(fill).take(other_len)),
    }
}

fn retain_by_mask<T>(values: &mut Vec<T>, keep: &[bool]) {
    let mut i = 0;
    values.retain(|_| {
        let k = keep.get(i).copied().unwrap_or(true);
        i += 1;
        k
    });
}

/// Demote quad halves whose partner was removed
fn repair_quad_flags(flags: &mut [QuadFlag]) {
    for t in 0..flags.len() {
        match flags[t] {
            QuadFlag::FirstOfQuad => {
                if flags.get(t + 1) != Some(&QuadFlag::SecondOfQuad) {
                    flags[t] = QuadFlag::Triangle;
                }
            }
            QuadFlag::SecondOfQuad => {
                if t == 0 || flags[t - 1] != QuadFlag::FirstOfQuad {
                    flags[t] = QuadFlag::Triangle;
                }
            }
            QuadFlag::Triangle => {}
        }
    }
}

impl GeometryData {
    pub fn calculate_extents(&self) -> (Point3f, Point3f) {
        bounds_of(self.coords.iter())
    }
}

impl Bounded for GeometryData {
    fn bounding_box(&self) -> (Point3f, Point3f) {
        self.calculate_extents()
    }
}

/// Axis-aligned bounds of a point set; `(origin, origin)` when empty
pub fn bounds_of<'a>(points: impl Iterator<Item = &'a Point3f>) -> (Point3f, Point3f) {
    let mut iter = points.peekable();
    let Some(&&first) = iter.peek() else {
        return (Point3f::origin(), Point3f::origin());
    };
    iter.fold((first, first), |(min, max), p| (min.inf(p), max.sup(p)))
}

/// Geometry with every attribute stored per vertex
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PackedGeometryData {
    pub name: String,
    pub coords: Vec<Point3f>,
    pub triangles: Vec<[usize; 3]>,
    pub tex_coords: Vec<Option<Vec<Vector2f>>>,
    pub normals: Option<Vec<Vector3f>>,
    pub colors: Vec<Option<Vec<Color>>>,
    pub material_ids: Option<Vec<usize>>,
}

impl PackedGeometryData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.coords.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Expand per-vertex attributes to per-corner channels
    pub fn new_unpacked_copy(&self) -> Result<GeometryData> {
        let vertex_count = self.vertex_count();
        if let Some((t, _)) = self
            .triangles
            .iter()
            .enumerate()
            .find(|(_, tri)| tri.iter().any(|&v| v >= vertex_count))
        {
            return Err(Error::InvalidData(format!(
                "{}: triangle {} references vertex outside 0..{}",
                self.name, t, vertex_count
            )));
        }
        let corners: Vec<usize> = self.triangles.iter().flatten().copied().collect();

        let mut unpacked = GeometryData::from_coords_and_triangles(
            self.name.clone(),
            self.coords.clone(),
            self.triangles.clone(),
        );
        unpacked.tex_coords = self
            .tex_coords
            .iter()
            .map(|c| {
                c.as_ref()
                    .map(|v| expand_to_corners(&self.name, v, vertex_count, &corners))
                    .transpose()
            })
            .collect::<Result<_>>()?;
        unpacked.colors = self
            .colors
            .iter()
            .map(|c| {
                c.as_ref()
                    .map(|v| expand_to_corners(&self.name, v, vertex_count, &corners))
                    .transpose()
            })
            .collect::<Result<_>>()?;
        unpacked.normals = self
            .normals
            .as_ref()
            .map(|v| expand_to_corners(&self.name, v, vertex_count, &corners))
            .transpose()?;
        unpacked.material_ids = self.material_ids.clone();
        unpacked.validate()?;
        Ok(unpacked)
    }
}

fn expand_to_corners<T: Copy>(
    name: &str,
    values: &[T],
    vertex_count: usize,
    corners: &[usize],
) -> Result<Vec<T>> {
    check_len(name, values.len(), vertex_count)?;
    Ok(corners.iter().map(|&v| values[v]).collect())
}
