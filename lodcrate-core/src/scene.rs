//! Scene graph: a node tree plus the selection set, material and texture
//! tables the nodes refer to.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geometry::{bounds_of, GeometryData};
use crate::material::MaterialTable;
use crate::point::*;
use crate::selection::{SelectionSet, SelectionSetTable};
use crate::texture::TextureTable;
use crate::traits::Bounded;
use crate::transform::Transform3D;

/// Opaque node identifier, unique within a scene and stable across copies
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{:016x}}}", self.0)
    }
}

/// Camera placement used by impostor views
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraView {
    pub direction: Vector3f,
    pub up: Vector3f,
    pub field_of_view: f32,
    pub orthographic: bool,
}

impl Default for CameraView {
    fn default() -> Self {
        Self {
            direction: -Vector3f::z(),
            up: Vector3f::y(),
            field_of_view: 90.0,
            orthographic: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Transform,
    Mesh(GeometryData),
    Camera(CameraView),
}

/// Kind tag used for [`Scene::select_nodes`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    Transform,
    Mesh,
    Camera,
}

impl NodeType {
    pub fn name(&self) -> &'static str {
        match self {
            NodeType::Transform => "SceneNode",
            NodeType::Mesh => "SceneMesh",
            NodeType::Camera => "SceneCamera",
        }
    }
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Transform => NodeType::Transform,
            NodeKind::Mesh(_) => NodeType::Mesh,
            NodeKind::Camera(_) => NodeType::Camera,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneNode {
    pub id: NodeId,
    pub name: String,
    pub original_name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub relative_transform: Transform3D,
    pub kind: NodeKind,
}

impl SceneNode {
    pub fn geometry(&self) -> Option<&GeometryData> {
        match &self.kind {
            NodeKind::Mesh(g) => Some(g),
            _ => None,
        }
    }

    pub fn geometry_mut(&mut self) -> Option<&mut GeometryData> {
        match &mut self.kind {
            NodeKind::Mesh(g) => Some(g),
            _ => None,
        }
    }
}

/// A scene: node tree with geometry, plus selection sets, materials and
/// textures. `Clone` gives an independent copy that keeps node ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    nodes: BTreeMap<NodeId, SceneNode>,
    root: NodeId,
    next_id: u64,
    pub selection_sets: SelectionSetTable,
    pub materials: MaterialTable,
    pub textures: TextureTable,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        let root = NodeId(0);
        let mut nodes = BTreeMap::new();
        nodes.insert(
            root,
            SceneNode {
                id: root,
                name: "Root".to_string(),
                original_name: "Root".to_string(),
                parent: None,
                children: Vec::new(),
                relative_transform: Transform3D::identity(),
                kind: NodeKind::Transform,
            },
        );
        Self {
            nodes,
            root,
            next_id: 1,
            selection_sets: SelectionSetTable::new(),
            materials: MaterialTable::new(),
            textures: TextureTable::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn geometry(&self, id: NodeId) -> Option<&GeometryData> {
        self.node(id).and_then(SceneNode::geometry)
    }

    pub fn geometry_mut(&mut self, id: NodeId) -> Option<&mut GeometryData> {
        self.node_mut(id).and_then(SceneNode::geometry_mut)
    }

    /// Add a child under `parent` and return its id
    pub fn create_child(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        kind: NodeKind,
    ) -> Result<NodeId> {
        if !self.nodes.contains_key(&parent) {
            return Err(Error::NotFound(format!("parent node {}", parent)));
        }
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let name = name.into();
        self.nodes.insert(
            id,
            SceneNode {
                id,
                original_name: name.clone(),
                name,
                parent: Some(parent),
                children: Vec::new(),
                relative_transform: Transform3D::identity(),
                kind,
            },
        );
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.push(id);
        }
        Ok(id)
    }

    /// Add a mesh node named after its geometry
    pub fn create_child_mesh(&mut self, parent: NodeId, geometry: GeometryData) -> Result<NodeId> {
        let name = geometry.name.clone();
        self.create_child(parent, name, NodeKind::Mesh(geometry))
    }

    /// Remove a node and all of its descendants
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        if id == self.root {
            return Err(Error::Unsupported("the root node cannot be removed".into()));
        }
        let parent = self
            .node(id)
            .ok_or_else(|| Error::NotFound(format!("node {}", id)))?
            .parent;
        for removed in self.descendants(id) {
            self.nodes.remove(&removed);
            self.selection_sets.forget_node(removed);
        }
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            p.children.retain(|&c| c != id);
        }
        Ok(())
    }

    /// Remove every node below the root; tables are kept
    pub fn remove_scene_nodes(&mut self) {
        let children = self
            .node(self.root)
            .map(|r| r.children.clone())
            .unwrap_or_default();
        for child in children {
            // children of root always exist and are never the root
            let _ = self.remove_node(child);
        }
    }

    /// `id` followed by all of its descendants, depth first
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            if let Some(node) = self.nodes.get(&n) {
                out.push(n);
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    /// Slash separated path from the root, e.g. `Root/Teapot001`
    pub fn node_path(&self, id: NodeId) -> Option<String> {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(n) = current {
            let node = self.nodes.get(&n)?;
            names.push(node.name.as_str());
            current = node.parent;
        }
        names.reverse();
        Some(names.join("/"))
    }

    pub fn node_from_path(&self, path: &str) -> Option<NodeId> {
        let mut parts = path.split('/').filter(|p| !p.is_empty());
        let root = self.nodes.get(&self.root)?;
        if parts.next()? != root.name {
            return None;
        }
        let mut current = self.root;
        for part in parts {
            let node = self.nodes.get(&current)?;
            current = *node
                .children
                .iter()
                .find(|c| self.nodes.get(*c).map(|n| n.name == part).unwrap_or(false))?;
        }
        Some(current)
    }

    /// Collect every node of a kind into a new selection set and return its id
    pub fn select_nodes(&mut self, node_type: NodeType) -> usize {
        let mut set = SelectionSet::new(node_type.name());
        for id in self.descendants(self.root) {
            if self.nodes.get(&id).map(|n| n.kind.node_type()) == Some(node_type) {
                set.add_item(id);
            }
        }
        self.selection_sets.add_selection_set(set)
    }

    /// Mesh nodes in depth-first order
    pub fn mesh_nodes(&self) -> Vec<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .filter(|id| self.geometry(*id).is_some())
            .collect()
    }

    /// Mesh nodes inside the named selection set, either directly or through
    /// an ancestor. `None` selects every mesh.
    pub fn nodes_in_scope(&self, selection_set_name: Option<&str>) -> Result<Vec<NodeId>> {
        let Some(name) = selection_set_name else {
            return Ok(self.mesh_nodes());
        };
        let set = self
            .selection_sets
            .find(name)
            .ok_or_else(|| Error::NotFound(format!("selection set '{}'", name)))?;
        Ok(self
            .mesh_nodes()
            .into_iter()
            .filter(|&id| self.ancestors(id).any(|a| set.contains(a)))
            .collect())
    }

    /// `id` and its ancestors up to the root
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), move |n| self.nodes.get(n).and_then(|node| node.parent))
    }

    /// Transform from node space to scene space
    pub fn global_transform(&self, id: NodeId) -> Transform3D {
        self.ancestors(id)
            .filter_map(|n| self.nodes.get(&n))
            .fold(Transform3D::identity(), |acc, node| {
                node.relative_transform * acc
            })
    }

    /// Copy of a mesh node's geometry with its global transform baked in
    pub fn world_geometry(&self, id: NodeId) -> Option<GeometryData> {
        let mut geometry = self.geometry(id)?.clone();
        geometry.transform(&self.global_transform(id));
        Some(geometry)
    }

    /// Scene-space bounding box over all meshes
    pub fn calculate_extents(&self) -> (Point3f, Point3f) {
        let points: Vec<Point3f> = self
            .mesh_nodes()
            .into_iter()
            .flat_map(|id| {
                let t = self.global_transform(id);
                self.geometry(id)
                    .map(|g| g.coords.iter().map(|p| t.transform_point(p)).collect::<Vec<_>>())
                    .unwrap_or_default()
            })
            .collect();
        bounds_of(points.iter())
    }

    pub fn triangle_count(&self) -> usize {
        self.mesh_nodes()
            .into_iter()
            .filter_map(|id| self.geometry(id))
            .map(GeometryData::triangle_count)
            .sum()
    }
}

impl Bounded for Scene {
    fn bounding_box(&self) -> (Point3f, Point3f) {
        self.calculate_extents()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_triangle(name: &str) -> GeometryData {
        GeometryData::from_coords_and_triangles(
            name,
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2]],
        )
    }

    fn two_teapots() -> (Scene, NodeId, NodeId, NodeId) {
        let mut scene = Scene::new();
        let group = scene
            .create_child(scene.root(), "Group", NodeKind::Transform)
            .unwrap();
        let a = scene.create_child_mesh(group, unit_triangle("Teapot001")).unwrap();
        let b = scene.create_child_mesh(scene.root(), unit_triangle("Teapot002")).unwrap();
        (scene, group, a, b)
    }

    #[test]
    fn test_paths() {
        let (scene, _, a, b) = two_teapots();
        assert_eq!(scene.node_path(a).unwrap(), "Root/Group/Teapot001");
        assert_eq!(scene.node_from_path("Root/Teapot002"), Some(b));
        assert_eq!(scene.node_from_path("Root/Missing"), None);
        assert_eq!(scene.node_from_path("Other/Teapot002"), None);
    }

    #[test]
    fn test_select_nodes_by_type() {
        let (mut scene, _, a, b) = two_teapots();
        let id = scene.select_nodes(NodeType::Mesh);
        let set = scene.selection_sets.selection_set(id).unwrap();
        assert_eq!(set.name, "SceneMesh");
        assert_eq!(set.items(), &[a, b]);
    }

    #[test]
    fn test_scope_through_ancestor() {
        let (mut scene, group, a, _) = two_teapots();
        let mut set = SelectionSet::new("Process");
        set.add_item(group);
        scene.selection_sets.add_selection_set(set);
        assert_eq!(scene.nodes_in_scope(Some("Process")).unwrap(), vec![a]);
        assert_eq!(scene.nodes_in_scope(None).unwrap().len(), 2);
        assert!(scene.nodes_in_scope(Some("Nope")).is_err());
    }

    #[test]
    fn test_global_transform_and_extents() {
        let (mut scene, group, a, _) = two_teapots();
        scene.node_mut(group).unwrap().relative_transform =
            Transform3D::translation(Vector3f::new(10.0, 0.0, 0.0));
        let world = scene.world_geometry(a).unwrap();
        assert_relative_eq!(world.coords[1].x, 11.0);
        let (min, max) = scene.calculate_extents();
        assert_relative_eq!(min.x, 0.0);
        assert_relative_eq!(max.x, 11.0);
    }

    #[test]
    fn test_remove_and_copy() {
        let (mut scene, group, a, b) = two_teapots();
        let id = scene.select_nodes(NodeType::Mesh);
        let copy = scene.clone();
        scene.remove_node(group).unwrap();
        assert!(scene.node(a).is_none());
        assert_eq!(scene.selection_sets.selection_set(id).unwrap().items(), &[b]);
        // the copy is independent and keeps ids
        assert!(copy.node(a).is_some());
        assert!(scene.remove_node(scene.root()).is_err());

        let mut emptied = copy.clone();
        emptied.remove_scene_nodes();
        assert_eq!(emptied.node_count(), 1);
        assert!(emptied.mesh_nodes().is_empty());
    }
}
