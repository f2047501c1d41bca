//! Selection sets: named subsets of scene nodes used to scope processing

use serde::{Deserialize, Serialize};

use crate::scene::NodeId;

/// A named, ordered, duplicate-free list of node ids
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelectionSet {
    pub name: String,
    items: Vec<NodeId>,
}

impl SelectionSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
        }
    }

    /// Add a node; returns false if it was already present
    pub fn add_item(&mut self, id: NodeId) -> bool {
        if self.items.contains(&id) {
            return false;
        }
        self.items.push(id);
        true
    }

    pub fn remove_item(&mut self, id: NodeId) -> bool {
        let before = self.items.len();
        self.items.retain(|&i| i != id);
        self.items.len() != before
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.items.contains(&id)
    }

    pub fn items(&self) -> &[NodeId] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Table of selection sets owned by a scene
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionSetTable {
    sets: Vec<SelectionSet>,
}

impl SelectionSetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a set and return its id
    pub fn add_selection_set(&mut self, set: SelectionSet) -> usize {
        self.sets.push(set);
        self.sets.len() - 1
    }

    pub fn selection_set(&self, id: usize) -> Option<&SelectionSet> {
        self.sets.get(id)
    }

    pub fn selection_set_mut(&mut self, id: usize) -> Option<&mut SelectionSet> {
        self.sets.get_mut(id)
    }

    /// First set with the given name
    pub fn find(&self, name: &str) -> Option<&SelectionSet> {
        self.sets.iter().find(|s| s.name == name)
    }

    pub fn find_id(&self, name: &str) -> Option<usize> {
        self.sets.iter().position(|s| s.name == name)
    }

    pub fn remove_selection_set(&mut self, id: usize) -> Option<SelectionSet> {
        (id < self.sets.len()).then(|| self.sets.remove(id))
    }

    /// Drop a node from every set
    pub fn forget_node(&mut self, id: NodeId) {
        for set in &mut self.sets {
            set.remove_item(id);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SelectionSet> {
        self.sets.iter()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_items_are_ordered_and_unique() {
        let mut set = SelectionSet::new("Process");
        assert!(set.add_item(NodeId(3)));
        assert!(set.add_item(NodeId(1)));
        assert!(!set.add_item(NodeId(3)));
        assert_eq!(set.items(), &[NodeId(3), NodeId(1)]);
        assert!(set.remove_item(NodeId(3)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_table_lookup_by_name() {
        let mut table = SelectionSetTable::new();
        let id = table.add_selection_set(SelectionSet::new("Teapots"));
        assert_eq!(table.find_id("Teapots"), Some(id));
        assert!(table.find("Missing").is_none());
        table.selection_set_mut(id).unwrap().add_item(NodeId(7));
        table.forget_node(NodeId(7));
        assert!(table.find("Teapots").unwrap().is_empty());
    }
}
