//! Neuron model and per-neuron neurite topology.
//!
//! # Responsibility
//! - Own the id-indexed annotation map, the ordered root list and the
//!   edge/node side tables (anchored paths, notes).
//! - Answer topology queries (`parent_of`, `children_of`, `subtree_of`,
//!   `root_of`) without touching persistence.
//! - Provide crate-private link primitives used by the topology editor.
//!
//! # Invariants
//! - Every non-root annotation has exactly one parent inside this neuron and
//!   appears exactly once in that parent's `child_ids`.
//! - Every root annotation appears exactly once in `root_ids`.
//! - An anchored path exists only while its endpoints are parent-linked.
//! - A note exists only for an annotation present in the node map.

use crate::model::annotation::{Annotation, AnnotationId, NeuronId, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt::{Display, Formatter};

/// Unordered pair of annotation ids naming one parent/child edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathEndpoints {
    low: AnnotationId,
    high: AnnotationId,
}

impl PathEndpoints {
    /// Normalizes the pair so `(a, b)` and `(b, a)` compare equal.
    pub fn new(a: AnnotationId, b: AnnotationId) -> Self {
        Self {
            low: a.min(b),
            high: a.max(b),
        }
    }

    pub fn first(&self) -> AnnotationId {
        self.low
    }

    pub fn second(&self) -> AnnotationId {
        self.high
    }

    pub fn contains(&self, id: AnnotationId) -> bool {
        self.low == id || self.high == id
    }
}

/// Fine-grained traced polyline recorded along one edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchoredPath {
    pub endpoints: PathEndpoints,
    pub points: Vec<Vec3>,
}

/// Display color as linear RGB in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NeuronColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Default for NeuronColor {
    fn default() -> Self {
        Self {
            r: 1.0,
            g: 0.0,
            b: 1.0,
        }
    }
}

/// Structural integrity violation found by [`Neuron::check_integrity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityError(pub String);

impl Display for IntegrityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "neuron integrity violated: {}", self.0)
    }
}

impl std::error::Error for IntegrityError {}

/// A named collection of neurites plus their side tables.
#[derive(Debug, Clone, PartialEq)]
pub struct Neuron {
    pub id: NeuronId,
    pub name: String,
    pub color: NeuronColor,
    pub visible: bool,
    pub(crate) nodes: HashMap<AnnotationId, Annotation>,
    pub(crate) root_ids: Vec<AnnotationId>,
    pub(crate) anchored_paths: HashMap<PathEndpoints, AnchoredPath>,
    pub(crate) notes: BTreeMap<AnnotationId, String>,
}

impl Neuron {
    /// Creates an empty, visible neuron.
    pub fn new(id: NeuronId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            color: NeuronColor::default(),
            visible: true,
            nodes: HashMap::new(),
            root_ids: Vec::new(),
            anchored_paths: HashMap::new(),
            notes: BTreeMap::new(),
        }
    }

    pub fn annotation(&self, id: AnnotationId) -> Option<&Annotation> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: AnnotationId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.nodes.values()
    }

    pub fn annotation_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Roots in neurite order.
    pub fn root_ids(&self) -> &[AnnotationId] {
        &self.root_ids
    }

    pub fn parent_of(&self, id: AnnotationId) -> Option<AnnotationId> {
        self.nodes.get(&id).and_then(|ann| ann.parent_id)
    }

    /// Ordered children; empty for unknown ids.
    pub fn children_of(&self, id: AnnotationId) -> &[AnnotationId] {
        self.nodes
            .get(&id)
            .map_or(&[][..], |ann| ann.child_ids.as_slice())
    }

    pub fn is_root(&self, id: AnnotationId) -> bool {
        self.nodes.get(&id).is_some_and(Annotation::is_root)
    }

    pub fn is_branch(&self, id: AnnotationId) -> bool {
        self.nodes.get(&id).is_some_and(Annotation::is_branch)
    }

    pub fn is_end(&self, id: AnnotationId) -> bool {
        self.nodes.get(&id).is_some_and(Annotation::is_end)
    }

    /// Breadth-first list of `id` and all of its descendants, `id` first.
    ///
    /// Returns an empty list for unknown ids. The result is a snapshot, not a
    /// live view.
    pub fn subtree_of(&self, id: AnnotationId) -> Vec<AnnotationId> {
        if !self.nodes.contains_key(&id) {
            return Vec::new();
        }
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            order.push(current);
            queue.extend(self.children_of(current).iter().copied());
        }
        order
    }

    /// Walks parent links up to the neurite root.
    ///
    /// Returns `None` for unknown ids or when the parent chain does not
    /// terminate within the node count (corrupt data).
    pub fn root_of(&self, id: AnnotationId) -> Option<AnnotationId> {
        self.path_to_root(id).last().copied()
    }

    /// `[id, parent, grandparent, ..., root]`; empty when `id` is unknown or the
    /// chain is broken.
    pub fn path_to_root(&self, id: AnnotationId) -> Vec<AnnotationId> {
        let mut path = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(ann) = self.nodes.get(&current) else {
                return Vec::new();
            };
            path.push(current);
            if path.len() > self.nodes.len() {
                return Vec::new();
            }
            cursor = ann.parent_id;
        }
        path
    }

    /// Two annotations share a neurite iff their roots are equal.
    pub fn same_neurite(&self, a: AnnotationId, b: AnnotationId) -> bool {
        match (self.root_of(a), self.root_of(b)) {
            (Some(root_a), Some(root_b)) => root_a == root_b,
            _ => false,
        }
    }

    /// Nearest annotation that is an ancestor-or-self of both `a` and `b`.
    pub fn common_ancestor(&self, a: AnnotationId, b: AnnotationId) -> Option<AnnotationId> {
        let ancestors_of_a: HashSet<AnnotationId> = self.path_to_root(a).into_iter().collect();
        self.path_to_root(b)
            .into_iter()
            .find(|id| ancestors_of_a.contains(id))
    }

    /// Note text, or `""` when no note is attached.
    pub fn note(&self, id: AnnotationId) -> &str {
        self.notes.get(&id).map_or("", String::as_str)
    }

    pub fn notes(&self) -> &BTreeMap<AnnotationId, String> {
        &self.notes
    }

    pub fn anchored_path(&self, a: AnnotationId, b: AnnotationId) -> Option<&AnchoredPath> {
        self.anchored_paths.get(&PathEndpoints::new(a, b))
    }

    pub fn anchored_paths(&self) -> impl Iterator<Item = &AnchoredPath> {
        self.anchored_paths.values()
    }

    /// Whether `a` and `b` are directly parent-linked.
    pub fn are_adjacent(&self, a: AnnotationId, b: AnnotationId) -> bool {
        self.parent_of(a) == Some(b) || self.parent_of(b) == Some(a)
    }

    /// Verifies every structural invariant listed in the module docs.
    pub fn check_integrity(&self) -> Result<(), IntegrityError> {
        for (id, ann) in &self.nodes {
            if ann.id != *id {
                return Err(IntegrityError(format!("node keyed {id} carries id {}", ann.id)));
            }
            if ann.neuron_id != self.id {
                return Err(IntegrityError(format!(
                    "node {id} claims neuron {} inside neuron {}",
                    ann.neuron_id, self.id
                )));
            }
            match ann.parent_id {
                Some(parent_id) => {
                    let occurrences = self
                        .children_of(parent_id)
                        .iter()
                        .filter(|child| **child == *id)
                        .count();
                    if !self.nodes.contains_key(&parent_id) || occurrences != 1 {
                        return Err(IntegrityError(format!(
                            "node {id} is not linked exactly once under parent {parent_id}"
                        )));
                    }
                }
                None => {
                    if self.root_ids.iter().filter(|root| **root == *id).count() != 1 {
                        return Err(IntegrityError(format!("root {id} missing from root list")));
                    }
                }
            }
            for child_id in &ann.child_ids {
                if self.parent_of(*child_id) != Some(*id) {
                    return Err(IntegrityError(format!(
                        "child {child_id} of {id} does not point back"
                    )));
                }
            }
            let path = self.path_to_root(*id);
            match path.last() {
                Some(root) if self.root_ids.contains(root) => {}
                _ => {
                    return Err(IntegrityError(format!(
                        "node {id} does not reach a listed root"
                    )))
                }
            }
        }
        for root in &self.root_ids {
            if !self.is_root(*root) {
                return Err(IntegrityError(format!("listed root {root} is not a root")));
            }
        }
        for endpoints in self.anchored_paths.keys() {
            if !self.are_adjacent(endpoints.first(), endpoints.second()) {
                return Err(IntegrityError(format!(
                    "anchored path {}-{} spans non-adjacent nodes",
                    endpoints.first(),
                    endpoints.second()
                )));
            }
        }
        for id in self.notes.keys() {
            if !self.nodes.contains_key(id) {
                return Err(IntegrityError(format!("note attached to missing node {id}")));
            }
        }
        Ok(())
    }

    // ---- crate-private link primitives ----------------------------------

    pub(crate) fn annotation_mut(&mut self, id: AnnotationId) -> Option<&mut Annotation> {
        self.nodes.get_mut(&id)
    }

    /// Inserts an already-linked annotation record; callers fix links.
    pub(crate) fn insert_node(&mut self, annotation: Annotation) {
        self.nodes.insert(annotation.id, annotation);
    }

    pub(crate) fn remove_node(&mut self, id: AnnotationId) -> Option<Annotation> {
        self.notes.remove(&id);
        self.root_ids.retain(|root| *root != id);
        self.nodes.remove(&id)
    }

    /// Appends `child` under `parent`, or inserts at `index` when given.
    pub(crate) fn link_child(
        &mut self,
        parent: AnnotationId,
        child: AnnotationId,
        index: Option<usize>,
    ) {
        if let Some(parent_ann) = self.nodes.get_mut(&parent) {
            if !parent_ann.child_ids.contains(&child) {
                let at = index.map_or(parent_ann.child_ids.len(), |value| {
                    value.min(parent_ann.child_ids.len())
                });
                parent_ann.child_ids.insert(at, child);
            }
            parent_ann.touch();
        }
        if let Some(child_ann) = self.nodes.get_mut(&child) {
            child_ann.parent_id = Some(parent);
            child_ann.touch();
        }
        self.root_ids.retain(|root| *root != child);
    }

    /// Cuts the edge between `child` and its parent.
    ///
    /// Returns `(parent, index_in_parent)` when an edge existed. The child is
    /// left parentless but is *not* added to the root list.
    pub(crate) fn unlink_from_parent(&mut self, child: AnnotationId) -> Option<(AnnotationId, usize)> {
        let parent = self.parent_of(child)?;
        let index = {
            let parent_ann = self.nodes.get_mut(&parent)?;
            let index = parent_ann.child_ids.iter().position(|id| *id == child)?;
            parent_ann.child_ids.remove(index);
            parent_ann.touch();
            index
        };
        if let Some(child_ann) = self.nodes.get_mut(&child) {
            child_ann.parent_id = None;
            child_ann.touch();
        }
        Some((parent, index))
    }

    pub(crate) fn push_root(&mut self, id: AnnotationId) {
        if !self.root_ids.contains(&id) {
            self.root_ids.push(id);
        }
    }

    /// Replaces `old` in the root list, preserving neurite order.
    pub(crate) fn replace_root(&mut self, old: AnnotationId, new: AnnotationId) {
        match self.root_ids.iter().position(|root| *root == old) {
            Some(index) => self.root_ids[index] = new,
            None => self.push_root(new),
        }
    }

    pub(crate) fn remove_root(&mut self, id: AnnotationId) {
        self.root_ids.retain(|root| *root != id);
    }

    pub(crate) fn insert_anchored_path(&mut self, path: AnchoredPath) {
        self.anchored_paths.insert(path.endpoints, path);
    }

    pub(crate) fn remove_anchored_path(
        &mut self,
        a: AnnotationId,
        b: AnnotationId,
    ) -> Option<AnchoredPath> {
        self.anchored_paths.remove(&PathEndpoints::new(a, b))
    }

    /// Removes the anchored paths on every listed edge; returns the removed keys.
    pub(crate) fn remove_anchored_paths(
        &mut self,
        edges: &[(AnnotationId, AnnotationId)],
    ) -> Vec<PathEndpoints> {
        edges
            .iter()
            .filter_map(|(a, b)| self.remove_anchored_path(*a, *b))
            .map(|path| path.endpoints)
            .collect()
    }

    /// Sets or clears (`""`) the note of `id`.
    pub(crate) fn set_note_text(&mut self, id: AnnotationId, text: &str) {
        if text.is_empty() {
            self.notes.remove(&id);
        } else {
            self.notes.insert(id, text.to_string());
        }
    }

    /// Makes `new_root` the root of its neurite by reversing every edge on
    /// its path to the current root.
    ///
    /// The new root takes the old root's slot in the root list. Returns
    /// `false` when `new_root` is unknown or already a root.
    pub(crate) fn reroot(&mut self, new_root: AnnotationId) -> bool {
        let path = self.path_to_root(new_root);
        let Some(old_root) = path.last().copied() else {
            return false;
        };
        if path.len() < 2 {
            return false;
        }
        self.replace_root(old_root, new_root);
        // all cuts first: parent_of must still see the old orientation
        for child in &path[..path.len() - 1] {
            self.unlink_from_parent(*child);
        }
        for pair in path.windows(2) {
            self.link_child(pair[0], pair[1], None);
        }
        true
    }

    /// Removes the whole neurite headed by `root_id` together with its notes
    /// and anchored paths.
    pub(crate) fn take_neurite(&mut self, root_id: AnnotationId) -> Option<DetachedNeurite> {
        if !self.is_root(root_id) {
            return None;
        }
        let ids = self.subtree_of(root_id);
        let members: HashSet<AnnotationId> = ids.iter().copied().collect();
        let path_keys: Vec<PathEndpoints> = self
            .anchored_paths
            .keys()
            .filter(|key| members.contains(&key.first()) && members.contains(&key.second()))
            .copied()
            .collect();
        let paths = path_keys
            .iter()
            .filter_map(|key| self.anchored_paths.remove(key))
            .collect();
        let notes = ids
            .iter()
            .filter_map(|id| self.notes.remove(id).map(|text| (*id, text)))
            .collect();
        let nodes = ids.iter().filter_map(|id| self.nodes.remove(id)).collect();
        self.remove_root(root_id);
        Some(DetachedNeurite {
            root_id,
            nodes,
            notes,
            paths,
        })
    }

    /// Inserts a neurite taken from another neuron as a new root.
    pub(crate) fn adopt_neurite(&mut self, neurite: DetachedNeurite) {
        for mut node in neurite.nodes {
            node.neuron_id = self.id;
            node.touch();
            self.nodes.insert(node.id, node);
        }
        for (id, text) in neurite.notes {
            self.notes.insert(id, text);
        }
        for path in neurite.paths {
            self.insert_anchored_path(path);
        }
        self.push_root(neurite.root_id);
    }
}

/// A neurite lifted out of its neuron, ready to be adopted by another one.
#[derive(Debug, Clone)]
pub(crate) struct DetachedNeurite {
    pub(crate) root_id: AnnotationId,
    nodes: Vec<Annotation>,
    notes: Vec<(AnnotationId, String)>,
    paths: Vec<AnchoredPath>,
}
