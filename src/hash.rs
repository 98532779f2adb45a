//! Structural content hashing of material graphs.
//!
//! The hash of a node folds in its kind, its parameters, its UV transform
//! and the recursive hashes of its sub-nodes. Node identity (the allocation
//! address) only keys the per-call memoization map, so two structurally
//! identical graphs built independently hash equal within a session. Hashes
//! are session-scoped and must never be persisted or compared across runs.

use std::collections::HashMap;

use xxhash_rust::xxh32::Xxh32;

use crate::graph::{NodeRef, ParamValue, node_identity};

const HASH_SEED: u32 = 0x5bd1_e995;

/// Whether the session reload stamp is folded into the hash.
///
/// Folding the stamp forces every cache key to miss once per synchronization
/// pass even when no parameter changed; excluding it yields a pure content
/// hash for change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadStamp {
    Include(u32),
    Excluded,
}

/// Per-call memoization map, keyed by node identity.
///
/// A fresh one is created for each top-level hashing call; sharing it across
/// calls would leak stale values once the host edits a node.
#[derive(Debug, Default)]
pub struct Visited {
    map: HashMap<usize, u32>,
}

impl Visited {
    pub fn new() -> Visited {
        Visited::default()
    }
}

/// Hash a node graph. `None` hashes to zero.
///
/// Shared sub-nodes (diamonds) are hashed once: the second path sees the
/// memoized value. A provisional zero is recorded before descending, so a
/// true cycle (not expected from the host) terminates by folding zero for
/// the back edge instead of recursing forever.
pub fn hash_node(node: Option<&NodeRef>, stamp: ReloadStamp, visited: &mut Visited) -> u32 {
    let Some(node) = node else {
        return 0;
    };

    let id = node_identity(node);
    if let Some(&h) = visited.map.get(&id) {
        return h;
    }
    visited.map.insert(id, 0);

    let mut acc = Xxh32::new(HASH_SEED);
    acc.update(&node.kind.tag().to_le_bytes());
    acc.update(&(node.params.len() as u32).to_le_bytes());

    // The stamp is folded unconditionally, even for nodes with no parameter
    // blocks, so purely procedural nodes are never cache-stable across syncs.
    if let ReloadStamp::Include(s) = stamp {
        acc.update(&s.to_le_bytes());
    }

    for (name, value) in &node.params {
        acc.update(name.as_bytes());
        acc.update(&[value.type_tag()]);
        match value {
            ParamValue::Float(v) => acc.update(&v.to_le_bytes()),
            ParamValue::Int(v) => acc.update(&v.to_le_bytes()),
            ParamValue::Bool(v) => acc.update(&[u8::from(*v)]),
            ParamValue::Color(c) => {
                for ch in c {
                    acc.update(&ch.to_le_bytes());
                }
            }
            ParamValue::Vector(v) => {
                for ch in v {
                    acc.update(&ch.to_le_bytes());
                }
            }
            ParamValue::Text(s) => acc.update(s.as_bytes()),
            ParamValue::Node(sub) => {
                let sub_hash = hash_node(sub.as_ref(), stamp, visited);
                acc.update(&sub_hash.to_le_bytes());
            }
        }
    }

    for v in node.uv.offset.iter().chain(node.uv.tiling.iter()) {
        acc.update(&v.to_le_bytes());
    }
    acc.update(&node.uv.rotation.to_le_bytes());

    let h = acc.digest();
    visited.map.insert(id, h);
    h
}

/// Convenience wrapper hashing with a fresh visited map.
pub fn hash_graph(node: &NodeRef, stamp: ReloadStamp) -> u32 {
    hash_node(Some(node), stamp, &mut Visited::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeBuilder, NodeKind};

    fn checker(size: f32) -> NodeRef {
        NodeBuilder::new(NodeKind::Checker)
            .float("size", size)
            .color("color1", [0.0, 0.0, 0.0, 1.0])
            .color("color2", [1.0, 1.0, 1.0, 1.0])
            .build()
    }

    #[test]
    fn identical_graphs_hash_equal() {
        let a = NodeBuilder::new(NodeKind::Mix)
            .float("amount", 0.5)
            .node("map1", checker(2.0))
            .build();
        let b = NodeBuilder::new(NodeKind::Mix)
            .float("amount", 0.5)
            .node("map1", checker(2.0))
            .build();
        assert_eq!(
            hash_graph(&a, ReloadStamp::Excluded),
            hash_graph(&b, ReloadStamp::Excluded)
        );
    }

    #[test]
    fn parameter_change_changes_hash() {
        let a = checker(2.0);
        let b = checker(3.0);
        assert_ne!(
            hash_graph(&a, ReloadStamp::Excluded),
            hash_graph(&b, ReloadStamp::Excluded)
        );
    }

    #[test]
    fn reload_stamp_forces_divergence() {
        let a = checker(2.0);
        let h1 = hash_graph(&a, ReloadStamp::Include(1));
        let h2 = hash_graph(&a, ReloadStamp::Include(2));
        assert_ne!(h1, h2);
        // Excluding the stamp restores a pure content hash.
        assert_eq!(
            hash_graph(&a, ReloadStamp::Excluded),
            hash_graph(&a, ReloadStamp::Excluded)
        );
    }

    #[test]
    fn stamp_applies_to_parameterless_nodes() {
        let bare = NodeBuilder::new(NodeKind::Noise).build();
        assert_ne!(
            hash_graph(&bare, ReloadStamp::Include(1)),
            hash_graph(&bare, ReloadStamp::Include(2))
        );
    }

    #[test]
    fn shared_subnode_is_hashed_once_and_terminates() {
        // Diamond: parent -> (shared, shared).
        let shared = checker(4.0);
        let parent = NodeBuilder::new(NodeKind::Mix)
            .node("map1", shared.clone())
            .node("map2", shared.clone())
            .build();

        let mut visited = Visited::new();
        let h = hash_node(Some(&parent), ReloadStamp::Excluded, &mut visited);
        assert_ne!(h, 0);

        // An equivalent tree with two *separate* but identical sub-nodes must
        // fold the same contribution.
        let tree = NodeBuilder::new(NodeKind::Mix)
            .node("map1", checker(4.0))
            .node("map2", checker(4.0))
            .build();
        assert_eq!(h, hash_graph(&tree, ReloadStamp::Excluded));
    }

    #[test]
    fn kind_distinguishes_otherwise_equal_nodes() {
        let a = NodeBuilder::new(NodeKind::Checker).float("size", 1.0).build();
        let b = NodeBuilder::new(NodeKind::Noise).float("size", 1.0).build();
        assert_ne!(
            hash_graph(&a, ReloadStamp::Excluded),
            hash_graph(&b, ReloadStamp::Excluded)
        );
    }
}
