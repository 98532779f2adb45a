use proptest::prelude::*;

use shade_bridge::{NodeBuilder, NodeKind, NodeRef, ReloadStamp, hash_graph};

fn mix_over_checker(size: f32, amount: f32, tint: [f32; 4]) -> NodeRef {
    let checker = NodeBuilder::new(NodeKind::Checker)
        .float("size", size)
        .color("color1", [0.0, 0.0, 0.0, 1.0])
        .color("color2", tint)
        .build();
    NodeBuilder::new(NodeKind::Mix)
        .float("amount", amount)
        .node("map1", checker)
        .color("color2", [1.0, 1.0, 1.0, 1.0])
        .build()
}

proptest! {
    #[test]
    fn independently_built_equal_graphs_hash_equal(
        size in 0.1f32..64.0,
        amount in 0.0f32..1.0,
        r in 0.0f32..1.0,
    ) {
        let tint = [r, 0.5, 0.25, 1.0];
        let a = mix_over_checker(size, amount, tint);
        let b = mix_over_checker(size, amount, tint);
        prop_assert_eq!(
            hash_graph(&a, ReloadStamp::Excluded),
            hash_graph(&b, ReloadStamp::Excluded)
        );
    }

    #[test]
    fn any_float_parameter_change_changes_hash(
        size in 0.1f32..64.0,
        delta in 0.001f32..1.0,
    ) {
        let a = mix_over_checker(size, 0.5, [1.0, 0.5, 0.25, 1.0]);
        let b = mix_over_checker(size + delta, 0.5, [1.0, 0.5, 0.25, 1.0]);
        prop_assert_ne!(
            hash_graph(&a, ReloadStamp::Excluded),
            hash_graph(&b, ReloadStamp::Excluded)
        );
    }

    #[test]
    fn stamp_inclusion_partitions_sessions(
        size in 0.1f32..64.0,
        stamp in 0u32..1000,
    ) {
        let node = mix_over_checker(size, 0.5, [1.0, 1.0, 1.0, 1.0]);
        let h1 = hash_graph(&node, ReloadStamp::Include(stamp));
        let h2 = hash_graph(&node, ReloadStamp::Include(stamp.wrapping_add(1)));
        prop_assert_ne!(h1, h2);
        // Same stamp stays stable.
        prop_assert_eq!(h1, hash_graph(&node, ReloadStamp::Include(stamp)));
    }
}

#[test]
fn shared_diamond_equals_duplicated_tree() {
    let shared = NodeBuilder::new(NodeKind::Noise).float("size", 3.0).build();
    let diamond = NodeBuilder::new(NodeKind::Mix)
        .node("map1", shared.clone())
        .node("map2", shared)
        .build();

    let dup = || NodeBuilder::new(NodeKind::Noise).float("size", 3.0).build();
    let tree = NodeBuilder::new(NodeKind::Mix)
        .node("map1", dup())
        .node("map2", dup())
        .build();

    assert_eq!(
        hash_graph(&diamond, ReloadStamp::Excluded),
        hash_graph(&tree, ReloadStamp::Excluded)
    );
}

#[test]
fn hash_survives_deep_chains() {
    // A long single chain must neither overflow the stack nor collide with
    // a chain one link longer.
    let mut node = NodeBuilder::new(NodeKind::Checker).build();
    for _ in 0..500 {
        node = NodeBuilder::new(NodeKind::Output).node("map", node).build();
    }
    let h = hash_graph(&node, ReloadStamp::Excluded);

    let longer = NodeBuilder::new(NodeKind::Output).node("map", node).build();
    assert_ne!(h, hash_graph(&longer, ReloadStamp::Excluded));
}
