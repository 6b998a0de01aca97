use std::sync::Arc;

use proptest::prelude::*;
use trellis_core::collections::path_set;
use trellis_core::{classify, Classification, OriginKind, StateUpdate, TreeConfig};
use trellis_testing::prelude::*;

const LEAVES: usize = 1000;

#[test]
fn single_leaf_update_touches_one_node_of_a_thousand() {
    let mut harness = TreeHarness::new();
    let first = harness.set_root(leaf_list(LEAVES));
    assert_eq!(first.stats().built, LEAVES + 1);

    let second = harness.update(&item_path(500), increment());
    let stats = second.stats();
    assert_eq!(stats.reconciled, 1);
    assert_eq!(stats.recreated, 1);
    assert_eq!(stats.reused, LEAVES - 1);
    assert_eq!(stats.built, 1);

    let before = first.root().expect("first root");
    let after = second.root().expect("second root");
    assert_eq!(after.origin().kind, OriginKind::Reconciled);
    let shared = before
        .children()
        .iter()
        .zip(after.children())
        .filter(|(before, after)| Arc::ptr_eq(before, after))
        .count();
    assert_eq!(shared, LEAVES - 1);
    assert!(!Arc::ptr_eq(&before.children()[500], &after.children()[500]));
    assert_eq!(harness.state::<i32>(&item_path(500)), Some(1));
    assert_eq!(harness.state::<i32>(&item_path(499)), Some(0));
}

#[test]
fn updates_to_several_leaves_recreate_each_of_them() {
    let mut harness = TreeHarness::new();
    let first = harness.set_root(leaf_list(20));
    harness
        .tree()
        .queue_state_update(&item_path(3), add(2), false);
    harness
        .tree()
        .queue_state_update(&item_path(11), StateUpdate::replace(7_i32), false);
    let second = harness.update(&item_path(3), increment());

    let stats = second.stats();
    assert_eq!((stats.reconciled, stats.recreated, stats.reused), (1, 2, 18));
    assert_eq!(harness.state::<i32>(&item_path(3)), Some(3));
    assert_eq!(harness.state::<i32>(&item_path(11)), Some(7));
    let before = first.root().expect("first root");
    let after = second.root().expect("second root");
    assert!(Arc::ptr_eq(&before.children()[0], &after.children()[0]));
}

#[test]
fn nested_groups_reconcile_only_the_path_to_the_update() {
    let mut harness = TreeHarness::new();
    harness.set_root(grid(8));
    let target = trellis_core::IdentityPath::from_raw("Grid,$row-2,$cell-5");
    assert_eq!(harness.state::<i32>(&target), Some(0));

    let result = harness.update(&target, add(4));
    let stats = result.stats();
    assert_eq!(stats.reconciled, 2);
    assert_eq!(stats.recreated, 1);
    assert_eq!(stats.reused, 7 + 7);
    assert_eq!(harness.state::<i32>(&target), Some(4));
}

#[test]
fn reconciliation_can_be_switched_off() {
    let mut harness = TreeHarness::with_config(TreeConfig::default().with_reconciliation(false));
    harness.set_root(leaf_list(LEAVES));
    let result = harness.update(&item_path(1), increment());
    let stats = result.stats();
    assert_eq!(stats.reused, 0);
    assert_eq!(stats.built, LEAVES + 1);
    assert_eq!(harness.state::<i32>(&item_path(1)), Some(1));
}

#[test]
fn updates_for_unknown_paths_leave_the_tree_reused() {
    let mut harness = TreeHarness::new();
    let first = harness.set_root(leaf_list(4));
    let stray = trellis_core::IdentityPath::from_raw("Elsewhere,$gone");
    let second = harness.update(&stray, increment());
    assert_eq!(second.stats().reused, 1);
    assert!(Arc::ptr_eq(
        first.root().expect("first root"),
        second.root().expect("second root")
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn classification_matches_mutated_leaves(mutated in proptest::collection::btree_set(0usize..12, 0..5)) {
        let mut harness = TreeHarness::new();
        harness.set_root(leaf_list(12));
        let root = harness.root();
        let mut paths = path_set();
        for index in &mutated {
            paths.insert(item_path(*index));
        }

        let expected_root = if mutated.is_empty() {
            Classification::Reuse
        } else {
            Classification::Reconcile
        };
        prop_assert_eq!(classify(&root, &paths), expected_root);
        for (index, child) in root.children().iter().enumerate() {
            let expected = if mutated.contains(&index) {
                Classification::Recreate
            } else {
                Classification::Reuse
            };
            prop_assert_eq!(classify(child, &paths), expected);
        }
    }
}
