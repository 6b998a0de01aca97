use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use trellis_core::{IdentityPath, ResolveError, SizeConstraints, TreeConfig};
use trellis_testing::prelude::*;

fn path(raw: &str) -> IdentityPath {
    IdentityPath::from_raw(raw)
}

#[test]
fn error_boundary_keeps_the_rest_of_the_tree() {
    let caught = Arc::new(Mutex::new(Vec::new()));
    let mut harness = TreeHarness::new();
    harness.set_root(column(vec![
        boundary(vec![label("ok"), failing("boom")], Arc::clone(&caught)),
        counter("a", 0),
    ]));

    assert_eq!(*caught.lock(), vec![path("Column,Boundary,Failing")]);
    let boundary = harness.node(&path("Column,Boundary")).expect("boundary node");
    assert_eq!(boundary.children().len(), 1);
    assert_eq!(boundary.children()[0].path(), &path("Column,Boundary,Label"));
    assert_eq!(harness.state::<i32>(&path("Column,$a")), Some(0));
}

#[test]
fn unhandled_failure_keeps_the_committed_tree() {
    let mut harness = TreeHarness::new();
    harness.set_root(column(vec![counter("a", 2)]));

    let err = harness
        .tree()
        .submit_description(column(vec![failing("boom")]), true)
        .expect_err("no boundary");
    match &err {
        ResolveError::Component {
            path: failed,
            component,
            ..
        } => {
            assert_eq!(failed, &path("Column,Failing"));
            assert_eq!(*component, "Failing");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.to_string().contains("boom"));
    assert_eq!(
        harness.tree().committed_result().map(|result| result.version()),
        Some(1)
    );
    assert_eq!(harness.state::<i32>(&path("Column,$a")), Some(2));
}

#[test]
fn deferred_subtree_follows_the_measured_constraints() {
    let renders = Arc::new(AtomicUsize::new(0));
    let mut harness = TreeHarness::new();
    harness.set_root(column(vec![
        responsive(100.0, counter("narrow", 1), label("wide"), Arc::clone(&renders)),
        counter("a", 0),
    ]));
    assert_eq!(renders.load(Ordering::SeqCst), 0);

    let placeholder = harness.node(&path("Column,Responsive")).expect("placeholder");
    assert!(placeholder.is_deferred());
    let narrow_constraints = SizeConstraints::loose(50.0, 50.0);
    let narrow = harness
        .tree()
        .resolve_deferred(&placeholder, narrow_constraints)
        .expect("narrow")
        .expect("narrow subtree");
    assert_eq!(narrow.path(), &path("Column,Responsive,$narrow"));
    assert_eq!(harness.state::<i32>(&path("Column,Responsive,$narrow")), Some(1));
    harness
        .tree()
        .resolve_deferred(&placeholder, narrow_constraints)
        .expect("cached");
    assert_eq!(renders.load(Ordering::SeqCst), 1);

    let wide_constraints = SizeConstraints::loose(300.0, 50.0);
    let wide = harness
        .tree()
        .resolve_deferred(&placeholder, wide_constraints)
        .expect("wide")
        .expect("wide subtree");
    assert_eq!(wide.path(), &path("Column,Responsive,Label"));
    assert_eq!(renders.load(Ordering::SeqCst), 2);

    // An update elsewhere carries the resolved subtree over.
    let result = harness.update(&path("Column,$a"), increment());
    assert_eq!(result.stats().recreated, 2);
    let placeholder = harness.node(&path("Column,Responsive")).expect("placeholder");
    let carried = placeholder
        .deferred()
        .and_then(|subtree| subtree.cached(wide_constraints))
        .expect("carried subtree");
    assert!(Arc::ptr_eq(&carried, &wide));
    assert_eq!(renders.load(Ordering::SeqCst), 2);
}

#[test]
fn attach_and_detach_follow_mounted_trees() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut harness = TreeHarness::new();
    harness.set_root(column(vec![
        tracked("a", Arc::clone(&events)),
        tracked("b", Arc::clone(&events)),
    ]));
    assert_eq!(harness.last_report().attached, 2);

    harness.set_root(column(vec![
        tracked("b", Arc::clone(&events)),
        tracked("c", Arc::clone(&events)),
    ]));
    let report = harness.last_report();
    assert_eq!((report.attached, report.detached), (1, 1));
    assert_eq!(
        *events.lock(),
        vec!["+Column,$a", "+Column,$b", "-Column,$a", "+Column,$c"]
    );

    harness.tree().release();
    assert_eq!(
        events.lock().iter().filter(|event| event.starts_with('-')).count(),
        3
    );
}

#[test]
fn transitions_compare_against_the_previous_mount() {
    let mut harness = TreeHarness::new();
    harness.set_root(column(vec![fading("f", 10), animated("x", "scale")]));
    let report = harness.last_report();
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.transitions[0].property(), "alpha");
    assert_eq!(report.transitions[0].duration_ms(), 0);
    let node = harness.node(&path("Column,$x")).expect("animated node");
    assert_eq!(node.transitions().len(), 1);
    assert_eq!(node.transitions()[0].property(), "scale");

    harness.set_root(column(vec![fading("f", 60), animated("x", "scale")]));
    assert_eq!(harness.last_report().transitions[0].duration_ms(), 50);
}

#[test]
fn disabled_transitions_report_nothing() {
    let mut harness = TreeHarness::with_config(TreeConfig::default().with_transitions(false));
    harness.set_root(column(vec![fading("f", 10), animated("x", "scale")]));
    assert!(harness.last_report().transitions.is_empty());
    let node = harness.node(&path("Column,$x")).expect("animated node");
    assert!(node.transitions().is_empty());
}

#[test]
fn removed_subtrees_release_their_state() {
    let mut harness = TreeHarness::new();
    harness.set_root(column(vec![counter("a", 1), counter("b", 2)]));
    harness.update(&path("Column,$a"), increment());
    assert_eq!(harness.state::<i32>(&path("Column,$a")), Some(2));

    harness.set_root(column(vec![counter("b", 2)]));
    assert_eq!(harness.state::<i32>(&path("Column,$a")), None);
    assert_eq!(harness.state::<i32>(&path("Column,$b")), Some(2));
    assert_eq!(harness.tree().state().container_count(), 1);
}
