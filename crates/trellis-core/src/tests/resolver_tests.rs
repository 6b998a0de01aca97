use super::*;
use crate::error::ScopeError;
use crate::measure::Size;
use crate::node::Transition;
use crate::props::CommonProps;
use crate::state::{StateUpdate, TreeState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

fn path(raw: &str) -> IdentityPath {
    IdentityPath::from_raw(raw)
}

fn counter(key: &str, start: i32) -> Component {
    Component::terminal("Counter", start, |scope| {
        scope.state::<i32>()?;
        Ok(())
    })
    .key(key)
    .state(|start: &i32| *start)
    .measure(|_, _| Size::new(10.0, 10.0))
    .build()
}

fn label(text: &str) -> Component {
    Component::terminal("Label", text.to_owned(), |_| Ok(())).build()
}

fn failing() -> Component {
    Component::terminal("Failing", (), |_| Err("prepare failed".into())).build()
}

fn group(type_name: &'static str, children: Vec<Component>) -> Component {
    let children = Arc::new(children);
    let len = children.len();
    Component::group(type_name, len, move |_| Ok(children.as_ref().clone())).build()
}

/// `Screen` container rendering a `List` group of `count` keyed counters.
fn list(count: usize) -> Component {
    let list = Component::group("List", count, |scope| {
        let count = *scope.props::<usize>()?;
        Ok((0..count)
            .map(|index| counter(&format!("item-{index}"), 0))
            .collect())
    })
    .build();
    Component::container("Screen", count, move |_| Ok(Some(list.clone()))).build()
}

fn item(index: usize) -> IdentityPath {
    path(&format!("Screen,List,$item-{index}"))
}

fn resolve(
    state: &TreeState,
    config: &TreeConfig,
    root: &Component,
    previous: Option<&Arc<ResolvedNode>>,
) -> (Arc<ResolvedNode>, ResolveStats) {
    let output = Resolver::new(config, state.snapshot(), 1)
        .resolve_tree(root, previous)
        .expect("resolves");
    let resolved = output.root.expect("root node");
    state.commit(output.snapshot, &resolved.reachable_paths());
    (resolved, output.stats)
}

fn int_state(node: &ResolvedNode, at: &IdentityPath) -> Option<i32> {
    node.find(at)
        .and_then(|node| node.state_at(at))
        .and_then(|state| state.downcast_ref::<i32>())
        .copied()
}

#[test]
fn structural_siblings_are_numbered_by_occurrence() {
    let root = group(
        "Root",
        vec![label("a"), counter("x", 0), label("b"), label("c")],
    );
    let (resolved, _) = resolve(&TreeState::new(), &TreeConfig::default(), &root, None);
    let paths: Vec<String> = resolved
        .children()
        .iter()
        .map(|child| child.path().to_string())
        .collect();
    assert_eq!(paths, vec!["Root,Label", "Root,$x", "Root,Label!1", "Root,Label!2"]);
}

#[test]
fn duplicate_keys_fail_the_pass() {
    let root = group("Root", vec![counter("same", 0), counter("same", 1)]);
    let err = Resolver::new(&TreeConfig::default(), TreeState::new().snapshot(), 1)
        .resolve_tree(&root, None)
        .expect_err("duplicate key");
    assert!(matches!(err, ResolveError::DuplicateKey { ref key, .. } if key == "same"));
    assert!(!err.is_component_failure());
}

#[test]
fn empty_keys_fail_the_pass() {
    let root = group("Root", vec![counter("", 0)]);
    let err = Resolver::new(&TreeConfig::default(), TreeState::new().snapshot(), 1)
        .resolve_tree(&root, None)
        .expect_err("empty key");
    assert!(matches!(err, ResolveError::EmptyKey { .. }));
}

#[test]
fn keys_with_the_separator_fail_the_pass() {
    let inner = counter("x", 0);
    let wrap = Component::container("Wrap", (), move |_| Ok(Some(inner.clone())))
        .key("a")
        .build();
    let root = group("Root", vec![wrap, counter("a,$x", 5)]);
    let err = Resolver::new(&TreeConfig::default(), TreeState::new().snapshot(), 1)
        .resolve_tree(&root, None)
        .expect_err("aliasing key");
    assert!(matches!(err, ResolveError::InvalidKey { ref key, .. } if key == "a,$x"));
}

#[test]
fn container_and_rendered_group_share_one_node() {
    let (resolved, stats) = resolve(&TreeState::new(), &TreeConfig::default(), &list(3), None);
    assert_eq!(resolved.path(), &path("Screen,List"));
    assert_eq!(resolved.head_path(), &path("Screen"));
    assert_eq!(resolved.contributions().len(), 2);
    assert_eq!(resolved.children().len(), 3);
    assert_eq!(stats.built, 4);
    assert!(resolved.is_complete());
    assert_eq!(resolved.origin().kind, OriginKind::Built);
    let leaf = resolved.find(&item(1)).expect("item 1");
    assert_eq!(
        leaf.measure_hook()
            .and_then(|hook| hook.measure(SizeConstraints::loose(5.0, 50.0))),
        Some(Size::new(5.0, 10.0))
    );
}

#[test]
fn single_update_reconciles_only_the_changed_leaf() {
    let state = TreeState::new();
    let config = TreeConfig::default();
    let root = list(50);
    let (first, _) = resolve(&state, &config, &root, None);

    state.queue_update(&item(17), StateUpdate::new(|value: &mut i32| *value += 1), false);
    let (second, stats) = resolve(&state, &config, &root, Some(&first));

    assert_eq!(stats.reconciled, 1);
    assert_eq!(stats.recreated, 1);
    assert_eq!(stats.reused, 49);
    assert_eq!(stats.built, 1);
    assert_eq!(second.origin().kind, OriginKind::Reconciled);
    for (index, (before, after)) in first.children().iter().zip(second.children()).enumerate() {
        assert_eq!(Arc::ptr_eq(before, after), index != 17, "child {index}");
    }
    assert_eq!(int_state(&second, &item(17)), Some(1));
    assert_eq!(int_state(&second, &item(16)), Some(0));
    assert_eq!(state.read_state::<i32>(&item(17)), Some(1));
    assert_eq!(state.container_count(), 50);
}

#[test]
fn disabled_reconciliation_rebuilds_everything() {
    let state = TreeState::new();
    let config = TreeConfig::default().with_reconciliation(false);
    let root = list(5);
    let (first, _) = resolve(&state, &config, &root, None);
    state.queue_update(&item(2), StateUpdate::replace(9_i32), false);
    let (second, stats) = resolve(&state, &config, &root, Some(&first));
    assert_eq!(stats.reused, 0);
    assert_eq!(stats.built, 6);
    assert_eq!(int_state(&second, &item(2)), Some(9));
    assert!(!state.has_uncommitted_updates());
}

#[test]
fn changed_root_is_built_from_scratch() {
    let state = TreeState::new();
    let config = TreeConfig::default();
    let (first, _) = resolve(&state, &config, &list(3), None);
    state.queue_update(&item(0), StateUpdate::replace(4_i32), false);
    let (second, stats) = resolve(&state, &config, &list(4), Some(&first));
    assert_eq!(stats.reused, 0);
    assert_eq!(second.children().len(), 4);
    assert_eq!(int_state(&second, &item(0)), Some(4));
}

#[test]
fn classification_follows_mutated_paths() {
    let state = TreeState::new();
    let (root, _) = resolve(&state, &TreeConfig::default(), &list(3), None);
    let mut mutated = crate::collections::path_set();
    assert_eq!(classify(&root, &mutated), Classification::Reuse);

    mutated.insert(item(2));
    assert_eq!(classify(&root, &mutated), Classification::Reconcile);
    let leaf = &root.children()[2];
    assert_eq!(classify(leaf, &mutated), Classification::Recreate);
    assert_eq!(classify(&root.children()[1], &mutated), Classification::Reuse);

    mutated.insert(path("Screen"));
    assert_eq!(classify(&root, &mutated), Classification::Recreate);
}

#[test]
fn interrupted_pass_parks_children_and_resume_completes_it() {
    let config = TreeConfig::default();
    let root = list(6);
    let state = TreeState::new();
    let checks = AtomicUsize::new(0);
    let check = || checks.fetch_add(1, Ordering::SeqCst) >= 2;

    let partial = Resolver::new(&config, state.snapshot(), 1)
        .with_interrupt(&check)
        .resolve_tree(&root, None)
        .expect("partial");
    assert!(partial.is_partial());
    assert!(partial.stats.interrupted);
    let parked = partial.root.as_ref().expect("partial root");
    assert_eq!(parked.children().len(), 2);
    assert_eq!(parked.unresolved_count(), 4);

    let resumed = Resolver::resume(&config, partial, 1).expect("resumed");
    assert!(!resumed.is_partial());
    assert!(resumed.stats.resumed);
    let resumed_root = resumed.root.expect("root");
    assert_eq!(resumed_root.origin().kind, OriginKind::Resumed);

    let (uninterrupted, _) = resolve(&TreeState::new(), &config, &root, None);
    let paths = |node: &ResolvedNode| -> Vec<String> {
        node.children().iter().map(|c| c.path().to_string()).collect()
    };
    assert_eq!(paths(&resumed_root), paths(&uninterrupted));
    assert_eq!(resumed_root.node_count(), uninterrupted.node_count());
    for index in 0..6 {
        assert_eq!(int_state(&resumed_root, &item(index)), Some(0));
    }
}

#[test]
fn reconciliation_is_not_interrupted() {
    let state = TreeState::new();
    let config = TreeConfig::default();
    let root = list(4);
    let (first, _) = resolve(&state, &config, &root, None);
    state.queue_update(&item(1), StateUpdate::replace(2_i32), false);
    let always = || true;
    let output = Resolver::new(&config, state.snapshot(), 2)
        .with_interrupt(&always)
        .resolve_tree(&root, Some(&first))
        .expect("reconciled");
    assert!(!output.is_partial());
    assert!(!output.stats.interrupted);
}

#[test]
fn error_boundary_swallows_failing_child() {
    let caught = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&caught);
    let children = Arc::new(vec![label("ok"), failing()]);
    let boundary = Component::group("Boundary", (), move |_| Ok(children.as_ref().clone()))
        .error_boundary(move |scope| {
            sink.lock()
                .expect("caught")
                .push((scope.boundary().clone(), scope.failed().clone(), scope.error().to_string()));
        })
        .build();
    let (resolved, _) = resolve(&TreeState::new(), &TreeConfig::default(), &boundary, None);
    assert_eq!(resolved.children().len(), 1);
    assert_eq!(
        *caught.lock().expect("caught"),
        vec![(
            path("Boundary"),
            path("Boundary,Failing"),
            "prepare failed".to_owned()
        )]
    );
}

#[test]
fn failure_without_boundary_fails_the_pass() {
    let root = group("Root", vec![label("ok"), failing()]);
    let err = Resolver::new(&TreeConfig::default(), TreeState::new().snapshot(), 1)
        .resolve_tree(&root, None)
        .expect_err("unhandled");
    match err {
        ResolveError::Component {
            path: failed,
            component,
            ..
        } => {
            assert_eq!(failed, path("Root,Failing"));
            assert_eq!(component, "Failing");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

fn catching_group(
    children: Vec<Component>,
    caught: &Arc<Mutex<Vec<IdentityPath>>>,
) -> Component {
    let children = Arc::new(children);
    let sink = Arc::clone(caught);
    Component::group("Boundary", (), move |_| Ok(children.as_ref().clone()))
        .error_boundary(move |scope| {
            sink.lock().expect("caught").push(scope.failed().clone());
        })
        .build()
}

#[test]
fn resumed_children_stay_under_their_error_boundary() {
    let config = TreeConfig::default();
    let caught = Arc::new(Mutex::new(Vec::new()));
    let root = catching_group(vec![label("a"), label("b"), failing()], &caught);
    let checks = AtomicUsize::new(0);
    let check = || checks.fetch_add(1, Ordering::SeqCst) >= 1;

    let partial = Resolver::new(&config, TreeState::new().snapshot(), 1)
        .with_interrupt(&check)
        .resolve_tree(&root, None)
        .expect("partial");
    assert!(partial.is_partial());
    assert!(caught.lock().expect("caught").is_empty());

    let resumed = Resolver::resume(&config, partial, 1).expect("boundary handles the failure");
    let resumed_root = resumed.root.expect("root");
    assert_eq!(resumed_root.children().len(), 2);
    assert_eq!(*caught.lock().expect("caught"), vec![path("Boundary,Failing")]);

    let (uninterrupted, _) = resolve(&TreeState::new(), &config, &root, None);
    assert_eq!(uninterrupted.children().len(), resumed_root.children().len());
}

#[test]
fn recreated_children_stay_under_their_error_boundary() {
    let fragile = Component::terminal("Fragile", (), |scope| {
        if *scope.state::<i32>()? > 0 {
            return Err("fragile".into());
        }
        Ok(())
    })
    .state(|_: &()| 0_i32)
    .build();
    let caught = Arc::new(Mutex::new(Vec::new()));
    let root = catching_group(vec![label("ok"), fragile], &caught);
    let state = TreeState::new();
    let config = TreeConfig::default();
    let (first, _) = resolve(&state, &config, &root, None);
    assert_eq!(first.children().len(), 2);

    state.queue_update(&path("Boundary,Fragile"), StateUpdate::replace(1_i32), false);
    let (second, stats) = resolve(&state, &config, &root, Some(&first));
    assert_eq!((stats.reconciled, stats.recreated, stats.reused), (1, 1, 1));
    assert_eq!(second.children().len(), 1);
    assert_eq!(second.children()[0].path(), &path("Boundary,Label"));
    assert_eq!(*caught.lock().expect("caught"), vec![path("Boundary,Fragile")]);
}

#[test]
fn boundary_does_not_catch_its_own_failure() {
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&handled);
    let inner = Component::group("Inner", (), |_| Err("inner failed".into()))
        .error_boundary(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();
    let err = Resolver::new(&TreeConfig::default(), TreeState::new().snapshot(), 1)
        .resolve_tree(&group("Root", vec![inner]), None)
        .expect_err("propagates");
    assert!(err.is_component_failure());
    assert_eq!(handled.load(Ordering::SeqCst), 0);
}

#[test]
fn boundary_updates_switch_to_fallback_on_next_pass() {
    let boundary = Component::group("Boundary", (), |scope| {
        if *scope.state::<bool>()? {
            Ok(vec![label("fallback")])
        } else {
            Ok(vec![failing()])
        }
    })
    .state(|_: &()| false)
    .error_boundary(|scope| {
        let boundary = scope.boundary().clone();
        scope.queue_update(&boundary, StateUpdate::replace(true));
    })
    .build();
    let state = TreeState::new();
    let config = TreeConfig::default();
    let (first, _) = resolve(&state, &config, &boundary, None);
    assert!(first.children().is_empty());
    assert_eq!(state.pending_count(&path("Boundary")), 1);

    let (second, stats) = resolve(&state, &config, &boundary, Some(&first));
    assert_eq!(stats.recreated, 1);
    assert_eq!(second.children().len(), 1);
    assert_eq!(second.children()[0].path(), &path("Boundary,Label"));
}

#[test]
fn size_dependent_container_defers_until_constraints_are_known() {
    let renders = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&renders);
    let responsive = Component::container("Responsive", (), move |scope| {
        counted.fetch_add(1, Ordering::SeqCst);
        let wide = scope
            .constraints()
            .is_some_and(|constraints| constraints.max_width >= 100.0);
        Ok(Some(if wide { label("wide") } else { counter("narrow", 3) }))
    })
    .size_dependent()
    .common(CommonProps::new().test_tag("responsive"))
    .build();
    let state = TreeState::new();
    let config = TreeConfig::default();
    let (root, _) = resolve(&state, &config, &group("Root", vec![responsive]), None);

    let placeholder = &root.children()[0];
    assert!(placeholder.is_deferred());
    assert!(placeholder
        .measure_hook()
        .is_some_and(|hook| hook.is_deferred()));
    assert_eq!(placeholder.common().test_tag.as_deref(), Some("responsive"));
    assert_eq!(renders.load(Ordering::SeqCst), 0);

    let subtree = placeholder.deferred().expect("deferred subtree");
    let output = Resolver::new(&config, state.snapshot(), 1)
        .resolve_deferred(subtree, SizeConstraints::loose(50.0, 50.0))
        .expect("narrow");
    let narrow = output.root.expect("narrow root");
    assert_eq!(renders.load(Ordering::SeqCst), 1);
    assert_eq!(narrow.path(), &path("Root,Responsive,$narrow"));
    assert_eq!(narrow.head_path(), &path("Root,Responsive"));
    // The placeholder carries the container's common props.
    assert_eq!(narrow.common().test_tag, None);
    assert_eq!(
        output
            .snapshot
            .container(&path("Root,Responsive,$narrow"))
            .and_then(|state| state.downcast_ref::<i32>()),
        Some(&3)
    );

    let wide = Resolver::new(&config, state.snapshot(), 1)
        .resolve_deferred(subtree, SizeConstraints::loose(200.0, 50.0))
        .expect("wide")
        .root
        .expect("wide root");
    assert_eq!(wide.path(), &path("Root,Responsive,Label"));
}

#[test]
fn probed_child_is_not_resolved_twice() {
    let prepares = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&prepares);
    let child = Component::terminal("Probed", (), move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .build();
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let parent = Component::group("Parent", (), move |scope| {
        let probed = scope.probe(&child)?.map(|node| node.path().clone());
        *sink.lock().expect("seen") = probed;
        Ok(vec![child.clone()])
    })
    .build();
    let (resolved, stats) = resolve(&TreeState::new(), &TreeConfig::default(), &parent, None);
    assert_eq!(prepares.load(Ordering::SeqCst), 1);
    assert_eq!(stats.built, 2);
    assert_eq!(*seen.lock().expect("seen"), Some(path("Parent,Probed")));
    assert_eq!(resolved.children()[0].path(), &path("Parent,Probed"));
}

#[test]
fn transitions_attachables_and_working_ranges_are_collected() {
    let animated = Component::terminal("Animated", (), |_| Ok(()))
        .key("a")
        .transition(|_| Ok(Transition::new("alpha", 300)))
        .on_attach(|_| {})
        .working_range("prefetch")
        .build();
    let deferred = Component::terminal("Fading", 1_u8, |_| Ok(()))
        .transition(|_| Ok(Transition::new("alpha", 1)))
        .needs_previous_render_data()
        .build();
    let root = group("Root", vec![animated, deferred]);

    let output = Resolver::new(&TreeConfig::default(), TreeState::new().snapshot(), 1)
        .resolve_tree(&root, None)
        .expect("resolves");
    let resolved = output.root.expect("root");
    let leaf = &resolved.children()[0];
    assert_eq!(leaf.transitions().len(), 1);
    assert_eq!(leaf.transitions()[0].owner(), Some(&path("Root,$a")));
    assert_eq!(leaf.attachables()[0].id(), &path("Root,$a"));
    assert_eq!(&*leaf.working_ranges()[0].name, "prefetch");
    assert_eq!(output.render_data_requests.len(), 1);
    assert_eq!(output.render_data_requests[0].path(), &path("Root,Fading"));

    let output = Resolver::new(
        &TreeConfig::default().with_transitions(false),
        TreeState::new().snapshot(),
        1,
    )
    .resolve_tree(&root, None)
    .expect("resolves");
    let resolved = output.root.expect("root");
    assert!(resolved.children()[0].transitions().is_empty());
    assert!(output.render_data_requests.is_empty());
}

#[test]
fn common_props_flow_into_inherited_props() {
    use crate::props::LayoutDirection;
    let leaf = label("leaf");
    let inner = Component::group("Inner", (), move |_| Ok(vec![leaf.clone()]))
        .common(CommonProps::new().enabled(false))
        .build();
    let outer = Component::container("Outer", (), move |_| Ok(Some(inner.clone())))
        .common(CommonProps::new().layout_direction(LayoutDirection::Rtl).enabled(true))
        .build();
    let (resolved, _) = resolve(&TreeState::new(), &TreeConfig::default(), &outer, None);
    // The container is outer to the group it renders, so its props win.
    assert_eq!(resolved.common().enabled, Some(true));
    assert_eq!(resolved.inherited().layout_direction, LayoutDirection::Rtl);
    let child = &resolved.children()[0];
    assert!(child.inherited().enabled);
    assert_eq!(child.inherited().layout_direction, LayoutDirection::Rtl);
}

#[test]
fn props_type_mismatch_surfaces_as_component_failure() {
    let wrong = Component::group("Wrong", 1_u8, |scope| {
        scope.props::<String>()?;
        Ok(Vec::new())
    })
    .build();
    let err = Resolver::new(&TreeConfig::default(), TreeState::new().snapshot(), 1)
        .resolve_tree(&wrong, None)
        .expect_err("mismatch");
    let ResolveError::Component { source, .. } = err else {
        panic!("expected a component failure");
    };
    assert!(source.downcast_ref::<ScopeError>().is_some());
}
