use super::*;
use crate::props::LayoutDirection;

fn path(raw: &str) -> IdentityPath {
    IdentityPath::from_raw(raw)
}

fn built(raw: &str, kind: NodeKind) -> ResolvedNode {
    ResolvedNode::new(
        path(raw),
        kind,
        NodeOrigin {
            pass: 1,
            kind: OriginKind::Built,
        },
    )
}

fn leaf(raw: &str) -> ResolvedNode {
    let mut node = built(raw, NodeKind::Mount);
    let component = Component::terminal("Leaf", raw.to_owned(), |_| Ok(())).build();
    node.push_contribution(Contribution::new(component, path(raw), None));
    node
}

fn contribute(node: &mut ResolvedNode, type_name: &'static str, raw: &str) {
    let component = Component::container(type_name, (), |_| Ok(None)).build();
    node.push_contribution(Contribution::new(component, path(raw), None));
}

#[test]
fn contribution_chain_runs_tail_to_head() {
    let mut node = built("Screen,List", NodeKind::Group);
    contribute(&mut node, "List", "Screen,List");
    contribute(&mut node, "Screen", "Screen");

    assert_eq!(node.path(), &path("Screen,List"));
    assert_eq!(node.head_path(), &path("Screen"));
    assert_eq!(
        node.tail().map(|c| c.component().type_name()),
        Some("List")
    );
    assert_eq!(
        node.head().map(|c| c.component().type_name()),
        Some("Screen")
    );
}

#[test]
fn find_follows_paths_into_children() {
    let mut root = built("Root", NodeKind::Group);
    contribute(&mut root, "Root", "Root");
    root.push_child(leaf("Root,$a").seal());
    root.push_child(leaf("Root,$b").seal());
    let root = root.seal();

    assert_eq!(root.node_count(), 3);
    assert!(root.find(&path("Root,$b")).is_some());
    assert!(root.find(&path("Root,$c")).is_none());
    assert!(root.find(&path("Other,$a")).is_none());
    assert_eq!(root.find(&path("Root")).map(|n| n.path()), Some(&path("Root")));
}

#[test]
fn sealing_reports_parked_descendants_as_incomplete() {
    let mut parent = built("Root", NodeKind::Group);
    contribute(&mut parent, "Root", "Root");
    let mut child = built("Root,Group", NodeKind::Group);
    contribute(&mut child, "Group", "Root,Group");
    let pending = Component::terminal("Leaf", (), |_| Ok(())).build();
    child.set_unresolved(UnresolvedChildren {
        parent: InheritedProps::default(),
        children: vec![(path("Root,Group,Leaf"), pending)],
    });
    let child = child.seal();
    assert!(!child.is_complete());
    assert_eq!(child.unresolved_count(), 1);

    parent.push_child(child);
    let parent = parent.seal();
    assert!(parent.is_sealed());
    assert!(!parent.is_complete());
}

#[test]
fn reopen_clones_shared_nodes_and_moves_unique_ones() {
    let shared = leaf("Leaf").seal();
    let keep = Arc::clone(&shared);
    let reopened = ResolvedNode::reopen(shared);
    assert!(!reopened.is_sealed());
    assert!(keep.is_sealed());

    let unique = leaf("Leaf").seal();
    let reopened = ResolvedNode::reopen(unique);
    assert!(!reopened.is_sealed());
}

#[test]
fn inherited_props_follow_parent_then_own_common_props() {
    let mut node = leaf("Leaf");
    node.merge_common(&CommonProps::new().enabled(false));
    node.apply_parent_dependent(InheritedProps {
        enabled: true,
        layout_direction: LayoutDirection::Rtl,
    });
    assert_eq!(
        node.inherited(),
        InheritedProps {
            enabled: false,
            layout_direction: LayoutDirection::Rtl,
        }
    );
}

#[test]
fn outer_common_props_win() {
    let mut node = leaf("Leaf");
    node.merge_common(&CommonProps::new().alpha(0.5).test_tag("inner"));
    node.merge_common(&CommonProps::new().alpha(1.0));
    assert_eq!(node.common().alpha, Some(1.0));
    assert_eq!(node.common().test_tag.as_deref(), Some("inner"));
}

#[test]
fn reachable_paths_include_resolved_deferred_subtrees() {
    let component = Component::container("Responsive", (), |_| Ok(None))
        .size_dependent()
        .build();
    let subtree = Arc::new(DeferredSubtree::new(
        component.clone(),
        path("Root,Responsive"),
        Ambient::default(),
        None,
    ));
    let mut placeholder = built("Root,Responsive", NodeKind::Deferred(Arc::clone(&subtree)));
    placeholder.push_contribution(Contribution::new(component, path("Root,Responsive"), None));
    let placeholder = placeholder.seal();
    assert!(placeholder.is_deferred());
    assert!(!placeholder.reachable_paths().contains(&path("Root,Responsive,Label")));

    let constraints = SizeConstraints::loose(100.0, 100.0);
    subtree.store(constraints, leaf("Root,Responsive,Label").seal());
    let paths = placeholder.reachable_paths();
    assert!(paths.contains(&path("Root,Responsive")));
    assert!(paths.contains(&path("Root,Responsive,Label")));
    assert!(subtree.cached(constraints).is_some());
    assert!(subtree.cached(SizeConstraints::exact(1.0, 1.0)).is_none());
}

#[test]
fn state_at_reads_the_contributed_container() {
    let mut node = built("Counter", NodeKind::Mount);
    let component = Component::terminal("Counter", (), |_| Ok(())).build();
    node.push_contribution(Contribution::new(
        component,
        path("Counter"),
        Some(StateValue::new(41_i32)),
    ));
    assert_eq!(
        node.state_at(&path("Counter")).and_then(|s| s.downcast_ref::<i32>()),
        Some(&41)
    );
    assert!(node.state_at(&path("Other")).is_none());
}

#[test]
fn walk_visits_parents_before_children() {
    let mut root = built("Root", NodeKind::Group);
    contribute(&mut root, "Root", "Root");
    root.push_child(leaf("Root,$a").seal());
    let root = root.seal();
    let mut visited = Vec::new();
    root.walk(&mut |node| visited.push(node.path().to_string()));
    assert_eq!(visited, vec!["Root".to_owned(), "Root,$a".to_owned()]);
}
