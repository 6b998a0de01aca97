use super::*;
use crate::config::TreeConfig;
use crate::resolver::Resolver;
use crate::state::TreeState;
use crate::Component;
use std::sync::Arc;

type Events = Arc<Mutex<Vec<String>>>;

fn tracked(key: &str, events: &Events) -> Component {
    let attach = Arc::clone(events);
    let detach = Arc::clone(events);
    Component::terminal("Tracked", key.to_owned(), |_| Ok(()))
        .key(key)
        .on_attach(move |path| attach.lock().push(format!("+{path}")))
        .on_detach(move |path| detach.lock().push(format!("-{path}")))
        .build()
}

fn tree(children: Vec<Component>) -> Arc<ResolvedNode> {
    let children = Arc::new(children);
    let root = Component::group("Root", (), move |_| Ok(children.as_ref().clone())).build();
    Resolver::new(&TreeConfig::default(), TreeState::new().snapshot(), 1)
        .resolve_tree(&root, None)
        .expect("resolves")
        .root
        .expect("root")
}

#[test]
fn mount_diff_attaches_new_and_detaches_removed() {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let handler = AttachDetachHandler::new();

    let first = tree(vec![tracked("a", &events), tracked("b", &events)]);
    assert_eq!(handler.on_mounted(Some(&first)), (2, 0));
    assert_eq!(*events.lock(), vec!["+Root,$a", "+Root,$b"]);

    events.lock().clear();
    let second = tree(vec![tracked("b", &events), tracked("c", &events)]);
    assert_eq!(handler.on_mounted(Some(&second)), (1, 1));
    assert_eq!(*events.lock(), vec!["-Root,$a", "+Root,$c"]);
    assert!(handler.is_attached(&IdentityPath::from_raw("Root,$b")));
    assert_eq!(handler.attached_count(), 2);
}

#[test]
fn remounting_the_same_tree_is_a_no_op() {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let handler = AttachDetachHandler::new();
    let root = tree(vec![tracked("a", &events)]);
    handler.on_mounted(Some(&root));
    events.lock().clear();
    assert_eq!(handler.on_mounted(Some(&root)), (0, 0));
    assert!(events.lock().is_empty());
}

#[test]
fn empty_mount_and_detach_all_clear_everything() {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let handler = AttachDetachHandler::new();
    handler.on_mounted(Some(&tree(vec![tracked("a", &events)])));
    assert_eq!(handler.on_mounted(None), (0, 1));

    handler.on_mounted(Some(&tree(vec![tracked("x", &events), tracked("y", &events)])));
    events.lock().clear();
    assert_eq!(handler.detach_all(), 2);
    assert_eq!(*events.lock(), vec!["-Root,$x", "-Root,$y"]);
    assert_eq!(handler.attached_count(), 0);
}
