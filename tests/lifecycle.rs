use json_state_tree::types::{self, Disambiguation};
use json_state_tree::{EngineError, LifecycleState, Patch, ReactiveSubstrate, Type};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;

fn todo() -> Type {
    types::model("Todo")
        .prop("id", types::identifier())
        .prop("title", types::string())
        .build()
        .unwrap()
}

fn board() -> Type {
    types::model("Board")
        .prop("inbox", types::array(todo()))
        .prop("done", types::array(todo()))
        .prop(
            "settings",
            types::optional(
                types::model("Settings").prop("theme", types::string()).build().unwrap(),
                json!({"theme": "light"}),
            ),
        )
        .build()
        .unwrap()
}

#[test]
fn destroyed_nodes_are_dead_for_good() {
    let mut tree = board()
        .create(&json!({"inbox": [{"id": "a", "title": "A"}], "done": []}))
        .unwrap();
    let root = tree.root();
    let item = tree.resolve_path(root, "/inbox/0").unwrap();
    let title = tree.child(item, "title").unwrap().unwrap();
    let listener = tree.on_patch(item, |_, _| {}).unwrap();

    tree.destroy(item).unwrap();

    assert_eq!(tree.state(item), LifecycleState::Dead);
    assert_eq!(tree.state(title), LifecycleState::Dead);
    assert!(tree.snapshot(item).unwrap_err().is_lifecycle());
    let err = tree.set_property(item, "title", &json!("B")).unwrap_err();
    assert!(err.is_lifecycle(), "{err}");
    // listeners on destroyed nodes are dropped
    assert!(!tree.unsubscribe(listener));
    assert_eq!(tree.snapshot(root).unwrap()["inbox"], json!([]));
}

#[test]
fn detached_items_can_be_attached_elsewhere() {
    let mut tree = board()
        .create(&json!({"inbox": [{"id": "a", "title": "A"}, {"id": "b", "title": "B"}], "done": []}))
        .unwrap();
    let root = tree.root();
    let patches = Rc::new(RefCell::new(Vec::new()));
    let sink = patches.clone();
    tree.on_patch(root, move |patch, _| sink.borrow_mut().push(patch.clone()))
        .unwrap();

    let inbox = tree.child(root, "inbox").unwrap().unwrap();
    let done = tree.child(root, "done").unwrap().unwrap();
    let a = tree.child(inbox, "0").unwrap().unwrap();

    tree.detach(a).unwrap();
    assert_eq!(tree.state(a), LifecycleState::Detaching);
    assert_eq!(tree.parent(a).unwrap(), None);
    assert_eq!(tree.snapshot(a).unwrap(), json!({"id": "a", "title": "A"}));
    let err = tree.set_property(a, "title", &json!("A!")).unwrap_err();
    assert!(
        matches!(err, EngineError::Lifecycle { state: LifecycleState::Detaching, .. }),
        "{err}"
    );

    tree.attach_item(done, 0, a).unwrap();
    assert!(tree.is_alive(a));
    assert_eq!(tree.path(a).unwrap().to_string(), "/done/0");
    tree.set_property(a, "title", &json!("A!")).unwrap();

    assert_eq!(
        *patches.borrow(),
        vec![
            Patch::remove("/inbox/0", json!({"id": "a", "title": "A"})),
            Patch::add("/done/0", json!({"id": "a", "title": "A"})),
            Patch::replace("/done/0/title", json!("A!"), json!("A")),
        ]
    );
}

#[test]
fn detached_properties_reset_to_their_default() {
    let mut tree = board()
        .create(&json!({"inbox": [], "done": [], "settings": {"theme": "dark"}}))
        .unwrap();
    let root = tree.root();
    let settings = tree.child(root, "settings").unwrap().unwrap();

    tree.detach(settings).unwrap();

    assert_eq!(tree.snapshot(settings).unwrap(), json!({"theme": "dark"}));
    let fresh = tree.child(root, "settings").unwrap().unwrap();
    assert_ne!(fresh, settings);
    assert_eq!(tree.snapshot(fresh).unwrap(), json!({"theme": "light"}));
}

#[test]
fn roots_cannot_be_detached() {
    let mut tree = todo().create(&json!({"id": "a", "title": "A"})).unwrap();
    let root = tree.root();
    let err = tree.detach(root).unwrap_err();
    assert_eq!(err.to_string(), "invariant violation: a root node cannot be detached");
}

#[test]
fn attaching_checks_the_element_type() {
    let mut tree = board()
        .create(&json!({"inbox": [], "done": [], "settings": {"theme": "dark"}}))
        .unwrap();
    let root = tree.root();
    let settings = tree.child(root, "settings").unwrap().unwrap();
    let done = tree.child(root, "done").unwrap().unwrap();
    tree.detach(settings).unwrap();

    let err = tree.attach_item(done, 0, settings).unwrap_err();
    assert!(matches!(err, EngineError::Invariant(_)), "{err}");
    assert_eq!(tree.state(settings), LifecycleState::Detaching);
}

#[test]
fn external_box_changes_sync_back() {
    let ty = types::model("Gauge").prop("level", types::number()).build().unwrap();
    let mut tree = ty.create(&json!({"level": 1})).unwrap();
    let root = tree.root();
    let level = tree.child(root, "level").unwrap().unwrap();
    let handle = tree.observable(level).unwrap().unwrap();
    let patches = Rc::new(RefCell::new(Vec::new()));
    let sink = patches.clone();
    tree.on_patch(root, move |patch, _| sink.borrow_mut().push(patch.clone()))
        .unwrap();

    assert!(!tree.sync_external(level).unwrap());

    tree.substrate_mut().set(handle, json!(3));
    assert!(tree.sync_external(level).unwrap());
    assert_eq!(tree.snapshot(root).unwrap(), json!({"level": 3}));

    tree.substrate_mut().set(handle, json!("high"));
    let err = tree.sync_external(level).unwrap_err();
    assert!(err.as_validation().is_some(), "{err}");
    assert_eq!(tree.substrate().get(handle), Some(json!(3)));
    assert_eq!(tree.snapshot(root).unwrap(), json!({"level": 3}));

    assert_eq!(*patches.borrow(), vec![Patch::replace("/level", json!(3), json!(1))]);
}

#[test]
fn box_writes_are_queued_until_synced() {
    let ty = types::model("Gauge")
        .prop("level", types::number())
        .prop("limit", types::number())
        .build()
        .unwrap();
    let mut tree = ty.create(&json!({"level": 1, "limit": 10})).unwrap();
    let root = tree.root();
    let level = tree.child(root, "level").unwrap().unwrap();
    let limit = tree.child(root, "limit").unwrap().unwrap();
    let patches = Rc::new(RefCell::new(Vec::new()));
    let sink = patches.clone();
    tree.on_patch(root, move |patch, _| sink.borrow_mut().push(patch.clone()))
        .unwrap();

    // the engine's own writes are not queued
    tree.set_property(root, "level", &json!(2)).unwrap();
    assert!(tree.pending_external().is_empty());

    let level_box = tree.observable(level).unwrap().unwrap();
    let limit_box = tree.observable(limit).unwrap().unwrap();
    tree.substrate_mut().set(limit_box, json!(20));
    tree.substrate_mut().set(level_box, json!(5));
    assert_eq!(tree.pending_external(), vec![limit, level]);

    assert_eq!(tree.sync_external_changes().unwrap(), vec![limit, level]);
    assert!(tree.pending_external().is_empty());
    assert_eq!(tree.snapshot(root).unwrap(), json!({"level": 5, "limit": 20}));
    assert_eq!(
        *patches.borrow(),
        vec![
            Patch::replace("/level", json!(2), json!(1)),
            Patch::replace("/limit", json!(20), json!(10)),
            Patch::replace("/level", json!(5), json!(2)),
        ]
    );

    // a rejected write is reverted; the others still land
    tree.substrate_mut().set(level_box, json!("high"));
    tree.substrate_mut().set(limit_box, json!(30));
    let err = tree.sync_external_changes().unwrap_err();
    assert!(err.as_validation().is_some(), "{err}");
    assert_eq!(tree.substrate().get(level_box), Some(json!(5)));
    assert_eq!(tree.snapshot(root).unwrap(), json!({"level": 5, "limit": 30}));
    assert!(tree.pending_external().is_empty());
}

#[test]
fn destroyed_nodes_stop_observing_their_boxes() {
    let mut tree = board()
        .create(&json!({"inbox": [{"id": "a", "title": "A"}], "done": []}))
        .unwrap();
    let root = tree.root();
    let inbox = tree.child(root, "inbox").unwrap().unwrap();
    let first = tree.child(inbox, "0").unwrap().unwrap();
    let title = tree.child(first, "title").unwrap().unwrap();
    let handle = tree.observable(title).unwrap().unwrap();

    tree.substrate_mut().set(handle, json!("renamed"));
    assert_eq!(tree.pending_external(), vec![title]);
    tree.remove_item(inbox, 0).unwrap();

    assert!(tree.pending_external().is_empty());
    assert_eq!(tree.substrate().get(handle), None);
    assert_eq!(tree.sync_external_changes().unwrap(), Vec::new());
}

#[test]
fn listeners_follow_a_replaced_node() {
    let square = types::model("Square")
        .prop("kind", types::literal("square").unwrap())
        .prop("size", types::number())
        .build()
        .unwrap();
    let circle = types::model("Circle")
        .prop("kind", types::literal("circle").unwrap())
        .prop("radius", types::number())
        .build()
        .unwrap();
    let ty = types::model("Canvas")
        .prop(
            "shape",
            types::union_with(Disambiguation::Discriminator("kind".into()), vec![square, circle]),
        )
        .build()
        .unwrap();
    let mut tree = ty.create(&json!({"shape": {"kind": "square", "size": 1}})).unwrap();
    let root = tree.root();
    let shape = tree.child(root, "shape").unwrap().unwrap();
    let paths = Rc::new(RefCell::new(Vec::new()));
    let sink = paths.clone();
    tree.on_patch(shape, move |patch, _| sink.borrow_mut().push(patch.path.clone()))
        .unwrap();

    tree.set_property(root, "shape", &json!({"kind": "circle", "radius": 2}))
        .unwrap();
    let circle_node = tree.child(root, "shape").unwrap().unwrap();
    assert_ne!(circle_node, shape);
    tree.set_property(circle_node, "radius", &json!(4)).unwrap();

    assert_eq!(*paths.borrow(), vec!["".to_owned(), "/radius".to_owned()]);
}
