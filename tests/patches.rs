use json_state_tree::types;
use json_state_tree::{EngineError, Patch, Tree, TreeOptions, Type};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::cell::RefCell;
use std::rc::Rc;

fn todo() -> Type {
    types::model("Todo")
        .prop("id", types::identifier())
        .prop("title", types::string())
        .prop("note", types::maybe(types::string()))
        .build()
        .unwrap()
}

fn store() -> Type {
    types::model("Store")
        .prop("todos", types::array(todo()))
        .prop("labels", types::optional(types::map(types::string()), json!({})))
        .action("rename_all", |ctx, args| {
            let title = args.first().cloned().unwrap_or(Value::Null);
            let todos = ctx.resolve_path(ctx.node(), "todos")?;
            for item in ctx.children(todos)? {
                ctx.set_property(item, "title", &title)?;
            }
            Ok(Value::Null)
        })
        .build()
        .unwrap()
}

fn initial() -> Value {
    json!({
        "todos": [{"id": "a", "title": "A"}, {"id": "b", "title": "B"}],
        "labels": {"x": "X"}
    })
}

#[test]
fn listeners_see_paths_relative_to_themselves() {
    let mut tree = store().create(&initial()).unwrap();
    let item = tree.resolve_path(tree.root(), "/todos/1").unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    tree.on_patch(item, move |patch, inverse| {
        sink.borrow_mut().push((patch.clone(), inverse.clone()))
    })
    .unwrap();

    tree.set_property(item, "title", &json!("B!")).unwrap();
    let first = tree.resolve_path(tree.root(), "/todos/0").unwrap();
    tree.set_property(first, "title", &json!("A!")).unwrap();

    assert_eq!(
        *seen.borrow(),
        vec![(
            Patch::replace("/title", json!("B!"), json!("B")),
            Patch::replace("/title", json!("B"), json!("B!")),
        )]
    );
}

#[test]
fn patches_apply_with_json_pointer_semantics() {
    let mut tree = store().create(&initial()).unwrap();
    let root = tree.root();
    let patches: Vec<Patch> = serde_json::from_value(json!([
        {"op": "add", "path": "/todos/-", "value": {"id": "c", "title": "C"}},
        {"op": "add", "path": "/todos/0", "value": {"id": "z", "title": "Z"}},
        {"op": "remove", "path": "/todos/2"},
        {"op": "replace", "path": "/todos/0/note", "value": "hello"},
        {"op": "add", "path": "/labels/y", "value": "Y"},
        {"op": "remove", "path": "/labels/x"}
    ]))
    .unwrap();
    tree.apply_patches(root, &patches).unwrap();

    assert_eq!(
        tree.snapshot(root).unwrap(),
        json!({
            "todos": [
                {"id": "z", "title": "Z", "note": "hello"},
                {"id": "a", "title": "A", "note": null},
                {"id": "c", "title": "C", "note": null}
            ],
            "labels": {"y": "Y"}
        })
    );
}

#[test]
fn bad_patches_are_rejected() {
    let mut tree = store().create(&initial()).unwrap();
    let root = tree.root();

    let err = tree.apply_patch(root, &Patch::remove("/todos", json!([]))).unwrap_err();
    assert!(matches!(err, EngineError::InvalidPath { .. }), "{err}");

    let err = tree.apply_patch(root, &Patch::replace("/nope/0", json!(1), json!(0))).unwrap_err();
    assert!(matches!(err, EngineError::InvalidPath { .. }), "{err}");

    let err = tree
        .apply_patch(root, &Patch::replace("/todos/0/title", json!(5), json!("A")))
        .unwrap_err();
    assert_eq!(err.as_validation().unwrap().paths(), vec!["/todos/0/title"]);

    assert_eq!(tree.snapshot(root).unwrap(), json!({
        "todos": [{"id": "a", "title": "A", "note": null}, {"id": "b", "title": "B", "note": null}],
        "labels": {"x": "X"}
    }));
}

#[test]
fn atomic_batches_roll_back() {
    let batch = vec![
        Patch::replace("/todos/0/title", json!("A2"), json!("A")),
        Patch::add("/labels/y", json!("Y")),
        Patch::replace("/todos/1/title", json!(false), json!("B")),
    ];

    let mut atomic = store().create(&initial()).unwrap();
    let root = atomic.root();
    let err = atomic.apply_patches_atomic(root, &batch).unwrap_err();
    assert!(err.as_validation().is_some(), "{err}");
    assert_eq!(atomic.snapshot(root).unwrap(), store().create(&initial()).unwrap().snapshot_root());

    let mut configured =
        Tree::with_options(&store(), &initial(), TreeOptions::new().atomic_patches(true)).unwrap();
    let root = configured.root();
    assert!(configured.apply_patches(root, &batch).is_err());
    assert_eq!(configured.snapshot(root).unwrap()["labels"], json!({"x": "X"}));

    let mut plain = store().create(&initial()).unwrap();
    let root = plain.root();
    assert!(plain.apply_patches(root, &batch).is_err());
    assert_eq!(plain.snapshot(root).unwrap()["todos"][0]["title"], json!("A2"));
    assert_eq!(plain.snapshot(root).unwrap()["labels"], json!({"x": "X", "y": "Y"}));
}

trait SnapshotRoot {
    fn snapshot_root(&self) -> Value;
}

impl SnapshotRoot for Tree {
    fn snapshot_root(&self) -> Value {
        self.snapshot(self.root()).unwrap()
    }
}

#[test]
fn null_values_survive_patch_round_trips() {
    let mut tree = store().create(&initial()).unwrap();
    let root = tree.root();
    let item = tree.resolve_path(root, "/todos/0").unwrap();
    let recorder = tree.start_recording(root).unwrap();
    tree.set_property(item, "note", &json!("n")).unwrap();
    tree.set_property(item, "note", &Value::Null).unwrap();
    let recording = tree.stop_recording(recorder).unwrap();

    let serialized = serde_json::to_value(recording.patches()).unwrap();
    assert_eq!(serialized[1], json!({"op": "replace", "path": "/todos/0/note", "value": null, "oldValue": "n"}));
    let parsed: Vec<Patch> = serde_json::from_value(serialized).unwrap();
    assert_eq!(parsed, recording.patches());
}

#[test]
fn snapshot_listeners_fire_once_per_outermost_operation() {
    let mut tree = store().create(&initial()).unwrap();
    let root = tree.root();
    let snapshots = Rc::new(RefCell::new(Vec::new()));
    let sink = snapshots.clone();
    tree.on_snapshot(root, move |snapshot| sink.borrow_mut().push(snapshot.clone()))
        .unwrap();

    tree.call_action(root, "rename_all", &[json!("same")]).unwrap();
    assert_eq!(snapshots.borrow().len(), 1);
    assert_eq!(snapshots.borrow()[0]["todos"][1]["title"], json!("same"));

    let todos = tree.child(root, "todos").unwrap().unwrap();
    let todo_snapshots = Rc::new(RefCell::new(0));
    let counter = todo_snapshots.clone();
    tree.on_snapshot(todos, move |_| *counter.borrow_mut() += 1).unwrap();

    // a change outside the observed subtree does not fire
    let labels = tree.child(root, "labels").unwrap().unwrap();
    tree.map_set(labels, "k", &json!("v")).unwrap();
    assert_eq!(snapshots.borrow().len(), 2);
    assert_eq!(*todo_snapshots.borrow(), 0);
}

#[test]
fn undo_restores_the_recorded_state() {
    let mut tree = store().create(&initial()).unwrap();
    let root = tree.root();
    let recorder = tree.start_recording(root).unwrap();

    let todos = tree.child(root, "todos").unwrap().unwrap();
    tree.push_item(todos, &json!({"id": "c", "title": "C"})).unwrap();
    tree.move_item(todos, 2, 0).unwrap();
    tree.remove_item(todos, 1).unwrap();
    tree.apply_snapshot(root, &json!({"todos": [{"id": "b", "title": "B?"}], "labels": {}}))
        .unwrap();

    let recording = tree.stop_recording(recorder).unwrap();
    tree.undo(root, &recording).unwrap();
    assert_eq!(tree.snapshot(root).unwrap(), tree_of(initial()));

    let mut replayed = store().create(&initial()).unwrap();
    let replayed_root = replayed.root();
    replayed.replay_patches(replayed_root, &recording.patches()).unwrap();
    assert_eq!(
        replayed.snapshot(replayed_root).unwrap(),
        json!({"todos": [{"id": "b", "title": "B?", "note": null}], "labels": {}})
    );
}

fn tree_of(snapshot: Value) -> Value {
    store().create(&snapshot).unwrap().snapshot_root()
}

#[test]
fn empty_map_keys_round_trip_through_patches() {
    let counts = types::map(types::number());
    let mut tree = counts.create(&json!({})).unwrap();
    let root = tree.root();
    let recorder = tree.start_recording(root).unwrap();
    tree.apply_snapshot(root, &json!({"": 1})).unwrap();
    let recording = tree.stop_recording(recorder).unwrap();
    assert_eq!(recording.patches(), vec![Patch::add("/", json!(1))]);

    let mut replayed = counts.create(&json!({})).unwrap();
    let replayed_root = replayed.root();
    replayed.replay_patches(replayed_root, &recording.patches()).unwrap();
    assert_eq!(replayed.snapshot_root(), json!({"": 1}));

    tree.undo(root, &recording).unwrap();
    assert_eq!(tree.snapshot_root(), json!({}));
}

#[test]
fn nested_listeners_address_empty_keys() {
    let mut tree = store().create(&initial()).unwrap();
    let root = tree.root();
    let labels = tree.child(root, "labels").unwrap().unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    tree.on_patch(labels, move |patch, _| sink.borrow_mut().push(patch.clone()))
        .unwrap();

    tree.map_set(labels, "", &json!("blank")).unwrap();
    assert_eq!(*seen.borrow(), vec![Patch::add("/", json!("blank"))]);
    assert_eq!(tree.resolve_path(labels, "/labels/").unwrap(), tree.child(labels, "").unwrap().unwrap());

    let mut copy = store().create(&initial()).unwrap();
    let copy_labels = copy.child(copy.root(), "labels").unwrap().unwrap();
    copy.apply_patches(copy_labels, &seen.borrow()).unwrap();
    assert_eq!(copy.snapshot_root(), tree.snapshot_root());
}
