use json_state_tree::types;
use json_state_tree::{EngineError, Tree, Type};
use pretty_assertions::assert_eq;
use serde_json::json;

fn user() -> Type {
    types::model("User")
        .prop("id", types::identifier())
        .prop("name", types::string())
        .build()
        .unwrap()
}

fn group() -> Type {
    types::model("Group")
        .prop("members", types::array(user()))
        .prop("lead", types::maybe(types::reference(user())))
        .build()
        .unwrap()
}

fn directory() -> Type {
    types::model("Directory")
        .prop("users", types::array(user()))
        .prop("groups", types::optional(types::array(group()), json!([])))
        .prop("owner", types::maybe(types::reference(user())))
        .build()
        .unwrap()
}

fn name_of(tree: &Tree, node: json_state_tree::NodeId) -> String {
    tree.snapshot(node).unwrap()["name"].as_str().unwrap().to_owned()
}

#[test]
fn nearest_scope_wins() {
    let tree = directory()
        .create(&json!({
            "users": [{"id": "u1", "name": "outer"}, {"id": "u2", "name": "other"}],
            "groups": [{"members": [{"id": "u1", "name": "inner"}], "lead": "u1"}],
            "owner": "u2"
        }))
        .unwrap();
    let root = tree.root();

    let lead = tree.resolve_path(root, "/groups/0/lead").unwrap();
    assert_eq!(name_of(&tree, tree.resolve(lead).unwrap()), "inner");

    let owner = tree.resolve_path(root, "/owner").unwrap();
    assert_eq!(name_of(&tree, tree.resolve(owner).unwrap()), "other");
}

#[test]
fn equal_identifiers_at_the_same_level_are_ambiguous() {
    let ty = types::model("Split")
        .prop("left", types::array(user()))
        .prop("right", types::array(user()))
        .prop("pick", types::reference(user()))
        .build()
        .unwrap();
    let tree = ty
        .create(&json!({
            "left": [{"id": "x", "name": "L"}],
            "right": [{"id": "x", "name": "R"}],
            "pick": "x"
        }))
        .unwrap();
    let pick = tree.resolve_path(tree.root(), "pick").unwrap();
    let err = tree.resolve(pick).unwrap_err();
    assert!(matches!(err, EngineError::ReferenceResolution { .. }), "{err}");
    assert!(err.to_string().contains("ambiguous"), "{err}");
}

#[test]
fn duplicate_identifiers_in_one_collection_are_rejected() {
    let err = directory()
        .create(&json!({"users": [{"id": "a", "name": "A"}, {"id": "a", "name": "B"}]}))
        .unwrap_err();
    assert_eq!(err.as_validation().unwrap().paths(), vec!["/users/1"]);
}

#[test]
fn resolution_follows_removal_and_re_addition() {
    let mut tree = directory()
        .create(&json!({"users": [{"id": "u1", "name": "first"}], "owner": "u1"}))
        .unwrap();
    let root = tree.root();
    let users = tree.child(root, "users").unwrap().unwrap();
    let owner = tree.child(root, "owner").unwrap().unwrap();
    let first = tree.resolve(owner).unwrap();

    tree.remove_item(users, 0).unwrap();
    let err = tree.resolve(owner).unwrap_err();
    assert!(matches!(err, EngineError::ReferenceResolution { .. }), "{err}");
    // the snapshot still carries the dangling key
    assert_eq!(tree.snapshot(root).unwrap()["owner"], json!("u1"));

    let second = tree.push_item(users, &json!({"id": "u1", "name": "second"})).unwrap();
    assert_ne!(first, second);
    assert_eq!(tree.resolve(owner).unwrap(), second);
    assert_eq!(name_of(&tree, second), "second");
}

#[test]
fn numeric_keys_share_the_string_index() {
    let item = types::model("Item")
        .prop("id", types::identifier_number())
        .prop("name", types::string())
        .build()
        .unwrap();
    let ty = types::model("Shelf")
        .prop("items", types::array(item.clone()))
        .prop("refs", types::array(types::reference(item)))
        .build()
        .unwrap();
    let tree = ty
        .create(&json!({
            "items": [{"id": 7, "name": "seven"}],
            "refs": [7, 7.0, "7"]
        }))
        .unwrap();
    let root = tree.root();
    let seven = tree.resolve_path(root, "/items/0").unwrap();
    for index in 0..3 {
        let reference = tree.resolve_path(root, &format!("/refs/{index}")).unwrap();
        assert_eq!(tree.resolve(reference).unwrap(), seven, "ref {index}");
    }
}

#[test]
fn set_reference_writes_the_target_identifier() {
    let mut tree = directory()
        .create(&json!({
            "users": [{"id": "u1", "name": "one"}, {"id": "u2", "name": "two"}],
            "groups": [{"members": [], "lead": null}],
            "owner": "u1"
        }))
        .unwrap();
    let root = tree.root();
    let owner = tree.child(root, "owner").unwrap().unwrap();
    let two = tree.resolve_path(root, "/users/1").unwrap();

    tree.set_reference(owner, two).unwrap();
    assert_eq!(tree.snapshot(root).unwrap()["owner"], json!("u2"));
    assert_eq!(tree.resolve(owner).unwrap(), two);

    let group = tree.resolve_path(root, "/groups/0").unwrap();
    let err = tree.set_reference(owner, group).unwrap_err();
    assert!(matches!(err, EngineError::Invariant(_)), "{err}");
    assert_eq!(tree.snapshot(root).unwrap()["owner"], json!("u2"));
}

#[test]
fn unknown_keys_fail_only_when_read() {
    let tree = directory()
        .create(&json!({"users": [], "owner": "ghost"}))
        .unwrap();
    let owner = tree.resolve_path(tree.root(), "owner").unwrap();
    let err = tree.resolve(owner).unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to resolve reference `ghost` to type `User` at `/owner`: \
         no node with this identifier exists in any enclosing scope"
    );
}
