use json_state_tree::types::{self, Disambiguation, UnknownProperties};
use json_state_tree::{EngineError, Type};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use regex::Regex;
use serde_json::{Value, json};

fn person() -> Type {
    types::model("Person")
        .prop("name", types::string())
        .prop("age", types::integer())
        .prop("tags", types::optional(types::array(types::string()), json!([])))
        .build()
        .unwrap()
}

#[test]
fn every_offending_path_is_reported() {
    let result = person().validate(&json!({"name": 1, "age": 1.5, "tags": ["a", 2, "c", false]}));
    let paths: Vec<String> = result.errors().iter().map(|error| error.path()).collect();
    assert_eq!(paths, vec!["/name", "/age", "/tags/1", "/tags/3"]);
}

#[test]
fn errors_render_path_value_and_type() {
    let err = person().create(&json!({"name": "Ann", "age": "old"})).unwrap_err();
    let failure = err.as_validation().unwrap();
    assert_eq!(failure.errors.len(), 1);
    assert_eq!(
        failure.errors[0].to_string(),
        "at path \"/age\" value `\"old\"` is not assignable to type: `integer` (value is not an integer)"
    );
    assert!(
        err.to_string()
            .starts_with("error while converting `{\"name\":\"Ann\",\"age\":\"old\"}` to `Person`:"),
        "{err}"
    );
}

#[test]
fn unknown_properties_follow_the_model_policy() {
    let strict = person();
    let err = strict.create(&json!({"name": "Ann", "age": 3, "nick": "A"})).unwrap_err();
    assert_eq!(err.as_validation().unwrap().paths(), vec!["/nick"]);

    let lenient = types::model("Loose")
        .prop("name", types::string())
        .unknown_properties(UnknownProperties::Ignore)
        .build()
        .unwrap();
    let tree = lenient.create(&json!({"name": "Ann", "nick": "A"})).unwrap();
    assert_eq!(tree.snapshot(tree.root()).unwrap(), json!({"name": "Ann"}));
}

#[test]
fn exclusive_unions_reject_ambiguous_values() {
    let a = types::model("A")
        .prop("x", types::number())
        .unknown_properties(UnknownProperties::Ignore)
        .build()
        .unwrap();
    let b = types::model("B")
        .prop("y", types::optional(types::number(), 0))
        .unknown_properties(UnknownProperties::Ignore)
        .build()
        .unwrap();
    let exclusive = types::union_with(Disambiguation::Exclusive, vec![a.clone(), b.clone()]);
    let precedence = types::union(vec![a, b]);

    // both members accept `{"x": 1}`
    assert!(precedence.is(&json!({"x": 1})));
    let result = exclusive.validate(&json!({"x": 1}));
    assert!(result.is_err());
    assert!(
        result.errors()[0].message.as_deref().unwrap().contains("multiple types are applicable"),
        "{:?}",
        result.errors()
    );
    assert!(exclusive.is(&json!({"y": 1})));
}

#[test]
fn discriminated_unions_name_the_discriminator() {
    let cat = types::model("Cat").prop("kind", types::literal("cat").unwrap()).build().unwrap();
    let dog = types::model("Dog").prop("kind", types::literal("dog").unwrap()).build().unwrap();
    let pet = types::union_with(Disambiguation::Discriminator("kind".into()), vec![cat, dog]);
    assert!(pet.is(&json!({"kind": "dog"})));
    let result = pet.validate(&json!({"kind": "cow"}));
    assert_eq!(
        result.errors()[0].message.as_deref(),
        Some("no type is applicable for the union: discriminator `kind` is \"cow\"")
    );
}

#[test]
fn patterns_and_refinements_check_after_the_inner_type() {
    let slug = types::pattern("Slug", types::string(), Regex::new("^[a-z-]+$").unwrap());
    assert!(slug.is(&json!("hello-world")));
    let result = slug.validate(&json!("Hello"));
    assert_eq!(result.errors()[0].message.as_deref(), Some("value does not match /^[a-z-]+$/"));
    // the inner type reports first
    let result = slug.validate(&json!(5));
    assert_eq!(result.errors()[0].message.as_deref(), Some("value is not a string"));

    let even = types::refinement(
        "Even",
        types::integer(),
        |value| value.as_i64().is_some_and(|n| n % 2 == 0),
        "value is odd",
    );
    assert!(even.is(&json!(4)));
    assert!(!even.is(&json!(3)));
}

#[test]
fn dates_are_stored_as_milliseconds() {
    let ty = types::model("Event").prop("at", types::date()).build().unwrap();
    let tree = ty.create(&json!({"at": "2024-01-02T03:04:05Z"})).unwrap();
    let at = tree.child(tree.root(), "at").unwrap().unwrap();
    assert_eq!(tree.snapshot(at).unwrap(), json!(1_704_164_645_000_i64));
    assert_eq!(tree.date(at).unwrap().to_rfc3339(), "2024-01-02T03:04:05+00:00");

    assert!(!ty.is(&json!({"at": "yesterday"})));
    assert!(ty.is(&json!({"at": 0})));

    // the normalized form is stable
    let normalized = tree.snapshot(tree.root()).unwrap();
    let again = ty.create(&normalized).unwrap();
    assert_eq!(again.snapshot(again.root()).unwrap(), normalized);
}

fn outline() -> Type {
    types::model("Outline")
        .prop("title", types::string())
        .prop("children", types::optional(types::array(types::late("Outline", outline)), json!([])))
        .build()
        .unwrap()
}

#[test]
fn late_types_describe_recursive_shapes() {
    let snapshot = json!({"title": "a", "children": [{"title": "b", "children": [{"title": "c"}]}]});
    let tree = outline().create(&snapshot).unwrap();
    let leaf = tree.resolve_path(tree.root(), "/children/0/children/0").unwrap();
    assert_eq!(tree.snapshot(leaf).unwrap(), json!({"title": "c", "children": []}));

    let result = outline().validate(&json!({"title": "a", "children": [{"title": 1}]}));
    let paths: Vec<String> = result.errors().iter().map(|error| error.path()).collect();
    assert_eq!(paths, vec!["/children/0/title"]);
}

#[test]
fn null_can_stand_for_the_default() {
    let ty = types::model("Prefs")
        .prop("size", types::optional_with(types::integer(), 12, true))
        .prop("zoom", types::optional(types::number(), 1))
        .build()
        .unwrap();
    let tree = ty.create(&json!({"size": null})).unwrap();
    assert_eq!(tree.snapshot(tree.root()).unwrap(), json!({"size": 12, "zoom": 1}));

    let err = ty.create(&json!({"zoom": null})).unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)), "{err}");
}

#[test]
fn literals_must_be_primitive() {
    assert!(types::literal(json!([1])).is_err());
    assert!(types::literal(json!({"a": 1})).is_err());
}

fn primitive() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        "[a-z]{0,6}".prop_map(Value::from),
    ]
}

proptest! {
    #[test]
    fn literal_accepts_exactly_its_value(expected in primitive(), candidate in primitive()) {
        let ty = types::literal(expected.clone()).unwrap();
        prop_assert!(ty.is(&expected));
        prop_assert_eq!(ty.is(&candidate), candidate == expected);
    }

    #[test]
    fn integral_floats_match_integer_literals(n in any::<i32>()) {
        let ty = types::literal(n).unwrap();
        prop_assert!(ty.is(&json!(n as f64)));
    }
}
