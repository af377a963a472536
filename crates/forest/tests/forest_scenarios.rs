//! End-to-end scenarios for loading and classifying with exported forests.

use phishguard_forest::{
    predict_forest, predict_single_tree, Forest, ForestError, ModelStore, PredictError,
};
use serde_json::{json, Value};
use std::io::Write;

fn three_node_tree() -> Value {
    json!({
        "children_left": [1, -1, -1],
        "children_right": [2, -1, -1],
        "feature": [0, -2, -2],
        "threshold": [0.5, -2, -2],
        "value": [[0, 0], [1, 0], [0, 1]]
    })
}

// Single leaf voting for `class` out of two classes.
fn constant_tree(class: usize) -> Value {
    let mut weights = vec![0.0, 0.0];
    weights[class] = 5.0;
    json!({
        "children_left": [-1],
        "children_right": [-1],
        "feature": [-2],
        "threshold": [-2.0],
        "value": [[weights]]
    })
}

#[test]
fn three_node_tree_routes_left_and_right() {
    let forest = Forest::parse(&json!([three_node_tree()])).unwrap();
    let tree = &forest.trees()[0];

    let left = predict_single_tree(tree, &[0.2]).unwrap();
    assert_eq!((left.leaf, left.class_index), (1, 0));

    let right = predict_single_tree(tree, &[0.8]).unwrap();
    assert_eq!((right.leaf, right.class_index), (2, 1));

    assert_eq!(forest.predict(&[0.2]).unwrap().class_index, 0);
    assert_eq!(forest.predict(&[0.8]).unwrap().class_index, 1);
}

#[test]
fn majority_of_three_trees_wins() {
    let forest =
        Forest::parse(&json!({ "trees": [constant_tree(1), constant_tree(1), constant_tree(0)] }))
            .unwrap();

    let prediction = forest.predict(&[0.0]).unwrap();
    assert_eq!(prediction.class_index, 1);
    assert_eq!(prediction.votes, vec![1, 2]);
}

#[test]
fn vote_ties_resolve_to_lowest_class() {
    let forest = Forest::parse(&json!([constant_tree(1), constant_tree(0)])).unwrap();
    assert_eq!(forest.predict(&[]).unwrap().class_index, 0);
}

#[test]
fn flat_and_nested_leaf_values_agree() {
    let leaf = |value: Value| {
        json!({
            "children_left": [-1],
            "children_right": [-1],
            "feature": [-2],
            "threshold": [-2.0],
            "value": [value]
        })
    };

    let flat = Forest::parse(&json!([leaf(json!([7.0, 3.0]))])).unwrap();
    let nested = Forest::parse(&json!([leaf(json!([[7.0, 3.0]]))])).unwrap();

    assert_eq!(flat.predict(&[]).unwrap().class_index, 0);
    assert_eq!(nested.predict(&[]).unwrap().class_index, 0);
    assert_eq!(flat.hash_hex().unwrap(), nested.hash_hex().unwrap());
}

#[test]
fn record_and_bare_list_predict_identically() {
    let trees = vec![three_node_tree(), constant_tree(1), three_node_tree()];
    let bare = Forest::parse(&Value::Array(trees.clone())).unwrap();
    let record = Forest::parse(&json!({
        "n_estimators": 3,
        "feature_names": ["having_ip"],
        "trees": trees
    }))
    .unwrap();

    for x in [0.0, 0.25, 0.5, 0.75, 1.0] {
        assert_eq!(bare.predict(&[x]), record.predict(&[x]));
    }
}

#[test]
fn zero_trees_fail_to_load() {
    for raw in [json!([]), json!({ "trees": [] })] {
        let err = Forest::parse(&raw).unwrap_err();
        assert!(matches!(err, ForestError::Validation(_)), "{err}");
    }
}

#[test]
fn missing_threshold_names_the_tree() {
    let mut broken = three_node_tree();
    broken.as_object_mut().unwrap().remove("threshold");

    let err = Forest::parse(&json!([three_node_tree(), three_node_tree(), broken])).unwrap_err();
    match err {
        ForestError::MissingFields { tree, missing } => {
            assert_eq!(tree, 2);
            assert_eq!(missing, vec!["threshold"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn scalar_tree_element_fails_to_load() {
    let err = Forest::parse(&json!([three_node_tree(), 17])).unwrap_err();
    assert!(err.to_string().contains("tree 1 is not a record"));
}

#[test]
fn malformed_leaf_degrades_to_default_vote() {
    let odd_leaf = json!({
        "children_left": [-1],
        "children_right": [-1],
        "feature": [-2],
        "threshold": [-2.0],
        "value": ["unknown"]
    });
    let forest = Forest::parse(&json!([odd_leaf, constant_tree(1), constant_tree(1)])).unwrap();
    assert_eq!(forest.malformed_leaves(), 1);

    let prediction = forest.predict(&[]).unwrap();
    assert_eq!(prediction.class_index, 1);
    assert_eq!(prediction.votes, vec![1, 2]);
    assert_eq!(prediction.anomalies.len(), 1);
}

#[test]
fn short_feature_vector_is_an_explicit_error() {
    let forest = Forest::parse(&json!([three_node_tree()])).unwrap();
    assert!(matches!(
        forest.predict(&[]),
        Err(PredictError::FeatureIndexOutOfRange { feature: 0, len: 0, .. })
    ));
}

#[test]
fn predicting_before_load_is_unavailable() {
    assert_eq!(predict_forest(None, &[0.1]), Err(PredictError::ModelUnavailable));

    let store = ModelStore::new();
    assert_eq!(store.predict(&[0.1]), Err(PredictError::ModelUnavailable));
}

#[test]
fn exported_artifact_round_trip_through_file() {
    let artifact = json!({
        "n_estimators": 2,
        "feature_names": ["having_ip", "have_at_sign"],
        "trees": [
            {
                "n_nodes": 5,
                "children_left": [1, -1, 3, -1, -1],
                "children_right": [2, -1, 4, -1, -1],
                "feature": [0, -2, 1, -2, -2],
                "threshold": [0.5, -2.0, 0.5, -2.0, -2.0],
                "value": [[[10.0, 10.0]], [[8.0, 1.0]], [[2.0, 9.0]], [[2.0, 3.0]], [[0.0, 6.0]]]
            },
            three_node_tree()
        ]
    });
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(artifact.to_string().as_bytes()).unwrap();

    let store = ModelStore::new();
    let report = store.load_from_path(file.path(), None).unwrap();
    assert_eq!(report.trees, 2);

    assert_eq!(store.predict(&[0.0, 0.0]).unwrap().class_index, 0);
    assert_eq!(store.predict(&[1.0, 1.0]).unwrap().class_index, 1);
    // Only the first feature set: both trees still land on class 1 leaves.
    assert_eq!(store.predict(&[1.0, 0.0]).unwrap().votes, vec![0, 2]);
}
