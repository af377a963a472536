use phishguard_forest::{majority_vote, predict_single_tree, DecisionTree, Forest, Node};
use proptest::prelude::*;

// Property-based tests for traversal bounds and vote aggregation

/// Random well-formed tree grown by splitting random leaves.
fn arbitrary_tree() -> impl Strategy<Value = DecisionTree> {
    (
        prop::collection::vec((0usize..4, -1.0f64..1.0, 0usize..64), 0..24),
        prop::collection::vec(prop::collection::vec(0.0f64..10.0, 1..4), 1..64),
    )
        .prop_map(|(splits, leaf_weights)| {
            let mut nodes = vec![Node::leaf(leaf_weights[0].clone())];
            let mut leaves = vec![0usize];

            for (i, (feature, threshold, pick)) in splits.into_iter().enumerate() {
                let target = leaves.swap_remove(pick % leaves.len());
                let left = nodes.len();
                let right = left + 1;
                nodes.push(Node::leaf(leaf_weights[(2 * i + 1) % leaf_weights.len()].clone()));
                nodes.push(Node::leaf(leaf_weights[(2 * i + 2) % leaf_weights.len()].clone()));
                nodes[target] = Node::internal(feature, threshold, left, right);
                leaves.push(left);
                leaves.push(right);
            }

            DecisionTree::from_nodes(nodes).expect("grown tree is well formed")
        })
}

fn arbitrary_features() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-1.5f64..1.5, 4)
}

proptest! {
    #[test]
    fn traversal_terminates_on_a_leaf(
        tree in arbitrary_tree(),
        features in arbitrary_features(),
    ) {
        let vote = predict_single_tree(&tree, &features).unwrap();

        prop_assert!(vote.leaf < tree.n_nodes());
        prop_assert!(tree.node(vote.leaf).unwrap().is_leaf());
        prop_assert!(vote.class_index < vote.distribution.len());
    }
}

proptest! {
    #[test]
    fn leaves_have_no_children_and_splits_have_two(tree in arbitrary_tree()) {
        for node in tree.nodes() {
            if let Node::Internal { left, right, .. } = node {
                prop_assert_ne!(left, right);
                prop_assert!(*left < tree.n_nodes() && *right < tree.n_nodes());
            }
        }
    }
}

proptest! {
    #[test]
    fn majority_vote_has_the_highest_count(
        classes in prop::collection::vec(0usize..5, 1..40),
    ) {
        let winner = majority_vote(&classes).unwrap();
        let count = |c: usize| classes.iter().filter(|&&x| x == c).count();

        for other in 0..5 {
            if other < winner {
                prop_assert!(count(other) < count(winner));
            } else {
                prop_assert!(count(other) <= count(winner));
            }
        }
    }
}

proptest! {
    #[test]
    fn forest_vote_matches_per_tree_mode(
        trees in prop::collection::vec(arbitrary_tree(), 1..8),
        features in arbitrary_features(),
    ) {
        let per_tree: Vec<usize> = trees
            .iter()
            .map(|tree| predict_single_tree(tree, &features).unwrap().class_index)
            .collect();

        let forest = Forest::new(trees, None).unwrap();
        let prediction = forest.predict(&features).unwrap();

        prop_assert_eq!(Some(prediction.class_index), majority_vote(&per_tree));
        prop_assert_eq!(prediction.votes.iter().sum::<usize>(), per_tree.len());
        let total: f64 = prediction.probabilities.iter().sum();
        prop_assert!((total - 1.0).abs() < 1e-9);
    }
}
