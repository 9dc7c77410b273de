use approx::assert_relative_eq;
use mwtree::{
    Error, MWTree, MultiResolutionAnalysis, NodeHandle, NodeIndex, TransformDirection, WorldBox,
};
use rand::prelude::*;

fn unit_tree<const D: usize>(order: usize) -> MWTree<D> {
    MWTree::new(MultiResolutionAnalysis::new(WorldBox::unit(), order), "unit").unwrap()
}

fn random_block(rng: &mut StdRng, n: usize) -> Vec<f64> {
    (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn all_handles<const D: usize>(tree: &MWTree<D>) -> Vec<NodeHandle> {
    tree.node_allocator().handles().collect()
}

/// Fill the leaves with random data and compress, so that every branch node is consistent with
/// its children.
fn consistent_tree<const D: usize>(order: usize, levels: u32, seed: u64) -> MWTree<D> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut tree = unit_tree(order);
    tree.refine_uniformly(levels).unwrap();
    for h in tree.copy_end_node_table() {
        let block = random_block(&mut rng, tree.coeff_size());
        tree.set_coefs(h, &block).unwrap();
    }
    tree.mw_transform(TransformDirection::Up, true);
    tree
}

fn snapshot<const D: usize>(tree: &MWTree<D>) -> Vec<(NodeHandle, Vec<f64>)> {
    all_handles(tree)
        .into_iter()
        .map(|h| (h, tree.coefs(h).to_vec()))
        .collect()
}

fn assert_coefs_match<const D: usize>(tree: &MWTree<D>, expected: &[(NodeHandle, Vec<f64>)]) {
    for (h, coefs) in expected {
        for (a, b) in tree.coefs(*h).iter().zip(coefs) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }
}

fn counter_sum<const D: usize>(tree: &MWTree<D>) -> usize {
    tree.nodes_at_depth().iter().sum::<usize>()
        + tree.nodes_at_negative_depth().iter().sum::<usize>()
}

#[test]
fn test_uniform_refinement_3d() {
    let mut tree = unit_tree::<3>(1);
    tree.refine_uniformly(3).unwrap();

    assert_eq!(tree.nodes_at_depth(), &[1, 8, 64, 512]);
    assert_eq!(tree.n_end_nodes(), 512);
    assert_eq!(tree.n_nodes(), 1 + 8 + 64 + 512);
    assert_eq!(tree.depth(), 4);
    assert_eq!(tree.count_branch_nodes(None), 73);
    assert_eq!(tree.count_leaf_nodes(Some(3)), 512);
    assert_eq!(tree.count_nodes(Some(2)), 64);
    assert_eq!(tree.coeff_size(), 64);
}

#[test]
fn test_counters_follow_random_refinement() {
    let mut rng = StdRng::seed_from_u64(42);
    let mra = MultiResolutionAnalysis::new(WorldBox::new(0, [-1, 0], [2, 1]).unwrap(), 0)
        .with_max_depth(5);
    let mut tree = MWTree::new(mra, "random").unwrap();

    for _ in 0..300 {
        let handles = all_handles(&tree);
        let h = *handles.choose(&mut rng).unwrap();
        if tree.node(h).is_branch_node() {
            tree.delete_children(h);
        } else if tree.node(h).scale() < tree.mra().max_scale() {
            tree.split_node(h).unwrap();
        }
        assert_eq!(counter_sum(&tree), tree.n_nodes());
        assert_eq!(tree.count_nodes(None), tree.n_nodes());
    }

    tree.reset_end_node_table();
    assert_eq!(tree.n_end_nodes(), tree.count_leaf_nodes(None));
    assert_eq!(tree.n_nodes_at_depth(0), 2);
}

#[test]
fn test_negative_scales_are_counted_separately() {
    let mra = MultiResolutionAnalysis::new(WorldBox::new(2, [0], [4]).unwrap(), 0);
    let mut tree: MWTree<1> = MWTree::new(mra, "coarse").unwrap();
    tree.increment_node_count(1);
    tree.increment_node_count(0);
    assert_eq!(tree.n_neg_scales(), 2);
    assert_eq!(tree.n_nodes_at_depth(-2), 1);
    assert_eq!(counter_sum(&tree), tree.n_nodes() + 2);

    tree.decrement_node_count(0);
    tree.decrement_node_count(1);
    assert_eq!(tree.n_neg_scales(), 0);
    assert_eq!(counter_sum(&tree), tree.n_nodes());
}

#[test]
fn test_transform_down_then_up() {
    let mut tree = consistent_tree::<2>(2, 3, 7);
    let before = snapshot(&tree);

    tree.mw_transform(TransformDirection::Down, true);
    assert_coefs_match(&tree, &before);
    tree.mw_transform(TransformDirection::Up, true);
    assert_coefs_match(&tree, &before);
}

#[test]
fn test_transform_up_then_down() {
    let mut tree = consistent_tree::<3>(1, 2, 11);
    let before = snapshot(&tree);

    // Perturb the branch nodes, the compression rebuilds them from the leaves.
    for h in all_handles(&tree) {
        if tree.node(h).is_branch_node() {
            tree.coefs_mut(h)[0] += 1.0;
        }
    }
    tree.mw_transform(TransformDirection::Up, true);
    tree.mw_transform(TransformDirection::Down, true);
    assert_coefs_match(&tree, &before);
}

#[test]
fn test_square_norm_is_cached() {
    let mut tree = consistent_tree::<1>(3, 2, 3);
    let expected: f64 = tree
        .copy_end_node_table()
        .into_iter()
        .map(|h| tree.coefs(h).iter().map(|c| c * c).sum::<f64>())
        .sum();

    let norm = tree.calc_square_norm();
    assert_relative_eq!(norm, expected, epsilon = 1e-12);

    // Writes behind the tree's back are not picked up.
    let leaf = tree.end_node_table()[0];
    tree.node_allocator_mut().coefs_mut(leaf).fill(100.0);
    assert_eq!(tree.calc_square_norm(), norm);
    assert_eq!(tree.square_norm(), norm);

    // Writes through the tree are.
    tree.coefs_mut(leaf).fill(0.0);
    assert_eq!(tree.square_norm(), -1.0);
    assert!(tree.calc_square_norm() < norm);
}

#[test]
fn test_compression_preserves_norm() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut tree = unit_tree::<2>(1);
    tree.refine_uniformly(1).unwrap();
    let kp1_d = tree.kp1_d();
    for h in tree.copy_end_node_table() {
        let mut block = vec![0.0; tree.coeff_size()];
        block[..kp1_d].copy_from_slice(&random_block(&mut rng, kp1_d));
        tree.set_coefs(h, &block).unwrap();
    }
    tree.mw_transform(TransformDirection::Up, true);

    let root = tree.root_box().node(0);
    let root_norm: f64 = tree.coefs(root).iter().map(|c| c * c).sum();
    assert_relative_eq!(root_norm, tree.calc_square_norm(), epsilon = 1e-12);

    tree.make_max_square_norms();
    let max_norm = tree.node(root).max_square_norm();
    for h in tree.copy_end_node_table() {
        assert!(tree.node(h).square_norm() <= max_norm);
    }
    assert!(max_norm >= tree.node(root).square_norm());
}

#[test]
fn test_box_edges_resolve_to_one_root() {
    let mra = MultiResolutionAnalysis::new(WorldBox::new(0, [-1, -1], [2, 2]).unwrap(), 0);
    let tree: MWTree<2> = MWTree::new(mra, "edges").unwrap();
    let world = tree.mra().world_box();

    let steps: Vec<f64> = (0..8).map(|i| -1.0 + 0.25 * i as f64).collect();
    for &x in &steps {
        for &y in &steps {
            let i = tree.root_index(&[x, y]).unwrap();
            let root = tree.root_node(i).index();
            for (d, r) in [x, y].iter().enumerate() {
                let lower = root.translation()[d] as f64 * world.width_at(0, d);
                assert!(lower <= *r && *r < lower + world.width_at(0, d));
            }
        }
    }

    assert_eq!(tree.root_index(&[0.0, 0.0]).unwrap(), 3);
    let node = tree.get_node_at(&[0.0, -1.0], 0).unwrap();
    assert_eq!(node.index(), &NodeIndex::new(0, [0, -1]));
    assert!(matches!(
        tree.root_index(&[1.0, 0.5]),
        Err(Error::OutOfBounds(_))
    ));
    assert!(matches!(
        tree.get_node_at(&[-1.5, 0.0], 0),
        Err(Error::OutOfBounds(_))
    ));
}

#[test]
fn test_node_lookup() {
    let mut tree = unit_tree::<2>(0);
    let root = tree.root_box().node(0);
    let children = tree.split_node(root).unwrap().to_vec();
    tree.split_node(children[3]).unwrap();

    let idx = NodeIndex::new(2, [3, 3]);
    let node = tree.find_node(&idx).unwrap();
    assert_eq!(node.index(), &idx);
    assert!(!node.has_coefs());
    assert_eq!(tree.get_node(&idx).unwrap().handle(), node.handle());

    let deep = NodeIndex::new(4, [1, 2]);
    assert!(tree.find_node(&deep).is_none());
    assert!(matches!(
        tree.get_node(&deep),
        Err(Error::NodeNotFound { scale: 4, .. })
    ));
    assert_eq!(tree.get_node_or_end_node(&deep).unwrap().handle(), children[0]);
    assert_eq!(
        tree.get_node_or_end_node_at(&[0.9, 0.9], None)
            .unwrap()
            .index(),
        &NodeIndex::new(2, [3, 3])
    );
    assert_eq!(
        tree.get_node_or_end_node_at(&[0.9, 0.9], Some(1))
            .unwrap()
            .handle(),
        children[3]
    );
    assert!(tree.find_node(&NodeIndex::new(1, [2, 0])).is_none());
}

#[test]
fn test_destructive_operations() {
    let mut tree = consistent_tree::<2>(1, 2, 13);
    let n_chunks = tree.node_allocator().n_chunks();
    let n_nodes = tree.n_nodes();

    tree.set_zero();
    assert_eq!(tree.n_nodes(), n_nodes);
    assert_eq!(tree.calc_square_norm(), 0.0);
    assert!(all_handles(&tree)
        .into_iter()
        .all(|h| tree.coefs(h).iter().all(|&c| c == 0.0)));

    tree.clear().unwrap();
    assert_eq!(tree.n_nodes(), 1);
    assert_eq!(tree.nodes_at_depth(), &[1]);
    assert_eq!(tree.n_end_nodes(), 1);
    assert!(!tree.root_node(0).has_coefs());
    assert_eq!(tree.node_allocator().n_chunks(), n_chunks);

    tree.delete_root_nodes();
    assert_eq!(tree.n_nodes(), 0);
    assert_eq!(tree.depth(), 0);
    assert!(tree.root_box().is_empty());

    tree.clear().unwrap();
    assert_eq!(tree.n_nodes(), 1);
    assert_eq!(tree.n_root_nodes(), 1);
}

#[test]
fn test_split_respects_node_ceiling() {
    let options = mwtree::AllocatorOptions::default()
        .with_max_nodes_per_chunk(4)
        .with_max_nodes(6);
    let mut tree: MWTree<2> =
        MWTree::with_options(MultiResolutionAnalysis::new(WorldBox::unit(), 0), "small", options)
            .unwrap();
    let root = tree.root_box().node(0);
    let children = tree.split_node(root).unwrap().to_vec();

    assert!(matches!(
        tree.split_node(children[0]),
        Err(Error::OutOfMemory { max_nodes: 6 })
    ));
    assert_eq!(tree.n_nodes(), 5);
    assert_eq!(counter_sum(&tree), 5);
    assert!(tree.node(children[0]).is_end_node());
}
