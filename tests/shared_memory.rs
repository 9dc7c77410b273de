use approx::assert_relative_eq;
use mwtree::{
    AllocatorOptions, Error, MWTree, MultiResolutionAnalysis, SharedMemory, TransformDirection,
    WorldBox,
};

fn segment_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("mwtree-{}-{}", name, std::process::id()))
}

#[test]
fn test_blocks_are_visible_through_a_second_mapping() {
    let path = segment_path("visible");
    let mra = MultiResolutionAnalysis::new(WorldBox::<2>::unit(), 1);
    let n_bytes = 2 * 16 * 16 * std::mem::size_of::<f64>();
    let options = AllocatorOptions::default()
        .with_max_nodes_per_chunk(16)
        .with_shared_memory(SharedMemory::create(&path, n_bytes).unwrap());

    let mut tree = MWTree::with_options(mra, "shared", options).unwrap();
    assert!(tree.node_allocator().is_shared());
    tree.refine_uniformly(2).unwrap();
    assert_eq!(tree.node_allocator().n_chunks(), 2);

    for (i, h) in tree.copy_end_node_table().into_iter().enumerate() {
        tree.coefs_mut(h).fill(i as f64);
    }
    tree.mw_transform(TransformDirection::Up, true);

    // Another process would attach the same way, after an external barrier.
    let reader = SharedMemory::open(&path).unwrap();
    assert_eq!(reader.capacity(), 2 * 16 * 16);
    let coeff_size = tree.coeff_size();
    for h in tree.node_allocator().handles() {
        let offset = tree.node_allocator().coefs_offset(h);
        assert_eq!(
            &reader.values()[offset..offset + coeff_size],
            tree.coefs(h)
        );
    }

    let root = tree.root_box().node(0);
    let root_norm: f64 = reader.values()[..coeff_size].iter().map(|c| c * c).sum();
    assert_eq!(tree.node_allocator().coefs_offset(root), 0);
    assert_relative_eq!(
        root_norm,
        tree.coefs(root).iter().map(|c| c * c).sum::<f64>(),
        epsilon = 1e-12
    );

    drop(reader);
    drop(tree);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_exhausted_segment() {
    let mra = MultiResolutionAnalysis::new(WorldBox::<1>::unit(), 0);
    let segment = SharedMemory::anonymous(4 * 2 * std::mem::size_of::<f64>()).unwrap();
    let options = AllocatorOptions::default()
        .with_max_nodes_per_chunk(4)
        .with_shared_memory(segment);
    let mut tree = MWTree::with_options(mra, "tiny", options).unwrap();
    assert_eq!(tree.node_allocator().max_nodes(), Some(4));

    let root = tree.root_box().node(0);
    let children = tree.split_node(root).unwrap().to_vec();
    assert!(matches!(
        tree.split_node(children[0]),
        Err(Error::OutOfMemory { max_nodes: 4 })
    ));
    assert_eq!(tree.n_nodes(), 3);
}

#[test]
fn test_missing_segment() {
    let path = segment_path("missing");
    assert!(matches!(
        SharedMemory::open(&path),
        Err(Error::SharedMemory(_))
    ));
}
