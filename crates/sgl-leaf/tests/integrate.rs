//! Merging source leaves into target leaves.

use pollster::block_on;
use sgl_error::SubgridError;
use sgl_leaf::{IntegrationStats, LeafStorageConfig, SubgridLeaf};
use sgl_store::MemoryBlockStore;
use sgl_types::{CellPass, Timestamp};

fn at(seconds: i64, ccv: i16) -> CellPass {
    CellPass {
        ccv,
        ..CellPass::at(Timestamp::from_seconds(seconds))
    }
}

fn config(limit: u32) -> LeafStorageConfig {
    LeafStorageConfig {
        max_passes_per_segment: limit,
        ..LeafStorageConfig::default()
    }
}

fn source(passes: &[(usize, usize, i64, i16)]) -> SubgridLeaf {
    let mut leaf = SubgridLeaf::new(0, 0, 6, LeafStorageConfig::default());
    for &(x, y, seconds, ccv) in passes {
        leaf.add_pass(x, y, at(seconds, ccv)).unwrap();
    }
    leaf
}

fn ccvs(leaf: &SubgridLeaf, x: usize, y: usize) -> Vec<(i64, i16)> {
    leaf.cell_passes(x, y)
        .unwrap()
        .iter()
        .map(|p| (p.time.whole_seconds(), p.ccv))
        .collect()
}

#[test]
fn test_integrate_into_empty_leaf() {
    let mut target = SubgridLeaf::new(0, 0, 6, LeafStorageConfig::default());
    let stats = target
        .integrate(&source(&[(1, 2, 100, 5), (1, 2, 200, 6), (4, 4, 150, 1)]))
        .unwrap();
    assert_eq!(
        stats,
        IntegrationStats {
            cells: 2,
            added: 3,
            modified: 0,
            segments_touched: 1,
            segments_created: 1,
        }
    );
    assert_eq!(ccvs(&target, 1, 2), vec![(100, 5), (200, 6)]);
    assert_eq!(target.pass_count(), 3);
    assert_eq!(
        target.envelope(),
        Some((Timestamp::from_seconds(100), Timestamp::from_seconds(200)))
    );
}

#[test]
fn test_integrate_replaces_same_second_and_inserts_new() {
    let mut target = source(&[(3, 3, 100, 1), (3, 3, 300, 3)]);
    let stats = target
        .integrate(&source(&[(3, 3, 100, 10), (3, 3, 200, 20), (3, 3, 400, 40)]))
        .unwrap();
    assert_eq!((stats.added, stats.modified), (2, 1));
    assert_eq!(ccvs(&target, 3, 3), vec![(100, 10), (200, 20), (300, 3), (400, 40)]);
    assert_eq!(target.pass_count(), 4);
    assert_eq!(
        target.envelope(),
        Some((Timestamp::from_seconds(100), Timestamp::from_seconds(400)))
    );
}

#[test]
fn test_integrate_spans_several_target_segments() {
    let mut target = SubgridLeaf::new(0, 0, 6, config(2));
    for seconds in [10, 20, 30, 40] {
        target.add_pass(0, 0, at(seconds, 0)).unwrap();
    }
    target.cleave_segments().unwrap();
    let before = target.directory().len();
    assert!(before > 1);

    let stats = target
        .integrate(&source(&[(0, 0, 15, 1), (0, 0, 35, 2), (0, 0, 40, 3), (5, 5, 25, 4)]))
        .unwrap();
    assert_eq!((stats.added, stats.modified), (3, 1));
    assert_eq!(stats.segments_created, 0);
    assert!(stats.segments_touched >= 2);
    assert_eq!(target.directory().len(), before);
    target.directory().validate().unwrap();
    assert_eq!(
        ccvs(&target, 0, 0),
        vec![(10, 0), (15, 1), (20, 0), (30, 0), (35, 2), (40, 3)]
    );
    let per_segment: u32 = target.directory().descriptors().iter().map(|d| d.pass_count).sum();
    assert_eq!(u64::from(per_segment), target.pass_count());
    assert_eq!(target.pass_count(), 7);
}

#[test]
fn test_integrate_rejects_multi_segment_source() {
    let mut multi = SubgridLeaf::new(0, 0, 6, config(2));
    for seconds in [10, 20, 30] {
        multi.add_pass(0, 0, at(seconds, 0)).unwrap();
    }
    multi.cleave_segments().unwrap();
    let mut target = source(&[(0, 0, 5, 1)]);
    let err = target.integrate(&multi).unwrap_err();
    assert!(matches!(err, SubgridError::InvariantViolation { .. }));
    assert_eq!(ccvs(&target, 0, 0), vec![(5, 1)]);
}

#[test]
fn test_integrate_requires_loaded_targets() {
    let store = MemoryBlockStore::new();
    let mut target = source(&[(2, 2, 100, 1)]);
    block_on(target.save(&store)).unwrap();

    let mut reloaded =
        block_on(SubgridLeaf::load(&store, 0, 0, 6, LeafStorageConfig::default())).unwrap();
    let incoming = source(&[(2, 2, 200, 2)]);
    let err = reloaded.integrate(&incoming).unwrap_err();
    assert!(matches!(err, SubgridError::SegmentNotLoaded { .. }));
    assert_eq!(reloaded.loaded_segment_count(), 0);

    let stats = block_on(reloaded.integrate_from_store(&store, &incoming)).unwrap();
    assert_eq!(stats.added, 1);
    assert_eq!(ccvs(&reloaded, 2, 2), vec![(100, 1), (200, 2)]);
}

#[test]
fn test_integrate_then_recompute() {
    let store = MemoryBlockStore::new();
    let mut target = source(&[(7, 7, 100, 1)]);
    block_on(target.compute_latest_pass_information(&store, false)).unwrap();
    target.integrate(&source(&[(7, 7, 200, 9)])).unwrap();
    assert_eq!(target.latest_cell(7, 7).unwrap().unwrap().pass.ccv, 1);

    block_on(target.compute_latest_pass_information(&store, false)).unwrap();
    assert_eq!(target.latest_cell(7, 7).unwrap().unwrap().pass.ccv, 9);
}
