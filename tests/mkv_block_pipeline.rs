//! Matroska 块/Cluster 组装集成测试.
//!
//! 覆盖块表示升级、参考块换算、lacing 与 Cluster 清理后的块存活.

use std::rc::Rc;

use bytes::Bytes;
use strand::core::StrandError;
use strand::format::ebml::{self, CLUSTER, CLUSTER_TIMESTAMP, EBML_VOID, SIMPLE_BLOCK};
use strand::format::matroska::{AuxElement, ElementKind};
use strand::format::{BlockBlob, BlockRegistry, Cluster, IoContext, LacingType, SimpleBlockMode};

const MS: i64 = 1_000_000;

fn frame(len: usize) -> Bytes {
    Bytes::from(vec![0x5A; len])
}

#[test]
fn test_reference_resolves_only_after_link() {
    let mut blob = BlockBlob::new(SimpleBlockMode::SimpleAuto);
    blob.add_frame_auto(1, 120 * MS, frame(4), LacingType::None, Some(80 * MS), None, None, None);

    let group = blob.block_group().expect("有参考的帧应升级为 BlockGroup");
    let reference = group.references()[0];
    let err = reference.value(group.block()).unwrap_err();
    assert!(matches!(err, StrandError::Misuse(_)));
    assert!(blob.render().unwrap_err().is_misuse());

    let mut registry = BlockRegistry::new();
    let handle = registry.insert(blob).unwrap();
    let mut cluster = Cluster::new(MS).unwrap();
    cluster.set_global_timestamp(100 * MS);
    cluster.link_block(&registry, handle).unwrap();

    let shared = registry.get(&handle).unwrap();
    let blob = shared.borrow();
    let group = blob.block_group().unwrap();
    assert_eq!(group.references()[0].value(group.block()).unwrap(), -40);
    assert_eq!(group.block().relative_timestamp().unwrap(), 20);
}

#[test]
fn test_upgrade_happens_once_and_keeps_frames() {
    let mut blob = BlockBlob::new(SimpleBlockMode::SimpleAuto);
    blob.add_frame_auto(1, 0, frame(8), LacingType::None, None, None, None, None);
    assert!(blob.is_simple());
    assert!(blob.simple_block().unwrap().is_keyframe());

    blob.set_block_duration(20 * MS as u64);
    assert!(!blob.is_simple());
    blob.set_block_duration(30 * MS as u64);

    let group = blob.block_group().unwrap();
    assert_eq!(group.duration(), Some(30 * MS as u64));
    assert_eq!(group.block().frames().len(), 1);
    assert_eq!(group.block().frames()[0], frame(8));
    assert!(group.references().is_empty());

    // AlwaysSimple 下既不升级也不记录时长
    let mut simple = BlockBlob::new(SimpleBlockMode::AlwaysSimple);
    simple.add_frame_auto(1, 40 * MS, frame(8), LacingType::None, Some(0), None, None, None);
    simple.set_block_duration(20 * MS as u64);
    assert!(simple.is_simple());
    let block = simple.simple_block().unwrap();
    assert!(!block.is_keyframe());
    assert!(!block.is_discardable());
}

#[test]
fn test_bidirectional_references_are_discardable() {
    let mut blob = BlockBlob::new(SimpleBlockMode::AlwaysSimple);
    blob.add_frame_auto(
        1,
        40 * MS,
        frame(8),
        LacingType::None,
        Some(0),
        Some(80 * MS),
        None,
        None,
    );
    assert!(blob.simple_block().unwrap().is_discardable());

    let mut group = BlockBlob::new(SimpleBlockMode::NoSimple);
    group.add_frame_auto(
        1,
        40 * MS,
        frame(8),
        LacingType::None,
        Some(0),
        Some(80 * MS),
        None,
        None,
    );
    let references: Vec<i64> = group
        .block_group()
        .unwrap()
        .references()
        .iter()
        .map(|r| r.referenced_timestamp())
        .collect();
    assert_eq!(references, vec![0, 80 * MS]);
}

#[test]
fn test_xiph_laced_block_in_cluster() {
    let mut blob = BlockBlob::new(SimpleBlockMode::SimpleAuto);
    for len in [10, 20, 30] {
        assert!(blob.add_frame_auto(1, 0, frame(len), LacingType::Xiph, None, None, None, None));
    }

    let mut registry = BlockRegistry::new();
    let handle = registry.insert(blob).unwrap();
    let mut cluster = Cluster::new(MS).unwrap();
    cluster.set_global_timestamp(0);
    cluster.link_block(&registry, handle).unwrap();
    let bytes = cluster.render(&registry).unwrap();

    let mut io = IoContext::from_data(bytes);
    let (id, _, _) = ebml::read_element_header(&mut io).unwrap();
    assert_eq!(id, CLUSTER);
    let (id, size, _) = ebml::read_element_header(&mut io).unwrap();
    assert_eq!(id, CLUSTER_TIMESTAMP);
    assert_eq!(ebml::read_uint(&mut io, size).unwrap(), 0);

    let (id, size, _) = ebml::read_element_header(&mut io).unwrap();
    assert_eq!(id, SIMPLE_BLOCK);
    let body = ebml::read_binary(&mut io, size).unwrap();
    // 轨道号, 相对时间戳, flags (关键帧 + Xiph), lace 头
    assert_eq!(&body[..7], &[0x81, 0x00, 0x00, 0x82, 2, 10, 20]);
    assert_eq!(body.len(), 7 + 60);
}

#[test]
fn test_cluster_teardown_keeps_registry_blocks() {
    let mut registry = BlockRegistry::new();
    let mut cluster = Cluster::new(MS).unwrap();
    cluster.set_global_timestamp(0);
    cluster.push_element(AuxElement::Void(4));

    let mut handles = Vec::new();
    for i in 0..3 {
        let mut blob = BlockBlob::new(SimpleBlockMode::SimpleAuto);
        let past = if i == 0 { None } else { Some((i - 1) * 40 * MS) };
        blob.add_frame_auto(1, i * 40 * MS, frame(6), LacingType::None, past, None, None, None);
        let handle = registry.insert(blob).unwrap();
        cluster.link_block(&registry, handle).unwrap();
        handles.push(handle);
    }
    cluster.push_element(AuxElement::PrevSize(1234));

    let kinds: Vec<ElementKind> = cluster.children().iter().map(|c| c.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            ElementKind::Void,
            ElementKind::Block,
            ElementKind::Block,
            ElementKind::Block,
            ElementKind::PrevSize
        ]
    );
    let rendered = cluster.render(&registry).unwrap();
    assert!(rendered.contains(&(EBML_VOID as u8)));

    let held = registry.get(&handles[1]).unwrap();
    drop(cluster);

    assert_eq!(registry.len(), 3);
    assert_eq!(Rc::strong_count(&held), 2);
    let blob = held.borrow();
    assert!(blob.block().is_linked());
    let group = blob.block_group().unwrap();
    assert_eq!(group.references()[0].value(group.block()).unwrap(), -40);
    assert!(blob.render().is_ok());
}

#[test]
fn test_registry_keeps_blocks_with_equal_timestamps() {
    let mut registry = BlockRegistry::new();
    let mut handles = Vec::new();
    for (track, ts) in [(1, 0), (2, 0), (1, 0), (1, 40 * MS)] {
        let mut blob = BlockBlob::new(SimpleBlockMode::SimpleAuto);
        blob.add_frame_auto(track, ts, frame(1), LacingType::None, None, None, None, None);
        handles.push(registry.insert(blob).unwrap());
    }
    assert_eq!(registry.len(), 4);
    assert_ne!(handles[0], handles[2]);
    assert_eq!(handles[0].timestamp(), handles[2].timestamp());
    assert!(handles.windows(2).all(|w| w[0].seq() < w[1].seq()));

    // 时间戳相同的两个块都能链接进同一个 Cluster
    let mut cluster = Cluster::new(MS).unwrap();
    cluster.set_global_timestamp(0);
    cluster.link_block(&registry, handles[0]).unwrap();
    cluster.link_block(&registry, handles[2]).unwrap();
    assert_eq!(cluster.block_handles().count(), 2);
    assert!(cluster.render(&registry).is_ok());
}
