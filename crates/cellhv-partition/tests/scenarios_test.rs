// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! End-to-end acceptance and rejection of cell sets.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use cellhv_abi::{CpuIndex, MemoryFlags, MemoryRegion};
use cellhv_partition::enforcement::EnforcementOp;
use cellhv_partition::{
    CellState, CommWindow, ConflictError, LifecycleError, PlatformConfig, ValidationError,
    validate,
};
use common::{init_tracing, manager, seattle_linux_demo, seattle_resolver, seattle_root, seattle_tiny};

fn conflict(inmates: Vec<cellhv_partition::CellDescriptor>) -> ConflictError {
    init_tracing();
    match validate(&PlatformConfig::default(), &seattle_resolver().unwrap(), seattle_root(), inmates) {
        Err(ValidationError::Conflict(err)) => err,
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[test]
fn two_cells_claiming_one_cpu() {
    let a = seattle_tiny("a", 6, 0x84_0000_0000);
    let b = seattle_tiny("b", 6, 0x84_1000_0000);

    let ConflictError::CpuConflict { cpu, cells } = conflict(vec![a, b]) else {
        panic!("expected CPU conflict");
    };
    assert_eq!(cpu, CpuIndex::new(6));
    assert_eq!(cells, ["a", "b"]);

    let ConflictError::CpuConflict { cpu, cells } = conflict(vec![seattle_tiny("c", 1, 0x84_0000_0000)])
    else {
        panic!("expected CPU conflict with the root");
    };
    assert_eq!(cpu, CpuIndex::new(1));
    assert_eq!(cells, ["amd-seattle", "c"]);
}

#[test]
fn overlapping_private_memory() {
    let rw = MemoryFlags::READ | MemoryFlags::WRITE;
    let a = seattle_tiny("a", 6, 0x84_0000_0000).with_region(MemoryRegion::identity(0x1000, 0x1000, rw));
    let b = seattle_tiny("b", 7, 0x84_1000_0000).with_region(MemoryRegion::identity(0x1800, 0x1000, rw));

    let ConflictError::MemoryOverlap { region_a, region_b } = conflict(vec![a, b]) else {
        panic!("expected memory overlap");
    };
    assert_eq!((region_a.cell.as_str(), region_a.phys_start), ("a", 0x1000));
    assert_eq!((region_b.cell.as_str(), region_b.phys_start), ("b", 0x1800));
}

#[test]
fn comm_region_must_match_root_window() {
    init_tracing();
    let platform = PlatformConfig::default();
    let resolver = seattle_resolver().unwrap();
    validate(&platform, &resolver, seattle_root(), [seattle_linux_demo()]).unwrap();

    let mut inmate = seattle_linux_demo();
    let (index, _) = inmate.comm_region().unwrap();
    inmate.memory_regions[index].size = 0x2000;
    assert_eq!(
        conflict(vec![inmate]),
        ConflictError::CommRegionMismatch {
            cell: "amd-seattle-linux-demo".into(),
            expected: CommWindow::default(),
            found: CommWindow::new(0x8000_0000, 0x2000),
        }
    );
}

#[test]
fn failed_iommu_programming_keeps_cell_loaded() {
    init_tracing();
    let (manager, recording) = manager(PlatformConfig::default(), seattle_resolver().unwrap());
    manager.enable(seattle_root()).unwrap();
    let id = manager.create(seattle_linux_demo()).unwrap();

    recording.fail_next(EnforcementOp::MemoryLayout, "IOMMU context fault");
    assert!(matches!(
        manager.start(id),
        Err(LifecycleError::EnforcementFailed { ref reason, .. }) if reason.contains("IOMMU")
    ));
    assert_eq!(manager.cell_status(id).unwrap(), CellState::Loaded);
    assert!(!recording.is_programmed(id));

    manager.start(id).unwrap();
    assert_eq!(manager.cell_status(id).unwrap(), CellState::Running);
}

#[test]
fn shmem_peers_with_equal_ids() {
    let mut inmate = seattle_linux_demo();
    inmate.pci_devices[0].shmem_dev_id = 0;

    assert!(matches!(
        conflict(vec![inmate]),
        ConflictError::ShmemPeerMismatch { group: common::SEATTLE_NET, .. }
    ));
}
