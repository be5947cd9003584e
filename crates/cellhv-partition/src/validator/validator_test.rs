// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the partition validator.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::config::CommWindow;
use crate::test_fixtures::{GIC, NET_BASE, UART, linux_inmate, platform, resolver, root, tiny_inmate};
use cellhv_abi::{Architecture, Bdf, CpuIndex, IrqChip, MemoryFlags, MemoryRegion, PciDevice, PciType, PioRegion};
use cellhv_abi::layout::{IVSHMEM_BAR_MASK_MSIX, SHMEM_PROTO_VETH};
use proptest::prelude::*;

fn check(inmates: Vec<CellDescriptor>) -> Result<ValidatedCellSet, ValidationError> {
    validate(&platform(), &resolver(), root(), inmates)
}

fn conflict(inmates: Vec<CellDescriptor>) -> ConflictError {
    match check(inmates) {
        Err(ValidationError::Conflict(err)) => err,
        other => panic!("expected conflict, got {other:?}"),
    }
}

fn region(phys: u64, size: u64) -> MemoryRegion {
    MemoryRegion::identity(phys, size, MemoryFlags::READ | MemoryFlags::WRITE)
}

// =============================================================================
// Accepted Sets
// =============================================================================

#[test]
fn demo_set_is_valid() {
    let set = check(vec![linux_inmate()]).unwrap();
    assert_eq!(set.version(), 1);
    assert_eq!(set.len(), 2);
    assert_eq!(set.root().id(), CellId::ROOT);
    assert_eq!(set.root().name(), "amd-seattle");
    assert_eq!(set.inmates()[0].id(), CellId::new(1));
    assert_eq!(set.find("linux-inmate-demo").unwrap().id(), CellId::new(1));
    assert!(set.get(CellId::new(2)).is_none());
}

#[test]
fn root_alone_is_valid() {
    let set = check(Vec::new()).unwrap();
    assert!(set.inmates().is_empty());
    assert!(!set.is_empty());
}

#[test]
fn position_of_compares_content() {
    let set = check(vec![linux_inmate()]).unwrap();
    assert_eq!(set.position_of(&linux_inmate()), Some(CellId::new(1)));
    let changed = linux_inmate().with_cpu_reset_address(0x1000);
    assert_eq!(set.position_of(&changed), None);
}

#[test]
fn revalidation_is_idempotent() {
    let platform = platform();
    let resolver = resolver();
    let set = validate(&platform, &resolver, root(), [linux_inmate()]).unwrap();
    let again = Validator::new(&platform, &resolver).revalidate(&set).unwrap();
    assert_eq!(again, set);
}

// =============================================================================
// Step 0: Structure and Names
// =============================================================================

#[test]
fn malformed_inmate_rejects_set() {
    let mut bad = tiny_inmate("bad", 6, 0x1_0000);
    bad.memory_regions[0].size = 0x1800;
    let err = check(vec![bad]).unwrap_err();
    let ValidationError::Malformed(err) = err else {
        panic!("expected malformed descriptor");
    };
    assert_eq!(err.cell, "bad");
    assert_eq!(err.field, "memory_regions[0].size");
}

#[test]
fn duplicate_names_are_rejected() {
    let err = conflict(vec![
        tiny_inmate("twin", 6, 0x1_0000),
        tiny_inmate("twin", 7, 0x2_0000),
    ]);
    assert_eq!(
        err,
        ConflictError::DuplicateCellName {
            name: "twin".into()
        }
    );
}

// =============================================================================
// Step 1: CPUs
// =============================================================================

#[test]
fn shared_cpu_is_rejected() {
    let err = conflict(vec![tiny_inmate("thief", 1, 0x1_0000)]);
    assert_eq!(
        err,
        ConflictError::CpuConflict {
            cpu: CpuIndex::new(1),
            cells: vec!["amd-seattle".into(), "thief".into()],
        }
    );
}

#[test]
fn full_coverage_requires_every_cpu() {
    let platform = platform().with_full_cpu_coverage(true);
    let resolver = resolver();
    let err = validate(&platform, &resolver, root(), [tiny_inmate("half", 6, 0x1_0000)])
        .unwrap_err();
    assert_eq!(
        err,
        ValidationError::Conflict(ConflictError::CpuUnassigned {
            cpu: CpuIndex::new(7)
        })
    );
    validate(&platform, &resolver, root(), [linux_inmate()]).unwrap();
}

// =============================================================================
// Step 2: Memory
// =============================================================================

#[test]
fn overlapping_private_regions_are_rejected() {
    let a = CellDescriptor::new("a", Architecture::Arm64)
        .with_cpus([6])
        .with_region(region(0x1000, 0x1000));
    let b = CellDescriptor::new("b", Architecture::Arm64)
        .with_cpus([7])
        .with_region(region(0x1800, 0x1000));
    let ConflictError::MemoryOverlap { region_a, region_b } = conflict(vec![a, b]) else {
        panic!("expected memory overlap");
    };
    assert_eq!((region_a.cell.as_str(), region_a.index), ("a", 0));
    assert_eq!((region_b.cell.as_str(), region_b.phys_start), ("b", 0x1800));
}

#[test]
fn adjacent_regions_do_not_overlap() {
    let a = tiny_inmate("a", 6, 0x1_0000);
    let b = tiny_inmate("b", 7, 0x2_0000);
    check(vec![a, b]).unwrap();
}

#[test]
fn root_shared_requires_identical_range() {
    let mut inmate = linux_inmate();
    // UART entry: same start, different size
    inmate.memory_regions[4].size = 0x2000;
    let ConflictError::MemoryOverlap { region_a, region_b } = conflict(vec![inmate]) else {
        panic!("expected memory overlap");
    };
    assert_eq!(region_a.phys_start, UART);
    assert_eq!(region_b.phys_start, UART);
}

#[test]
fn root_shared_between_inmates_is_rejected() {
    let other = CellDescriptor::new("other", Architecture::Arm64)
        .with_cpus([7])
        .with_region(MemoryRegion::identity(
            UART,
            0x1_0000,
            MemoryFlags::READ | MemoryFlags::WRITE | MemoryFlags::IO | MemoryFlags::ROOTSHARED,
        ));
    let mut inmate = linux_inmate();
    inmate.cpu_set = [CpuIndex::new(6)].into_iter().collect();

    let ConflictError::MemoryOverlap { region_a, region_b } = conflict(vec![inmate, other]) else {
        panic!("expected memory overlap");
    };
    assert_eq!(region_a.cell, "linux-inmate-demo");
    assert_eq!(region_b.cell, "other");
}

#[test]
fn inmate_cannot_take_root_memory() {
    let err = conflict(vec![tiny_inmate("greedy", 6, 0x80_0000_0000)]);
    assert!(matches!(err, ConflictError::MemoryOverlap { .. }));
}

// =============================================================================
// Step 3: Comm Regions
// =============================================================================

#[test]
fn comm_region_must_match_root_window() {
    check(vec![tiny_inmate("ok", 6, 0x1_0000)]).unwrap();

    let mut wide = tiny_inmate("wide", 6, 0x1_0000);
    wide.memory_regions[1].size = 0x2000;
    assert_eq!(
        conflict(vec![wide]),
        ConflictError::CommRegionMismatch {
            cell: "wide".into(),
            expected: CommWindow::new(0x8000_0000, 0x1000),
            found: CommWindow::new(0x8000_0000, 0x2000),
        }
    );
}

#[test]
fn root_comm_region_overrides_platform_window() {
    let platform = platform();
    let resolver = resolver();
    let root = root().with_comm_region(CommWindow::new(0x9000_0000, 0x1000));
    let err = validate(&platform, &resolver, root, [tiny_inmate("x", 6, 0x1_0000)]).unwrap_err();
    assert!(matches!(
        err,
        ValidationError::Conflict(ConflictError::CommRegionMismatch { expected, .. })
            if expected.virt_start == 0x9000_0000
    ));
}

#[test]
fn inmate_without_comm_region_is_accepted() {
    let mut quiet = tiny_inmate("quiet", 6, 0x1_0000);
    quiet.memory_regions.pop();
    check(vec![quiet]).unwrap();
}

// =============================================================================
// Step 4: Interrupts
// =============================================================================

#[test]
fn shared_pin_is_rejected() {
    let thief = tiny_inmate("thief", 6, 0x1_0000).with_irqchip(IrqChip::new(GIC, 32).with_pin(34));
    assert_eq!(
        conflict(vec![thief]),
        ConflictError::IrqConflict {
            pin: 34,
            chip: GIC,
            cells: vec!["amd-seattle".into(), "thief".into()],
        }
    );
}

#[test]
fn same_pin_on_another_chip_is_fine() {
    let other = tiny_inmate("other", 6, 0x1_0000)
        .with_irqchip(IrqChip::new(0xe112_0000, 32).with_pin(34));
    check(vec![other]).unwrap();
}

#[test]
fn pin_arena_locates_pins() {
    assert_eq!(pin_location(0), (0, 0));
    assert_eq!(pin_location(354), (11, 2));

    let mut arena = PinArena::from_routing(&root().irq_routing);
    assert!(arena.owns(GIC, 33));
    assert!(arena.owns(GIC, 353));
    assert!(!arena.owns(GIC, 354));
    assert_eq!(arena.pin_count(), 3);

    let inmate = PinArena::from_routing(&linux_inmate().irq_routing);
    arena.claim(&inmate).unwrap();
    assert_eq!(arena.pin_count(), 7);
    assert_eq!(arena.claim(&inmate), Err((GIC, 100)));
}

// =============================================================================
// Step 5: PCI
// =============================================================================

#[test]
fn physical_function_cannot_be_assigned_twice() {
    let nic = PciDevice::new(PciType::Device, Bdf::new(1, 0, 0).unwrap());
    let a = tiny_inmate("a", 6, 0x1_0000).with_pci_device(nic);
    let b = tiny_inmate("b", 7, 0x2_0000).with_pci_device(nic);
    assert_eq!(
        conflict(vec![a, b]),
        ConflictError::PciBdfConflict {
            bdf: Bdf::new(1, 0, 0).unwrap(),
            domain: 0,
            cells: vec!["a".into(), "b".into()],
        }
    );
}

#[test]
fn duplicate_locator_inside_one_cell_is_rejected() {
    let nic = PciDevice::new(PciType::Device, Bdf::new(1, 0, 0).unwrap());
    let a = tiny_inmate("a", 6, 0x1_0000).with_pci_device(nic).with_pci_device(nic);
    assert!(matches!(
        conflict(vec![a]),
        ConflictError::PciBdfConflict { cells, .. } if cells == ["a", "a"]
    ));
}

#[test]
fn other_domain_is_a_different_function() {
    let nic = PciDevice::new(PciType::Device, Bdf::new(1, 0, 0).unwrap());
    let mut nic2 = nic;
    nic2.domain = 1;
    let a = tiny_inmate("a", 6, 0x1_0000).with_pci_device(nic);
    let b = tiny_inmate("b", 7, 0x2_0000).with_pci_device(nic2);
    check(vec![a, b]).unwrap();
}

#[test]
fn shmem_peers_need_distinct_ids() {
    let mut inmate = linux_inmate();
    inmate.pci_devices[0].shmem_dev_id = 0;
    let ConflictError::ShmemPeerMismatch { group, reason } = conflict(vec![inmate]) else {
        panic!("expected shared-memory mismatch");
    };
    assert_eq!(group, NET_BASE);
    assert!(reason.contains("shmem_dev_id 0"));
}

#[test]
fn shmem_peers_need_same_peer_count() {
    let mut inmate = linux_inmate();
    inmate.pci_devices[0].shmem_peers = 3;
    let ConflictError::ShmemPeerMismatch { reason, .. } = conflict(vec![inmate]) else {
        panic!("expected shared-memory mismatch");
    };
    assert!(reason.contains("3 peers"));
}

#[test]
fn shmem_group_rejects_extra_peer() {
    let mut inmate = linux_inmate();
    inmate.cpu_set = [CpuIndex::new(6)].into_iter().collect();

    let mut dev = PciDevice::ivshmem(Bdf::new(0, 0x0f, 0).unwrap(), 2, 1, 2, SHMEM_PROTO_VETH);
    dev.bar_mask = IVSHMEM_BAR_MASK_MSIX;
    dev.num_msix_vectors = 2;
    let third = tiny_inmate("third", 7, 0x84_0000_0000)
        .with_region(MemoryRegion::identity(NET_BASE, 0, MemoryFlags::empty()))
        .with_region(MemoryRegion::identity(NET_BASE + 0x1000, 0, MemoryFlags::empty()))
        .with_pci_device(dev);

    let ConflictError::ShmemPeerMismatch { group, reason } = conflict(vec![inmate, third]) else {
        panic!("expected shared-memory mismatch");
    };
    assert_eq!(group, NET_BASE);
    assert_eq!(reason, "`linux-inmate-demo` and `third` both use shmem_dev_id 1");
}

// =============================================================================
// Step 6: Architecture Resources
// =============================================================================

#[test]
fn architecture_must_match_root() {
    let pc = CellDescriptor::new("pc", Architecture::X86).with_cpus([6]);
    assert_eq!(
        conflict(vec![pc]),
        ConflictError::ArchitectureMismatch {
            cell: "pc".into(),
            expected: Architecture::Arm64,
            found: Architecture::X86,
        }
    );
}

#[test]
fn stream_ids_are_exclusive() {
    let platform = platform();
    let resolver = resolver();
    let root = root().with_stream_id(0x10);
    let inmate = linux_inmate().with_stream_id(0x10);
    let err = validate(&platform, &resolver, root, [inmate]).unwrap_err();
    assert_eq!(
        err,
        ValidationError::Conflict(ConflictError::StreamIdConflict {
            stream_id: 0x10,
            cells: vec!["amd-seattle".into(), "linux-inmate-demo".into()],
        })
    );
}

#[test]
fn port_ranges_are_exclusive() {
    let platform = platform();
    let resolver = resolver();
    let root = CellDescriptor::new("pc", Architecture::X86)
        .with_cpus(0..4)
        .with_pio_region(PioRegion::new(0x3f8, 8));
    let serial = CellDescriptor::new("serial", Architecture::X86)
        .with_cpus([4])
        .with_pio_region(PioRegion::new(0x3fc, 4));
    let err = validate(&platform, &resolver, root.clone(), [serial]).unwrap_err();
    assert_eq!(
        err,
        ValidationError::Conflict(ConflictError::PioConflict {
            base: 0x3fc,
            cells: vec!["pc".into(), "serial".into()],
        })
    );

    let neighbour = CellDescriptor::new("neighbour", Architecture::X86)
        .with_cpus([4])
        .with_pio_region(PioRegion::new(0x400, 4));
    validate(&platform, &resolver, root, [neighbour]).unwrap();
}

// =============================================================================
// Step Order
// =============================================================================

#[test]
fn lowest_step_error_wins() {
    // Conflicts in CPUs (step 1), memory (step 2) and pins (step 4).
    let rogue = CellDescriptor::new("rogue", Architecture::Arm64)
        .with_cpus([0])
        .with_region(region(0x80_0000_0000, 0x1000))
        .with_irqchip(IrqChip::new(GIC, 32).with_pin(33));
    for _ in 0..8 {
        assert!(matches!(
            conflict(vec![rogue.clone()]),
            ConflictError::CpuConflict { .. }
        ));
    }
}

// =============================================================================
// Property Tests
// =============================================================================

fn arb_inmate(index: usize) -> impl Strategy<Value = CellDescriptor> {
    (
        proptest::collection::btree_set(6u32..8, 1..=2),
        proptest::collection::vec((0u64..16, 1u64..4, any::<bool>()), 1..3),
    )
        .prop_map(move |(cpus, regions)| {
            let mut desc =
                CellDescriptor::new(&format!("inmate{index}"), Architecture::Arm64).with_cpus(cpus);
            for (page, pages, shared) in regions {
                let mut flags = MemoryFlags::READ;
                if shared {
                    flags |= MemoryFlags::ROOTSHARED;
                }
                desc = desc.with_region(MemoryRegion::identity(
                    page * 0x1000,
                    pages * 0x1000,
                    flags,
                ));
            }
            desc
        })
}

proptest! {
    #[test]
    fn valid_sets_are_disjoint_and_stable(
        a in arb_inmate(1),
        b in arb_inmate(2),
    ) {
        let platform = platform();
        let resolver = resolver();
        if let Ok(set) = validate(&platform, &resolver, root(), [a, b]) {
            let cells = set.cells();
            for (i, x) in cells.iter().enumerate() {
                for y in &cells[i + 1..] {
                    let (x, y) = (x.descriptor(), y.descriptor());
                    prop_assert_eq!(x.cpu_set.first_common(&y.cpu_set), None);
                    for rx in x.memory_regions.iter().filter(|r| !r.is_rootshared()) {
                        for ry in y.memory_regions.iter().filter(|r| !r.is_rootshared()) {
                            prop_assert!(!rx.phys_overlaps(ry));
                        }
                    }
                }
            }
            let again = Validator::new(&platform, &resolver).revalidate(&set).unwrap();
            prop_assert_eq!(again, set);
        }
    }

    #[test]
    fn validation_is_deterministic(a in arb_inmate(1), b in arb_inmate(2)) {
        let first = check(vec![a.clone(), b.clone()]);
        let second = check(vec![a, b]);
        prop_assert_eq!(first, second);
    }
}
