// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Reference board configurations, loaded from descriptor images on disk.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use cellhv_abi::{Architecture, CellId, CpuIndex, PhysCpuId, RawCellDescriptor};
use cellhv_partition::{
    CellDescriptor, CellState, CpuResolver, DirectorySource, PlatformConfig, load_cell_set,
};
use common::{
    RZG1H_INMATE_RAM, SEATTLE_NET, init_tracing, manager, rzg1h_inmate_demo, rzg1h_resolver,
    rzg1h_root, seattle_linux_demo, seattle_resolver, seattle_root,
};
use std::fs;
use std::path::Path;

fn write_image(dir: &Path, file: &str, desc: &CellDescriptor, resolver: &CpuResolver) {
    let image = desc.to_raw(resolver).unwrap().encode().unwrap();
    fs::write(dir.join(file), image).unwrap();
}

#[test]
fn arm64_linux_inmate_with_virtual_ethernet() {
    init_tracing();
    let resolver = seattle_resolver().unwrap();
    let dir = tempfile::tempdir().unwrap();
    write_image(dir.path(), "00-amd-seattle.cell", &seattle_root(), &resolver);
    write_image(dir.path(), "10-linux-demo.cell", &seattle_linux_demo(), &resolver);

    let loaded = load_cell_set(
        &DirectorySource::new(dir.path()),
        &PlatformConfig::default(),
        &resolver,
    )
    .unwrap();
    assert_eq!(loaded.root, seattle_root());
    assert_eq!(loaded.inmates, [seattle_linux_demo()]);

    let set = loaded
        .clone()
        .validate(&PlatformConfig::default(), &resolver)
        .unwrap();
    let inmate = set.find("amd-seattle-linux-demo").unwrap();
    let veth = &inmate.descriptor().pci_devices[0];
    assert_eq!(inmate.descriptor().shmem_group(veth), Some(SEATTLE_NET));

    let (manager, recording) = manager(PlatformConfig::default(), resolver);
    manager.enable(loaded.root).unwrap();
    let id = manager.create(loaded.inmates[0].clone()).unwrap();
    manager.start(id).unwrap();

    assert_eq!(manager.cell_status(id).unwrap(), CellState::Running);
    assert!(manager.free_cpus().is_empty());
    let mapped = recording.mapped_regions(id).unwrap();
    assert!(mapped.iter().any(|region| region.phys_start == SEATTLE_NET));
}

#[test]
fn arm64_image_keeps_physical_cpu_ids() {
    let resolver = seattle_resolver().unwrap();
    let raw = seattle_linux_demo().to_raw(&resolver).unwrap();
    assert_eq!(raw.cpus, [PhysCpuId::new(0x300), PhysCpuId::new(0x301)]);

    let decoded = RawCellDescriptor::decode(&raw.encode().unwrap()).unwrap();
    assert_eq!(decoded, raw);
}

#[test]
fn arm_single_cpu_inmate() {
    init_tracing();
    let resolver = rzg1h_resolver().unwrap();
    let dir = tempfile::tempdir().unwrap();
    write_image(dir.path(), "a-root.cell", &rzg1h_root(), &resolver);
    write_image(dir.path(), "b-inmate.cell", &rzg1h_inmate_demo(), &resolver);

    let loaded = load_cell_set(
        &DirectorySource::new(dir.path()),
        &PlatformConfig::default(),
        &resolver,
    )
    .unwrap();
    let inmate = &loaded.inmates[0];
    assert_eq!(inmate.architecture(), Architecture::Arm);
    assert_eq!(inmate.console.unwrap().divider, 0x1b);

    let (manager, recording) = manager(PlatformConfig::default(), resolver);
    manager.enable(loaded.root.clone()).unwrap();
    let id = manager.create(inmate.clone()).unwrap();
    assert_eq!(id, CellId::new(1));
    manager.start(id).unwrap();

    let cells = manager.list_cells();
    assert_eq!(cells[1].cpus.iter().collect::<Vec<_>>(), [CpuIndex::new(1)]);
    assert!(
        recording
            .mapped_regions(id)
            .unwrap()
            .iter()
            .any(|region| region.phys_start == RZG1H_INMATE_RAM && region.virt_start == 0)
    );

    manager.stop(id).unwrap();
    manager.destroy(id).unwrap();
    assert_eq!(
        manager.free_cpus().iter().collect::<Vec<_>>(),
        [CpuIndex::new(1)]
    );
}

#[test]
fn arm_inmate_cannot_join_arm64_root() {
    let resolver = seattle_resolver().unwrap();
    let stranger = CellDescriptor::new("stranger", Architecture::Arm)
        .with_cpus([6])
        .with_region(cellhv_abi::MemoryRegion::identity(
            0x84_0000_0000,
            0x1_0000,
            cellhv_abi::MemoryFlags::READ,
        ));

    let (manager, _) = manager(PlatformConfig::default(), resolver);
    manager.enable(seattle_root()).unwrap();
    assert!(manager.add_cell(stranger).is_err());
    assert_eq!(manager.list_cells().len(), 1);
}
