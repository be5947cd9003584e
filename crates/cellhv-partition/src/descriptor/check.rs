// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Structural checks on a single descriptor.

use super::{ArchExtension, CellDescriptor};
use crate::config::PlatformConfig;
use crate::cpu::CpuResolver;
use crate::error::MalformedDescriptor;
use cellhv_abi::layout::{CELL_NAME_MAXLEN, IRQCHIP_PINS, MAX_SHMEM_PEERS, PIN_WORD_BITS, PIO_SPACE_SIZE};
use cellhv_abi::{IrqChip, MemoryFlags, MemoryRegion, PciDevice, PioRegion};

pub(super) fn check(
    desc: &CellDescriptor,
    platform: &PlatformConfig,
    resolver: &CpuResolver,
) -> Result<(), MalformedDescriptor> {
    let err = |field: String, reason: String| MalformedDescriptor::new(&desc.name, field, reason);

    check_name(&desc.name).map_err(|reason| err("name".into(), reason))?;

    if desc.cpu_set.is_empty() {
        return Err(err("cpu_set".into(), "no CPUs assigned".into()));
    }
    if let Some(cpu) = desc.cpu_set.iter().find(|cpu| !resolver.contains(*cpu)) {
        return Err(err(
            "cpu_set".into(),
            format!("{cpu} is not a registered CPU ({} present)", resolver.cpu_count()),
        ));
    }

    let mut comm_index = None;
    for (i, region) in desc.memory_regions.iter().enumerate() {
        check_region(region, platform.page_size)
            .map_err(|(field, reason)| err(format!("memory_regions[{i}].{field}"), reason))?;
        if region.is_comm_region() {
            if let Some(first) = comm_index {
                return Err(err(
                    format!("memory_regions[{i}].flags"),
                    format!("second comm region, first is memory_regions[{first}]"),
                ));
            }
            comm_index = Some(i);
        }
    }

    for (i, chip) in desc.irq_routing.chips().iter().enumerate() {
        check_irqchip(chip, platform.irq_pin_count)
            .map_err(|reason| err(format!("irqchips[{i}].pin_base"), reason))?;
    }

    for (i, dev) in desc.pci_devices.iter().enumerate() {
        check_pci(dev, desc.memory_regions.len(), platform.pci_max_bus)
            .map_err(|(field, reason)| err(format!("pci_devices[{i}].{field}"), reason))?;
    }

    if let ArchExtension::X86 { pio_regions } = &desc.arch {
        for (i, pio) in pio_regions.iter().enumerate() {
            check_pio(pio).map_err(|reason| err(format!("pio_regions[{i}]"), reason))?;
        }
    }

    Ok(())
}

fn check_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("empty name".into());
    }
    if name.len() > CELL_NAME_MAXLEN {
        return Err(format!(
            "{} bytes, at most {CELL_NAME_MAXLEN} allowed",
            name.len()
        ));
    }
    if name.contains('\0') {
        return Err("contains NUL".into());
    }
    Ok(())
}

fn check_region(region: &MemoryRegion, page_size: u64) -> Result<(), (&'static str, String)> {
    if region.is_placeholder() {
        return Ok(());
    }
    if region.size == 0 {
        return Err(("size", "zero-sized region".into()));
    }
    if region.size % page_size != 0 {
        return Err((
            "size",
            format!("{:#x} is not a multiple of the page size {page_size:#x}", region.size),
        ));
    }
    if region.phys_end().is_none() {
        return Err(("phys_start", "range wraps the address space".into()));
    }
    if region.virt_end().is_none() {
        return Err(("virt_start", "range wraps the address space".into()));
    }
    if region.is_comm_region() {
        if !region.flags.contains(MemoryFlags::COMM_REGION_ACCESS) {
            return Err(("flags", "comm region must be readable and writable".into()));
        }
        let forbidden = region.flags & MemoryFlags::COMM_REGION_FORBIDDEN;
        if !forbidden.is_empty() {
            return Err(("flags", format!("comm region must not carry {forbidden:?}")));
        }
    }
    Ok(())
}

fn check_irqchip(chip: &IrqChip, pin_count: u32) -> Result<(), String> {
    if chip.pin_base % PIN_WORD_BITS != 0 {
        return Err(format!(
            "{} is not a multiple of {PIN_WORD_BITS}",
            chip.pin_base
        ));
    }
    let end = chip.pin_base.checked_add(IRQCHIP_PINS);
    if end.is_none_or(|end| end > pin_count) {
        return Err(format!(
            "pins {}..{} exceed the platform's {pin_count} pins",
            chip.pin_base,
            u64::from(chip.pin_base) + u64::from(IRQCHIP_PINS)
        ));
    }
    Ok(())
}

fn check_pci(
    dev: &PciDevice,
    region_count: usize,
    max_bus: u8,
) -> Result<(), (&'static str, String)> {
    if dev.bdf.bus() > max_bus {
        return Err((
            "bdf",
            format!("bus {:#04x} above platform maximum {max_bus:#04x}", dev.bdf.bus()),
        ));
    }
    if !dev.is_shmem() {
        if dev.shmem_regions_start != 0
            || dev.shmem_dev_id != 0
            || dev.shmem_peers != 0
            || dev.shmem_protocol != 0
        {
            return Err((
                "shmem_regions_start",
                "shared-memory fields set on a non shared-memory device".into(),
            ));
        }
        return Ok(());
    }
    if dev.shmem_peers == 0 || dev.shmem_peers > MAX_SHMEM_PEERS {
        return Err((
            "shmem_peers",
            format!("{} is outside 1..={MAX_SHMEM_PEERS}", dev.shmem_peers),
        ));
    }
    if dev.shmem_dev_id >= dev.shmem_peers {
        return Err((
            "shmem_dev_id",
            format!("{} is not below shmem_peers {}", dev.shmem_dev_id, dev.shmem_peers),
        ));
    }
    let start = dev.shmem_regions_start as usize;
    if start.checked_add(1).is_none_or(|next| next >= region_count) {
        return Err((
            "shmem_regions_start",
            format!("regions {start}.. not present ({region_count} regions)"),
        ));
    }
    Ok(())
}

fn check_pio(pio: &PioRegion) -> Result<(), String> {
    if pio.length == 0 {
        return Err("empty port range".into());
    }
    if pio.end() > PIO_SPACE_SIZE {
        return Err(format!(
            "ports {:#x}..{:#x} exceed the port space",
            pio.base,
            pio.end()
        ));
    }
    Ok(())
}
