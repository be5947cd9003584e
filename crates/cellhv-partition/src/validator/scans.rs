// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Cross-cell conflict scans.
//!
//! Each scan is independent and read-only. Cell 0 of the context is always
//! the root cell. When a scan finds several conflicts it reports the first
//! in a fixed order (cell order, then address order), so results do not
//! depend on scheduling.

use super::CellEntry;
use super::pin_arena::PinArena;
use crate::config::PlatformConfig;
use crate::cpu::CpuResolver;
use crate::descriptor::CellDescriptor;
use crate::error::{ConflictError, RegionRef};
use cellhv_abi::{Bdf, MemoryRegion, PciDevice, PioRegion};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Everything a scan may look at.
pub(super) struct ScanContext<'a> {
    pub(super) platform: &'a PlatformConfig,
    pub(super) resolver: &'a CpuResolver,
    pub(super) cells: &'a [CellEntry],
}

impl ScanContext<'_> {
    fn desc(&self, cell: usize) -> &CellDescriptor {
        self.cells[cell].descriptor()
    }

    fn name(&self, cell: usize) -> String {
        self.cells[cell].name().to_owned()
    }

    fn names(&self, cells: &[usize]) -> Vec<String> {
        cells.iter().map(|cell| self.name(*cell)).collect()
    }
}

pub(super) type Scan = fn(&ScanContext<'_>) -> Result<(), ConflictError>;

/// Scans in reporting priority order.
pub(super) const SCANS: [(&str, Scan); 6] = [
    ("cpu", cpus),
    ("memory", memory),
    ("comm_region", comm_regions),
    ("irq", irqs),
    ("pci", pci),
    ("arch", arch_resources),
];

// =============================================================================
// CPUs
// =============================================================================

fn cpus(ctx: &ScanContext<'_>) -> Result<(), ConflictError> {
    let mut owner: Vec<Option<usize>> = vec![None; ctx.resolver.cpu_count()];
    for cell in 0..ctx.cells.len() {
        for cpu in ctx.desc(cell).cpu_set.iter() {
            // Unregistered indices were rejected by the structural check.
            let Some(slot) = owner.get_mut(cpu.as_usize()) else {
                continue;
            };
            if let Some(prev) = *slot {
                return Err(ConflictError::CpuConflict {
                    cpu,
                    cells: ctx.names(&[prev, cell]),
                });
            }
            *slot = Some(cell);
        }
    }
    if ctx.platform.require_full_cpu_coverage {
        if let Some((cpu, _)) = ctx
            .resolver
            .iter()
            .find(|(cpu, _)| owner.get(cpu.as_usize()).is_some_and(Option::is_none))
        {
            return Err(ConflictError::CpuUnassigned { cpu });
        }
    }
    Ok(())
}

// =============================================================================
// Memory
// =============================================================================

struct Span<'a> {
    cell: usize,
    index: usize,
    region: &'a MemoryRegion,
}

impl Span<'_> {
    fn end(&self) -> u64 {
        self.region.phys_start.saturating_add(self.region.size)
    }
}

/// Root-shared regions may be mapped by the root and exactly one other
/// cell at the identical physical range.
fn sanctioned_share(a: &Span<'_>, b: &Span<'_>) -> bool {
    a.region.is_rootshared()
        && b.region.is_rootshared()
        && (a.cell == 0 || b.cell == 0)
        && a.region.phys_start == b.region.phys_start
        && a.region.size == b.region.size
}

fn memory(ctx: &ScanContext<'_>) -> Result<(), ConflictError> {
    let mut spans: Vec<Span<'_>> = ctx
        .cells
        .iter()
        .enumerate()
        .flat_map(|(cell, entry)| {
            entry
                .descriptor()
                .memory_regions
                .iter()
                .enumerate()
                .filter(|(_, region)| region.is_physically_backed())
                .map(move |(index, region)| Span {
                    cell,
                    index,
                    region,
                })
        })
        .collect();
    spans.sort_by_key(|span| (span.region.phys_start, span.cell, span.index));

    for (i, a) in spans.iter().enumerate() {
        let a_end = a.end();
        for b in &spans[i + 1..] {
            if b.region.phys_start >= a_end {
                break;
            }
            if a.cell == b.cell || sanctioned_share(a, b) {
                continue;
            }
            return Err(ConflictError::MemoryOverlap {
                region_a: region_ref(ctx, a),
                region_b: region_ref(ctx, b),
            });
        }
    }
    Ok(())
}

fn region_ref(ctx: &ScanContext<'_>, span: &Span<'_>) -> RegionRef {
    RegionRef {
        cell: ctx.name(span.cell),
        index: span.index,
        phys_start: span.region.phys_start,
        size: span.region.size,
    }
}

// =============================================================================
// Comm Regions
// =============================================================================

fn comm_regions(ctx: &ScanContext<'_>) -> Result<(), ConflictError> {
    let expected = ctx.desc(0).comm_window().unwrap_or(ctx.platform.comm_region);
    for cell in 1..ctx.cells.len() {
        if let Some(found) = ctx.desc(cell).comm_window() {
            if found != expected {
                return Err(ConflictError::CommRegionMismatch {
                    cell: ctx.name(cell),
                    expected,
                    found,
                });
            }
        }
    }
    Ok(())
}

// =============================================================================
// Interrupts
// =============================================================================

fn irqs(ctx: &ScanContext<'_>) -> Result<(), ConflictError> {
    let mut arena = PinArena::new();
    for cell in 0..ctx.cells.len() {
        let own = PinArena::from_routing(&ctx.desc(cell).irq_routing);
        if let Err((chip, pin)) = arena.claim(&own) {
            let mut owners: Vec<usize> = (0..cell)
                .filter(|prev| ctx.desc(*prev).irq_routing.owns(chip, pin))
                .collect();
            owners.push(cell);
            return Err(ConflictError::IrqConflict {
                pin,
                chip,
                cells: ctx.names(&owners),
            });
        }
    }
    Ok(())
}

// =============================================================================
// PCI
// =============================================================================

fn pci(ctx: &ScanContext<'_>) -> Result<(), ConflictError> {
    let mut owners: HashMap<(u16, Bdf), usize> = HashMap::new();
    let mut groups: BTreeMap<u64, Vec<(usize, &PciDevice)>> = BTreeMap::new();

    for cell in 0..ctx.cells.len() {
        let desc = ctx.desc(cell);
        let mut local = HashSet::new();
        for dev in &desc.pci_devices {
            let key = (dev.domain, dev.bdf);
            let conflict = |cells: &[usize]| ConflictError::PciBdfConflict {
                bdf: dev.bdf,
                domain: dev.domain,
                cells: ctx.names(cells),
            };
            if !local.insert(key) {
                return Err(conflict(&[cell, cell]));
            }
            if let Some(group) = desc.shmem_group(dev) {
                groups.entry(group).or_default().push((cell, dev));
                continue;
            }
            if let Some(&prev) = owners.get(&key) {
                return Err(conflict(&[prev, cell]));
            }
            owners.insert(key, cell);
        }
    }

    for (&group, members) in &groups {
        check_shmem_group(ctx, members)
            .map_err(|reason| ConflictError::ShmemPeerMismatch { group, reason })?;
    }
    Ok(())
}

fn check_shmem_group(ctx: &ScanContext<'_>, members: &[(usize, &PciDevice)]) -> Result<(), String> {
    let Some(&(first_cell, first)) = members.first() else {
        return Ok(());
    };
    let peers = first.shmem_peers;

    let mut cells = HashSet::new();
    let mut dev_ids: BTreeMap<u8, usize> = BTreeMap::new();
    for &(cell, dev) in members {
        if dev.shmem_peers != peers {
            return Err(format!(
                "`{}` expects {} peers, `{}` expects {peers}",
                ctx.name(cell),
                dev.shmem_peers,
                ctx.name(first_cell)
            ));
        }
        if !cells.insert(cell) {
            return Err(format!("`{}` joins the group twice", ctx.name(cell)));
        }
        if dev.shmem_dev_id >= peers {
            return Err(format!(
                "`{}` uses shmem_dev_id {} outside 0..{peers}",
                ctx.name(cell),
                dev.shmem_dev_id
            ));
        }
        if let Some(&prev) = dev_ids.get(&dev.shmem_dev_id) {
            return Err(format!(
                "`{}` and `{}` both use shmem_dev_id {}",
                ctx.name(prev),
                ctx.name(cell),
                dev.shmem_dev_id
            ));
        }
        dev_ids.insert(dev.shmem_dev_id, cell);
    }
    Ok(())
}

// =============================================================================
// Architecture Resources
// =============================================================================

fn arch_resources(ctx: &ScanContext<'_>) -> Result<(), ConflictError> {
    let expected = ctx.desc(0).architecture();
    for cell in 1..ctx.cells.len() {
        let found = ctx.desc(cell).architecture();
        if found != expected {
            return Err(ConflictError::ArchitectureMismatch {
                cell: ctx.name(cell),
                expected,
                found,
            });
        }
    }

    let mut ports: Vec<(usize, &PioRegion)> = (0..ctx.cells.len())
        .flat_map(|cell| ctx.desc(cell).pio_regions().iter().map(move |pio| (cell, pio)))
        .collect();
    ports.sort_by_key(|(cell, pio)| (pio.base, *cell));
    for (i, &(a_cell, a)) in ports.iter().enumerate() {
        for &(b_cell, b) in &ports[i + 1..] {
            if u32::from(b.base) >= a.end() {
                break;
            }
            if a_cell != b_cell && a.overlaps(b) {
                return Err(ConflictError::PioConflict {
                    base: b.base,
                    cells: ctx.names(&[a_cell, b_cell]),
                });
            }
        }
    }

    let mut streams: HashMap<u32, usize> = HashMap::new();
    for cell in 0..ctx.cells.len() {
        for &stream_id in ctx.desc(cell).stream_ids() {
            match streams.get(&stream_id) {
                Some(&prev) if prev != cell => {
                    return Err(ConflictError::StreamIdConflict {
                        stream_id,
                        cells: ctx.names(&[prev, cell]),
                    });
                }
                Some(_) => {}
                None => {
                    streams.insert(stream_id, cell);
                }
            }
        }
    }
    Ok(())
}
