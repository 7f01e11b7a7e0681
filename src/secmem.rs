//! Secure memory: mapping physically addressed secure buffers into a
//! caller-visible virtual window
//!
//! - [`SecureMemory`] is the platform contract (resolve, access, cache
//!   maintenance); [`SimulatedSecureMemory`] backs it with plain byte regions
//! - [`SecureMemoryMapper`] owns the virtual window and hands out
//!   [`MappingGuard`]s that release their range when dropped

use crate::error::{TeeError, TeeResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub type PhysAddr = u64;
pub type VirtAddr = u64;

/// Granularity of the virtual window
pub const PAGE_SIZE: u64 = 4096;

/// Platform side of secure memory
pub trait SecureMemory: Send + Sync {
    /// Check that `[phys, phys + size)` is one contiguous mappable range
    fn resolve(&self, phys: PhysAddr, size: u32) -> TeeResult<()>;

    fn read(&self, phys: PhysAddr, buf: &mut [u8]) -> TeeResult<()>;

    fn write(&self, phys: PhysAddr, data: &[u8]) -> TeeResult<()>;

    /// Push CPU-side writes out to the device. A non-secure caller may only
    /// name addresses it could resolve itself.
    fn flush_cpu_to_device(&self, secure: bool, phys: PhysAddr) -> TeeResult<()>;

    /// Invalidate CPU caches so device writes become visible
    fn flush_device_to_cpu(&self, secure: bool, phys: PhysAddr) -> TeeResult<()>;
}

struct Region {
    base: PhysAddr,
    secure: bool,
    bytes: Vec<u8>,
}

impl Region {
    fn contains(&self, phys: PhysAddr, len: u64) -> bool {
        phys >= self.base && phys.saturating_add(len) <= self.base + self.bytes.len() as u64
    }
}

/// In-process stand-in for platform secure memory
#[derive(Default)]
pub struct SimulatedSecureMemory {
    regions: Mutex<Vec<Region>>,
    flushes: Mutex<Vec<(bool, PhysAddr)>>,
}

impl SimulatedSecureMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contiguous region of `len` bytes at `base`
    pub fn add_region(&self, base: PhysAddr, len: usize, secure: bool) -> TeeResult<()> {
        let mut regions = lock(&self.regions)?;
        let end = base.checked_add(len as u64).ok_or(TeeError::Overflow)?;
        if regions
            .iter()
            .any(|r| base < r.base + r.bytes.len() as u64 && r.base < end)
        {
            return Err(TeeError::AccessConflict);
        }
        regions.push(Region {
            base,
            secure,
            bytes: vec![0u8; len],
        });
        Ok(())
    }

    /// Flushes performed so far, as `(secure, phys)`
    pub fn flush_log(&self) -> Vec<(bool, PhysAddr)> {
        lock(&self.flushes).map(|f| f.clone()).unwrap_or_default()
    }

    fn with_region<T>(
        &self,
        phys: PhysAddr,
        len: u64,
        f: impl FnOnce(&mut Region) -> T,
    ) -> TeeResult<T> {
        let mut regions = lock(&self.regions)?;
        let region = regions
            .iter_mut()
            .find(|r| r.contains(phys, len))
            .ok_or(TeeError::ItemNotFound)?;
        Ok(f(region))
    }

    fn flush(&self, secure: bool, phys: PhysAddr) -> TeeResult<()> {
        let region_secure = self.with_region(phys, 1, |r| r.secure)?;
        if region_secure && !secure {
            return Err(TeeError::AccessDenied);
        }
        lock(&self.flushes)?.push((secure, phys));
        Ok(())
    }
}

impl SecureMemory for SimulatedSecureMemory {
    fn resolve(&self, phys: PhysAddr, size: u32) -> TeeResult<()> {
        self.with_region(phys, size as u64, |_| ())
            .map_err(|_| TeeError::BadParameters)
    }

    fn read(&self, phys: PhysAddr, buf: &mut [u8]) -> TeeResult<()> {
        self.with_region(phys, buf.len() as u64, |r| {
            let start = (phys - r.base) as usize;
            buf.copy_from_slice(&r.bytes[start..start + buf.len()]);
        })
    }

    fn write(&self, phys: PhysAddr, data: &[u8]) -> TeeResult<()> {
        self.with_region(phys, data.len() as u64, |r| {
            let start = (phys - r.base) as usize;
            r.bytes[start..start + data.len()].copy_from_slice(data);
        })
    }

    fn flush_cpu_to_device(&self, secure: bool, phys: PhysAddr) -> TeeResult<()> {
        self.flush(secure, phys)
    }

    fn flush_device_to_cpu(&self, secure: bool, phys: PhysAddr) -> TeeResult<()> {
        self.flush(secure, phys)
    }
}

fn lock<T>(m: &Mutex<T>) -> TeeResult<MutexGuard<'_, T>> {
    m.lock().map_err(|_| TeeError::Generic)
}

/// One live mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub phys: PhysAddr,
    pub size: u32,
    pub virt: VirtAddr,
}

struct Live {
    mapping: Mapping,
    len: u64,
    /// Distinguishes this mapping from a later one at the same address
    generation: u64,
}

#[derive(Default)]
struct Window {
    /// Free `(start, len)` ranges sorted by start, never adjacent
    free: Vec<(VirtAddr, u64)>,
    live: HashMap<VirtAddr, Live>,
    next_generation: u64,
}

impl Window {
    fn allocate(&mut self, len: u64) -> Option<VirtAddr> {
        let slot = self.free.iter().position(|(_, l)| *l >= len)?;
        let (start, l) = self.free[slot];
        if l == len {
            self.free.remove(slot);
        } else {
            self.free[slot] = (start + len, l - len);
        }
        Some(start)
    }

    fn release(&mut self, start: VirtAddr, len: u64) {
        let at = self.free.partition_point(|(s, _)| *s < start);
        self.free.insert(at, (start, len));

        // merge with successor, then predecessor
        if at + 1 < self.free.len() && self.free[at].0 + self.free[at].1 == self.free[at + 1].0 {
            self.free[at].1 += self.free[at + 1].1;
            self.free.remove(at + 1);
        }
        if at > 0 && self.free[at - 1].0 + self.free[at - 1].1 == self.free[at].0 {
            self.free[at - 1].1 += self.free[at].1;
            self.free.remove(at);
        }
    }
}

/// Owner of the secure virtual window
pub struct SecureMemoryMapper {
    backend: Arc<dyn SecureMemory>,
    window_size: u64,
    window: Mutex<Window>,
}

impl SecureMemoryMapper {
    pub fn new(backend: Arc<dyn SecureMemory>, window_base: VirtAddr, window_size: u64) -> Self {
        let window_size = window_size / PAGE_SIZE * PAGE_SIZE;
        let mut window = Window::default();
        if window_size > 0 {
            window.free.push((window_base, window_size));
        }
        Self {
            backend,
            window_size,
            window: Mutex::new(window),
        }
    }

    pub fn backend(&self) -> &Arc<dyn SecureMemory> {
        &self.backend
    }

    /// Map `size` bytes of contiguous physical memory at `phys`
    pub fn map(&self, phys: PhysAddr, size: u32) -> TeeResult<VirtAddr> {
        self.map_tracked(phys, size).map(|(virt, _)| virt)
    }

    fn map_tracked(&self, phys: PhysAddr, size: u32) -> TeeResult<(VirtAddr, u64)> {
        if size == 0 {
            return Err(TeeError::BadParameters);
        }
        self.backend.resolve(phys, size)?;

        let len = (size as u64).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let mut window = lock(&self.window)?;
        let Some(virt) = window.allocate(len) else {
            log::warn!(
                "secure window exhausted: {} bytes requested, {} live mappings",
                len,
                window.live.len()
            );
            return Err(TeeError::OutOfMemory);
        };
        let generation = window.next_generation;
        window.next_generation += 1;
        let mapping = Mapping { phys, size, virt };
        window.live.insert(
            virt,
            Live {
                mapping,
                len,
                generation,
            },
        );
        log::debug!("mapped phys {:#x} (+{}) at {:#x}", phys, size, virt);
        Ok((virt, generation))
    }

    /// Release a mapping. The virtual range is reusable immediately.
    pub fn unmap(&self, virt: VirtAddr) -> TeeResult<()> {
        self.release(virt, None)
    }

    /// Remove the mapping at `virt`, only if it is still `generation` when given
    fn release(&self, virt: VirtAddr, generation: Option<u64>) -> TeeResult<()> {
        let mut window = lock(&self.window)?;
        let current = window.live.get(&virt).map(|l| l.generation);
        if current.is_none() || generation.is_some_and(|g| Some(g) != current) {
            return Err(TeeError::ItemNotFound);
        }
        let live = window.live.remove(&virt).ok_or(TeeError::ItemNotFound)?;
        window.release(virt, live.len);
        log::debug!("unmapped {:#x} (phys {:#x})", virt, live.mapping.phys);
        Ok(())
    }

    fn is_live(&self, virt: VirtAddr, generation: u64) -> bool {
        lock(&self.window)
            .map(|w| w.live.get(&virt).is_some_and(|l| l.generation == generation))
            .unwrap_or(false)
    }

    /// Scoped mapping that unmaps when dropped
    pub fn acquire(&self, phys: PhysAddr, size: u32) -> TeeResult<MappingGuard<'_>> {
        let (virt, generation) = self.map_tracked(phys, size)?;
        Ok(MappingGuard {
            mapper: self,
            mapping: Mapping { phys, size, virt },
            generation,
        })
    }

    pub fn lookup(&self, virt: VirtAddr) -> Option<Mapping> {
        lock(&self.window)
            .ok()
            .and_then(|w| w.live.get(&virt).map(|l| l.mapping))
    }

    pub fn flush_cpu_to_device(&self, phys: PhysAddr, secure: bool) -> TeeResult<()> {
        self.backend.flush_cpu_to_device(secure, phys)
    }

    pub fn flush_device_to_cpu(&self, phys: PhysAddr, secure: bool) -> TeeResult<()> {
        self.backend.flush_device_to_cpu(secure, phys)
    }

    pub fn live_mappings(&self) -> usize {
        lock(&self.window).map(|w| w.live.len()).unwrap_or(0)
    }

    /// Bytes of the window not currently mapped
    pub fn available(&self) -> u64 {
        lock(&self.window)
            .map(|w| w.free.iter().map(|(_, l)| l).sum())
            .unwrap_or(0)
    }

    pub fn window_size(&self) -> u64 {
        self.window_size
    }
}

/// A held mapping. It cannot outlive the mapper and is released on drop,
/// on every exit path. If someone unmaps it first, the guard goes inert and
/// never touches a later mapping that reuses the address.
pub struct MappingGuard<'a> {
    mapper: &'a SecureMemoryMapper,
    mapping: Mapping,
    generation: u64,
}

impl MappingGuard<'_> {
    pub fn mapping(&self) -> Mapping {
        self.mapping
    }

    pub fn virt(&self) -> VirtAddr {
        self.mapping.virt
    }

    fn bounds(&self, offset: usize, len: usize) -> TeeResult<PhysAddr> {
        let end = offset.checked_add(len).ok_or(TeeError::Overflow)?;
        if end > self.mapping.size as usize {
            return Err(TeeError::BadParameters);
        }
        if !self.mapper.is_live(self.mapping.virt, self.generation) {
            return Err(TeeError::BadState);
        }
        Ok(self.mapping.phys + offset as u64)
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> TeeResult<()> {
        let phys = self.bounds(offset, data.len())?;
        self.mapper.backend.write(phys, data)
    }

    pub fn read(&self, offset: usize, buf: &mut [u8]) -> TeeResult<()> {
        let phys = self.bounds(offset, buf.len())?;
        self.mapper.backend.read(phys, buf)
    }

    /// Overwrite the whole mapping with `byte`
    pub fn fill(&self, byte: u8) -> TeeResult<()> {
        self.write(0, &vec![byte; self.mapping.size as usize])
    }
}

impl Drop for MappingGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.mapper.release(self.mapping.virt, Some(self.generation)) {
            log::debug!("mapping {:#x} already released: {}", self.mapping.virt, e);
        }
    }
}
