//! Virtual Memory Manager (VMM) for the kernel.
//!
//! Owns the table pool and every address space, tracks which space is
//! active, and implements the page-granular `vmalloc`/`vfree` allocator on
//! top of [`AddressSpace`].
//!
//! All operations that touch page tables take the platform as a parameter:
//! it is both the [`PhysMapper`] through which tables are reached and the
//! [`Mmu`] that gets CR3 loads and TLB invalidations.

use crate::arena::{Arena, Handle};
use crate::frame_alloc::{BitmapFrameAllocator, Frame};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use kernel_info::memory::{KERNEL_BASE, MAX_PROCESSES, USER_BASE, is_kernel_half};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress, pages_for};
use kernel_vmem::{AddressSpace, Mmu, PageEntryBits, PhysMapper, TablePool, VmError};
use log::{debug, warn};

/// Names an address space owned by the [`Vmm`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SpaceId(Handle);

impl SpaceId {
    #[must_use]
    pub const fn from_handle(handle: Handle) -> Self {
        Self(handle)
    }

    #[must_use]
    pub const fn handle(self) -> Handle {
        self.0
    }
}

/// One `vmalloc` allocation: the frames backing it, in page order.
#[derive(Debug)]
pub struct Region {
    frames: Vec<Frame>,
    size: u32,
}

impl Region {
    /// Size in bytes as requested.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Number of pages (and frames).
    #[must_use]
    pub fn pages(&self) -> usize {
        self.frames.len()
    }
}

struct SpaceRecord {
    space: AddressSpace,
    /// `vmalloc` regions by start address.
    regions: BTreeMap<u32, Region>,
}

/// Kernel virtual memory manager.
pub struct Vmm {
    pool: TablePool,
    spaces: Arena<SpaceRecord>,
    kernel: SpaceId,
    active: SpaceId,
}

impl Vmm {
    /// Reserve the table pool from `frames` and build the kernel space.
    ///
    /// The kernel space is recorded as active; loading it into CR3 is left to
    /// the caller (see [`Vmm::activate_kernel`]).
    ///
    /// # Errors
    /// [`VmError::OutOfFrames`] or [`VmError::TablePoolExhausted`] if the
    /// pool cannot be built or cannot hold the kernel half.
    pub fn new<P: PhysMapper>(
        frames: &mut BitmapFrameAllocator,
        mapper: &P,
        table_pool_capacity: usize,
    ) -> Result<Self, VmError> {
        let mut pool = TablePool::new(frames, table_pool_capacity)?;
        let space = AddressSpace::new_kernel(&mut pool, mapper)?;
        debug!("vmm: kernel directory at {:?}", space.directory());

        // One space per process plus the kernel's own.
        let mut spaces = Arena::with_capacity(MAX_PROCESSES + 1);
        let kernel = spaces
            .insert(SpaceRecord {
                space,
                regions: BTreeMap::new(),
            })
            .map(SpaceId)
            .map_err(|_| VmError::TooManySpaces)?;

        Ok(Self {
            pool,
            spaces,
            kernel,
            active: kernel,
        })
    }

    #[must_use]
    pub const fn kernel_space(&self) -> SpaceId {
        self.kernel
    }

    #[must_use]
    pub const fn active_space(&self) -> SpaceId {
        self.active
    }

    #[must_use]
    pub fn space(&self, id: SpaceId) -> Option<&AddressSpace> {
        self.spaces.get(id.0).map(|r| &r.space)
    }

    #[must_use]
    pub fn contains(&self, id: SpaceId) -> bool {
        self.spaces.contains(id.0)
    }

    /// Number of live address spaces, the kernel space included.
    #[must_use]
    pub const fn space_count(&self) -> usize {
        self.spaces.len()
    }

    #[must_use]
    pub const fn table_pool(&self) -> &TablePool {
        &self.pool
    }

    /// Outstanding `vmalloc` regions of a space, by start address.
    pub fn regions(&self, id: SpaceId) -> impl Iterator<Item = (VirtualAddress, &Region)> {
        self.spaces
            .get(id.0)
            .into_iter()
            .flat_map(|r| r.regions.iter())
            .map(|(&va, region)| (VirtualAddress::new(va), region))
    }

    /// Load the kernel space into CR3 unconditionally (boot).
    pub fn activate_kernel<P: Mmu>(&mut self, mmu: &P) {
        if let Some(record) = self.spaces.get(self.kernel.0) {
            mmu.load_directory(record.space.directory());
        }
        self.active = self.kernel;
    }

    /// Create a space sharing the kernel half with an empty user half.
    ///
    /// # Errors
    /// - [`VmError::TablePoolExhausted`] if no directory slot is left.
    /// - [`VmError::TooManySpaces`] once every space slot is taken.
    pub fn create_address_space<P: PhysMapper>(&mut self, mapper: &P) -> Result<SpaceId, VmError> {
        let kernel = &self
            .spaces
            .get(self.kernel.0)
            .ok_or(VmError::UnknownSpace)?
            .space;
        let space = AddressSpace::new_user(&mut self.pool, mapper, kernel)?;
        let directory = space.directory();
        match self.spaces.insert(SpaceRecord {
            space,
            regions: BTreeMap::new(),
        }) {
            Ok(handle) => {
                debug!("vmm: created space {handle:?} at {directory:?}");
                Ok(SpaceId(handle))
            }
            Err(record) => {
                self.pool.give_back(record.space.directory());
                warn!("vmm: no slot left for another address space");
                Err(VmError::TooManySpaces)
            }
        }
    }

    /// Make `id` the active space.
    ///
    /// Returns `false` without touching CR3 if it already is.
    ///
    /// # Errors
    /// [`VmError::UnknownSpace`] for a stale or unknown id.
    pub fn switch<P: Mmu>(&mut self, mmu: &P, id: SpaceId) -> Result<bool, VmError> {
        let directory = self.record(id)?.space.directory();
        if id == self.active {
            return Ok(false);
        }
        mmu.load_directory(directory);
        self.active = id;
        debug!("vmm: switched to space {:?}", id.0);
        Ok(true)
    }

    /// Tear down a space: free every `vmalloc` region, return every user-half
    /// table and the directory to the pool.
    ///
    /// If `id` is active, the kernel space is activated first.
    ///
    /// # Errors
    /// - [`VmError::KernelSpace`] for the kernel space.
    /// - [`VmError::UnknownSpace`] for a stale or unknown id.
    pub fn destroy<P: PhysMapper + Mmu>(
        &mut self,
        frames: &mut BitmapFrameAllocator,
        platform: &P,
        id: SpaceId,
    ) -> Result<(), VmError> {
        if id == self.kernel {
            return Err(VmError::KernelSpace);
        }
        self.record(id)?;
        if id == self.active {
            self.switch(platform, self.kernel)?;
        }

        let Some(mut record) = self.spaces.remove(id.0) else {
            return Err(VmError::UnknownSpace);
        };
        let regions = core::mem::take(&mut record.regions);
        for (va, region) in regions {
            Self::release_region(
                &mut self.pool,
                platform,
                frames,
                &mut record.space,
                VirtualAddress::new(va),
                region,
                false,
            );
        }
        record
            .space
            .destroy(&mut self.pool, platform)
            .map_err(|(_, e)| e)?;
        debug!("vmm: destroyed space {:?}", id.0);
        Ok(())
    }

    /// Map one page of `id`; see [`AddressSpace::map`].
    ///
    /// # Errors
    /// [`VmError::UnknownSpace`] plus everything [`AddressSpace::map`] reports.
    pub fn map<P: PhysMapper + Mmu>(
        &mut self,
        platform: &P,
        id: SpaceId,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<Option<PhysicalAddress>, VmError> {
        let needs_flush = self.needs_flush(id, va);
        let record = self.spaces.get_mut(id.0).ok_or(VmError::UnknownSpace)?;
        let previous = record.space.map(&mut self.pool, platform, va, pa, flags)?;
        if needs_flush {
            platform.invalidate_page(va);
        }
        Ok(previous)
    }

    /// Unmap one page of `id`; see [`AddressSpace::unmap`].
    ///
    /// # Errors
    /// [`VmError::UnknownSpace`] plus everything [`AddressSpace::unmap`] reports.
    pub fn unmap<P: PhysMapper + Mmu>(
        &mut self,
        platform: &P,
        id: SpaceId,
        va: VirtualAddress,
    ) -> Result<Option<PhysicalAddress>, VmError> {
        let needs_flush = self.needs_flush(id, va);
        let record = self.spaces.get_mut(id.0).ok_or(VmError::UnknownSpace)?;
        let previous = record.space.unmap(&mut self.pool, platform, va)?;
        if needs_flush && previous.is_some() {
            platform.invalidate_page(va);
        }
        Ok(previous)
    }

    /// Translate `va` in space `id`.
    ///
    /// # Errors
    /// [`VmError::UnknownSpace`] for a stale or unknown id.
    pub fn query<P: PhysMapper>(
        &self,
        mapper: &P,
        id: SpaceId,
        va: VirtualAddress,
    ) -> Result<Option<PhysicalAddress>, VmError> {
        Ok(self.record(id)?.space.query(mapper, va))
    }

    /// `vmalloc` in the active space.
    ///
    /// # Errors
    /// See [`Vmm::vmalloc_in`].
    pub fn vmalloc<P: PhysMapper + Mmu>(
        &mut self,
        frames: &mut BitmapFrameAllocator,
        platform: &P,
        size: u32,
    ) -> Result<VirtualAddress, VmError> {
        self.vmalloc_in(frames, platform, self.active, size)
    }

    /// `vfree` in the active space.
    ///
    /// # Errors
    /// See [`Vmm::vfree_in`].
    pub fn vfree<P: PhysMapper + Mmu>(
        &mut self,
        frames: &mut BitmapFrameAllocator,
        platform: &P,
        va: VirtualAddress,
    ) -> Result<bool, VmError> {
        self.vfree_in(frames, platform, self.active, va)
    }

    /// Allocate `size` bytes (rounded up to whole pages) of fresh,
    /// user-accessible memory in space `id`.
    ///
    /// The region is placed at the lowest run of unmapped pages between
    /// `USER_BASE` and `KERNEL_BASE` that no other region claims, even where
    /// pages of that region were unmapped by hand. Each page gets its own
    /// frame. On any failure, everything done so far is undone.
    ///
    /// # Errors
    /// - [`VmError::ZeroSize`] for `size == 0`.
    /// - [`VmError::UnknownSpace`] for a stale or unknown id.
    /// - [`VmError::NoVirtualSpace`], [`VmError::OutOfFrames`],
    ///   [`VmError::TablePoolExhausted`] when resources run out.
    pub fn vmalloc_in<P: PhysMapper + Mmu>(
        &mut self,
        frames: &mut BitmapFrameAllocator,
        platform: &P,
        id: SpaceId,
        size: u32,
    ) -> Result<VirtualAddress, VmError> {
        if size == 0 {
            return Err(VmError::ZeroSize);
        }
        let pages = pages_for(size);
        let flush = id == self.active;
        let record = self
            .spaces
            .get_mut(id.0)
            .ok_or(VmError::UnknownSpace)?;

        let start = Self::find_unclaimed(record, platform, pages).ok_or(VmError::NoVirtualSpace { pages })?;

        if pages > frames.free_count() {
            return Err(VmError::OutOfFrames);
        }
        let mut region = Region {
            frames: Vec::new(),
            size,
        };
        region
            .frames
            .try_reserve_exact(pages as usize)
            .map_err(|_| VmError::OutOfFrames)?;
        for _ in 0..pages {
            match frames.allocate_frame() {
                Ok(frame) => region.frames.push(frame),
                Err(_) => {
                    for frame in region.frames {
                        frames.free_frame(frame);
                    }
                    return Err(VmError::OutOfFrames);
                }
            }
        }

        let mut va = start;
        let mut failure = None;
        for (mapped, frame) in region.frames.iter().enumerate() {
            let flags = PageEntryBits::user_rw();
            if let Err(e) = record.space.map(&mut self.pool, platform, va, frame.base(), flags) {
                failure = Some((mapped, e));
                break;
            }
            if flush {
                platform.invalidate_page(va);
            }
            va = VirtualAddress::new(va.as_u32() + PAGE_SIZE);
        }
        if let Some((mapped, e)) = failure {
            Self::rollback(&mut self.pool, platform, frames, &mut record.space, start, region, mapped, flush);
            return Err(e);
        }

        debug!("vmm: vmalloc {size} bytes ({pages} pages) at {start} in {:?}", id.0);
        record.regions.insert(start.as_u32(), region);
        Ok(start)
    }

    /// Free the `vmalloc` region starting at `va` in space `id`.
    ///
    /// Returns `false` (and changes nothing) if no region starts there.
    ///
    /// # Errors
    /// [`VmError::UnknownSpace`] for a stale or unknown id.
    pub fn vfree_in<P: PhysMapper + Mmu>(
        &mut self,
        frames: &mut BitmapFrameAllocator,
        platform: &P,
        id: SpaceId,
        va: VirtualAddress,
    ) -> Result<bool, VmError> {
        let flush = id == self.active;
        let record = self
            .spaces
            .get_mut(id.0)
            .ok_or(VmError::UnknownSpace)?;
        let Some(region) = record.regions.remove(&va.as_u32()) else {
            warn!("vmm: vfree of unknown region {va} in {:?} ignored", id.0);
            return Ok(false);
        };
        let pages = region.pages();
        Self::release_region(&mut self.pool, platform, frames, &mut record.space, va, region, flush);
        debug!("vmm: vfree {pages} pages at {va} in {:?}", id.0);
        Ok(true)
    }

    /// `true` if every space carries exactly the kernel space's kernel-half
    /// directory entries.
    #[must_use]
    pub fn kernel_half_consistent<P: PhysMapper>(&self, mapper: &P) -> bool {
        use kernel_vmem::DirectoryIndex;
        use kernel_vmem::info::KERNEL_FIRST_SLOT;

        let Some(kernel) = self.space(self.kernel) else {
            return false;
        };
        self.spaces.iter().all(|(_, record)| {
            (KERNEL_FIRST_SLOT..kernel_memory_addresses::ENTRIES_PER_TABLE).all(|slot| {
                #[allow(clippy::cast_possible_truncation)]
                let slot = DirectoryIndex::new(slot as u16);
                record.space.directory_entry(mapper, slot) == kernel.directory_entry(mapper, slot)
            })
        })
    }

    fn needs_flush(&self, id: SpaceId, va: VirtualAddress) -> bool {
        id == self.active || is_kernel_half(va.as_u32())
    }

    fn record(&self, id: SpaceId) -> Result<&SpaceRecord, VmError> {
        self.spaces.get(id.0).ok_or(VmError::UnknownSpace)
    }

    /// Lowest run of `pages` unmapped user pages that overlaps no region.
    fn find_unclaimed<P: PhysMapper>(record: &SpaceRecord, mapper: &P, pages: u32) -> Option<VirtualAddress> {
        let end = VirtualAddress::new(KERNEL_BASE);
        let mut from = USER_BASE;
        loop {
            let start = record
                .space
                .find_free_range(mapper, VirtualAddress::new(from), end, pages)?;
            let stop = start.as_u32() + pages * PAGE_SIZE;
            // Regions are disjoint, so only the last one starting below `stop` can overlap.
            match record.regions.range(..stop).next_back() {
                Some((&base, region)) if base + pages_for(region.size) * PAGE_SIZE > start.as_u32() => {
                    from = base + pages_for(region.size) * PAGE_SIZE;
                }
                _ => return Some(start),
            }
        }
    }

    /// Unmap the first `mapped` pages of a half-built region, then free all
    /// of its frames.
    #[allow(clippy::too_many_arguments)]
    fn rollback<P: PhysMapper + Mmu>(
        pool: &mut TablePool,
        platform: &P,
        frames: &mut BitmapFrameAllocator,
        space: &mut AddressSpace,
        start: VirtualAddress,
        region: Region,
        mapped: usize,
        flush: bool,
    ) {
        let mut va = start;
        for _ in 0..mapped {
            if let Ok(Some(_)) = space.unmap(pool, platform, va)
                && flush
            {
                platform.invalidate_page(va);
            }
            va = VirtualAddress::new(va.as_u32() + PAGE_SIZE);
        }
        for frame in region.frames {
            frames.free_frame(frame);
        }
    }

    fn release_region<P: PhysMapper + Mmu>(
        pool: &mut TablePool,
        platform: &P,
        frames: &mut BitmapFrameAllocator,
        space: &mut AddressSpace,
        start: VirtualAddress,
        region: Region,
        flush: bool,
    ) {
        let mapped = region.pages();
        Self::rollback(pool, platform, frames, space, start, region, mapped, flush);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SimRam;
    use kernel_info::memory::KERNEL_SLOTS;
    use kernel_memory_addresses::PhysicalPage;

    fn setup(frames: u32, pool: usize) -> (SimRam, BitmapFrameAllocator, Vmm) {
        let ram = SimRam::default();
        let mut alloc = BitmapFrameAllocator::new(frames);
        alloc.reserve(0..16);
        let vmm = Vmm::new(&mut alloc, &ram, pool).unwrap();
        (ram, alloc, vmm)
    }

    #[test]
    fn boot_builds_kernel_space() {
        let (ram, frames, mut vmm) = setup(1024, 300);
        assert_eq!(frames.used_count(), 16 + 300);
        assert_eq!(vmm.table_pool().in_use(), KERNEL_SLOTS + 1);
        vmm.activate_kernel(&ram);
        let kernel_dir = vmm.space(vmm.kernel_space()).unwrap().directory();
        assert_eq!(ram.loads(), [kernel_dir]);
    }

    #[test]
    fn switch_is_noop_for_active_space() {
        let (ram, _frames, mut vmm) = setup(1024, 300);
        let space = vmm.create_address_space(&ram).unwrap();
        assert_eq!(vmm.switch(&ram, vmm.kernel_space()), Ok(false));
        assert!(ram.loads().is_empty());

        assert_eq!(vmm.switch(&ram, space), Ok(true));
        assert_eq!(vmm.switch(&ram, space), Ok(false));
        assert_eq!(ram.loads().len(), 1);
        assert_eq!(vmm.active_space(), space);
    }

    #[test]
    fn vmalloc_takes_one_frame_per_page() {
        let (ram, mut frames, mut vmm) = setup(1024, 300);
        let space = vmm.create_address_space(&ram).unwrap();
        vmm.switch(&ram, space).unwrap();
        let before = frames.free_count();

        let va = vmm.vmalloc(&mut frames, &ram, 8192).unwrap();
        assert_eq!(va, VirtualAddress::new(USER_BASE));
        assert_eq!(frames.free_count(), before - 2);

        for n in 0..2 {
            let page = VirtualAddress::new(va.as_u32() + n * PAGE_SIZE);
            let pa = vmm.query(&ram, space, page).unwrap().unwrap();
            assert!(frames.is_allocated(PhysicalPage::from_addr(pa)));
        }

        assert_eq!(vmm.vfree(&mut frames, &ram, va), Ok(true));
        assert_eq!(frames.free_count(), before);
        assert_eq!(vmm.query(&ram, space, va), Ok(None));
        assert_eq!(vmm.vfree(&mut frames, &ram, va), Ok(false));
        assert_eq!(frames.free_count(), before);
    }

    #[test]
    fn vmalloc_is_first_fit_from_user_base() {
        let (ram, mut frames, mut vmm) = setup(1024, 300);
        let space = vmm.create_address_space(&ram).unwrap();
        let a = vmm.vmalloc_in(&mut frames, &ram, space, 1).unwrap();
        let b = vmm.vmalloc_in(&mut frames, &ram, space, 4096).unwrap();
        let c = vmm.vmalloc_in(&mut frames, &ram, space, 4097).unwrap();
        assert_eq!(a.as_u32(), USER_BASE);
        assert_eq!(b.as_u32(), USER_BASE + PAGE_SIZE);
        assert_eq!(c.as_u32(), USER_BASE + 2 * PAGE_SIZE);

        vmm.vfree_in(&mut frames, &ram, space, a).unwrap();
        let d = vmm.vmalloc_in(&mut frames, &ram, space, 100).unwrap();
        assert_eq!(d, a);
        let e = vmm.vmalloc_in(&mut frames, &ram, space, 2 * PAGE_SIZE).unwrap();
        assert_eq!(e.as_u32(), USER_BASE + 4 * PAGE_SIZE);
    }

    #[test]
    fn vmalloc_rolls_back_when_frames_run_out() {
        let (ram, mut frames, mut vmm) = setup(400, 300);
        let space = vmm.create_address_space(&ram).unwrap();
        let free = frames.free_count();
        let tables = vmm.table_pool().in_use();

        let result = vmm.vmalloc_in(&mut frames, &ram, space, (free + 1) * PAGE_SIZE);
        assert_eq!(result, Err(VmError::OutOfFrames));
        assert_eq!(frames.free_count(), free);
        assert_eq!(vmm.table_pool().in_use(), tables);
        assert_eq!(vmm.regions(space).count(), 0);
    }

    #[test]
    fn vmalloc_rolls_back_when_tables_run_out() {
        // Exactly one spare table slot: the second 4 MiB region cannot get a table.
        let (ram, mut frames, mut vmm) = setup(4096, KERNEL_SLOTS + 3);
        let space = vmm.create_address_space(&ram).unwrap();
        assert_eq!(vmm.table_pool().available(), 1);
        let free = frames.free_count();

        let result = vmm.vmalloc_in(&mut frames, &ram, space, 1025 * PAGE_SIZE);
        assert_eq!(result, Err(VmError::TablePoolExhausted));
        assert_eq!(frames.free_count(), free);
        assert_eq!(vmm.table_pool().available(), 1);
        assert_eq!(vmm.space(space).unwrap().user_table_count(&ram), 0);
    }

    #[test]
    fn vmalloc_skips_pages_unmapped_inside_a_region() {
        let (ram, mut frames, mut vmm) = setup(1024, 300);
        let space = vmm.create_address_space(&ram).unwrap();
        let a = vmm.vmalloc_in(&mut frames, &ram, space, 3 * PAGE_SIZE).unwrap();
        let middle = VirtualAddress::new(a.as_u32() + PAGE_SIZE);
        assert!(vmm.unmap(&ram, space, middle).unwrap().is_some());

        let b = vmm.vmalloc_in(&mut frames, &ram, space, PAGE_SIZE).unwrap();
        assert_eq!(b.as_u32(), a.as_u32() + 3 * PAGE_SIZE);
        assert_eq!(vmm.vfree_in(&mut frames, &ram, space, a), Ok(true));
        assert!(vmm.query(&ram, space, b).unwrap().is_some());
    }

    #[test]
    fn full_space_table_reports_too_many_spaces() {
        let (ram, _frames, mut vmm) = setup(1024, 600);
        while vmm.space_count() < MAX_PROCESSES + 1 {
            vmm.create_address_space(&ram).unwrap();
        }
        let available = vmm.table_pool().available();

        let err = vmm.create_address_space(&ram).unwrap_err();
        assert_eq!(err, VmError::TooManySpaces);
        assert!(err.is_exhaustion());
        assert_eq!(vmm.table_pool().available(), available);
    }

    #[test]
    fn zero_size_is_rejected() {
        let (ram, mut frames, mut vmm) = setup(1024, 300);
        assert_eq!(vmm.vmalloc(&mut frames, &ram, 0), Err(VmError::ZeroSize));
    }

    #[test]
    fn destroy_frees_regions_and_tables() {
        let (ram, mut frames, mut vmm) = setup(1024, 300);
        let free = frames.free_count();
        let tables = vmm.table_pool().in_use();

        let space = vmm.create_address_space(&ram).unwrap();
        vmm.switch(&ram, space).unwrap();
        vmm.vmalloc(&mut frames, &ram, 3 * PAGE_SIZE).unwrap();
        vmm.vmalloc(&mut frames, &ram, PAGE_SIZE).unwrap();

        vmm.destroy(&mut frames, &ram, space).unwrap();
        assert_eq!(frames.free_count(), free);
        assert_eq!(vmm.table_pool().in_use(), tables);
        assert_eq!(vmm.active_space(), vmm.kernel_space());
        assert!(!vmm.contains(space));
        assert_eq!(
            vmm.destroy(&mut frames, &ram, space),
            Err(VmError::UnknownSpace)
        );
        assert_eq!(
            vmm.destroy(&mut frames, &ram, vmm.kernel_space()),
            Err(VmError::KernelSpace)
        );
    }

    #[test]
    fn kernel_mappings_reach_every_space() {
        let (ram, _frames, mut vmm) = setup(1024, 300);
        let a = vmm.create_address_space(&ram).unwrap();
        let b = vmm.create_address_space(&ram).unwrap();
        let va = VirtualAddress::new(KERNEL_BASE + 0x0200_0000);
        let pa = PhysicalAddress::new(0x0001_0000);

        vmm.map(&ram, vmm.kernel_space(), va, pa, PageEntryBits::kernel_rw())
            .unwrap();
        assert_eq!(vmm.query(&ram, a, va), Ok(Some(pa)));
        assert_eq!(vmm.query(&ram, b, va), Ok(Some(pa)));
        assert!(vmm.kernel_half_consistent(&ram));
        assert_eq!(ram.invalidations(), [va]);

        assert_eq!(
            vmm.map(&ram, a, va, pa, PageEntryBits::kernel_rw()),
            Err(VmError::KernelHalf(va))
        );
    }
}
