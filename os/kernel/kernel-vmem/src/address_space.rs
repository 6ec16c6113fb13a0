//! # Address Space (IA-32, directory-rooted)
//!
//! Builds and edits a **single** virtual address space: one page directory
//! plus the page tables it points to, all taken from a [`TablePool`].
//!
//! ## Highlights
//!
//! - [`AddressSpace::new_kernel`] builds the kernel space with every
//!   kernel-half table allocated.
//! - [`AddressSpace::new_user`] builds a space sharing the kernel half.
//! - [`AddressSpace::map`] / [`AddressSpace::unmap`] / [`AddressSpace::query`]
//!   edit and translate single 4 KiB pages.
//! - [`AddressSpace::find_free_range`] looks for unmapped runs of pages.
//!
//! ## Design
//!
//! - User-half directory slots are created on first use and released when
//!   their last page is unmapped. Kernel-half slots are never released.
//! - Only the kernel space may edit the kernel half; since the kernel-half
//!   tables are shared, its edits are visible in every space.
//! - No TLB maintenance happens here; callers invalidate after editing an
//!   active mapping.

use crate::info::{KERNEL_FIRST_SLOT, is_kernel_half, is_kernel_slot};
use crate::page_table::pd::{DirectoryIndex, PdEntry};
use crate::page_table::pt::{PtEntry, TableIndex};
use crate::page_table::split_indices;
use crate::{PageEntryBits, PhysMapper, TablePool, VmError, get_directory, get_table};
use kernel_memory_addresses::{
    ENTRIES_PER_TABLE, PAGE_SIZE, PhysicalAddress, PhysicalPage, TABLE_COVERAGE, VirtualAddress,
};
use log::trace;

/// Handle to a single, concrete address space.
///
/// The handle only names the directory frame; the tables themselves are
/// reached through a [`PhysMapper`] on every call.
#[derive(Debug, Eq, PartialEq)]
pub struct AddressSpace {
    directory: PhysicalPage,
    kernel: bool,
}

impl AddressSpace {
    /// Build the kernel space: a fresh directory with a page table in every
    /// kernel-half slot.
    ///
    /// # Errors
    /// [`VmError::TablePoolExhausted`] if the pool cannot hold the directory
    /// plus the kernel-half tables.
    pub fn new_kernel<M: PhysMapper>(pool: &mut TablePool, mapper: &M) -> Result<Self, VmError> {
        let directory = pool.take(mapper)?;
        let mut taken = alloc::vec::Vec::new();
        for slot in KERNEL_FIRST_SLOT..ENTRIES_PER_TABLE {
            match pool.take(mapper) {
                Ok(table) => {
                    taken.push(table);
                    let entry = PdEntry::make_next(table, PageEntryBits::kernel_rw());
                    // SAFETY: directory is a pool slot we own exclusively.
                    unsafe { get_directory(mapper, directory) }.set(slot_index(slot), entry);
                }
                Err(e) => {
                    for table in taken {
                        pool.give_back(table);
                    }
                    pool.give_back(directory);
                    return Err(e);
                }
            }
        }
        Ok(Self {
            directory,
            kernel: true,
        })
    }

    /// Build a user space: an empty user half plus the kernel half of
    /// `kernel`, copied entry for entry.
    ///
    /// # Errors
    /// [`VmError::TablePoolExhausted`] if no slot is left for the directory.
    pub fn new_user<M: PhysMapper>(
        pool: &mut TablePool,
        mapper: &M,
        kernel: &Self,
    ) -> Result<Self, VmError> {
        debug_assert!(kernel.kernel, "user spaces copy the kernel space");
        let directory = pool.take(mapper)?;
        // SAFETY: both directories are distinct pool slots.
        let src = unsafe { get_directory(mapper, kernel.directory) };
        let dst = unsafe { get_directory(mapper, directory) };
        dst.copy_entries(
            KERNEL_FIRST_SLOT,
            src.entries(KERNEL_FIRST_SLOT..ENTRIES_PER_TABLE),
        );
        Ok(Self {
            directory,
            kernel: false,
        })
    }

    /// Physical frame of the page directory (the CR3 value).
    #[inline]
    #[must_use]
    pub const fn directory(&self) -> PhysicalPage {
        self.directory
    }

    /// `true` for the kernel space.
    #[inline]
    #[must_use]
    pub const fn is_kernel(&self) -> bool {
        self.kernel
    }

    /// Read a directory entry.
    #[must_use]
    pub fn directory_entry<M: PhysMapper>(&self, mapper: &M, slot: DirectoryIndex) -> PdEntry {
        // SAFETY: the directory belongs to this space; the borrow ends here.
        unsafe { get_directory(mapper, self.directory) }.get(slot)
    }

    /// Map the 4 KiB page at `va` to the frame at `pa` with `flags`.
    ///
    /// A missing page table is taken from `pool`. Mapping an already mapped
    /// page overwrites it; the previous target is returned.
    ///
    /// # Errors
    /// - [`VmError::MisalignedVirtual`] / [`VmError::MisalignedPhysical`].
    /// - [`VmError::KernelHalf`] if a user space targets the kernel half.
    /// - [`VmError::TablePoolExhausted`] if a table is needed and none is left.
    pub fn map<M: PhysMapper>(
        &mut self,
        pool: &mut TablePool,
        mapper: &M,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<Option<PhysicalAddress>, VmError> {
        self.check_target(va)?;
        if !pa.is_page_aligned() {
            return Err(VmError::MisalignedPhysical(pa));
        }

        let (d, t) = split_indices(va);
        // SAFETY: the directory belongs to this space.
        let dir = unsafe { get_directory(mapper, self.directory) };
        let table_page = match dir.get(d).next_table() {
            Some(page) => page,
            None => {
                let page = pool.take(mapper)?;
                let slot_flags = if is_kernel_slot(d.as_usize()) {
                    PageEntryBits::kernel_rw()
                } else {
                    PageEntryBits::user_rw()
                };
                dir.set(d, PdEntry::make_next(page, slot_flags));
                trace!("{:?}: new table {page:?} for slot {}", self.directory, d.as_usize());
                page
            }
        };

        // SAFETY: table frames are distinct from the directory frame.
        let table = unsafe { get_table(mapper, table_page) };
        let previous = table.get(t).page_4k().map(|(page, _)| page.base());
        table.set(t, PtEntry::make_4k(pa.page(), flags.flags_only()));
        trace!("{:?}: map {va} -> {pa}", self.directory);
        Ok(previous)
    }

    /// Remove the mapping of the page at `va`.
    ///
    /// Returns the frame it pointed to, or `None` if nothing was mapped. A
    /// user-half page table left empty is returned to `pool`.
    ///
    /// # Errors
    /// - [`VmError::MisalignedVirtual`].
    /// - [`VmError::KernelHalf`] if a user space targets the kernel half.
    pub fn unmap<M: PhysMapper>(
        &mut self,
        pool: &mut TablePool,
        mapper: &M,
        va: VirtualAddress,
    ) -> Result<Option<PhysicalAddress>, VmError> {
        self.check_target(va)?;

        let (d, t) = split_indices(va);
        // SAFETY: the directory belongs to this space.
        let dir = unsafe { get_directory(mapper, self.directory) };
        let Some(table_page) = dir.get(d).next_table() else {
            return Ok(None);
        };
        // SAFETY: table frames are distinct from the directory frame.
        let table = unsafe { get_table(mapper, table_page) };
        let Some((page, _)) = table.get(t).page_4k() else {
            return Ok(None);
        };

        table.set(t, PtEntry::zero());
        trace!("{:?}: unmap {va} (was {page:?})", self.directory);

        if !is_kernel_slot(d.as_usize()) && table.is_empty() {
            dir.set(d, PdEntry::zero());
            pool.give_back(table_page);
            trace!("{:?}: released table {table_page:?}", self.directory);
        }
        Ok(Some(page.base()))
    }

    /// Translate `va` to the physical address it maps to, if any.
    #[must_use]
    pub fn query<M: PhysMapper>(&self, mapper: &M, va: VirtualAddress) -> Option<PhysicalAddress> {
        let (d, t) = split_indices(va);
        let table_page = self.directory_entry(mapper, d).next_table()?;
        // SAFETY: table frames are pool slots referenced by this directory.
        let (page, _) = unsafe { get_table(mapper, table_page) }.get(t).page_4k()?;
        page.base().checked_add(va.page_offset())
    }

    /// Flags of the mapping at `va`, if any.
    #[must_use]
    pub fn flags<M: PhysMapper>(&self, mapper: &M, va: VirtualAddress) -> Option<PageEntryBits> {
        let (d, t) = split_indices(va);
        let table_page = self.directory_entry(mapper, d).next_table()?;
        // SAFETY: see `query`.
        let (_, flags) = unsafe { get_table(mapper, table_page) }.get(t).page_4k()?;
        Some(flags.flags_only())
    }

    /// Lowest page-aligned address in `[start, end)` that begins a run of
    /// `pages` unmapped pages.
    ///
    /// Empty directory slots are skipped as a whole.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn find_free_range<M: PhysMapper>(
        &self,
        mapper: &M,
        start: VirtualAddress,
        end: VirtualAddress,
        pages: u32,
    ) -> Option<VirtualAddress> {
        debug_assert!(start.is_page_aligned() && end.is_page_aligned());
        if pages == 0 {
            return None;
        }

        let page_size = u64::from(PAGE_SIZE);
        let end = u64::from(end.as_u32());
        let mut cur = u64::from(start.as_u32());
        let mut run_start = cur;
        let mut run_len = 0u32;

        while cur < end && run_len < pages {
            let (d, t) = split_indices(VirtualAddress::new(cur as u32));
            let slot_end = (u64::from(d.base().as_u32()) + u64::from(TABLE_COVERAGE)).min(end);

            let Some(table_page) = self.directory_entry(mapper, d).next_table() else {
                if run_len == 0 {
                    run_start = cur;
                }
                let free = ((slot_end - cur) / page_size) as u32;
                run_len = run_len.saturating_add(free);
                cur = slot_end;
                continue;
            };

            // SAFETY: see `query`.
            let table = unsafe { get_table(mapper, table_page) };
            let mut i = t.as_usize() as u16;
            while cur < slot_end && run_len < pages {
                if table.get(TableIndex::new(i)).is_present() {
                    run_len = 0;
                } else {
                    if run_len == 0 {
                        run_start = cur;
                    }
                    run_len += 1;
                }
                i += 1;
                cur += page_size;
            }
        }

        (run_len >= pages).then(|| VirtualAddress::new(run_start as u32))
    }

    /// Number of user-half page tables currently allocated.
    #[must_use]
    pub fn user_table_count<M: PhysMapper>(&self, mapper: &M) -> usize {
        (0..KERNEL_FIRST_SLOT)
            .filter(|&slot| self.directory_entry(mapper, slot_index(slot)).is_present())
            .count()
    }

    /// Tear the space down, returning its directory and every user-half
    /// table to `pool`. Kernel-half tables stay untouched.
    ///
    /// Frames mapped into the space are *not* freed; the caller owns them.
    ///
    /// # Errors
    /// [`VmError::KernelSpace`] for the kernel space, which is returned
    /// unchanged in that case.
    pub fn destroy<M: PhysMapper>(self, pool: &mut TablePool, mapper: &M) -> Result<(), (Self, VmError)> {
        if self.kernel {
            return Err((self, VmError::KernelSpace));
        }
        for slot in 0..KERNEL_FIRST_SLOT {
            if let Some(table) = self.directory_entry(mapper, slot_index(slot)).next_table() {
                pool.give_back(table);
            }
        }
        pool.give_back(self.directory);
        Ok(())
    }

    fn check_target(&self, va: VirtualAddress) -> Result<(), VmError> {
        if !va.is_page_aligned() {
            return Err(VmError::MisalignedVirtual(va));
        }
        if !self.kernel && is_kernel_half(va.as_u32()) {
            return Err(VmError::KernelHalf(va));
        }
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn slot_index(slot: usize) -> DirectoryIndex {
    DirectoryIndex::new(slot as u16)
}
