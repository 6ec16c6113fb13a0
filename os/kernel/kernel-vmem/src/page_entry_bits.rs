use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// A single 32-bit IA-32 paging entry in its raw bitfield form.
///
/// Models the **common superset** of the fields found in page-directory
/// entries (PDE) and page-table entries (PTE) under 32-bit paging without
/// PAE. Mapping calls take their flags as a `PageEntryBits` value; the
/// frame field is filled in by the table code.
///
/// ### Bit layout
///
/// | Bits      | Name / Mnemonic   | Meaning |
/// |-----------|-------------------|----------|
/// | 0         | `P` (present)     | Valid entry if set |
/// | 1         | `RW`              | Writable if set |
/// | 2         | `US`              | User-mode accessible if set |
/// | 3         | `PWT`             | Write-through caching |
/// | 4         | `PCD`             | Disable caching |
/// | 5         | `A`               | Accessed |
/// | 6         | `D`               | Dirty (PTE only) |
/// | 7         | `PS` / `PAT`      | 4 MiB page in a PDE, PAT in a PTE |
/// | 8         | `G`               | Global (PTE only) |
/// | 9–11      | OS avail          | Reserved for OS use |
/// | 12–31     | `frame`           | Physical frame bits [31:12] |
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::PhysicalAddress;
/// # use kernel_vmem::PageEntryBits;
/// let mut e = PageEntryBits::new();
/// e.set_present(true);
/// e.set_writable(true);
/// e.set_physical_address(PhysicalAddress::new(0x12345));
/// assert!(e.present());
/// assert_eq!(e.physical_address().as_u32(), 0x12000);
/// ```
#[bitfield(u32)]
#[derive(Eq, PartialEq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    ///
    /// Set to allow writes; clear for read-only. Supervisor writes also
    /// honor this bit once CR0.WP is set.
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    ///
    /// Set to allow ring-3 access; clear restricts to the supervisor.
    /// Both the PDE and the PTE must allow user access.
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU on first access.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on first write through a PTE.
    pub dirty: bool,

    /// Page Size (PS, bit 7) in a PDE; PAT in a PTE.
    ///
    /// This kernel maps 4 KiB pages only, so the bit stays clear.
    pub large_page: bool,

    /// Global (G, bit 8). Effective only with CR4.PGE.
    pub global_translation: bool,

    /// OS-available (bits 9..=11). Ignored by hardware.
    #[bits(3)]
    pub os_available: u8,

    /// Physical frame bits [31:12].
    #[bits(20)]
    frame_bits_31_12: u32,
}

impl PageEntryBits {
    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        self.set_frame_bits_31_12(phys.as_u32() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame_bits_31_12() << 12)
    }

    /// The same entry with the frame field cleared, i.e. flags only.
    #[inline]
    #[must_use]
    pub const fn flags_only(self) -> Self {
        self.with_frame_bits_31_12(0)
    }

    /// Present, writable, supervisor only.
    #[inline]
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new().with_present(true).with_writable(true)
    }

    /// Present, writable, user accessible.
    #[inline]
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
    }

    /// Present, read-only, user accessible.
    #[inline]
    #[must_use]
    pub const fn user_ro() -> Self {
        Self::new().with_present(true).with_user_access(true)
    }
}
