use kernel::{ErrorKind, KernelError, KernelState, SimulatedPlatform};
use kernel_info::config::{ConfigError, KernelConfig};
use kernel_info::memory::{KERNEL_BASE, KERNEL_HEAP_BASE, USER_BASE};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};
use kernel_vmem::{PageEntryBits, VmError};

fn boot() -> KernelState<SimulatedPlatform> {
    KernelState::boot(KernelConfig::default(), SimulatedPlatform::new()).unwrap()
}

#[test]
fn boot_maps_the_kernel_window() {
    let k = boot();
    let kernel = k.kernel_space();
    assert_eq!(k.active_space(), kernel);
    assert_eq!(
        k.translate(kernel, VirtualAddress::new(KERNEL_BASE + 0x1234))
            .unwrap(),
        Some(PhysicalAddress::new(0x1234))
    );
    assert_eq!(
        k.translate(kernel, VirtualAddress::new(USER_BASE)).unwrap(),
        None
    );
    let config = k.config();
    assert_eq!(
        k.frames().used_count(),
        config.reserved_frames + u32::try_from(config.table_pool_capacity).unwrap()
    );
    assert!(k.platform().active_directory().is_some());
}

#[test]
fn vmalloc_two_pages_takes_two_frames() {
    let mut k = boot();
    let before = k.frames().free_count();

    let va = k.vmalloc(8192).unwrap();
    assert_eq!(va, VirtualAddress::new(USER_BASE));
    assert_eq!(before - k.frames().free_count(), 2);

    let space = k.active_space();
    let first = k.translate(space, va).unwrap().unwrap();
    let second = k
        .translate(space, VirtualAddress::new(USER_BASE + PAGE_SIZE))
        .unwrap()
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(
        k.translate(space, VirtualAddress::new(USER_BASE + 2 * PAGE_SIZE))
            .unwrap(),
        None
    );

    assert!(k.vfree(va));
    assert_eq!(k.frames().free_count(), before);
    assert_eq!(k.translate(space, va).unwrap(), None);
    assert!(!k.vfree(va));
}

#[test]
fn vmalloc_rounds_up_to_whole_pages() {
    let mut k = boot();
    let before = k.frames().free_count();
    let a = k.vmalloc(1).unwrap();
    let b = k.vmalloc(PAGE_SIZE + 1).unwrap();
    assert_eq!(b.as_u32(), a.as_u32() + PAGE_SIZE);
    assert_eq!(before - k.frames().free_count(), 3);
}

#[test]
fn vmalloc_reuses_the_lowest_hole() {
    let mut k = boot();
    let a = k.vmalloc(PAGE_SIZE).unwrap();
    let b = k.vmalloc(PAGE_SIZE).unwrap();
    assert!(k.vfree(a));
    assert_eq!(k.vmalloc(PAGE_SIZE).unwrap(), a);
    assert_eq!(
        k.vmalloc(PAGE_SIZE).unwrap().as_u32(),
        b.as_u32() + PAGE_SIZE
    );
}

#[test]
fn vmalloc_of_zero_bytes_is_rejected() {
    let mut k = boot();
    let err = k.vmalloc(0).unwrap_err();
    assert_eq!(err, KernelError::Memory(VmError::ZeroSize));
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn frame_exhaustion_rolls_back() {
    // Nothing beyond the kernel window: 768 frames are free after boot.
    let config = KernelConfig {
        frame_count: 2048,
        ..KernelConfig::default()
    };
    let mut k = KernelState::boot(config, SimulatedPlatform::new()).unwrap();
    let free = k.frames().free_count();
    assert_eq!(free, 768);

    let err = k.vmalloc((free + 1) * PAGE_SIZE).unwrap_err();
    assert_eq!(err, KernelError::Memory(VmError::OutOfFrames));
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    assert_eq!(k.frames().free_count(), free);

    let va = k.vmalloc(free * PAGE_SIZE).unwrap();
    assert_eq!(k.frames().free_count(), 0);
    assert!(k.vfree(va));
    assert_eq!(k.frames().free_count(), free);
}

#[test]
fn kmalloc_returns_distinct_aligned_blocks() {
    let mut k = boot();
    let a = k.kmalloc(24).unwrap();
    let b = k.kmalloc(24).unwrap();
    let c = k.kmalloc_aligned(100, 64).unwrap();
    assert!(a.as_u32() >= KERNEL_HEAP_BASE);
    assert_ne!(a, b);
    assert_eq!(a.as_u32() % 8, 0);
    assert_eq!(c.as_u32() % 64, 0);
    assert!(b.as_u32() >= a.as_u32() + 24);

    let kernel = k.kernel_space();
    assert!(k.translate(kernel, a).unwrap().is_some());
}

#[test]
fn freed_heap_memory_is_reused() {
    let mut k = boot();
    let a = k.kmalloc(256).unwrap();
    let mapped = k.heap().mapped_bytes();
    assert!(k.kfree(a));
    assert_eq!(k.kmalloc(256).unwrap(), a);
    assert_eq!(k.heap().mapped_bytes(), mapped);
}

#[test]
fn double_kfree_is_ignored() {
    let mut k = boot();
    let a = k.kmalloc(64).unwrap();
    assert!(k.kfree(a));
    assert!(!k.kfree(a));
    assert!(!k.kfree(VirtualAddress::new(0xDEAD_0000)));
    assert_eq!(k.heap().live_blocks(), 0);
}

#[test]
fn kernel_mappings_are_visible_in_every_space() {
    let mut k = boot();
    let user = k.create_address_space().unwrap();
    let va = k.kmalloc(64 * 1024).unwrap();

    let kernel = k.kernel_space();
    let expected = k.translate(kernel, va).unwrap();
    assert!(expected.is_some());
    assert_eq!(k.translate(user, va).unwrap(), expected);
    assert!(k.kernel_half_consistent());
}

#[test]
fn user_spaces_are_isolated() {
    let mut k = boot();
    let a = k.create_address_space().unwrap();
    let b = k.create_address_space().unwrap();
    let va_a = k.vmalloc_in(a, PAGE_SIZE).unwrap();
    let va_b = k.vmalloc_in(b, PAGE_SIZE).unwrap();

    // Same first-fit address, different frames.
    assert_eq!(va_a, va_b);
    assert_ne!(
        k.translate(a, va_a).unwrap(),
        k.translate(b, va_b).unwrap()
    );
    assert_eq!(k.translate(k.kernel_space(), va_a).unwrap(), None);

    assert!(k.vfree_in(a, va_a).unwrap());
    assert!(!k.vfree_in(a, va_a).unwrap());
}

#[test]
fn user_spaces_cannot_touch_the_kernel_half() {
    let mut k = boot();
    let user = k.create_address_space().unwrap();
    let va = VirtualAddress::new(KERNEL_BASE + 0x40_0000);
    let err = k
        .map_page(user, va, PhysicalAddress::new(0x5000), PageEntryBits::kernel_rw())
        .unwrap_err();
    assert_eq!(err, KernelError::Memory(VmError::KernelHalf(va)));
}

#[test]
fn misaligned_mappings_are_rejected() {
    let mut k = boot();
    let user = k.create_address_space().unwrap();
    let va = VirtualAddress::new(USER_BASE + 1);
    assert_eq!(
        k.map_page(user, va, PhysicalAddress::new(0x5000), PageEntryBits::user_rw())
            .unwrap_err(),
        KernelError::Memory(VmError::MisalignedVirtual(va))
    );
    let pa = PhysicalAddress::new(0x5001);
    assert_eq!(
        k.map_page(user, VirtualAddress::new(USER_BASE), pa, PageEntryBits::user_rw())
            .unwrap_err(),
        KernelError::Memory(VmError::MisalignedPhysical(pa))
    );
}

#[test]
fn remapping_the_active_space_flushes_the_tlb() {
    let mut k = boot();
    let user = k.create_address_space().unwrap();
    let va = VirtualAddress::new(USER_BASE);
    k.map_page(user, va, PhysicalAddress::new(0x5000), PageEntryBits::user_rw())
        .unwrap();
    k.platform().clear_records();

    // Inactive space: no flush needed.
    assert_eq!(
        k.unmap_page(user, va).unwrap(),
        Some(PhysicalAddress::new(0x5000))
    );
    assert!(k.platform().invalidations().is_empty());

    assert!(k.switch_address_space(user).unwrap());
    assert!(!k.switch_address_space(user).unwrap());
    k.map_page(user, va, PhysicalAddress::new(0x6000), PageEntryBits::user_rw())
        .unwrap();
    assert_eq!(
        k.map_page(user, va, PhysicalAddress::new(0x7000), PageEntryBits::user_rw())
            .unwrap(),
        Some(PhysicalAddress::new(0x6000))
    );
    assert_eq!(k.platform().invalidations(), vec![va, va]);
}

#[test]
fn address_spaces_in_use_cannot_be_destroyed() {
    let mut k = boot();
    let kernel = k.kernel_space();
    assert_eq!(
        k.destroy_address_space(kernel).unwrap_err(),
        KernelError::Memory(VmError::KernelSpace)
    );

    let p = k.create_process("p", 0).unwrap();
    let owned = k.process(p).unwrap().space;
    assert_eq!(
        k.destroy_address_space(owned).unwrap_err(),
        KernelError::SpaceInUse
    );

    let spare = k.create_address_space().unwrap();
    k.vmalloc_in(spare, 4 * PAGE_SIZE).unwrap();
    let free = k.frames().free_count();
    let tables = k.vmm().table_pool().available();
    k.destroy_address_space(spare).unwrap();
    assert_eq!(k.frames().free_count(), free + 4);
    assert!(k.vmm().table_pool().available() > tables);
    assert_eq!(
        k.switch_address_space(spare).unwrap_err(),
        KernelError::Memory(VmError::UnknownSpace)
    );
}

#[test]
fn inconsistent_configurations_do_not_boot() {
    let no_frames = KernelConfig {
        frame_count: 0,
        ..KernelConfig::default()
    };
    let err = KernelState::boot(no_frames, SimulatedPlatform::new())
        .err()
        .unwrap();
    assert_eq!(err, KernelError::Config(ConfigError::NoFrames));

    let pool_past_window = KernelConfig {
        kernel_image_frames: 1024,
        ..KernelConfig::default()
    };
    assert!(matches!(
        KernelState::boot(pool_past_window, SimulatedPlatform::new()),
        Err(KernelError::Config(ConfigError::TablePoolOutsideWindow { .. }))
    ));
}

#[test]
fn table_pool_exhaustion_is_reported() {
    let config = KernelConfig {
        table_pool_capacity: KernelConfig::boot_table_slots() + 2,
        ..KernelConfig::default()
    };
    let mut k = KernelState::boot(config, SimulatedPlatform::new()).unwrap();
    let user = k.create_address_space().unwrap();
    // One slot left: the first user page table.
    k.vmalloc_in(user, PAGE_SIZE).unwrap();
    let err = k.create_address_space().unwrap_err();
    assert_eq!(err, KernelError::Memory(VmError::TablePoolExhausted));
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
}

#[test]
fn unmapped_pages_of_a_region_are_not_handed_out_again() {
    let mut k = boot();
    let space = k.active_space();
    let a = k.vmalloc(2 * PAGE_SIZE).unwrap();
    let tail = VirtualAddress::new(a.as_u32() + PAGE_SIZE);
    assert!(k.unmap_page(space, tail).unwrap().is_some());

    let b = k.vmalloc(PAGE_SIZE).unwrap();
    assert_eq!(b.as_u32(), a.as_u32() + 2 * PAGE_SIZE);

    assert!(k.vfree(a));
    assert!(k.translate(space, b).unwrap().is_some());
    assert_eq!(k.vmalloc(2 * PAGE_SIZE).unwrap(), a);
}

#[test]
fn oversized_vmalloc_fails_before_taking_frames() {
    let mut k = boot();
    let before = k.frames().free_count();
    let err = k.vmalloc((before + 1) * PAGE_SIZE).unwrap_err();
    assert_eq!(err, KernelError::Memory(VmError::OutOfFrames));
    assert_eq!(k.frames().free_count(), before);
    assert_eq!(k.vmalloc(PAGE_SIZE).unwrap(), VirtualAddress::new(USER_BASE));
}
