use kernel_info::config::KernelConfig;
use kernel_info::memory;
use std::{env, path::PathBuf};

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("set by cargo"));
    let ld = manifest_dir.join("kernel.ld");

    // Sanity checks (fail fast during build)
    let kernel_base = memory::KERNEL_BASE;
    assert_eq!(
        kernel_base & ((1u32 << 22) - 1),
        0,
        "KERNEL_BASE must be 4 MiB aligned for the boot directory (got {kernel_base:#x})"
    );
    let defaults = KernelConfig::default();
    assert!(
        defaults.validate().is_ok(),
        "default boot configuration is inconsistent: {defaults:?}"
    );

    println!("cargo:rerun-if-changed={}", ld.display());

    // Only the bootable image uses the linker script; tests link for the host.
    println!("cargo:rustc-link-arg-bins=-T{}", ld.display());
    println!("cargo:rustc-link-arg-bins=--defsym=KERNEL_BASE={kernel_base:#x}");
}
