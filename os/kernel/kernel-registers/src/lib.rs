//! # Typed IA-32 Registers
//!
//! Bitfield models of the control registers the execution core touches
//! (`CR3`, `EFLAGS`) and thin wrappers around the privileged instructions
//! that go with them (`invlpg`, `cli`/`sti`, `hlt`).
//!
//! The inline assembly is only compiled for `target_arch = "x86"`; the
//! bitfield types are available everywhere so hosted tests can build and
//! inspect register images.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr3")]
pub mod cr3;

#[cfg(feature = "eflags")]
pub mod eflags;

#[cfg(all(feature = "instr", target_arch = "x86"))]
pub mod instr;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}

pub trait LoadRegister {
    /// # Safety
    /// It is generally safe to load this register even from user mode.
    fn load() -> Self;
}

impl<T> LoadRegisterUnsafe for T
where
    T: LoadRegister,
{
    #[inline]
    unsafe fn load_unsafe() -> Self {
        <Self as LoadRegister>::load()
    }
}
