//! # Kernel Configuration and Memory Layout
//!
//! This crate is the single source of truth for the values every part of the
//! execution core must agree on: where the kernel half of the address space
//! begins, where user allocations start, how big kernel stacks are, and how
//! many processes and threads may exist.
//!
//! ## Modules
//!
//! ### Memory Layout ([`memory`])
//! Compile-time constants describing the 32-bit virtual address space:
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  Low memory / identity region   │
//! USER_BASE   ├─────────────────────────────────┤ 0x4000_0000
//!             │  User region (vmalloc)          │
//! KERNEL_BASE ├─────────────────────────────────┤ 0xC000_0000
//!             │  Kernel window (phys 0 → 8 MiB) │
//! KERNEL_HEAP_BASE ├────────────────────────────┤ 0xD000_0000
//!             │  Kernel heap (kmalloc)          │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! Everything at or above [`KERNEL_BASE`](memory::KERNEL_BASE) is the
//! **kernel half**: its page tables are created once at boot and shared by
//! every address space.
//!
//! ### Boot Configuration ([`config`])
//! [`KernelConfig`](config::KernelConfig) carries the values only known at
//! boot time (amount of physical memory, reserved frames, size of the page
//! table pool) and validates them against the layout.
//!
//! The layout is checked with `const` assertions so an inconsistent edit
//! fails the build rather than the boot.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod config;
pub mod memory;
