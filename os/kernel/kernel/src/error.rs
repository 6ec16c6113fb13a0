//! Kernel-level error aggregation.

use kernel_alloc::frame_alloc::FrameAllocError;
use kernel_alloc::heap::HeapError;
use kernel_info::config::ConfigError;
use kernel_task::TaskError;
use kernel_vmem::VmError;

/// The two kinds of failure a kernel operation can report.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// Out of frames, table slots, heap or virtual space, or a table is full.
    ResourceExhausted,
    /// Misaligned address, zero size, unknown or stale id, forbidden target.
    InvalidArgument,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum KernelError {
    #[error("invalid boot configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Frames(#[from] FrameAllocError),
    #[error(transparent)]
    Memory(#[from] VmError),
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("the address space is owned by a process")]
    SpaceInUse,
}

impl KernelError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        let exhausted = match self {
            Self::Frames(FrameAllocError::Exhausted) => true,
            Self::Memory(e) => e.is_exhaustion(),
            Self::Heap(e) => e.is_exhaustion(),
            Self::Task(e) => e.is_exhaustion(),
            Self::Config(_) | Self::SpaceInUse => false,
        };
        if exhausted {
            ErrorKind::ResourceExhausted
        } else {
            ErrorKind::InvalidArgument
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(
            KernelError::from(VmError::TablePoolExhausted).kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(
            KernelError::from(HeapError::Vm(VmError::OutOfFrames)).kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(
            KernelError::from(VmError::ZeroSize).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            KernelError::from(TaskError::UnknownThread).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            KernelError::from(TaskError::TooManyProcesses).kind(),
            ErrorKind::ResourceExhausted
        );
    }
}
