//! # Kernel error kinds
//!
//! A flat error enum shared by every fallible kernel entry point. No
//! external error-handling crate is pulled in: `thiserror`/`anyhow`
//! only show up in host-side tool crates across the reference corpus,
//! never inside a `no_std` kernel; a hand-written `Display` is the
//! convention here instead.

use core::fmt;

/// The five error kinds named by the kernel's error-handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// A null required pointer, zero size, unknown id, or out-of-range
    /// weight/configuration value.
    InvalidArgument,
    /// The task table is full, the heap is exhausted, or a non-blocking
    /// call found no room (e.g. `push_from_isr` on a full queue).
    ResourceExhausted,
    /// E.g. unlocking a mutex the caller does not own.
    NotPermitted,
    /// A blocking call with a finite timeout expired before its condition
    /// was satisfied.
    Timeout,
    /// A stack canary or allocator integrity check failed. Unrecoverable;
    /// callers that observe this should expect `panic()` to have already
    /// been invoked rather than attempt recovery.
    Corruption,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::InvalidArgument => "invalid argument",
            KernelError::ResourceExhausted => "resource exhausted",
            KernelError::NotPermitted => "operation not permitted",
            KernelError::Timeout => "timed out",
            KernelError::Corruption => "memory corruption detected",
        };
        f.write_str(msg)
    }
}

/// Convenience alias used throughout the kernel's public API.
pub type KernelResult<T> = Result<T, KernelError>;
