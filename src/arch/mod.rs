//! # Architecture Abstraction Layer
//!
//! Provides a hardware abstraction boundary for the scheduler.
//! Currently implements the Cortex-M4 port; extensible to other
//! architectures by adding sibling modules.
//!
//! Gated `#[cfg(not(test))]`: the inline assembly and `cortex_m`
//! register access below target Cortex-M's instruction set specifically
//! and cannot be validated against a host test target. Host builds use
//! [`crate::test_support::FAKE_OPS`] instead of [`cortex_m4::DEFAULT_OPS`].

#[cfg(not(test))]
pub mod cortex_m4;
