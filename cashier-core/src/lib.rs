//! Shared primitives for cash-register integration binaries: the pass-level
//! error taxonomy, the per-register pass lock and tracing setup.

pub mod error;
pub mod lock;
pub mod observability;
