//! Modulkassa cash-register integration: drives billing receipts through
//! fiscalization against the Modulkassa service and reconciles the results
//! back into billing storage.

pub mod config;
pub mod models;
pub mod services;
