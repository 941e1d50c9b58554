pub mod classifier;
pub mod database;
pub mod document;
pub mod modulkassa;
pub mod reconcile;
