//! Command implementations

pub mod harvest;

pub use harvest::{run as harvest_run, HarvestOptions};
