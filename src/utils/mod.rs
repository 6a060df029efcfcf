//! Utility modules

pub mod memory_storage;
pub mod static_sources;
pub mod validation;

pub use memory_storage::*;
pub use static_sources::*;
pub use validation::*;
