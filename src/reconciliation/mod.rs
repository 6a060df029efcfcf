//! Daily reconciliation: difference calculation, lifecycle, edits and bulk
//! transitions

pub mod bulk;
pub mod centralizadora;
pub mod diff;
pub mod engine;
pub mod locks;
pub mod state;

pub use bulk::*;
pub use centralizadora::*;
pub use diff::*;
pub use engine::*;
pub use locks::*;
pub use state::*;
