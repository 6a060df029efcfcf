//! # Conciliacion Core
//!
//! Daily cash reconciliation for a financial back office. For every company
//! and day the engine compares the internally calculated total (pagaduria
//! plus tesoreria) against the externally reported centralizadora ledger
//! total, and tracks the approval lifecycle of that comparison.
//!
//! ## Features
//!
//! - **Difference calculation**: cent-rounded differences classified as balanced, surplus or deficit
//! - **Approval lifecycle**: `pendiente → evaluado → confirmado → cerrado` driven by an explicit transition table
//! - **Guarded edits**: centralizadora totals and observations are frozen once a day is closed
//! - **Bulk transitions**: evaluate or close every company of a day, best-effort per record
//! - **Storage abstraction**: trait-based, versioned storage with optimistic concurrency
//!
//! ## Quick Start
//!
//! ```rust
//! use conciliacion_core::utils::{MemoryStorage, StaticDirectory, StaticTotals};
//! use conciliacion_core::{Estado, ReconciliationEngine};
//! use chrono::NaiveDate;
//!
//! # tokio_test_block(async {
//! let engine = ReconciliationEngine::new(
//!     MemoryStorage::new(),
//!     StaticTotals::new(),
//!     StaticDirectory::new(["acme"]),
//! );
//! let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
//!
//! let record = engine.evaluate("acme", date).await.unwrap();
//! assert_eq!(record.estado, Estado::Evaluado);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) {
//! #     tokio::runtime::Builder::new_current_thread()
//! #         .enable_all()
//! #         .build()
//! #         .unwrap()
//! #         .block_on(f);
//! # }
//! ```

pub mod config;
pub mod reconciliation;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use reconciliation::*;
pub use traits::*;
pub use types::*;
