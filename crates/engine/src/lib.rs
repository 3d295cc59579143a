//! `cashplan-engine` — Purchase-order cash-flow planning engine.
//!
//! Pure engine crate: receives pre-loaded snapshot values, returns dated
//! cash events and reconciled journal rows. No CLI or IO dependencies.

pub mod anchors;
pub mod error;
pub mod expand;
pub mod journal;
pub mod model;
pub mod monthly;
pub mod payments;
pub mod reconcile;
pub mod settings;
pub mod snapshot;

pub use error::PlanError;
pub use journal::{build_journal, Journal, JournalQuery, Scope};
pub use model::{CashEvent, Cents, JournalRow, OrderRecord, Payment};
pub use settings::Settings;
pub use snapshot::Snapshot;
