//! Index bookkeeping and repair.
//!
//! Indexes are materialized lazily. Mutations only queue document ids in
//! per-index pending sets ([`pending`]); the [`repair`] engine later
//! drains those queues and rewrites the sorted entry view ([`sorted`])
//! that lookups read.

pub mod pending;
pub mod repair;
pub mod sorted;

pub use pending::PendingTracker;
pub use repair::{RepairEngine, RepairFailure, RepairReport};
pub use sorted::SortedView;
