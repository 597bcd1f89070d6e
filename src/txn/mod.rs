//! Transaction Module
//!
//! Per-key write isolation across concurrently open transactions.
//!
//! ## Responsibilities
//! - Give each transaction a private overlay store and scratch directory
//! - Fail fast when two open transactions write the same key
//! - Replay an overlay into the base store on commit
//! - Release locks and scratch space deterministically on close
//!
//! ```text
//!   Transaction "a" ──┐                 ┌──► overlay a  (transactions/a/)
//!   Transaction "b" ──┼──► Coordinator ─┤
//!                     │   key → tag     └──► overlay b  (transactions/b/)
//!                     └──────────► base Engine (shared, Mutex)
//! ```
//!
//! There is no waiting anywhere: a write to a key held by another tag
//! returns Conflict immediately, so deadlock is impossible.

mod coordinator;
mod store;
mod transaction;

pub use coordinator::Coordinator;
pub use store::TransactionalStore;
pub use transaction::Transaction;
