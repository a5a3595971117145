//! Core engine: the scan → decide → execute → reconcile loop.

pub mod evaluator;
pub mod executor;
pub mod reconciler;
pub mod scheduler;
pub mod supervisor;
