//! Email actions module
//!
//! Optimistic local mutations (trash, mark read) confirmed against the
//! remote afterwards.

mod handler;

pub use handler::{ActionHandler, ReadOutcome, TrashOutcome};
