//! Mailbox synchronization
//!
//! [`SyncCoordinator`] runs incremental and historical passes;
//! [`SyncScheduler`] repeats incremental passes in the background.

mod coordinator;
mod merge;
mod report;
mod scheduler;
mod timing;

pub use coordinator::{SyncCoordinator, SyncSettings};
pub use merge::{Merge, MergeMode, merge, to_message};
pub use report::{ItemOutcome, SyncReport};
pub use scheduler::{ScheduleSettings, SyncScheduler};
pub use timing::{cooldown_elapsed, next_sync_delay};
