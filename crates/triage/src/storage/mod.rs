//! Storage layer for the local mail cache

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryMailStore;
pub use sqlite::SqliteMailStore;
pub use traits::{MailStore, StoreBatch};
