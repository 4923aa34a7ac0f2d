//! Domain models for the triage engine

mod channel;
mod index_entry;
mod message;
mod summary;
mod sync_state;

pub use channel::{Channel, UNLISTED_CHANNEL_ORDER, sort_channels};
pub use index_entry::IndexEntry;
pub use message::{
    BodyKind, EmailAddress, Importance, Message, MessageBody, MessageBuilder, MessageId,
};
pub use summary::Summary;
pub use sync_state::{CursorAdvance, HistoryToken, SyncState, advance_cursor, advance_history};
