//! Query API for UI consumption
//!
//! Read-side functions returning display-ready data. Bodies are fetched
//! lazily through [`BodyCache`].

mod body;
mod messages;

pub use body::{BodyCache, BodySource};
pub use messages::{MessageSummary, list_channels, list_messages, summaries};
