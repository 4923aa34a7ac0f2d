//! Search over cached messages
//!
//! [`SearchIndex`] combines embeddings with a Tantivy index and is fed by the
//! background [`Indexer`].

mod index;
mod indexer;
mod lexical;
mod schema;

pub use index::{IndexOutcome, SearchIndex, SearchResults, SearchSettings, index_text};
pub use indexer::{IndexJob, Indexer};
pub use lexical::{LexicalDoc, LexicalHit, LexicalIndex};
