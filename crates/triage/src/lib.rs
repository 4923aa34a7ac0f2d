//! Triage crate - sync, classification and search engine for a mail client
//!
//! This crate provides:
//! - Domain models (Message, Channel, SyncState)
//! - A remote provider boundary with a Gmail implementation
//! - Durable storage over SQLite
//! - Idempotent incremental and historical sync
//! - Rule-based channel classification with deadline extraction
//! - Hybrid semantic and lexical search
//! - Cached AI summaries
//! - The [`MailService`] facade hosts call into
//!
//! All operations are synchronous and safe to call from any thread; syncs
//! and indexing run on background threads.

pub mod actions;
pub mod ai;
pub mod classify;
pub mod config;
pub mod error;
pub mod models;
pub mod query;
pub mod remote;
pub mod search;
pub mod service;
pub mod storage;
pub mod summarize;
pub mod sync;

pub use actions::{ReadOutcome, TrashOutcome};
pub use ai::{
    EmbeddingProvider, HashingEmbedder, OllamaClient, OllamaEmbedder, OllamaGenerator,
    TextGenerator,
};
pub use classify::{
    ChannelRule, ChannelRules, Classification, Classifier, ModelClassifier, RuleClassifier,
};
pub use config::{EngineConfig, GmailCredentials, OllamaConfig};
pub use error::{EngineError, EngineResult};
pub use models::{
    Channel, EmailAddress, HistoryToken, Importance, Message, MessageBody, MessageId, Summary,
    SyncState,
};
pub use query::MessageSummary;
pub use remote::gmail::{GmailAuth, GmailClient};
pub use remote::{InMemoryProvider, MailProvider, RemoteError, RemoteMessage, RetryPolicy};
pub use search::LexicalIndex;
pub use service::{MailService, MailServiceBuilder, Readiness, SearchOutcome};
pub use storage::{InMemoryMailStore, MailStore, SqliteMailStore};
pub use sync::{ItemOutcome, SyncReport, SyncScheduler, cooldown_elapsed};
