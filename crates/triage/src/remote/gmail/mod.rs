//! Gmail API integration
//!
//! This module provides:
//! - OAuth2 authentication flow
//! - A [`MailProvider`](super::MailProvider) over the Gmail REST API
//! - Response normalization to engine types

mod auth;
mod client;
mod normalize;

pub use auth::GmailAuth;
pub use client::GmailClient;
pub use normalize::{extract_body, normalize_metadata};

/// Headers requested with `format=metadata`
pub const METADATA_HEADERS: &[&str] = &[
    "From",
    "To",
    "Cc",
    "Subject",
    "List-Unsubscribe",
    "Precedence",
    "Expires",
    "Expiry-Date",
];

/// Gmail API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Response from listing messages
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: Option<String>,
    }

    /// Message from the Gmail API (metadata or full format)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        pub thread_id: Option<String>,
        pub label_ids: Option<Vec<String>>,
        #[serde(default)]
        pub snippet: String,
        pub history_id: Option<String>,
        pub internal_date: Option<String>,
        pub payload: Option<MessagePayload>,
    }

    /// Message payload containing headers and body
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePayload {
        pub headers: Option<Vec<Header>>,
        pub body: Option<PartBody>,
        pub parts: Option<Vec<MessagePart>>,
        pub mime_type: Option<String>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Part body (base64url encoded)
    #[derive(Debug, Deserialize)]
    pub struct PartBody {
        pub size: Option<u32>,
        pub data: Option<String>,
    }

    /// Message part (for multipart messages)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePart {
        pub mime_type: Option<String>,
        pub filename: Option<String>,
        pub body: Option<PartBody>,
        pub parts: Option<Vec<MessagePart>>,
    }

    /// `users.getProfile` response
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Profile {
        pub email_address: Option<String>,
        pub history_id: String,
    }

    /// `users.history.list` response
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryResponse {
        pub history: Option<Vec<HistoryRecord>>,
        pub next_page_token: Option<String>,
        pub history_id: Option<String>,
    }

    /// One history record; only the fields the engine uses
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryRecord {
        pub id: String,
        #[serde(default)]
        pub messages_added: Vec<HistoryMessage>,
        #[serde(default)]
        pub messages_deleted: Vec<HistoryMessage>,
        #[serde(default)]
        pub labels_added: Vec<HistoryMessage>,
        #[serde(default)]
        pub labels_removed: Vec<HistoryMessage>,
    }

    #[derive(Debug, Deserialize)]
    pub struct HistoryMessage {
        pub message: MessageRef,
    }

    /// `messages.modify` request body
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ModifyRequest<'a> {
        pub add_label_ids: &'a [&'a str],
        pub remove_label_ids: &'a [&'a str],
    }
}
