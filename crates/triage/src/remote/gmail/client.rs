//! Gmail API HTTP client
//!
//! Implements [`MailProvider`] over the Gmail REST API. Uses synchronous
//! HTTP (ureq) to be executor-agnostic. Every call is retried with backoff
//! on transient failures.

use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::api::{GmailMessage, HistoryResponse, ListMessagesResponse, ModifyRequest, Profile};
use super::{GmailAuth, METADATA_HEADERS, extract_body, normalize_metadata};
use crate::models::{MessageBody, MessageId};
use crate::remote::{
    ChangeSet, LABEL_UNREAD, MailProvider, Page, RemoteError, RemoteMessage, RetryPolicy,
    with_retry,
};

/// Gmail API client
pub struct GmailClient {
    auth: GmailAuth,
    retry: RetryPolicy,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1/users/me";

    /// Largest page Gmail serves
    const MAX_PAGE_SIZE: usize = 500;

    pub fn new(auth: GmailAuth, retry: RetryPolicy) -> Self {
        Self { auth, retry }
    }

    /// Check if the client is authenticated
    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    /// Trigger the authentication flow if needed
    pub fn authenticate(&self) -> anyhow::Result<()> {
        self.auth.get_access_token()?;
        Ok(())
    }

    fn bearer(&self) -> Result<String, RemoteError> {
        self.auth
            .get_access_token()
            .map(|token| format!("Bearer {}", token))
            .map_err(|e| RemoteError::Unauthorized {
                message: format!("{:#}", e),
            })
    }

    fn get_json<T: DeserializeOwned>(&self, what: &str, url: &str) -> Result<T, RemoteError> {
        with_retry(&self.retry, what, || {
            let mut response = ureq::get(url)
                .header("Authorization", &self.bearer()?)
                .call()?;
            Ok(response.body_mut().read_json::<T>()?)
        })
    }

    fn post_json<B: Serialize>(&self, what: &str, url: &str, body: &B) -> Result<(), RemoteError> {
        with_retry(&self.retry, what, || {
            ureq::post(url)
                .header("Authorization", &self.bearer()?)
                .send_json(body)?;
            Ok(())
        })
    }

    fn post_empty(&self, what: &str, url: &str) -> Result<(), RemoteError> {
        with_retry(&self.retry, what, || {
            ureq::post(url)
                .header("Authorization", &self.bearer()?)
                .send_empty()?;
            Ok(())
        })
    }

    /// One page of history since `start_history_id`
    fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryResponse, RemoteError> {
        let mut url = format!(
            "{}/history?startHistoryId={}&historyTypes=messageAdded&historyTypes=messageDeleted\
             &historyTypes=labelAdded&historyTypes=labelRemoved&maxResults={}",
            Self::BASE_URL,
            urlencoding::encode(start_history_id),
            Self::MAX_PAGE_SIZE
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        self.get_json("list history", &url).map_err(|e| match e {
            // History ID expired or invalid
            RemoteError::Rejected { status: 404, .. } => RemoteError::CursorExpired,
            other => other,
        })
    }
}

fn not_found(id: &MessageId) -> impl Fn(RemoteError) -> RemoteError + '_ {
    move |e| match e {
        RemoteError::Rejected { status: 404, .. } => RemoteError::NotFound { id: id.to_string() },
        other => other,
    }
}

impl MailProvider for GmailClient {
    fn current_cursor(&self) -> Result<String, RemoteError> {
        let url = format!("{}/profile", Self::BASE_URL);
        let profile: Profile = self.get_json("get profile", &url)?;
        Ok(profile.history_id)
    }

    fn list_changes(&self, cursor: &str) -> Result<ChangeSet, RemoteError> {
        let mut changes = ChangeSet {
            cursor: cursor.to_string(),
            ..ChangeSet::default()
        };
        let mut page_token: Option<String> = None;

        loop {
            let response = self.list_history(cursor, page_token.as_deref())?;

            for record in response.history.unwrap_or_default() {
                for entry in record.messages_deleted {
                    let id = MessageId::new(entry.message.id);
                    if !changes.deleted.contains(&id) {
                        changes.deleted.push(id);
                    }
                }

                let touched = record
                    .messages_added
                    .into_iter()
                    .chain(record.labels_added)
                    .chain(record.labels_removed);
                for entry in touched {
                    let id = MessageId::new(entry.message.id);
                    if !changes.changed.contains(&id) {
                        changes.changed.push(id);
                    }
                }
            }

            if let Some(history_id) = response.history_id {
                changes.cursor = history_id;
            }

            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        // Gmail IDs are never reused, so a deletion is final
        changes.changed.retain(|id| !changes.deleted.contains(id));

        debug!(
            "History since {}: {} changed, {} deleted",
            cursor,
            changes.changed.len(),
            changes.deleted.len()
        );
        Ok(changes)
    }

    fn list_page(&self, token: Option<&str>, page_size: usize) -> Result<Page, RemoteError> {
        let mut url = format!(
            "{}/messages?maxResults={}",
            Self::BASE_URL,
            page_size.clamp(1, Self::MAX_PAGE_SIZE)
        );
        if let Some(token) = token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let list: ListMessagesResponse = self.get_json("list messages", &url)?;
        Ok(Page {
            ids: list
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|m| MessageId::new(m.id))
                .collect(),
            next_token: list.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    fn fetch_metadata(&self, id: &MessageId) -> Result<RemoteMessage, RemoteError> {
        let headers: String = METADATA_HEADERS
            .iter()
            .map(|h| format!("&metadataHeaders={}", h))
            .collect();
        let url = format!(
            "{}/messages/{}?format=metadata{}",
            Self::BASE_URL,
            urlencoding::encode(id.as_str()),
            headers
        );

        let message: GmailMessage = self
            .get_json("get message metadata", &url)
            .map_err(not_found(id))?;
        normalize_metadata(message).map_err(|e| RemoteError::Rejected {
            status: 200,
            message: format!("{:#}", e),
        })
    }

    fn fetch_body(&self, id: &MessageId) -> Result<MessageBody, RemoteError> {
        let url = format!(
            "{}/messages/{}?format=full",
            Self::BASE_URL,
            urlencoding::encode(id.as_str())
        );
        let message: GmailMessage = self
            .get_json("get message body", &url)
            .map_err(not_found(id))?;
        Ok(extract_body(&message))
    }

    fn trash(&self, id: &MessageId) -> Result<(), RemoteError> {
        let url = format!(
            "{}/messages/{}/trash",
            Self::BASE_URL,
            urlencoding::encode(id.as_str())
        );
        self.post_empty("trash message", &url).map_err(not_found(id))
    }

    fn mark_read(&self, id: &MessageId) -> Result<(), RemoteError> {
        let url = format!(
            "{}/messages/{}/modify",
            Self::BASE_URL,
            urlencoding::encode(id.as_str())
        );
        let request = ModifyRequest {
            add_label_ids: &[],
            remove_label_ids: &[LABEL_UNREAD],
        };
        self.post_json("mark message read", &url, &request)
            .map_err(not_found(id))
    }
}
