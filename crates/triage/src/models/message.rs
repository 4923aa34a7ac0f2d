//! Message model: the locally cached view of one remote message

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Provider-assigned message identifier, stable across syncs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An email address with optional display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "Jane Roe")
    pub name: Option<String>,
    /// Address (e.g., "jane@example.com")
    pub email: String,
}

impl EmailAddress {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into(),
        }
    }

    /// Parse `"Jane Roe <jane@example.com>"` or a bare address
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        if let Some(angle_start) = s.rfind('<')
            && let Some(angle_end) = s.rfind('>')
            && angle_start < angle_end
        {
            let name = s[..angle_start].trim().trim_matches('"').trim();
            let email = s[angle_start + 1..angle_end].trim();
            return Self {
                name: (!name.is_empty()).then(|| name.to_string()),
                email: email.to_string(),
            };
        }

        Self::new(s)
    }

    /// Parse a comma-separated address list, skipping empty entries
    pub fn parse_list(s: &str) -> Vec<Self> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Domain part of the address, lowercased
    pub fn domain(&self) -> Option<String> {
        self.email
            .rsplit_once('@')
            .map(|(_, domain)| domain.to_lowercase())
    }

    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

/// Importance on a 1 (ignorable) to 5 (urgent) scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Importance(u8);

impl Importance {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    /// Build an importance, clamping into 1..=5
    pub fn clamped(value: i32) -> Self {
        Self(value.clamp(Self::MIN as i32, Self::MAX as i32) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Importance {
    fn default() -> Self {
        Self(3)
    }
}

/// A cached message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub subject: String,
    /// Short preview text available without a body fetch
    pub snippet: String,
    pub received_at: DateTime<Utc>,
    /// Provider labels as last observed (e.g. "INBOX", "UNREAD", "TRASH")
    pub labels: Vec<String>,
    /// Channel assigned by the classifier
    pub channel: String,
    pub importance: Importance,
    pub deadline: Option<NaiveDate>,
    pub is_read: bool,
    pub is_trashed: bool,
    /// Remote revision of the observed state, when the provider exposes one
    pub revision: Option<u64>,
    /// Wall-clock time of the last local write to this record
    pub updated_at: DateTime<Utc>,
    /// A local optimistic mutation has not been confirmed by the remote yet
    pub sync_pending: bool,
}

impl Message {
    pub fn builder(id: MessageId) -> MessageBuilder {
        MessageBuilder::new(id)
    }

    /// Visible in channel listings and search results
    pub fn is_listed(&self) -> bool {
        !self.is_trashed
    }

    /// True when the provider-observed fields match, ignoring local bookkeeping
    pub fn same_remote_state(&self, other: &Message) -> bool {
        self.from == other.from
            && self.to == other.to
            && self.cc == other.cc
            && self.subject == other.subject
            && self.snippet == other.snippet
            && self.received_at == other.received_at
            && self.labels == other.labels
            && self.is_read == other.is_read
            && self.is_trashed == other.is_trashed
            && self.revision == other.revision
    }
}

/// Builder for [`Message`]
pub struct MessageBuilder {
    id: MessageId,
    from: Option<EmailAddress>,
    to: Vec<EmailAddress>,
    cc: Vec<EmailAddress>,
    subject: String,
    snippet: String,
    received_at: Option<DateTime<Utc>>,
    labels: Vec<String>,
    channel: String,
    importance: Importance,
    deadline: Option<NaiveDate>,
    is_read: bool,
    is_trashed: bool,
    revision: Option<u64>,
}

impl MessageBuilder {
    fn new(id: MessageId) -> Self {
        Self {
            id,
            from: None,
            to: Vec::new(),
            cc: Vec::new(),
            subject: String::new(),
            snippet: String::new(),
            received_at: None,
            labels: Vec::new(),
            channel: String::new(),
            importance: Importance::default(),
            deadline: None,
            is_read: false,
            is_trashed: false,
            revision: None,
        }
    }

    pub fn from(mut self, from: EmailAddress) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: Vec<EmailAddress>) -> Self {
        self.to = to;
        self
    }

    pub fn cc(mut self, cc: Vec<EmailAddress>) -> Self {
        self.cc = cc;
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = Some(received_at);
        self
    }

    pub fn labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    pub fn deadline(mut self, deadline: Option<NaiveDate>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn read(mut self, is_read: bool) -> Self {
        self.is_read = is_read;
        self
    }

    pub fn trashed(mut self, is_trashed: bool) -> Self {
        self.is_trashed = is_trashed;
        self
    }

    pub fn revision(mut self, revision: Option<u64>) -> Self {
        self.revision = revision;
        self
    }

    pub fn build(self) -> Message {
        Message {
            id: self.id,
            from: self
                .from
                .unwrap_or_else(|| EmailAddress::new("unknown@unknown.invalid")),
            to: self.to,
            cc: self.cc,
            subject: self.subject,
            snippet: self.snippet,
            received_at: self.received_at.unwrap_or_else(Utc::now),
            labels: self.labels,
            channel: self.channel,
            importance: self.importance,
            deadline: self.deadline,
            is_read: self.is_read,
            is_trashed: self.is_trashed,
            revision: self.revision,
            updated_at: Utc::now(),
            sync_pending: false,
        }
    }
}

/// How a body's content should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyKind {
    Plain,
    Html,
}

impl BodyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Html => "html",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("html") {
            Self::Html
        } else {
            Self::Plain
        }
    }
}

/// Full message body; immutable once fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    pub kind: BodyKind,
    pub content: String,
}

impl MessageBody {
    pub fn plain(content: impl Into<String>) -> Self {
        Self {
            kind: BodyKind::Plain,
            content: content.into(),
        }
    }

    pub fn html(content: impl Into<String>) -> Self {
        Self {
            kind: BodyKind::Html,
            content: content.into(),
        }
    }

    /// Body as plain text, with markup removed for HTML bodies
    pub fn plain_text(&self) -> String {
        match self.kind {
            BodyKind::Plain => self.content.clone(),
            BodyKind::Html => strip_html(&self.content),
        }
    }
}

fn strip_html(html: &str) -> String {
    static TAGS: once_cell::sync::Lazy<regex::Regex> =
        once_cell::sync::Lazy::new(|| regex::Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));
    static BLOCKS: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
        regex::Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>")
            .expect("valid block regex")
    });

    let without_blocks = BLOCKS.replace_all(html, " ");
    let text = TAGS.replace_all(&without_blocks, " ");
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
