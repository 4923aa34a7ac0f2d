//! Gmail API response normalization
//!
//! Converts Gmail API responses to engine types.

use anyhow::{Context, Result};
use base64::prelude::*;
use chrono::{TimeZone, Utc};

use super::api::{GmailMessage, MessagePart, MessagePayload};
use crate::models::{EmailAddress, MessageBody, MessageId};
use crate::remote::RemoteMessage;

/// Normalize a `format=metadata` (or `full`) Gmail message
pub fn normalize_metadata(gmail_msg: GmailMessage) -> Result<RemoteMessage> {
    let payload = gmail_msg
        .payload
        .as_ref()
        .context("Message has no payload")?;

    let from = extract_header(payload, "From")
        .map(|s| EmailAddress::parse(&s))
        .unwrap_or_else(|| EmailAddress::new("unknown@unknown.invalid"));

    // internalDate is milliseconds since epoch
    let internal_date: i64 = gmail_msg
        .internal_date
        .as_deref()
        .and_then(|d| d.parse().ok())
        .unwrap_or(0);
    let received_at = Utc
        .timestamp_millis_opt(internal_date)
        .single()
        .unwrap_or_default();

    let mut message = RemoteMessage::new(MessageId::new(&gmail_msg.id), from, received_at);
    message.to = extract_header(payload, "To")
        .map(|s| EmailAddress::parse_list(&s))
        .unwrap_or_default();
    message.cc = extract_header(payload, "Cc")
        .map(|s| EmailAddress::parse_list(&s))
        .unwrap_or_default();
    message.subject = extract_header(payload, "Subject").unwrap_or_default();
    message.snippet = decode_html_entities(&gmail_msg.snippet);
    message.labels = gmail_msg.label_ids.clone().unwrap_or_default();
    message.revision = gmail_msg.history_id.as_deref().and_then(|h| h.parse().ok());
    message.list_unsubscribe = extract_header(payload, "List-Unsubscribe");
    message.precedence = extract_header(payload, "Precedence");
    message.expires =
        extract_header(payload, "Expires").or_else(|| extract_header(payload, "Expiry-Date"));

    Ok(message)
}

/// Extract the body of a `format=full` message, preferring HTML
pub fn extract_body(gmail_msg: &GmailMessage) -> MessageBody {
    let Some(payload) = gmail_msg.payload.as_ref() else {
        return MessageBody::plain(decode_html_entities(&gmail_msg.snippet));
    };

    if let Some(html) = find_body(payload, "text/html") {
        return MessageBody::html(html);
    }
    if let Some(text) = find_body(payload, "text/plain") {
        return MessageBody::plain(text);
    }

    // Single-part message with an unexpected mime type
    payload
        .body
        .as_ref()
        .and_then(|b| b.data.as_deref())
        .and_then(decode_base64_body)
        .map(MessageBody::plain)
        .unwrap_or_else(|| MessageBody::plain(decode_html_entities(&gmail_msg.snippet)))
}

/// Extract a header value by name
fn extract_header(payload: &MessagePayload, name: &str) -> Option<String> {
    payload.headers.as_ref()?.iter().find_map(|h| {
        if h.name.eq_ignore_ascii_case(name) {
            Some(h.value.clone())
        } else {
            None
        }
    })
}

fn is_mime(mime_type: Option<&String>, wanted: &str) -> bool {
    mime_type.is_some_and(|m| m.starts_with(wanted))
}

fn find_body(payload: &MessagePayload, mime: &str) -> Option<String> {
    if is_mime(payload.mime_type.as_ref(), mime)
        && let Some(data) = payload.body.as_ref().and_then(|b| b.data.as_deref())
    {
        return decode_base64_body(data);
    }

    payload.parts.as_deref().and_then(|parts| find_in_parts(parts, mime))
}

/// Recursively search message parts for content of the given mime type
fn find_in_parts(parts: &[MessagePart], mime: &str) -> Option<String> {
    for part in parts {
        let is_attachment = part.filename.as_deref().is_some_and(|f| !f.is_empty());
        if !is_attachment
            && is_mime(part.mime_type.as_ref(), mime)
            && let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref())
            && let Some(text) = decode_base64_body(data)
        {
            return Some(text);
        }

        if let Some(nested) = &part.parts
            && let Some(text) = find_in_parts(nested, mime)
        {
            return Some(text);
        }
    }

    None
}

/// Decode base64-encoded body data
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple decoders.
fn decode_base64_body(data: &str) -> Option<String> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    decoders
        .iter()
        .filter_map(|decoder| decoder.decode(data).ok())
        .find_map(|bytes| String::from_utf8(bytes).ok())
}

/// Decode HTML entities in snippet text
fn decode_html_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}
