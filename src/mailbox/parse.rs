//! Raw RFC 822 parsing into `EmailMessage`.

use chrono::{DateTime, Utc};
use mail_parser::{HeaderValue, MessageParser};

use super::EmailMessage;
use crate::error::MailboxError;

/// Provider-side metadata that is not part of the RFC 822 text.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: String,
    pub thread_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Parse a raw message fetched from the provider.
pub fn parse_raw_message(envelope: Envelope, raw: &[u8]) -> Result<EmailMessage, MailboxError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailboxError::Decode {
            id: envelope.id.clone(),
            reason: "not an RFC 822 message".into(),
        })?;

    let sender = parsed
        .header_raw("From")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "No Sender".to_string());

    let from = parsed.from().and_then(|addr| addr.first());
    let sender_address = from
        .and_then(|a| a.address())
        .map(|s| s.to_lowercase())
        .unwrap_or_else(|| sender.to_lowercase());
    let sender_name = from
        .and_then(|a| a.name())
        .map(str::to_string)
        .filter(|n| !n.trim().is_empty());

    let references = match parsed.references() {
        HeaderValue::Text(id) => vec![bracketed(id)],
        HeaderValue::TextList(ids) => ids.iter().map(|id| bracketed(id)).collect(),
        _ => Vec::new(),
    };

    Ok(EmailMessage {
        id: envelope.id,
        thread_id: envelope.thread_id,
        sender,
        sender_address,
        sender_name,
        subject: parsed.subject().unwrap_or("No Subject").to_string(),
        body: extract_text(&parsed).trim().to_string(),
        timestamp: envelope.received_at,
        message_id: parsed.message_id().map(bracketed),
        references,
    })
}

/// Wrap a bare message id in angle brackets.
fn bracketed(id: &str) -> String {
    let id = id.trim().trim_start_matches('<').trim_end_matches('>');
    format!("<{id}>")
}

/// Readable text of a parsed email: the plain-text body, else the HTML body
/// rendered to text.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.into_owned();
    }
    parsed
        .body_html(0)
        .map(|html| html_to_text(&html))
        .unwrap_or_default()
}

/// Text of an HTML fragment: tags dropped, block-level tags become line
/// breaks, common entities decoded, blank lines removed.
pub fn html_to_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut tag = String::new();
    let mut in_tag = false;

    for ch in html.chars() {
        match (in_tag, ch) {
            (false, '<') => {
                in_tag = true;
                tag.clear();
            }
            (true, '>') => {
                in_tag = false;
                if breaks_line(&tag) {
                    text.push('\n');
                }
            }
            (true, c) => tag.push(c),
            (false, c) => text.push(c),
        }
    }

    decode_entities(&text)
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn breaks_line(tag: &str) -> bool {
    let name = tag
        .trim_start_matches('/')
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    matches!(
        name.as_str(),
        "br" | "p" | "div" | "li" | "tr" | "h1" | "h2" | "h3" | "blockquote"
    )
}

fn decode_entities(text: &str) -> String {
    // `&amp;` last so `&amp;lt;` stays literal.
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
