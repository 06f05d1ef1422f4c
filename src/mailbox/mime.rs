//! Reply assembly: builds the MIME message handed to the provider.

use std::path::Path;

use base64::Engine;
use lettre::Message;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox as Address, MultiPart, SinglePart};
use tracing::warn;

use super::OutgoingReply;
use crate::error::MailboxError;

/// A file to attach to a reply.
#[derive(Debug, Clone)]
pub struct AttachmentFile {
    pub file_name: String,
    pub content: Vec<u8>,
}

/// Read an attachment from disk. A missing or unreadable file is skipped.
pub async fn load_attachment(path: &Path) -> Option<AttachmentFile> {
    match tokio::fs::read(path).await {
        Ok(content) => {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("attachment.pdf")
                .to_string();
            Some(AttachmentFile { file_name, content })
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Attachment not readable, sending without it");
            None
        }
    }
}

fn parse_address(value: &str, field: &str) -> Result<Address, MailboxError> {
    value
        .parse()
        .map_err(|e| MailboxError::Build(format!("Invalid {field} address {value:?}: {e}")))
}

/// Build the reply: plain-text body plus an optional PDF attachment,
/// with `In-Reply-To`/`References` set for threading.
pub fn build_reply(
    from: &str,
    reply: &OutgoingReply,
    attachment: Option<AttachmentFile>,
) -> Result<Message, MailboxError> {
    let mut builder = Message::builder()
        .from(parse_address(from, "from")?)
        .to(parse_address(&reply.to, "to")?)
        .subject(reply.subject.clone());

    if let Some(id) = &reply.in_reply_to {
        builder = builder.in_reply_to(id.clone());
    }
    if let Some(references) = &reply.references {
        builder = builder.references(references.clone());
    }

    let mut body = MultiPart::mixed().singlepart(SinglePart::plain(reply.body.clone()));
    if let Some(file) = attachment {
        let pdf = ContentType::parse("application/pdf")
            .map_err(|e| MailboxError::Build(format!("Invalid content type: {e}")))?;
        body = body.singlepart(Attachment::new(file.file_name).body(file.content, pdf));
    }

    builder
        .multipart(body)
        .map_err(|e| MailboxError::Build(format!("Failed to build email: {e}")))
}

/// URL-safe base64 of the formatted message, as the Gmail `raw` field expects.
pub fn encode_raw(message: &Message) -> String {
    base64::engine::general_purpose::URL_SAFE.encode(message.formatted())
}

#[cfg(test)]
mod tests {
    use mail_parser::{MessageParser, MimeHeaders};

    use super::*;

    fn reply() -> OutgoingReply {
        OutgoingReply {
            to: "Jane Doe <jane@example.com>".into(),
            subject: "Re: Certificate name".into(),
            body: "Hello,\n\nYour certificate is attached.".into(),
            thread_id: Some("18c0".into()),
            in_reply_to: Some("<abc@mail.example.com>".into()),
            references: Some("<abc@mail.example.com>".into()),
            attachment: None,
        }
    }

    #[test]
    fn reply_carries_threading_headers() {
        let message = build_reply("support@hub.example", &reply(), None).unwrap();
        let text = String::from_utf8(message.formatted()).unwrap();

        assert!(text.contains("Subject: Re: Certificate name"));
        assert!(text.contains("In-Reply-To: <abc@mail.example.com>"));
        assert!(text.contains("References: <abc@mail.example.com>"));
        assert!(text.contains("multipart/mixed"));
    }

    #[test]
    fn attachment_survives_encoding() {
        let pdf = b"%PDF-1.4\n\x00\x01\x02binary".to_vec();
        let attachment = AttachmentFile {
            file_name: "certificate_Jane_Doe_20260305_140709.pdf".into(),
            content: pdf.clone(),
        };
        let message = build_reply("support@hub.example", &reply(), Some(attachment)).unwrap();
        let raw = message.formatted();

        let parsed = MessageParser::default().parse(&raw).unwrap();
        let part = parsed.attachments().next().unwrap();
        assert_eq!(part.contents(), pdf.as_slice());
        assert_eq!(
            part.attachment_name(),
            Some("certificate_Jane_Doe_20260305_140709.pdf")
        );
        assert_eq!(part.content_type().map(|ct| ct.ctype()), Some("application"));
    }

    #[test]
    fn invalid_recipient_is_build_error() {
        let mut bad = reply();
        bad.to = "not an address".into();
        let err = build_reply("support@hub.example", &bad, None).unwrap_err();
        assert!(matches!(err, MailboxError::Build(ref m) if m.contains("to address")));
    }

    #[test]
    fn raw_is_url_safe_base64() {
        let message = build_reply("support@hub.example", &reply(), None).unwrap();
        let raw = encode_raw(&message);

        assert!(!raw.contains('+'));
        assert!(!raw.contains('/'));
        let decoded = base64::engine::general_purpose::URL_SAFE
            .decode(raw)
            .unwrap();
        assert_eq!(decoded, message.formatted());
    }

    #[tokio::test]
    async fn missing_attachment_file_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_attachment(&tmp.path().join("nope.pdf")).await.is_none());

        let path = tmp.path().join("certificate.pdf");
        tokio::fs::write(&path, b"%PDF").await.unwrap();
        let file = load_attachment(&path).await.unwrap();
        assert_eq!(file.file_name, "certificate.pdf");
        assert_eq!(file.content, b"%PDF");
    }
}
