//! Gmail `MessagePart` → read-model projection, and outbound MIME construction.
//!
//! Gmail already hands back a structured, already-parsed `MessagePayload` tree (unlike
//! a raw `.eml` byte stream), so extraction here is a tree walk rather than a MIME
//! parser. The body-preference rule (first non-empty `text/plain`/`text/html`,
//! recursing into `multipart/*`, skipping attachment parts) mirrors how Gmail API
//! consumers elsewhere in the ecosystem pull a readable body out of the part tree.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use chrono::{DateTime, Utc};
use google_gmail1::api::{Message, MessagePart};

use crate::error::{GmailError, Result};
use crate::models::{Address, AttachmentRef, Full, MessageId, Summary, ThreadId};

fn header_lookup<'a>(headers: &'a [google_gmail1::api::MessagePartHeader], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.as_deref().map(|n| n.eq_ignore_ascii_case(name)).unwrap_or(false))
        .and_then(|h| h.value.as_deref())
}

fn parse_address_list(raw: &str) -> Vec<Address> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| Address::parse(s).ok())
        .collect()
}

fn parse_from(raw: &str) -> Result<Address> {
    Address::parse(raw.trim())
}

fn parse_rfc2822_date(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc2822(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)))
        .unwrap_or_else(|_| Utc::now())
}

/// Project a Gmail `Message` fetched with `format=metadata` into a [`Summary`].
pub fn parse_summary(msg: &Message) -> Result<Summary> {
    let id = msg
        .id
        .clone()
        .ok_or_else(|| GmailError::InvalidMessageFormat("missing message id".to_string()))?;
    let thread_id = msg
        .thread_id
        .clone()
        .ok_or_else(|| GmailError::InvalidMessageFormat("missing thread id".to_string()))?;

    let headers = msg
        .payload
        .as_ref()
        .and_then(|p| p.headers.as_ref())
        .map(|h| h.as_slice())
        .unwrap_or(&[]);

    let from = header_lookup(headers, "From")
        .map(parse_from)
        .transpose()?
        .unwrap_or(Address {
            display_name: None,
            local: "unknown".to_string(),
            domain: "unknown.invalid".to_string(),
        });
    let to = header_lookup(headers, "To").map(parse_address_list).unwrap_or_default();
    let cc = header_lookup(headers, "Cc").map(parse_address_list).unwrap_or_default();
    let subject = header_lookup(headers, "Subject").unwrap_or("").to_string();
    let date = header_lookup(headers, "Date").map(parse_rfc2822_date).unwrap_or_else(Utc::now);

    let label_ids = msg.label_ids.clone().unwrap_or_default();
    let is_unread = label_ids.iter().any(|l| l == "UNREAD");
    let is_important = label_ids.iter().any(|l| l == "IMPORTANT");

    let has_attachment = msg
        .payload
        .as_ref()
        .map(|p| part_has_attachment(p))
        .unwrap_or(false);

    Ok(Summary {
        id: MessageId(id),
        thread_id: ThreadId(thread_id),
        from,
        to,
        cc,
        subject,
        date,
        snippet: msg.snippet.clone().unwrap_or_default(),
        label_ids,
        is_unread,
        is_important,
        has_attachment,
        size_estimate: msg.size_estimate.unwrap_or(0) as u64,
    })
}

fn part_has_attachment(part: &MessagePart) -> bool {
    if is_enumerable_attachment(part) {
        return true;
    }
    part.parts
        .as_ref()
        .map(|children| children.iter().any(part_has_attachment))
        .unwrap_or(false)
}

fn is_enumerable_attachment(part: &MessagePart) -> bool {
    let Some(body) = part.body.as_ref() else {
        return false;
    };
    if body.attachment_id.is_none() {
        return false;
    }
    let mime_type = part.mime_type.as_deref().unwrap_or("");
    if mime_type == "text/calendar" {
        return false;
    }
    let disposition_inline_without_filename = part
        .headers
        .as_ref()
        .and_then(|hs| header_lookup(hs, "Content-Disposition"))
        .map(|cd| cd.to_lowercase().contains("inline"))
        .unwrap_or(false)
        && part.filename.as_deref().unwrap_or("").is_empty();
    !disposition_inline_without_filename
}

/// Project a Gmail `Message` fetched with `format=full` into a [`Full`].
pub fn parse_full(msg: Message) -> Result<Full> {
    let summary = parse_summary(&msg)?;

    let payload = msg
        .payload
        .ok_or_else(|| GmailError::InvalidMessageFormat("missing payload".to_string()))?;

    let mut headers: Vec<(String, Vec<String>)> = Vec::new();
    if let Some(hs) = &payload.headers {
        for h in hs {
            if let (Some(name), Some(value)) = (&h.name, &h.value) {
                if let Some(existing) = headers.iter_mut().find(|(k, _): &&mut (String, Vec<String>)| k.eq_ignore_ascii_case(name)) {
                    existing.1.push(value.clone());
                } else {
                    headers.push((name.clone(), vec![value.clone()]));
                }
            }
        }
    }

    let mut body_text = String::new();
    let mut body_html = String::new();
    let mut attachments = Vec::new();
    let mut warnings = Vec::new();

    extract_bodies_and_attachments(&payload, &mut body_text, &mut body_html, &mut attachments, &mut warnings);

    Ok(Full {
        id: summary.id,
        thread_id: summary.thread_id,
        from: summary.from,
        to: summary.to,
        cc: summary.cc,
        subject: summary.subject,
        date: summary.date,
        body_text,
        body_html,
        headers,
        attachments,
        warnings,
    })
}

fn decode_body(data: &str) -> std::result::Result<String, String> {
    URL_SAFE_NO_PAD
        .decode(data)
        .map_err(|e| e.to_string())
        .and_then(|bytes| String::from_utf8(bytes).map_err(|e| e.to_string()))
}

/// Walk the part tree, preferring the first non-empty `text/plain`/`text/html` body
/// and collecting every enumerable attachment. Recurses into `multipart/*` parts.
fn extract_bodies_and_attachments(
    part: &MessagePart,
    body_text: &mut String,
    body_html: &mut String,
    attachments: &mut Vec<AttachmentRef>,
    warnings: &mut Vec<String>,
) {
    let mime_type = part.mime_type.clone().unwrap_or_default();

    if is_enumerable_attachment(part) {
        if let (Some(body), Some(filename)) = (&part.body, &part.filename) {
            if let Some(attachment_id) = &body.attachment_id {
                if !filename.is_empty() {
                    attachments.push(AttachmentRef {
                        filename: filename.clone(),
                        mime_type: mime_type.clone(),
                        size: body.size.unwrap_or(0) as u64,
                        attachment_id: attachment_id.clone(),
                    });
                }
            }
        }
    } else if let Some(body) = &part.body {
        if let Some(data) = &body.data {
            if !data.is_empty() {
                match decode_body(data) {
                    Ok(decoded) => {
                        if mime_type == "text/plain" && body_text.is_empty() && !decoded.is_empty() {
                            *body_text = decoded;
                        } else if mime_type == "text/html" && body_html.is_empty() && !decoded.is_empty() {
                            *body_html = decoded;
                        }
                    }
                    Err(e) => warnings.push(format!("failed to decode part {}: {}", mime_type, e)),
                }
            }
        }
    }

    if let Some(children) = &part.parts {
        for child in children {
            if body_text.is_empty() || body_html.is_empty() {
                extract_bodies_and_attachments(child, body_text, body_html, attachments, warnings);
            } else {
                // Bodies already found; still need to walk for attachments.
                let mut discard_text = body_text.clone();
                let mut discard_html = body_html.clone();
                extract_bodies_and_attachments(child, &mut discard_text, &mut discard_html, attachments, warnings);
            }
        }
    }
}

/// Sniff a content type from a file extension; callers fall back to magic-byte sniffing
/// (see [`sniff_magic_bytes`]) when the extension is unknown.
pub fn sniff_extension(filename: &str) -> Option<&'static str> {
    let ext = filename.rsplit('.').next()?.to_lowercase();
    Some(match ext.as_str() {
        "txt" => "text/plain",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "csv" => "text/csv",
        "json" => "application/json",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => return None,
    })
}

/// Magic-byte sniffing used when the extension is missing or unrecognized.
pub fn sniff_magic_bytes(data: &[u8]) -> &'static str {
    if data.starts_with(b"%PDF") {
        "application/pdf"
    } else if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if data.starts_with(b"GIF8") {
        "image/gif"
    } else if data.starts_with(b"PK\x03\x04") {
        "application/zip"
    } else {
        "application/octet-stream"
    }
}

/// A single MIME part ready to be embedded in the outbound message.
pub struct MimeAttachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

fn fold_address_list(addrs: &[Address]) -> String {
    addrs.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
}

/// RFC 2045 base64 body encoding: standard alphabet, padded, wrapped at 76
/// columns so the line never approaches the SMTP 998-octet limit.
fn encode_base64_body(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    encoded
        .as_bytes()
        .chunks(76)
        .map(|chunk| std::str::from_utf8(chunk).expect("base64 alphabet is ASCII"))
        .collect::<Vec<_>>()
        .join("\r\n")
}

/// Build a `multipart/mixed` RFC 822 message ready for `sendMIME`. Returns the raw
/// (not yet base64url-encoded) bytes.
#[allow(clippy::too_many_arguments)]
pub fn build_mime_bytes(
    from: &str,
    to: &[Address],
    cc: &[Address],
    bcc: &[Address],
    subject: &str,
    body: &str,
    attachments: &[MimeAttachment],
    in_reply_to: Option<&str>,
    references: Option<&str>,
) -> Vec<u8> {
    let boundary = format!("mail-boundary-{}", uuid::Uuid::new_v4().simple());

    let mut out = String::new();
    out.push_str(&format!("From: {}\r\n", from));
    out.push_str(&format!("To: {}\r\n", fold_address_list(to)));
    if !cc.is_empty() {
        out.push_str(&format!("Cc: {}\r\n", fold_address_list(cc)));
    }
    if !bcc.is_empty() {
        out.push_str(&format!("Bcc: {}\r\n", fold_address_list(bcc)));
    }
    out.push_str(&format!("Subject: {}\r\n", subject));
    if let Some(irt) = in_reply_to {
        out.push_str(&format!("In-Reply-To: {}\r\n", irt));
    }
    if let Some(refs) = references {
        out.push_str(&format!("References: {}\r\n", refs));
    }
    out.push_str("MIME-Version: 1.0\r\n");

    if attachments.is_empty() {
        out.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n\r\n");
        out.push_str(body);
    } else {
        out.push_str(&format!("Content-Type: multipart/mixed; boundary=\"{}\"\r\n\r\n", boundary));
        out.push_str(&format!("--{}\r\n", boundary));
        out.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n\r\n");
        out.push_str(body);
        out.push_str("\r\n");
        for attachment in attachments {
            out.push_str(&format!("--{}\r\n", boundary));
            out.push_str(&format!("Content-Type: {}; name=\"{}\"\r\n", attachment.content_type, attachment.filename));
            out.push_str("Content-Transfer-Encoding: base64\r\n");
            out.push_str(&format!("Content-Disposition: attachment; filename=\"{}\"\r\n\r\n", attachment.filename));
            out.push_str(&encode_base64_body(&attachment.data));
            out.push_str("\r\n");
        }
        out.push_str(&format!("--{}--\r\n", boundary));
    }

    out.into_bytes()
}

/// `Re: ` prefix rule: prepend unless already present (case-insensitive).
pub fn reply_subject(original_subject: &str) -> String {
    if original_subject.trim_start().to_lowercase().starts_with("re:") {
        original_subject.to_string()
    } else {
        format!("Re: {}", original_subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_subject_prepends_once() {
        assert_eq!(reply_subject("Lunch"), "Re: Lunch");
        assert_eq!(reply_subject("Re: Lunch"), "Re: Lunch");
        assert_eq!(reply_subject("RE: Lunch"), "RE: Lunch");
    }

    #[test]
    fn test_sniff_extension_known() {
        assert_eq!(sniff_extension("report.pdf"), Some("application/pdf"));
        assert_eq!(sniff_extension("photo.JPG"), Some("image/jpeg"));
        assert_eq!(sniff_extension("noextension"), None);
    }

    #[test]
    fn test_sniff_magic_bytes_pdf() {
        assert_eq!(sniff_magic_bytes(b"%PDF-1.4 rest"), "application/pdf");
        assert_eq!(sniff_magic_bytes(b"not a known format"), "application/octet-stream");
    }

    #[test]
    fn test_build_mime_bytes_no_attachments_contains_headers() {
        let from = "me@example.com";
        let to = vec![Address::parse("you@example.com").unwrap()];
        let bytes = build_mime_bytes(from, &to, &[], &[], "Hello", "Hi there", &[], None, None);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("From: me@example.com"));
        assert!(text.contains("To: you@example.com"));
        assert!(text.contains("Subject: Hello"));
        assert!(text.contains("Hi there"));
    }

    #[test]
    fn test_build_mime_bytes_reply_headers() {
        let from = "me@example.com";
        let to = vec![Address::parse("you@example.com").unwrap()];
        let bytes = build_mime_bytes(
            from,
            &to,
            &[],
            &[],
            "Re: Hello",
            "body",
            &[],
            Some("<abc@x.com>"),
            Some("<abc@x.com>"),
        );
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("In-Reply-To: <abc@x.com>"));
        assert!(text.contains("References: <abc@x.com>"));
    }

    #[test]
    fn test_build_mime_bytes_with_attachment_uses_multipart() {
        let from = "me@example.com";
        let to = vec![Address::parse("you@example.com").unwrap()];
        let attachment = MimeAttachment {
            filename: "a.txt".to_string(),
            content_type: "text/plain".to_string(),
            data: b"hello".to_vec(),
        };
        let bytes = build_mime_bytes(from, &to, &[], &[], "Subj", "body", &[attachment], None, None);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("multipart/mixed"));
        assert!(text.contains("filename=\"a.txt\""));
    }

    #[test]
    fn test_encode_base64_body_uses_standard_alphabet_and_wraps() {
        // Bytes chosen so the URL-safe alphabet would differ from the standard one.
        let data: Vec<u8> = (0u8..=255).collect();
        let encoded = encode_base64_body(&data);
        for line in encoded.split("\r\n") {
            assert!(line.len() <= 76, "line exceeds 76 columns: {}", line.len());
        }
        assert!(!encoded.contains('-') && !encoded.contains('_'), "must not use the URL-safe alphabet");
        let rejoined: String = encoded.split("\r\n").collect();
        assert_eq!(STANDARD.decode(rejoined).unwrap(), data);
    }

    #[test]
    fn test_build_mime_bytes_attachment_body_is_standard_base64() {
        let from = "me@example.com";
        let to = vec![Address::parse("you@example.com").unwrap()];
        let data = vec![0xFFu8, 0xFEu8, 0xFDu8, 0x00u8, 0x01u8];
        let attachment = MimeAttachment {
            filename: "bin.dat".to_string(),
            content_type: "application/octet-stream".to_string(),
            data: data.clone(),
        };
        let bytes = build_mime_bytes(from, &to, &[], &[], "Subj", "body", &[attachment], None, None);
        let text = String::from_utf8(bytes).unwrap();
        let encoded_line = STANDARD.encode(&data);
        assert!(text.contains(&encoded_line));
    }
}
