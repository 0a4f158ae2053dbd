//! ieim_normalize
//!
//! Parses raw MIME bytes into a `NormalizedMessage`: required `From`/`To`,
//! optional `Cc`/`Reply-To`/`Message-ID`/`In-Reply-To`, first `text/plain`
//! body part, lowercased canonical text, a fixed marker-substring language
//! detector, and the message fingerprint. Ported from the original
//! implementation's `normalize/normalized_message.py`; MIME parsing itself
//! uses the `mail-parser` crate (same ecosystem as the `mail-auth` crate
//! referenced in the retrieval pack) rather than hand-rolling RFC 5322.

use mail_parser::MessageParser;
use thiserror::Error;
use uuid::Uuid;

use ieim_common::canonical_json_bytes;
use ieim_schema::{urn, NormalizedMessage, ThreadKeys};

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("raw bytes are not a parseable MIME message")]
    Unparseable,
    #[error("missing From address")]
    MissingFrom,
    #[error("missing To address")]
    MissingTo,
    #[error("canonicalization failed: {0}")]
    Canon(#[from] ieim_common::CanonError),
}

const GERMAN_MARKERS: &[&str] = &["guten tag", "bitte", "schaden", "polizz", "kündig", "rechnung"];

fn canonicalize_text(text: &str) -> String {
    text.to_lowercase()
}

fn strip_trailing_newlines(text: &str) -> String {
    text.trim_end_matches(['\r', '\n']).to_string()
}

fn detect_language(subject: &str, body: &str) -> String {
    let combined = format!("{subject} {body}");
    let collapsed: String = combined
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if GERMAN_MARKERS.iter().any(|m| collapsed.contains(m)) {
        "de".to_string()
    } else {
        "en".to_string()
    }
}

fn addr_list_to_emails(value: Option<&mail_parser::HeaderValue>) -> Vec<String> {
    let Some(value) = value else { return Vec::new() };
    let mut out = Vec::new();
    if let Some(addrs) = value.as_address() {
        for addr in addrs.iter() {
            if let Some(email) = addr.address() {
                let trimmed = email.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
            }
        }
    }
    out
}

fn single_addr(value: Option<&mail_parser::HeaderValue>) -> (Option<String>, Option<String>) {
    let Some(value) = value else { return (None, None) };
    if let Some(addrs) = value.as_address() {
        if let Some(first) = addrs.iter().next() {
            let email = first.address().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
            let name = first.name().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
            return (email, name);
        }
    }
    (None, None)
}

struct MessageFingerprintInput<'a> {
    from_email: &'a str,
    to_emails: Vec<String>,
    cc_emails: Vec<String>,
    subject_c14n: &'a str,
    body_text_c14n: &'a str,
    thread_keys: &'a ThreadKeys,
    attachment_ids: Vec<String>,
}

#[derive(serde::Serialize)]
struct FingerprintShape {
    attachment_ids: Vec<String>,
    body_text_c14n: String,
    cc_emails: Vec<String>,
    from_email: String,
    in_reply_to: String,
    internet_message_id: String,
    subject_c14n: String,
    to_emails: Vec<String>,
}

fn message_fingerprint(input: MessageFingerprintInput) -> Result<String, NormalizeError> {
    let mut attachment_ids = input.attachment_ids;
    attachment_ids.sort();
    let mut cc_emails = input.cc_emails;
    cc_emails.sort();
    let mut to_emails = input.to_emails;
    to_emails.sort();

    let shape = FingerprintShape {
        attachment_ids,
        body_text_c14n: input.body_text_c14n.to_string(),
        cc_emails,
        from_email: input.from_email.to_string(),
        in_reply_to: input.thread_keys.in_reply_to.clone().unwrap_or_default(),
        internet_message_id: input
            .thread_keys
            .internet_message_id
            .clone()
            .unwrap_or_default(),
        subject_c14n: input.subject_c14n.to_string(),
        to_emails,
    };
    let bytes = canonical_json_bytes(&shape)?;
    Ok(ieim_common::sha256_bytes(&bytes))
}

pub struct BuildNormalizedMessageArgs<'a> {
    pub raw_mime: &'a [u8],
    pub message_id: Uuid,
    pub run_id: String,
    pub ingested_at: String,
    pub received_at: String,
    pub ingestion_source: String,
    pub raw_mime_uri: String,
    pub raw_mime_sha256: String,
    pub attachment_ids: Vec<String>,
}

pub fn build_normalized_message(
    args: BuildNormalizedMessageArgs,
) -> Result<NormalizedMessage, NormalizeError> {
    let message = MessageParser::default()
        .parse(args.raw_mime)
        .ok_or(NormalizeError::Unparseable)?;

    let (from_email, from_display_name) = single_addr(message.header("From"));
    let from_email = from_email.ok_or(NormalizeError::MissingFrom)?;

    let to_emails = addr_list_to_emails(message.header("To"));
    if to_emails.is_empty() {
        return Err(NormalizeError::MissingTo);
    }
    let cc_emails = addr_list_to_emails(message.header("Cc"));
    let (reply_to_email, _) = single_addr(message.header("Reply-To"));

    let subject = message.subject().unwrap_or_default().to_string();
    let body_text = strip_trailing_newlines(message.body_text(0).unwrap_or_default().as_ref());

    let subject_c14n = canonicalize_text(&subject);
    let body_text_c14n = canonicalize_text(&body_text);

    let thread_keys = ThreadKeys {
        internet_message_id: message.message_id().map(|s| s.to_string()),
        in_reply_to: message
            .header("In-Reply-To")
            .and_then(|v| v.as_text())
            .map(|s| s.to_string()),
        conversation_id: None,
    };

    let language = detect_language(&subject, &body_text);
    let fingerprint = message_fingerprint(MessageFingerprintInput {
        from_email: &from_email,
        to_emails: to_emails.clone(),
        cc_emails: cc_emails.clone(),
        subject_c14n: &subject_c14n,
        body_text_c14n: &body_text_c14n,
        thread_keys: &thread_keys,
        attachment_ids: args.attachment_ids.clone(),
    })?;

    Ok(NormalizedMessage {
        schema_id: urn::NORMALIZED_MESSAGE.to_string(),
        schema_version: urn::version_of(urn::NORMALIZED_MESSAGE).to_string(),
        message_id: args.message_id,
        run_id: args.run_id,
        ingested_at: args.ingested_at,
        received_at: args.received_at,
        ingestion_source: args.ingestion_source,
        raw_mime_uri: args.raw_mime_uri,
        raw_mime_sha256: args.raw_mime_sha256,
        from_email,
        from_display_name,
        reply_to_email,
        to_emails,
        cc_emails,
        subject,
        subject_c14n,
        body_text,
        body_text_c14n,
        language,
        thread_keys,
        attachment_ids: args.attachment_ids,
        message_fingerprint: fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_EML: &[u8] = b"From: alice@example.com\r\nTo: bob@example.com\r\nSubject: Schaden melden\r\nMessage-ID: <abc@example.com>\r\n\r\nBitte pruefen Sie den Schaden.\r\n";

    #[test]
    fn parses_required_headers_and_detects_german() {
        let msg = build_normalized_message(BuildNormalizedMessageArgs {
            raw_mime: SAMPLE_EML,
            message_id: Uuid::nil(),
            run_id: "run-1".into(),
            ingested_at: "2026-01-01T00:00:00Z".into(),
            received_at: "2026-01-01T00:00:00Z".into(),
            ingestion_source: "test".into(),
            raw_mime_uri: "raw_store/mime/aa.eml".into(),
            raw_mime_sha256: "sha256:aa".into(),
            attachment_ids: vec![],
        })
        .unwrap();

        assert_eq!(msg.from_email, "alice@example.com");
        assert_eq!(msg.to_emails, vec!["bob@example.com".to_string()]);
        assert_eq!(msg.language, "de");
        assert_eq!(msg.subject_c14n, "schaden melden");
    }

    #[test]
    fn missing_to_fails_closed() {
        let eml = b"From: alice@example.com\r\nSubject: x\r\n\r\nbody\r\n";
        let err = build_normalized_message(BuildNormalizedMessageArgs {
            raw_mime: eml,
            message_id: Uuid::nil(),
            run_id: "run-1".into(),
            ingested_at: "2026-01-01T00:00:00Z".into(),
            received_at: "2026-01-01T00:00:00Z".into(),
            ingestion_source: "test".into(),
            raw_mime_uri: "raw_store/mime/aa.eml".into(),
            raw_mime_sha256: "sha256:aa".into(),
            attachment_ids: vec![],
        })
        .unwrap_err();
        assert!(matches!(err, NormalizeError::MissingTo));
    }

    #[test]
    fn fingerprint_is_stable_regardless_of_recipient_order() {
        let eml_a = b"From: a@example.com\r\nTo: b@example.com, c@example.com\r\nSubject: x\r\n\r\nbody\r\n";
        let eml_b = b"From: a@example.com\r\nTo: c@example.com, b@example.com\r\nSubject: x\r\n\r\nbody\r\n";
        let build = |bytes: &[u8]| {
            build_normalized_message(BuildNormalizedMessageArgs {
                raw_mime: bytes,
                message_id: Uuid::nil(),
                run_id: "run-1".into(),
                ingested_at: "2026-01-01T00:00:00Z".into(),
                received_at: "2026-01-01T00:00:00Z".into(),
                ingestion_source: "test".into(),
                raw_mime_uri: "raw_store/mime/aa.eml".into(),
                raw_mime_sha256: "sha256:aa".into(),
                attachment_ids: vec![],
            })
            .unwrap()
        };
        let a = build(eml_a);
        let b = build(eml_b);
        assert_eq!(a.message_fingerprint, b.message_fingerprint);
    }
}
