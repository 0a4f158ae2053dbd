//! Turns an LLM-supplied quote back into an `EvidenceSpan` by finding it
//! in the canonical text ourselves. The model's own claimed offsets (if
//! any) are never trusted; only the substring match matters, and a
//! quote that cannot be found at all makes the surrounding output
//! ungroundable.

use ieim_common::sha256_bytes;
use ieim_schema::{EvidenceSource, EvidenceSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceSourceRef {
    SubjectC14n,
    BodyC14n,
}

impl EvidenceSourceRef {
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "SUBJECT_C14N" => Some(Self::SubjectC14n),
            "BODY_C14N" => Some(Self::BodyC14n),
            _ => None,
        }
    }

    fn schema_source(self) -> EvidenceSource {
        match self {
            Self::SubjectC14n => EvidenceSource::SubjectC14n,
            Self::BodyC14n => EvidenceSource::BodyC14n,
        }
    }
}

/// Finds `quote` verbatim in `canonical_text` and builds the
/// `EvidenceSpan` from that real position, never from anything the
/// model reported. Returns `None` if the quote is not a substring, in
/// which case the caller must treat the whole response as ungroundable.
pub fn reground(source: EvidenceSourceRef, canonical_text: &str, quote: &str) -> Option<EvidenceSpan> {
    if quote.is_empty() {
        return None;
    }
    let start = canonical_text.find(quote)?;
    let end = start + quote.len();
    let snippet = canonical_text[start..end].to_string();
    Some(EvidenceSpan {
        source: source.schema_source(),
        start,
        end,
        snippet_sha256: sha256_bytes(snippet.as_bytes()),
        snippet_redacted: snippet,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reground_finds_quote_and_records_real_offsets() {
        let body = "sehr geehrte damen und herren, ich bitte um ruckzahlung der pramie";
        let ev = reground(EvidenceSourceRef::BodyC14n, body, "ruckzahlung").unwrap();
        assert_eq!(&body[ev.start..ev.end], "ruckzahlung");
    }

    #[test]
    fn reground_fails_closed_on_quote_not_present() {
        assert!(reground(EvidenceSourceRef::BodyC14n, "hallo welt", "nicht vorhanden").is_none());
    }

    #[test]
    fn reground_rejects_empty_quote() {
        assert!(reground(EvidenceSourceRef::BodyC14n, "hallo welt", "").is_none());
    }
}
