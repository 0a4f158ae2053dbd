//! Length-preserving redaction applied to any text before it is placed
//! into a prompt sent outside the process. Length preservation matters
//! because evidence offsets recorded against the canonical text must
//! still line up after redaction; a shorter or longer replacement would
//! shift every span after it.

use std::sync::OnceLock;

use regex::Regex;

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap())
}

fn iban_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b[A-Z]{2}\d{2}[A-Z0-9]{10,30}\b").unwrap())
}

fn mask(matched: &str) -> String {
    matched.chars().map(|c| if c.is_whitespace() { c } else { 'x' }).collect()
}

/// Replaces every email address and IBAN-shaped run with same-length
/// `x` runs, leaving everything else (including offsets of untouched
/// text) unchanged.
pub fn redact_for_prompt(text: &str) -> String {
    let after_email = email_re().replace_all(text, |caps: &regex::Captures| mask(&caps[0]));
    let after_iban = iban_re().replace_all(&after_email, |caps: &regex::Captures| mask(&caps[0]));
    after_iban.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_email_preserving_length() {
        let input = "contact me at jane.doe@example.com please";
        let out = redact_for_prompt(input);
        assert_eq!(out.len(), input.len());
        assert!(!out.contains('@'));
    }

    #[test]
    fn redacts_iban_preserving_length() {
        let input = "iban de89370400440532013000 danke";
        let out = redact_for_prompt(&input.to_uppercase().to_lowercase());
        assert_eq!(out.len(), input.len());
    }

    #[test]
    fn leaves_unrelated_text_untouched() {
        let input = "schadenmeldung ohne persönliche daten";
        assert_eq!(redact_for_prompt(input), input);
    }
}
