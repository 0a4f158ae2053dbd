//! ieim_classify
//!
//! Deterministic, rule-based classification and entity extraction: fixed
//! substring/regex cascades over the canonical subject/body text, each
//! match carrying an evidence span.
//! No machine learning runs in this crate; the gated LLM fallback lives
//! in `ieim_llm` and only engages when this crate's output says it may.

pub mod classify;
pub mod extract;

pub use classify::{classify_message, ClassifyError, RULES_DESCRIPTION};
pub use extract::{extract_entities, ExtractError};
