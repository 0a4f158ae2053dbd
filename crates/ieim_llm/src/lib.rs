//! ieim_llm
//!
//! The gated, fail-closed LLM fallback path for classification and
//! extraction. An LLM call happens only when the deterministic stage
//! couldn't reach a confident answer on its own (see `gate`), and its
//! output is never trusted directly: contract-validated against a
//! JSON Schema (`contract`), re-grounded against canonical text rather
//! than the offsets it claims (`evidence`), cached per input key so a
//! retried message never re-spends budget (`cache`), and capped at a
//! daily call count (`cap`). Anything that goes wrong after the gate
//! opens degrades to the deterministic fail-closed intent, never to an
//! error the caller has to special-case.

pub mod cache;
pub mod cap;
pub mod contract;
pub mod evidence;
pub mod gate;
pub mod provider;
pub mod redact;
pub mod service;

pub use cache::{cache_key, CacheError, CacheKeyInput, FileLlmCache};
pub use cap::{CapError, DailyCallCap};
pub use contract::{classification_schema, extraction_schema, Contract, ContractError};
pub use evidence::{reground, EvidenceSourceRef};
pub use gate::{classification_should_use_llm, extraction_should_use_llm};
pub use provider::{FixtureProvider, LlmRequest, LlmResponse, Provider, ProviderError};
pub use redact::redact_for_prompt;
pub use service::{classify_with_llm, extract_with_llm, LlmClassifyInput, LlmExtractInput, LlmOutcome, LlmStageError};
