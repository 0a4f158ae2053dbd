use thiserror::Error;

use ieim_schema::{AttachmentArtifact, NormalizedMessage, RoutingDecision};

use crate::adapter::{CaseAdapter, CaseArtifact};
use crate::idempotency::build_idempotency_key;

#[derive(Debug, Error)]
pub enum CaseStageError {
    #[error("request_info_draft is required by routing action ADD_REQUEST_INFO_DRAFT")]
    MissingRequestInfoDraft,
    #[error("reply_draft is required by routing action ADD_REPLY_DRAFT")]
    MissingReplyDraft,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseStageResult {
    pub case_id: Option<String>,
    pub blocked: bool,
}

pub struct CaseStage<'a> {
    pub adapter: &'a dyn CaseAdapter,
}

impl<'a> CaseStage<'a> {
    /// Apply a routing decision's actions against the case adapter.
    /// `BLOCK_CASE_CREATE` short-circuits with no side effects; a
    /// `CREATE_CASE` action paired with a missing draft argument fails
    /// closed before any adapter call is made.
    pub async fn apply(
        &self,
        normalized_message: &NormalizedMessage,
        routing_decision: &RoutingDecision,
        attachments: &[AttachmentArtifact],
        request_info_draft: Option<&str>,
        reply_draft: Option<&str>,
    ) -> Result<CaseStageResult, CaseStageError> {
        let actions = &routing_decision.actions;
        let message_fingerprint = &normalized_message.message_fingerprint;
        let rule_id = &routing_decision.rule_id;
        let rule_version = &routing_decision.rule_version;

        if actions.iter().any(|a| a == "BLOCK_CASE_CREATE") {
            return Ok(CaseStageResult { case_id: None, blocked: true });
        }

        let create_case = actions.iter().any(|a| a == "CREATE_CASE");
        if create_case && actions.iter().any(|a| a == "ADD_REQUEST_INFO_DRAFT") && request_info_draft.is_none() {
            return Err(CaseStageError::MissingRequestInfoDraft);
        }
        if create_case && actions.iter().any(|a| a == "ADD_REPLY_DRAFT") && reply_draft.is_none() {
            return Err(CaseStageError::MissingReplyDraft);
        }

        let mut case_id = None;
        if create_case {
            let key = build_idempotency_key(message_fingerprint, rule_id, rule_version, "CREATE_CASE");
            case_id = Some(
                self.adapter
                    .create_case(&key, &routing_decision.queue_id, &normalized_message.subject)
                    .await,
            );
        }

        let Some(case_id) = case_id else {
            return Ok(CaseStageResult { case_id: None, blocked: false });
        };

        if actions.iter().any(|a| a == "ATTACH_ORIGINAL_EMAIL") {
            let key = build_idempotency_key(message_fingerprint, rule_id, rule_version, "ATTACH_ORIGINAL_EMAIL");
            self.adapter
                .attach_artifact(
                    &key,
                    &case_id,
                    CaseArtifact {
                        uri: normalized_message.raw_mime_uri.clone(),
                        sha256: normalized_message.raw_mime_sha256.clone(),
                        kind: "RAW_MIME".to_string(),
                        attachment_id: None,
                    },
                )
                .await;
        }

        if actions.iter().any(|a| a == "ATTACH_ALL_FILES") {
            for att in attachments {
                let key = build_idempotency_key(
                    message_fingerprint,
                    rule_id,
                    rule_version,
                    &format!("ATTACH:{}", att.attachment_id),
                );
                self.adapter
                    .attach_artifact(
                        &key,
                        &case_id,
                        CaseArtifact {
                            uri: att.extracted_text_uri.clone().unwrap_or_default(),
                            sha256: att.sha256.clone(),
                            kind: "ATTACHMENT".to_string(),
                            attachment_id: Some(att.attachment_id.clone()),
                        },
                    )
                    .await;
            }
        }

        if actions.iter().any(|a| a == "ADD_REQUEST_INFO_DRAFT") {
            let key = build_idempotency_key(message_fingerprint, rule_id, rule_version, "ADD_REQUEST_INFO_DRAFT");
            self.adapter.add_draft_message(&key, &case_id, request_info_draft.unwrap()).await;
        }

        if actions.iter().any(|a| a == "ADD_REPLY_DRAFT") {
            let key = build_idempotency_key(message_fingerprint, rule_id, rule_version, "ADD_REPLY_DRAFT");
            self.adapter.add_draft_message(&key, &case_id, reply_draft.unwrap()).await;
        }

        Ok(CaseStageResult { case_id: Some(case_id), blocked: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::InMemoryCaseAdapter;
    use uuid::Uuid;

    fn message() -> NormalizedMessage {
        NormalizedMessage {
            schema_id: "urn:ieim:schema:normalized_message:1.0.0".into(),
            schema_version: "1.0.0".into(),
            message_id: Uuid::nil(),
            run_id: "run-1".into(),
            ingested_at: "2026-01-01T00:00:00Z".into(),
            received_at: "2026-01-01T00:00:00Z".into(),
            ingestion_source: "test".into(),
            raw_mime_uri: "raw_store/mime/aa.eml".into(),
            raw_mime_sha256: "sha256:aa".into(),
            from_email: "a@example.com".into(),
            from_display_name: None,
            reply_to_email: None,
            to_emails: vec!["b@example.com".into()],
            cc_emails: vec![],
            subject: "Schaden melden".into(),
            subject_c14n: "schaden melden".into(),
            body_text: "body".into(),
            body_text_c14n: "body".into(),
            language: "de".into(),
            thread_keys: ieim_schema::ThreadKeys { internet_message_id: None, in_reply_to: None, conversation_id: None },
            attachment_ids: vec![],
            message_fingerprint: "fp-1".into(),
        }
    }

    fn routing(actions: Vec<&str>) -> RoutingDecision {
        RoutingDecision {
            schema_id: "urn:ieim:schema:routing_decision:1.0.0".into(),
            schema_version: "1.0.0".into(),
            message_id: Uuid::nil(),
            run_id: "run-1".into(),
            queue_id: "Q_GENERAL".into(),
            sla_id: "SLA_72H".into(),
            priority: 1,
            actions: actions.into_iter().map(String::from).collect(),
            rule_id: "ROUTE_FALLBACK".into(),
            rule_version: "1.0.0".into(),
            fail_closed: false,
            fail_closed_reason: None,
            decision_hash: "sha256:bb".into(),
        }
    }

    #[tokio::test]
    async fn block_case_create_short_circuits_with_no_case() {
        let adapter = InMemoryCaseAdapter::new();
        let stage = CaseStage { adapter: &adapter };
        let result = stage.apply(&message(), &routing(vec!["BLOCK_CASE_CREATE"]), &[], None, None).await.unwrap();
        assert!(result.blocked);
        assert!(result.case_id.is_none());
    }

    #[tokio::test]
    async fn create_case_without_required_draft_fails_closed() {
        let adapter = InMemoryCaseAdapter::new();
        let stage = CaseStage { adapter: &adapter };
        let err = stage
            .apply(&message(), &routing(vec!["CREATE_CASE", "ADD_REQUEST_INFO_DRAFT"]), &[], None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CaseStageError::MissingRequestInfoDraft));
    }

    #[tokio::test]
    async fn create_case_is_idempotent_on_repeated_apply() {
        let adapter = InMemoryCaseAdapter::new();
        let stage = CaseStage { adapter: &adapter };
        let decision = routing(vec!["CREATE_CASE", "ATTACH_ORIGINAL_EMAIL"]);
        let first = stage.apply(&message(), &decision, &[], None, None).await.unwrap();
        let second = stage.apply(&message(), &decision, &[], None, None).await.unwrap();
        assert_eq!(first.case_id, second.case_id);
        let case = adapter.get_case(first.case_id.as_deref().unwrap()).unwrap();
        assert_eq!(case.artifacts.len(), 1);
    }
}
