//! Candidate-to-publish orchestration
//!
//! One pipeline invocation shepherds a single candidate through policy
//! screening, audit, admission control and the retried remote call. Every
//! candidate leaves a draft row behind, whatever its fate. Publish
//! failures are terminal for the draft but never fatal to the process;
//! only shutdown cancellation propagates to the caller.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audit::{AuditStore, DraftKind};
use crate::backoff::{run_with_backoff, BackoffPolicy};
use crate::error::{QuillcastError, Result};
use crate::platform::{extract_message_id, PublishClient};
use crate::quota::{QuotaManager, Scope};
use crate::safety::SafetyFilter;
use crate::shutdown::Shutdown;

pub struct PostingPipeline {
    audit: AuditStore,
    quota: Arc<QuotaManager>,
    safety: SafetyFilter,
    client: Arc<dyn PublishClient>,
    backoff: BackoffPolicy,
    shutdown: Shutdown,
    dry_run: bool,
}

impl PostingPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        audit: AuditStore,
        quota: Arc<QuotaManager>,
        safety: SafetyFilter,
        client: Arc<dyn PublishClient>,
        backoff: BackoffPolicy,
        shutdown: Shutdown,
        dry_run: bool,
    ) -> Self {
        Self {
            audit,
            quota,
            safety,
            client,
            backoff,
            shutdown,
            dry_run,
        }
    }

    /// Publish an original post. Returns the remote message id on success,
    /// `None` for every audited non-success outcome.
    pub async fn publish_post(&self, text: &str, context: Option<&str>) -> Result<Option<String>> {
        self.run(
            text,
            context,
            DraftKind::Post,
            None,
            None,
            QuotaManager::post_scopes(),
        )
        .await
    }

    /// Publish a reply to `target_message_id`, attributed to `target_user`
    /// for per-user admission.
    pub async fn publish_reply(
        &self,
        text: &str,
        context: Option<&str>,
        target_message_id: &str,
        target_user: &str,
    ) -> Result<Option<String>> {
        self.run(
            text,
            context,
            DraftKind::Reply,
            Some(target_user),
            Some(target_message_id),
            QuotaManager::reply_scopes(target_user),
        )
        .await
    }

    async fn run(
        &self,
        text: &str,
        context: Option<&str>,
        kind: DraftKind,
        target_user: Option<&str>,
        reply_to: Option<&str>,
        scopes: Vec<Scope>,
    ) -> Result<Option<String>> {
        // Over-length candidates are shortened rather than rejected; the
        // policy check then runs against what would actually be sent.
        let text = self.safety.truncate(text);

        let verdict = self.safety.check(&text);
        if !verdict.passed {
            info!("Candidate rejected by policy: {}", verdict.reason);
            self.audit
                .create_rejected(&text, context, kind, target_user, &verdict.reason)
                .await?;
            return Ok(None);
        }

        let draft_id = self.audit.create(&text, context, kind, target_user).await?;
        debug!("Draft {} created ({})", draft_id, kind.as_str());

        if self.dry_run {
            info!("Dry run: would publish draft {}: {}", draft_id, text);
            return Ok(None);
        }

        let now = chrono::Utc::now().timestamp();
        if !self.quota.admit(&scopes, now).await {
            info!("Draft {} denied by quota", draft_id);
            self.audit.mark_failed(draft_id, "quota_denied").await?;
            return Ok(None);
        }

        let outcome = run_with_backoff(self.backoff, &self.shutdown, || {
            self.client.publish(&text, reply_to)
        })
        .await;

        match outcome {
            Ok(response) => match extract_message_id(&response) {
                Some(remote_id) => {
                    info!("Draft {} published as {}", draft_id, remote_id);
                    self.audit.mark_posted(draft_id, &remote_id).await?;
                    Ok(Some(remote_id))
                }
                None => {
                    warn!("Draft {} published but response carried no id", draft_id);
                    self.audit
                        .mark_failed(draft_id, "publish_failed: response carried no message id")
                        .await?;
                    Ok(None)
                }
            },
            // Shutdown interruption is not a posting failure: the draft
            // stays queued and the cancellation reaches the lifecycle owner.
            Err(QuillcastError::Cancelled) => Err(QuillcastError::Cancelled),
            Err(e) => {
                warn!("Draft {} failed to publish: {}", draft_id, e);
                self.audit
                    .mark_failed(draft_id, &format!("publish_failed: {}", e))
                    .await?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::DraftStatus;
    use crate::config::{QuotaConfig, SafetyConfig};
    use crate::error::PublishError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Scripted client: pops one result per call, then succeeds.
    struct MockClient {
        script: Mutex<VecDeque<std::result::Result<Value, PublishError>>>,
        calls: AtomicU32,
    }

    impl MockClient {
        fn succeeding() -> Self {
            Self::scripted(vec![])
        }

        fn scripted(script: Vec<std::result::Result<Value, PublishError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PublishClient for MockClient {
        async fn publish(
            &self,
            _text: &str,
            _reply_to: Option<&str>,
        ) -> std::result::Result<Value, PublishError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(json!({ "data": { "id": "msg-ok" } })))
        }
    }

    struct Harness {
        pipeline: PostingPipeline,
        audit: AuditStore,
        quota: Arc<QuotaManager>,
        client: Arc<MockClient>,
        shutdown: Shutdown,
        _dir: TempDir,
    }

    async fn harness(client: MockClient, dry_run: bool) -> Harness {
        harness_with_quota(client, dry_run, QuotaConfig::default()).await
    }

    async fn harness_with_quota(client: MockClient, dry_run: bool, limits: QuotaConfig) -> Harness {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("audit.db");
        let audit = AuditStore::new(db_path.to_str().unwrap()).await.unwrap();
        let quota = Arc::new(QuotaManager::new(limits));
        let client = Arc::new(client);
        let shutdown = Shutdown::new();

        let backoff = BackoffPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        };

        let pipeline = PostingPipeline::new(
            audit.clone(),
            quota.clone(),
            SafetyFilter::new(SafetyConfig::default()),
            client.clone(),
            backoff,
            shutdown.clone(),
            dry_run,
        );

        Harness {
            pipeline,
            audit,
            quota,
            client,
            shutdown,
            _dir: dir,
        }
    }

    async fn only_draft(audit: &AuditStore) -> crate::audit::Draft {
        audit.get(1).await.unwrap().expect("draft should exist")
    }

    #[tokio::test]
    async fn test_success_marks_posted_and_returns_id() {
        let h = harness(MockClient::succeeding(), false).await;

        let result = h.pipeline.publish_post("Nice block today.", None).await.unwrap();
        assert_eq!(result.as_deref(), Some("msg-ok"));

        let draft = only_draft(&h.audit).await;
        assert_eq!(draft.status, DraftStatus::Posted);
        assert_eq!(draft.remote_message_id.as_deref(), Some("msg-ok"));
        assert_eq!(h.client.calls(), 1);
    }

    #[tokio::test]
    async fn test_safety_rejection_is_audited_without_remote_call() {
        let h = harness(MockClient::succeeding(), false).await;

        let result = h
            .pipeline
            .publish_post("This coin is guaranteed profit!", None)
            .await
            .unwrap();
        assert!(result.is_none());

        let draft = only_draft(&h.audit).await;
        assert_eq!(draft.status, DraftStatus::Failed);
        assert!(draft.safety_flags.starts_with("forbidden_claim:"));
        assert_eq!(h.client.calls(), 0, "no remote call for rejected candidates");
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let h = harness(MockClient::succeeding(), true).await;

        let result = h.pipeline.publish_post("Quiet mempool.", None).await.unwrap();
        assert!(result.is_none());

        let draft = only_draft(&h.audit).await;
        assert_eq!(draft.status, DraftStatus::Queued, "dry run leaves the draft queued");
        assert_eq!(h.client.calls(), 0);

        let now = chrono::Utc::now().timestamp();
        assert_eq!(
            h.quota.window_count(&Scope::PostsPerDay, now).await,
            0,
            "dry run must not consume quota"
        );
        assert_eq!(h.quota.window_count(&Scope::WriteBudget, now).await, 0);
    }

    #[tokio::test]
    async fn test_quota_denial_marks_failed_without_remote_call() {
        let limits = QuotaConfig {
            posts_per_day: 1,
            ..QuotaConfig::default()
        };
        let h = harness_with_quota(MockClient::succeeding(), false, limits).await;

        assert!(h.pipeline.publish_post("first", None).await.unwrap().is_some());
        let result = h.pipeline.publish_post("second", None).await.unwrap();
        assert!(result.is_none());

        let denied = h.audit.get(2).await.unwrap().unwrap();
        assert_eq!(denied.status, DraftStatus::Failed);
        assert_eq!(denied.safety_flags, "quota_denied");
        assert_eq!(h.client.calls(), 1, "denied draft never reaches the client");
    }

    #[tokio::test]
    async fn test_fatal_publish_error_is_terminal_but_not_raised() {
        let h = harness(
            MockClient::scripted(vec![Err(PublishError::Fatal("403 forbidden".to_string()))]),
            false,
        )
        .await;

        let result = h.pipeline.publish_post("hello", None).await.unwrap();
        assert!(result.is_none(), "failure is swallowed at the pipeline boundary");

        let draft = only_draft(&h.audit).await;
        assert_eq!(draft.status, DraftStatus::Failed);
        assert!(draft.safety_flags.contains("403 forbidden"));
        assert_eq!(h.client.calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_retried_to_success() {
        let h = harness(
            MockClient::scripted(vec![
                Err(PublishError::RateLimited { retry_after: None }),
                Err(PublishError::RateLimited { retry_after: None }),
            ]),
            false,
        )
        .await;

        let result = h.pipeline.publish_post("persistent", None).await.unwrap();
        assert_eq!(result.as_deref(), Some("msg-ok"));
        assert_eq!(h.client.calls(), 3);

        let draft = only_draft(&h.audit).await;
        assert_eq!(draft.status, DraftStatus::Posted);
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_failed() {
        let h = harness(
            MockClient::scripted(vec![
                Err(PublishError::RateLimited { retry_after: None }),
                Err(PublishError::RateLimited { retry_after: None }),
                Err(PublishError::RateLimited { retry_after: None }),
            ]),
            false,
        )
        .await;

        let result = h.pipeline.publish_post("never lands", None).await.unwrap();
        assert!(result.is_none());
        // max_retries = 2 in the harness, so 3 attempts total.
        assert_eq!(h.client.calls(), 3);

        let draft = only_draft(&h.audit).await;
        assert_eq!(draft.status, DraftStatus::Failed);
        assert!(draft.safety_flags.contains("publish_failed"));
    }

    #[tokio::test]
    async fn test_shutdown_during_backoff_leaves_draft_queued() {
        let h = harness(
            MockClient::scripted(vec![Err(PublishError::RateLimited { retry_after: Some(60) })]),
            false,
        )
        .await;

        let waker = h.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waker.request();
        });

        let result = h.pipeline.publish_post("interrupted", None).await;
        assert!(matches!(result, Err(QuillcastError::Cancelled)));
        assert_eq!(h.client.calls(), 1, "no further attempts after shutdown");

        let draft = only_draft(&h.audit).await;
        assert_eq!(
            draft.status,
            DraftStatus::Queued,
            "cancellation is not a posting failure"
        );
    }

    #[tokio::test]
    async fn test_reply_consumes_per_user_scope() {
        let h = harness(MockClient::succeeding(), false).await;

        let result = h
            .pipeline
            .publish_reply("Thanks for the question!", None, "orig-1", "alice")
            .await
            .unwrap();
        assert!(result.is_some());

        let draft = only_draft(&h.audit).await;
        assert_eq!(draft.kind, DraftKind::Reply);
        assert_eq!(draft.target_user.as_deref(), Some("alice"));

        let now = chrono::Utc::now().timestamp();
        assert_eq!(
            h.quota
                .window_count(&Scope::RepliesPerUserPerHour("alice".to_string()), now)
                .await,
            1
        );
    }

    #[tokio::test]
    async fn test_over_length_candidate_is_truncated_not_rejected() {
        let h = harness(MockClient::succeeding(), false).await;

        let long = format!("{} tail that overflows the cap", "Solid upgrade. ".repeat(30));
        let result = h.pipeline.publish_post(&long, None).await.unwrap();
        assert!(result.is_some());

        let draft = only_draft(&h.audit).await;
        assert!(draft.text.chars().count() <= 280);
        assert_eq!(draft.status, DraftStatus::Posted);
    }
}
