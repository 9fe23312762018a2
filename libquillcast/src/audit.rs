//! Draft audit trail
//!
//! Every candidate message gets exactly one row here before any remote
//! call, and the row is never deleted. Status transitions are one-way:
//! queued moves to posted or failed once, and terminal rows are immutable.
//! The quota windows are reconstructed from posted rows at startup, so
//! this table is also the durable half of admission control.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;
use tracing::warn;

use crate::error::{DbError, Result};
use crate::quota::RecordedWrite;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftStatus {
    Queued,
    Posted,
    Failed,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Queued => "queued",
            DraftStatus::Posted => "posted",
            DraftStatus::Failed => "failed",
        }
    }

    fn from_db(s: &str) -> Self {
        match s {
            "posted" => DraftStatus::Posted,
            "failed" => DraftStatus::Failed,
            _ => DraftStatus::Queued,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftKind {
    Post,
    Reply,
}

impl DraftKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftKind::Post => "post",
            DraftKind::Reply => "reply",
        }
    }

    fn from_db(s: &str) -> Self {
        match s {
            "reply" => DraftKind::Reply,
            _ => DraftKind::Post,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Draft {
    pub id: i64,
    pub text: String,
    pub context: Option<String>,
    pub kind: DraftKind,
    pub target_user: Option<String>,
    pub status: DraftStatus,
    /// Rejection or failure reason tag; empty when nothing went wrong.
    pub safety_flags: String,
    pub remote_message_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Clone)]
pub struct AuditStore {
    pool: SqlitePool,
}

impl AuditStore {
    /// Open (creating if needed) the audit database at `db_path` and run
    /// pending migrations.
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Forward slashes for the SQLite URL; mode=rwc creates the file.
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// Create a queued draft and return its id.
    pub async fn create(
        &self,
        text: &str,
        context: Option<&str>,
        kind: DraftKind,
        target_user: Option<&str>,
    ) -> Result<i64> {
        self.insert(text, context, kind, target_user, DraftStatus::Queued, "")
            .await
    }

    /// Create a draft already in the failed state, recording a policy
    /// rejection. Rejected candidates are audited like everything else.
    pub async fn create_rejected(
        &self,
        text: &str,
        context: Option<&str>,
        kind: DraftKind,
        target_user: Option<&str>,
        reason: &str,
    ) -> Result<i64> {
        self.insert(text, context, kind, target_user, DraftStatus::Failed, reason)
            .await
    }

    async fn insert(
        &self,
        text: &str,
        context: Option<&str>,
        kind: DraftKind,
        target_user: Option<&str>,
        status: DraftStatus,
        safety_flags: &str,
    ) -> Result<i64> {
        let now = now_unix();

        let result = sqlx::query(
            r#"
            INSERT INTO drafts (text, context, kind, target_user, status, safety_flags, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(text)
        .bind(context)
        .bind(kind.as_str())
        .bind(target_user)
        .bind(status.as_str())
        .bind(safety_flags)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    /// Transition a queued draft to posted, recording the remote message id.
    ///
    /// Returns whether the transition applied. A draft already in a terminal
    /// state is left untouched and reported as false, so a double call can
    /// never overwrite the stored id.
    pub async fn mark_posted(&self, draft_id: i64, remote_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE drafts
            SET status = 'posted', remote_message_id = ?, updated_at = ?
            WHERE id = ? AND status = 'queued'
            "#,
        )
        .bind(remote_id)
        .bind(now_unix())
        .bind(draft_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let applied = result.rows_affected() > 0;
        if !applied {
            warn!("mark_posted on draft {} ignored: not in queued state", draft_id);
        }
        Ok(applied)
    }

    /// Transition a queued draft to failed with a reason tag. Same terminal
    /// guard as [`mark_posted`](Self::mark_posted).
    pub async fn mark_failed(&self, draft_id: i64, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE drafts
            SET status = 'failed', safety_flags = ?, updated_at = ?
            WHERE id = ? AND status = 'queued'
            "#,
        )
        .bind(reason)
        .bind(now_unix())
        .bind(draft_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let applied = result.rows_affected() > 0;
        if !applied {
            warn!("mark_failed on draft {} ignored: not in queued state", draft_id);
        }
        Ok(applied)
    }

    /// Fetch a draft by id.
    pub async fn get(&self, draft_id: i64) -> Result<Option<Draft>> {
        let row = sqlx::query(
            r#"
            SELECT id, text, context, kind, target_user, status, safety_flags,
                   remote_message_id, created_at, updated_at
            FROM drafts WHERE id = ?
            "#,
        )
        .bind(draft_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| Draft {
            id: r.get("id"),
            text: r.get("text"),
            context: r.get("context"),
            kind: DraftKind::from_db(&r.get::<String, _>("kind")),
            target_user: r.get("target_user"),
            status: DraftStatus::from_db(&r.get::<String, _>("status")),
            safety_flags: r.get("safety_flags"),
            remote_message_id: r.get("remote_message_id"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }

    /// Posted writes with updated_at >= `since`, oldest first, in the shape
    /// the quota manager preloads from.
    pub async fn posted_writes_since(&self, since: i64) -> Result<Vec<RecordedWrite>> {
        let rows = sqlx::query(
            r#"
            SELECT kind, target_user, updated_at
            FROM drafts
            WHERE status = 'posted' AND updated_at >= ?
            ORDER BY updated_at ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| RecordedWrite {
                timestamp: r.get("updated_at"),
                is_reply: r.get::<String, _>("kind") == "reply",
                target_user: r.get("target_user"),
            })
            .collect())
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (AuditStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("audit.db");
        let store = AuditStore::new(db_path.to_str().unwrap()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_create_returns_sequential_ids() {
        let (store, _dir) = test_store().await;

        let first = store.create("one", None, DraftKind::Post, None).await.unwrap();
        let second = store.create("two", None, DraftKind::Post, None).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_created_draft_is_queued() {
        let (store, _dir) = test_store().await;

        let id = store
            .create("hello", Some("ctx"), DraftKind::Reply, Some("alice"))
            .await
            .unwrap();
        let draft = store.get(id).await.unwrap().unwrap();

        assert_eq!(draft.status, DraftStatus::Queued);
        assert_eq!(draft.text, "hello");
        assert_eq!(draft.context.as_deref(), Some("ctx"));
        assert_eq!(draft.kind, DraftKind::Reply);
        assert_eq!(draft.target_user.as_deref(), Some("alice"));
        assert!(draft.safety_flags.is_empty());
        assert!(draft.remote_message_id.is_none());
    }

    #[tokio::test]
    async fn test_mark_posted_round_trip() {
        let (store, _dir) = test_store().await;

        let id = store.create("hello", None, DraftKind::Post, None).await.unwrap();
        assert!(store.mark_posted(id, "remote-123").await.unwrap());

        let draft = store.get(id).await.unwrap().unwrap();
        assert_eq!(draft.status, DraftStatus::Posted);
        assert_eq!(draft.remote_message_id.as_deref(), Some("remote-123"));
    }

    #[tokio::test]
    async fn test_mark_failed_round_trip() {
        let (store, _dir) = test_store().await;

        let id = store.create("hello", None, DraftKind::Post, None).await.unwrap();
        assert!(store.mark_failed(id, "quota_denied").await.unwrap());

        let draft = store.get(id).await.unwrap().unwrap();
        assert_eq!(draft.status, DraftStatus::Failed);
        assert_eq!(draft.safety_flags, "quota_denied");
        assert!(draft.remote_message_id.is_none());
    }

    #[tokio::test]
    async fn test_terminal_transitions_are_idempotent() {
        let (store, _dir) = test_store().await;

        let id = store.create("hello", None, DraftKind::Post, None).await.unwrap();
        assert!(store.mark_posted(id, "remote-1").await.unwrap());

        // Neither a second mark_posted nor a late mark_failed touches the row.
        assert!(!store.mark_posted(id, "remote-2").await.unwrap());
        assert!(!store.mark_failed(id, "late failure").await.unwrap());

        let draft = store.get(id).await.unwrap().unwrap();
        assert_eq!(draft.status, DraftStatus::Posted);
        assert_eq!(draft.remote_message_id.as_deref(), Some("remote-1"));
    }

    #[tokio::test]
    async fn test_create_rejected_is_terminal() {
        let (store, _dir) = test_store().await;

        let id = store
            .create_rejected("bad text", None, DraftKind::Post, None, "forbidden_claim:100x")
            .await
            .unwrap();
        let draft = store.get(id).await.unwrap().unwrap();

        assert_eq!(draft.status, DraftStatus::Failed);
        assert_eq!(draft.safety_flags, "forbidden_claim:100x");
        assert!(!store.mark_posted(id, "remote-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_posted_writes_since_filters_status() {
        let (store, _dir) = test_store().await;

        let posted = store
            .create("reply text", None, DraftKind::Reply, Some("alice"))
            .await
            .unwrap();
        store.mark_posted(posted, "remote-1").await.unwrap();

        let failed = store.create("other", None, DraftKind::Post, None).await.unwrap();
        store.mark_failed(failed, "quota_denied").await.unwrap();

        // Still queued, must not count either.
        store.create("pending", None, DraftKind::Post, None).await.unwrap();

        let writes = store.posted_writes_since(0).await.unwrap();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].is_reply);
        assert_eq!(writes[0].target_user.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_audit_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("audit.db");
        let path_str = db_path.to_str().unwrap();

        let id = {
            let store = AuditStore::new(path_str).await.unwrap();
            let id = store.create("persisted", None, DraftKind::Post, None).await.unwrap();
            store.mark_posted(id, "remote-9").await.unwrap();
            id
        };

        let reopened = AuditStore::new(path_str).await.unwrap();
        let draft = reopened.get(id).await.unwrap().unwrap();
        assert_eq!(draft.status, DraftStatus::Posted);
        assert_eq!(draft.remote_message_id.as_deref(), Some("remote-9"));
        assert_eq!(reopened.posted_writes_since(0).await.unwrap().len(), 1);
    }
}
