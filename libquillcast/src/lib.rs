//! Quillcast - admission-controlled publishing for social accounts
//!
//! This library provides the core pipeline for posting to a social
//! platform under content policy, rolling quota ceilings, and bounded
//! retry, with a durable audit trail for every candidate message.

pub mod audit;
pub mod backoff;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod platform;
pub mod quota;
pub mod safety;
pub mod scheduler;
pub mod shutdown;

// Re-export commonly used types
pub use audit::{AuditStore, Draft, DraftKind, DraftStatus};
pub use backoff::{run_with_backoff, BackoffPolicy};
pub use config::Config;
pub use error::{PublishError, QuillcastError, Result};
pub use pipeline::PostingPipeline;
pub use platform::{NullClient, PublishClient, XApiClient};
pub use quota::{QuotaManager, Scope};
pub use safety::{SafetyFilter, Verdict};
pub use scheduler::{ContentSource, ReplyCandidate, Scheduler};
pub use shutdown::Shutdown;
