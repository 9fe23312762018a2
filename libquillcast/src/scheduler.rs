//! Periodic trigger loops
//!
//! Two independent cadences run concurrently against the shared pipeline:
//! original posts on a multi-hour interval and reply sweeps on a short
//! poll. Both add random jitter so the account does not tick like a
//! metronome, and both sleep through the interruptible shutdown handle.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SchedulingConfig;
use crate::error::{QuillcastError, Result};
use crate::pipeline::PostingPipeline;
use crate::shutdown::Shutdown;

/// A reply the content source wants sent.
#[derive(Debug, Clone)]
pub struct ReplyCandidate {
    pub text: String,
    pub context: Option<String>,
    pub target_message_id: String,
    pub target_user: String,
}

/// Supplies candidate text to the scheduler. The pipeline only needs a
/// bounded string; where the text comes from (a generator, a queue, a
/// file) is this trait's business.
#[async_trait::async_trait]
pub trait ContentSource: Send + Sync {
    /// Next original post, or `None` when nothing is ready this cycle.
    async fn next_post(&self) -> Result<Option<String>>;

    /// Replies waiting to be sent, oldest first.
    async fn pending_replies(&self) -> Result<Vec<ReplyCandidate>>;
}

pub struct Scheduler {
    pipeline: Arc<PostingPipeline>,
    source: Arc<dyn ContentSource>,
    config: SchedulingConfig,
    shutdown: Shutdown,
}

impl Scheduler {
    pub fn new(
        pipeline: Arc<PostingPipeline>,
        source: Arc<dyn ContentSource>,
        config: SchedulingConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            pipeline,
            source,
            config,
            shutdown,
        }
    }

    /// Run both trigger loops until shutdown is requested.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Scheduler starting: posts every {}h (±{}s), reply poll every {}m (±{}s)",
            self.config.post_interval_hours,
            self.config.post_jitter_seconds,
            self.config.mention_poll_minutes,
            self.config.mention_jitter_seconds
        );

        tokio::join!(self.post_loop(), self.reply_loop());

        info!("Scheduler stopped");
        Ok(())
    }

    async fn post_loop(&self) {
        while !self.shutdown.is_requested() {
            if let Err(e) = self.post_once().await {
                if matches!(e, QuillcastError::Cancelled) {
                    break;
                }
                warn!("Post cycle failed: {}", e);
            }

            let interval = Duration::from_secs(self.config.post_interval_hours * 3600)
                + jitter(self.config.post_jitter_seconds);
            debug!("Next post cycle in {:?}", interval);
            if !self.shutdown.sleep(interval).await {
                break;
            }
        }
    }

    async fn reply_loop(&self) {
        while !self.shutdown.is_requested() {
            if let Err(e) = self.replies_once().await {
                if matches!(e, QuillcastError::Cancelled) {
                    break;
                }
                warn!("Reply sweep failed: {}", e);
            }

            let interval = Duration::from_secs(self.config.mention_poll_minutes * 60)
                + jitter(self.config.mention_jitter_seconds);
            if !self.shutdown.sleep(interval).await {
                break;
            }
        }
    }

    async fn post_once(&self) -> Result<()> {
        match self.source.next_post().await? {
            Some(text) => {
                self.pipeline.publish_post(&text, None).await?;
            }
            None => debug!("Content source had no post this cycle"),
        }
        Ok(())
    }

    async fn replies_once(&self) -> Result<()> {
        for candidate in self.source.pending_replies().await? {
            if self.shutdown.is_requested() {
                return Err(QuillcastError::Cancelled);
            }
            self.pipeline
                .publish_reply(
                    &candidate.text,
                    candidate.context.as_deref(),
                    &candidate.target_message_id,
                    &candidate.target_user,
                )
                .await?;
        }
        Ok(())
    }
}

fn jitter(max_seconds: u64) -> Duration {
    if max_seconds == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs(rand::thread_rng().gen_range(0..=max_seconds))
}
