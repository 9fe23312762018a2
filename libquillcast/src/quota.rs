//! Rolling-window admission control
//!
//! Tracks per-scope sliding windows (not fixed buckets, to avoid
//! burst-at-boundary artifacts) and admits or denies a publish attempt
//! before any network call is made. Admission across all of a candidate's
//! scopes is all-or-nothing: either every scope has room and every scope
//! records the event, or nothing is recorded.

use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::QuotaConfig;

const HOUR_SECS: i64 = 3600;
const DAY_SECS: i64 = 86400;

/// A named rolling-window counter a candidate event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    PostsPerDay,
    RepliesPerDay,
    GlobalRepliesPerHour,
    RepliesPerUserPerHour(String),
    /// Rolling multi-day write budget shared by posts and replies.
    WriteBudget,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::PostsPerDay => write!(f, "posts-per-day"),
            Scope::RepliesPerDay => write!(f, "replies-per-day"),
            Scope::GlobalRepliesPerHour => write!(f, "global-replies-per-hour"),
            Scope::RepliesPerUserPerHour(user) => write!(f, "replies-per-user-per-hour:{}", user),
            Scope::WriteBudget => write!(f, "write-budget"),
        }
    }
}

/// A posted write reconstructed from the audit trail, used to seed the
/// windows at startup.
#[derive(Debug, Clone)]
pub struct RecordedWrite {
    pub timestamp: i64,
    pub is_reply: bool,
    pub target_user: Option<String>,
}

pub struct QuotaManager {
    limits: QuotaConfig,
    windows: Mutex<HashMap<Scope, VecDeque<i64>>>,
}

impl QuotaManager {
    pub fn new(limits: QuotaConfig) -> Self {
        Self {
            limits,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Scopes checked for an original post.
    pub fn post_scopes() -> Vec<Scope> {
        vec![Scope::PostsPerDay, Scope::WriteBudget]
    }

    /// Scopes checked for a reply to `user`.
    pub fn reply_scopes(user: &str) -> Vec<Scope> {
        vec![
            Scope::RepliesPerDay,
            Scope::GlobalRepliesPerHour,
            Scope::RepliesPerUserPerHour(user.to_string()),
            Scope::WriteBudget,
        ]
    }

    fn bounds(&self, scope: &Scope) -> (i64, u32) {
        match scope {
            Scope::PostsPerDay => (DAY_SECS, self.limits.posts_per_day),
            Scope::RepliesPerDay => (DAY_SECS, self.limits.replies_per_day),
            Scope::GlobalRepliesPerHour => (HOUR_SECS, self.limits.global_replies_per_hour),
            Scope::RepliesPerUserPerHour(_) => {
                (HOUR_SECS, self.limits.replies_per_user_per_hour)
            }
            Scope::WriteBudget => (
                i64::from(self.limits.write_budget_days) * DAY_SECS,
                self.limits.write_budget,
            ),
        }
    }

    /// Atomically check every scope against its ceiling and, if all pass,
    /// record the event in every scope. Returns false (recording nothing)
    /// if any scope is at its ceiling.
    pub async fn admit(&self, scopes: &[Scope], now: i64) -> bool {
        let mut windows = self.windows.lock().await;

        for scope in scopes {
            let (window, ceiling) = self.bounds(scope);
            let events = windows.entry(scope.clone()).or_default();
            evict(events, now - window);
            if events.len() as u32 >= ceiling {
                debug!("Admission denied: scope {} at ceiling {}", scope, ceiling);
                return false;
            }
        }

        for scope in scopes {
            if let Some(events) = windows.get_mut(scope) {
                events.push_back(now);
            }
        }
        true
    }

    /// Current count for a scope at `now`, after eviction. Mainly for
    /// diagnostics and tests.
    pub async fn window_count(&self, scope: &Scope, now: i64) -> u32 {
        let mut windows = self.windows.lock().await;
        let (window, _) = self.bounds(scope);
        match windows.get_mut(scope) {
            Some(events) => {
                evict(events, now - window);
                events.len() as u32
            }
            None => 0,
        }
    }

    /// Seed the windows from posted audit records at startup. Each write
    /// lands in the same scope set `admit` would have recorded it in.
    pub async fn preload(&self, writes: &[RecordedWrite]) {
        let mut sorted: Vec<&RecordedWrite> = writes.iter().collect();
        sorted.sort_by_key(|w| w.timestamp);

        let mut windows = self.windows.lock().await;
        for write in sorted {
            let scopes = if write.is_reply {
                match &write.target_user {
                    Some(user) => Self::reply_scopes(user),
                    None => vec![Scope::RepliesPerDay, Scope::GlobalRepliesPerHour, Scope::WriteBudget],
                }
            } else {
                Self::post_scopes()
            };
            for scope in scopes {
                windows.entry(scope).or_default().push_back(write.timestamp);
            }
        }
    }
}

/// Drop events that have slid out of the window.
fn evict(events: &mut VecDeque<i64>, cutoff: i64) {
    while events.front().is_some_and(|&ts| ts < cutoff) {
        events.pop_front();
    }
}
