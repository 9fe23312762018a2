//! Content policy screening
//!
//! Pure checks over candidate text, no side effects. Verdict reasons are
//! short machine-readable tags so they can be stored in the audit trail
//! and analyzed later.

use crate::config::SafetyConfig;

/// Outcome of a policy check. `reason` is empty when the check passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub passed: bool,
    pub reason: String,
}

impl Verdict {
    fn pass() -> Self {
        Self {
            passed: true,
            reason: String::new(),
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }
}

pub struct SafetyFilter {
    config: SafetyConfig,
}

impl SafetyFilter {
    pub fn new(config: SafetyConfig) -> Self {
        Self { config }
    }

    /// Check `text` against the policy. Reasons are tags: `empty`,
    /// `too_long`, `forbidden_claim:<pattern>`, `missing_disclaimer`.
    pub fn check(&self, text: &str) -> Verdict {
        if text.trim().is_empty() {
            return Verdict::reject("empty");
        }

        if text.chars().count() > self.config.max_length {
            return Verdict::reject("too_long");
        }

        let lowered = text.to_lowercase();
        for pattern in &self.config.forbidden_patterns {
            if lowered.contains(&pattern.to_lowercase()) {
                return Verdict::reject(format!("forbidden_claim:{}", pattern));
            }
        }

        let references_outcomes = self
            .config
            .investment_terms
            .iter()
            .any(|term| lowered.contains(&term.to_lowercase()));
        if references_outcomes && !lowered.contains(&self.config.disclaimer.to_lowercase()) {
            return Verdict::reject("missing_disclaimer");
        }

        Verdict::pass()
    }

    /// Shorten `text` to at most `max_length` characters.
    ///
    /// Prefers cutting at the last sentence boundary within the cap, falling
    /// back to a hard cut plus an ellipsis when no boundary leaves at least
    /// half the cap's worth of content. Operates on characters, never bytes,
    /// so multi-byte text is never split mid-scalar.
    pub fn truncate(&self, text: &str) -> String {
        let cap = self.config.max_length;
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= cap {
            return text.to_string();
        }

        let window = &chars[..cap];
        let boundary = window
            .iter()
            .rposition(|c| matches!(c, '.' | '!' | '?'))
            .filter(|&i| i + 1 >= cap / 2);

        match boundary {
            Some(i) => window[..=i].iter().collect(),
            None => {
                let mut cut: String = chars[..cap - 1].iter().collect();
                cut.push('…');
                cut
            }
        }
    }
}
