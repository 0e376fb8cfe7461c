//! Predicates and mutations for the repository's conditional-update
//! primitive.
//!
//! Backends either evaluate these in-process under a per-row lock
//! ([`SendCondition::matches`], [`SendMutation::apply`]) or translate them
//! into a single guarded statement. Both paths must agree on semantics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::send::{SendRecord, SendState};
use crate::types::SendId;

/// The expected predicate a row must satisfy for a conditional update to
/// apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendCondition {
    /// The row's current state must be one of these.
    pub states: Vec<SendState>,
    /// When set, `downloads_remaining` must be strictly greater.
    pub downloads_remaining_above: Option<u32>,
    /// When set, `expires_at` must be strictly later.
    pub expires_after: Option<DateTime<Utc>>,
}

impl SendCondition {
    /// Match rows currently in exactly `state`.
    #[must_use]
    pub fn in_state(state: SendState) -> Self {
        Self {
            states: vec![state],
            downloads_remaining_above: None,
            expires_after: None,
        }
    }

    /// `state == active AND downloads_remaining > 0 AND expires_at > now`.
    #[must_use]
    pub fn claimable_at(now: DateTime<Utc>) -> Self {
        Self {
            states: vec![SendState::Active],
            downloads_remaining_above: Some(0),
            expires_after: Some(now),
        }
    }

    /// Evaluate the predicate against a row.
    #[must_use]
    pub fn matches(&self, record: &SendRecord) -> bool {
        self.states.contains(&record.state)
            && self
                .downloads_remaining_above
                .is_none_or(|floor| record.downloads_remaining > floor)
            && self
                .expires_after
                .is_none_or(|deadline| record.expires_at > deadline)
    }
}

/// The change applied by a conditional update once its predicate holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SendMutation {
    /// Decrement `downloads_remaining`, stamp `last_claimed_at`, and flip to
    /// `exhausted` when the count hits 0.
    ConsumeDownload { at: DateTime<Utc> },
    /// Move to the given state along a state-machine edge.
    Transition(SendState),
}

impl SendMutation {
    /// Reject mutations that can never be valid, whatever the row holds.
    pub fn validate(self) -> Result<(), CoreError> {
        match self {
            Self::Transition(SendState::Active) => Err(CoreError::Revival),
            Self::ConsumeDownload { .. } | Self::Transition(_) => Ok(()),
        }
    }

    /// States a row may be in for this mutation to be applicable at all.
    #[must_use]
    pub fn applicable_states(self) -> &'static [SendState] {
        match self {
            Self::ConsumeDownload { .. } => &[SendState::Active],
            Self::Transition(target) => SendState::sources_of(target),
        }
    }

    /// Apply the mutation to a row in place.
    pub fn apply(self, record: &mut SendRecord) -> Result<(), CoreError> {
        match self {
            Self::ConsumeDownload { at } => {
                if record.state != SendState::Active {
                    return Err(CoreError::InvalidTransition {
                        from: record.state,
                        to: SendState::Exhausted,
                    });
                }
                if record.downloads_remaining == 0 {
                    return Err(CoreError::NoDownloadsRemaining);
                }
                record.downloads_remaining -= 1;
                record.last_claimed_at = Some(at);
                if record.downloads_remaining == 0 {
                    record.state = SendState::Exhausted;
                }
                Ok(())
            }
            Self::Transition(target) => {
                if !record.state.can_transition_to(target) {
                    return Err(CoreError::InvalidTransition {
                        from: record.state,
                        to: target,
                    });
                }
                record.state = target;
                Ok(())
            }
        }
    }
}

/// Selection criteria for repository queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendFilter {
    /// Restrict to these states (empty means any state).
    pub states: Vec<SendState>,
    /// When set, only rows with `expires_at <= t`.
    pub expires_at_or_before: Option<DateTime<Utc>>,
    /// Maximum number of rows to return.
    pub limit: Option<usize>,
    /// Keyset cursor: only rows ordered strictly after `(expires_at, id)`.
    #[serde(default)]
    pub after: Option<(DateTime<Utc>, SendId)>,
}

impl SendFilter {
    #[must_use]
    pub fn in_states(states: impl Into<Vec<SendState>>) -> Self {
        Self {
            states: states.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn expired_by(mut self, now: DateTime<Utc>) -> Self {
        self.expires_at_or_before = Some(now);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Resume after the last row of a previous page. Results are ordered by
    /// `(expires_at, id)`, so this pages through a result set without
    /// revisiting rows.
    #[must_use]
    pub fn after(mut self, last: &SendRecord) -> Self {
        self.after = Some((last.expires_at, last.id.clone()));
        self
    }

    #[must_use]
    pub fn matches(&self, record: &SendRecord) -> bool {
        (self.states.is_empty() || self.states.contains(&record.state))
            && self
                .expires_at_or_before
                .is_none_or(|t| record.expires_at <= t)
            && self
                .after
                .as_ref()
                .is_none_or(|(at, id)| (record.expires_at, &record.id) > (*at, id))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::types::{BlobKey, SendId};

    fn record(max_downloads: u32) -> SendRecord {
        SendRecord::new(
            SendId::new("s"),
            BlobKey::new("b"),
            Utc::now(),
            Duration::seconds(30),
            max_downloads,
        )
    }

    #[test]
    fn claimable_condition_checks_all_three_clauses() {
        let now = Utc::now();
        let mut r = record(1);
        assert!(SendCondition::claimable_at(now).matches(&r));

        assert!(!SendCondition::claimable_at(r.expires_at).matches(&r));

        r.downloads_remaining = 0;
        assert!(!SendCondition::claimable_at(now).matches(&r));

        r.downloads_remaining = 1;
        r.state = SendState::Expired;
        assert!(!SendCondition::claimable_at(now).matches(&r));
    }

    #[test]
    fn consume_download_flips_to_exhausted_on_last() {
        let at = Utc::now();
        let consume = SendMutation::ConsumeDownload { at };
        let mut r = record(2);
        consume.apply(&mut r).unwrap();
        assert_eq!(r.downloads_remaining, 1);
        assert_eq!(r.state, SendState::Active);
        assert_eq!(r.last_claimed_at, Some(at));

        consume.apply(&mut r).unwrap();
        assert_eq!(r.downloads_remaining, 0);
        assert_eq!(r.state, SendState::Exhausted);

        let err = consume.apply(&mut r).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(r.downloads_remaining, 0);
    }

    #[test]
    fn transition_follows_edges() {
        let mut r = record(1);
        assert!(
            SendMutation::Transition(SendState::Deleted)
                .apply(&mut r)
                .is_err()
        );
        SendMutation::Transition(SendState::Expired)
            .apply(&mut r)
            .unwrap();
        SendMutation::Transition(SendState::Deleted)
            .apply(&mut r)
            .unwrap();
        assert_eq!(r.state, SendState::Deleted);
    }

    #[test]
    fn revival_is_rejected_up_front() {
        assert!(SendMutation::Transition(SendState::Active).validate().is_err());
        assert!(
            SendMutation::ConsumeDownload { at: Utc::now() }
                .validate()
                .is_ok()
        );
        assert!(SendMutation::Transition(SendState::Active)
            .applicable_states()
            .is_empty());
    }

    #[test]
    fn filter_matches_state_and_deadline() {
        let r = record(1);
        let now = Utc::now();
        assert!(SendFilter::default().matches(&r));
        assert!(SendFilter::in_states([SendState::Active]).matches(&r));
        assert!(!SendFilter::in_states([SendState::Exhausted]).matches(&r));
        assert!(!SendFilter::default().expired_by(now).matches(&r));
        assert!(SendFilter::default().expired_by(r.expires_at).matches(&r));
    }

    #[test]
    fn cursor_excludes_rows_up_to_the_last_seen() {
        let a = record(1);
        let mut b = record(1);
        b.id = SendId::new("t");
        b.expires_at = a.expires_at;
        let mut later = record(1);
        later.id = SendId::new("a");
        later.expires_at = a.expires_at + Duration::seconds(1);

        let filter = SendFilter::default().after(&a);
        assert!(!filter.matches(&a));
        assert!(filter.matches(&b), "same deadline, larger id");
        assert!(filter.matches(&later), "later deadline, any id");
        assert!(!SendFilter::default().after(&b).matches(&a));
    }
}
