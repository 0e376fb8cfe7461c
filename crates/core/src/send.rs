use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{BlobKey, SendId};

/// Lifecycle position of a send record.
///
/// ```text
/// active --last claim--> exhausted --sweep--> expired --blob gone--> deleted
/// active --sweep (past expiry)--------------> expired --blob gone--> deleted
/// ```
///
/// `expired` marks a record that is logically gone but whose blob has not
/// yet been confirmed absent. `deleted` is a terminal tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendState {
    Active,
    Exhausted,
    Expired,
    Deleted,
}

impl SendState {
    /// All states, in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Active, Self::Exhausted, Self::Expired, Self::Deleted];

    /// Return the lowercase storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Exhausted => "exhausted",
            Self::Expired => "expired",
            Self::Deleted => "deleted",
        }
    }

    /// States from which `target` can be entered.
    #[must_use]
    pub fn sources_of(target: Self) -> &'static [Self] {
        match target {
            Self::Active => &[],
            Self::Exhausted => &[Self::Active],
            Self::Expired => &[Self::Active, Self::Exhausted],
            Self::Deleted => &[Self::Expired],
        }
    }

    /// Whether `self -> next` is an edge of the state machine.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        Self::sources_of(next).contains(&self)
    }

    /// Whether the state is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Deleted
    }
}

impl fmt::Display for SendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SendState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "exhausted" => Ok(Self::Exhausted),
            "expired" => Ok(Self::Expired),
            "deleted" => Ok(Self::Deleted),
            other => Err(CoreError::UnknownState(other.to_owned())),
        }
    }
}

/// What the payload of a send represents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendKind {
    /// An uploaded file, served as an attachment.
    #[default]
    File,
    /// A text snippet, served as `text/plain`.
    Text,
}

impl SendKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for SendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SendKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "text" => Ok(Self::Text),
            other => Err(CoreError::UnknownKind(other.to_owned())),
        }
    }
}

/// Metadata for one shareable upload.
///
/// The record exclusively owns `blob_key` until it reaches
/// [`SendState::Deleted`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRecord {
    /// Identifier used in the share link. Never reissued.
    pub id: SendId,
    /// Blob store key of the payload.
    pub blob_key: BlobKey,
    /// Payload kind.
    #[serde(default)]
    pub kind: SendKind,
    /// Original filename, if the uploader supplied one.
    pub filename: Option<String>,
    /// MIME content type of the payload.
    pub content_type: Option<String>,
    /// Argon2 PHC string when the send is password protected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    /// Size of the payload in bytes.
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    /// When the most recent successful claim committed.
    #[serde(default)]
    pub last_claimed_at: Option<DateTime<Utc>>,
    /// The record is unusable once `now >= expires_at`.
    pub expires_at: DateTime<Utc>,
    pub max_downloads: u32,
    /// `0 <= downloads_remaining <= max_downloads`.
    pub downloads_remaining: u32,
    pub state: SendState,
}

impl SendRecord {
    /// Build a fresh `active` record expiring `ttl` after `now`.
    #[must_use]
    pub fn new(
        id: SendId,
        blob_key: BlobKey,
        now: DateTime<Utc>,
        ttl: Duration,
        max_downloads: u32,
    ) -> Self {
        Self {
            id,
            blob_key,
            kind: SendKind::File,
            filename: None,
            content_type: None,
            password_hash: None,
            size_bytes: 0,
            created_at: now,
            last_claimed_at: None,
            expires_at: now + ttl,
            max_downloads,
            downloads_remaining: max_downloads,
            state: SendState::Active,
        }
    }

    /// Whether the expiry deadline has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether a claim issued at `now` could succeed.
    #[must_use]
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.state == SendState::Active && self.downloads_remaining > 0 && !self.is_expired_at(now)
    }

    /// Whether the sweeper should retire or finish reclaiming this record.
    #[must_use]
    pub fn is_reclaimable_at(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            SendState::Active => self.is_expired_at(now),
            SendState::Exhausted | SendState::Expired => true,
            SendState::Deleted => false,
        }
    }

    /// Whether a password is needed to download this send.
    #[must_use]
    pub fn is_password_protected(&self) -> bool {
        self.password_hash.is_some()
    }

    /// Whether a claim committed within `grace` before `now`, meaning its
    /// caller may still be reading the blob.
    #[must_use]
    pub fn claimed_within(&self, grace: Duration, now: DateTime<Utc>) -> bool {
        self.last_claimed_at.is_some_and(|at| now - at < grace)
    }

    /// Number of successful downloads so far.
    #[must_use]
    pub fn downloads_used(&self) -> u32 {
        self.max_downloads - self.downloads_remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(now: DateTime<Utc>) -> SendRecord {
        SendRecord::new(
            SendId::new("s1"),
            BlobKey::new("b1"),
            now,
            Duration::seconds(60),
            3,
        )
    }

    #[test]
    fn state_string_roundtrip() {
        for state in SendState::ALL {
            assert_eq!(state.as_str().parse::<SendState>().unwrap(), state);
        }
        assert!(matches!(
            "zombie".parse::<SendState>(),
            Err(CoreError::UnknownState(_))
        ));
    }

    #[test]
    fn transition_edges() {
        use SendState::{Active, Deleted, Exhausted, Expired};
        assert!(Active.can_transition_to(Exhausted));
        assert!(Active.can_transition_to(Expired));
        assert!(Exhausted.can_transition_to(Expired));
        assert!(Expired.can_transition_to(Deleted));

        assert!(!Active.can_transition_to(Deleted));
        assert!(!Deleted.can_transition_to(Active));
        assert!(!Expired.can_transition_to(Active));
        assert!(!Exhausted.can_transition_to(Active));
        assert!(Deleted.is_terminal());
    }

    #[test]
    fn new_record_is_active_and_full() {
        let now = Utc::now();
        let r = record(now);
        assert_eq!(r.state, SendState::Active);
        assert_eq!(r.downloads_remaining, 3);
        assert_eq!(r.downloads_used(), 0);
        assert_eq!(r.expires_at, now + Duration::seconds(60));
        assert!(r.is_claimable_at(now));
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let now = Utc::now();
        let r = record(now);
        assert!(!r.is_expired_at(r.expires_at - Duration::milliseconds(1)));
        assert!(r.is_expired_at(r.expires_at));
        assert!(!r.is_claimable_at(r.expires_at));
    }

    #[test]
    fn reclaimable_predicate() {
        let now = Utc::now();
        let mut r = record(now);
        assert!(!r.is_reclaimable_at(now));
        assert!(r.is_reclaimable_at(r.expires_at));

        r.state = SendState::Exhausted;
        assert!(r.is_reclaimable_at(now));
        r.state = SendState::Expired;
        assert!(r.is_reclaimable_at(now));
        r.state = SendState::Deleted;
        assert!(!r.is_reclaimable_at(r.expires_at));
    }

    #[test]
    fn claimed_within_grace() {
        let now = Utc::now();
        let mut r = record(now);
        assert!(!r.claimed_within(Duration::seconds(30), now));
        r.last_claimed_at = Some(now - Duration::seconds(10));
        assert!(r.claimed_within(Duration::seconds(30), now));
        assert!(!r.claimed_within(Duration::seconds(5), now));
    }

    #[test]
    fn kind_parses() {
        assert_eq!("text".parse::<SendKind>().unwrap(), SendKind::Text);
        assert_eq!(SendKind::default(), SendKind::File);
        assert!("video".parse::<SendKind>().is_err());
    }
}
