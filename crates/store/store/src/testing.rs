use chrono::{DateTime, Duration, Utc};

use ephemera_core::{
    BlobKey, SendCondition, SendFilter, SendId, SendKind, SendMutation, SendRecord, SendState,
};

use crate::error::RepositoryError;
use crate::repository::SendRepository;

/// Build an `active` record with a fresh id for tests.
#[must_use]
pub fn sample_record(now: DateTime<Utc>, ttl: Duration, max_downloads: u32) -> SendRecord {
    let mut record = SendRecord::new(
        SendId::generate(),
        BlobKey::generate(),
        now,
        ttl,
        max_downloads,
    );
    record.filename = Some("report.pdf".to_owned());
    record.content_type = Some("application/pdf".to_owned());
    record.size_bytes = 1024;
    record
}

/// Run the full repository conformance test suite.
///
/// Call this from your backend's test module with a fresh repository.
/// Every test uses freshly generated ids, so the suite can share a
/// database with other data.
///
/// # Errors
///
/// Returns an error if any backend operation fails.
pub async fn run_repository_conformance_tests(
    repo: &dyn SendRepository,
) -> Result<(), RepositoryError> {
    test_insert_and_get(repo).await?;
    test_get_missing(repo).await?;
    test_duplicate_insert(repo).await?;
    test_consume_until_exhausted(repo).await?;
    test_condition_rejects_expired(repo).await?;
    test_transition_requires_observed_state(repo).await?;
    test_invalid_edges_affect_nothing(repo).await?;
    test_revival_is_rejected(repo).await?;
    test_tombstone_blocks_reuse(repo).await?;
    test_query_filters(repo).await?;
    test_keyset_paging(repo).await?;
    test_remove(repo).await?;
    test_concurrent_last_download(repo).await?;
    Ok(())
}

async fn test_insert_and_get(repo: &dyn SendRepository) -> Result<(), RepositoryError> {
    let mut record = sample_record(Utc::now(), Duration::seconds(60), 2);
    record.kind = SendKind::Text;
    record.password_hash = Some("$argon2id$fake".to_owned());
    repo.insert(&record).await?;

    let fetched = repo.get(&record.id).await?.expect("record should exist");
    assert_eq!(fetched.id, record.id);
    assert_eq!(fetched.blob_key, record.blob_key);
    assert_eq!(fetched.kind, SendKind::Text);
    assert_eq!(fetched.filename, record.filename);
    assert_eq!(fetched.content_type, record.content_type);
    assert_eq!(fetched.password_hash, record.password_hash);
    assert_eq!(fetched.size_bytes, 1024);
    assert_eq!(fetched.max_downloads, 2);
    assert_eq!(fetched.downloads_remaining, 2);
    assert_eq!(fetched.state, SendState::Active);
    assert_eq!(
        fetched.expires_at.timestamp_millis(),
        record.expires_at.timestamp_millis()
    );
    Ok(())
}

async fn test_get_missing(repo: &dyn SendRepository) -> Result<(), RepositoryError> {
    assert!(repo.get(&SendId::generate()).await?.is_none());
    Ok(())
}

async fn test_duplicate_insert(repo: &dyn SendRepository) -> Result<(), RepositoryError> {
    let record = sample_record(Utc::now(), Duration::seconds(60), 1);
    repo.insert(&record).await?;
    let err = repo.insert(&record).await.expect_err("duplicate must fail");
    assert!(
        matches!(err, RepositoryError::DuplicateId(_)),
        "expected DuplicateId, got {err:?}"
    );
    Ok(())
}

async fn test_consume_until_exhausted(repo: &dyn SendRepository) -> Result<(), RepositoryError> {
    let record = sample_record(Utc::now(), Duration::seconds(60), 2);
    repo.insert(&record).await?;

    let after = repo
        .conditional_update(
            &record.id,
            &SendCondition::claimable_at(Utc::now()),
            SendMutation::ConsumeDownload { at: Utc::now() },
        )
        .await?
        .expect("first claim should apply");
    assert_eq!(after.downloads_remaining, 1);
    assert_eq!(after.state, SendState::Active);
    assert!(after.last_claimed_at.is_some(), "claim must stamp the row");

    let after = repo
        .conditional_update(
            &record.id,
            &SendCondition::claimable_at(Utc::now()),
            SendMutation::ConsumeDownload { at: Utc::now() },
        )
        .await?
        .expect("second claim should apply");
    assert_eq!(after.downloads_remaining, 0);
    assert_eq!(after.state, SendState::Exhausted);

    let third = repo
        .conditional_update(
            &record.id,
            &SendCondition::claimable_at(Utc::now()),
            SendMutation::ConsumeDownload { at: Utc::now() },
        )
        .await?;
    assert!(third.is_none(), "exhausted record must not be claimable");

    let stored = repo.get(&record.id).await?.expect("record should exist");
    assert_eq!(stored.downloads_remaining, 0);
    Ok(())
}

async fn test_condition_rejects_expired(repo: &dyn SendRepository) -> Result<(), RepositoryError> {
    let record = sample_record(
        Utc::now() - Duration::seconds(120),
        Duration::seconds(60),
        5,
    );
    repo.insert(&record).await?;

    let result = repo
        .conditional_update(
            &record.id,
            &SendCondition::claimable_at(Utc::now()),
            SendMutation::ConsumeDownload { at: Utc::now() },
        )
        .await?;
    assert!(result.is_none(), "expired record must not be claimable");

    let stored = repo.get(&record.id).await?.expect("record should exist");
    assert_eq!(stored.downloads_remaining, 5, "no partial decrement");
    Ok(())
}

async fn test_transition_requires_observed_state(
    repo: &dyn SendRepository,
) -> Result<(), RepositoryError> {
    let record = sample_record(Utc::now(), Duration::seconds(60), 1);
    repo.insert(&record).await?;

    // Observed `exhausted`, but the row is still `active`.
    let stale = repo
        .conditional_update(
            &record.id,
            &SendCondition::in_state(SendState::Exhausted),
            SendMutation::Transition(SendState::Expired),
        )
        .await?;
    assert!(stale.is_none(), "stale observation must not apply");

    let retired = repo
        .conditional_update(
            &record.id,
            &SendCondition::in_state(SendState::Active),
            SendMutation::Transition(SendState::Expired),
        )
        .await?
        .expect("transition from observed state should apply");
    assert_eq!(retired.state, SendState::Expired);
    Ok(())
}

async fn test_invalid_edges_affect_nothing(
    repo: &dyn SendRepository,
) -> Result<(), RepositoryError> {
    let record = sample_record(Utc::now(), Duration::seconds(60), 1);
    repo.insert(&record).await?;

    // `active -> deleted` skips the reclamation step.
    let skipped = repo
        .conditional_update(
            &record.id,
            &SendCondition::in_state(SendState::Active),
            SendMutation::Transition(SendState::Deleted),
        )
        .await?;
    assert!(skipped.is_none());
    let stored = repo.get(&record.id).await?.expect("record should exist");
    assert_eq!(stored.state, SendState::Active);
    Ok(())
}

async fn test_revival_is_rejected(repo: &dyn SendRepository) -> Result<(), RepositoryError> {
    let record = sample_record(Utc::now(), Duration::seconds(60), 1);
    repo.insert(&record).await?;

    let err = repo
        .conditional_update(
            &record.id,
            &SendCondition::in_state(SendState::Exhausted),
            SendMutation::Transition(SendState::Active),
        )
        .await
        .expect_err("revival must be rejected");
    assert!(matches!(err, RepositoryError::InvalidMutation(_)));
    Ok(())
}

async fn test_tombstone_blocks_reuse(repo: &dyn SendRepository) -> Result<(), RepositoryError> {
    let record = sample_record(Utc::now(), Duration::seconds(60), 1);
    repo.insert(&record).await?;
    for (from, to) in [
        (SendState::Active, SendState::Expired),
        (SendState::Expired, SendState::Deleted),
    ] {
        repo.conditional_update(
            &record.id,
            &SendCondition::in_state(from),
            SendMutation::Transition(to),
        )
        .await?
        .expect("lifecycle transition should apply");
    }

    let tomb = repo.get(&record.id).await?.expect("tombstone should remain");
    assert_eq!(tomb.state, SendState::Deleted);

    let mut reused = sample_record(Utc::now(), Duration::seconds(60), 1);
    reused.id = record.id.clone();
    let err = repo.insert(&reused).await.expect_err("id reuse must fail");
    assert!(matches!(err, RepositoryError::DuplicateId(_)));
    Ok(())
}

async fn test_query_filters(repo: &dyn SendRepository) -> Result<(), RepositoryError> {
    let now = Utc::now();
    let past = sample_record(now - Duration::seconds(600), Duration::seconds(60), 1);
    let future = sample_record(now, Duration::seconds(600), 1);
    repo.insert(&past).await?;
    repo.insert(&future).await?;

    let expired = repo
        .query(&SendFilter::in_states([SendState::Active]).expired_by(now))
        .await?;
    assert!(expired.iter().any(|r| r.id == past.id));
    assert!(expired.iter().all(|r| r.id != future.id));
    assert!(expired.iter().all(|r| r.expires_at <= now));
    assert!(
        expired
            .windows(2)
            .all(|w| w[0].expires_at <= w[1].expires_at),
        "results should be ordered by expires_at"
    );

    let limited = repo
        .query(&SendFilter::in_states([SendState::Active]).limit(1))
        .await?;
    assert_eq!(limited.len(), 1);

    let none = repo
        .query(&SendFilter::in_states([SendState::Deleted]).expired_by(now - Duration::days(3650)))
        .await?;
    assert!(none.is_empty());
    Ok(())
}

async fn test_keyset_paging(repo: &dyn SendRepository) -> Result<(), RepositoryError> {
    // Identical deadlines far in the past: only the id breaks ties.
    let base = DateTime::from_timestamp(1_000_000_000, 0).expect("valid timestamp");
    let mut inserted = Vec::new();
    for _ in 0..3 {
        let record = sample_record(base, Duration::seconds(60), 1);
        repo.insert(&record).await?;
        inserted.push(record.id);
    }
    let filter = SendFilter::in_states([SendState::Active]).expired_by(base + Duration::seconds(60));

    let first = repo.query(&filter.clone().limit(2)).await?;
    assert_eq!(first.len(), 2);
    let last = first.last().expect("page is non-empty");
    let second = repo.query(&filter.clone().limit(2).after(last)).await?;
    assert_eq!(second.len(), 1, "cursor should skip rows already returned");

    let mut seen: Vec<_> = first.iter().chain(&second).map(|r| r.id.clone()).collect();
    seen.sort();
    inserted.sort();
    assert_eq!(seen, inserted);

    let tail = second.last().expect("page is non-empty");
    assert!(repo.query(&filter.after(tail)).await?.is_empty());
    Ok(())
}

async fn test_remove(repo: &dyn SendRepository) -> Result<(), RepositoryError> {
    let record = sample_record(Utc::now(), Duration::seconds(60), 1);
    repo.insert(&record).await?;
    assert!(repo.remove(&record.id).await?, "remove should report existence");
    assert!(repo.get(&record.id).await?.is_none());
    assert!(!repo.remove(&record.id).await?, "second remove is a no-op");
    Ok(())
}

async fn test_concurrent_last_download(repo: &dyn SendRepository) -> Result<(), RepositoryError> {
    let record = sample_record(Utc::now(), Duration::seconds(60), 1);
    repo.insert(&record).await?;

    let now = Utc::now();
    let condition = SendCondition::claimable_at(now);
    let attempts = (0..16).map(|_| {
        repo.conditional_update(
            &record.id,
            &condition,
            SendMutation::ConsumeDownload { at: now },
        )
    });
    let results = futures::future::join_all(attempts).await;

    let mut winners = 0;
    for result in results {
        if result?.is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one racer may take the last download");

    let stored = repo.get(&record.id).await?.expect("record should exist");
    assert_eq!(stored.downloads_remaining, 0);
    assert_eq!(stored.state, SendState::Exhausted);
    Ok(())
}
